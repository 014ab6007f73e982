//! tallysync CLI
//!
//! Maintenance tools for a tallysync local store directory.
//!
//! # Commands
//!
//! - `inspect` - Display per-key metadata of each tenant
//! - `verify` - Recompute hashes and counts against metadata
//! - `compact` - Drop tombstones already shared with the remote
//! - `clear` - Drop local data so the next sync refetches it
//!
//! The store must not be open by a running application: the directory lock
//! is exclusive.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tallysync local store tools.
#[derive(Parser)]
#[command(name = "tallysync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Restrict the command to one tenant (`_default` for the anonymous one)
    #[arg(global = true, short, long)]
    tenant: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display per-key metadata of each tenant
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Recompute hashes and counts against metadata
    Verify,

    /// Drop tombstones already shared with the remote
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Drop local data so the next sync refetches it
    Clear {
        /// Only clear this key; otherwise the whole tenant
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> commands::CliResult<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            let store = commands::open_store(&path)?;
            let namespaces = commands::tenant_namespaces(&store, cli.tenant.as_deref())?;
            commands::inspect::run(&store, &namespaces, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            let store = commands::open_store(&path)?;
            let namespaces = commands::tenant_namespaces(&store, cli.tenant.as_deref())?;
            commands::verify::run(&store, &namespaces)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            let store = commands::open_store(&path)?;
            let namespaces = commands::tenant_namespaces(&store, cli.tenant.as_deref())?;
            commands::compact::run(&store, &namespaces, dry_run)?;
        }
        Commands::Clear { key } => {
            let path = cli.path.ok_or("Store path required for clear")?;
            let tenant = cli.tenant.ok_or("Tenant required for clear")?;
            let store = commands::open_store(&path)?;
            let tenant = commands::parse_tenant(&tenant)?;
            commands::clear::run(&store, tenant.namespace(), key.as_deref())?;
        }
        Commands::Version => {
            println!("tallysync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("tallysync core v{}", tallysync_core::VERSION);
        }
    }

    Ok(())
}
