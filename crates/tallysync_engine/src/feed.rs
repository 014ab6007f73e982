//! Change notification: a broadcast feed of every applied change, and
//! per-entity watch channels backing `Repository::observe`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tallysync_core::{EntityKey, EntityKeyData};
use tokio::sync::watch;

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Entity was inserted (no live previous version existed).
    Insert,
    /// Entity was updated (previous version existed).
    Update,
    /// Entity was deleted or compacted away.
    Delete,
}

/// Where an applied change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A local write through a repository.
    Local,
    /// Remote data pulled by a reconciliation.
    Remote,
}

/// A single applied change to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Entity key holding the entity.
    pub key: EntityKey,
    /// Entity name.
    pub entity: String,
    /// Entity id.
    pub id: String,
    /// Type of change.
    pub change_type: ChangeType,
    /// Where the change came from.
    pub origin: ChangeOrigin,
}

/// A change feed that distributes applied changes to subscribers.
///
/// Events of one key are emitted in apply order.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to the change feed.
    ///
    /// The receiver should be drained regularly to avoid unbounded memory growth.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a change event to all subscribers, dropping disconnected ones.
    pub fn emit(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Current value of one observed entity. `None` when absent or deleted.
pub(crate) type ObservedValue = Option<Arc<[u8]>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObserverKey {
    key: EntityKey,
    entity: String,
    id: String,
}

/// Watch channels per `(key, entity, id)`.
///
/// A channel lives while at least one receiver exists; channels whose
/// receivers are all gone are pruned on the next publish to them.
pub(crate) struct ObserverRegistry {
    channels: RwLock<HashMap<ObserverKey, watch::Sender<ObservedValue>>>,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to one entity. `current` must be read under the same key
    /// lock that publishers hold, so no update falls between the two.
    pub(crate) fn observe(
        &self,
        key: &EntityKey,
        entity: &str,
        id: &str,
        current: Option<&[u8]>,
    ) -> watch::Receiver<ObservedValue> {
        let observer_key = ObserverKey {
            key: key.clone(),
            entity: entity.to_string(),
            id: id.to_string(),
        };
        let mut channels = self.channels.write();
        match channels.get(&observer_key) {
            Some(sender) => {
                sender.send_if_modified(|value| replace_if_changed(value, current));
                sender.subscribe()
            }
            None => {
                let (tx, rx) = watch::channel(current.map(Arc::from));
                channels.insert(observer_key, tx);
                rx
            }
        }
    }

    /// Publishes the new value of one entity. Identical values are not re-sent.
    pub(crate) fn publish(&self, key: &EntityKey, entity: &str, id: &str, value: Option<&[u8]>) {
        let observer_key = ObserverKey {
            key: key.clone(),
            entity: entity.to_string(),
            id: id.to_string(),
        };
        let stale = {
            let channels = self.channels.read();
            match channels.get(&observer_key) {
                Some(sender) if sender.receiver_count() == 0 => true,
                Some(sender) => {
                    sender.send_if_modified(|current| replace_if_changed(current, value));
                    false
                }
                None => false,
            }
        };
        if stale {
            let mut channels = self.channels.write();
            if channels.get(&observer_key).is_some_and(|s| s.receiver_count() == 0) {
                channels.remove(&observer_key);
            }
        }
    }

    /// Number of channels currently held.
    pub(crate) fn len(&self) -> usize {
        self.channels.read().len()
    }
}

fn replace_if_changed(current: &mut ObservedValue, next: Option<&[u8]>) -> bool {
    if current.as_deref() == next {
        return false;
    }
    *current = next.map(Arc::from);
    true
}

/// Builds change events for every entity whose visible value differs
/// between two versions of a key's payload.
pub(crate) fn diff_events(
    key: &EntityKey,
    before: &EntityKeyData,
    after: &EntityKeyData,
    origin: ChangeOrigin,
) -> Vec<ChangeEvent> {
    after
        .changed_records(before)
        .into_iter()
        .filter_map(|(entity, id)| {
            let was_live = before.body(&entity, &id).is_some();
            let is_live = after.body(&entity, &id).is_some();
            let change_type = match (was_live, is_live) {
                (false, true) => ChangeType::Insert,
                (true, true) => ChangeType::Update,
                (true, false) => ChangeType::Delete,
                // tombstone bookkeeping only
                (false, false) => return None,
            };
            Some(ChangeEvent {
                key: key.clone(),
                entity,
                id,
                change_type,
                origin,
            })
        })
        .collect()
}
