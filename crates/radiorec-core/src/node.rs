//! Observable entity primitives.
//!
//! Every domain object (program, record, station, and the collections that
//! hold them) embeds a [`Node`]: a property map plus status/progress/removal
//! flags that notify weakly-held listeners on change.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};

pub type EntityId = u64;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

fn next_entity_id() -> EntityId {
    NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed)
}

/// What changed.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    StatusChanged(i32),
    ProgressChanged(u8),
    IrremovableChanged(bool),
    RemovalChanged(bool),
    PropertyChanged(String),
    /// ICY `StreamTitle` seen by a running capture.
    StreamTitle(String),
    ItemsAdded(Vec<EntityId>),
    ItemsRemoved(Vec<EntityId>),
    ItemReplaced { index: usize, old: EntityId, new: EntityId },
}

/// A change notification.
///
/// `chain` starts with the entity the change happened on; every collection
/// that re-emits the event appends its own id, so a listener at the root can
/// tell exactly where in the station → program/record tree it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub chain: Vec<EntityId>,
}

impl Event {
    pub fn new(origin: EntityId, kind: EventKind) -> Self {
        Self {
            kind,
            chain: vec![origin],
        }
    }

    /// The entity the change happened on.
    pub fn origin(&self) -> EntityId {
        self.chain[0]
    }

    /// The entity that delivered this copy of the event.
    pub fn source(&self) -> EntityId {
        self.chain[self.chain.len() - 1]
    }

    pub fn forwarded_by(&self, id: EntityId) -> Self {
        let mut chain = self.chain.clone();
        chain.push(id);
        Self {
            kind: self.kind.clone(),
            chain,
        }
    }
}

pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Shared contract of everything the schedule pass walks over.
pub trait Entity: Send + Sync + 'static {
    fn node(&self) -> &Node;

    /// Advance time-driven state. Must never block on I/O.
    fn update(&self, now: DateTime<Utc>);

    /// Duplicate policy used by [`crate::collection::Collection::add_unique`].
    fn is_duplicate_of(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        self.node().properties() == other.node().properties()
    }

    /// Whether a collection may drop this entity right now.
    fn removable(&self) -> bool {
        !self.node().is_irremovable()
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Node {
    id: EntityId,
    props: RwLock<BTreeMap<String, String>>,
    status: AtomicI32,
    progress: AtomicU8,
    irremovable: AtomicBool,
    pending_removal: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn Listener>>>,
}

impl Node {
    pub fn new() -> Self {
        Self {
            id: next_entity_id(),
            props: RwLock::new(BTreeMap::new()),
            status: AtomicI32::new(0),
            progress: AtomicU8::new(0),
            irremovable: AtomicBool::new(false),
            pending_removal: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_properties<I, K, V>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let node = Self::new();
        {
            let mut map = node.props.write().unwrap_or_else(PoisonError::into_inner);
            for (k, v) in props {
                map.insert(k.into(), v.into());
            }
        }
        node
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    // ── Properties ────────────────────────────────────────────────────────────

    pub fn property(&self, key: &str) -> Option<String> {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Property value, or the empty string when unset.
    pub fn text(&self, key: &str) -> String {
        self.property(key).unwrap_or_default()
    }

    pub fn set_property(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let changed = {
            let mut map = self.props.write().unwrap_or_else(PoisonError::into_inner);
            if map.get(key) == Some(&value) {
                false
            } else {
                map.insert(key.to_string(), value);
                true
            }
        };
        if changed {
            self.notify(EventKind::PropertyChanged(key.to_string()));
        }
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Status / progress ─────────────────────────────────────────────────────

    pub fn status(&self) -> i32 {
        self.status.load(Ordering::Acquire)
    }

    pub fn set_status(&self, value: i32) {
        if self.status.swap(value, Ordering::AcqRel) != value {
            self.notify(EventKind::StatusChanged(value));
        }
    }

    /// Move from `from` to `to` only if the status is still `from`.
    pub fn transition(&self, from: i32, to: i32) -> bool {
        if from == to {
            return self.status() == from;
        }
        let swapped = self
            .status
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            self.notify(EventKind::StatusChanged(to));
        }
        swapped
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Acquire)
    }

    pub fn set_progress(&self, value: u8) {
        let value = value.min(100);
        if self.progress.swap(value, Ordering::AcqRel) != value {
            self.notify(EventKind::ProgressChanged(value));
        }
    }

    // ── Removal flags ─────────────────────────────────────────────────────────

    pub fn is_irremovable(&self) -> bool {
        self.irremovable.load(Ordering::Acquire)
    }

    pub fn set_irremovable(&self, value: bool) {
        if self.irremovable.swap(value, Ordering::AcqRel) != value {
            self.notify(EventKind::IrremovableChanged(value));
        }
    }

    pub fn is_pending_removal(&self) -> bool {
        self.pending_removal.load(Ordering::Acquire)
    }

    /// Ask the owning collection to drop this entity on the next sweep.
    /// Ignored while the entity is irremovable.
    pub fn set_pending_removal(&self, value: bool) {
        if self.is_irremovable() {
            return;
        }
        if self.pending_removal.swap(value, Ordering::AcqRel) != value {
            self.notify(EventKind::RemovalChanged(value));
        }
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Weak<dyn Listener>) {
        let mut listeners = lock(&self.listeners);
        if !listeners.iter().any(|l| Weak::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Weak<dyn Listener>) {
        lock(&self.listeners).retain(|l| !Weak::ptr_eq(l, listener));
    }

    pub fn has_listener(&self, listener: &Weak<dyn Listener>) -> bool {
        lock(&self.listeners)
            .iter()
            .any(|l| Weak::ptr_eq(l, listener))
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners)
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    pub fn notify(&self, kind: EventKind) {
        self.deliver(&Event::new(self.id, kind));
    }

    /// Deliver to a snapshot of the listener set; listeners added or removed
    /// during delivery only affect later events.
    pub fn deliver(&self, event: &Event) {
        let snapshot: Vec<Weak<dyn Listener>> = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.clone()
        };
        for listener in snapshot {
            if let Some(listener) = listener.upgrade() {
                listener.on_event(event);
            }
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("progress", &self.progress())
            .field("irremovable", &self.is_irremovable())
            .field("pending_removal", &self.is_pending_removal())
            .field("props", &self.properties())
            .finish()
    }
}
