//! Observable, ordered collections of entities.
//!
//! A collection listens to every member it holds and re-emits member events
//! with its own id appended to the chain. Membership and listener
//! registration always change together under the items lock.

use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};

use crate::node::{lock, Entity, EntityId, Event, EventKind, Listener, Node};

pub struct Collection<T: Entity> {
    node: Node,
    items: Mutex<Vec<Arc<T>>>,
    this: Weak<Collection<T>>,
}

impl<T: Entity> Collection<T> {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            node: Node::new(),
            items: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    fn as_listener(&self) -> Weak<dyn Listener> {
        self.this.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<Arc<T>> {
        lock(&self.items).get(idx).cloned()
    }

    /// Copy of the current membership, safe to iterate while the collection
    /// keeps changing.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        lock(&self.items).clone()
    }

    pub fn index_of(&self, item: &Arc<T>) -> Option<usize> {
        lock(&self.items).iter().position(|i| Arc::ptr_eq(i, item))
    }

    pub fn contains(&self, item: &T) -> bool {
        lock(&self.items).iter().any(|i| i.is_duplicate_of(item))
    }

    /// True when `item` is a member and the collection is registered on it.
    pub fn observes(&self, item: &Arc<T>) -> bool {
        let items = lock(&self.items);
        items.iter().any(|i| Arc::ptr_eq(i, item)) && item.node().has_listener(&self.as_listener())
    }

    /// Append `item`. Adding an item that is already a member is a no-op.
    pub fn add(&self, item: Arc<T>) -> bool {
        let id = item.node().id();
        {
            let mut items = lock(&self.items);
            if items.iter().any(|i| Arc::ptr_eq(i, &item)) {
                return false;
            }
            item.node().add_listener(self.as_listener());
            items.push(item);
        }
        self.node.notify(EventKind::ItemsAdded(vec![id]));
        true
    }

    /// Add unless an equal item (per [`Entity::is_duplicate_of`]) is present.
    pub fn add_unique(&self, item: Arc<T>) -> bool {
        let id = item.node().id();
        {
            let mut items = lock(&self.items);
            if items.iter().any(|i| i.is_duplicate_of(&item)) {
                return false;
            }
            item.node().add_listener(self.as_listener());
            items.push(item);
        }
        self.node.notify(EventKind::ItemsAdded(vec![id]));
        true
    }

    /// Append every item that is not already a member, in order.
    pub fn add_all(&self, new_items: Vec<Arc<T>>) {
        let ids: Vec<EntityId> = {
            let mut items = lock(&self.items);
            let mut ids = Vec::new();
            for item in new_items {
                if items.iter().any(|i| Arc::ptr_eq(i, &item)) {
                    continue;
                }
                item.node().add_listener(self.as_listener());
                ids.push(item.node().id());
                items.push(item);
            }
            ids
        };
        if !ids.is_empty() {
            self.node.notify(EventKind::ItemsAdded(ids));
        }
    }

    /// Remove one member. No-op when it is absent or not removable.
    pub fn remove(&self, item: &Arc<T>) -> bool {
        self.remove_all(std::slice::from_ref(item)) == 1
    }

    /// Remove every listed member that is present and removable; returns how
    /// many were removed. Emits a single event for the batch.
    pub fn remove_all(&self, targets: &[Arc<T>]) -> usize {
        let listener = self.as_listener();
        let removed: Vec<EntityId> = {
            let mut items = lock(&self.items);
            let mut removed = Vec::new();
            items.retain(|i| {
                let drop_it =
                    targets.iter().any(|t| Arc::ptr_eq(i, t)) && i.removable();
                if drop_it {
                    i.node().remove_listener(&listener);
                    removed.push(i.node().id());
                }
                !drop_it
            });
            removed
        };
        let count = removed.len();
        if count > 0 {
            self.node.notify(EventKind::ItemsRemoved(removed));
        }
        count
    }

    /// Replace the member at `idx`. Replacing bypasses removal guards: the
    /// slot stays occupied.
    pub fn replace(&self, idx: usize, item: Arc<T>) -> Option<Arc<T>> {
        let listener = self.as_listener();
        let new_id = item.node().id();
        let old = {
            let mut items = lock(&self.items);
            let slot = items.get_mut(idx)?;
            slot.node().remove_listener(&listener);
            item.node().add_listener(listener);
            std::mem::replace(slot, item)
        };
        self.node.notify(EventKind::ItemReplaced {
            index: idx,
            old: old.node().id(),
            new: new_id,
        });
        Some(old)
    }

    /// Drop every member regardless of removal guards.
    pub fn clear(&self) {
        let listener = self.as_listener();
        let removed: Vec<EntityId> = {
            let mut items = lock(&self.items);
            items
                .drain(..)
                .map(|i| {
                    i.node().remove_listener(&listener);
                    i.node().id()
                })
                .collect()
        };
        if !removed.is_empty() {
            self.node.notify(EventKind::ItemsRemoved(removed));
        }
    }

    pub fn replace_all(&self, new_items: Vec<Arc<T>>) {
        self.clear();
        self.add_all(new_items);
    }

    /// Update every member, then drop the ones that asked to be removed in a
    /// single batch.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let members = self.snapshot();
        for item in &members {
            item.update(now);
        }
        let expired: Vec<Arc<T>> = members
            .into_iter()
            .filter(|i| i.node().is_pending_removal())
            .collect();
        if !expired.is_empty() {
            self.remove_all(&expired);
        }
    }
}

impl<T: Entity> Listener for Collection<T> {
    fn on_event(&self, event: &Event) {
        self.node.deliver(&event.forwarded_by(self.node.id()));
    }
}

impl<T: Entity> Entity for Collection<T> {
    fn node(&self) -> &Node {
        &self.node
    }

    fn update(&self, now: DateTime<Utc>) {
        self.sweep(now);
    }
}
