//! Change subscriptions shared by the storage backends.
//!
//! Callbacks are stored as `Arc<dyn Fn(&E)>` and snapshotted before emission,
//! so a callback may subscribe or unsubscribe while being invoked. The table
//! lock is never held during a callback.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::model::EntityKind;

/// Notification delivered to `on_changed` subscribers. Carries no diff;
/// subscribers are expected to re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Another execution context sharing the same local storage wrote to it.
    ExternalWrite,
    /// The remote collection changed.
    RemoteChange(EntityKind),
    /// Cloud state was pulled and applied to the local replica.
    Reconciled,
}

pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub type ChangeCallback = Callback<ChangeEvent>;

/// Wraps a closure as a change callback.
pub fn callback<E, F>(f: F) -> Callback<E>
where
    F: Fn(&E) + Send + Sync + 'static,
{
    Arc::new(f)
}

struct ListenerTable<E> {
    next_id: u64,
    entries: Vec<(u64, Callback<E>)>,
}

fn lock<E>(table: &Mutex<ListenerTable<E>>) -> MutexGuard<'_, ListenerTable<E>> {
    // A panicking callback never runs under this lock, so the table stays consistent.
    match table.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Typed listener table.
pub struct Listeners<E> {
    table: Arc<Mutex<ListenerTable<E>>>,
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Listeners<E> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(ListenerTable {
                next_id: 1,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers `callback`. Dropping the returned subscription removes it.
    pub fn subscribe(&self, callback: Callback<E>) -> Subscription {
        let id = {
            let mut table = lock(&self.table);
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push((id, callback));
            id
        };

        let weak = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = weak.upgrade() {
                lock(&table).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = lock(&self.table)
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in snapshot {
            cb(event);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.table).entries.clear();
    }
}

/// Handle returned by `on_changed`. Unsubscribes on `unsubscribe()` or drop.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to release.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Folds several subscriptions into one that releases all of them.
    pub fn combine(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || drop(subscriptions))
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
