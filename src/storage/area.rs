//! Shared storage areas, per-context handles and change events.
//!
//! A [`StorageArea`] is one logical key/value space. Components never talk
//! to the backend directly; each takes a [`StorageContext`] from the area.
//! When a context writes a key, every listener registered by a *different*
//! context is told about it. The writer's own listeners stay silent.
//!
//! Writes go through [`StorageContext::update`], which holds the area's write
//! lock for the whole closure, so a read-modify-write by one context cannot
//! interleave with another. Events are dispatched after the lock is released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use uuid::Uuid;

use super::{KeyValueStore, StorageError};

/// Identity of one context within an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who made a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A context of this area.
    Context(ContextId),
    /// Another process sharing the same backend, seen by the watcher.
    External,
}

/// A key was written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub origin: Origin,
}

type Callback = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

struct Listener {
    id: u64,
    context: ContextId,
    callback: Callback,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
}

struct AreaInner {
    backend: Arc<dyn KeyValueStore>,
    listeners: Mutex<Listeners>,
    writes: Mutex<()>,
}

impl AreaInner {
    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One logical key/value space shared by many contexts.
#[derive(Clone)]
pub struct StorageArea {
    inner: Arc<AreaInner>,
}

impl StorageArea {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(AreaInner {
                backend,
                listeners: Mutex::new(Listeners::default()),
                writes: Mutex::new(()),
            }),
        }
    }

    /// Open a new independent context on this area.
    pub fn context(&self) -> StorageContext {
        let id = ContextId::new();
        tracing::debug!(context = %id, "opened storage context");
        StorageContext {
            id,
            area: self.clone(),
        }
    }

    /// Deliver `event` to every listener not owned by the originating context.
    ///
    /// Callbacks run on the caller's thread with no lock held, so a callback
    /// may read the area or drop its own subscription.
    pub fn dispatch(&self, event: &StorageEvent) {
        let targets: Vec<Callback> = {
            let listeners = self.inner.listeners();
            listeners
                .entries
                .iter()
                .filter(|l| match event.origin {
                    Origin::Context(origin) => origin != l.context,
                    Origin::External => true,
                })
                .map(|l| Arc::clone(&l.callback))
                .collect()
        };

        tracing::trace!(key = %event.key, listeners = targets.len(), "dispatching storage event");
        for callback in targets {
            callback(event);
        }
    }

    fn register(&self, context: ContextId, callback: Callback) -> Subscription {
        let mut listeners = self.inner.listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push(Listener {
            id,
            context,
            callback,
        });
        Subscription {
            area: Arc::downgrade(&self.inner),
            id,
        }
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.inner.listeners().entries.len()
    }
}

/// A reader/writer of a [`StorageArea`] with its own identity.
#[derive(Clone)]
pub struct StorageContext {
    id: ContextId,
    area: StorageArea,
}

impl StorageContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn area(&self) -> &StorageArea {
        &self.area
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.area.inner.backend.get_item(key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|batch| batch.set_item(key, value))
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.update(|batch| batch.remove_item(key))
    }

    /// Run `f` with exclusive write access to the area.
    ///
    /// Keys written inside `f` are announced to other contexts once the lock
    /// is released, even when `f` fails part way.
    pub fn update<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut WriteBatch<'_>) -> Result<T, StorageError>,
    {
        let (result, changed) = {
            let _guard = self.area.inner.write_guard();
            let mut batch = WriteBatch {
                backend: &*self.area.inner.backend,
                changed: Vec::new(),
            };
            let result = f(&mut batch);
            (result, batch.changed)
        };

        for key in changed {
            self.notify(&key);
        }
        result
    }

    /// Listen for changes made by other contexts (or other processes).
    /// Changes made through this context are never reported here.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        self.area.register(self.id, Arc::new(callback))
    }

    fn notify(&self, key: &str) {
        self.area.dispatch(&StorageEvent {
            key: key.to_string(),
            origin: Origin::Context(self.id),
        });
    }
}

/// Backend access while holding an area's write lock.
pub struct WriteBatch<'a> {
    backend: &'a dyn KeyValueStore,
    changed: Vec<String>,
}

impl WriteBatch<'_> {
    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend.get_item(key)
    }

    pub fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.backend.set_item(key, value)?;
        self.touch(key);
        Ok(())
    }

    pub fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.backend.remove_item(key)?;
        self.touch(key);
        Ok(())
    }

    fn touch(&mut self, key: &str) {
        if !self.changed.iter().any(|k| k == key) {
            self.changed.push(key.to_string());
        }
    }
}

/// Registration handle. Dropping it (or calling [`Subscription::unsubscribe`])
/// removes the listener.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    area: Weak<AreaInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.area.upgrade() {
            inner.listeners().entries.retain(|l| l.id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn area() -> StorageArea {
        StorageArea::new(Arc::new(MemoryStore::new()))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&StorageEvent) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move |_: &StorageEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_contexts_share_values() {
        let area = area();
        let a = area.context();
        let b = area.context();

        a.set_item("k", "v").unwrap();
        assert_eq!(b.get_item("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_own_writes_do_not_notify() {
        let area = area();
        let a = area.context();
        let (hits, cb) = counter();
        let _sub = a.subscribe(cb);

        a.set_item("k", "v").unwrap();
        a.remove_item("k").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_other_context_writes_notify_each_subscriber() {
        let area = area();
        let a = area.context();
        let b = area.context();
        let (hits1, cb1) = counter();
        let (hits2, cb2) = counter();
        let _s1 = a.subscribe(cb1);
        let _s2 = a.subscribe(cb2);

        b.set_item("k", "v").unwrap();
        assert_eq!(hits1.load(Ordering::SeqCst), 1);
        assert_eq!(hits2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_and_drop_remove_listener() {
        let area = area();
        let a = area.context();
        let b = area.context();
        let (hits, cb) = counter();

        let sub = a.subscribe(cb);
        assert_eq!(area.listener_count(), 1);
        sub.unsubscribe();
        assert_eq!(area.listener_count(), 0);

        b.set_item("k", "v").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        {
            let _scoped = a.subscribe(|_| {});
            assert_eq!(area.listener_count(), 1);
        }
        assert_eq!(area.listener_count(), 0);
    }

    #[test]
    fn test_external_events_reach_everyone() {
        let area = area();
        let a = area.context();
        let (hits, cb) = counter();
        let _sub = a.subscribe(cb);

        area.dispatch(&StorageEvent {
            key: "k".into(),
            origin: Origin::External,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_announces_each_key_once_after_unlock() {
        let area = area();
        let a = area.context();
        let b = area.context();
        let keys = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&keys);
        let _sub = a.subscribe(move |event| sink.lock().unwrap().push(event.key.clone()));

        b.update(|batch| {
            batch.set_item("k", "1")?;
            batch.set_item("k", "2")?;
            batch.remove_item("other")
        })
        .unwrap();
        assert_eq!(*keys.lock().unwrap(), vec!["k", "other"]);
        assert_eq!(a.get_item("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_callback_may_write_the_area() {
        let area = area();
        let a = area.context();
        let b = area.context();

        let writer = a.clone();
        let _sub = a.subscribe(move |event| {
            if event.key == "ping" {
                writer.set_item("pong", "1").unwrap();
            }
        });

        b.set_item("ping", "1").unwrap();
        assert_eq!(b.get_item("pong").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_concurrent_updates_do_not_lose_writes() {
        let area = area();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let ctx = area.context();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        ctx.update(|batch| {
                            let n: u64 = batch
                                .get_item("n")?
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                            batch.set_item("n", &(n + 1).to_string())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(area.context().get_item("n").unwrap().as_deref(), Some("800"));
    }

    #[test]
    fn test_callback_may_read_the_area() {
        let area = area();
        let a = area.context();
        let b = area.context();
        let seen = Arc::new(Mutex::new(None));

        let reader = a.clone();
        let slot = Arc::clone(&seen);
        let _sub = a.subscribe(move |event| {
            *slot.lock().unwrap() = reader.get_item(&event.key).unwrap();
        });

        b.set_item("k", "fresh").unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("fresh"));
    }
}
