//! Targeted delivery: one pool per routing key.
//!
//! A keyed event is posted only to the listeners registered under its key,
//! instead of being offered to every listener of the default pool.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::event::EventType;
use crate::filter::{Callback, Filter};
use crate::pool::{DefaultPool, ListenerId, ListenerPool};
use crate::result::ListenerResult;

/// An event routed by key.
///
/// Its [`Event::pool`] should return `Self::keyed_pool().route(&self.key())`,
/// which [`keyed_route`] does.
pub trait KeyedEvent: EventType {
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    fn keyed_pool() -> &'static KeyedPool<Self::Key>;
}

/// Pool hook for keyed events.
pub fn keyed_route<E: KeyedEvent>(event: &E) -> Arc<dyn ListenerPool> {
    E::keyed_pool().route(&event.key())
}

/// Index of per-key [`DefaultPool`]s.
///
/// Joining a key creates its pool; posting never does. Pools are not
/// dropped when their last listener leaves, so call [`KeyedPool::prune`]
/// when keys are short-lived.
pub struct KeyedPool<K> {
    pools: Mutex<HashMap<K, Arc<DefaultPool>>>,
}

impl<K> KeyedPool<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<K, Arc<DefaultPool>>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The pool for `key`, created if missing. Used when joining.
    pub fn pool_for(&self, key: &K) -> Arc<DefaultPool> {
        self.pools()
            .entry(key.clone())
            .or_insert_with(|| {
                trace!(?key, "Creating keyed listener pool");
                Arc::new(DefaultPool::new())
            })
            .clone()
    }

    /// The pool for `key` if anyone ever joined it, otherwise an empty one.
    /// Used when posting, so unknown keys do not grow the index.
    pub fn route(&self, key: &K) -> Arc<dyn ListenerPool> {
        match self.pools().get(key) {
            Some(pool) => pool.clone(),
            None => Arc::new(DefaultPool::new()),
        }
    }

    /// Drop the pools nobody holds anymore: no member listener and no
    /// dispatch in flight. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut pools = self.pools();
        let before = pools.len();
        // Members and running posts keep their own `Arc`, and `pool_for`
        // only hands out clones under this lock.
        pools.retain(|_, pool| Arc::strong_count(pool) > 1 || !pool.is_empty());
        let removed = before - pools.len();
        if removed > 0 {
            trace!(removed, remaining = pools.len(), "Pruned keyed listener pools");
        }
        removed
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.pools().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.pools().keys().cloned().collect()
    }

    /// Number of keys with a pool.
    pub fn len(&self) -> usize {
        self.pools().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for KeyedPool<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Filter that joins the pool for one key of `E`.
pub struct KeyedFilter<E: KeyedEvent> {
    key: E::Key,
    listener: Option<ListenerId>,
}

impl<E: KeyedEvent> KeyedFilter<E> {
    pub fn new(key: E::Key) -> Self {
        Self {
            key,
            listener: None,
        }
    }

    pub fn key(&self) -> &E::Key {
        &self.key
    }
}

impl<E: KeyedEvent> Clone for KeyedFilter<E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            listener: self.listener,
        }
    }
}

impl<E: KeyedEvent> fmt::Debug for KeyedFilter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedFilter")
            .field("event", &E::KIND)
            .field("key", &self.key)
            .field("listener", &self.listener)
            .finish()
    }
}

impl<E: KeyedEvent> Filter for KeyedFilter<E> {
    type Event = E;
    type Output = ListenerResult;

    fn handle(&self, callback: &Callback<Self>, event: &E) -> ListenerResult {
        if event.key() != self.key {
            return ListenerResult::Propagate;
        }
        callback(event)
    }

    fn pool(&self) -> Arc<dyn ListenerPool> {
        E::keyed_pool().pool_for(&self.key)
    }

    fn set_listener(&mut self, listener: ListenerId) {
        self.listener = Some(listener);
    }

    fn listener(&self) -> Option<ListenerId> {
        self.listener
    }
}
