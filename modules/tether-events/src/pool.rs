//! Listener pools: the contract and the default thread-safe implementation.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, trace};

use crate::event::Event;
use crate::result::ListenerResult;

/// Process-unique identity of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a pool sees of a listener.
pub trait ListenerProtocol: Send + Sync {
    fn id(&self) -> ListenerId;

    /// Deliver `event`. Listeners not interested in its type return
    /// `Propagate` without running any user code.
    fn handle(&self, event: &dyn Event) -> ListenerResult;
}

/// Owns a set of listeners and the algorithm that delivers one event to them.
///
/// Every method may be called from inside a callback that this same pool is
/// currently running, and from other threads concurrently with `handle`.
pub trait ListenerPool: Send + Sync {
    /// Register a listener. `false` if it is already a member.
    fn add(&self, listener: Arc<dyn ListenerProtocol>) -> bool;

    /// Unregister a listener. No new delivery reaches it once this returns;
    /// an invocation already running on another thread is left to finish.
    fn remove(&self, listener: ListenerId);

    /// Deliver `event` to the members in registration order, stopping at the
    /// first `Stop`.
    fn handle(&self, event: &dyn Event) -> ListenerResult;

    /// Number of live members, including ones not yet visible to a running
    /// dispatch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// DefaultPool
// ---------------------------------------------------------------------------

type Member = Arc<dyn ListenerProtocol>;

#[derive(Default)]
struct PoolState {
    /// Registration order. `None` marks a slot removed mid-dispatch.
    active: Vec<Option<Member>>,
    /// Added while a dispatch was running; not yet in `active`.
    pending: Vec<Member>,
    tombstones: usize,
}

impl PoolState {
    fn contains(&self, id: ListenerId) -> bool {
        self.active.iter().flatten().any(|l| l.id() == id)
            || self.pending.iter().any(|l| l.id() == id)
    }

    /// Appending never moves an existing slot, so this is safe while
    /// dispatches are iterating by index.
    fn promote_pending(&mut self) {
        if !self.pending.is_empty() {
            let pending = mem::take(&mut self.pending);
            self.active.extend(pending.into_iter().map(Some));
        }
    }

    /// Only valid when no dispatch is running.
    fn compact(&mut self) {
        if self.tombstones > 0 {
            self.active.retain(Option::is_some);
            self.tombstones = 0;
        }
        self.promote_pending();
    }

    fn live(&self) -> usize {
        self.active.len() - self.tombstones + self.pending.len()
    }
}

/// Thread-safe, reentrancy-tolerant pool.
///
/// A dispatch visits the slots that existed when it started, taking the lock
/// only to read one slot at a time and never while user code runs. While any
/// dispatch is in progress, additions are parked in a pending list and
/// removals leave tombstones, so slot indices stay stable. When the last
/// dispatch finishes, tombstones are compacted away and pending listeners are
/// appended in the order they were added.
pub struct DefaultPool {
    /// Number of dispatches in progress. Only changed with `state` locked.
    depth: AtomicUsize,
    state: Mutex<PoolState>,
}

impl DefaultPool {
    pub fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// The process-wide pool, created on first use and never torn down.
    pub fn get() -> Arc<DefaultPool> {
        static POOL: OnceLock<Arc<DefaultPool>> = OnceLock::new();
        POOL.get_or_init(|| {
            debug!("Creating default listener pool");
            Arc::new(DefaultPool::new())
        })
        .clone()
    }

    /// Whether a dispatch is running on any thread.
    pub fn is_dispatching(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    // Callbacks never run under this lock, so poisoning can only come from a
    // panic inside the short bookkeeping sections, which leave state valid.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a dispatch and return the number of slots it may visit.
    ///
    /// Pending listeners were enabled before this dispatch began, so they are
    /// promoted first; a dispatch already in flight keeps its own bound.
    fn enter(&self) -> usize {
        let mut state = self.lock();
        self.depth.fetch_add(1, Ordering::AcqRel);
        state.promote_pending();
        state.active.len()
    }

    fn leave(&self) {
        let mut state = self.lock();
        if self.depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            state.compact();
        }
    }

    fn slot(&self, index: usize) -> Option<Member> {
        self.lock().active.get(index).cloned().flatten()
    }
}

impl Default for DefaultPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DefaultPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DefaultPool")
            .field("depth", &self.depth.load(Ordering::Acquire))
            .field("active", &state.active.len())
            .field("pending", &state.pending.len())
            .field("tombstones", &state.tombstones)
            .finish()
    }
}

/// Ends a dispatch on every exit path, including a panicking callback.
struct Dispatch<'a> {
    pool: &'a DefaultPool,
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        self.pool.leave();
    }
}

impl ListenerPool for DefaultPool {
    fn add(&self, listener: Member) -> bool {
        let id = listener.id();
        let mut state = self.lock();
        if state.contains(id) {
            debug!(listener = %id, "Listener already registered");
            return false;
        }
        if self.depth.load(Ordering::Acquire) > 0 {
            state.pending.push(listener);
            trace!(listener = %id, "Listener added to pending set");
        } else {
            state.active.push(Some(listener));
            trace!(listener = %id, "Listener added");
        }
        true
    }

    fn remove(&self, id: ListenerId) {
        // Dropped after the lock is released: the last reference to a
        // listener may own other listeners whose drop re-enters this pool.
        let removed = {
            let mut state = self.lock();
            if let Some(pos) = state.pending.iter().position(|l| l.id() == id) {
                Some(state.pending.remove(pos))
            } else if let Some(pos) = state
                .active
                .iter()
                .position(|slot| matches!(slot, Some(l) if l.id() == id))
            {
                if self.depth.load(Ordering::Acquire) > 0 {
                    state.tombstones += 1;
                    state.active[pos].take()
                } else {
                    state.active.remove(pos)
                }
            } else {
                None
            }
        };

        if removed.is_some() {
            trace!(listener = %id, "Listener removed");
        }
    }

    fn handle(&self, event: &dyn Event) -> ListenerResult {
        let bound = self.enter();
        let _dispatch = Dispatch { pool: self };

        for index in 0..bound {
            let Some(listener) = self.slot(index) else {
                continue;
            };
            if listener.handle(event).is_stop() {
                trace!(kind = %event.kind(), listener = %listener.id(), "Dispatch stopped");
                return ListenerResult::Stop;
            }
        }
        ListenerResult::Propagate
    }

    fn len(&self) -> usize {
        self.lock().live()
    }
}
