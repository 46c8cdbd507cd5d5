//! The generic listener handle.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::event::{downcast, Event};
use crate::filter::{Callback, Filter};
use crate::pool::{ListenerId, ListenerPool, ListenerProtocol};
use crate::result::ListenerResult;

/// A subscription: a user callback plus a filter strategy.
///
/// Creating a listener enables it, i.e. registers it in the pool its filter
/// selects. Dropping it disables it. Moving it keeps the subscription as is.
/// Cloning it creates a second, independent subscription with the same
/// callback and filter.
///
/// The pool only holds a shared reference to the listener's internals, so a
/// delivery that already started on another thread can finish after the
/// owner dropped the listener; no new delivery starts after that.
pub struct Listener<F: Filter> {
    inner: Arc<ListenerInner<F>>,
}

struct ListenerInner<F: Filter> {
    id: ListenerId,
    binding: RwLock<Binding<F>>,
    membership: Mutex<Option<Arc<dyn ListenerPool>>>,
}

struct Binding<F: Filter> {
    callback: Option<Arc<Callback<F>>>,
    filter: Arc<F>,
}

impl<F: Filter> ListenerInner<F> {
    fn binding(&self) -> RwLockReadGuard<'_, Binding<F>> {
        self.binding.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn binding_mut(&self) -> RwLockWriteGuard<'_, Binding<F>> {
        self.binding.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn membership(&self) -> MutexGuard<'_, Option<Arc<dyn ListenerPool>>> {
        self.membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: Filter> ListenerProtocol for ListenerInner<F> {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn handle(&self, event: &dyn Event) -> ListenerResult {
        let Some(event) = downcast::<F::Event>(event) else {
            return ListenerResult::Propagate;
        };

        // Released before the callback runs; it may rebind this listener.
        let (callback, filter) = {
            let binding = self.binding();
            match &binding.callback {
                Some(callback) => (callback.clone(), binding.filter.clone()),
                None => return ListenerResult::Propagate,
            }
        };

        filter.handle(&*callback, event)
    }
}

impl<F: Filter> Listener<F> {
    /// Subscribe `callback` (a closure or a plain `fn`) under `filter`.
    pub fn new(
        callback: impl Fn(&F::Event) -> F::Output + Send + Sync + 'static,
        filter: F,
    ) -> Self {
        let callback: Arc<Callback<F>> = Arc::new(callback);
        Self::from_parts(Some(callback), filter)
    }

    /// Subscribe a method of a shared object.
    pub fn bound<T>(target: Arc<T>, method: fn(&T, &F::Event) -> F::Output, filter: F) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::new(move |event: &F::Event| method(&target, event), filter)
    }

    /// An enabled listener with no callback. It matches nothing until
    /// [`Listener::bind`] is called.
    pub fn with_filter(filter: F) -> Self {
        Self::from_parts(None, filter)
    }

    fn from_parts(callback: Option<Arc<Callback<F>>>, mut filter: F) -> Self {
        let id = ListenerId::next();
        filter.set_listener(id);

        let listener = Self {
            inner: Arc::new(ListenerInner {
                id,
                binding: RwLock::new(Binding {
                    callback,
                    filter: Arc::new(filter),
                }),
                membership: Mutex::new(None),
            }),
        };
        listener.enable();
        listener
    }

    pub fn id(&self) -> ListenerId {
        self.inner.id
    }

    /// Join the pool selected by the filter. `false` if already enabled or
    /// the pool refused the listener.
    pub fn enable(&self) -> bool {
        let mut membership = self.inner.membership();
        if membership.is_some() {
            return false;
        }

        let pool = self.inner.binding().filter.pool();
        let protocol: Arc<dyn ListenerProtocol> = self.inner.clone();
        if !pool.add(protocol) {
            return false;
        }

        trace!(listener = %self.inner.id, "Listener enabled");
        *membership = Some(pool);
        true
    }

    /// Leave the current pool, if any.
    pub fn disable(&self) {
        let pool = self.inner.membership().take();
        if let Some(pool) = pool {
            pool.remove(self.inner.id);
            trace!(listener = %self.inner.id, "Listener disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.membership().is_some()
    }

    /// Pool this listener is currently a member of.
    pub fn pool(&self) -> Option<Arc<dyn ListenerPool>> {
        self.inner.membership().clone()
    }

    /// Replace the callback. Takes effect for the next delivery.
    pub fn bind(&self, callback: impl Fn(&F::Event) -> F::Output + Send + Sync + 'static) {
        let callback: Arc<Callback<F>> = Arc::new(callback);
        self.inner.binding_mut().callback = Some(callback);
    }

    /// Replace the callback with a method of a shared object.
    pub fn bind_method<T>(&self, target: Arc<T>, method: fn(&T, &F::Event) -> F::Output)
    where
        T: Send + Sync + 'static,
    {
        self.bind(move |event: &F::Event| method(&target, event));
    }

    pub fn has_callback(&self) -> bool {
        self.inner.binding().callback.is_some()
    }

    pub fn callback(&self) -> Option<Arc<Callback<F>>> {
        self.inner.binding().callback.clone()
    }

    /// Replace the filter. An enabled listener moves to the new filter's
    /// pool if it differs from the current one.
    pub fn set_filter(&self, mut filter: F) {
        filter.set_listener(self.inner.id);
        let target = filter.pool();
        self.inner.binding_mut().filter = Arc::new(filter);

        let current = self.pool();
        if let Some(current) = current {
            if !same_pool(&current, &target) {
                self.disable();
                self.enable();
            }
        }
    }

    /// A copy of the current filter.
    pub fn filter(&self) -> F {
        (*self.inner.binding().filter).clone()
    }

    /// Inspect the current filter without cloning it. `f` may call back into
    /// this listener.
    pub fn with_filter_ref<R>(&self, f: impl FnOnce(&F) -> R) -> R {
        let filter = self.inner.binding().filter.clone();
        f(&filter)
    }
}

fn same_pool(a: &Arc<dyn ListenerPool>, b: &Arc<dyn ListenerPool>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl<F: Filter> Clone for Listener<F> {
    fn clone(&self) -> Self {
        let (callback, filter) = {
            let binding = self.inner.binding();
            (binding.callback.clone(), (*binding.filter).clone())
        };
        Self::from_parts(callback, filter)
    }
}

impl<F: Filter> Drop for Listener<F> {
    fn drop(&mut self) {
        self.disable();
    }
}

impl<F: Filter + fmt::Debug> fmt::Debug for Listener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.inner.id)
            .field("enabled", &self.is_enabled())
            .field("has_callback", &self.has_callback())
            .field("filter", &*self.inner.binding().filter)
            .finish()
    }
}
