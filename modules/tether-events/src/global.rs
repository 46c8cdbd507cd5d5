//! Listeners that live for the rest of the process.

use std::sync::Arc;

use tracing::debug;

use crate::filter::Filter;
use crate::listener::Listener;

/// Register a listener that is never disabled.
///
/// The listener is intentionally leaked: no handle is returned, so it cannot
/// be unsubscribed. Only use this for observers that are meant to run for as
/// long as the process does.
pub fn global_listen<F: Filter>(
    callback: impl Fn(&F::Event) -> F::Output + Send + Sync + 'static,
    filter: F,
) {
    register(Listener::new(callback, filter));
}

/// [`global_listen`] for a method of a shared object.
pub fn global_listen_bound<F, T>(target: Arc<T>, method: fn(&T, &F::Event) -> F::Output, filter: F)
where
    F: Filter,
    T: Send + Sync + 'static,
{
    register(Listener::bound(target, method, filter));
}

fn register<F: Filter>(listener: Listener<F>) {
    let listener: &'static Listener<F> = Box::leak(Box::new(listener));
    debug!(
        listener = %listener.id(),
        event = %<F::Event as crate::EventType>::KIND,
        enabled = listener.is_enabled(),
        "Registered global listener"
    );
}
