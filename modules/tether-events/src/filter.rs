//! Filter strategies.
//!
//! A filter decides three things for the listener that embeds it: which
//! event type it accepts, what the user callback looks like, and which pool
//! the listener joins.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::event::EventType;
use crate::pool::{DefaultPool, ListenerId, ListenerPool};
use crate::result::ListenerResult;

/// The user callback shape declared by a filter.
pub type Callback<F> =
    dyn Fn(&<F as Filter>::Event) -> <F as Filter>::Output + Send + Sync;

pub trait Filter: Clone + Send + Sync + 'static {
    /// Concrete event type this filter accepts.
    type Event: EventType;

    /// What the user callback returns. The filter turns it into a
    /// [`ListenerResult`] in [`Filter::handle`].
    type Output: 'static;

    /// Invoke `callback` for an event already known to be `Self::Event`.
    fn handle(&self, callback: &Callback<Self>, event: &Self::Event) -> ListenerResult;

    /// Pool a listener using this filter joins.
    fn pool(&self) -> Arc<dyn ListenerPool> {
        DefaultPool::get()
    }

    /// Called whenever a listener (re)binds this filter.
    fn set_listener(&mut self, listener: ListenerId);

    fn listener(&self) -> Option<ListenerId>;
}

/// Broadcast filter: joins the default pool and accepts every `E`.
pub struct EventFilter<E> {
    listener: Option<ListenerId>,
    _event: PhantomData<fn() -> E>,
}

impl<E> EventFilter<E> {
    pub fn new() -> Self {
        Self {
            listener: None,
            _event: PhantomData,
        }
    }
}

impl<E> Default for EventFilter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventFilter<E> {
    fn clone(&self) -> Self {
        Self {
            listener: self.listener,
            _event: PhantomData,
        }
    }
}

impl<E: EventType> fmt::Debug for EventFilter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("event", &E::KIND)
            .field("listener", &self.listener)
            .finish()
    }
}

impl<E: EventType> Filter for EventFilter<E> {
    type Event = E;
    type Output = ListenerResult;

    fn handle(&self, callback: &Callback<Self>, event: &E) -> ListenerResult {
        callback(event)
    }

    fn set_listener(&mut self, listener: ListenerId) {
        self.listener = Some(listener);
    }

    fn listener(&self) -> Option<ListenerId> {
        self.listener
    }
}
