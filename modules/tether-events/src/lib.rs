//! Typed, synchronous, in-process event bus.
//!
//! Producers build a value implementing [`Event`] and call `post()`. Every
//! enabled [`Listener`] whose filter declares that concrete event type, and
//! whose filter routed it into the pool the event is posted to, is invoked
//! in registration order until one returns [`ListenerResult::Stop`].
//!
//! Pools tolerate listeners being added, removed and events being posted
//! from inside callbacks and from other threads while a dispatch is running.

pub mod event;
pub mod filter;
pub mod global;
pub mod keyed;
pub mod listener;
pub mod pool;
pub mod result;

pub use event::{downcast, post_dyn, Event, EventHeader, EventKind, EventType};
pub use filter::{Callback, EventFilter, Filter};
pub use global::{global_listen, global_listen_bound};
pub use keyed::{keyed_route, KeyedEvent, KeyedFilter, KeyedPool};
pub use listener::Listener;
pub use pool::{DefaultPool, ListenerId, ListenerPool, ListenerProtocol};
pub use result::ListenerResult;

pub use tether_common::{current_module, ModuleRef};
