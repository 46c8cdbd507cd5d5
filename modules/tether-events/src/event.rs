//! Event base, per-type identity tokens and the downcast primitive.
//!
//! Type identity is an explicit [`EventKind`] token compared by value, never
//! `std::any::TypeId`. Two independently built binaries agree on an event
//! type as long as they agree on its kind name.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tether_common::{current_module, ModuleRef};
use tracing::{trace, warn};

use crate::pool::{DefaultPool, ListenerPool};
use crate::result::ListenerResult;

use self::sealed::Kinded;

/// Identity token of one concrete event type.
///
/// `id` is the FNV-1a hash of `name`, computed at compile time. Equality
/// compares the hash first and the name second, so a hash collision never
/// makes two kinds equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKind {
    id: u64,
    name: &'static str,
}

impl EventKind {
    pub const fn new(name: &'static str) -> Self {
        Self {
            id: fnv1a(name.as_bytes()),
            name,
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKind({} #{:016x})", self.name, self.id)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

/// Per-event bookkeeping shared by every event type.
///
/// The sender is write-once: it is filled in at the start of the first post
/// and never changes afterwards. Cloning a header yields a fresh, unposted
/// one, since a cloned event is a new occurrence.
#[derive(Debug, Default)]
pub struct EventHeader {
    sender: OnceLock<ModuleRef>,
}

impl EventHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module that posted the event, once it has been posted.
    pub fn sender(&self) -> Option<&ModuleRef> {
        self.sender.get()
    }

    /// Returns the rejected sender if one was already recorded.
    fn record_sender(&self, sender: ModuleRef) -> Result<(), ModuleRef> {
        self.sender.set(sender)
    }
}

impl Clone for EventHeader {
    fn clone(&self) -> Self {
        Self::default()
    }
}

mod sealed {
    use super::{EventKind, EventType};

    /// Only reachable through the blanket impl, so an event's reported kind
    /// is always the `KIND` of its concrete type.
    pub trait Kinded {
        fn event_kind(&self) -> EventKind;
    }

    impl<T: EventType> Kinded for T {
        fn event_kind(&self) -> EventKind {
            T::KIND
        }
    }
}

/// Base of every postable value.
///
/// Implement it with [`impl_event!`](crate::impl_event), or by hand together
/// with [`EventType`] when the event needs a non-default [`Event::pool`].
pub trait Event: sealed::Kinded + Send + Sync + 'static {
    fn header(&self) -> &EventHeader;

    /// Pool this event is delivered to. Defaults to the process-wide pool.
    fn pool(&self) -> Arc<dyn ListenerPool> {
        DefaultPool::get()
    }

    fn sender(&self) -> Option<&ModuleRef> {
        self.header().sender()
    }

    /// Deliver this event synchronously on behalf of `sender`.
    fn post_from(&self, sender: ModuleRef) -> ListenerResult
    where
        Self: Sized,
    {
        post_dyn(self, sender)
    }

    /// Deliver this event on behalf of the module running on this thread.
    fn post(&self) -> ListenerResult
    where
        Self: Sized,
    {
        self.post_from(current_module())
    }
}

impl dyn Event {
    pub fn kind(&self) -> EventKind {
        self.event_kind()
    }

    pub fn is<T: EventType>(&self) -> bool {
        self.event_kind() == T::KIND
    }
}

impl fmt::Debug for dyn Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind())
            .field("sender", &self.sender())
            .finish()
    }
}

/// A concrete event type with a process-unique identity token.
///
/// # Safety
///
/// `KIND` must not be shared with any other type in the process. The
/// downcast primitive reinterprets an event as `Self` purely on a `KIND`
/// match. [`impl_event!`](crate::impl_event) derives the name from the
/// module path and type name, which is unique for types declared at module
/// scope.
pub unsafe trait EventType: Event + Sized {
    const KIND: EventKind;
}

/// Narrow a type-erased event to `T`. `None` when the concrete type differs.
pub fn downcast<T: EventType>(event: &dyn Event) -> Option<&T> {
    if event.event_kind() != T::KIND {
        return None;
    }
    // SAFETY: `event_kind` comes from the sealed blanket impl, i.e. it is the
    // `KIND` of the concrete type behind `event`. `EventType` guarantees no
    // other type shares `T::KIND`, so that concrete type is `T`.
    Some(unsafe { &*(event as *const dyn Event as *const T) })
}

/// Post a type-erased event. The sender is recorded before any listener runs.
pub fn post_dyn(event: &dyn Event, sender: ModuleRef) -> ListenerResult {
    if let Err(rejected) = event.header().record_sender(sender) {
        warn!(
            kind = %event.kind(),
            original = ?event.sender(),
            rejected = %rejected,
            "Event posted more than once, keeping original sender"
        );
    }

    let result = event.pool().handle(event);
    trace!(kind = %event.kind(), %result, "Event posted");
    result
}

/// Implement [`Event`] and [`EventType`] for a struct declared at module
/// scope. The struct needs an [`EventHeader`] field, named `header` unless
/// given as the second argument.
///
/// Do not use this for two types of the same name in the same module (for
/// instance types declared inside function bodies); implement
/// [`EventType`] by hand with an explicit name instead.
#[macro_export]
macro_rules! impl_event {
    ($ty:ident) => {
        $crate::impl_event!($ty, header);
    };
    ($ty:ident, $field:ident) => {
        impl $crate::Event for $ty {
            fn header(&self) -> &$crate::EventHeader {
                &self.$field
            }
        }

        // SAFETY: the kind name is this type's module path and identifier.
        unsafe impl $crate::EventType for $ty {
            const KIND: $crate::EventKind =
                $crate::EventKind::new(concat!(module_path!(), "::", stringify!($ty)));
        }
    };
}
