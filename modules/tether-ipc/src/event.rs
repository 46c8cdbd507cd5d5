//! The bus event carrying an IPC request, and the filter that answers it.

use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tether_events::{
    keyed_route, Callback, Event, EventHeader, EventKind, EventType, Filter, KeyedEvent,
    KeyedPool, ListenerId, ListenerPool, ListenerResult,
};
use tracing::debug;

use crate::message::IpcMessage;

/// Routing key of an IPC request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpcRoute {
    pub module: String,
    pub message: String,
}

impl IpcRoute {
    pub fn new(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for IpcRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.message)
    }
}

static ROUTES: LazyLock<KeyedPool<IpcRoute>> = LazyLock::new(KeyedPool::new);

/// An IPC request posted on the bus. Only listeners joined under its
/// [`IpcRoute`] see it.
pub struct IpcEvent {
    header: EventHeader,
    route: IpcRoute,
    reply_id: Option<String>,
    data: Value,
    received_at: DateTime<Utc>,
    reply: Mutex<Option<Value>>,
}

impl IpcEvent {
    pub fn new(route: IpcRoute, reply_id: Option<String>, data: Value) -> Self {
        Self {
            header: EventHeader::new(),
            route,
            reply_id,
            data,
            received_at: Utc::now(),
            reply: Mutex::new(None),
        }
    }

    pub fn from_message(message: IpcMessage) -> Self {
        Self {
            header: EventHeader::new(),
            route: IpcRoute::new(message.module, message.message),
            reply_id: message.reply,
            data: message.data,
            received_at: message.received_at,
            reply: Mutex::new(None),
        }
    }

    pub fn route(&self) -> &IpcRoute {
        &self.route
    }

    pub fn module_id(&self) -> &str {
        &self.route.module
    }

    pub fn message_id(&self) -> &str {
        &self.route.message
    }

    pub fn reply_id(&self) -> Option<&str> {
        self.reply_id.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Store the answer for the client. The first reply wins; `false` if one
    /// was already stored.
    pub fn reply(&self, value: Value) -> bool {
        let mut slot = self.reply.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!(route = %self.route, "Ignoring second IPC reply");
            return false;
        }
        *slot = Some(value);
        true
    }

    pub fn has_reply(&self) -> bool {
        self.reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn take_reply(&self) -> Option<Value> {
        self.reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for IpcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcEvent")
            .field("route", &self.route)
            .field("reply_id", &self.reply_id)
            .field("received_at", &self.received_at)
            .finish_non_exhaustive()
    }
}

impl Event for IpcEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }

    fn pool(&self) -> Arc<dyn ListenerPool> {
        keyed_route(self)
    }
}

// SAFETY: the name is unique to this type.
unsafe impl EventType for IpcEvent {
    const KIND: EventKind = EventKind::new("tether_ipc::IpcEvent");
}

impl KeyedEvent for IpcEvent {
    type Key = IpcRoute;

    fn key(&self) -> IpcRoute {
        self.route.clone()
    }

    fn keyed_pool() -> &'static KeyedPool<IpcRoute> {
        &ROUTES
    }
}

/// Answers one IPC route. The callback's return value becomes the reply and
/// ends the dispatch.
#[derive(Debug, Clone)]
pub struct IpcFilter {
    route: IpcRoute,
    listener: Option<ListenerId>,
}

impl IpcFilter {
    pub fn new(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            route: IpcRoute::new(module, message),
            listener: None,
        }
    }

    pub fn route(&self) -> &IpcRoute {
        &self.route
    }
}

impl Filter for IpcFilter {
    type Event = IpcEvent;
    type Output = Value;

    fn handle(&self, callback: &Callback<Self>, event: &IpcEvent) -> ListenerResult {
        if event.route != self.route {
            return ListenerResult::Propagate;
        }
        event.reply(callback(event));
        ListenerResult::Stop
    }

    fn pool(&self) -> Arc<dyn ListenerPool> {
        ROUTES.pool_for(&self.route)
    }

    fn set_listener(&mut self, listener: ListenerId) {
        self.listener = Some(listener);
    }

    fn listener(&self) -> Option<ListenerId> {
        self.listener
    }
}
