//! Local IPC transport for the event bus.
//!
//! An external process connects to a Unix domain socket (a named pipe on
//! Windows), writes one JSON message and optionally reads one JSON reply.
//! Each message is posted as an [`IpcEvent`] routed to the listeners
//! registered for its `(mod, message)` pair.

pub mod error;
pub mod event;
pub mod message;
pub mod server;

pub use error::{IpcError, Result};
pub use event::{IpcEvent, IpcFilter, IpcRoute};
pub use message::{IpcMessage, IpcReply};
pub use server::{handle_connection, IpcServer};
