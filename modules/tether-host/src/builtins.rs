//! IPC routes the host answers itself.

use serde_json::{json, Value};
use tether_common::LOADER_MODULE_ID;
use tether_events::global_listen;
use tether_ipc::{IpcEvent, IpcFilter};
use tracing::debug;

pub const PING: &str = "ping";
pub const VERSION: &str = "version";

/// Register the built-in routes for the rest of the process.
pub fn register() {
    global_listen(ping, IpcFilter::new(LOADER_MODULE_ID, PING));
    global_listen(version, IpcFilter::new(LOADER_MODULE_ID, VERSION));
    debug!(module = LOADER_MODULE_ID, "Registered built-in IPC routes");
}

fn ping(_: &IpcEvent) -> Value {
    json!({ "pong": true })
}

fn version(_: &IpcEvent) -> Value {
    json!({ "version": env!("CARGO_PKG_VERSION") })
}
