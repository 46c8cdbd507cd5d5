use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{IpcError, Result};

/// One decoded request from an IPC client.
///
/// Wire form: `{"mod": "<module id>", "message": "<name>", "reply": "<id>"?, "data": <any>?}`.
#[derive(Debug, Clone)]
pub struct IpcMessage {
    pub module: String,
    pub message: String,
    /// Present when the client waits for an answer.
    pub reply: Option<String>,
    pub data: Value,
    pub received_at: DateTime<Utc>,
}

impl IpcMessage {
    /// Decode the bytes of one read. Anything after the first NUL byte is
    /// ignored, since some clients send C strings.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        let mut json: Value = serde_json::from_slice(&bytes[..end])?;

        let module = required_string(&json, "mod")?;
        let message = required_string(&json, "message")?;
        let reply = json
            .get("reply")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let data = json
            .as_object_mut()
            .and_then(|fields| fields.remove("data"))
            .unwrap_or(Value::Null);

        Ok(Self {
            module,
            message,
            reply,
            data,
            received_at: Utc::now(),
        })
    }
}

fn required_string(json: &Value, field: &'static str) -> Result<String> {
    json.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(IpcError::MissingField(field))
}

/// Answer written back to a client that supplied a reply id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpcReply {
    pub reply: String,
    pub data: Value,
}

impl IpcReply {
    pub fn new(reply: impl Into<String>, data: Value) -> Self {
        Self {
            reply: reply.into(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
