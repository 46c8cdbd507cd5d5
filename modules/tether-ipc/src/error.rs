use thiserror::Error;

pub type Result<T> = std::result::Result<T, IpcError>;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IPC message has no string '{0}' field")]
    MissingField(&'static str),

    #[error("IPC message isn't valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IPC transport error: {0}")]
    Io(#[from] std::io::Error),
}
