//! Connection handling and the accept loop.

use std::future::Future;
use std::io;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tether_common::{loader_module, Config};
use tether_events::Event;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{IpcError, Result};
use crate::event::IpcEvent;
use crate::message::{IpcMessage, IpcReply};

/// Serve one client: read one message of at most `buffer_size - 1` bytes,
/// post the decoded [`IpcEvent`] once, and write the reply if the client
/// asked for one and a listener produced it. The stream is shut down on
/// every path.
///
/// Undecodable messages are logged and dropped, not returned as errors.
pub async fn handle_connection<S>(mut stream: S, buffer_size: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let limit = buffer_size.saturating_sub(1).max(1);
    let outcome = match read_message(&mut stream, limit).await {
        Ok(bytes) => respond(&mut stream, &bytes).await,
        Err(err) => Err(err.into()),
    };

    let shutdown = stream.shutdown().await;
    debug!("IPC connection closed");
    outcome?;
    shutdown?;
    Ok(())
}

/// Read until the bytes form a complete JSON value, the client half-closes,
/// or `limit` bytes arrived. Clients may split a message across writes.
async fn read_message<S>(stream: &mut S, limit: usize) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let read = stream.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
        if !awaiting_more(&buffer[..filled]) {
            break;
        }
    }
    buffer.truncate(filled);
    Ok(buffer)
}

/// A prefix of a JSON value, as opposed to a complete or malformed one.
fn awaiting_more(bytes: &[u8]) -> bool {
    if bytes.contains(&0) {
        return false;
    }
    match serde_json::from_slice::<serde::de::IgnoredAny>(bytes) {
        Ok(_) => false,
        Err(err) => err.is_eof(),
    }
}

async fn respond<S>(stream: &mut S, bytes: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let message = match IpcMessage::parse(bytes) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, bytes = bytes.len(), "Dropping IPC message");
            return Ok(());
        }
    };

    info!(
        module = %message.module,
        message = %message.message,
        reply = ?message.reply,
        "Received IPC message"
    );

    let reply_id = message.reply.clone();
    let event = IpcEvent::from_message(message);

    // Listeners are synchronous and may block.
    let (result, data) = tokio::task::spawn_blocking(move || {
        let result = event.post_from(loader_module());
        (result, event.take_reply())
    })
    .await
    .map_err(|err| IpcError::Io(io::Error::other(err)))?;

    debug!(%result, replied = data.is_some(), "IPC message dispatched");

    if let (Some(reply_id), Some(data)) = (reply_id, data) {
        let bytes = IpcReply::new(reply_id, data).to_bytes()?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
    }
    Ok(())
}

/// Accepts IPC clients on a Unix domain socket, or a named pipe on Windows,
/// and serves each on its own task.
pub struct IpcServer {
    #[cfg(unix)]
    path: PathBuf,
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
    #[cfg(windows)]
    path: String,
    #[cfg(windows)]
    pipe: tokio::net::windows::named_pipe::NamedPipeServer,
    buffer_size: usize,
}

#[cfg(unix)]
impl IpcServer {
    /// Bind the socket at `config.ipc_path`. A stale socket left by a
    /// previous run is replaced; any other existing file, or a socket another
    /// server still listens on, fails with `AlreadyExists`. Must be called
    /// inside a Tokio runtime.
    pub fn bind(config: &Config) -> Result<Self> {
        let path = PathBuf::from(&config.ipc_path);
        clear_stale_socket(&path)?;
        let listener = tokio::net::UnixListener::bind(&path)?;
        info!(path = %path.display(), "IPC server listening");

        Ok(Self {
            path,
            listener,
            buffer_size: config.ipc_buffer_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept clients until `shutdown` resolves.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => self.spawn_client(stream),
                    Err(err) => warn!(error = %err, "Failed to accept IPC connection"),
                },
            }
        }
        info!("IPC server stopped");
        Ok(())
    }
}

#[cfg(unix)]
fn clear_stale_socket(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        ));
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("another server is listening on {}", path.display()),
        ));
    }

    debug!(path = %path.display(), "Removing stale IPC socket");
    std::fs::remove_file(path)
}

#[cfg(unix)]
impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(error = %err, "Could not remove IPC socket");
        }
    }
}

#[cfg(windows)]
impl IpcServer {
    /// Create the first instance of the pipe named `config.ipc_path`. Fails
    /// if another process already owns the name. Must be called inside a
    /// Tokio runtime.
    pub fn bind(config: &Config) -> Result<Self> {
        let pipe = Self::instance(&config.ipc_path, config.ipc_buffer_size, true)?;
        info!(path = %config.ipc_path, "IPC server listening");

        Ok(Self {
            path: config.ipc_path.clone(),
            pipe,
            buffer_size: config.ipc_buffer_size,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn instance(
        path: &str,
        buffer_size: usize,
        first: bool,
    ) -> io::Result<tokio::net::windows::named_pipe::NamedPipeServer> {
        let size = u32::try_from(buffer_size).unwrap_or(u32::MAX);
        tokio::net::windows::named_pipe::ServerOptions::new()
            .first_pipe_instance(first)
            .in_buffer_size(size)
            .out_buffer_size(size)
            .create(path)
    }

    /// Accept clients until `shutdown` resolves. Failing to create a new
    /// pipe instance ends the loop with an error.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                connected = self.pipe.connect() => {
                    let next = Self::instance(&self.path, self.buffer_size, false)?;
                    let client = std::mem::replace(&mut self.pipe, next);
                    match connected {
                        Ok(()) => self.spawn_client(client),
                        Err(err) => warn!(error = %err, "Failed to accept IPC connection"),
                    }
                }
            }
        }
        info!("IPC server stopped");
        Ok(())
    }
}

impl IpcServer {
    fn spawn_client<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let buffer_size = self.buffer_size;
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, buffer_size).await {
                warn!(error = %err, "IPC connection failed");
            }
        });
    }
}
