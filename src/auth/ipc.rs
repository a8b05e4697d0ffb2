//! Discord RPC over the local IPC socket.
//!
//! Frames are a little-endian `u32` opcode, a little-endian `u32` payload
//! length and a JSON payload.
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::AuthError;

/// Frames larger than this are treated as a protocol error.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Number of `discord-ipc-N` endpoints probed.
pub const IPC_ENDPOINTS: u32 = 10;

const RPC_VERSION: u32 = 1;

static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Handshake,
    Frame,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn code(self) -> u32 {
        match self {
            Opcode::Handshake => 0,
            Opcode::Frame => 1,
            Opcode::Close => 2,
            Opcode::Ping => 3,
            Opcode::Pong => 4,
        }
    }
}

impl TryFrom<u32> for Opcode {
    type Error = AuthError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(AuthError::Protocol(format!("unknown opcode {}", other))),
        }
    }
}

/// An incoming RPC message, only the fields the authorization flow reads.
#[derive(Debug, Default, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    evt: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

pub async fn write_frame<W>(writer: &mut W, opcode: Opcode, payload: &Value) -> Result<(), AuthError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(payload).map_err(|err| AuthError::Protocol(err.to_string()))?;
    let length = u32::try_from(body.len())
        .map_err(|_| AuthError::Protocol("frame too large".to_string()))?;

    let mut frame = Vec::with_capacity(8 + body.len());
    frame.extend_from_slice(&opcode.code().to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&body);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<(Opcode, Value), AuthError>
where
    R: AsyncRead + Unpin,
{
    let opcode = Opcode::try_from(reader.read_u32_le().await?)?;
    let length = reader.read_u32_le().await?;
    if length > MAX_FRAME_SIZE {
        return Err(AuthError::Protocol(format!("frame of {} bytes", length)));
    }

    let mut body = vec![0; length as usize];
    reader.read_exact(&mut body).await?;
    let payload = serde_json::from_slice(&body).map_err(|err| AuthError::Protocol(err.to_string()))?;
    Ok((opcode, payload))
}

/// A connected RPC session.
pub struct IpcClient<S> {
    stream: S,
    client_id: String,
}

impl<S> IpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, client_id: &str) -> Self {
        Self {
            stream,
            client_id: client_id.to_string(),
        }
    }

    /// Sends the handshake and waits for the `READY` event.
    pub async fn handshake(&mut self) -> Result<(), AuthError> {
        let payload = json!({ "v": RPC_VERSION, "client_id": self.client_id });
        write_frame(&mut self.stream, Opcode::Handshake, &payload).await?;

        loop {
            let message = self.next_message().await?;
            if message.evt.as_deref() == Some("READY") {
                debug!("Discord IPC ready");
                return Ok(());
            }
        }
    }

    /// Requests an OAuth authorization code for the `identify` scope.
    pub async fn authorize(&mut self) -> Result<String, AuthError> {
        let nonce = next_nonce();
        let payload = json!({
            "cmd": "AUTHORIZE",
            "args": {
                "client_id": self.client_id,
                "scopes": ["identify"],
                "prompt": "none",
            },
            "nonce": nonce,
        });
        write_frame(&mut self.stream, Opcode::Frame, &payload).await?;

        loop {
            let message = self.next_message().await?;
            if message.nonce.as_deref() != Some(nonce.as_str()) {
                continue;
            }

            if message.evt.as_deref() == Some("ERROR") {
                let reason = message.data["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(AuthError::Rejected(reason));
            }

            return message.data["code"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| AuthError::Protocol("authorization reply has no code".to_string()));
        }
    }

    /// Reads the next `FRAME` message, answering pings along the way.
    async fn next_message(&mut self) -> Result<RpcMessage, AuthError> {
        loop {
            let (opcode, payload) = read_frame(&mut self.stream).await?;
            match opcode {
                Opcode::Ping => write_frame(&mut self.stream, Opcode::Pong, &payload).await?,
                Opcode::Close => {
                    let message: RpcMessage = serde_json::from_value(payload).unwrap_or_default();
                    return Err(AuthError::Rejected(
                        message.message.unwrap_or_else(|| "connection closed".to_string()),
                    ));
                }
                Opcode::Frame => {
                    return serde_json::from_value(payload)
                        .map_err(|err| AuthError::Protocol(err.to_string()))
                }
                Opcode::Handshake | Opcode::Pong => continue,
            }
        }
    }
}

fn next_nonce() -> String {
    let count = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", std::process::id(), count)
}

/// Connects to the first Discord IPC socket that accepts.
#[cfg(unix)]
pub async fn connect() -> Result<tokio::net::UnixStream, AuthError> {
    let dirpath = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .find_map(|name| std::env::var_os(name))
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("/tmp"));

    for index in 0..IPC_ENDPOINTS {
        let socket_path = dirpath.join(format!("discord-ipc-{}", index));
        match tokio::net::UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                debug!("Connected to {:?}", socket_path);
                return Ok(stream);
            }
            Err(err) => debug!("Failed to connect to {:?}, {}", socket_path, err),
        }
    }

    Err(AuthError::NotRunning)
}

/// Connects to the first Discord IPC pipe that accepts.
#[cfg(windows)]
pub async fn connect() -> Result<tokio::net::windows::named_pipe::NamedPipeClient, AuthError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    for index in 0..IPC_ENDPOINTS {
        let pipe_name = format!(r"\\.\pipe\discord-ipc-{}", index);
        match ClientOptions::new().open(&pipe_name) {
            Ok(pipe) => {
                debug!("Connected to {}", pipe_name);
                return Ok(pipe);
            }
            Err(err) => debug!("Failed to connect to {}, {}", pipe_name, err),
        }
    }

    Err(AuthError::NotRunning)
}
