//! # Discord Local RPC Channel
//!
//! [`ActivityChannel`] over the Discord client's local IPC socket.
//!
//! ## Wire format:
//! Every packet is `u32 LE opcode | u32 LE length | JSON body`.
//! - `HANDSHAKE {v:1, client_id}` is answered by a `DISPATCH` frame with
//!   `evt: "READY"` (or a `CLOSE` carrying the reason).
//! - Commands are `FRAME {cmd, args, nonce}`; the reply echoes the nonce and
//!   carries `evt: "ERROR"` when the client rejected it.
//! - `PING` must be answered with a `PONG` carrying the same body.
//!
//! ## Endpoint discovery:
//! - **Unix**: `discord-ipc-{0..9}` under `XDG_RUNTIME_DIR`, `TMPDIR`, `TMP`,
//!   `TEMP` or `/tmp` (plus the Flatpak and Snap sub-folders).
//! - **Windows**: the named pipes `\\?\pipe\discord-ipc-{0..9}`.

use std::path::PathBuf;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::notifier::{ActivityChannel, ActivityError, ChannelFactory};

/// Large image asset registered for the application.
pub const LARGE_IMAGE_KEY: &str = "heart";
pub const LARGE_IMAGE_TEXT: &str = "Pulsoid";

const IPC_VERSION: u32 = 1;
const MAX_PACKET_LEN: usize = 64 * 1024;
const SOCKET_SLOTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl TryFrom<u32> for Opcode {
    type Error = ActivityError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(ActivityError::Protocol(format!("unknown opcode {}", other))),
        }
    }
}

pub(crate) async fn write_packet<W>(writer: &mut W, op: Opcode, body: &Value) -> Result<(), ActivityError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload = serde_json::to_vec(body)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| ActivityError::Protocol("packet too large".into()))?;

    let mut packet = Vec::with_capacity(8 + payload.len());
    packet.extend_from_slice(&(op as u32).to_le_bytes());
    packet.extend_from_slice(&len.to_le_bytes());
    packet.extend_from_slice(&payload);

    writer.write_all(&packet).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn read_packet<R>(reader: &mut R) -> Result<(Opcode, Value), ActivityError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 8];
    reader.read_exact(&mut header).await?;

    let op = Opcode::try_from(u32::from_le_bytes([header[0], header[1], header[2], header[3]]))?;
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_PACKET_LEN {
        return Err(ActivityError::Protocol(format!("packet of {} bytes", len)));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok((op, serde_json::from_slice(&payload)?))
}

trait IpcIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IpcIo for T {}

/// # Discord IPC Client
///
/// One connection to the local Discord client. `open` dials the first
/// reachable endpoint (unless built with [`DiscordIpc::with_stream`]) and
/// waits for `READY`.
pub struct DiscordIpc {
    targets: Vec<PathBuf>,
    stream: Option<Box<dyn IpcIo>>,
    in_flight: bool,
    pid: u32,
}

impl DiscordIpc {
    pub fn new(targets: Vec<PathBuf>) -> Self {
        Self {
            targets,
            stream: None,
            in_flight: false,
            pid: std::process::id(),
        }
    }

    /// Uses an already connected stream instead of dialing.
    pub fn with_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            targets: Vec::new(),
            stream: Some(Box::new(stream)),
            in_flight: false,
            pid: std::process::id(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn handshake(&mut self, client_id: &str) -> Result<(), ActivityError> {
        let stream = self.stream.as_mut().ok_or(ActivityError::NotOpen)?;
        write_packet(stream, Opcode::Handshake, &json!({ "v": IPC_VERSION, "client_id": client_id })).await?;

        loop {
            let (op, body) = read_packet(stream).await?;
            match op {
                Opcode::Frame if body["evt"] == "READY" => {
                    if let Some(user) = body["data"]["user"]["username"].as_str() {
                        log::info!("Discord RPC ready for user {}", user);
                    }
                    return Ok(());
                }
                Opcode::Ping => write_packet(stream, Opcode::Pong, &body).await?,
                Opcode::Close => return Err(ActivityError::Rejected(close_reason(&body))),
                _ => log::debug!("Ignoring Discord IPC packet {:?} during handshake", op),
            }
        }
    }

    /// Sends one command and waits for the reply carrying its nonce.
    ///
    /// A command that was abandoned mid-exchange (its future dropped by a
    /// timeout) leaves the framing unknown, so the stream is discarded and the
    /// call reports `NotOpen`. Transport and framing errors drop it the same way.
    async fn command(&mut self, cmd: &str, args: Value) -> Result<Value, ActivityError> {
        if std::mem::take(&mut self.in_flight) {
            log::warn!("Discord IPC stream abandoned mid-command; dropping it.");
            self.stream = None;
        }
        let stream = self.stream.as_mut().ok_or(ActivityError::NotOpen)?;

        self.in_flight = true;
        let outcome = exchange(stream, cmd, args).await;
        self.in_flight = false;

        match outcome {
            Ok(Reply::Done(body)) => Ok(body),
            Ok(Reply::Error(message)) => Err(ActivityError::Rejected(message)),
            Ok(Reply::Closed(reason)) => {
                self.stream = None;
                Err(ActivityError::Rejected(reason))
            }
            Err(e) => {
                self.stream = None;
                Err(e)
            }
        }
    }
}

enum Reply {
    Done(Value),
    Error(String),
    Closed(String),
}

async fn exchange(stream: &mut Box<dyn IpcIo>, cmd: &str, args: Value) -> Result<Reply, ActivityError> {
    let nonce = Uuid::new_v4().to_string();
    write_packet(stream, Opcode::Frame, &json!({ "cmd": cmd, "args": args, "nonce": nonce })).await?;

    loop {
        let (op, body) = read_packet(stream).await?;
        match op {
            Opcode::Frame if body["nonce"] == nonce.as_str() => {
                if body["evt"] == "ERROR" {
                    let message = body["data"]["message"].as_str().unwrap_or("unknown error");
                    return Ok(Reply::Error(message.to_string()));
                }
                return Ok(Reply::Done(body));
            }
            Opcode::Ping => write_packet(stream, Opcode::Pong, &body).await?,
            Opcode::Close => return Ok(Reply::Closed(close_reason(&body))),
            _ => log::debug!("Ignoring Discord IPC packet {:?}", op),
        }
    }
}

impl ActivityChannel for DiscordIpc {
    fn open<'a>(&'a mut self, client_id: &'a str) -> BoxFuture<'a, Result<(), ActivityError>> {
        Box::pin(async move {
            if self.stream.is_none() {
                self.stream = Some(dial(&self.targets).await?);
            }
            self.handshake(client_id).await
        })
    }

    fn set_state<'a>(
        &'a mut self,
        details: &'a str,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), ActivityError>> {
        Box::pin(async move {
            let args = json!({
                "pid": self.pid,
                "activity": {
                    "details": details,
                    "state": state,
                    "assets": {
                        "large_image": LARGE_IMAGE_KEY,
                        "large_text": LARGE_IMAGE_TEXT,
                    },
                    "instance": false,
                },
            });
            self.command("SET_ACTIVITY", args).await.map(|_| ())
        })
    }

    fn clear(&mut self) -> BoxFuture<'_, Result<(), ActivityError>> {
        Box::pin(async move {
            let args = json!({ "pid": self.pid });
            self.command("SET_ACTIVITY", args).await.map(|_| ())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), ActivityError>> {
        Box::pin(async move {
            if std::mem::take(&mut self.in_flight) {
                self.stream = None;
            }
            let Some(mut stream) = self.stream.take() else {
                return Ok(());
            };
            write_packet(&mut stream, Opcode::Close, &json!({})).await?;
            stream.shutdown().await?;
            Ok(())
        })
    }
}

async fn dial(targets: &[PathBuf]) -> Result<Box<dyn IpcIo>, ActivityError> {
    let mut last_error = None;
    for target in targets {
        match dial_target(target).await {
            Ok(stream) => {
                log::debug!("Connected to Discord IPC at {}", target.display());
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => ActivityError::Io(e),
        None => ActivityError::Unavailable("no Discord IPC endpoint".into()),
    })
}

fn close_reason(body: &Value) -> String {
    let code = body["code"].as_i64().unwrap_or_default();
    let message = body["message"].as_str().unwrap_or("closed by Discord");
    format!("{} ({})", message, code)
}

#[cfg(unix)]
async fn dial_target(target: &std::path::Path) -> std::io::Result<Box<dyn IpcIo>> {
    let stream = tokio::net::UnixStream::connect(target).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
async fn dial_target(target: &std::path::Path) -> std::io::Result<Box<dyn IpcIo>> {
    let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(target)?;
    Ok(Box::new(pipe))
}

#[cfg(not(any(unix, windows)))]
async fn dial_target(_target: &std::path::Path) -> std::io::Result<Box<dyn IpcIo>> {
    Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "no Discord IPC transport"))
}

/// Candidate IPC endpoints in lookup order.
#[cfg(unix)]
pub fn ipc_targets() -> Vec<PathBuf> {
    let mut bases: Vec<PathBuf> = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .map(PathBuf::from)
        .collect();
    bases.push(PathBuf::from("/tmp"));

    let mut targets = Vec::new();
    for base in bases {
        for dir in [
            base.clone(),
            base.join("app/com.discordapp.Discord"),
            base.join("snap.discord"),
        ] {
            for slot in 0..SOCKET_SLOTS {
                let path = dir.join(format!("discord-ipc-{}", slot));
                if !targets.contains(&path) {
                    targets.push(path);
                }
            }
        }
    }
    targets
}

#[cfg(windows)]
pub fn ipc_targets() -> Vec<PathBuf> {
    (0..SOCKET_SLOTS)
        .map(|slot| PathBuf::from(format!(r"\\?\pipe\discord-ipc-{}", slot)))
        .collect()
}

#[cfg(not(any(unix, windows)))]
pub fn ipc_targets() -> Vec<PathBuf> {
    Vec::new()
}

/// # Discord IPC Factory
///
/// Hands out [`DiscordIpc`] channels. On Unix only sockets that exist are
/// kept; with none left the channel is reported unavailable.
#[derive(Debug, Clone, Default)]
pub struct DiscordIpcFactory;

impl ChannelFactory for DiscordIpcFactory {
    type Channel = DiscordIpc;

    fn create(&self) -> Result<DiscordIpc, ActivityError> {
        let targets: Vec<PathBuf> = ipc_targets()
            .into_iter()
            .filter(|path| cfg!(windows) || path.exists())
            .collect();

        if targets.is_empty() {
            return Err(ActivityError::Unavailable("Discord IPC endpoint not found".into()));
        }
        Ok(DiscordIpc::new(targets))
    }
}
