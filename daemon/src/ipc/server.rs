//! Unix domain socket server for IPC
//!
//! Provides request-response communication and pushes engine events to
//! subscribed clients. Each client gets a reader task feeding requests to
//! its handler, so a notification can be written while a read is pending.
//! A subscribed client also gets a forwarder task that drains the engine's
//! broadcast into an unbounded per-client queue, so a slow socket never
//! makes the client lag behind and lose events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineHandle, EngineStatus};
use crate::events::HotkeyEvent;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted request body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State every client handler reads
struct Shared {
    engine: EngineHandle,
    status: watch::Receiver<EngineStatus>,
    events: broadcast::Sender<HotkeyEvent>,
    start_time: Instant,
}

/// A parsed request, or the reason a frame could not be parsed
type Frame = std::result::Result<Request, String>;

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        engine: EngineHandle,
        status: watch::Receiver<EngineStatus>,
        events: broadcast::Sender<HotkeyEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only access
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared: Arc::new(Shared {
                engine,
                status,
                events,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(16);
    let reader_task = tokio::spawn(read_frames(reader, frame_tx));

    let mut notifications: Option<Subscription> = None;

    let result = loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    debug!("client disconnected");
                    break Ok(());
                };
                let response = match frame {
                    Ok(request) => {
                        debug!(?request, "received request");
                        if request == Request::Subscribe && notifications.is_none() {
                            notifications = Some(Subscription::new(shared.events.subscribe()));
                            debug!("client subscribed to notifications");
                        }
                        shared.process_request(request)
                    }
                    Err(message) => Response::Error {
                        code: "invalid_request".into(),
                        message,
                    },
                };
                if let Err(e) = send_message(&mut writer, &response).await {
                    break Err(e);
                }
            }

            event = next_event(&mut notifications) => {
                match event {
                    Some(event) => {
                        if let Err(e) = send_message(&mut writer, &Notification::Event { event }).await {
                            break Err(e);
                        }
                    }
                    None => notifications = None,
                }
            }
        }
    };

    reader_task.abort();
    result
}

/// Read length-prefixed requests until EOF
async fn read_frames(mut reader: OwnedReadHalf, frames: mpsc::Sender<Frame>) -> Result<()> {
    let mut len_buf = [0u8; 4];

    loop {
        // Read message length (4-byte little-endian)
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            warn!(len, "message too large, disconnecting");
            return Ok(());
        }

        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf).await?;

        let frame = serde_json::from_slice(&msg_buf).map_err(|e| e.to_string());
        if frames.send(frame).await.is_err() {
            return Ok(());
        }
    }
}

/// Engine events queued for one client
struct Subscription {
    events: mpsc::UnboundedReceiver<HotkeyEvent>,
    forwarder: JoinHandle<()>,
}

impl Subscription {
    fn new(mut source: broadcast::Receiver<HotkeyEvent>) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { events, forwarder }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<HotkeyEvent> {
    match subscription {
        Some(subscription) => subscription.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Send a length-prefixed JSON message
async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

impl Shared {
    /// Answer a query or forward a command to the engine
    fn process_request(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let uptime = self.start_time.elapsed().as_secs();
                Response::Status(DaemonStatus::new(&self.status.borrow(), uptime))
            }

            Request::Subscribe => Response::Subscribed,

            command => match command.into_command() {
                Some(command) => match self.engine.send(command) {
                    Ok(()) => Response::Accepted,
                    Err(e) => Response::Error {
                        code: "engine_stopped".into(),
                        message: e.to_string(),
                    },
                },
                None => Response::Error {
                    code: "unsupported".into(),
                    message: "request carries no command".into(),
                },
            },
        }
    }
}
