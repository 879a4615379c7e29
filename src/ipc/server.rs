//! Unix domain socket server for IPC
//!
//! Provides request-response access to the engine's test hooks and
//! pushes overlay events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::OverlayEvent;
use crate::state::EngineHandle;

use super::protocol::{OverlayStatus, Request, Response};

const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ClientContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared by every client handler
struct ClientContext {
    engine: EngineHandle,
    events: broadcast::Sender<OverlayEvent>,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        engine: EngineHandle,
        events: broadcast::Sender<OverlayEvent>,
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

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let context = Arc::new(ClientContext {
            engine,
            events,
            start_time: Instant::now(),
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context,
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
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
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

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: Arc<ClientContext>) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let mut forwarder: Option<JoinHandle<()>> = None;

        let result = Self::serve_requests(reader, &writer, &context, &mut forwarder).await;

        if let Some(task) = forwarder {
            task.abort();
        }
        result
    }

    async fn serve_requests(
        mut reader: OwnedReadHalf,
        writer: &Arc<Mutex<OwnedWriteHalf>>,
        context: &ClientContext,
        forwarder: &mut Option<JoinHandle<()>>,
    ) -> Result<()> {
        loop {
            let Some(request) = read_message::<_, Request>(&mut reader).await? else {
                debug!("client disconnected");
                return Ok(());
            };
            debug!(?request, "received request");

            // Subscribe before confirming so no event slips between the two
            let events = match request {
                Request::Subscribe if forwarder.is_none() => Some(context.events.subscribe()),
                _ => None,
            };

            let response = Self::process_request(request, context).await;
            write_message(&mut *writer.lock().await, &response).await?;

            if let Some(events) = events {
                debug!("client subscribed to notifications");
                *forwarder = Some(Self::forward_events(events, Arc::clone(writer)));
            }
        }
    }

    /// Push overlay events to a subscribed client until it goes away
    fn forward_events<W>(
        mut events: broadcast::Receiver<OverlayEvent>,
        writer: Arc<Mutex<W>>,
    ) -> JoinHandle<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let push = Response::Event { event };
                if let Err(e) = write_message(&mut *writer.lock().await, &push).await {
                    debug!(?e, "subscriber write failed");
                    break;
                }
            }
        })
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &ClientContext) -> Response {
        let engine = &context.engine;
        let delivered = match request {
            Request::Ping => return Response::Pong,
            Request::Subscribe => return Response::Subscribed,

            Request::GetStatus => {
                return match engine.snapshot().await {
                    Ok(snapshot) => Response::Status(OverlayStatus {
                        version: env!("CARGO_PKG_VERSION").to_string(),
                        uptime_secs: context.start_time.elapsed().as_secs(),
                        snapshot,
                    }),
                    Err(e) => engine_error(e),
                };
            }

            Request::TriggerKey { code } => engine.trigger_key(&code).await,
            Request::ReleaseKey { code } => engine.release_key(&code).await,
            Request::TriggerMouse { button } => engine.trigger_mouse(button).await,
            Request::ReleaseMouse { button } => engine.release_mouse(button).await,
            Request::SetVoiceState { state } => engine.set_voice_state(state).await,
            Request::SetLevel { level } => engine.set_level(level).await,
        };

        match delivered {
            Ok(()) => Response::Accepted,
            Err(e) => engine_error(e),
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

fn engine_error(e: impl std::fmt::Display) -> Response {
    Response::Error {
        code: "engine_closed".to_string(),
        message: e.to_string(),
    }
}

/// Read one length-prefixed JSON message; `None` on a clean disconnect
async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("message too large ({} bytes)", len);
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;

    let message = serde_json::from_slice(&msg_buf).context("failed to parse message")?;
    Ok(Some(message))
}

/// Send a length-prefixed JSON message
async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
