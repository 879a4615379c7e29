//! WebSocket client for the input relay
//!
//! Keeps a connection to the relay open for the lifetime of the
//! daemon. Any disconnect or failed attempt is followed by a fixed
//! delay and a fresh attempt, with no retry limit.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::protocol::RelayMessage;
use crate::state::EngineHandle;

/// Errors that end a relay session
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay connection failed: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("overlay engine stopped")]
    EngineClosed,
}

/// Forwards relay events to the engine
pub struct RelayClient {
    url: String,
    reconnect_delay: Duration,
    engine: EngineHandle,
}

impl RelayClient {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration, engine: EngineHandle) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            engine,
        }
    }

    /// Connect, relay events and reconnect until the engine goes away
    pub async fn run(self) {
        loop {
            match self.session().await {
                Ok(()) => {
                    info!(url = %self.url, "relay disconnected, retrying");
                }
                Err(RelayError::EngineClosed) => {
                    debug!("engine closed, stopping relay client");
                    return;
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "relay unavailable, retrying");
                }
            }

            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// One connection lifetime; `Ok` means the relay closed cleanly
    async fn session(&self) -> Result<(), RelayError> {
        let (mut socket, _response) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "relay connected");

        while let Some(next) = socket.next().await {
            let text = match next {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => return Err(e.into()),
            };
            self.dispatch(&text).await?;
        }

        Ok(())
    }

    async fn dispatch(&self, text: &str) -> Result<(), RelayError> {
        let message = match RelayMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, payload = text, "bad relay message");
                return Ok(());
            }
        };

        match message.into_input() {
            Some(input) => self
                .engine
                .input(input)
                .await
                .map_err(|_| RelayError::EngineClosed),
            None => {
                debug!(payload = text, "relay message ignored");
                Ok(())
            }
        }
    }
}
