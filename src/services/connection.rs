//! Push channel lifecycle.
//!
//! [`ConnectionManager`] owns one [`PushTransport`] and keeps it connected:
//! `disconnected → connecting → connected`, retrying failed connects with a
//! capped exponential backoff up to a fixed number of attempts. A close
//! initiated by the server is not retried; the manager reports it and waits
//! for [`ConnectionHandle::reconnect`]. Health is published on a `watch`
//! channel and never touches the collection.
//!
//! Messages received while connected are decoded and forwarded to the
//! multiplexer, so the push channel never writes to the store itself.

use super::multiplexer::{Inbound, MultiplexerHandle};
use super::normalizer::PushMessage;
use crate::metrics::Metrics;
use crate::models::{Channel, ConnectionHealth, ConnectionState, ReconnectSettings};
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Health message shown after the server closed the session.
pub const SERVER_CLOSED_MESSAGE: &str = "Server disconnected the connection";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{0}")]
    Connect(String),

    #[error("invalid push endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// Why an established session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server closed the session on purpose.
    Server,
    /// The network or protocol failed.
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Message(String),
    Closed(CloseReason),
}

/// An established push session. Ending without [`SessionEvent::Closed`] counts
/// as a transport failure.
pub type PushSession = BoxStream<'static, SessionEvent>;

/// Opens push sessions.
#[cfg_attr(test, mockall::automock)]
pub trait PushTransport {
    fn connect(&self) -> BoxFuture<'static, Result<PushSession, TransportError>>;
}

/// Bounded reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): the floor doubled per
    /// earlier attempt, capped at the ceiling.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.floor.saturating_mul(factor).min(self.ceiling)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            floor: Duration::from_millis(settings.floor_ms),
            ceiling: Duration::from_millis(settings.ceiling_ms),
            max_attempts: settings.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reconnect,
    Shutdown,
}

/// How a wait ended.
enum Next {
    /// Retry on schedule.
    Retry,
    /// Retry now with a fresh attempt budget.
    Manual,
    Shutdown,
}

/// Drives one push transport. Run it with [`ConnectionManager::spawn`].
pub struct ConnectionManager<T> {
    transport: T,
    policy: ReconnectPolicy,
    sink: MultiplexerHandle,
    metrics: Arc<Metrics>,
    health: watch::Sender<ConnectionHealth>,
    commands: mpsc::Receiver<Command>,
}

impl<T> ConnectionManager<T>
where
    T: PushTransport + Send + Sync + 'static,
{
    /// Start connecting in the background.
    pub fn spawn(
        transport: T,
        policy: ReconnectPolicy,
        sink: MultiplexerHandle,
        metrics: Arc<Metrics>,
    ) -> ConnectionHandle {
        let (health, health_rx) = watch::channel(ConnectionHealth::default());
        let (commands_tx, commands) = mpsc::channel(8);

        let manager = Self {
            transport,
            policy,
            sink,
            metrics,
            health,
            commands,
        };
        let task = tokio::spawn(manager.run());

        ConnectionHandle {
            commands: commands_tx,
            health: health_rx,
            task: Some(task),
        }
    }

    fn publish(&self, f: impl FnOnce(&mut ConnectionHealth)) {
        self.health.send_modify(f);
    }

    async fn run(mut self) {
        let mut attempts: u32 = 0;

        loop {
            self.publish(|h| h.state = ConnectionState::Connecting);
            self.metrics.record_connect_attempt();
            tracing::debug!(attempt = attempts + 1, "Connecting push channel");

            let connected = tokio::select! {
                result = self.transport.connect() => result,
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => {
                        attempts = 0;
                        self.publish(|h| {
                            h.last_error = None;
                            h.reconnect_attempts = 0;
                        });
                        continue;
                    }
                    Some(Command::Shutdown) | None => break,
                },
            };

            let next = match connected {
                Ok(session) => {
                    attempts = 0;
                    self.publish(|h| {
                        h.state = ConnectionState::Connected;
                        h.last_error = None;
                        h.reconnect_attempts = 0;
                        h.awaiting_manual = false;
                    });
                    tracing::info!("Push channel connected");
                    self.pump(session).await
                }
                Err(error) => {
                    attempts += 1;
                    let message = error.to_string();
                    tracing::warn!(attempt = attempts, "Push channel connect failed: {}", message);

                    if self.policy.exhausted(attempts) {
                        let message = format!(
                            "Failed to connect after {} attempts: {}",
                            self.policy.max_attempts, message
                        );
                        tracing::error!("{}", message);
                        self.publish(|h| {
                            h.state = ConnectionState::Disconnected;
                            h.last_error = Some(message);
                            h.reconnect_attempts = attempts;
                            h.awaiting_manual = true;
                        });
                        self.await_manual().await
                    } else {
                        self.publish(|h| {
                            h.state = ConnectionState::Disconnected;
                            h.last_error = Some(message);
                            h.reconnect_attempts = attempts;
                        });
                        self.backoff(self.policy.delay(attempts)).await
                    }
                }
            };

            match next {
                Next::Retry => {}
                Next::Manual => {
                    attempts = 0;
                    self.publish(|h| {
                        h.last_error = None;
                        h.reconnect_attempts = 0;
                        h.awaiting_manual = false;
                    });
                }
                Next::Shutdown => break,
            }
        }

        self.publish(|h| h.state = ConnectionState::Disconnected);
        tracing::info!("Push channel shut down");
    }

    /// Forward messages until the session ends.
    async fn pump(&mut self, mut session: PushSession) -> Next {
        let reason = loop {
            tokio::select! {
                event = session.next() => match event {
                    Some(SessionEvent::Message(text)) => {
                        if forward(&self.sink, &text).await.is_err() {
                            tracing::debug!("Multiplexer gone; closing push channel");
                            return Next::Shutdown;
                        }
                    }
                    Some(SessionEvent::Closed(reason)) => break reason,
                    None => break CloseReason::Transport("connection closed".to_string()),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => tracing::debug!("Push channel already connected"),
                    Some(Command::Shutdown) | None => return Next::Shutdown,
                },
            }
        };

        match reason {
            CloseReason::Server => {
                tracing::warn!("{}", SERVER_CLOSED_MESSAGE);
                self.publish(|h| {
                    h.state = ConnectionState::Disconnected;
                    h.last_error = Some(SERVER_CLOSED_MESSAGE.to_string());
                    h.awaiting_manual = true;
                });
                self.await_manual().await
            }
            CloseReason::Transport(error) => {
                tracing::warn!("Push channel lost: {}", error);
                self.publish(|h| {
                    h.state = ConnectionState::Disconnected;
                    h.last_error = Some(error);
                });
                self.backoff(self.policy.delay(1)).await
            }
        }
    }

    /// Sleep before the next attempt; a manual reconnect cuts it short.
    async fn backoff(&mut self, delay: Duration) -> Next {
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => Next::Retry,
            command = self.commands.recv() => match command {
                Some(Command::Reconnect) => Next::Manual,
                Some(Command::Shutdown) | None => Next::Shutdown,
            },
        }
    }

    async fn await_manual(&mut self) -> Next {
        match self.commands.recv().await {
            Some(Command::Reconnect) => {
                tracing::info!("Manual reconnect requested");
                Next::Manual
            }
            Some(Command::Shutdown) | None => Next::Shutdown,
        }
    }
}

async fn forward(
    sink: &MultiplexerHandle,
    text: &str,
) -> Result<(), super::multiplexer::MultiplexerClosed> {
    let inbound = match PushMessage::parse(text) {
        Ok(message) => Inbound::Push(message),
        Err(error) => Inbound::Malformed {
            channel: Channel::Push,
            error: error.to_string(),
        },
    };
    sink.send(inbound).await
}

/// Owner's side of a running [`ConnectionManager`].
///
/// Dropping the handle stops the manager; [`shutdown`](Self::shutdown) also
/// waits for it to finish.
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    health: watch::Receiver<ConnectionHealth>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn health(&self) -> ConnectionHealth {
        self.health.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<ConnectionHealth> {
        self.health.clone()
    }

    /// Reset the attempt counter and error, then connect immediately.
    /// Ignored while connected.
    pub async fn reconnect(&self) -> bool {
        self.commands.send(Command::Reconnect).await.is_ok()
    }

    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Push channel task failed: {}", e);
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
