// Channel multiplexer
//
// Single writer for the collection. Producers (push session, stream reader,
// bulk request, single-item request) never touch the store; they send
// `Inbound` messages over one mpsc queue and the multiplexer applies them in
// receipt order. Frames of one stream are sent by one task, so their relative
// order is preserved.

use super::normalizer::{normalize, Payload, PushMessage, StreamFrame};
use crate::models::{Channel, Diagnostic, DiagnosticKind, RunId, SlotAssignment};
use crate::state::{ApplyOutcome, StateManager};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Queued messages before producers start waiting.
pub const INBOUND_CAPACITY: usize = 256;

/// Something a producer delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A decoded push channel message. Dropped while a streaming run is current.
    Push(PushMessage),

    /// One decoded frame of the streaming response for `run`.
    Frame { run: RunId, frame: StreamFrame },

    /// A unit that could not be decoded.
    Malformed { channel: Channel, error: String },

    /// The streaming response for `run` ended, with an error if it failed.
    StreamEnded { run: RunId, error: Option<String> },

    /// Terminal response of a bulk request for `run`.
    Bulk { run: RunId, response: Value },

    /// A request failed at the transport level.
    Failed {
        channel: Channel,
        run: Option<RunId>,
        error: String,
    },

    /// Result of a single-item request. Never stale.
    Direct(SlotAssignment),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("multiplexer has shut down")]
pub struct MultiplexerClosed;

/// Sending side shared by all producers.
#[derive(Clone, Debug)]
pub struct MultiplexerHandle {
    tx: mpsc::Sender<Inbound>,
}

impl MultiplexerHandle {
    pub async fn send(&self, inbound: Inbound) -> Result<(), MultiplexerClosed> {
        self.tx.send(inbound).await.map_err(|_| MultiplexerClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Applies every inbound unit to the [`StateManager`].
pub struct Multiplexer {
    state: StateManager,
    highlight: Duration,
}

impl Multiplexer {
    pub fn new(state: StateManager, highlight: Duration) -> Self {
        Self { state, highlight }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Start the actor. It stops once every handle has been dropped and the
    /// queue is drained.
    pub fn spawn(self) -> (MultiplexerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (MultiplexerHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::Receiver<Inbound>) {
        tracing::debug!("Multiplexer started");
        let mut highlight_tick = tokio::time::interval(self.highlight.max(Duration::from_millis(50)));
        highlight_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                inbound = rx.recv() => match inbound {
                    Some(inbound) => self.dispatch(inbound),
                    None => break,
                },
                _ = highlight_tick.tick() => {
                    let expired = self.state.expire_highlights(self.highlight);
                    if expired > 0 {
                        tracing::trace!(expired, "Cleared arrival highlights");
                    }
                }
            }
        }
        tracing::debug!("Multiplexer stopped");
    }

    /// Process one inbound unit. Never fails: problems become diagnostics.
    pub fn dispatch(&self, inbound: Inbound) {
        match inbound {
            Inbound::Push(message) => self.on_push(message),
            Inbound::Frame { run, frame } => self.on_frame(run, frame),
            Inbound::Malformed { channel, error } => {
                self.state.metrics().record_received(channel);
                self.state.metrics().record_malformed(channel);
                self.diagnose(channel, DiagnosticKind::MalformedPayload, error);
            }
            Inbound::StreamEnded { run, error } => self.on_stream_ended(run, error),
            Inbound::Bulk { run, response } => self.on_bulk(run, response),
            Inbound::Failed {
                channel,
                run,
                error,
            } => self.on_failed(channel, run, error),
            Inbound::Direct(assignment) => {
                self.state.metrics().record_received(Channel::Direct);
                self.apply(&assignment, Channel::Direct, None);
            }
        }
    }

    fn diagnose(&self, channel: Channel, kind: DiagnosticKind, message: impl Into<String>) {
        self.state
            .record_diagnostic(Diagnostic::new(channel, kind, message));
    }

    fn apply(&self, assignment: &SlotAssignment, channel: Channel, run: Option<RunId>) {
        let outcome = self.state.apply(assignment, channel, run);
        match outcome {
            ApplyOutcome::Inserted | ApplyOutcome::Replaced => {
                tracing::debug!(slot_id = %assignment.slot_id, %channel, ?outcome, "Applied item");
            }
            ApplyOutcome::Unchanged => {
                tracing::trace!(slot_id = %assignment.slot_id, %channel, "Duplicate delivery");
            }
            ApplyOutcome::UnknownSlot => self.diagnose(
                channel,
                DiagnosticKind::UnknownSlot,
                format!("slot {} is not in the loaded skeleton", assignment.slot_id),
            ),
            ApplyOutcome::StaleRun => {}
        }
    }

    fn apply_payload(&self, payload: &Payload, run: Option<RunId>) {
        let channel = payload.channel();
        for result in normalize(payload) {
            match result {
                Ok(assignment) => self.apply(&assignment, channel, run),
                Err(error) => {
                    self.state.metrics().record_malformed(channel);
                    self.diagnose(channel, error.diagnostic_kind(), error.to_string());
                }
            }
        }
    }

    fn is_stale(&self, run: RunId, channel: Channel) -> bool {
        let stale = self.state.current_run() != run;
        if stale {
            self.state.metrics().record_stale(channel);
            tracing::debug!(%run, %channel, "Ignoring unit from superseded run");
        }
        stale
    }

    fn push_is_stale(&self) -> bool {
        let stale = !self.state.read(|s| s.accepts_push());
        if stale {
            self.state.metrics().record_stale(Channel::Push);
            tracing::debug!("Ignoring push result left over from a superseded batched run");
        }
        stale
    }

    fn on_push(&self, message: PushMessage) {
        self.state.metrics().record_received(Channel::Push);
        match message {
            PushMessage::ItemAssigned(notification) => {
                if !self.push_is_stale() {
                    self.apply_payload(&Payload::Push(notification), None);
                }
            }
            PushMessage::BatchCompleted(telemetry) => {
                if !self.push_is_stale() {
                    self.state.record_batch(telemetry, None);
                }
            }
            PushMessage::ConnectionConfirmed => {
                tracing::info!("Push channel confirmed by server");
            }
            PushMessage::Other(event) => {
                tracing::debug!(event, "Ignoring unhandled push event");
            }
        }
    }

    fn on_frame(&self, run: RunId, frame: StreamFrame) {
        self.state.metrics().record_received(Channel::Stream);
        if self.is_stale(run, Channel::Stream) {
            return;
        }

        match &frame {
            StreamFrame::Status { message, .. } => {
                tracing::info!(%run, "Generator status: {}", message);
            }
            StreamFrame::Skeleton { .. } => {
                tracing::debug!(%run, "Generator announced its skeleton");
            }
            StreamFrame::Complete { message } => {
                tracing::info!(%run, message = message.as_deref().unwrap_or(""), "Stream complete");
                self.state.finish_run(run);
                return;
            }
            StreamFrame::Item(_) | StreamFrame::Error(_) => {}
        }

        self.apply_payload(&Payload::Frame(frame), Some(run));
    }

    fn on_stream_ended(&self, run: RunId, error: Option<String>) {
        if self.state.current_run() != run {
            return;
        }
        if let Some(error) = error {
            self.diagnose(Channel::Stream, DiagnosticKind::TransportFailure, error);
        }
        // A stream that ends without `complete` still ends the run.
        self.state.finish_run(run);
    }

    fn on_bulk(&self, run: RunId, response: Value) {
        self.state.metrics().record_received(Channel::Bulk);
        if self.is_stale(run, Channel::Bulk) {
            return;
        }
        self.apply_payload(&Payload::Bulk(response), Some(run));
        self.state.finish_run(run);
    }

    fn on_failed(&self, channel: Channel, run: Option<RunId>, error: String) {
        if let Some(run) = run {
            if self.is_stale(run, channel) {
                return;
            }
        }
        self.diagnose(channel, DiagnosticKind::TransportFailure, error);
        if let Some(run) = run {
            self.state.finish_run(run);
        }
    }
}
