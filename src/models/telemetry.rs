use super::assignment::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing report for one completed batch of a batched bulk run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTelemetry {
    #[serde(rename = "batch_number")]
    pub batch_index: u32,

    #[serde(rename = "total_batches")]
    pub batch_count: u32,

    /// Wall-clock seconds the batch took, as reported by the generator.
    #[serde(rename = "batch_time", with = "duration_secs")]
    pub batch_duration: Duration,

    pub cards_completed: u32,

    #[serde(rename = "total_cards")]
    pub cards_total: u32,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or_default())
    }
}

/// Batch telemetry accumulated over the current run. Reset when a run starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchProgress {
    pub latest: Option<BatchTelemetry>,
    pub batches_seen: u32,
    pub total_batch_time: Duration,
}

impl BatchProgress {
    pub fn record(&mut self, telemetry: BatchTelemetry) {
        self.batches_seen += 1;
        self.total_batch_time += telemetry.batch_duration;
        // Keep the furthest report; batches may be reported out of order.
        let newer = self
            .latest
            .as_ref()
            .is_none_or(|l| telemetry.cards_completed >= l.cards_completed);
        if newer {
            self.latest = Some(telemetry);
        }
    }

    pub fn average_batch_time(&self) -> Duration {
        if self.batches_seen == 0 {
            Duration::ZERO
        } else {
            self.total_batch_time / self.batches_seen
        }
    }
}

/// Lifecycle state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Observable health of the push channel, independent of the collection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    /// Automatic retry is suspended until a manual reconnect.
    pub awaiting_manual: bool,
}

impl ConnectionHealth {
    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A frame or message could not be decoded.
    MalformedPayload,
    /// An update named a slot outside the loaded skeleton.
    UnknownSlot,
    /// The generator reported a failure not tied to a slot.
    GenerationFailed,
    /// A channel failed at the transport level.
    TransportFailure,
}

/// A dropped unit of work, kept for inspection instead of being raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub channel: Channel,
    pub kind: DiagnosticKind,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(channel: Channel, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            channel,
            kind,
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(index: u32, completed: u32) -> BatchTelemetry {
        BatchTelemetry {
            batch_index: index,
            batch_count: 2,
            batch_duration: Duration::from_secs(4),
            cards_completed: completed,
            cards_total: 10,
        }
    }

    #[test]
    fn test_wire_names() {
        let telemetry: BatchTelemetry = serde_json::from_value(json!({
            "batch_number": 1,
            "total_batches": 6,
            "batch_time": 12.5,
            "cards_completed": 50,
            "total_cards": 271
        }))
        .unwrap();

        assert_eq!(telemetry.batch_index, 1);
        assert_eq!(telemetry.batch_duration, Duration::from_millis(12_500));
        assert_eq!(telemetry.cards_total, 271);
    }

    #[test]
    fn test_out_of_order_batches_keep_furthest() {
        let mut progress = BatchProgress::default();
        progress.record(batch(2, 10));
        progress.record(batch(1, 5));

        assert_eq!(progress.batches_seen, 2);
        assert_eq!(progress.latest.unwrap().cards_completed, 10);
        assert_eq!(progress.total_batch_time, Duration::from_secs(8));
    }

    #[test]
    fn test_average_batch_time_empty() {
        assert_eq!(BatchProgress::default().average_batch_time(), Duration::ZERO);
    }
}
