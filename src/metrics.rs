// Performance metrics module
//
// Lock-free counters for how updates flow through the channels and the store

use crate::models::Channel;
use crate::state::ApplyOutcome;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-channel update counters.
#[derive(Debug, Default)]
pub struct ChannelCounters {
    /// Payloads handed to the multiplexer
    pub received: AtomicU64,

    /// Assignments that inserted or replaced a slot
    pub applied: AtomicU64,

    /// Re-deliveries of content already present
    pub duplicates: AtomicU64,

    /// Assignments naming a slot outside the skeleton
    pub unknown_slots: AtomicU64,

    /// Results of a superseded run
    pub stale: AtomicU64,

    /// Frames or messages that could not be decoded
    pub malformed: AtomicU64,
}

impl ChannelCounters {
    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn applied(&self) -> u64 {
        Self::load(&self.applied)
    }

    pub fn dropped(&self) -> u64 {
        Self::load(&self.unknown_slots) + Self::load(&self.stale) + Self::load(&self.malformed)
    }
}

/// Application metrics
///
/// Atomic counters shared by the state manager, the multiplexer and the
/// connection manager. Logged on shutdown and periodically during long runs.
#[derive(Debug)]
pub struct Metrics {
    channels: [ChannelCounters; 4],

    /// Number of state mutations performed
    pub state_updates: AtomicU64,

    /// Number of state broadcasts sent
    pub state_broadcasts: AtomicU64,

    /// Number of state broadcasts nobody received
    pub state_broadcast_errors: AtomicU64,

    /// Batches reported by the batched bulk channel
    pub batches: AtomicU64,

    /// Sum of reported batch durations in milliseconds
    pub total_batch_time_ms: AtomicU64,

    /// Push channel connection attempts, successful or not
    pub connect_attempts: AtomicU64,

    /// Application start time
    start_time: Instant,
}

fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::Push => 0,
        Channel::Stream => 1,
        Channel::Bulk => 2,
        Channel::Direct => 3,
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            channels: Default::default(),
            state_updates: AtomicU64::new(0),
            state_broadcasts: AtomicU64::new(0),
            state_broadcast_errors: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            total_batch_time_ms: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn channel(&self, channel: Channel) -> &ChannelCounters {
        &self.channels[channel_index(channel)]
    }

    /// Record what the store did with one assignment.
    pub fn record_apply(&self, channel: Channel, outcome: ApplyOutcome) {
        let counters = self.channel(channel);
        let counter = match outcome {
            ApplyOutcome::Inserted | ApplyOutcome::Replaced => &counters.applied,
            ApplyOutcome::Unchanged => &counters.duplicates,
            ApplyOutcome::UnknownSlot => &counters.unknown_slots,
            ApplyOutcome::StaleRun => &counters.stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, channel: Channel) {
        self.channel(channel).received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, channel: Channel) {
        self.channel(channel).malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stale result that never reached the store.
    pub fn record_stale(&self, channel: Channel) {
        self.channel(channel).stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_update(&self) {
        self.state_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_broadcast(&self) {
        self.state_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_broadcast_error(&self) {
        self.state_broadcast_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_time(&self, duration: Duration) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.total_batch_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average reported batch time in milliseconds
    pub fn avg_batch_time_ms(&self) -> f64 {
        let total = self.total_batch_time_ms.load(Ordering::Relaxed);
        let count = self.batches.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        for channel in Channel::ALL {
            let c = self.channel(channel);
            tracing::info!(
                "{}: {} received, {} applied, {} duplicates, {} unknown slots, {} stale, {} malformed",
                channel,
                c.received.load(Ordering::Relaxed),
                c.applied(),
                c.duplicates.load(Ordering::Relaxed),
                c.unknown_slots.load(Ordering::Relaxed),
                c.stale.load(Ordering::Relaxed),
                c.malformed.load(Ordering::Relaxed)
            );
        }
        tracing::info!(
            "Batches: {} (avg: {:.0}ms)",
            self.batches.load(Ordering::Relaxed),
            self.avg_batch_time_ms()
        );
        tracing::info!(
            "State updates: {}, broadcasts: {}, unreceived: {}",
            self.state_updates.load(Ordering::Relaxed),
            self.state_broadcasts.load(Ordering::Relaxed),
            self.state_broadcast_errors.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Push connect attempts: {}",
            self.connect_attempts.load(Ordering::Relaxed)
        );
    }

    /// One-line summary for long-running operations
    pub fn log_periodic(&self) {
        let applied: u64 = Channel::ALL
            .iter()
            .map(|c| self.channel(*c).applied())
            .sum();
        let dropped: u64 = Channel::ALL
            .iter()
            .map(|c| self.channel(*c).dropped())
            .sum();
        tracing::info!(
            "Metrics: {} applied, {} dropped, {} state updates, uptime {:.0}s",
            applied,
            dropped,
            self.state_updates.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_channel() {
        let metrics = Metrics::new();

        metrics.record_apply(Channel::Push, ApplyOutcome::Inserted);
        metrics.record_apply(Channel::Push, ApplyOutcome::Replaced);
        metrics.record_apply(Channel::Push, ApplyOutcome::Unchanged);
        metrics.record_apply(Channel::Bulk, ApplyOutcome::UnknownSlot);
        metrics.record_malformed(Channel::Stream);

        assert_eq!(metrics.channel(Channel::Push).applied(), 2);
        assert_eq!(
            metrics.channel(Channel::Push).duplicates.load(Ordering::Relaxed),
            1
        );
        assert_eq!(metrics.channel(Channel::Bulk).dropped(), 1);
        assert_eq!(metrics.channel(Channel::Stream).dropped(), 1);
        assert_eq!(metrics.channel(Channel::Direct).applied(), 0);
    }

    #[test]
    fn test_batch_time_average() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_batch_time_ms(), 0.0);

        metrics.record_batch_time(Duration::from_millis(100));
        metrics.record_batch_time(Duration::from_millis(300));

        assert_eq!(metrics.avg_batch_time_ms(), 200.0);
    }

    #[test]
    fn test_state_counters() {
        let metrics = Metrics::new();

        metrics.record_state_update();
        metrics.record_state_broadcast();
        metrics.record_state_broadcast_error();
        metrics.record_connect_attempt();

        assert_eq!(metrics.state_updates.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.state_broadcasts.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.state_broadcast_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.connect_attempts.load(Ordering::Relaxed), 1);
    }
}
