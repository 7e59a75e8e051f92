// State management module
//
// The StateManager owns the canonical collection behind Arc<RwLock<T>>. Every
// mutation happens under one write lock, so concurrent producers can never
// observe or leave a half-written slot, and each mutation is announced on a
// broadcast channel.

use crate::metrics::Metrics;
use crate::models::{
    AppState, AssignOutcome, BatchTelemetry, Channel, Diagnostic, DiagnosticKind, Progress, RunId,
    RunMode, SetVariant, Skeleton, SlotAddress, SlotAssignment,
};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Change events emitted when state is modified.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A skeleton was (re)loaded; every slot is empty.
    SkeletonLoaded {
        variant: SetVariant,
        total_slots: usize,
    },

    /// A slot received new content.
    SlotAssigned {
        address: SlotAddress,
        channel: Channel,
        replaced: bool,
    },

    /// A slot was emptied on request.
    SlotCleared { address: SlotAddress },

    /// Progress was recomputed after a mutation.
    ProgressUpdated { completed: usize, total: usize },

    /// A generation run started; results from earlier runs are now stale.
    RunStarted {
        run: RunId,
        mode: RunMode,
        theme: String,
    },

    /// The current run delivered its last result.
    RunFinished { run: RunId, progress: Progress },

    /// The batched channel reported a finished batch.
    BatchCompleted(BatchTelemetry),

    /// A unit of work was dropped.
    DiagnosticRecorded(Diagnostic),

    /// Every slot was emptied without changing the skeleton.
    CollectionCleared,
}

/// What [`StateManager::apply`] did with an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Replaced,
    /// Equal content was already present; nothing changed or was announced.
    Unchanged,
    /// The slot is not in the loaded skeleton.
    UnknownSlot,
    /// The assignment belongs to a superseded run.
    StaleRun,
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        matches!(self, ApplyOutcome::Inserted | ApplyOutcome::Replaced)
    }
}

impl From<AssignOutcome> for ApplyOutcome {
    fn from(outcome: AssignOutcome) -> Self {
        match outcome {
            AssignOutcome::Inserted => ApplyOutcome::Inserted,
            AssignOutcome::Replaced => ApplyOutcome::Replaced,
            AssignOutcome::Unchanged => ApplyOutcome::Unchanged,
            AssignOutcome::UnknownSlot => ApplyOutcome::UnknownSlot,
        }
    }
}

/// Scalar view of the state used to detect what an arbitrary update changed.
#[derive(Debug, Clone, PartialEq)]
struct Digest {
    progress: Progress,
    run: RunId,
    run_active: bool,
    total_slots: usize,
}

impl Digest {
    fn of(state: &AppState) -> Self {
        Self {
            progress: state.progress(),
            run: state.run.id,
            run_active: state.run.active,
            total_slots: state.collection.total_slots(),
        }
    }
}

/// Thread-safe owner of the collection, with event emission.
///
/// - [`apply()`](Self::apply) is the single entry point for generated items
/// - [`read()`](Self::read) / [`snapshot()`](Self::snapshot) for queries
/// - [`subscribe()`](Self::subscribe) for change events
///
/// Clones share the same state and event channel.
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<AppState>>,
    state_tx: broadcast::Sender<StateChange>,
    metrics: Arc<Metrics>,
}

impl StateManager {
    /// Empty skeleton, fresh metrics.
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(Metrics::new()))
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        let (state_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
            metrics,
        }
    }

    /// A manager initialized from `skeleton` with every slot empty.
    pub fn with_skeleton(skeleton: Skeleton, variant: SetVariant) -> Self {
        let manager = Self::new();
        manager.reset(skeleton, variant);
        manager
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, change: StateChange) {
        match self.state_tx.send(change) {
            Ok(_) => self.metrics.record_state_broadcast(),
            // No subscribers is normal (headless use, tests)
            Err(_) => self.metrics.record_state_broadcast_error(),
        }
    }

    fn emit_all(&self, changes: &[StateChange]) {
        for change in changes {
            self.emit(change.clone());
        }
    }

    /// Clone of the whole state, safe to hold without locks.
    pub fn snapshot(&self) -> AppState {
        self.read_guard().clone()
    }

    /// Execute a function with read access to the state.
    ///
    /// # Example
    /// ```ignore
    /// let filled = manager.read(|s| s.collection.item_by_id("CW01").is_some());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.read_guard();
        f(&state)
    }

    /// Apply an arbitrary mutation and announce what it changed.
    ///
    /// Only progress, run and skeleton-size changes are detected here; slot
    /// level events come from the dedicated methods.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.write_guard();
        let old = Digest::of(&state);
        update_fn(&mut state);
        let changes = Self::detect_changes(&old, &state);
        self.metrics.record_state_update();
        self.emit_all(&changes);
        changes
    }

    fn detect_changes(old: &Digest, state: &AppState) -> Vec<StateChange> {
        let new = Digest::of(state);
        let mut changes = Vec::new();

        if old.total_slots != new.total_slots {
            changes.push(StateChange::SkeletonLoaded {
                variant: state.variant,
                total_slots: new.total_slots,
            });
        }

        if old.progress != new.progress {
            changes.push(StateChange::ProgressUpdated {
                completed: new.progress.completed,
                total: new.progress.total,
            });
        }

        if old.run_active && !new.run_active && old.run == new.run {
            changes.push(StateChange::RunFinished {
                run: new.run,
                progress: new.progress,
            });
        }

        changes
    }

    /// Subscribe to state change events.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    pub fn progress(&self) -> Progress {
        self.read(AppState::progress)
    }

    /// Replace the skeleton and empty the collection.
    pub fn reset(&self, skeleton: Skeleton, variant: SetVariant) -> Vec<StateChange> {
        let mut state = self.write_guard();
        state.replace_skeleton(skeleton, variant);
        // Anything in flight was produced for the previous skeleton.
        state.run.id = state.run.id.next();
        state.run.active = false;
        state.run.mode = None;

        let progress = state.progress();
        tracing::info!(
            variant = %variant,
            total_slots = progress.total,
            "Collection reset to new skeleton"
        );

        let changes = vec![
            StateChange::SkeletonLoaded {
                variant,
                total_slots: progress.total,
            },
            StateChange::ProgressUpdated {
                completed: progress.completed,
                total: progress.total,
            },
        ];
        self.metrics.record_state_update();
        self.emit_all(&changes);
        changes
    }

    /// Route one assignment into the collection.
    ///
    /// `run` tags results of a streaming or bulk run; `None` marks results that
    /// are never stale (push notifications, single-item requests). Unknown
    /// slots and stale runs leave the state untouched.
    pub fn apply(
        &self,
        assignment: &SlotAssignment,
        channel: Channel,
        run: Option<RunId>,
    ) -> ApplyOutcome {
        let outcome = self.apply_locked(assignment, channel, run);
        self.metrics.record_apply(channel, outcome);
        outcome
    }

    fn apply_locked(
        &self,
        assignment: &SlotAssignment,
        channel: Channel,
        run: Option<RunId>,
    ) -> ApplyOutcome {
        let mut state = self.write_guard();

        if !state.is_current_run(run) {
            tracing::debug!(
                slot_id = %assignment.slot_id,
                %channel,
                "Dropping result from superseded run"
            );
            return ApplyOutcome::StaleRun;
        }

        let Some(address) = state.collection.resolve(assignment) else {
            tracing::debug!(
                slot_id = %assignment.slot_id,
                %channel,
                "Ignoring assignment for slot outside the loaded skeleton"
            );
            return ApplyOutcome::UnknownSlot;
        };

        let mut item = assignment.item.clone();
        if channel == Channel::Push {
            item.mark_arrived(Instant::now());
        }

        let outcome = ApplyOutcome::from(state.collection.assign(&address, item));
        if !outcome.changed() {
            return outcome;
        }

        let progress = state.progress();
        let mut changes = vec![
            StateChange::SlotAssigned {
                address,
                channel,
                replaced: outcome == ApplyOutcome::Replaced,
            },
            StateChange::ProgressUpdated {
                completed: progress.completed,
                total: progress.total,
            },
        ];

        if state.run.active && progress.is_complete() {
            state.run.active = false;
            tracing::info!(run = %state.run.id, total = progress.total, "Collection complete");
            changes.push(StateChange::RunFinished {
                run: state.run.id,
                progress,
            });
        }

        self.metrics.record_state_update();
        self.emit_all(&changes);
        outcome
    }

    /// Empty one slot. Returns false when the slot is unknown.
    pub fn clear_slot(&self, address: &SlotAddress) -> bool {
        let mut state = self.write_guard();
        let Some(previous) = state.collection.clear(address) else {
            return false;
        };
        if previous.is_none() {
            return true;
        }

        let progress = state.progress();
        let changes = [
            StateChange::SlotCleared {
                address: address.clone(),
            },
            StateChange::ProgressUpdated {
                completed: progress.completed,
                total: progress.total,
            },
        ];
        self.metrics.record_state_update();
        self.emit_all(&changes);
        true
    }

    /// Empty every slot, keeping the skeleton.
    pub fn clear_all(&self) -> Vec<StateChange> {
        let mut state = self.write_guard();
        state.collection.clear_all();
        let progress = state.progress();

        let changes = vec![
            StateChange::CollectionCleared,
            StateChange::ProgressUpdated {
                completed: progress.completed,
                total: progress.total,
            },
        ];
        self.metrics.record_state_update();
        self.emit_all(&changes);
        changes
    }

    /// Start a generation run, superseding any run in flight.
    ///
    /// Empties the collection and batch telemetry, then returns the new run id
    /// that the run's results must carry.
    pub fn begin_run(&self, theme: &str, mode: RunMode) -> RunId {
        let mut state = self.write_guard();
        let run = state.run.id.next();
        state.run.id = run;
        state.run.mode = Some(mode);
        state.run.active = true;
        state.theme = theme.to_string();
        state.batch = Default::default();
        state.collection.clear_all();

        let progress = state.progress();
        tracing::info!(%run, ?mode, theme, total = progress.total, "Generation run started");

        let changes = [
            StateChange::RunStarted {
                run,
                mode,
                theme: theme.to_string(),
            },
            StateChange::ProgressUpdated {
                completed: progress.completed,
                total: progress.total,
            },
        ];
        self.metrics.record_state_update();
        self.emit_all(&changes);
        run
    }

    /// Mark `run` finished. No-op for stale or already finished runs.
    pub fn finish_run(&self, run: RunId) -> bool {
        self.update(|state| {
            if state.run.id == run {
                state.run.active = false;
            }
        })
        .iter()
        .any(|c| matches!(c, StateChange::RunFinished { .. }))
    }

    pub fn current_run(&self) -> RunId {
        self.read(|s| s.run.id)
    }

    /// Bound the diagnostics log, dropping the oldest entries beyond it.
    pub fn set_diagnostics_capacity(&self, capacity: usize) {
        let mut state = self.write_guard();
        state.diagnostics_capacity = capacity;
        let excess = state.diagnostics.len().saturating_sub(capacity);
        state.diagnostics.drain(..excess);
    }

    pub fn set_theme(&self, theme: &str) {
        self.write_guard().theme = theme.to_string();
    }

    /// Accumulate batch telemetry for the current run.
    pub fn record_batch(&self, telemetry: BatchTelemetry, run: Option<RunId>) -> bool {
        let mut state = self.write_guard();
        if !state.is_current_run(run) {
            return false;
        }
        tracing::info!(
            batch = telemetry.batch_index,
            of = telemetry.batch_count,
            cards_completed = telemetry.cards_completed,
            cards_total = telemetry.cards_total,
            secs = telemetry.batch_duration.as_secs_f64(),
            "Batch completed"
        );
        self.metrics.record_batch_time(telemetry.batch_duration);
        state.batch.record(telemetry.clone());
        self.emit(StateChange::BatchCompleted(telemetry));
        true
    }

    pub fn record_diagnostic(&self, diagnostic: Diagnostic) {
        // Stale slot ids after a skeleton switch are expected.
        if diagnostic.kind == DiagnosticKind::UnknownSlot {
            tracing::debug!(channel = %diagnostic.channel, "{}", diagnostic.message);
        } else {
            tracing::warn!(
                channel = %diagnostic.channel,
                kind = ?diagnostic.kind,
                "{}",
                diagnostic.message
            );
        }
        self.write_guard().push_diagnostic(diagnostic.clone());
        self.emit(StateChange::DiagnosticRecorded(diagnostic));
    }

    pub fn clear_highlight(&self, address: &SlotAddress) -> bool {
        self.write_guard().collection.clear_highlight(address)
    }

    /// Clear recently-arrived highlights older than `max_age`.
    pub fn expire_highlights(&self, max_age: Duration) -> usize {
        self.write_guard()
            .collection
            .expire_highlights(Instant::now(), max_age)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
