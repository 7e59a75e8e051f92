use super::assignment::RunId;
use super::collection::{CollectionState, Progress};
use super::skeleton::{SetVariant, Skeleton};
use super::telemetry::{BatchProgress, Diagnostic};
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of diagnostics retained before the oldest are dropped.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 200;

/// How a generation run delivers its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Incremental frames over a streaming response.
    Streaming,
    /// One bulk request; items may also arrive as push notifications.
    Batched,
}

/// The current (or most recent) generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatus {
    pub id: RunId,
    pub mode: Option<RunMode>,
    pub active: bool,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            id: RunId(0),
            mode: None,
            active: false,
        }
    }
}

/// Single source of truth for the assembled collection.
///
/// Wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`]; every
/// mutation goes through the manager so that it is atomic and announced.
#[derive(Clone, Debug)]
pub struct AppState {
    pub skeleton: Arc<Skeleton>,
    pub variant: SetVariant,
    pub collection: CollectionState,

    pub theme: String,
    pub run: RunStatus,
    pub batch: BatchProgress,

    pub diagnostics: VecDeque<Diagnostic>,
    pub diagnostics_capacity: usize,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Skeleton::empty(), SetVariant::default())
    }
}

impl AppState {
    pub fn new(skeleton: Skeleton, variant: SetVariant) -> Self {
        let collection = CollectionState::initialize(&skeleton);
        Self {
            skeleton: Arc::new(skeleton),
            variant,
            collection,
            theme: String::new(),
            run: RunStatus::default(),
            batch: BatchProgress::default(),
            diagnostics: VecDeque::new(),
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }

    /// Derived on every call; never cached.
    pub fn progress(&self) -> Progress {
        self.collection.progress()
    }

    /// Swap in a new skeleton, discarding every slot of the old one.
    pub fn replace_skeleton(&mut self, skeleton: Skeleton, variant: SetVariant) {
        self.collection = CollectionState::initialize(&skeleton);
        self.skeleton = Arc::new(skeleton);
        self.variant = variant;
        self.batch = BatchProgress::default();
    }

    /// Append a diagnostic, evicting the oldest beyond capacity.
    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        if self.diagnostics_capacity == 0 {
            return;
        }
        while self.diagnostics.len() >= self.diagnostics_capacity {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(diagnostic);
    }

    /// Whether results tagged with `run` belong to the current run.
    /// Untagged results (push, single-item) are always current.
    pub fn is_current_run(&self, run: Option<RunId>) -> bool {
        run.is_none_or(|id| id == self.run.id)
    }

    /// Push notifications carry no run id. They are accepted before any run
    /// has started and while the latest run is batched; a streaming run never
    /// receives push results, so anything pushed then is left over from a
    /// superseded batched job.
    pub fn accepts_push(&self) -> bool {
        self.run.mode.is_none_or(|mode| mode == RunMode::Batched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::assignment::Channel;
    use crate::models::telemetry::DiagnosticKind;

    #[test]
    fn test_default_state() {
        let state = AppState::default();
        assert_eq!(state.progress(), Progress::default());
        assert!(!state.run.active);
        assert_eq!(state.run.id, RunId(0));
    }

    #[test]
    fn test_replace_skeleton() {
        let mut state = AppState::default();
        let skeleton = Skeleton::builder()
            .slot("white", "common", "A1", "")
            .slot("white", "common", "A2", "")
            .build()
            .unwrap();

        state.replace_skeleton(skeleton, SetVariant::Commons);

        assert_eq!(state.progress().total, 2);
        assert_eq!(state.variant, SetVariant::Commons);
    }

    #[test]
    fn test_diagnostics_bounded() {
        let mut state = AppState {
            diagnostics_capacity: 2,
            ..AppState::default()
        };
        for i in 0..3 {
            state.push_diagnostic(Diagnostic::new(
                Channel::Stream,
                DiagnosticKind::MalformedPayload,
                format!("bad frame {}", i),
            ));
        }

        assert_eq!(state.diagnostics.len(), 2);
        assert_eq!(state.diagnostics[0].message, "bad frame 1");
    }

    #[test]
    fn test_current_run_check() {
        let mut state = AppState::default();
        state.run.id = RunId(3);

        assert!(state.is_current_run(None));
        assert!(state.is_current_run(Some(RunId(3))));
        assert!(!state.is_current_run(Some(RunId(2))));
    }

    #[test]
    fn test_push_accepted_outside_streaming_runs() {
        let mut state = AppState::default();
        assert!(state.accepts_push());

        state.run.mode = Some(RunMode::Batched);
        assert!(state.accepts_push());

        state.run.mode = Some(RunMode::Streaming);
        assert!(!state.accepts_push());
    }
}
