//! Data models for the set assembler.
//!
//! - [`Skeleton`]: immutable taxonomy of categories, sub-categories and slots
//! - [`Item`]: the generated artifact for one slot
//! - [`CollectionState`]: the nested slot → item-or-empty mapping, and [`Progress`]
//! - [`SlotAssignment`]: the canonical event every channel is normalized into
//! - [`AppState`]: everything [`StateManager`](crate::state::StateManager) guards
//! - [`AppConfig`]: settings loaded from `setforge.yaml`

pub mod app_state;
pub mod assignment;
pub mod collection;
pub mod config;
pub mod item;
pub mod skeleton;
pub mod telemetry;

pub use app_state::{AppState, RunMode, RunStatus};
pub use assignment::{Channel, RunId, SlotAddress, SlotAssignment};
pub use collection::{AssignOutcome, CollectionState, Progress};
pub use config::{AppConfig, ExportSettings, LogSettings, ReconnectSettings, ServerSettings};
pub use item::{Item, StatValue};
pub use skeleton::{Category, SetVariant, Skeleton, SkeletonError, SlotDescriptor, SubCategory};
pub use telemetry::{
    BatchProgress, BatchTelemetry, ConnectionHealth, ConnectionState, Diagnostic, DiagnosticKind,
};
