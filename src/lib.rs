// Setforge - assembles generated card sets from the generator's delivery channels
//
// This is the library crate containing the reconciliation engine and its collaborators.
// The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{AppConfig, AppState, Item, Progress, SetVariant, Skeleton, SlotAssignment};
pub use state::{ApplyOutcome, StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
