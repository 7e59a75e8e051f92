use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration from `setforge.yaml`.
///
/// Every section has defaults, so a partial (or missing) file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub highlight: HighlightSettings,

    #[serde(default)]
    pub export: ExportSettings,

    #[serde(default)]
    pub logging: LogSettings,

    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            reconnect: ReconnectSettings::default(),
            highlight: HighlightSettings::default(),
            export: ExportSettings::default(),
            logging: LogSettings::default(),
            diagnostics_capacity: default_diagnostics_capacity(),
        }
    }
}

/// Generator service endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// WebSocket endpoint of the push channel.
    #[serde(default = "default_push_url")]
    pub push_url: String,

    /// Whole-request timeout handed to the HTTP client.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            push_url: default_push_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Bounded reconnect policy for the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_floor_ms")]
    pub floor_ms: u64,

    #[serde(default = "default_ceiling_ms")]
    pub ceiling_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            floor_ms: default_floor_ms(),
            ceiling_ms: default_ceiling_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightSettings {
    #[serde(default = "default_highlight_ms")]
    pub duration_ms: u64,
}

impl Default for HighlightSettings {
    fn default() -> Self {
        Self {
            duration_ms: default_highlight_ms(),
        }
    }
}

impl HighlightSettings {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default = "default_export_dir")]
    pub dir: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_true")]
    pub console: bool,

    /// Write the log file as JSON lines instead of plain text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            prefix: default_log_prefix(),
            debug: false,
            console: true,
            json: false,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_push_url() -> String {
    "ws://localhost:5000/ws".to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_floor_ms() -> u64 {
    2000
}

fn default_ceiling_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_highlight_ms() -> u64 {
    2000
}

fn default_export_dir() -> String {
    "exports".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "setforge".to_string()
}

fn default_diagnostics_capacity() -> usize {
    crate::models::app_state::DEFAULT_DIAGNOSTICS_CAPACITY
}

fn default_true() -> bool {
    true
}
