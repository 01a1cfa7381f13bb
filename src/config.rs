//! Service configuration.
//!
//! Handles loading, validating, and merging the TOML config file. Every
//! process role (worker, orchestrator, push) reads the same file and uses the
//! sections it needs. Stock defaults are serialised to a TOML value and the
//! user file is merged over it, so a file only needs the keys it changes. A
//! missing file means stock defaults.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [broker]
//! url = "redis://127.0.0.1:6379"
//! work_topic = "imageTopic"
//! notification_topic = "imageNotifications"
//!
//! [workers]
//! top_url = "http://127.0.0.1:7001"
//! bottom_url = "http://127.0.0.1:7002"
//! timeout_ms = 30000
//!
//! [worker]
//! bind = "127.0.0.1:7001"
//! max_zoom_percent = 1000
//! max_output_pixels = 40000000
//! max_body_bytes = 67108864
//!
//! [storage]
//! url = "http://127.0.0.1:3000"
//! upload_path = "/api/bmp/upload"
//! id_field = "pictureId"
//! timeout_ms = 30000
//!
//! [pipeline]
//! reassembly = "reject"         # or "crop"
//! # ledger_path = "ledger.json"
//! ledger_capacity = 10000
//!
//! [push]
//! bind = "127.0.0.1:8081"
//!
//! [logging]
//! filter = "info"
//! format = "text"               # or "json"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{OUTPUT_PIXEL_CEILING, ReassemblyPolicy, ZoomLimits};
use crate::pipeline::PipelineSettings;
use crate::storage::HttpSinkOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "split-zoom.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Full configuration for every process role.
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub broker: BrokerConfig,
    /// Where the orchestrator sends each half.
    pub workers: WorkersConfig,
    /// Settings for a resize worker process.
    pub worker: WorkerConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub push: PushConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let broker = &self.broker;
        if broker.work_topic.trim().is_empty() || broker.notification_topic.trim().is_empty() {
            return Err(ConfigError::Validation(
                "broker topics must not be empty".into(),
            ));
        }
        if broker.work_topic == broker.notification_topic {
            return Err(ConfigError::Validation(format!(
                "broker.work_topic and broker.notification_topic must differ (both '{}')",
                broker.work_topic
            )));
        }
        if self.workers.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "workers.timeout_ms must be greater than 0".into(),
            ));
        }
        if self.storage.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "storage.timeout_ms must be greater than 0".into(),
            ));
        }
        if self.worker.max_zoom_percent < 100 {
            return Err(ConfigError::Validation(
                "worker.max_zoom_percent must be at least 100".into(),
            ));
        }
        if self.worker.max_output_pixels == 0
            || self.worker.max_output_pixels > OUTPUT_PIXEL_CEILING
        {
            return Err(ConfigError::Validation(format!(
                "worker.max_output_pixels must be between 1 and {OUTPUT_PIXEL_CEILING}, got {}",
                self.worker.max_output_pixels
            )));
        }
        if self.worker.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "worker.max_body_bytes must be greater than 0".into(),
            ));
        }
        if !self.storage.upload_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "storage.upload_path must start with '/', got '{}'",
                self.storage.upload_path
            )));
        }
        if self.storage.id_field.is_empty() {
            return Err(ConfigError::Validation(
                "storage.id_field must not be empty".into(),
            ));
        }
        if self.pipeline.ledger_capacity == 0 {
            return Err(ConfigError::Validation(
                "pipeline.ledger_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            call_timeout: Duration::from_millis(self.workers.timeout_ms),
            reassembly: self.pipeline.reassembly,
            ledger_capacity: self.pipeline.ledger_capacity,
            ledger_path: self.pipeline.ledger_path.clone(),
        }
    }

    pub fn sink_options(&self) -> HttpSinkOptions {
        HttpSinkOptions {
            base_url: self.storage.url.clone(),
            upload_path: self.storage.upload_path.clone(),
            id_field: self.storage.id_field.clone(),
            timeout: Duration::from_millis(self.storage.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub url: String,
    /// Topic carrying `Image=...;Zoom=...` work messages.
    pub work_topic: String,
    /// Topic carrying `NewImage:<id>` notifications.
    pub notification_topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            work_topic: "imageTopic".into(),
            notification_topic: "imageNotifications".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    pub top_url: String,
    pub bottom_url: String,
    /// Per-call bound on each resize request.
    pub timeout_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            top_url: "http://127.0.0.1:7001".into(),
            bottom_url: "http://127.0.0.1:7002".into(),
            timeout_ms: 30_000,
        }
    }
}

impl WorkersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub bind: SocketAddr,
    pub max_zoom_percent: u32,
    /// Largest `width * height` a single resize may produce.
    pub max_output_pixels: u64,
    pub max_body_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7001)),
            max_zoom_percent: ZoomLimits::default().max_percent,
            max_output_pixels: ZoomLimits::default().max_output_pixels,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    pub fn limits(&self) -> ZoomLimits {
        ZoomLimits {
            max_percent: self.max_zoom_percent,
            max_output_pixels: self.max_output_pixels,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub url: String,
    pub upload_path: String,
    /// Member of the sink's JSON response holding the assigned id.
    pub id_field: String,
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".into(),
            upload_path: "/api/bmp/upload".into(),
            id_field: "pictureId".into(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub reassembly: ReassemblyPolicy,
    /// Persist the idempotency ledger here. In memory only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,
    pub ledger_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reassembly: ReassemblyPolicy::Reject,
            ledger_path: None,
            ledger_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PushConfig {
    pub bind: SocketAddr,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8081)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` wins when set.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            format: LogFormat::Text,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ServiceConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a file path.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# split-zoom configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Every process role reads the same file:
#   split-zoom worker        -> [worker]
#   split-zoom orchestrator  -> [broker], [workers], [storage], [pipeline]
#   split-zoom push          -> [broker], [push]
#   split-zoom submit        -> [broker]
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Message broker (Redis pub/sub)
# ---------------------------------------------------------------------------
[broker]
url = "redis://127.0.0.1:6379"

# Work messages: Image=<base64>;Zoom=<percent>
work_topic = "imageTopic"

# Completion notifications: NewImage:<id>
# Must differ from work_topic.
notification_topic = "imageNotifications"

# ---------------------------------------------------------------------------
# Resize workers, as seen by the orchestrator
# ---------------------------------------------------------------------------
[workers]
# The TOP half goes to top_url, the BOTTOM half to bottom_url.
top_url = "http://127.0.0.1:7001"
bottom_url = "http://127.0.0.1:7002"

# Per-call timeout. A call that exceeds it fails the whole work item.
timeout_ms = 30000

# ---------------------------------------------------------------------------
# Resize worker process
# ---------------------------------------------------------------------------
[worker]
# Overridden by `split-zoom worker --bind`.
bind = "127.0.0.1:7001"

# Largest zoom percentage accepted. Must be at least 100.
max_zoom_percent = 1000

# Largest resize output, in pixels (width * height). Larger results are
# refused as invalid requests before any buffer is allocated. Capped so the
# orchestrator can always decode what a worker returns.
max_output_pixels = 40000000

# Largest request body accepted, in bytes.
max_body_bytes = 67108864

# ---------------------------------------------------------------------------
# Storage sink
# ---------------------------------------------------------------------------
[storage]
url = "http://127.0.0.1:3000"
upload_path = "/api/bmp/upload"

# JSON member of the sink's response holding the integer id.
id_field = "pictureId"

timeout_ms = 30000

# ---------------------------------------------------------------------------
# Orchestration
# ---------------------------------------------------------------------------
[pipeline]
# What to do when the resized halves come back with different widths:
#   "reject" - fail the work item
#   "crop"   - crop the wider half to the narrower width
reassembly = "reject"

# Persist the redelivery ledger across restarts.
# Omit to keep it in memory only.
# ledger_path = "split-zoom-ledger.json"

# Messages remembered for redelivery detection (oldest evicted first).
ledger_capacity = 10000

# ---------------------------------------------------------------------------
# Push server (WebSocket at /ws)
# ---------------------------------------------------------------------------
[push]
bind = "127.0.0.1:8081"

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# tracing EnvFilter directives. RUST_LOG overrides this when set.
filter = "info"

# "text" or "json"
format = "text"
"##
}
