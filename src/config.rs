use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_DEADLINE_SECS, DEFAULT_FILE_PREFIX, DEFAULT_FLUSH_INTERVAL_SECS,
    DEFAULT_OUTPUT_DIR, DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_WORKERS,
};
use crate::error::{EnricherError, Result};
use crate::pipeline::{SinkConfig, StageConfig};

const DEFAULT_CONFIG_PATH: &str = "ledgerflow.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineSettings,
    pub sink: SinkSettings,
    pub export: ExportSettings,
    pub remote: RemoteSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub workers: usize,
    pub deadline_secs: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            deadline_secs: DEFAULT_DEADLINE_SECS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub output_dir: String,
    pub file_prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub categorizer_url: Option<String>,
    pub email_search_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            categorizer_url: None,
            email_search_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Load configuration: an explicit path must exist; otherwise
    /// `ledgerflow.toml` is picked up when present, and built-in defaults
    /// apply when it is not.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(explicit) => Self::from_file(explicit),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            EnricherError::Config(format!("failed to read config file '{path}': {err}"))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Fail fast on invalid tuning values, before any stage starts.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.queue_capacity == 0 {
            return Err(EnricherError::Config(
                "pipeline.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(EnricherError::Config(
                "pipeline.workers must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.deadline_secs == 0 {
            return Err(EnricherError::Config(
                "pipeline.deadline_secs must be greater than zero".to_string(),
            ));
        }
        if self.sink.batch_size == 0 {
            return Err(EnricherError::Config(
                "sink.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.sink.flush_interval_secs == 0 {
            return Err(EnricherError::Config(
                "sink.flush_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.remote.request_timeout_secs == 0 {
            return Err(EnricherError::Config(
                "remote.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.export.output_dir.trim().is_empty() {
            return Err(EnricherError::Config(
                "export.output_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            queue_capacity: self.pipeline.queue_capacity,
            workers: self.pipeline.workers,
            shutdown_grace: self.shutdown_grace(),
        }
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            queue_capacity: self.pipeline.queue_capacity,
            batch_size: self.sink.batch_size,
            flush_interval: Duration::from_secs(self.sink.flush_interval_secs),
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.pipeline.deadline_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.pipeline.shutdown_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }
}
