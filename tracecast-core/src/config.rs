use std::path::PathBuf;
use std::time::Duration;

use config::{Config, File};
use serde::Deserialize;

use crate::error::TracecastError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TracecastConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
    /// Frames queued per viewer before it is dropped as lagging
    pub outbox_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            outbox_capacity: 4096,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TraceConfig {
    pub path: String,
    /// Name of the array-valued field holding the trace events
    pub events_field: String,
    pub poll_interval_ms: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            path: "../build/events.json".to_string(),
            events_field: "traceEvents".to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl TraceConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_path(&self.path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatorConfig {
    pub executable: String,
    pub default_config_file: String,
    pub default_core_config_file: String,
    pub read_chunk_size: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            executable: "../build/npusim".to_string(),
            default_config_file: "../llm/test/gpt2_small/original.json".to_string(),
            default_core_config_file: "../llm/test/core_configs/core_4x4.json".to_string(),
            read_chunk_size: 4096,
        }
    }
}

impl SimulatorConfig {
    /// Absolute path of the simulator executable.
    ///
    /// Relative paths are resolved against the current working directory so
    /// the child's working directory (the executable's parent) is well defined.
    pub fn resolved_executable(&self) -> PathBuf {
        let path = expand_path(&self.executable);
        if path.is_absolute() {
            return path;
        }
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl TracecastConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &str) -> Result<Self, TracecastError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;
        Ok(s.try_deserialize()?)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
