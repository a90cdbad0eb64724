//! Layered configuration, read once at startup and handed to the capture
//! controller. Every leaf has a standalone `default_*` function, referenced
//! both by `#[serde(default = "...")]` and by the section's own `impl
//! Default`, so a partially-specified TOML file and a wholly-absent one
//! produce identical values.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/presentmon/presentmon.toml";
const ENV_CONFIG_PATH: &str = "PRESENTMON_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub correlator: CorrelatorFileConfig,
    #[serde(default)]
    pub lsr: LsrFileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file. The path can be overridden with the
    /// `PRESENTMON_CONFIG` environment variable. If the file is missing or
    /// fails to parse, defaults are returned.
    pub fn load() -> Self {
        let path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(path);
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_buffer_size")]
    pub default_buffer_size: i32,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: i32,
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,
    #[serde(default = "default_consume_thread_join_timeout_ms")]
    pub consume_thread_join_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_buffer_size: default_buffer_size(),
            max_buffer_size: default_max_buffer_size(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            consume_thread_join_timeout_ms: default_consume_thread_join_timeout_ms(),
        }
    }
}

fn default_buffer_size() -> i32 {
    60 * 60 * 5 // five minutes of samples at 60 Hz
}
fn default_max_buffer_size() -> i32 {
    60 * 86400 * 7 // matches MAX_CAPTURE_SAMPLES in the original collector
}
fn default_worker_poll_interval_ms() -> u64 {
    100
}
fn default_consume_thread_join_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrelatorFileConfig {
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default = "default_stale_window_ms")]
    pub stale_window_ms: u64,
    #[serde(default = "default_history_window_ms")]
    pub history_window_ms: u64,
    #[serde(default = "default_process_refresh_interval_ms")]
    pub process_refresh_interval_ms: u64,
}

impl Default for CorrelatorFileConfig {
    fn default() -> Self {
        Self {
            history_cap: default_history_cap(),
            stale_window_ms: default_stale_window_ms(),
            history_window_ms: default_history_window_ms(),
            process_refresh_interval_ms: default_process_refresh_interval_ms(),
        }
    }
}

fn default_history_cap() -> usize {
    120
}
fn default_stale_window_ms() -> u64 {
    2_000
}
fn default_history_window_ms() -> u64 {
    2_000
}
fn default_process_refresh_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LsrFileConfig {
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default = "default_history_window_ms")]
    pub history_window_ms: u64,
}

impl Default for LsrFileConfig {
    fn default() -> Self {
        Self { history_cap: default_history_cap(), history_window_ms: default_history_window_ms() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: i32,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

fn default_log_level() -> i32 {
    3 // info
}
fn default_log_format() -> String {
    "compact".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_config_defaults() {
        let toml = r#"[capture]
default_buffer_size = 18000
max_buffer_size = 36000000
worker_poll_interval_ms = 100
consume_thread_join_timeout_ms = 5000

[correlator]
history_cap = 120
stale_window_ms = 2000
history_window_ms = 2000
process_refresh_interval_ms = 1000

[lsr]
history_cap = 120
history_window_ms = 2000

[logging]
level = 3
format = "compact"
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.capture.default_buffer_size, 18_000);
        assert_eq!(cfg.capture.worker_poll_interval_ms, 100);
        assert_eq!(cfg.correlator.history_cap, 120);
        assert_eq!(cfg.correlator.stale_window_ms, 2_000);
        assert_eq!(cfg.lsr.history_cap, 120);
        assert_eq!(cfg.logging.level, 3);
        assert_eq!(cfg.logging.format, "compact");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: Config = toml::from_str("[capture]\ndefault_buffer_size = 42\n").unwrap();
        assert_eq!(cfg.capture.default_buffer_size, 42);
        assert_eq!(cfg.capture.max_buffer_size, default_max_buffer_size());
        assert_eq!(cfg.correlator.history_cap, default_history_cap());
    }

    #[test]
    fn env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\ndefault_buffer_size = 7").unwrap();
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, file.path());
        }
        let cfg = Config::load();
        assert_eq!(cfg.capture.default_buffer_size, 7);
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }

    #[test]
    fn unreadable_path_falls_back_to_default() {
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, "/nonexistent/presentmon.toml");
        }
        let cfg = Config::load();
        assert_eq!(cfg.capture.default_buffer_size, default_buffer_size());
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }
}
