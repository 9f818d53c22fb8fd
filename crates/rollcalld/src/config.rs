use anyhow::Context;
use rollcall_core::Metric;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_WEBHOOK_URL: &str = "http://localhost:3000/api/attendances/{attendanceId}/webhook";

/// Daemon configuration.
///
/// Layered as: built-in defaults, then the TOML file named by
/// `ROLLCALL_CONFIG` (if set), then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub bind_addr: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Root under which per-request scratch directories are created.
    pub scratch_dir: PathBuf,
    /// Distance metric for face matching.
    pub metric: Metric,
    /// Maximum distance at which two faces are considered the same person.
    pub tolerance: f32,
    /// Timeout in seconds for a single image download.
    pub fetch_timeout_secs: u64,
    /// Number of roster reference images processed concurrently.
    pub fetch_concurrency: usize,
    /// Webhook URL; `{attendanceId}` is replaced per request.
    pub webhook_url: String,
    pub webhook_timeout_secs: u64,
    /// Extra delivery attempts after the first failure.
    pub webhook_retries: u32,
    pub webhook_backoff_ms: u64,
    /// Pending extraction requests buffered ahead of the engine thread.
    pub engine_queue_depth: usize,
    /// How long shutdown waits for in-flight webhook deliveries.
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            scratch_dir: std::env::temp_dir().join("rollcall"),
            metric: Metric::Cosine,
            tolerance: 0.60,
            fetch_timeout_secs: 30,
            fetch_concurrency: 8,
            webhook_url: DEFAULT_WEBHOOK_URL.to_string(),
            webhook_timeout_secs: 10,
            webhook_retries: 2,
            webhook_backoff_ms: 500,
            engine_queue_depth: 16,
            shutdown_grace_secs: 15,
        }
    }
}

impl Config {
    /// Load defaults, the optional config file, and environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let base = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `ROLLCALL_*` environment variables. Unparseable values keep the
    /// current setting.
    pub fn with_env_overrides(self) -> Self {
        Self {
            bind_addr: env_or("ROLLCALL_BIND_ADDR", self.bind_addr),
            model_dir: env_or("ROLLCALL_MODEL_DIR", self.model_dir),
            scratch_dir: env_or("ROLLCALL_SCRATCH_DIR", self.scratch_dir),
            metric: env_or("ROLLCALL_METRIC", self.metric),
            tolerance: env_or("ROLLCALL_TOLERANCE", self.tolerance),
            fetch_timeout_secs: env_or("ROLLCALL_FETCH_TIMEOUT_SECS", self.fetch_timeout_secs),
            fetch_concurrency: env_or("ROLLCALL_FETCH_CONCURRENCY", self.fetch_concurrency),
            webhook_url: env_or("ROLLCALL_WEBHOOK_URL", self.webhook_url),
            webhook_timeout_secs: env_or("ROLLCALL_WEBHOOK_TIMEOUT_SECS", self.webhook_timeout_secs),
            webhook_retries: env_or("ROLLCALL_WEBHOOK_RETRIES", self.webhook_retries),
            webhook_backoff_ms: env_or("ROLLCALL_WEBHOOK_BACKOFF_MS", self.webhook_backoff_ms),
            engine_queue_depth: env_or("ROLLCALL_ENGINE_QUEUE_DEPTH", self.engine_queue_depth),
            shutdown_grace_secs: env_or("ROLLCALL_SHUTDOWN_GRACE_SECS", self.shutdown_grace_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn webhook_backoff(&self) -> Duration {
        Duration::from_millis(self.webhook_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, current: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(current)
}
