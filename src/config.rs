use crate::errors::{DaemonError, Result};
use crate::escpos::PaperWidth;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "PRINT_SERVER_CONFIG";
pub const BIND_ENV: &str = "PRINT_SERVER_BIND";
pub const JOB_TIMEOUT_ENV: &str = "PRINT_SERVER_JOB_TIMEOUT_MS";
pub const LOG_DIR_ENV: &str = "PRINT_SERVER_LOG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Address the HTTP server listens on
    pub bind_address: String,
    /// Number of recent request ids remembered for deduplication
    pub dedup_window: usize,
    /// Number of recent job outcomes kept for diagnostics
    pub outcome_log_capacity: usize,
    /// Upper bound on a single queued device operation
    pub job_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Connect timeout used by the health-check probe
    pub probe_timeout_ms: u64,
    /// Maximum accepted JSON body size (base64 images are large)
    pub max_body_bytes: usize,
    /// Allowed CORS origins; `"*"` allows any origin
    pub cors_origins: Vec<String>,
    /// Paper width used when a request does not specify `PAPER_WIDTH`
    pub default_paper_width: PaperWidth,
    /// Directory for daily-rolling log files; stdout only when unset
    pub log_dir: Option<PathBuf>,
}

/// Per-request printer settings as sent by POS clients.
///
/// Unknown keys are preserved so health-check responses can echo the
/// caller's config back unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrinterConfig {
    #[serde(rename = "TCP_ADDRESS", default, skip_serializing_if = "Option::is_none")]
    pub tcp_address: Option<String>,
    /// Unsupported values are dropped so the driver's default width applies
    #[serde(
        rename = "PAPER_WIDTH",
        default,
        deserialize_with = "lenient_paper_width",
        skip_serializing_if = "Option::is_none"
    )]
    pub paper_width: Option<PaperWidth>,
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

fn lenient_paper_width<'de, D>(deserializer: D) -> std::result::Result<Option<PaperWidth>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;

    Ok(raw.and_then(|value| match PaperWidth::deserialize(&value) {
        Ok(width) => Some(width),
        Err(_) => {
            warn!("Unsupported PAPER_WIDTH {}, using the default width", value);
            None
        }
    }))
}

impl PrinterConfig {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            tcp_address: Some(address.into()),
            ..Default::default()
        }
    }
}

impl AppConfig {
    /// Platform config path, e.g. `~/.config/receipt-print-server/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("receipt-print-server"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.json")
    }

    /// Load from `PRINT_SERVER_CONFIG` (or the platform default path),
    /// then apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());

        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| DaemonError::Config(format!("Invalid config file {:?}: {}", path, e)))?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(bind) = std::env::var(BIND_ENV) {
            debug!("{} override: {}", BIND_ENV, bind);
            self.bind_address = bind;
        }

        if let Ok(raw) = std::env::var(JOB_TIMEOUT_ENV) {
            self.job_timeout_ms = raw.trim().parse().map_err(|_| {
                DaemonError::Config(format!("{} must be milliseconds, got {:?}", JOB_TIMEOUT_ENV, raw))
            })?;
            debug!("{} override: {}ms", JOB_TIMEOUT_ENV, self.job_timeout_ms);
        }

        if let Ok(dir) = std::env::var(LOG_DIR_ENV) {
            if !dir.is_empty() {
                self.log_dir = Some(PathBuf::from(dir));
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_address.parse::<SocketAddr>().map_err(|_| {
            DaemonError::Config(format!("Invalid bind address: {}", self.bind_address))
        })?;

        for (name, value) in [
            ("job_timeout_ms", self.job_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
        ] {
            if value == 0 {
                return Err(DaemonError::Config(format!("{} must be greater than zero", name)));
            }
        }

        if self.max_body_bytes == 0 {
            return Err(DaemonError::Config("max_body_bytes must be greater than zero".to_string()));
        }

        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5002".to_string(),
            dedup_window: 10,
            outcome_log_capacity: 10,
            job_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            write_timeout_ms: 20_000,
            probe_timeout_ms: 2_000,
            max_body_bytes: 10 * 1024 * 1024,
            cors_origins: vec!["*".to_string()],
            default_paper_width: PaperWidth::Width80mm,
            log_dir: None,
        }
    }
}
