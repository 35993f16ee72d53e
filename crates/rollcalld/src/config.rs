use anyhow::Context;
use rollcall_core::config::{default_data_dir, default_model_dir};
use rollcall_core::PipelineConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8080).
    pub bind: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding reference face images.
    pub face_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Matching and enrollment tuning, from `ROLLCALL_PIPELINE_CONFIG` when set.
    pub pipeline: PipelineConfig,
    /// Upper bound on one check-face, enroll or recognize call.
    pub inference_timeout: Duration,
    /// Clients allowed on the kiosk endpoints. Empty allows everyone.
    pub allowed_kiosk_ips: Vec<IpAddr>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let data_dir = default_data_dir();

        let bind = match var("ROLLCALL_BIND") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("invalid ROLLCALL_BIND {addr:?}"))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let pipeline = match var("ROLLCALL_PIPELINE_CONFIG") {
            Some(path) => PipelineConfig::load(Path::new(&path))
                .with_context(|| format!("loading pipeline config from {path}"))?,
            None => PipelineConfig::default(),
        };

        let allowed_kiosk_ips = var("ROLLCALL_ALLOWED_KIOSK_IPS")
            .map(|list| parse_ip_list(&list))
            .unwrap_or_default();

        Ok(Self {
            bind,
            db_path: var("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("rollcall.db")),
            face_dir: var("ROLLCALL_FACE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("faces")),
            model_dir: var("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_model_dir),
            pipeline,
            inference_timeout: Duration::from_millis(
                var("ROLLCALL_INFERENCE_TIMEOUT_MS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
            ),
            allowed_kiosk_ips,
        })
    }
}

fn parse_ip_list(list: &str) -> Vec<IpAddr> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(entry, "ignoring invalid address in ROLLCALL_ALLOWED_KIOSK_IPS");
                None
            }
        })
        .collect()
}
