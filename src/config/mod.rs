mod file_config;

pub use file_config::{FileConfig, ReconcilerConfig, TransfersConfig};

use crate::transfer::StaleTransferPolicy;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub server_url: Option<String>,
    pub request_timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub server_url: String,
    pub request_timeout_sec: u64,

    // Feature configs (with defaults)
    pub transfers: TransferSettings,
    pub reconciler: ReconcilerSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        // The database file may not exist yet, its directory must.
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                bail!("Database directory does not exist: {:?}", parent);
            }
            if !parent.is_dir() {
                bail!("Database parent is not a directory: {:?}", parent);
            }
        }
        if db_path.is_dir() {
            bail!("db_path points to a directory: {:?}", db_path);
        }

        let server_url = file
            .server_url
            .or_else(|| cli.server_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("server_url must be specified via --server-url or in config file")
            })?;
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            bail!("server_url must be an http(s) URL: {}", server_url);
        }
        let server_url = server_url.trim_end_matches('/').to_string();

        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);

        // Transfer settings - merge file config with defaults
        let defaults = TransferSettings::default();
        let t_file = file.transfers.unwrap_or_default();
        let stale_policy = match t_file.stale_policy {
            Some(s) => match StaleTransferPolicy::from_str(&s) {
                Some(policy) => policy,
                None => bail!("Unknown stale_policy '{}', expected 'evict' or 'fail'", s),
            },
            None => defaults.stale_policy,
        };
        let transfers = TransferSettings {
            max_model_transfers: t_file
                .max_model_transfers
                .unwrap_or(defaults.max_model_transfers),
            max_tool_transfers: t_file
                .max_tool_transfers
                .unwrap_or(defaults.max_tool_transfers),
            sweep_interval_secs: t_file
                .sweep_interval_secs
                .unwrap_or(defaults.sweep_interval_secs),
            stale_threshold_secs: t_file
                .stale_threshold_secs
                .unwrap_or(defaults.stale_threshold_secs),
            completed_grace_secs: t_file
                .completed_grace_secs
                .unwrap_or(defaults.completed_grace_secs),
            stale_policy,
        };
        if transfers.sweep_interval_secs == 0 {
            bail!("transfers.sweep_interval_secs must be greater than zero");
        }
        // Tool installs report nothing until the request returns.
        if request_timeout_sec >= transfers.stale_threshold_secs {
            warn!(
                "request_timeout_sec ({}) is not below transfers.stale_threshold_secs ({}), \
                 slow tool installs will be treated as stalled",
                request_timeout_sec, transfers.stale_threshold_secs
            );
        }

        let r_file = file.reconciler.unwrap_or_default();
        let reconciler = ReconcilerSettings {
            throttle_interval_ms: r_file
                .throttle_interval_ms
                .unwrap_or(ReconcilerSettings::default().throttle_interval_ms),
            page_size: r_file
                .page_size
                .unwrap_or(ReconcilerSettings::default().page_size),
        };
        if reconciler.page_size == 0 {
            bail!("reconciler.page_size must be greater than zero");
        }

        Ok(Self {
            db_path,
            server_url,
            request_timeout_sec,
            transfers,
            reconciler,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub max_model_transfers: usize,
    pub max_tool_transfers: usize,
    pub sweep_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub completed_grace_secs: u64,
    pub stale_policy: StaleTransferPolicy,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_model_transfers: 3,
            max_tool_transfers: 5,
            sweep_interval_secs: 30,
            stale_threshold_secs: 125, // 2 minutes plus slack for the install timeout
            completed_grace_secs: 2,
            stale_policy: StaleTransferPolicy::Evict,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub throttle_interval_ms: u64,
    pub page_size: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            throttle_interval_ms: 500,
            page_size: 20,
        }
    }
}
