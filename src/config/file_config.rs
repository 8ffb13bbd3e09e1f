use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub server_url: Option<String>,
    pub request_timeout_sec: Option<u64>,

    // Feature configs
    pub transfers: Option<TransfersConfig>,
    pub reconciler: Option<ReconcilerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TransfersConfig {
    pub max_model_transfers: Option<usize>,
    pub max_tool_transfers: Option<usize>,
    pub sweep_interval_secs: Option<u64>,
    pub stale_threshold_secs: Option<u64>,
    pub completed_grace_secs: Option<u64>,
    /// "evict" or "fail"
    pub stale_policy: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub throttle_interval_ms: Option<u64>,
    pub page_size: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
