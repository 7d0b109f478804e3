//! Storage layer for the client configuration (JSON file in the data directory)

use crate::error::LcpResult;
use lcp_types::LcpConfig;
use std::path::PathBuf;
use tokio::fs;

const CONFIG_FILE: &str = "config.json";

/// Reads and writes `config.json`
#[derive(Clone, Debug)]
pub struct ConfigStore {
    data_dir: PathBuf,
}

impl ConfigStore {
    /// Create a config store, creating the data directory if needed
    pub async fn new(data_dir: PathBuf) -> LcpResult<Self> {
        fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    /// Load the configuration, falling back to defaults when absent
    pub async fn load(&self) -> LcpResult<LcpConfig> {
        let path = self.path();
        if !path.exists() {
            return Ok(LcpConfig::default());
        }

        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save(&self, config: &LcpConfig) -> LcpResult<()> {
        let content = serde_json::to_string_pretty(config)?;
        fs::write(self.path(), content).await?;
        Ok(())
    }
}
