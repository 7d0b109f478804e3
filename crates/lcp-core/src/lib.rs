//! LCP Core - Acquisition and Rights Enforcement
//!
//! This crate provides the enforcement core of an LCP reading client.
//! It acquires the encrypted publication referenced by a license,
//! verifies its integrity, and persists consumable rights across sessions.

mod acquisition;
mod config;
mod crypto;
mod error;
mod fs;
mod license;
mod net;
mod rights;
mod rights_service;
mod vault;

pub use acquisition::*;
pub use config::*;
pub use crypto::*;
pub use error::*;
pub use fs::*;
pub use license::*;
pub use net::*;
pub use rights::*;
pub use rights_service::*;
pub use vault::*;

use lcp_types::{LcpConfig, VaultEntry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// The main LCP core instance
#[derive(Clone)]
pub struct LcpCore {
    /// Client configuration
    config: Arc<RwLock<LcpConfig>>,
    config_store: ConfigStore,
    fs: Arc<dyn FileSystemProvider>,
    net: Arc<dyn NetworkProvider>,
    crypto: Arc<dyn CryptoProvider>,
    /// Rights vault
    storage: Arc<dyn StorageProvider>,
    rights: RightsService,
}

impl LcpCore {
    /// Create a core backed by the data directory: `config.json` and the
    /// `rights.db` vault.
    pub async fn new(data_dir: PathBuf) -> LcpResult<Self> {
        let config_store = ConfigStore::new(data_dir.clone()).await?;
        let config = config_store.load().await?;

        let storage = Arc::new(SqliteVault::new(data_dir.join("rights.db")).await?);
        let net = Arc::new(HttpNetProvider::new(&config)?);

        info!("LCP core initialized in {}", data_dir.display());

        Ok(Self::from_parts(
            config_store,
            config,
            Arc::new(LocalFileSystem),
            net,
            Arc::new(Sha256Provider),
            storage,
        ))
    }

    /// Assemble a core from explicit collaborators
    pub fn from_parts(
        config_store: ConfigStore,
        config: LcpConfig,
        fs: Arc<dyn FileSystemProvider>,
        net: Arc<dyn NetworkProvider>,
        crypto: Arc<dyn CryptoProvider>,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        let rights = RightsService::new(Some(Arc::clone(&storage)), config.unknown_user_id.clone());

        Self {
            config: Arc::new(RwLock::new(config)),
            config_store,
            fs,
            net,
            crypto,
            storage,
            rights,
        }
    }

    // ========================================================================
    // License Operations
    // ========================================================================

    /// Parse a license and load its persisted rights
    pub async fn open_license(&self, json: &str) -> LcpResult<Arc<License>> {
        let license = License::from_json(json)?;
        self.rights.sync_rights_from_storage(&license).await?;
        info!("Opened license {} from {}", license.id(), license.provider());
        Ok(Arc::new(license))
    }

    /// A fresh acquisition of the license's publication into `destination`
    pub fn acquisition(&self, license: Arc<License>, destination: PathBuf) -> Acquisition {
        Acquisition::new(
            license,
            Arc::clone(&self.fs),
            Arc::clone(&self.net),
            Arc::clone(&self.crypto),
            destination,
        )
    }

    pub fn rights(&self) -> &RightsService {
        &self.rights
    }

    /// Every entry of the rights vault
    pub async fn vault_entries(&self) -> LcpResult<Vec<VaultEntry>> {
        let mut entries = self.storage.enumerate_vault(LICENSE_RIGHTS_VAULT_ID).await?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn config(&self) -> LcpConfig {
        self.config.read().await.clone()
    }

    /// Persist a new configuration. Network and unknown-user settings
    /// apply to cores created afterwards.
    pub async fn update_config(&self, config: LcpConfig) -> LcpResult<()> {
        self.config_store.save(&config).await?;
        *self.config.write().await = config;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_store.path()
    }
}
