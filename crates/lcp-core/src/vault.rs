//! Key-value vault storage
//!
//! A vault is a named key/value namespace. Rights are persisted in the
//! [`LICENSE_RIGHTS_VAULT_ID`] vault, one entry per (license, user, right).

use crate::error::LcpResult;
use async_trait::async_trait;
use lcp_types::VaultEntry;
use parking_lot::RwLock;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row, SqlitePool as Pool,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Vault holding persisted right values
pub const LICENSE_RIGHTS_VAULT_ID: &str = "lcp_rights";

/// Durable key-value storage used by the rights service
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// All entries of a vault, in no particular order
    async fn enumerate_vault(&self, vault_id: &str) -> LcpResult<Vec<VaultEntry>>;

    async fn get_value(&self, vault_id: &str, key: &str) -> LcpResult<Option<String>>;

    async fn set_value(&self, vault_id: &str, key: &str, value: &str) -> LcpResult<()>;
}

/// SQLite-backed vault storage
#[derive(Clone, Debug)]
pub struct SqliteVault {
    pool: Pool,
}

impl SqliteVault {
    /// Open (or create) the vault database
    pub async fn new<P: AsRef<Path>>(db_path: P) -> LcpResult<Self> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vault_entries (
                vault_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (vault_id, key)
            );
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl StorageProvider for SqliteVault {
    async fn enumerate_vault(&self, vault_id: &str) -> LcpResult<Vec<VaultEntry>> {
        let rows = sqlx::query("SELECT key, value FROM vault_entries WHERE vault_id = ?")
            .bind(vault_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| VaultEntry {
                key: row.get("key"),
                value: row.get("value"),
            })
            .collect())
    }

    async fn get_value(&self, vault_id: &str, key: &str) -> LcpResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM vault_entries WHERE vault_id = ? AND key = ?")
            .bind(vault_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn set_value(&self, vault_id: &str, key: &str, value: &str) -> LcpResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vault_entries (vault_id, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(vault_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(vault_id)
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-process vault storage
#[derive(Debug, Default)]
pub struct MemoryVault {
    vaults: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageProvider for MemoryVault {
    async fn enumerate_vault(&self, vault_id: &str) -> LcpResult<Vec<VaultEntry>> {
        Ok(self
            .vaults
            .read()
            .get(vault_id)
            .map(|vault| {
                vault
                    .iter()
                    .map(|(key, value)| VaultEntry::new(key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_value(&self, vault_id: &str, key: &str) -> LcpResult<Option<String>> {
        Ok(self
            .vaults
            .read()
            .get(vault_id)
            .and_then(|vault| vault.get(key).cloned()))
    }

    async fn set_value(&self, vault_id: &str, key: &str, value: &str) -> LcpResult<()> {
        self.vaults
            .write()
            .entry(vault_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
