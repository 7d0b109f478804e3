//! Persistence and enforcement of license rights
//!
//! Right values are stored one per vault key:
//! `<provider>@<userId>@<licenseId>@<rightId>`. The service keeps no state
//! of its own; values live in the license's [`RightsManager`] and are
//! mirrored to the vault on every change.

use crate::error::{LcpError, LcpResult};
use crate::license::License;
use crate::rights::{RightState, RightsManager};
use crate::vault::{StorageProvider, LICENSE_RIGHTS_VAULT_ID};
use std::sync::Arc;
use tracing::{debug, info};

/// Separator between the components of a storage key
pub const KEY_SEPARATOR: char = '@';

/// Key prefix shared by every right of one license and user
pub fn rights_key_prefix(provider: &str, user_id: &str, license_id: &str) -> String {
    format!(
        "{provider}{sep}{user_id}{sep}{license_id}",
        sep = KEY_SEPARATOR
    )
}

/// Storage key of a single right
pub fn rights_key(provider: &str, user_id: &str, license_id: &str, right_id: &str) -> String {
    format!(
        "{}{}{}",
        rights_key_prefix(provider, user_id, license_id),
        KEY_SEPARATOR,
        right_id
    )
}

/// Right id of a storage key: the text after the last separator
pub fn extract_right_id(key: &str) -> LcpResult<&str> {
    match key.rsplit_once(KEY_SEPARATOR) {
        Some((_, right_id)) if !right_id.is_empty() => Ok(right_id),
        _ => Err(LcpError::StorageKeyFormat(key.to_string())),
    }
}

/// Syncs, checks and consumes rights, persisting them to a vault
#[derive(Clone)]
pub struct RightsService {
    storage: Option<Arc<dyn StorageProvider>>,
    unknown_user_id: String,
}

impl RightsService {
    pub fn new(
        storage: Option<Arc<dyn StorageProvider>>,
        unknown_user_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            unknown_user_id: unknown_user_id.into(),
        }
    }

    pub fn unknown_user_id(&self) -> &str {
        &self.unknown_user_id
    }

    /// Load every persisted right of the license into its rights manager
    pub async fn sync_rights_from_storage(&self, license: &License) -> LcpResult<()> {
        let (storage, manager) = self.perform_checks(license)?;
        let prefix = self.build_prefix(license);

        let entries = storage.enumerate_vault(LICENSE_RIGHTS_VAULT_ID).await?;

        // Nothing is applied unless every entry parses.
        let mut staged = Vec::new();
        for entry in entries {
            let belongs = entry
                .key
                .strip_prefix(prefix.as_str())
                .map(|rest| rest.starts_with(KEY_SEPARATOR))
                .unwrap_or(false);
            if !belongs {
                continue;
            }

            let right_id = extract_right_id(&entry.key)?;
            debug!("Loading right {} = {}", right_id, entry.value);
            staged.push((right_id.to_string(), RightState::parse(right_id, &entry.value)?));
        }

        let loaded = staged.len();
        let mut table = manager.lock().await;
        for (right_id, state) in staged {
            table.set_state(&right_id, state);
        }

        info!("Synced {} right(s) for license {}", loaded, license.id());
        Ok(())
    }

    pub async fn can_use_right(&self, license: &License, right_id: &str) -> LcpResult<bool> {
        let (_, manager) = self.perform_checks(license)?;
        Ok(manager.can_use(right_id).await)
    }

    /// Consume one unit of a right
    pub async fn use_right(&self, license: &License, right_id: &str) -> LcpResult<bool> {
        self.use_right_by(license, right_id, 1).await
    }

    /// Consume `amount` units of a right. On success the new value is
    /// written to the vault; on refusal nothing is written.
    pub async fn use_right_by(
        &self,
        license: &License,
        right_id: &str,
        amount: u64,
    ) -> LcpResult<bool> {
        let (storage, manager) = self.perform_checks(license)?;

        // Held until the vault write completes.
        let mut table = manager.lock().await;
        let previous = table.get(right_id).cloned();
        if !table.use_right(right_id, amount) {
            debug!("Right {} refused for license {}", right_id, license.id());
            return Ok(false);
        }

        let value = table.value(right_id).unwrap_or_default();
        let key = self.build_key(license, right_id);
        if let Err(e) = storage.set_value(LICENSE_RIGHTS_VAULT_ID, &key, &value).await {
            table.restore(right_id, previous);
            return Err(e);
        }

        info!("Used {} x {} for license {}, now {}", amount, right_id, license.id(), value);
        Ok(true)
    }

    /// Override a right regardless of its current state
    pub async fn set_value(&self, license: &License, right_id: &str, value: &str) -> LcpResult<()> {
        let (storage, manager) = self.perform_checks(license)?;

        let mut table = manager.lock().await;
        let previous = table.get(right_id).cloned();
        table.set_value(right_id, value)?;

        // The vault receives the canonical encoding held in memory.
        let encoded = table.value(right_id).unwrap_or_default();
        let key = self.build_key(license, right_id);
        if let Err(e) = storage.set_value(LICENSE_RIGHTS_VAULT_ID, &key, &encoded).await {
            table.restore(right_id, previous);
            return Err(e);
        }

        info!("Set {} = {} for license {}", right_id, encoded, license.id());
        Ok(())
    }

    /// Current value of a right, from either a managed or read-only license
    pub async fn get_value(&self, license: &License, right_id: &str) -> Option<String> {
        license.rights().value(right_id).await
    }

    pub fn build_key(&self, license: &License, right_id: &str) -> String {
        rights_key(
            license.provider(),
            self.effective_user_id(license),
            license.id(),
            right_id,
        )
    }

    pub fn build_prefix(&self, license: &License) -> String {
        rights_key_prefix(
            license.provider(),
            self.effective_user_id(license),
            license.id(),
        )
    }

    fn effective_user_id<'a>(&'a self, license: &'a License) -> &'a str {
        let user_id = license.user().id.as_str();
        if user_id.is_empty() {
            &self.unknown_user_id
        } else {
            user_id
        }
    }

    fn perform_checks<'a>(
        &'a self,
        license: &'a License,
    ) -> LcpResult<(&'a Arc<dyn StorageProvider>, &'a Arc<RightsManager>)> {
        let storage = self.storage.as_ref().ok_or(LcpError::StorageNotConfigured)?;
        let manager = license.rights_manager()?;
        Ok((storage, manager))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::{Rights, RightsMode};
    use crate::rights::RightsTable;
    use crate::vault::MemoryVault;
    use async_trait::async_trait;
    use lcp_types::{right_ids, LicenseDocument, LicenseRights, Links, UserInfo, VaultEntry};

    const PROVIDER: &str = "https://provider.example";

    fn license(user_id: &str, rights: LicenseRights) -> License {
        License::new(
            "lic-1",
            PROVIDER,
            UserInfo {
                id: user_id.to_string(),
                ..Default::default()
            },
            Links::default(),
            Rights::Managed(Arc::new(RightsManager::new(
                RightsTable::from_license_rights(&rights),
            ))),
        )
    }

    fn print_limited(n: i64) -> LicenseRights {
        LicenseRights {
            print: Some(n),
            ..Default::default()
        }
    }

    fn service(vault: Arc<MemoryVault>) -> RightsService {
        RightsService::new(Some(vault as Arc<dyn StorageProvider>), "U")
    }

    #[test]
    fn key_uses_unknown_user_fallback() {
        let svc = RightsService::new(None, "U");
        assert_eq!(svc.build_key(&license("", print_limited(1)), "R"), format!("{}@U@lic-1@R", PROVIDER));
        assert_eq!(rights_key("P", "Alice", "L", "R"), "P@Alice@L@R");
        assert_eq!(rights_key_prefix("P", "U", "L"), "P@U@L");
    }

    #[test]
    fn extracts_tail_after_last_separator() {
        assert_eq!(extract_right_id("P@Alice@L@R").unwrap(), "R");
        assert!(matches!(
            extract_right_id("noseparator"),
            Err(LcpError::StorageKeyFormat(_))
        ));
        assert!(extract_right_id("P@Alice@L@").is_err());
    }

    #[tokio::test]
    async fn sync_loads_only_this_license() {
        let vault = Arc::new(MemoryVault::new());
        let prefix = format!("{}@alice@lic-1", PROVIDER);
        vault.set_value(LICENSE_RIGHTS_VAULT_ID, &format!("{prefix}@print"), "2").await.unwrap();
        vault.set_value(LICENSE_RIGHTS_VAULT_ID, &format!("{prefix}@share"), "7").await.unwrap();
        vault
            .set_value(LICENSE_RIGHTS_VAULT_ID, &format!("{prefix}-other@copy"), "0")
            .await
            .unwrap();
        vault
            .set_value(LICENSE_RIGHTS_VAULT_ID, &format!("x{PROVIDER}@alice@lic-1@copy"), "0")
            .await
            .unwrap();

        let svc = service(vault);
        let lic = license("alice", LicenseRights::default());
        svc.sync_rights_from_storage(&lic).await.unwrap();

        assert_eq!(svc.get_value(&lic, right_ids::PRINT).await.as_deref(), Some("2"));
        assert_eq!(svc.get_value(&lic, "share").await.as_deref(), Some("7"));
        assert_eq!(svc.get_value(&lic, right_ids::COPY).await.as_deref(), Some("-1"));
        assert!(svc.can_use_right(&lic, right_ids::COPY).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_entry_fails_sync() {
        let vault = Arc::new(MemoryVault::new());
        vault
            .set_value(LICENSE_RIGHTS_VAULT_ID, &format!("{}@U@lic-1@", PROVIDER), "1")
            .await
            .unwrap();

        let err = service(vault)
            .sync_rights_from_storage(&license("", LicenseRights::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, LcpError::StorageKeyFormat(_)));
    }

    #[tokio::test]
    async fn failed_sync_leaves_rights_untouched() {
        let vault = Arc::new(MemoryVault::new());
        let prefix = format!("{}@U@lic-1", PROVIDER);
        vault.set_value(LICENSE_RIGHTS_VAULT_ID, &format!("{prefix}@copy"), "0").await.unwrap();
        vault.set_value(LICENSE_RIGHTS_VAULT_ID, &format!("{prefix}@print"), "bogus").await.unwrap();

        let svc = service(vault);
        let lic = license("", LicenseRights::default());
        let err = svc.sync_rights_from_storage(&lic).await.unwrap_err();

        assert!(matches!(err, LcpError::InvalidRightValue { .. }));
        assert_eq!(svc.get_value(&lic, right_ids::COPY).await.as_deref(), Some("-1"));
        assert_eq!(svc.get_value(&lic, right_ids::PRINT).await.as_deref(), Some("-1"));
    }

    #[tokio::test]
    async fn set_value_stores_canonical_encoding() {
        let vault = Arc::new(MemoryVault::new());
        let svc = service(vault.clone());
        let lic = license("alice", LicenseRights::default());

        svc.set_value(&lic, right_ids::END, "2030-01-01T00:00:00Z").await.unwrap();
        svc.set_value(&lic, right_ids::PRINT, " 5 ").await.unwrap();

        for right in [right_ids::END, right_ids::PRINT] {
            let stored = vault
                .get_value(LICENSE_RIGHTS_VAULT_ID, &svc.build_key(&lic, right))
                .await
                .unwrap();
            assert_eq!(stored, svc.get_value(&lic, right).await);
        }
        assert_eq!(
            svc.get_value(&lic, right_ids::END).await.as_deref(),
            Some("2030-01-01T00:00:00+00:00")
        );

        let reopened = license("alice", LicenseRights::default());
        svc.sync_rights_from_storage(&reopened).await.unwrap();
        assert_eq!(
            svc.get_value(&reopened, right_ids::END).await,
            svc.get_value(&lic, right_ids::END).await
        );
    }

    #[tokio::test]
    async fn use_right_persists_and_stops_at_zero() {
        let vault = Arc::new(MemoryVault::new());
        let svc = service(vault.clone());
        let lic = license("alice", print_limited(1));
        let key = svc.build_key(&lic, right_ids::PRINT);

        assert!(svc.use_right(&lic, right_ids::PRINT).await.unwrap());
        assert_eq!(
            vault.get_value(LICENSE_RIGHTS_VAULT_ID, &key).await.unwrap().as_deref(),
            Some("0")
        );

        assert!(!svc.use_right(&lic, right_ids::PRINT).await.unwrap());
        assert!(!svc.can_use_right(&lic, right_ids::PRINT).await.unwrap());
        assert_eq!(
            vault.get_value(LICENSE_RIGHTS_VAULT_ID, &key).await.unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn refused_use_writes_nothing() {
        let vault = Arc::new(MemoryVault::new());
        let svc = service(vault.clone());
        let lic = license("alice", print_limited(2));

        assert!(!svc.use_right_by(&lic, right_ids::PRINT, 3).await.unwrap());
        assert!(vault.enumerate_vault(LICENSE_RIGHTS_VAULT_ID).await.unwrap().is_empty());
        assert_eq!(svc.get_value(&lic, right_ids::PRINT).await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn set_value_overrides_exhausted_right() {
        let vault = Arc::new(MemoryVault::new());
        let svc = service(vault.clone());
        let lic = license("", print_limited(0));

        svc.set_value(&lic, right_ids::COPY, "5").await.unwrap();
        svc.set_value(&lic, right_ids::PRINT, "5").await.unwrap();

        assert_eq!(svc.get_value(&lic, right_ids::COPY).await.as_deref(), Some("5"));
        assert!(svc.can_use_right(&lic, right_ids::PRINT).await.unwrap());
        assert_eq!(
            vault.enumerate_vault(LICENSE_RIGHTS_VAULT_ID).await.unwrap().len(),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_use_never_over_consumes() {
        let vault = Arc::new(MemoryVault::new());
        let svc = service(vault.clone());
        let lic = Arc::new(license("alice", print_limited(1)));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let svc = svc.clone();
            let lic = Arc::clone(&lic);
            tasks.push(tokio::spawn(async move {
                svc.use_right(&lic, right_ids::PRINT).await.unwrap()
            }));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(
            vault
                .get_value(LICENSE_RIGHTS_VAULT_ID, &svc.build_key(&lic, right_ids::PRINT))
                .await
                .unwrap()
                .as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn integration_errors_are_reported() {
        let lic = license("alice", print_limited(1));
        let err = RightsService::new(None, "U")
            .use_right(&lic, right_ids::PRINT)
            .await
            .unwrap_err();
        assert!(matches!(err, LcpError::StorageNotConfigured));

        let document: LicenseDocument = serde_json::from_str(
            r#"{"id": "lic-2", "provider": "p", "rights": {"print": 4}}"#,
        )
        .unwrap();
        let read_only = License::from_document(document, RightsMode::ReadOnly).unwrap();
        let svc = service(Arc::new(MemoryVault::new()));
        let err = svc.can_use_right(&read_only, right_ids::PRINT).await.unwrap_err();
        assert!(err.is_integration());
        assert_eq!(svc.get_value(&read_only, right_ids::PRINT).await.as_deref(), Some("4"));
    }

    /// Vault that rejects every write
    struct FailingVault;

    #[async_trait]
    impl StorageProvider for FailingVault {
        async fn enumerate_vault(&self, _vault_id: &str) -> LcpResult<Vec<VaultEntry>> {
            Ok(Vec::new())
        }

        async fn get_value(&self, _vault_id: &str, _key: &str) -> LcpResult<Option<String>> {
            Ok(None)
        }

        async fn set_value(&self, _vault_id: &str, _key: &str, _value: &str) -> LcpResult<()> {
            Err(LcpError::Fail("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_write_rolls_back_memory() {
        let svc = RightsService::new(Some(Arc::new(FailingVault)), "U");
        let lic = license("alice", print_limited(1));

        assert!(svc.use_right(&lic, right_ids::PRINT).await.is_err());
        assert_eq!(svc.get_value(&lic, right_ids::PRINT).await.as_deref(), Some("1"));

        assert!(svc.set_value(&lic, "share", "9").await.is_err());
        assert_eq!(svc.get_value(&lic, "share").await, None);
    }
}
