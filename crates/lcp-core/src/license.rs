//! License model consumed by acquisition and the rights service

use crate::error::{LcpError, LcpResult};
use crate::rights::{RightsManager, RightsTable, RightsView};
use chrono::{DateTime, Utc};
use lcp_types::{LicenseDocument, Links, UserInfo};
use std::sync::Arc;

/// Access to the rights of a license, fixed when the license is built.
#[derive(Debug, Clone)]
pub enum Rights {
    /// Read-only snapshot; consumption and overrides are refused
    View(RightsView),
    /// Mutable rights that the rights service may sync, consume and override
    Managed(Arc<RightsManager>),
}

impl Rights {
    pub async fn value(&self, right_id: &str) -> Option<String> {
        match self {
            Rights::View(view) => view.value(right_id).map(str::to_string),
            Rights::Managed(manager) => manager.value(right_id).await,
        }
    }

    pub async fn snapshot(&self) -> RightsView {
        match self {
            Rights::View(view) => view.clone(),
            Rights::Managed(manager) => manager.snapshot().await,
        }
    }
}

/// How rights of a parsed license are exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RightsMode {
    ReadOnly,
    #[default]
    Managed,
}

/// A license identified by (provider, id), bound to a user
#[derive(Debug, Clone)]
pub struct License {
    id: String,
    provider: String,
    issued: Option<DateTime<Utc>>,
    user: UserInfo,
    links: Links,
    rights: Rights,
}

impl License {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        user: UserInfo,
        links: Links,
        rights: Rights,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            issued: None,
            user,
            links,
            rights,
        }
    }

    /// Build a license from its document, seeding rights from the grants
    pub fn from_document(document: LicenseDocument, mode: RightsMode) -> LcpResult<Self> {
        if document.id.is_empty() {
            return Err(LcpError::LicenseFormat("missing license id".to_string()));
        }
        if document.provider.is_empty() {
            return Err(LcpError::LicenseFormat("missing provider".to_string()));
        }

        let table = RightsTable::from_license_rights(&document.rights);
        let rights = match mode {
            RightsMode::ReadOnly => Rights::View(RightsView::new(table.encoded())),
            RightsMode::Managed => Rights::Managed(Arc::new(RightsManager::new(table))),
        };

        Ok(Self {
            id: document.id,
            provider: document.provider,
            issued: document.issued,
            user: document.user,
            links: document.links,
            rights,
        })
    }

    /// Parse a JSON license document with managed rights
    pub fn from_json(json: &str) -> LcpResult<Self> {
        let document: LicenseDocument = serde_json::from_str(json)?;
        Self::from_document(document, RightsMode::Managed)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn issued(&self) -> Option<DateTime<Utc>> {
        self.issued
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn rights(&self) -> &Rights {
        &self.rights
    }

    /// The rights manager, or `RightsCapabilityDenied` for read-only rights
    pub fn rights_manager(&self) -> LcpResult<&Arc<RightsManager>> {
        match &self.rights {
            Rights::Managed(manager) => Ok(manager),
            Rights::View(_) => Err(LcpError::RightsCapabilityDenied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcp_types::{right_ids, LinkKind};

    const LICENSE: &str = r#"{
        "id": "lic-42",
        "provider": "https://books.example",
        "issued": "2024-03-01T10:00:00Z",
        "user": {"id": "alice"},
        "links": [{"rel": "publication", "href": "https://cdn.example/a.epub", "type": "application/epub+zip"}],
        "rights": {"print": 3}
    }"#;

    #[tokio::test]
    async fn parses_managed_license() {
        let license = License::from_json(LICENSE).unwrap();
        assert_eq!(license.id(), "lic-42");
        assert_eq!(license.provider(), "https://books.example");
        assert_eq!(
            license.issued().map(|at| at.to_rfc3339()).as_deref(),
            Some("2024-03-01T10:00:00+00:00")
        );
        assert!(license.links().has(LinkKind::Publication));
        assert!(license.rights_manager().is_ok());
        assert_eq!(
            license.rights().value(right_ids::PRINT).await.as_deref(),
            Some("3")
        );
    }

    #[tokio::test]
    async fn read_only_license_denies_manager() {
        let document: LicenseDocument = serde_json::from_str(LICENSE).unwrap();
        let license = License::from_document(document, RightsMode::ReadOnly).unwrap();
        let err = license.rights_manager().unwrap_err();
        assert!(err.is_integration());
        assert_eq!(
            license.rights().value(right_ids::PRINT).await.as_deref(),
            Some("3")
        );
    }

    #[test]
    fn rejects_license_without_provider() {
        let err = License::from_json(r#"{"id": "x", "provider": ""}"#).unwrap_err();
        assert!(matches!(err, LcpError::LicenseFormat(_)));
    }
}
