//! Shared types for the LCP client
//!
//! This crate contains the data structures shared between the core
//! library and the CLI: license documents, links, right values, status
//! codes and configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MIME type a publication link must declare before it can be acquired
pub const PUBLICATION_TYPE: &str = "application/epub+zip";

// ============================================================================
// Link Types
// ============================================================================

/// Well-known link relations inside a license document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Publication,
    Hint,
    Status,
    SelfLink,
}

impl LinkKind {
    pub fn as_rel(&self) -> &'static str {
        match self {
            LinkKind::Publication => "publication",
            LinkKind::Hint => "hint",
            LinkKind::Status => "status",
            LinkKind::SelfLink => "self",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_rel())
    }
}

/// A fetchable resource with its declared type and expected digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Hex-encoded digest of the resource (compared case-insensitively)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Link {
    pub fn new(kind: LinkKind, href: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            rel: kind.as_rel().to_string(),
            href: href.into(),
            mime_type: mime_type.into(),
            hash: None,
            length: None,
            title: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// The expected digest, treating an empty string as absent
    pub fn expected_hash(&self) -> Option<&str> {
        self.hash.as_deref().filter(|h| !h.is_empty())
    }
}

/// The link collection of a license
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Links(Vec<Link>);

impl Links {
    pub fn new(links: Vec<Link>) -> Self {
        Self(links)
    }

    pub fn has(&self, kind: LinkKind) -> bool {
        self.get(kind).is_some()
    }

    /// First link with the given relation
    pub fn get(&self, kind: LinkKind) -> Option<&Link> {
        self.0.iter().find(|link| link.rel == kind.as_rel())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Link>> for Links {
    fn from(links: Vec<Link>) -> Self {
        Self(links)
    }
}

// ============================================================================
// License Types
// ============================================================================

/// The user a license is bound to. `id` may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Rights as granted by the publisher in the license document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRights {
    /// Negative values mean unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// JSON license document. Fields this client does not enforce
/// (encryption, signature) are ignored on parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseDocument {
    pub id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: UserInfo,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub rights: LicenseRights,
}

// ============================================================================
// Rights Types
// ============================================================================

/// Identifiers of the rights every license understands
pub mod right_ids {
    pub const PRINT: &str = "print";
    pub const COPY: &str = "copy";
    pub const TTS: &str = "tts";
    pub const START: &str = "start";
    pub const END: &str = "end";
}

/// A consumable counter. Stored as `"-1"` when unlimited, as the
/// decimal count otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RightValue {
    Unlimited,
    Limited(u64),
}

impl RightValue {
    pub fn can_consume(&self, amount: u64) -> bool {
        match self {
            RightValue::Unlimited => true,
            RightValue::Limited(n) => *n >= amount,
        }
    }

    /// Value after consuming `amount`, or `None` if not enough remains
    pub fn consume(&self, amount: u64) -> Option<RightValue> {
        match self {
            RightValue::Unlimited => Some(RightValue::Unlimited),
            RightValue::Limited(n) => n.checked_sub(amount).map(RightValue::Limited),
        }
    }
}

impl From<i64> for RightValue {
    fn from(value: i64) -> Self {
        if value < 0 {
            RightValue::Unlimited
        } else {
            RightValue::Limited(value as u64)
        }
    }
}

impl fmt::Display for RightValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RightValue::Unlimited => f.write_str("-1"),
            RightValue::Limited(n) => write!(f, "{}", n),
        }
    }
}

/// Error returned when a string is not a valid counter encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRightValueError(pub String);

impl fmt::Display for ParseRightValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid right value: {:?}", self.0)
    }
}

impl std::error::Error for ParseRightValueError {}

impl FromStr for RightValue {
    type Err = ParseRightValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "-1" {
            return Ok(RightValue::Unlimited);
        }
        trimmed
            .parse::<u64>()
            .map(RightValue::Limited)
            .map_err(|_| ParseRightValueError(s.to_string()))
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Stable error-code taxonomy reported by every public operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Success,
    CommonFail,
    NoAcquisitionLink,
    PublicationWrongType,
    InvalidFilePath,
    PublicationCorrupted,
    AlreadyStarted,
    Canceled,
    StorageKeyFormat,
    InvalidRightValue,
    LicenseFormat,
    Network,
    Io,
    Database,
    Serialization,
    StorageNotConfigured,
    RightsCapabilityDenied,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Acquisition lifecycle as reported to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AcquisitionEvent {
    Started,
    Progressed { progress: f32 },
    Canceled,
    Ended {
        code: StatusCode,
        message: Option<String>,
    },
}

// ============================================================================
// Storage Types
// ============================================================================

/// One key/value pair of a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub key: String,
    pub value: String,
}

impl VaultEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LcpConfig {
    /// Substituted into storage keys for licenses without a bound user
    pub unknown_user_id: String,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Minimum delay between two progress events of one download
    pub progress_interval_ms: u64,
}

impl Default for LcpConfig {
    fn default() -> Self {
        Self {
            unknown_user_id: "unknown_user".to_string(),
            user_agent: format!("lcp-client/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: 30,
            read_timeout_secs: 120,
            progress_interval_ms: 250,
        }
    }
}
