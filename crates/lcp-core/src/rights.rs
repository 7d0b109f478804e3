//! In-memory rights state of one license
//!
//! Counters (`print`, `copy`, numeric custom rights) are consumable,
//! `tts` is a flag and `start`/`end` bound the usage window. Everything
//! else is kept as opaque text and is never usable.

use crate::error::{LcpError, LcpResult};
use chrono::{DateTime, Utc};
use lcp_types::{right_ids, LicenseRights, RightValue};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, MutexGuard};

/// Parsed value of a single right
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RightState {
    Counter(RightValue),
    Flag(bool),
    Instant(DateTime<Utc>),
    Text(String),
}

impl RightState {
    /// Parse the string encoding of `right_id`
    pub fn parse(right_id: &str, raw: &str) -> LcpResult<Self> {
        let invalid = || LcpError::InvalidRightValue {
            right_id: right_id.to_string(),
            value: raw.to_string(),
        };

        match right_id {
            right_ids::PRINT | right_ids::COPY => {
                raw.parse().map(RightState::Counter).map_err(|_| invalid())
            }
            right_ids::TTS => raw.trim().parse().map(RightState::Flag).map_err(|_| invalid()),
            right_ids::START | right_ids::END => DateTime::parse_from_rfc3339(raw.trim())
                .map(|dt| RightState::Instant(dt.with_timezone(&Utc)))
                .map_err(|_| invalid()),
            _ => Ok(raw
                .parse()
                .map(RightState::Counter)
                .unwrap_or_else(|_| RightState::Text(raw.to_string()))),
        }
    }

    /// String encoding, as written to the vault
    pub fn encode(&self) -> String {
        match self {
            RightState::Counter(value) => value.to_string(),
            RightState::Flag(flag) => flag.to_string(),
            RightState::Instant(at) => at.to_rfc3339(),
            RightState::Text(text) => text.clone(),
        }
    }
}

/// Rights table guarded by [`RightsManager`]
#[derive(Debug, Clone, Default)]
pub struct RightsTable {
    entries: HashMap<String, RightState>,
}

impl RightsTable {
    /// Table with the defaults of a license that restricts nothing
    pub fn with_defaults() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            right_ids::PRINT.to_string(),
            RightState::Counter(RightValue::Unlimited),
        );
        entries.insert(
            right_ids::COPY.to_string(),
            RightState::Counter(RightValue::Unlimited),
        );
        entries.insert(right_ids::TTS.to_string(), RightState::Flag(true));
        Self { entries }
    }

    /// Defaults overridden by the rights granted in a license document
    pub fn from_license_rights(rights: &LicenseRights) -> Self {
        let mut table = Self::with_defaults();
        if let Some(print) = rights.print {
            table.insert(right_ids::PRINT, RightState::Counter(print.into()));
        }
        if let Some(copy) = rights.copy {
            table.insert(right_ids::COPY, RightState::Counter(copy.into()));
        }
        if let Some(tts) = rights.tts {
            table.insert(right_ids::TTS, RightState::Flag(tts));
        }
        if let Some(start) = rights.start {
            table.insert(right_ids::START, RightState::Instant(start));
        }
        if let Some(end) = rights.end {
            table.insert(right_ids::END, RightState::Instant(end));
        }
        table
    }

    fn insert(&mut self, right_id: &str, state: RightState) {
        self.entries.insert(right_id.to_string(), state);
    }

    pub fn get(&self, right_id: &str) -> Option<&RightState> {
        self.entries.get(right_id)
    }

    /// Encoded value of a right
    pub fn value(&self, right_id: &str) -> Option<String> {
        self.entries.get(right_id).map(RightState::encode)
    }

    /// Overwrite a right from its string encoding
    pub fn set_value(&mut self, right_id: &str, raw: &str) -> LcpResult<()> {
        let state = RightState::parse(right_id, raw)?;
        self.insert(right_id, state);
        Ok(())
    }

    pub fn set_state(&mut self, right_id: &str, state: RightState) {
        self.insert(right_id, state);
    }

    /// Restore a previous value, removing the right if it had none
    pub fn restore(&mut self, right_id: &str, previous: Option<RightState>) {
        match previous {
            Some(state) => self.insert(right_id, state),
            None => {
                self.entries.remove(right_id);
            }
        }
    }

    pub fn can_use(&self, right_id: &str) -> bool {
        self.can_use_at(right_id, Utc::now())
    }

    pub fn can_use_at(&self, right_id: &str, now: DateTime<Utc>) -> bool {
        match self.entries.get(right_id) {
            Some(RightState::Counter(value)) => value.can_consume(1),
            Some(RightState::Flag(flag)) => *flag,
            Some(RightState::Instant(at)) => match right_id {
                right_ids::START => now >= *at,
                right_ids::END => now <= *at,
                _ => false,
            },
            Some(RightState::Text(_)) => false,
            None => matches!(
                right_id,
                right_ids::PRINT
                    | right_ids::COPY
                    | right_ids::TTS
                    | right_ids::START
                    | right_ids::END
            ),
        }
    }

    /// Consume `amount` units of a counter. Returns false, leaving the
    /// table untouched, when not enough remains or the right is not a counter.
    pub fn use_right(&mut self, right_id: &str, amount: u64) -> bool {
        let Some(RightState::Counter(value)) = self.entries.get(right_id) else {
            return false;
        };
        match value.consume(amount) {
            Some(next) => {
                self.insert(right_id, RightState::Counter(next));
                true
            }
            None => false,
        }
    }

    /// All rights in encoded form, ordered by id
    pub fn encoded(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(id, state)| (id.clone(), state.encode()))
            .collect()
    }
}

/// Authoritative, mutable rights of one license.
///
/// The table is behind an async mutex so that a caller can hold it across
/// a storage write and keep check-then-consume atomic per license.
#[derive(Debug, Default)]
pub struct RightsManager {
    table: Mutex<RightsTable>,
}

impl RightsManager {
    pub fn new(table: RightsTable) -> Self {
        Self {
            table: Mutex::new(table),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, RightsTable> {
        self.table.lock().await
    }

    pub async fn value(&self, right_id: &str) -> Option<String> {
        self.table.lock().await.value(right_id)
    }

    pub async fn can_use(&self, right_id: &str) -> bool {
        self.table.lock().await.can_use(right_id)
    }

    pub async fn snapshot(&self) -> RightsView {
        RightsView::new(self.table.lock().await.encoded())
    }
}

/// Read-only view of rights, without consumption or override
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RightsView {
    values: BTreeMap<String, String>,
}

impl RightsView {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn value(&self, right_id: &str) -> Option<&str> {
        self.values.get(right_id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }
}
