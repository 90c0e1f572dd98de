//! Bounded generation history persisted to a key-value substrate.
//!
//! The store keeps the newest [`MAX_RECORDS`] generations in memory and
//! mirrors them into a [`KvSubstrate`] after every mutation. When the
//! substrate rejects a write for capacity reasons the image payload of the
//! newest record is dropped from the persisted copy and the write is retried
//! once. The in-memory log always keeps the full payload, so the substrate may
//! hold a degraded or stale snapshot while the current session stays complete.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::content::{GeneratedContent, SeedInput};

pub mod substrate;

pub use substrate::{
    DEFAULT_QUOTA_BYTES, FileSubstrate, KvSubstrate, MemorySubstrate, SubstrateError,
};

pub const MAX_RECORDS: usize = 50;
pub const DEFAULT_HISTORY_KEY: &str = "agri_content_history";

/// One logged generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    pub input: SeedInput,
    #[serde(rename = "result")]
    pub output: GeneratedContent,
}

impl HistoryRecord {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistFailure {
    CapacityExceeded,
    PersistenceUnavailable,
}

impl PersistFailure {
    fn from_error(err: &SubstrateError) -> Self {
        if err.is_capacity() {
            PersistFailure::CapacityExceeded
        } else {
            PersistFailure::PersistenceUnavailable
        }
    }
}

/// What happened to the persisted snapshot during one persist attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub ok: bool,
    pub degraded: bool,
    #[serde(default)]
    pub failure: Option<PersistFailure>,
}

impl PersistOutcome {
    pub fn persisted() -> Self {
        Self {
            ok: true,
            degraded: false,
            failure: None,
        }
    }

    pub fn degraded() -> Self {
        Self {
            ok: true,
            degraded: true,
            failure: None,
        }
    }

    pub fn failed(degraded: bool, failure: PersistFailure) -> Self {
        Self {
            ok: false,
            degraded,
            failure: Some(failure),
        }
    }
}

pub struct BoundedHistoryStore {
    key: String,
    substrate: Arc<dyn KvSubstrate>,
    records: Vec<HistoryRecord>,
    last_issued_id: i64,
    last_persist: Option<PersistOutcome>,
}

impl BoundedHistoryStore {
    /// Create a store for `key` and hydrate it from the substrate.
    pub fn open(key: impl Into<String>, substrate: Arc<dyn KvSubstrate>) -> Self {
        let mut store = Self {
            key: key.into(),
            substrate,
            records: Vec::new(),
            last_issued_id: 0,
            last_persist: None,
        };
        store.records = store.load();
        store.last_issued_id = store
            .records
            .iter()
            .filter_map(|record| record.id.parse::<i64>().ok())
            .max()
            .unwrap_or_default();
        store
    }

    /// Read the persisted snapshot. Missing, unreadable and corrupt snapshots
    /// all yield an empty log.
    pub fn load(&self) -> Vec<HistoryRecord> {
        let raw = match self.substrate.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to read history snapshot");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<HistoryRecord>>(&raw) {
            Ok(mut records) => {
                if records.len() > MAX_RECORDS {
                    warn!(
                        key = %self.key,
                        len = records.len(),
                        "history snapshot exceeds cap; keeping newest records"
                    );
                    records.truncate(MAX_RECORDS);
                }
                records
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "discarding unparseable history snapshot");
                Vec::new()
            }
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Live log, newest first.
    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&HistoryRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Outcome of the persist triggered by the latest `append` or `remove`.
    pub fn last_persist(&self) -> Option<PersistOutcome> {
        self.last_persist
    }

    pub fn append(&mut self, input: SeedInput, output: GeneratedContent) -> HistoryRecord {
        self.append_at(input, output, Utc::now().timestamp_millis())
    }

    fn append_at(
        &mut self,
        input: SeedInput,
        output: GeneratedContent,
        now_ms: i64,
    ) -> HistoryRecord {
        let id = self.next_id(now_ms);
        let record = HistoryRecord {
            id: id.to_string(),
            created_at: now_ms,
            input,
            output,
        };

        self.records.insert(0, record.clone());
        self.records.truncate(MAX_RECORDS);

        let outcome = self.persist(&self.records);
        debug!(
            key = %self.key,
            id = %record.id,
            ok = outcome.ok,
            degraded = outcome.degraded,
            "history record appended"
        );
        self.last_persist = Some(outcome);
        record
    }

    pub fn remove(&mut self, id: &str) -> &[HistoryRecord] {
        self.records.retain(|record| record.id != id);
        let outcome = self.persist(&self.records);
        self.last_persist = Some(outcome);
        &self.records
    }

    /// Write `log` to the substrate, degrading the newest record's image on a
    /// capacity failure. Never fails; the outcome describes what was stored.
    pub fn persist(&self, log: &[HistoryRecord]) -> PersistOutcome {
        let err = match self.write_snapshot(log) {
            Ok(()) => return PersistOutcome::persisted(),
            Err(err) => err,
        };

        if !err.is_capacity() {
            error!(key = %self.key, error = %err, "failed to persist history");
            return PersistOutcome::failed(false, PersistFailure::PersistenceUnavailable);
        }

        if log.is_empty() {
            error!(key = %self.key, error = %err, "storage rejected an empty history snapshot");
            return PersistOutcome::failed(false, PersistFailure::CapacityExceeded);
        }

        warn!(
            key = %self.key,
            error = %err,
            "storage quota exceeded; retrying without image of newest record"
        );

        let mut snapshot: Vec<Cow<'_, HistoryRecord>> = log.iter().map(Cow::Borrowed).collect();
        if let Some(newest) = snapshot.first_mut() {
            newest.to_mut().output.image_base64 = None;
        }

        match self.write_snapshot(&snapshot) {
            Ok(()) => PersistOutcome::degraded(),
            Err(retry_err) => {
                error!(
                    key = %self.key,
                    error = %retry_err,
                    "history still not persisted after dropping image; keeping session copy only"
                );
                PersistOutcome::failed(true, PersistFailure::from_error(&retry_err))
            }
        }
    }

    fn write_snapshot<T: Serialize + ?Sized>(&self, snapshot: &T) -> Result<(), SubstrateError> {
        let serialized =
            serde_json::to_string(snapshot).map_err(|err| SubstrateError::Io(err.into()))?;
        self.substrate.set(&self.key, &serialized)
    }

    // A stored id at i64::MAX restarts the counter from the clock.
    fn next_id(&mut self, now_ms: i64) -> i64 {
        let id = match self.last_issued_id.checked_add(1) {
            Some(next) => now_ms.max(next),
            None => now_ms,
        };
        self.last_issued_id = id;
        id
    }
}
