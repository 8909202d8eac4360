//! Idempotent task journal: task id to the result of its first completion.
//!
//! A journal is shared by everything evaluating within one run (including the
//! concurrent branches of a `pmap`), and is the artifact a caller persists to
//! resume a run later. The persisted layout is a plain JSON object whose values
//! use the [`Value`] JSON mapping.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::value::Value;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("journal must be a JSON object, found {0}")]
    NotAnObject(String),
}

pub type JournalResult<T> = Result<T, JournalError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "BTreeMap<String, Value>", from = "BTreeMap<String, Value>")]
pub struct Journal {
    entries: Arc<DashMap<String, Value>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores the first completion of `key` and returns the value that is now
    /// on record. A later writer for the same key gets the earlier value back.
    pub fn record(&self, key: &str, value: Value) -> Value {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                warn!(key, "task key completed twice, keeping the first result");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                debug!(key, "recorded task");
                slot.insert(value.clone());
                value
            }
        }
    }

    /// Adds or replaces an entry from outside the evaluator, e.g. a human
    /// decision keyed by a convention the program builds with `str`.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// An independent copy; writes to it are not seen by `self`.
    pub fn detached(&self) -> Self {
        Self::from(self.snapshot())
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().to_json()))
                .collect(),
        )
    }

    pub fn from_json(json: &serde_json::Value) -> JournalResult<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(Self::from(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect::<BTreeMap<_, _>>(),
            )),
            other => Err(JournalError::NotAnObject(other.to_string())),
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(entries = self.len()))]
    pub fn save<P: AsRef<Path> + std::fmt::Debug>(&self, path: P) -> JournalResult<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.to_json())?;
        Ok(())
    }

    #[tracing::instrument(level = "debug")]
    pub fn load<P: AsRef<Path> + std::fmt::Debug>(path: P) -> JournalResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let json: serde_json::Value = serde_json::from_reader(reader)?;
        Self::from_json(&json)
    }
}

impl From<BTreeMap<String, Value>> for Journal {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self {
            entries: Arc::new(entries.into_iter().collect()),
        }
    }
}

impl From<Journal> for BTreeMap<String, Value> {
    fn from(journal: Journal) -> Self {
        journal.snapshot()
    }
}

impl PartialEq for Journal {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}
