//! Persisted document schema and the document store boundary.
//!
//! The remote store is an external collaborator; only the schema is ours.
//! Layout: collection `sessions` keyed by session id, sub-collection
//! `sessions/{id}/batches` with one document per flush.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::samples::LogEntry;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store rejected write: {0}")]
    Rejected(String),
}

/// Parent record, written once per started session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDoc {
    pub created_at: i64,
    pub session_id: String,
    pub status: String,
    pub vehicletype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One flush cycle's worth of buffered samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDoc {
    /// Flush time, epoch millis.
    pub timestamp: i64,
    pub data: Vec<LogEntry>,
    /// Vertical acceleration projection, parallel to `data`.
    pub y_values: Vec<f64>,
    /// Last known fix at flush time.
    pub location: GeoPoint,
    /// Last smoothed speed at flush time, km/h.
    pub speed: f64,
    pub vehicletype: String,
}

impl BatchDoc {
    pub fn from_entries(
        timestamp: i64,
        data: Vec<LogEntry>,
        location: GeoPoint,
        speed: f64,
        vehicletype: String,
    ) -> Self {
        let y_values = data.iter().map(|e| e.y).collect();
        BatchDoc {
            timestamp,
            data,
            y_values,
            location,
            speed,
            vehicletype,
        }
    }
}

/// Write boundary to the document store.
///
/// Create/add semantics only; this subsystem never updates or deletes remote
/// documents. Implementations must be safe to call from spawned tasks.
pub trait DocumentStore: Send + Sync {
    fn create_session(&self, doc: &SessionDoc) -> Result<(), StoreError>;
    fn append_batch(&self, session_id: &str, batch: &BatchDoc) -> Result<(), StoreError>;
}

/// In-memory store used by tests and as a sink when persistence is disabled.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    sessions: HashMap<String, SessionDoc>,
    batches: HashMap<String, Vec<BatchDoc>>,
    write_count: u64,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, for exercising failure paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    pub fn session(&self, session_id: &str) -> Option<SessionDoc> {
        self.inner.lock().unwrap().sessions.get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn batches(&self, session_id: &str) -> Vec<BatchDoc> {
        self.inner
            .lock()
            .unwrap()
            .batches
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total writes attempted and accepted (sessions + batches).
    pub fn write_count(&self) -> u64 {
        self.inner.lock().unwrap().write_count
    }
}

impl DocumentStore for MemoryStore {
    fn create_session(&self, doc: &SessionDoc) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(StoreError::Rejected("simulated failure".to_string()));
        }
        inner.write_count += 1;
        inner.sessions.insert(doc.session_id.clone(), doc.clone());
        Ok(())
    }

    fn append_batch(&self, session_id: &str, batch: &BatchDoc) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(StoreError::Rejected("simulated failure".to_string()));
        }
        inner.write_count += 1;
        inner
            .batches
            .entry(session_id.to_string())
            .or_default()
            .push(batch.clone());
        Ok(())
    }
}

/// Store that mirrors the remote layout onto a local directory as JSON files:
/// `{root}/sessions/{id}.json` and `{root}/sessions/{id}/batches/{ts}.json`.
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("sessions"))?;
        Ok(JsonDirStore { root })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join("sessions").join(format!("{session_id}.json"))
    }

    fn batch_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("sessions").join(session_id).join("batches")
    }
}

impl DocumentStore for JsonDirStore {
    fn create_session(&self, doc: &SessionDoc) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(doc)?;
        fs::write(self.session_path(&doc.session_id), json)?;
        Ok(())
    }

    fn append_batch(&self, session_id: &str, batch: &BatchDoc) -> Result<(), StoreError> {
        let dir = self.batch_dir(session_id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(batch)?;
        fs::write(dir.join(format!("{}.json", batch.timestamp)), json)?;
        Ok(())
    }
}
