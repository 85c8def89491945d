// src/history.rs
//! Durable, append-only log of finished generations.
//!
//! The whole list lives in one JSON file and is rewritten on every append.
//! Newest records come first.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::HistoryRecord;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Duplicate history record id: {0}")]
    DuplicateId(String),
}

pub struct HistoryStore {
    path: PathBuf,
    records: Mutex<Vec<HistoryRecord>>,
}

impl HistoryStore {
    /// Loads the log at `path`. A missing or unreadable file yields an empty
    /// history rather than an error.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path).await;
        tracing::info!("📚 Loaded {} history record(s) from {}", records.len(), path.display());
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds `record` at the front and persists the full list.
    pub async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        let mut records = self.records.lock().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(HistoryError::DuplicateId(record.id));
        }

        let mut updated = Vec::with_capacity(records.len() + 1);
        updated.push(record);
        updated.extend(records.iter().cloned());

        persist(&self.path, &updated).await?;
        tracing::debug!("💾 History now holds {} record(s)", updated.len());
        *records = updated;
        Ok(())
    }

    /// Every record, most recent first.
    pub async fn list_all(&self) -> Vec<HistoryRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

async fn load_records(path: &Path) -> Vec<HistoryRecord> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::error!("Failed to read history from {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    if contents.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<HistoryRecord>>(&contents) {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("Failed to parse history from {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

async fn persist(path: &Path, records: &[HistoryRecord]) -> Result<(), HistoryError> {
    let io_err = |source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let json = serde_json::to_vec_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}
