//! Export and restore of the whole store.
//!
//! The export document maps store names to their records,
//! `{"research_data": [ ... ]}`, written as pretty-printed JSON. Restore
//! replaces a store's contents wholesale and keeps record ids verbatim.

use crate::schema::RECORD_STORE;
use crate::store::{DescriptorStore, StoreError};
use chrono::NaiveDate;
use facematch_core::FaceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("malformed backup document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Name an export after the day it was taken.
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("facematch_backup_{}.json", date.format("%Y-%m-%d"))
}

/// Store name → records. Unknown stores are carried as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupDocument {
    stores: BTreeMap<String, serde_json::Value>,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub cleared: usize,
    pub restored: usize,
    /// Store names present in the document that this build does not know.
    pub ignored_stores: Vec<String>,
}

impl BackupDocument {
    pub fn from_records(records: &[FaceRecord]) -> Result<Self, BackupError> {
        let mut stores = BTreeMap::new();
        stores.insert(RECORD_STORE.to_string(), serde_json::to_value(records)?);
        Ok(Self { stores })
    }

    pub fn from_json(raw: &str) -> Result<Self, BackupError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, BackupError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn store_names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// Records of the face store, `None` if the document has no such store.
    pub fn records(&self) -> Result<Option<Vec<FaceRecord>>, BackupError> {
        self.stores
            .get(RECORD_STORE)
            .map(|value| Vec::<FaceRecord>::deserialize(value).map_err(BackupError::from))
            .transpose()
    }
}

/// Snapshot every record into an export document.
pub async fn export(store: &DescriptorStore) -> Result<BackupDocument, BackupError> {
    let records = store.get_all().await?;
    tracing::info!(records = records.len(), "export prepared");
    BackupDocument::from_records(&records)
}

/// Replace store contents with the document's. The document is fully
/// parsed before anything is cleared, and the store is swapped in one
/// transaction.
pub async fn restore(
    store: &DescriptorStore,
    document: &BackupDocument,
) -> Result<RestoreSummary, BackupError> {
    let records = document.records()?;
    let ignored_stores: Vec<String> = document
        .store_names()
        .filter(|name| *name != RECORD_STORE)
        .map(str::to_string)
        .collect();
    for name in &ignored_stores {
        tracing::warn!(store = %name, "ignoring unknown store in backup");
    }

    let mut summary = RestoreSummary {
        ignored_stores,
        ..Default::default()
    };

    if let Some(records) = records {
        let (cleared, restored) = store.replace_all(records).await?;
        summary.cleared = cleared;
        summary.restored = restored;
    }

    tracing::info!(
        cleared = summary.cleared,
        restored = summary.restored,
        "restore complete"
    );
    Ok(summary)
}
