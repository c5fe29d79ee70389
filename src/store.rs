use crate::models::InventoryRecord;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("commit rejected: {0}")]
    Commit(String),
}

/// Persistent documents keyed by serial number.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, serial_number: &str) -> Result<Option<InventoryRecord>, StoreError>;

    async fn exists(&self, serial_number: &str) -> Result<bool, StoreError> {
        Ok(self.get(serial_number).await?.is_some())
    }

    /// Writes every record or none. Fields a record does not carry are left as
    /// they are in storage.
    async fn upsert_batch(&self, records: &[InventoryRecord]) -> Result<(), StoreError>;
}

/// In-process store with the same merge semantics as the remote one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, Map<String, Value>>>,
    reject_commits: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_commits() -> Self {
        Self {
            reject_commits: true,
            ..Self::default()
        }
    }

    pub fn with_documents<I>(documents: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let documents = documents
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Object(map) => Some((key, map)),
                _ => None,
            })
            .collect();
        Self {
            documents: Mutex::new(documents),
            reject_commits: false,
        }
    }

    pub fn seed(&self, record: &InventoryRecord) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        merge_into(&mut guard, record)
    }

    pub fn document(&self, serial_number: &str) -> Option<Value> {
        self.lock()
            .ok()?
            .get(serial_number)
            .cloned()
            .map(Value::Object)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|g| g.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Map<String, Value>>>, StoreError> {
        self.documents
            .lock()
            .map_err(|_| StoreError::Request("memory store poisoned".into()))
    }
}

fn merge_into(
    documents: &mut BTreeMap<String, Map<String, Value>>,
    record: &InventoryRecord,
) -> Result<(), StoreError> {
    let Value::Object(fields) =
        serde_json::to_value(record).map_err(|err| StoreError::Deserialize(err.to_string()))?
    else {
        return Err(StoreError::Deserialize("record is not an object".into()));
    };
    let entry = documents.entry(record.serial_number.clone()).or_default();
    entry.extend(fields);
    Ok(())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, serial_number: &str) -> Result<Option<InventoryRecord>, StoreError> {
        let guard = self.lock()?;
        guard
            .get(serial_number)
            .map(|doc| {
                serde_json::from_value(Value::Object(doc.clone()))
                    .map_err(|err| StoreError::Deserialize(err.to_string()))
            })
            .transpose()
    }

    async fn upsert_batch(&self, records: &[InventoryRecord]) -> Result<(), StoreError> {
        if self.reject_commits {
            return Err(StoreError::Commit("memory store configured to reject".into()));
        }
        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        for record in records {
            merge_into(&mut staged, record)?;
        }
        *guard = staged;
        Ok(())
    }
}
