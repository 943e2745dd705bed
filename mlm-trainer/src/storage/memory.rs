//! In-process storage backends
//!
//! Useful for tests and for hosts that keep data in memory; timestamps are
//! taken from the wall clock at save time.

use super::{DataStorage, ModelStorage, StoredModel};
use crate::error::TrainerResult;
use crate::models::{Dataset, Schema};
use crate::types::ModelHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mlm_common::time;
use std::sync::{Arc, RwLock};

/// Dataset held in memory
#[derive(Debug, Default)]
pub struct MemoryDataStorage {
    inner: RwLock<Option<(Dataset, DateTime<Utc>)>>,
}

impl MemoryDataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `data`, stamped now
    pub fn with_data(data: Dataset) -> Self {
        Self {
            inner: RwLock::new(Some((data, time::now()))),
        }
    }

    /// Number of stored rows (0 when empty)
    pub fn row_count(&self) -> usize {
        self.read().as_ref().map_or(0, |(data, _)| data.len())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<(Dataset, DateTime<Utc>)>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DataStorage for MemoryDataStorage {
    async fn load_data(&self) -> TrainerResult<Option<Dataset>> {
        Ok(self.read().as_ref().map(|(data, _)| data.clone()))
    }

    async fn save_data(&self, data: &Dataset) -> TrainerResult<()> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some((data.clone(), time::now()));
        Ok(())
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.read().as_ref().map(|(_, stamp)| *stamp)
    }
}

/// Model held in memory
#[derive(Debug, Default)]
pub struct MemoryModelStorage {
    inner: RwLock<Option<(StoredModel, DateTime<Utc>)>>,
}

impl MemoryModelStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `model`, stamped `saved_at`
    pub fn with_model(model: ModelHandle, schema: Arc<Schema>, saved_at: DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new(Some((StoredModel { model, schema }, saved_at))),
        }
    }

    /// Currently stored model, if any
    pub fn stored(&self) -> Option<StoredModel> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(stored, _)| stored.clone())
    }
}

#[async_trait]
impl ModelStorage for MemoryModelStorage {
    async fn load_model(&self) -> TrainerResult<Option<StoredModel>> {
        Ok(self.stored())
    }

    async fn save_model(&self, model: &ModelHandle, schema: &Arc<Schema>) -> TrainerResult<()> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let stored = StoredModel {
            model: Arc::clone(model),
            schema: Arc::clone(schema),
        };
        *guard = Some((stored, time::now()));
        Ok(())
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(_, stamp)| *stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, Value, ValueKind};

    fn dataset(rows: Vec<Vec<Value>>) -> Dataset {
        let schema = Schema::new(vec![
            Column::feature("x", ValueKind::Float),
            Column::label("y", ValueKind::Float),
        ])
        .unwrap();
        Dataset::new(Arc::new(schema), rows).unwrap()
    }

    #[tokio::test]
    async fn test_empty_storage_has_no_data_and_no_timestamp() {
        let storage = MemoryDataStorage::new();
        assert!(storage.load_data().await.unwrap().is_none());
        assert!(storage.last_modified().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_data_and_advances_timestamp() {
        let storage = MemoryDataStorage::with_data(dataset(vec![]));
        let first = storage.last_modified().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        storage
            .save_data(&dataset(vec![vec![Value::from(1.0), Value::from(2.0)]]))
            .await
            .unwrap();

        assert_eq!(storage.row_count(), 1);
        assert!(storage.last_modified().unwrap() > first);
    }
}
