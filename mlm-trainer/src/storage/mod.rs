//! Storage seams for training data and models
//!
//! The orchestrator treats both as black boxes with a last-modified
//! timestamp; staleness decisions are made purely on those timestamps.

pub mod file;
pub mod memory;
pub mod staging;

pub use file::{FileDataStorage, FileModelStorage, ModelCodec};
pub use memory::{MemoryDataStorage, MemoryModelStorage};
pub use staging::{StagedData, StagingArea};

use crate::error::TrainerResult;
use crate::models::{Dataset, Schema};
use crate::types::ModelHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persistent tabular data store
#[async_trait]
pub trait DataStorage: Send + Sync {
    /// Load the stored dataset, `None` when nothing has been stored
    async fn load_data(&self) -> TrainerResult<Option<Dataset>>;

    /// Replace the stored dataset
    async fn save_data(&self, data: &Dataset) -> TrainerResult<()>;

    /// Last time the stored dataset changed, `None` when nothing is stored
    fn last_modified(&self) -> Option<DateTime<Utc>>;
}

/// Model loaded back from storage, with the schema it was trained against
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub model: ModelHandle,
    pub schema: Arc<Schema>,
}

/// Persistent model store
#[async_trait]
pub trait ModelStorage: Send + Sync {
    /// Load the stored model, `None` when nothing has been stored
    async fn load_model(&self) -> TrainerResult<Option<StoredModel>>;

    /// Replace the stored model
    async fn save_model(&self, model: &ModelHandle, schema: &Arc<Schema>) -> TrainerResult<()>;

    /// Last time a model was stored, `None` when nothing is stored
    fn last_modified(&self) -> Option<DateTime<Utc>>;
}
