//! JSON file storage backends
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! reader never observes a half-written file. The file's modification time
//! is the storage timestamp.

use super::{DataStorage, ModelStorage, StoredModel};
use crate::error::{TrainerError, TrainerResult};
use crate::models::{Dataset, Schema};
use crate::types::ModelHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Turns a model into JSON and back
///
/// One codec per model family; `FileModelStorage` stores the encoded value
/// next to the schema.
pub trait ModelCodec: Send + Sync {
    fn encode(&self, model: &ModelHandle) -> TrainerResult<serde_json::Value>;
    fn decode(&self, value: serde_json::Value) -> TrainerResult<ModelHandle>;
}

/// Modification time of `path`, `None` when it does not exist
fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Write `bytes` to `path` via temp file + rename
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> TrainerResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file");
    Ok(())
}

/// Read `path`, `None` when it does not exist
async fn read_optional(path: &Path) -> TrainerResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Data
// ============================================================================

/// Parse a dataset document read from `path`
pub(crate) fn decode_dataset(path: &Path, bytes: &[u8]) -> TrainerResult<Dataset> {
    let stored: Dataset = serde_json::from_slice(bytes)
        .map_err(|e| TrainerError::Persistence(format!("{}: {}", path.display(), e)))?;
    // Re-validate: the file may have been edited by hand
    let schema = Schema::new(stored.schema().columns().to_vec())?;
    Dataset::new(Arc::new(schema), stored.rows().to_vec())
}

/// Dataset stored as one JSON document
#[derive(Debug, Clone)]
pub struct FileDataStorage {
    path: PathBuf,
}

impl FileDataStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DataStorage for FileDataStorage {
    async fn load_data(&self) -> TrainerResult<Option<Dataset>> {
        let Some(bytes) = read_optional(&self.path).await? else {
            return Ok(None);
        };
        decode_dataset(&self.path, &bytes).map(Some)
    }

    async fn save_data(&self, data: &Dataset) -> TrainerResult<()> {
        let bytes = serde_json::to_vec_pretty(data)?;
        write_atomic(&self.path, &bytes).await
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        file_modified(&self.path)
    }
}

// ============================================================================
// Models
// ============================================================================

#[derive(Serialize, Deserialize)]
struct ModelDocument {
    schema: Schema,
    model: serde_json::Value,
    saved_at: DateTime<Utc>,
}

/// Model stored as one JSON document, encoded by `C`
pub struct FileModelStorage<C: ModelCodec> {
    path: PathBuf,
    codec: C,
}

impl<C: ModelCodec> FileModelStorage<C> {
    pub fn new(path: impl Into<PathBuf>, codec: C) -> Self {
        Self {
            path: path.into(),
            codec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<C: ModelCodec> ModelStorage for FileModelStorage<C> {
    async fn load_model(&self) -> TrainerResult<Option<StoredModel>> {
        let Some(bytes) = read_optional(&self.path).await? else {
            return Ok(None);
        };
        let document: ModelDocument = serde_json::from_slice(&bytes).map_err(|e| {
            TrainerError::Persistence(format!("{}: {}", self.path.display(), e))
        })?;
        let schema = Schema::new(document.schema.columns().to_vec())?;
        let model = self.codec.decode(document.model)?;
        debug!(
            path = %self.path.display(),
            saved_at = %document.saved_at,
            "Loaded model"
        );
        Ok(Some(StoredModel {
            model,
            schema: Arc::new(schema),
        }))
    }

    async fn save_model(&self, model: &ModelHandle, schema: &Arc<Schema>) -> TrainerResult<()> {
        let document = ModelDocument {
            schema: Schema::clone(schema),
            model: self.codec.encode(model)?,
            saved_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.path, &bytes).await
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        file_modified(&self.path)
    }
}
