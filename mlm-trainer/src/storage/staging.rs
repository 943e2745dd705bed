//! Staging area for multi-step data writes
//!
//! Merges are written to a uniquely named temporary file before any store is
//! touched. Stores are then written from the staged copy read back from disk,
//! so what lands in a store is exactly what was staged. A multi-step write
//! that cannot be rolled back keeps its staging file and logs the path.

use super::file::{decode_dataset, write_atomic};
use crate::error::TrainerResult;
use crate::models::Dataset;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory holding staged datasets
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

/// Dataset written to the staging area
#[derive(Debug)]
pub struct StagedData {
    path: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `data` to a fresh staging file
    pub async fn stage(&self, data: &Dataset) -> TrainerResult<StagedData> {
        let path = self.dir.join(format!("staging-{}.json", Uuid::new_v4()));
        let bytes = serde_json::to_vec(data)?;
        write_atomic(&path, &bytes).await?;
        debug!(path = %path.display(), rows = data.len(), "Staged dataset");
        Ok(StagedData { path })
    }
}

impl StagedData {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the staged dataset back
    pub async fn load(&self) -> TrainerResult<Dataset> {
        let bytes = tokio::fs::read(&self.path).await?;
        decode_dataset(&self.path, &bytes)
    }

    /// Leave the staging file on disk for manual recovery
    pub fn keep(self) -> PathBuf {
        self.path
    }

    /// Delete the staging file; failure is only logged
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to delete staging file"
            );
        }
    }
}
