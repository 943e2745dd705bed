//! Commit: fold the training buffer into primary storage

use crate::error::TrainerResult;
use crate::models::Dataset;
use crate::storage::{DataStorage, StagingArea};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Move every buffered row into primary storage
///
/// Steps:
/// 1. Merge primary + buffer and stage the result
/// 2. Save the staged merge (read back from disk) to primary storage
/// 3. Replace the buffer with an empty dataset of the same schema
/// 4. Discard the staging file
///
/// If step 3 fails the primary store is restored to its pre-merge rows, so
/// a retry cannot commit the same rows twice. If the restore fails too the
/// staging file is kept and its path logged.
///
/// Returns the number of rows committed; 0 when the buffer is absent or
/// empty, in which case nothing is written.
pub async fn commit_buffer(
    primary: &dyn DataStorage,
    buffer: &dyn DataStorage,
    staging: &StagingArea,
) -> TrainerResult<usize> {
    let Some(pending) = buffer.load_data().await? else {
        return Ok(0);
    };
    if pending.is_empty() {
        return Ok(0);
    }

    let previous = primary.load_data().await?;
    let merged = match &previous {
        Some(existing) => existing.merge(&pending)?,
        None => pending.clone(),
    };
    let staged = staging.stage(&merged).await?;

    let saved = match staged.load().await {
        Ok(staged_merge) => primary.save_data(&staged_merge).await.map(|()| staged_merge.len()),
        Err(e) => Err(e),
    };
    let total = match saved {
        Ok(total) => total,
        Err(e) => {
            staged.discard().await;
            return Err(e);
        }
    };

    let schema = Arc::clone(pending.schema());
    if let Err(e) = buffer.save_data(&Dataset::empty(Arc::clone(&schema))).await {
        let original = previous.unwrap_or_else(|| Dataset::empty(schema));
        match primary.save_data(&original).await {
            Ok(()) => {
                warn!(error = %e, "Failed to clear training buffer; commit rolled back");
                staged.discard().await;
            }
            Err(restore) => {
                let path = staged.keep();
                error!(
                    error = %e,
                    restore_error = %restore,
                    path = %path.display(),
                    "Commit left buffered rows in primary storage; staged merge kept"
                );
            }
        }
        return Err(e);
    }
    staged.discard().await;

    info!(rows = pending.len(), total, "Committed training data");
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrainerError;
    use crate::models::{Column, Schema, Value, ValueKind};
    use crate::storage::MemoryDataStorage;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose saves fail while `fail_saves` is set
    struct FlakyStorage {
        data: MemoryDataStorage,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl DataStorage for FlakyStorage {
        async fn load_data(&self) -> TrainerResult<Option<Dataset>> {
            self.data.load_data().await
        }

        async fn save_data(&self, data: &Dataset) -> TrainerResult<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.data.save_data(data).await
        }

        fn last_modified(&self) -> Option<DateTime<Utc>> {
            self.data.last_modified()
        }
    }

    fn schema(label: &str) -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                Column::feature("x", ValueKind::Float),
                Column::label(label, ValueKind::Float),
            ])
            .unwrap(),
        )
    }

    fn rows(schema: &Arc<Schema>, values: &[(f64, f64)]) -> Dataset {
        let rows = values
            .iter()
            .map(|(x, y)| vec![Value::from(*x), Value::from(*y)])
            .collect();
        Dataset::new(Arc::clone(schema), rows).unwrap()
    }

    #[tokio::test]
    async fn test_commit_moves_buffer_into_primary() {
        let dir = tempfile::tempdir().unwrap();
        let s = schema("y");
        let primary = MemoryDataStorage::with_data(rows(&s, &[(1.0, 2.0)]));
        let buffer = MemoryDataStorage::with_data(rows(&s, &[(3.0, 4.0), (5.0, 6.0)]));

        let committed = commit_buffer(&primary, &buffer, &StagingArea::new(dir.path()))
            .await
            .unwrap();

        assert_eq!(committed, 2);
        assert_eq!(primary.row_count(), 3);
        assert_eq!(buffer.row_count(), 0);
        // Buffer keeps its schema so later appends still validate
        assert!(buffer.load_data().await.unwrap().is_some());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_commit_with_empty_buffer_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let s = schema("y");
        let primary = MemoryDataStorage::with_data(rows(&s, &[(1.0, 2.0)]));
        let before = primary.last_modified();
        let buffer = MemoryDataStorage::with_data(Dataset::empty(Arc::clone(&s)));

        let committed = commit_buffer(&primary, &buffer, &StagingArea::new(dir.path()))
            .await
            .unwrap();

        assert_eq!(committed, 0);
        assert_eq!(primary.last_modified(), before);
    }

    #[tokio::test]
    async fn test_commit_rejects_mismatched_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MemoryDataStorage::with_data(rows(&schema("y"), &[(1.0, 2.0)]));
        let buffer = MemoryDataStorage::with_data(rows(&schema("z"), &[(3.0, 4.0)]));

        let result = commit_buffer(&primary, &buffer, &StagingArea::new(dir.path())).await;

        assert!(matches!(result, Err(TrainerError::SchemaMismatch(_))));
        assert_eq!(primary.row_count(), 1);
        assert_eq!(buffer.row_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_buffer_clear_rolls_back_primary() {
        let dir = tempfile::tempdir().unwrap();
        let s = schema("y");
        let primary = MemoryDataStorage::with_data(rows(&s, &[(1.0, 2.0)]));
        let buffer = FlakyStorage {
            data: MemoryDataStorage::with_data(rows(&s, &[(3.0, 4.0), (5.0, 6.0)])),
            fail_saves: AtomicBool::new(true),
        };
        let staging = StagingArea::new(dir.path());

        let result = commit_buffer(&primary, &buffer, &staging).await;

        assert!(matches!(result, Err(TrainerError::Persistence(_))));
        assert_eq!(primary.row_count(), 1);
        assert_eq!(buffer.data.row_count(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // Retrying once the buffer is writable commits each row exactly once
        buffer.fail_saves.store(false, Ordering::SeqCst);
        let committed = commit_buffer(&primary, &buffer, &staging).await.unwrap();

        assert_eq!(committed, 2);
        let merged = primary.load_data().await.unwrap().unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged, rows(&s, &[(1.0, 2.0), (3.0, 4.0), (5.0, 6.0)]));
        assert_eq!(buffer.data.row_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_primary_save_discards_staging() {
        let dir = tempfile::tempdir().unwrap();
        let s = schema("y");
        let primary = FlakyStorage {
            data: MemoryDataStorage::with_data(rows(&s, &[(1.0, 2.0)])),
            fail_saves: AtomicBool::new(true),
        };
        let buffer = MemoryDataStorage::with_data(rows(&s, &[(3.0, 4.0)]));

        let result = commit_buffer(&primary, &buffer, &StagingArea::new(dir.path())).await;

        assert!(result.is_err());
        assert_eq!(primary.data.row_count(), 1);
        assert_eq!(buffer.row_count(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
