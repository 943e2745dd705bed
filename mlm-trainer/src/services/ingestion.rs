//! Buffer ingestion: append and clear
//!
//! New rows always land in the training buffer; primary storage only
//! changes on commit.

use crate::error::{TrainerError, TrainerResult};
use crate::models::Dataset;
use crate::storage::{DataStorage, StagingArea};
use std::sync::Arc;
use tracing::{debug, info};

/// Append `incoming` to the buffer
///
/// With `check_duplicates`, rows equal (every field) to a row already in
/// primary storage or in the buffer are dropped first. The scan is a plain
/// row-by-row comparison. Returns the number of rows appended.
pub async fn append_rows(
    primary: &dyn DataStorage,
    buffer: &dyn DataStorage,
    staging: &StagingArea,
    incoming: &Dataset,
    check_duplicates: bool,
) -> TrainerResult<usize> {
    let existing = primary.load_data().await?;
    let pending = buffer.load_data().await?;

    for stored in existing.iter().chain(pending.iter()) {
        if stored.schema().columns() != incoming.schema().columns() {
            return Err(TrainerError::SchemaMismatch(
                "incoming rows do not match the stored training data".to_string(),
            ));
        }
    }

    let fresh = if check_duplicates {
        incoming.filter(|row| {
            !existing.as_ref().is_some_and(|d| d.contains_row(row))
                && !pending.as_ref().is_some_and(|d| d.contains_row(row))
        })
    } else {
        incoming.clone()
    };
    let skipped = incoming.len() - fresh.len();
    if fresh.is_empty() {
        debug!(skipped, "No new training rows to append");
        return Ok(0);
    }

    let merged = match pending {
        Some(pending) => pending.merge(&fresh)?,
        None => fresh.clone(),
    };
    let staged = staging.stage(&merged).await?;
    let saved = match staged.load().await {
        Ok(staged_merge) => buffer.save_data(&staged_merge).await,
        Err(e) => Err(e),
    };
    staged.discard().await;
    saved?;

    info!(rows = fresh.len(), skipped, buffered = merged.len(), "Appended training rows");
    Ok(fresh.len())
}

/// Empty the buffer, keeping its schema; returns the rows removed
pub async fn clear_buffer(buffer: &dyn DataStorage) -> TrainerResult<usize> {
    let Some(pending) = buffer.load_data().await? else {
        return Ok(0);
    };
    if pending.is_empty() {
        return Ok(0);
    }
    buffer
        .save_data(&Dataset::empty(Arc::clone(pending.schema())))
        .await?;
    info!(rows = pending.len(), "Cleared training buffer");
    Ok(pending.len())
}
