//! Snapshot publication and the availability signal
//!
//! Readers take the current `Arc<EvaluatorSnapshot>` without blocking the
//! writer for longer than a pointer swap. Writers are serialized, and the
//! availability signal is updated under the same lock as the swap so a
//! reader that sees the signal set also sees a snapshot with a model.

use super::notifier::Notifier;
use crate::error::TrainerResult;
use crate::models::{EvaluatorSnapshot, Formatter, SnapshotDraft};
use mlm_common::events::ModelEvent;
use mlm_common::time;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::debug;

pub struct SnapshotPublisher {
    current: RwLock<Arc<EvaluatorSnapshot>>,
    /// Serializes publish/invalidate; holds the last generation issued
    writer: Mutex<u64>,
    available: watch::Sender<bool>,
    notifier: Arc<Notifier>,
    formatter: Formatter,
}

impl SnapshotPublisher {
    pub fn new(notifier: Arc<Notifier>, formatter: Formatter) -> Self {
        let (available, _) = watch::channel(false);
        Self {
            current: RwLock::new(Arc::new(EvaluatorSnapshot::empty())),
            writer: Mutex::new(0),
            available,
            notifier,
            formatter,
        }
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<EvaluatorSnapshot> {
        Arc::clone(&*self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Whether a fresh model is published
    pub fn is_available(&self) -> bool {
        *self.available.borrow()
    }

    /// Receiver for the availability signal
    pub fn availability(&self) -> watch::Receiver<bool> {
        self.available.subscribe()
    }

    /// Publish a new snapshot and raise `ModelChanged`
    ///
    /// Sets the availability signal when the snapshot carries a model and
    /// clears it otherwise.
    pub fn publish(&self, draft: SnapshotDraft) -> TrainerResult<Arc<EvaluatorSnapshot>> {
        let snapshot = {
            let mut generation = self.writer.lock().unwrap_or_else(|e| e.into_inner());
            let snapshot = Arc::new(EvaluatorSnapshot::from_draft(*generation + 1, draft)?);
            *generation += 1;
            self.swap(Arc::clone(&snapshot));
            self.available.send_replace(snapshot.has_model());
            snapshot
        };

        debug!(
            generation = snapshot.generation(),
            has_model = snapshot.has_model(),
            timestamp = %snapshot.timestamp(),
            "Published evaluator snapshot"
        );
        self.notifier.raise(ModelEvent::ModelChanged {
            generation: snapshot.generation(),
            has_model: snapshot.has_model(),
            evaluation: snapshot.evaluation().and_then(|e| (self.formatter)(e)),
            timestamp: time::now(),
        });
        Ok(snapshot)
    }

    /// Mark the published model as no longer fresh
    ///
    /// Clears the signal and republishes the same contents with a zero
    /// timestamp. No event is raised: the model itself did not change.
    pub fn invalidate(&self) -> Arc<EvaluatorSnapshot> {
        let mut generation = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.available.send_replace(false);
        *generation += 1;
        let snapshot = Arc::new(self.current().invalidated(*generation));
        self.swap(Arc::clone(&snapshot));
        debug!(generation = snapshot.generation(), "Invalidated evaluator snapshot");
        snapshot
    }

    fn swap(&self, snapshot: Arc<EvaluatorSnapshot>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }
}
