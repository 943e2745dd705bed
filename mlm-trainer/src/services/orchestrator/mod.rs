//! Training orchestrator
//!
//! Owns the background training lifecycle for one model:
//! - decides when a round is needed (missing model, stale data, cycling)
//! - runs at most one round at a time, each under its own cancellation token
//! - publishes immutable evaluator snapshots and signals availability
//! - exposes the gate readers use to wait for a fresh model
//!
//! # Example
//! ```rust,ignore
//! let orchestrator = TrainingOrchestrator::builder(trainer, data, higher_is_better("r_squared"))
//!     .model_storage(models)
//!     .settings(&config.training)
//!     .build();
//!
//! let output = orchestrator.predict(&[Value::from(3.0)], &CancellationToken::new()).await?;
//! ```

mod round;

use super::cancellable_task::CancellableTask;
use super::data_commit::commit_buffer;
use super::ingestion::{append_rows, clear_buffer};
use super::notifier::{Dispatcher, InlineDispatcher, Listener, ListenerId, Notifier};
use super::publisher::SnapshotPublisher;
use crate::error::{TrainerError, TrainerResult};
use crate::models::evaluation::default_formatter;
use crate::models::{
    Capabilities, Comparator, CyclingPolicy, Dataset, EvaluatorSnapshot, Formatter, Row, Value,
};
use crate::storage::{DataStorage, ModelStorage, StagingArea};
use crate::types::Trainer;
use chrono::{DateTime, Utc};
use mlm_common::config::TrainingSettings;
use mlm_common::events::{DataChangeReason, EventBus, ModelEvent};
use mlm_common::time;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builder for [`TrainingOrchestrator`]
pub struct OrchestratorBuilder {
    trainer: Arc<dyn Trainer>,
    data_storage: Arc<dyn DataStorage>,
    model_storage: Option<Arc<dyn ModelStorage>>,
    capabilities: Capabilities,
    comparator: Comparator,
    formatter: Formatter,
    dispatcher: Arc<dyn Dispatcher>,
    progress_log_delay: Duration,
    round_timeout: Option<Duration>,
    staging_dir: PathBuf,
    event_capacity: usize,
}

impl OrchestratorBuilder {
    pub fn model_storage(mut self, storage: Arc<dyn ModelStorage>) -> Self {
        self.model_storage = Some(storage);
        self
    }

    pub fn training_buffer(mut self, buffer: Arc<dyn DataStorage>) -> Self {
        self.capabilities.training_buffer = Some(buffer);
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn cycling(mut self, policy: Option<CyclingPolicy>) -> Self {
        self.capabilities.cycling = policy;
        self
    }

    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.capabilities.auto_save = enabled;
        self
    }

    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.capabilities.auto_commit = enabled;
        self
    }

    pub fn formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Where listener callbacks run (inline by default)
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn progress_log_delay(mut self, delay: Duration) -> Self {
        self.progress_log_delay = delay;
        self
    }

    /// Cancel any round still running after `timeout`
    pub fn round_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Apply a `[training]` settings table (buffer is left as configured)
    pub fn settings(mut self, settings: &TrainingSettings) -> Self {
        let buffer = self.capabilities.training_buffer.take();
        self.capabilities = Capabilities::from_settings(settings, buffer);
        self.progress_log_delay = settings.progress_log_delay();
        self.round_timeout = settings.round_timeout();
        self.staging_dir = settings.staging_dir();
        self.event_capacity = settings.event_capacity;
        self
    }

    pub fn build(self) -> TrainingOrchestrator {
        let notifier = Arc::new(Notifier::new(
            self.dispatcher,
            EventBus::new(self.event_capacity.max(1)),
        ));
        let publisher = SnapshotPublisher::new(Arc::clone(&notifier), self.formatter.clone());

        debug!(
            capabilities = ?self.capabilities,
            has_model_storage = self.model_storage.is_some(),
            staging_dir = %self.staging_dir.display(),
            "Building training orchestrator"
        );

        TrainingOrchestrator {
            inner: Arc::new(OrchestratorInner {
                trainer: self.trainer,
                data_storage: self.data_storage,
                model_storage: self.model_storage,
                capabilities: self.capabilities,
                comparator: self.comparator,
                formatter: self.formatter,
                publisher,
                notifier,
                staging: StagingArea::new(self.staging_dir),
                progress_log_delay: self.progress_log_delay,
                round_timeout: self.round_timeout,
                slot: Mutex::new(None),
                streak: AtomicU32::new(0),
                data_seen_at: std::sync::Mutex::new(time::zero()),
                buffer_lock: Mutex::new(()),
                lifetime: CancellationToken::new(),
            }),
        }
    }
}

/// State shared between the public handle and running rounds
pub(crate) struct OrchestratorInner {
    trainer: Arc<dyn Trainer>,
    data_storage: Arc<dyn DataStorage>,
    model_storage: Option<Arc<dyn ModelStorage>>,
    capabilities: Capabilities,
    comparator: Comparator,
    formatter: Formatter,
    publisher: SnapshotPublisher,
    notifier: Arc<Notifier>,
    staging: StagingArea,
    progress_log_delay: Duration,
    round_timeout: Option<Duration>,
    /// The current (or last) round
    slot: Mutex<Option<CancellableTask>>,
    /// Consecutive attempts without a promotion
    streak: AtomicU32,
    /// When the running round last read the training data
    data_seen_at: std::sync::Mutex<DateTime<Utc>>,
    /// Serializes writers of the training buffer
    buffer_lock: Mutex<()>,
    /// Parent of rounds launched by the gate
    lifetime: CancellationToken,
}

/// Handle to a training orchestrator; clones share the same state
#[derive(Clone)]
pub struct TrainingOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl TrainingOrchestrator {
    /// Start building an orchestrator
    ///
    /// Defaults: no model storage, no buffer, no cycling, auto-save on,
    /// auto-commit off, inline listener dispatch, 250ms progress log delay.
    pub fn builder(
        trainer: Arc<dyn Trainer>,
        data_storage: Arc<dyn DataStorage>,
        comparator: Comparator,
    ) -> OrchestratorBuilder {
        let defaults = TrainingSettings::default();
        OrchestratorBuilder {
            trainer,
            data_storage,
            model_storage: None,
            capabilities: Capabilities {
                auto_save: defaults.auto_save,
                ..Capabilities::default()
            },
            comparator,
            formatter: default_formatter(),
            dispatcher: Arc::new(InlineDispatcher),
            progress_log_delay: defaults.progress_log_delay(),
            round_timeout: defaults.round_timeout(),
            staging_dir: defaults.staging_dir(),
            event_capacity: defaults.event_capacity,
        }
    }

    // ========================================================================
    // Round lifecycle
    // ========================================================================

    /// Launch a round unconditionally, replacing any running one
    ///
    /// The round is linked to `cancel`: cancelling it later stops the round.
    /// Failures inside the round are never returned here; this call only
    /// launches.
    pub async fn start_training(&self, cancel: &CancellationToken) -> TrainerResult<()> {
        let mut slot = self.inner.slot.lock().await;
        if let Some(previous) = slot.take() {
            if let Err(e) = previous.stop().await {
                warn!(round_id = %previous.id(), error = %e, "Previous training round failed");
            }
        }
        if cancel.is_cancelled() {
            return Err(TrainerError::Cancelled);
        }
        *slot = Some(self.inner.launch(cancel));
        Ok(())
    }

    /// Launch a round if one is needed
    ///
    /// A round is needed when primary or buffer data is newer than what the
    /// published (or running) model has seen, or when nothing is running and
    /// either no model is published or cycling still has attempts left.
    /// A finished round's failure surfaces here once, when it is drained.
    pub async fn start_training_if_needed(&self, cancel: &CancellationToken) -> TrainerResult<()> {
        self.ensure_round(cancel).await.map(|_| ())
    }

    /// Launch a round if needed; returns the round now in the slot
    async fn ensure_round(&self, cancel: &CancellationToken) -> TrainerResult<Option<CancellableTask>> {
        let inner = &self.inner;
        let mut slot = inner.slot.lock().await;

        let running = slot.as_ref().is_some_and(|task| !task.is_finished());
        let snapshot = inner.publisher.current();
        let reference = if running {
            snapshot.timestamp().max(inner.data_seen_at())
        } else {
            snapshot.timestamp()
        };
        let stale = time::is_newer(inner.data_storage.last_modified(), reference)
            || time::is_newer(inner.buffer_last_modified(), reference);
        let cycling = inner
            .capabilities
            .cycling
            .is_some_and(|policy| !policy.exhausted(inner.streak.load(Ordering::SeqCst)));
        let missing = !snapshot.has_model();

        if !(stale || (!running && (cycling || missing))) {
            return Ok(slot.clone());
        }
        debug!(stale, cycling, missing, running, "Training round needed");

        if let Some(previous) = slot.take() {
            previous.stop().await?;
        }
        if cancel.is_cancelled() {
            return Err(TrainerError::Cancelled);
        }
        let task = inner.launch(&inner.lifetime);
        *slot = Some(task.clone());
        Ok(Some(task))
    }

    /// Cancel the running round and wait for it to end
    ///
    /// An interrupted round may have left a model trained on older data
    /// published, so the snapshot is invalidated.
    pub async fn stop_training(&self, cancel: &CancellationToken) -> TrainerResult<()> {
        let mut slot = self.inner.slot.lock().await;
        let Some(task) = slot.take() else {
            return Ok(());
        };
        let interrupted = !task.is_finished();
        task.cancel();

        let outcome = tokio::select! {
            outcome = task.wait() => Some(outcome),
            _ = cancel.cancelled() => None,
        };
        let Some(outcome) = outcome else {
            // Keep the dying round in the slot so the next launch drains it
            *slot = Some(task);
            return Err(TrainerError::Cancelled);
        };

        if interrupted {
            self.inner.publisher.invalidate();
            info!(round_id = %task.id(), "Training stopped");
        }
        match outcome {
            Err(e) if !e.is_cancelled() => Err(e),
            _ => Ok(()),
        }
    }

    /// Wait for the current round, if any, to end
    pub async fn wait_for_training(&self) -> TrainerResult<()> {
        let task = self.inner.slot.lock().await.clone();
        match task {
            Some(task) => match task.wait().await {
                Err(TrainerError::Cancelled) => Ok(()),
                other => other,
            },
            None => Ok(()),
        }
    }

    /// Stop training for good; rounds launched by the gate are cancelled
    pub async fn shutdown(&self) -> TrainerResult<()> {
        self.inner.lifetime.cancel();
        self.stop_training(&CancellationToken::new()).await
    }

    // ========================================================================
    // Readers
    // ========================================================================

    /// Wait for a fresh model and return the snapshot holding it
    ///
    /// Starts a round when needed, then waits for the first of:
    /// - the availability signal
    /// - `cancel`
    /// - the end of the current round (its failure is returned)
    ///
    /// Fails with `Cancelled` when the round ended without publishing a model.
    pub async fn current_evaluator(
        &self,
        cancel: &CancellationToken,
    ) -> TrainerResult<Arc<EvaluatorSnapshot>> {
        let task = self.ensure_round(cancel).await?;
        // No round at all counts as a round that already ended
        let round_token = task.as_ref().map(CancellableTask::token).unwrap_or_else(|| {
            let ended = CancellationToken::new();
            ended.cancel();
            ended
        });
        let mut availability = self.inner.publisher.availability();

        tokio::select! {
            biased;
            signalled = async { availability.wait_for(|available| *available).await.map(|_| ()) } => {
                if signalled.is_err() {
                    return Err(TrainerError::Cancelled);
                }
            }
            _ = cancel.cancelled() => return Err(TrainerError::Cancelled),
            _ = round_token.cancelled() => {
                if let Some(task) = &task {
                    task.wait().await?;
                }
            }
        }

        let snapshot = self.inner.publisher.current();
        if !self.inner.publisher.is_available() || !snapshot.has_model() {
            return Err(TrainerError::Cancelled);
        }
        Ok(snapshot)
    }

    /// Predict through the gate, validating input against the model's schema
    pub async fn predict(&self, features: &[Value], cancel: &CancellationToken) -> TrainerResult<Row> {
        let snapshot = self.current_evaluator(cancel).await?;
        let (Some(model), Some(schema)) = (snapshot.model(), snapshot.schema()) else {
            return Err(TrainerError::Cancelled);
        };
        schema.validate_input(features)?;
        model.predict(features)
    }

    /// Current snapshot without waiting or starting anything
    pub fn snapshot(&self) -> Arc<EvaluatorSnapshot> {
        self.inner.publisher.current()
    }

    /// Consecutive attempts without a promotion
    pub fn attempt_streak(&self) -> u32 {
        self.inner.streak.load(Ordering::SeqCst)
    }

    /// Whether a round is running right now
    pub async fn is_training(&self) -> bool {
        self.inner
            .slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // ========================================================================
    // Training data
    // ========================================================================

    /// Append rows to the training buffer; returns how many were appended
    ///
    /// Requires a training buffer. See [`append_rows`] for duplicate rules.
    pub async fn add_training_data(&self, rows: &Dataset, check_duplicates: bool) -> TrainerResult<usize> {
        let buffer = self.inner.require_buffer()?;
        let appended = {
            let _guard = self.inner.buffer_lock.lock().await;
            append_rows(
                self.inner.data_storage.as_ref(),
                buffer.as_ref(),
                &self.inner.staging,
                rows,
                check_duplicates,
            )
            .await?
        };
        if appended > 0 {
            self.inner.raise_data_changed(DataChangeReason::RowsAdded, appended);
        }
        Ok(appended)
    }

    /// Fold the training buffer into primary storage
    pub async fn commit_training_data(&self) -> TrainerResult<usize> {
        self.inner.require_buffer()?;
        self.inner.commit().await
    }

    /// Drop everything in the training buffer
    pub async fn clear_training_data(&self) -> TrainerResult<usize> {
        let buffer = self.inner.require_buffer()?;
        let cleared = {
            let _guard = self.inner.buffer_lock.lock().await;
            clear_buffer(buffer.as_ref()).await?
        };
        if cleared > 0 {
            self.inner.raise_data_changed(DataChangeReason::Cleared, cleared);
        }
        Ok(cleared)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Register a synchronous listener
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        self.inner.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Receive events asynchronously
    pub fn events(&self) -> broadcast::Receiver<ModelEvent> {
        self.inner.notifier.bus().subscribe()
    }
}

impl OrchestratorInner {
    fn launch(self: &Arc<Self>, parent: &CancellationToken) -> CancellableTask {
        // The new round reads the data after this instant
        self.note_data_seen(time::now());
        let inner = Arc::clone(self);
        let timeout = self.round_timeout;
        let task = CancellableTask::spawn(parent, move |round_id, token| async move {
            if let Some(limit) = timeout {
                let watchdog = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(limit) => {
                            info!(%round_id, timeout_ms = limit.as_millis() as u64, "Training round timed out");
                            watchdog.cancel();
                        }
                        _ = watchdog.cancelled() => {}
                    }
                });
            }
            round::run_round(inner, round_id, token).await
        });
        debug!(round_id = %task.id(), "Launched training round");
        task
    }

    fn require_buffer(&self) -> TrainerResult<&Arc<dyn DataStorage>> {
        self.capabilities.training_buffer.as_ref().ok_or_else(|| {
            TrainerError::InvalidState("this orchestrator has no training buffer".to_string())
        })
    }

    fn buffer_last_modified(&self) -> Option<DateTime<Utc>> {
        self.capabilities
            .training_buffer
            .as_ref()
            .and_then(|buffer| buffer.last_modified())
    }

    fn data_seen_at(&self) -> DateTime<Utc> {
        *self.data_seen_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn note_data_seen(&self, at: DateTime<Utc>) {
        *self.data_seen_at.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    /// Commit under the buffer lock; raises `Committed` when rows moved
    async fn commit(&self) -> TrainerResult<usize> {
        let buffer = self.require_buffer()?;
        let committed = {
            let _guard = self.buffer_lock.lock().await;
            commit_buffer(self.data_storage.as_ref(), buffer.as_ref(), &self.staging).await?
        };
        if committed > 0 {
            self.raise_data_changed(DataChangeReason::Committed, committed);
        }
        Ok(committed)
    }

    fn raise_data_changed(&self, reason: DataChangeReason, rows: usize) {
        self.notifier.raise(ModelEvent::TrainingDataChanged {
            reason,
            rows,
            timestamp: time::now(),
        });
    }
}
