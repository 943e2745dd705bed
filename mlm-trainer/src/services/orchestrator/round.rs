//! One training round
//!
//! # Phases
//! - **Bootstrapping:** seed an incumbent (published snapshot or model
//!   storage), load data, publish, baseline-evaluate, auto-commit
//! - **Attempts:** evaluate the incumbent and train a challenger
//!   concurrently, promote the challenger when it wins
//! - **Cleanup:** always runs; cancels the round token, waits for pending
//!   saves and raises `TrainingEnded`

use super::OrchestratorInner;
use crate::error::{TrainerError, TrainerResult};
use crate::models::{Better, Dataset, Evaluation, Schema, SnapshotDraft};
use crate::types::{same_model, ModelHandle, TrainedModel};
use chrono::{DateTime, Utc};
use mlm_common::events::ModelEvent;
use mlm_common::time;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Training data read for one attempt
struct LoadedData {
    dataset: Arc<Dataset>,
    /// Taken before the read started, so later writes always look newer
    loaded_at: DateTime<Utc>,
}

/// Model the round starts from
struct Seed {
    model: Option<ModelHandle>,
    schema: Option<Arc<Schema>>,
    evaluation: Option<Evaluation>,
    timestamp: DateTime<Utc>,
}

impl Seed {
    fn none() -> Self {
        Self {
            model: None,
            schema: None,
            evaluation: None,
            timestamp: time::zero(),
        }
    }
}

/// Incumbent evaluation, reusable while neither model nor data change
struct CachedEvaluation {
    model: ModelHandle,
    dataset: Arc<Dataset>,
    evaluation: Evaluation,
}

impl CachedEvaluation {
    fn matches(&self, model: &ModelHandle, dataset: &Arc<Dataset>) -> bool {
        same_model(&self.model, model)
            && (Arc::ptr_eq(&self.dataset, dataset) || *self.dataset == **dataset)
    }
}

struct RoundState {
    round_id: Uuid,
    attempts: u32,
    /// Saves are chained so they complete in promotion order
    pending_save: Option<JoinHandle<()>>,
}

pub(super) async fn run_round(
    inner: Arc<OrchestratorInner>,
    round_id: Uuid,
    cancel: CancellationToken,
) -> TrainerResult<()> {
    let mut state = RoundState {
        round_id,
        attempts: 0,
        pending_save: None,
    };
    let outcome = retrain(&inner, &cancel, &mut state).await;

    cancel.cancel();
    if let Some(save) = state.pending_save.take() {
        if let Err(e) = save.await {
            warn!(%round_id, error = %e, "Model save task failed");
        }
    }
    inner.notifier.raise(ModelEvent::TrainingEnded {
        round_id,
        attempts: state.attempts,
        timestamp: time::now(),
    });

    match outcome {
        Ok(()) => {
            info!(%round_id, attempts = state.attempts, "Training round finished");
            Ok(())
        }
        Err(TrainerError::Cancelled) => {
            info!(%round_id, attempts = state.attempts, "Training round cancelled");
            Ok(())
        }
        Err(e) => {
            error!(%round_id, attempts = state.attempts, error = %e, "Training round failed");
            Err(e)
        }
    }
}

async fn retrain(
    inner: &Arc<OrchestratorInner>,
    cancel: &CancellationToken,
    state: &mut RoundState,
) -> TrainerResult<()> {
    let round_id = state.round_id;
    inner.streak.store(0, Ordering::SeqCst);
    inner.notifier.raise(ModelEvent::TrainingStarted {
        round_id,
        timestamp: time::now(),
    });

    // ------------------------------------------------------------------
    // Bootstrapping
    // ------------------------------------------------------------------
    let mut seed = seed_model(inner).await;
    check_cancelled(cancel)?;

    let Some(mut data) = load_training_data(inner).await? else {
        info!(%round_id, "No training data available");
        return Ok(());
    };
    let mismatched = seed
        .schema
        .as_ref()
        .is_some_and(|schema| schema.columns() != data.dataset.schema().columns());
    if mismatched {
        warn!(%round_id, "Incumbent model was trained on different columns; discarding it");
        seed = Seed::none();
    }

    inner.publisher.publish(
        SnapshotDraft::for_data(Arc::clone(&data.dataset), seed.model.clone())
            .evaluation(seed.evaluation.clone())
            .timestamp(seed.timestamp),
    )?;
    inner.note_data_seen(data.loaded_at);

    let mut incumbent = seed.model;
    let mut cached: Option<CachedEvaluation> = None;
    if let Some(model) = &incumbent {
        match evaluate(inner, model, &data.dataset, cancel).await {
            Ok(evaluation) => {
                if let Some(text) = (inner.formatter)(&evaluation) {
                    info!(%round_id, "Current model: {}", text);
                }
                cached = Some(CachedEvaluation {
                    model: Arc::clone(model),
                    dataset: Arc::clone(&data.dataset),
                    evaluation,
                });
            }
            Err(TrainerError::Cancelled) => return Err(TrainerError::Cancelled),
            Err(e) => warn!(%round_id, error = %e, "Baseline evaluation failed"),
        }
    }

    data = auto_commit(inner, data).await?;
    inner.note_data_seen(data.loaded_at);

    // ------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------
    loop {
        check_cancelled(cancel)?;

        let published = inner.publisher.current().has_model();
        let streak = inner.streak.load(Ordering::SeqCst);
        match inner.capabilities.cycling {
            Some(policy) if published && policy.exhausted(streak) => {
                info!(%round_id, streak, "No better model found; stopping");
                break;
            }
            None if published => break,
            _ => {}
        }

        let (incumbent_evaluation, trained) = tokio::try_join!(
            evaluate_incumbent(inner, incumbent.as_ref(), &data.dataset, cached.as_ref(), cancel),
            train(inner, incumbent.as_ref(), &data.dataset, cancel),
        )?;
        let Some(TrainedModel { model: challenger, evaluation }) = trained else {
            info!(%round_id, "Trainer produced no model");
            break;
        };
        state.attempts += 1;
        let streak = inner.streak.fetch_add(1, Ordering::SeqCst) + 1;

        let challenger_evaluation = match evaluation {
            Some(evaluation) => evaluation,
            None => evaluate(inner, &challenger, &data.dataset, cancel).await?,
        };

        let better = (inner.comparator)(incumbent_evaluation.as_ref(), Some(&challenger_evaluation));
        if better == Better::Second || !inner.publisher.current().has_model() {
            info!(%round_id, attempt = state.attempts, streak, "Found a better model");
            if let Some(text) = (inner.formatter)(&challenger_evaluation) {
                info!(%round_id, "{}", text);
            }
            if inner.capabilities.auto_save {
                queue_save(inner, state, &challenger, data.dataset.schema());
            }
            inner.publisher.publish(
                SnapshotDraft::for_data(Arc::clone(&data.dataset), Some(Arc::clone(&challenger)))
                    .evaluation(Some(challenger_evaluation.clone()))
                    .timestamp(data.loaded_at),
            )?;
            inner.streak.store(0, Ordering::SeqCst);

            cached = Some(CachedEvaluation {
                model: Arc::clone(&challenger),
                dataset: Arc::clone(&data.dataset),
                evaluation: challenger_evaluation,
            });
            incumbent = Some(challenger);
        } else {
            info!(%round_id, attempt = state.attempts, streak, "The model is worse; discarded");
            cached = match (&incumbent, incumbent_evaluation) {
                (Some(model), Some(evaluation)) => Some(CachedEvaluation {
                    model: Arc::clone(model),
                    dataset: Arc::clone(&data.dataset),
                    evaluation,
                }),
                _ => None,
            };
        }

        check_cancelled(cancel)?;
        let Some(reloaded) = load_training_data(inner).await? else {
            info!(%round_id, "Training data disappeared");
            break;
        };
        data = auto_commit(inner, reloaded).await?;
        inner.note_data_seen(data.loaded_at);
    }

    Ok(())
}

/// Pick the model the round starts from
///
/// The published model is kept while no data store is newer than it. A
/// stored model wins when it is newer than both data stores and the
/// published one. A stored model that fails to load is skipped.
async fn seed_model(inner: &OrchestratorInner) -> Seed {
    let primary_ts = inner.data_storage.last_modified();
    let buffer_ts = inner.buffer_last_modified();

    let published = inner.publisher.current();
    let mut seed = Seed::none();
    if let Some(model) = published.model() {
        if !time::is_newer(primary_ts, published.timestamp())
            && !time::is_newer(buffer_ts, published.timestamp())
        {
            seed = Seed {
                model: Some(Arc::clone(model)),
                schema: published.schema().cloned(),
                evaluation: published.evaluation().cloned(),
                timestamp: published.timestamp(),
            };
        }
    }

    let Some(storage) = &inner.model_storage else {
        return seed;
    };
    let Some(model_ts) = storage.last_modified() else {
        return seed;
    };
    let dominates = !time::is_newer(primary_ts, model_ts)
        && !time::is_newer(buffer_ts, model_ts)
        && model_ts > seed.timestamp;
    if !dominates {
        return seed;
    }

    match storage.load_model().await {
        Ok(Some(stored)) => {
            info!(saved_at = %model_ts, "Loaded saved model");
            Seed {
                model: Some(stored.model),
                schema: Some(stored.schema),
                evaluation: None,
                timestamp: model_ts,
            }
        }
        Ok(None) => seed,
        Err(e) => {
            warn!(error = %e, "Failed to load saved model; training from scratch");
            Seed::none()
        }
    }
}

/// Merge of primary and buffer data, `None` when neither has any
async fn load_training_data(inner: &OrchestratorInner) -> TrainerResult<Option<LoadedData>> {
    let loaded_at = time::now();
    let primary = inner.data_storage.load_data().await?;
    let buffer = match &inner.capabilities.training_buffer {
        Some(buffer) => buffer.load_data().await?,
        None => None,
    };
    let merged = Dataset::merge_optional(primary, buffer)?;
    Ok(merged.map(|dataset| {
        debug!(rows = dataset.len(), "Loaded training data");
        LoadedData {
            dataset: Arc::new(dataset),
            loaded_at,
        }
    }))
}

/// Commit the buffer when enabled; reloads the data when rows moved
async fn auto_commit(inner: &OrchestratorInner, data: LoadedData) -> TrainerResult<LoadedData> {
    if !inner.capabilities.auto_commit || inner.capabilities.training_buffer.is_none() {
        return Ok(data);
    }
    match inner.commit().await {
        Ok(0) => Ok(data),
        Ok(_) => Ok(load_training_data(inner).await?.unwrap_or(data)),
        Err(e) => {
            warn!(error = %e, "Automatic commit failed; training on uncommitted data");
            Ok(data)
        }
    }
}

async fn evaluate(
    inner: &OrchestratorInner,
    model: &ModelHandle,
    data: &Dataset,
    cancel: &CancellationToken,
) -> TrainerResult<Evaluation> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TrainerError::Cancelled),
        result = inner.trainer.evaluate(model, data, cancel) => result,
    }
}

async fn evaluate_incumbent(
    inner: &OrchestratorInner,
    incumbent: Option<&ModelHandle>,
    data: &Arc<Dataset>,
    cached: Option<&CachedEvaluation>,
    cancel: &CancellationToken,
) -> TrainerResult<Option<Evaluation>> {
    let Some(model) = incumbent else {
        return Ok(None);
    };
    if let Some(cached) = cached.filter(|c| c.matches(model, data)) {
        return Ok(Some(cached.evaluation.clone()));
    }
    evaluate(inner, model, data, cancel).await.map(Some)
}

/// Train a challenger, logging once if it takes a while
async fn train(
    inner: &OrchestratorInner,
    incumbent: Option<&ModelHandle>,
    data: &Dataset,
    cancel: &CancellationToken,
) -> TrainerResult<Option<TrainedModel>> {
    let training = inner.trainer.train(incumbent, data, cancel);
    tokio::pin!(training);
    let progress = tokio::time::sleep(inner.progress_log_delay);
    tokio::pin!(progress);
    let mut logged = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TrainerError::Cancelled),
            result = &mut training => return result,
            _ = &mut progress, if !logged => {
                logged = true;
                if incumbent.is_some() {
                    info!(trainer = inner.trainer.name(), "Trying to find a better model");
                } else {
                    info!(trainer = inner.trainer.name(), "Training the model");
                }
            }
        }
    }
}

/// Save `model` after any save already queued by this round
fn queue_save(
    inner: &OrchestratorInner,
    state: &mut RoundState,
    model: &ModelHandle,
    schema: &Arc<Schema>,
) {
    let Some(storage) = inner.model_storage.clone() else {
        return;
    };
    let previous = state.pending_save.take();
    let model = Arc::clone(model);
    let schema = Arc::clone(schema);
    state.pending_save = Some(tokio::spawn(async move {
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                warn!(error = %e, "Previous model save task failed");
            }
        }
        match storage.save_model(&model, &schema).await {
            Ok(()) => debug!("Saved model"),
            Err(e) => warn!(error = %e, "Failed to save model"),
        }
    }));
}

fn check_cancelled(cancel: &CancellationToken) -> TrainerResult<()> {
    if cancel.is_cancelled() {
        Err(TrainerError::Cancelled)
    } else {
        Ok(())
    }
}
