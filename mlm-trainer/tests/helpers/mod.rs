//! Test helper utilities
//!
//! Stub trainers with scripted behavior, small datasets and an event
//! recorder shared by the orchestrator integration tests.

#![allow(dead_code)]

pub mod log_capture;

pub use log_capture::LogCapture;

use async_trait::async_trait;
use mlm_common::events::ModelEvent;
use mlm_trainer::models::evaluation::{higher_is_better, metrics};
use chrono::{DateTime, Utc};
use mlm_trainer::models::{Column, Comparator, Dataset, Evaluation, Row, Schema, Value, ValueKind};
use mlm_trainer::services::Listener;
use mlm_trainer::storage::{MemoryDataStorage, MemoryModelStorage, ModelStorage, StoredModel};
use mlm_trainer::types::{Model, ModelHandle, Trainer, TrainedModel};
use mlm_trainer::{TrainerError, TrainerResult};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Metric carrying the tag of the model an evaluation belongs to
pub const TAG: &str = "tag";

pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(vec![
            Column::feature("x", ValueKind::Float),
            Column::label("y", ValueKind::Float),
        ])
        .unwrap(),
    )
}

/// Rows (x, 2x) for each x
pub fn rows(xs: &[f64]) -> Dataset {
    let rows: Vec<Row> = xs
        .iter()
        .map(|x| vec![Value::from(*x), Value::from(2.0 * x)])
        .collect();
    Dataset::new(schema(), rows).unwrap()
}

pub fn primary_with(xs: &[f64]) -> Arc<MemoryDataStorage> {
    Arc::new(MemoryDataStorage::with_data(rows(xs)))
}

pub fn r_squared() -> Comparator {
    higher_is_better(metrics::R_SQUARED)
}

/// Model that predicts its own tag
#[derive(Debug)]
pub struct TaggedModel {
    pub tag: u32,
}

impl Model for TaggedModel {
    fn predict(&self, _features: &[Value]) -> TrainerResult<Row> {
        Ok(vec![Value::from(self.tag as f64)])
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

pub fn tag_of(model: &ModelHandle) -> u32 {
    model
        .as_any()
        .and_then(|any| any.downcast_ref::<TaggedModel>())
        .map(|m| m.tag)
        .unwrap_or(0)
}

/// Trainer whose n-th attempt scores `scores[n]` (the last score repeats)
///
/// Models are tagged 1, 2, 3... in training order. Evaluations carry the
/// tag so readers can check model and evaluation belong together, and the
/// row count each model was trained on is kept per tag.
pub struct ScriptedTrainer {
    scores: Vec<f64>,
    delay: Duration,
    calls: AtomicU32,
    evaluations: AtomicU32,
    known: Mutex<HashMap<u32, f64>>,
    rows: Mutex<HashMap<u32, usize>>,
}

impl ScriptedTrainer {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            evaluations: AtomicU32::new(0),
            known: Mutex::new(HashMap::new()),
            rows: Mutex::new(HashMap::new()),
        }
    }

    /// Every training call takes `delay` (observing cancellation)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn evaluations(&self) -> u32 {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Rows the model tagged `tag` was trained on
    pub fn rows_for(&self, tag: u32) -> Option<usize> {
        self.rows.lock().unwrap().get(&tag).copied()
    }

    fn evaluation(tag: u32, score: f64) -> Evaluation {
        Evaluation::new()
            .with(metrics::R_SQUARED, score)
            .with(TAG, tag as f64)
    }
}

#[async_trait]
impl Trainer for ScriptedTrainer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn train(
        &self,
        _incumbent: Option<&ModelHandle>,
        data: &Dataset,
        cancel: &CancellationToken,
    ) -> TrainerResult<Option<TrainedModel>> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Err(TrainerError::Cancelled),
            }
        }
        let tag = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let index = (tag as usize - 1).min(self.scores.len().saturating_sub(1));
        let score = self.scores.get(index).copied().unwrap_or(0.0);
        self.known.lock().unwrap().insert(tag, score);
        self.rows.lock().unwrap().insert(tag, data.len());
        Ok(Some(TrainedModel::with_evaluation(
            Arc::new(TaggedModel { tag }),
            Self::evaluation(tag, score),
        )))
    }

    async fn evaluate(
        &self,
        model: &ModelHandle,
        _data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Evaluation> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let tag = tag_of(model);
        let score = self.known.lock().unwrap().get(&tag).copied().unwrap_or(0.0);
        Ok(Self::evaluation(tag, score))
    }
}

/// Trainer that records how many `train` calls overlap
///
/// Each call holds for `delay` unless cancelled and yields a model tagged
/// with its call number.
pub struct InFlightTrainer {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicU32,
}

impl InFlightTrainer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Largest number of `train` calls seen running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count when a `train` call ends or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Trainer for InFlightTrainer {
    fn name(&self) -> &str {
        "in-flight"
    }

    async fn train(
        &self,
        _incumbent: Option<&ModelHandle>,
        _data: &Dataset,
        cancel: &CancellationToken,
    ) -> TrainerResult<Option<TrainedModel>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return Err(TrainerError::Cancelled),
        }
        let tag = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(TrainedModel::with_evaluation(
            Arc::new(TaggedModel { tag }),
            Evaluation::new()
                .with(metrics::R_SQUARED, 0.5)
                .with(TAG, tag as f64),
        )))
    }

    async fn evaluate(
        &self,
        model: &ModelHandle,
        _data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Evaluation> {
        Ok(Evaluation::new()
            .with(metrics::R_SQUARED, 0.5)
            .with(TAG, tag_of(model) as f64))
    }
}

/// Trainer that never produces a model
#[derive(Default)]
pub struct AbsentTrainer {
    pub calls: AtomicU32,
}

#[async_trait]
impl Trainer for AbsentTrainer {
    fn name(&self) -> &str {
        "absent"
    }

    async fn train(
        &self,
        _incumbent: Option<&ModelHandle>,
        _data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Option<TrainedModel>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn evaluate(
        &self,
        _model: &ModelHandle,
        _data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Evaluation> {
        Ok(Evaluation::new())
    }
}

/// Trainer that never returns and ignores cancellation
pub struct HangingTrainer;

#[async_trait]
impl Trainer for HangingTrainer {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn train(
        &self,
        _incumbent: Option<&ModelHandle>,
        _data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Option<TrainedModel>> {
        std::future::pending::<()>().await;
        Ok(None)
    }

    async fn evaluate(
        &self,
        _model: &ModelHandle,
        _data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Evaluation> {
        Ok(Evaluation::new())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("arithmetic overflow while fitting")]
pub struct ArithmeticOverflow;

/// Trainer that always fails with [`ArithmeticOverflow`]
pub struct FailingTrainer {
    pub delay: Duration,
}

#[async_trait]
impl Trainer for FailingTrainer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn train(
        &self,
        _incumbent: Option<&ModelHandle>,
        _data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Option<TrainedModel>> {
        tokio::time::sleep(self.delay).await;
        Err(TrainerError::training(ArithmeticOverflow))
    }

    async fn evaluate(
        &self,
        _model: &ModelHandle,
        _data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Evaluation> {
        Ok(Evaluation::new())
    }
}

/// Model store whose first save panics; later saves land in `models`
#[derive(Default)]
pub struct PanickingModelStorage {
    pub models: MemoryModelStorage,
    saves: AtomicU32,
}

#[async_trait]
impl ModelStorage for PanickingModelStorage {
    async fn load_model(&self) -> TrainerResult<Option<StoredModel>> {
        self.models.load_model().await
    }

    async fn save_model(&self, model: &ModelHandle, schema: &Arc<Schema>) -> TrainerResult<()> {
        if self.saves.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("model store crashed");
        }
        self.models.save_model(model, schema).await
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.models.last_modified()
    }
}

/// Collects every event delivered to a listener
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ModelEvent>>>,
}

impl EventRecorder {
    pub fn listener(&self) -> Listener {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &ModelEvent| -> anyhow::Result<()> {
            events.lock().unwrap().push(event.clone());
            Ok(())
        })
    }

    pub fn events(&self) -> Vec<ModelEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.types().iter().filter(|t| *t == event_type).count()
    }
}
