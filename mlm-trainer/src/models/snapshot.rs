//! Evaluator snapshot: the unit of publication
//!
//! A snapshot is never mutated after it is published. Readers hold an
//! `Arc<EvaluatorSnapshot>` and see one consistent (data, schema, model,
//! evaluation, timestamp) tuple even while training replaces it.

use super::dataset::{Dataset, Schema};
use super::evaluation::Evaluation;
use crate::error::{TrainerError, TrainerResult};
use crate::types::ModelHandle;
use chrono::{DateTime, Utc};
use mlm_common::time;
use std::fmt;
use std::sync::Arc;

/// Fields of a snapshot before publication
///
/// The publisher assigns the generation when it swaps the draft in.
#[derive(Clone, Default)]
pub struct SnapshotDraft {
    pub data: Option<Arc<Dataset>>,
    pub schema: Option<Arc<Schema>>,
    pub model: Option<ModelHandle>,
    pub evaluation: Option<Evaluation>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SnapshotDraft {
    /// Draft for `model` trained on `data`
    pub fn for_data(data: Arc<Dataset>, model: Option<ModelHandle>) -> Self {
        Self {
            schema: Some(Arc::clone(data.schema())),
            data: Some(data),
            model,
            evaluation: None,
            timestamp: None,
        }
    }

    pub fn evaluation(mut self, evaluation: Option<Evaluation>) -> Self {
        self.evaluation = evaluation;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Immutable published state
#[derive(Clone)]
pub struct EvaluatorSnapshot {
    generation: u64,
    data: Option<Arc<Dataset>>,
    schema: Option<Arc<Schema>>,
    model: Option<ModelHandle>,
    evaluation: Option<Evaluation>,
    timestamp: DateTime<Utc>,
}

impl EvaluatorSnapshot {
    /// Initial snapshot: nothing trained, timestamp zero
    pub fn empty() -> Self {
        Self {
            generation: 0,
            data: None,
            schema: None,
            model: None,
            evaluation: None,
            timestamp: time::zero(),
        }
    }

    /// Seal a draft under `generation`
    ///
    /// A model without a schema cannot validate prediction input, so the
    /// pair is rejected.
    pub fn from_draft(generation: u64, draft: SnapshotDraft) -> TrainerResult<Self> {
        if draft.model.is_some() && draft.schema.is_none() {
            return Err(TrainerError::InvalidState(
                "cannot publish a model without its schema".to_string(),
            ));
        }
        Ok(Self {
            generation,
            data: draft.data,
            schema: draft.schema,
            model: draft.model,
            evaluation: draft.evaluation,
            timestamp: draft.timestamp.unwrap_or_else(time::zero),
        })
    }

    /// Same contents, marked as never fresh
    pub(crate) fn invalidated(&self, generation: u64) -> Self {
        Self {
            generation,
            timestamp: time::zero(),
            ..self.clone()
        }
    }

    /// Monotonic publication counter
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn data(&self) -> Option<&Arc<Dataset>> {
        self.data.as_ref()
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.as_ref()
    }

    /// Instant of the data the model was trained against (zero when invalid)
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }
}

impl Default for EvaluatorSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for EvaluatorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorSnapshot")
            .field("generation", &self.generation)
            .field("rows", &self.data.as_ref().map(|d| d.len()))
            .field("has_model", &self.model.is_some())
            .field("evaluation", &self.evaluation)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
