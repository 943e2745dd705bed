//! Core collaborator traits for the training orchestrator
//!
//! - **Model:** an opaque, immutable trained transformer
//! - **Trainer:** produces challenger models and evaluates models
//!
//! The orchestrator never looks inside either; concrete model families
//! implement them and supply a comparator for their evaluations.

use crate::error::TrainerResult;
use crate::models::{Dataset, Evaluation, Row, Value};
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Trained model
///
/// Implementations must be immutable once built: snapshots hand the same
/// instance to any number of concurrent readers.
pub trait Model: Send + Sync + fmt::Debug {
    /// Predict an output row from feature values (schema feature order)
    fn predict(&self, features: &[Value]) -> TrainerResult<Row>;

    /// Concrete model access for codecs and warm-starting trainers
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// Shared handle to a trained model
pub type ModelHandle = Arc<dyn Model>;

/// True when both handles point at the same model instance
pub fn same_model(a: &ModelHandle, b: &ModelHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Challenger produced by a trainer
#[derive(Debug, Clone)]
pub struct TrainedModel {
    /// The newly trained model
    pub model: ModelHandle,
    /// Evaluation computed while training (e.g. cross-validation); when
    /// absent the orchestrator evaluates the model itself
    pub evaluation: Option<Evaluation>,
}

impl TrainedModel {
    pub fn new(model: ModelHandle) -> Self {
        Self {
            model,
            evaluation: None,
        }
    }

    pub fn with_evaluation(model: ModelHandle, evaluation: Evaluation) -> Self {
        Self {
            model,
            evaluation: Some(evaluation),
        }
    }
}

/// Training capability
///
/// May internally run k-fold cross-validation, shuffle, or do a single fit;
/// the orchestrator only cares about the model-or-absent it returns.
///
/// # Example
/// ```rust,ignore
/// struct Constant;
///
/// #[async_trait::async_trait]
/// impl Trainer for Constant {
///     fn name(&self) -> &str { "constant" }
///
///     async fn train(&self, _incumbent: Option<&ModelHandle>, _data: &Dataset,
///                    _cancel: &CancellationToken) -> TrainerResult<Option<TrainedModel>> {
///         Ok(Some(TrainedModel::new(Arc::new(ConstantModel(1.0)))))
///     }
///
///     async fn evaluate(&self, _model: &ModelHandle, _data: &Dataset,
///                       _cancel: &CancellationToken) -> TrainerResult<Evaluation> {
///         Ok(Evaluation::new().with("r_squared", 0.0))
///     }
/// }
/// ```
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Trainer name for logs
    fn name(&self) -> &str;

    /// Train a challenger against `data`
    ///
    /// `incumbent` is the currently published model, if any, for trainers
    /// that warm-start. Returns `Ok(None)` when no model can be produced.
    /// Should observe `cancel`; the orchestrator abandons the call when the
    /// round is cancelled even if it does not.
    async fn train(
        &self,
        incumbent: Option<&ModelHandle>,
        data: &Dataset,
        cancel: &CancellationToken,
    ) -> TrainerResult<Option<TrainedModel>>;

    /// Evaluate `model` against `data`
    async fn evaluate(
        &self,
        model: &ModelHandle,
        data: &Dataset,
        cancel: &CancellationToken,
    ) -> TrainerResult<Evaluation>;
}
