//! Linear regression model family
//!
//! A small gradient-descent regressor used by the `mlm-trainer` binary.
//! Each training call continues from the incumbent's weights, so a cycling
//! orchestrator keeps refining the fit until it stops improving.

use crate::error::{TrainerError, TrainerResult};
use crate::models::evaluation::metrics;
use crate::models::{Dataset, Evaluation, Row, Value};
use crate::storage::ModelCodec;
use crate::types::{Model, ModelHandle, Trainer, TrainedModel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Root mean squared error (lower wins)
pub const RMS_ERROR: &str = "rms_error";

/// y = bias + Σ weights·x
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearModel {
    fn zeros(features: usize) -> Self {
        Self {
            weights: vec![0.0; features],
            bias: 0.0,
        }
    }

    fn apply(&self, x: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }
}

impl Model for LinearModel {
    fn predict(&self, features: &[Value]) -> TrainerResult<Row> {
        let x = numeric(features)?;
        if x.len() != self.weights.len() {
            return Err(TrainerError::SchemaMismatch(format!(
                "expected {} features, got {}",
                self.weights.len(),
                x.len()
            )));
        }
        Ok(vec![Value::Float(self.apply(&x))])
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

fn numeric(values: &[Value]) -> TrainerResult<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                TrainerError::SchemaMismatch(format!("value '{}' is not numeric", v))
            })
        })
        .collect()
}

/// Split rows into feature vectors and labels; `None` without a label column
fn split(data: &Dataset) -> TrainerResult<Option<(Vec<Vec<f64>>, Vec<f64>)>> {
    let Some(label) = data.schema().label_index() else {
        return Ok(None);
    };
    let mut features = Vec::with_capacity(data.len());
    let mut labels = Vec::with_capacity(data.len());
    for row in data.rows() {
        let mut values = numeric(row)?;
        labels.push(values.remove(label));
        features.push(values);
    }
    Ok(Some((features, labels)))
}

/// Gradient-descent trainer for [`LinearModel`]
#[derive(Debug, Clone)]
pub struct LinearRegressionTrainer {
    /// Passes over the data per training call
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for LinearRegressionTrainer {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.01,
        }
    }
}

#[async_trait]
impl Trainer for LinearRegressionTrainer {
    fn name(&self) -> &str {
        "linear-regression"
    }

    async fn train(
        &self,
        incumbent: Option<&ModelHandle>,
        data: &Dataset,
        cancel: &CancellationToken,
    ) -> TrainerResult<Option<TrainedModel>> {
        let Some((x, y)) = split(data)? else {
            return Ok(None);
        };
        if y.is_empty() {
            return Ok(None);
        }
        let features = data.schema().feature_count();
        let start = incumbent
            .and_then(|model| model.as_any())
            .and_then(|any| any.downcast_ref::<LinearModel>())
            .filter(|model| model.weights.len() == features)
            .cloned()
            .unwrap_or_else(|| LinearModel::zeros(features));

        let epochs = self.epochs;
        let rate = self.learning_rate;
        let cancel = cancel.clone();
        let fitted = tokio::task::spawn_blocking(move || descend(start, &x, &y, epochs, rate, &cancel))
            .await
            .map_err(TrainerError::training)??;

        debug!(weights = ?fitted.weights, bias = fitted.bias, "Fitted linear model");
        Ok(Some(TrainedModel::new(Arc::new(fitted))))
    }

    async fn evaluate(
        &self,
        model: &ModelHandle,
        data: &Dataset,
        _cancel: &CancellationToken,
    ) -> TrainerResult<Evaluation> {
        let Some((x, y)) = split(data)? else {
            return Err(TrainerError::InvalidState(
                "cannot evaluate without a label column".to_string(),
            ));
        };
        let predicted = x
            .iter()
            .map(|row| {
                let features: Vec<Value> = row.iter().copied().map(Value::Float).collect();
                model
                    .predict(&features)?
                    .first()
                    .and_then(Value::as_f64)
                    .ok_or_else(|| TrainerError::InvalidState("model produced no output".to_string()))
            })
            .collect::<TrainerResult<Vec<f64>>>()?;
        Ok(score(&predicted, &y))
    }
}

fn descend(
    mut model: LinearModel,
    x: &[Vec<f64>],
    y: &[f64],
    epochs: usize,
    rate: f64,
    cancel: &CancellationToken,
) -> TrainerResult<LinearModel> {
    let n = y.len() as f64;
    for _ in 0..epochs {
        if cancel.is_cancelled() {
            return Err(TrainerError::Cancelled);
        }
        let mut grad_w = vec![0.0; model.weights.len()];
        let mut grad_b = 0.0;
        for (row, target) in x.iter().zip(y) {
            let err = model.apply(row) - target;
            for (g, v) in grad_w.iter_mut().zip(row) {
                *g += err * v;
            }
            grad_b += err;
        }
        for (w, g) in model.weights.iter_mut().zip(&grad_w) {
            *w -= rate * g / n;
        }
        model.bias -= rate * grad_b / n;
    }
    if !model.bias.is_finite() || model.weights.iter().any(|w| !w.is_finite()) {
        return Err(TrainerError::training(anyhow::anyhow!(
            "gradient descent diverged (learning rate {})",
            rate
        )));
    }
    Ok(model)
}

/// R² and RMS error of `predicted` against `actual`
pub fn score(predicted: &[f64], actual: &[f64]) -> Evaluation {
    let n = actual.len().max(1) as f64;
    let mean = actual.iter().sum::<f64>() / n;
    let ss_res: f64 = predicted.iter().zip(actual).map(|(p, a)| (a - p).powi(2)).sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    Evaluation::new()
        .with(metrics::R_SQUARED, r_squared)
        .with(RMS_ERROR, (ss_res / n).sqrt())
}

/// JSON codec for [`LinearModel`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearModelCodec;

impl ModelCodec for LinearModelCodec {
    fn encode(&self, model: &ModelHandle) -> TrainerResult<serde_json::Value> {
        let linear = model
            .as_any()
            .and_then(|any| any.downcast_ref::<LinearModel>())
            .ok_or_else(|| TrainerError::Persistence("not a linear model".to_string()))?;
        Ok(serde_json::to_value(linear)?)
    }

    fn decode(&self, value: serde_json::Value) -> TrainerResult<ModelHandle> {
        let linear: LinearModel = serde_json::from_value(value)?;
        Ok(Arc::new(linear))
    }
}
