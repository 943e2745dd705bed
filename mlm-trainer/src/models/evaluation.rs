//! Evaluation metrics and the "better of two" strategies
//!
//! The orchestrator never interprets metric values itself. Each model family
//! supplies a `Comparator` (and optionally a `Formatter`) when the
//! orchestrator is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Well-known metric names used by the built-in comparators
pub mod metrics {
    /// Coefficient of determination (regression, higher wins)
    pub const R_SQUARED: &str = "r_squared";
    /// Micro-averaged accuracy (classification, higher wins)
    pub const MICRO_ACCURACY: &str = "micro_accuracy";
    /// Log-loss (classification, lower wins)
    pub const LOG_LOSS: &str = "log_loss";
    /// Average distance to the assigned centroid (clustering, lower wins)
    pub const AVERAGE_DISTANCE: &str = "average_distance";
}

/// Named metric values produced by evaluating a model against a dataset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evaluation {
    metrics: BTreeMap<String, f64>,
}

impl Evaluation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.insert(name.into(), value);
    }

    /// Metric value; NaN is reported as missing
    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().filter(|v| !v.is_nan())
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={:.4}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Which of two evaluations a comparator picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Better {
    First,
    Second,
}

/// "Better of two" strategy. Called as `(incumbent, challenger)`; either may be
/// absent. Ties must resolve to `First`.
pub type Comparator = Arc<dyn Fn(Option<&Evaluation>, Option<&Evaluation>) -> Better + Send + Sync>;

/// Display text for an evaluation; `None` means "nothing worth logging"
pub type Formatter = Arc<dyn Fn(&Evaluation) -> Option<String> + Send + Sync>;

/// Shared handling of absent evaluations: a present one beats an absent one,
/// two absent ones keep the first.
fn resolve_absent(first: Option<&Evaluation>, second: Option<&Evaluation>) -> Option<Better> {
    match (first, second) {
        (_, None) => Some(Better::First),
        (None, Some(_)) => Some(Better::Second),
        (Some(_), Some(_)) => None,
    }
}

/// Pick the evaluation whose `metric` is strictly larger
pub fn higher_is_better(metric: &'static str) -> Comparator {
    Arc::new(move |first: Option<&Evaluation>, second: Option<&Evaluation>| {
        resolve_absent(first, second).unwrap_or_else(|| {
            match (first.and_then(|e| e.get(metric)), second.and_then(|e| e.get(metric))) {
                (Some(a), Some(b)) if b > a => Better::Second,
                (None, Some(_)) => Better::Second,
                _ => Better::First,
            }
        })
    })
}

/// Pick the evaluation whose `metric` is strictly smaller
pub fn lower_is_better(metric: &'static str) -> Comparator {
    Arc::new(move |first: Option<&Evaluation>, second: Option<&Evaluation>| {
        resolve_absent(first, second).unwrap_or_else(|| {
            match (first.and_then(|e| e.get(metric)), second.and_then(|e| e.get(metric))) {
                (Some(a), Some(b)) if b < a => Better::Second,
                (None, Some(_)) => Better::Second,
                _ => Better::First,
            }
        })
    })
}

/// Multiclass classification: the second wins when its accuracy is not lower,
/// its log-loss is not higher, and at least one of them strictly improves.
pub fn multiclass() -> Comparator {
    Arc::new(|first: Option<&Evaluation>, second: Option<&Evaluation>| {
        resolve_absent(first, second).unwrap_or_else(|| {
            let read = |e: Option<&Evaluation>| {
                e.and_then(|e| Some((e.get(metrics::MICRO_ACCURACY)?, e.get(metrics::LOG_LOSS)?)))
            };
            match (read(first), read(second)) {
                (Some((acc_a, loss_a)), Some((acc_b, loss_b)))
                    if acc_b >= acc_a && loss_b <= loss_a && (acc_b > acc_a || loss_b < loss_a) =>
                {
                    Better::Second
                }
                (None, Some(_)) => Better::Second,
                _ => Better::First,
            }
        })
    })
}

/// Formatter printing every metric
pub fn default_formatter() -> Formatter {
    Arc::new(|evaluation: &Evaluation| {
        if evaluation.is_empty() {
            None
        } else {
            Some(evaluation.to_string())
        }
    })
}
