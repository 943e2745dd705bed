//! Data model for the training orchestrator

pub mod capabilities;
pub mod dataset;
pub mod evaluation;
pub mod snapshot;

pub use capabilities::{Capabilities, CyclingPolicy};
pub use dataset::{Column, ColumnRole, Dataset, Row, Schema, Value, ValueKind};
pub use evaluation::{Better, Comparator, Evaluation, Formatter};
pub use snapshot::{EvaluatorSnapshot, SnapshotDraft};
