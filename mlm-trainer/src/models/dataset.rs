//! Tabular datasets: schema, rows and merge
//!
//! A `Dataset` is an immutable value: merging produces a new dataset, it never
//! mutates either side.

use crate::error::{TrainerError, TrainerResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of value a column holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Integer,
    Float,
    Text,
    Boolean,
}

/// Single cell value
///
/// Equality is exact (floats included): duplicate detection compares stored
/// values bit for bit as they were written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Boolean(_) => ValueKind::Boolean,
        }
    }

    /// Numeric view of the value (integers widen to f64)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn fits(&self, kind: ValueKind) -> bool {
        // Integers are accepted in float columns: JSON does not keep "1.0" apart from "1"
        self.kind() == kind || (kind == ValueKind::Float && self.kind() == ValueKind::Integer)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
            Value::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// One row of values, in schema column order
pub type Row = Vec<Value>;

/// Role a column plays for training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    #[default]
    Feature,
    Label,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub role: ColumnRole,
}

impl Column {
    pub fn feature(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            role: ColumnRole::Feature,
        }
    }

    pub fn label(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            role: ColumnRole::Label,
        }
    }
}

/// Structural description of a dataset; immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> TrainerResult<Self> {
        if columns.is_empty() {
            return Err(TrainerError::SchemaMismatch("schema has no columns".to_string()));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(TrainerError::SchemaMismatch(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        if columns.iter().filter(|c| c.role == ColumnRole::Label).count() > 1 {
            return Err(TrainerError::SchemaMismatch(
                "at most one label column is supported".to_string(),
            ));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Index of the label column, if the schema has one
    pub fn label_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.role == ColumnRole::Label)
    }

    /// Feature columns, in order
    pub fn features(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.role == ColumnRole::Feature)
    }

    pub fn feature_count(&self) -> usize {
        self.features().count()
    }

    /// Check a full training row (every column present)
    pub fn validate_row(&self, row: &[Value]) -> TrainerResult<()> {
        Self::check(self.columns.iter(), row)
    }

    /// Check a prediction input (feature columns only)
    pub fn validate_input(&self, row: &[Value]) -> TrainerResult<()> {
        Self::check(self.features(), row)
    }

    fn check<'a>(columns: impl Iterator<Item = &'a Column>, row: &[Value]) -> TrainerResult<()> {
        let columns: Vec<&Column> = columns.collect();
        if columns.len() != row.len() {
            return Err(TrainerError::SchemaMismatch(format!(
                "expected {} values, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row) {
            if !value.fits(column.kind) {
                return Err(TrainerError::SchemaMismatch(format!(
                    "column '{}' expects {:?}, got {:?}",
                    column.name,
                    column.kind,
                    value.kind()
                )));
            }
        }
        Ok(())
    }
}

/// Immutable table of rows sharing one schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    schema: Arc<Schema>,
    rows: Vec<Row>,
}

impl Dataset {
    /// Build a dataset, validating every row against the schema
    pub fn new(schema: Arc<Schema>, rows: Vec<Row>) -> TrainerResult<Self> {
        for (i, row) in rows.iter().enumerate() {
            schema.validate_row(row).map_err(|e| {
                TrainerError::SchemaMismatch(format!("row {}: {}", i, e))
            })?;
        }
        Ok(Self { schema, rows })
    }

    /// Empty dataset sharing `schema`
    pub fn empty(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact match of every field against any row
    pub fn contains_row(&self, row: &[Value]) -> bool {
        self.rows.iter().any(|existing| existing.as_slice() == row)
    }

    /// New dataset holding this dataset's rows followed by `other`'s
    pub fn merge(&self, other: &Dataset) -> TrainerResult<Dataset> {
        if self.schema.columns() != other.schema.columns() {
            return Err(TrainerError::SchemaMismatch(
                "cannot merge datasets with different columns".to_string(),
            ));
        }
        let mut rows = Vec::with_capacity(self.rows.len() + other.rows.len());
        rows.extend(self.rows.iter().cloned());
        rows.extend(other.rows.iter().cloned());
        Ok(Dataset {
            schema: Arc::clone(&self.schema),
            rows,
        })
    }

    /// Merge two optional datasets; either may be absent
    pub fn merge_optional(
        primary: Option<Dataset>,
        buffer: Option<Dataset>,
    ) -> TrainerResult<Option<Dataset>> {
        match (primary, buffer) {
            (Some(primary), Some(buffer)) => primary.merge(&buffer).map(Some),
            (Some(primary), None) => Ok(Some(primary)),
            (None, Some(buffer)) => Ok(Some(buffer)),
            (None, None) => Ok(None),
        }
    }

    /// Keep the rows matching `keep`
    pub fn filter(&self, mut keep: impl FnMut(&Row) -> bool) -> Dataset {
        Dataset {
            schema: Arc::clone(&self.schema),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}
