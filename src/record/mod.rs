// Typed records built from raw input rows


pub mod render;
pub mod schema;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use schema::{FieldKind, Schema};

/// A single typed column value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    /// `None` when the source column was empty, e.g. a percentage with no attempts
    OptionalFloat(Option<f64>),
    Text(String),
}

impl FieldValue {
    #[inline]
    pub fn kind(&self) -> FieldKind {
        match *self {
            FieldValue::Integer(_) => FieldKind::Integer,
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::OptionalFloat(_) => FieldKind::OptionalFloat,
            FieldValue::Text(_) => FieldKind::Text,
        }
    }

    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::OptionalFloat(None))
    }
}

impl fmt::Display for FieldValue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) | FieldValue::OptionalFloat(Some(v)) => write!(f, "{}", v),
            FieldValue::OptionalFloat(None) => write!(f, "N/A"),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One entity observation, laid out in schema order. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    values: Vec<FieldValue>,
}

impl Record {
    /// Wrap values that are already known to follow a schema's layout
    #[inline]
    pub fn from_values(values: Vec<FieldValue>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }

    #[inline]
    pub fn field<'a>(&'a self, schema: &Schema, column: &str) -> Option<&'a FieldValue> {
        schema.position_of(column).and_then(|i| self.values.get(i))
    }

    /// Value of the schema's key column, e.g. the player name
    #[inline]
    pub fn key<'a>(&'a self, schema: &Schema) -> Option<&'a str> {
        self.values
            .get(schema.key_index())
            .and_then(FieldValue::as_text)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("expected row of length {expected}, got {actual}")]
    RowLength { expected: usize, actual: usize },
    #[error("failed to parse {kind} at index {index} ({column}) from {value:?}: {reason}")]
    FieldParse {
        index: usize,
        column: String,
        kind: FieldKind,
        value: String,
        reason: String,
    },
}

/// Build a [`Record`] from a raw row.
///
/// The row must have exactly `schema.width()` values. Every column is parsed
/// according to its [`FieldKind`]; an empty optional-float column becomes an
/// absent value rather than zero.
#[inline]
pub fn build<S: AsRef<str>>(schema: &Schema, row: &[S]) -> Result<Record, RecordError> {
    if row.len() != schema.width() {
        return Err(RecordError::RowLength {
            expected: schema.width(),
            actual: row.len(),
        });
    }

    let values = schema
        .fields()
        .iter()
        .map(|field| {
            let raw = row[field.index].as_ref();
            parse_value(field.kind, raw).map_err(|reason| RecordError::FieldParse {
                index: field.index,
                column: field.column.clone(),
                kind: field.kind,
                value: raw.to_string(),
                reason,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Record { values })
}

fn parse_value(kind: FieldKind, raw: &str) -> Result<FieldValue, String> {
    match kind {
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|e| e.to_string()),
        FieldKind::Float => parse_float(raw).map(FieldValue::Float),
        FieldKind::OptionalFloat if raw.is_empty() => Ok(FieldValue::OptionalFloat(None)),
        FieldKind::OptionalFloat => parse_float(raw).map(|v| FieldValue::OptionalFloat(Some(v))),
        FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
    }
}

fn parse_float(raw: &str) -> Result<f64, String> {
    let value = raw.parse::<f64>().map_err(|e| e.to_string())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err("value is not finite".to_string())
    }
}
