
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Store columns that every table carries in addition to the schema fields
pub const RESERVED_COLUMNS: &[&str] = &["row_id", "vector", "embedding"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Float,
    OptionalFloat,
    Text,
}

impl fmt::Display for FieldKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::OptionalFloat => write!(f, "optional float"),
            FieldKind::Text => write!(f, "text"),
        }
    }
}

/// One column of the fixed record layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Position of the value in an input row
    pub index: usize,
    /// Column name used by the store
    pub column: String,
    pub kind: FieldKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("empty fields")]
    EmptyFields,
    #[error("fields and row must have the same length ({fields} fields, {row} values)")]
    LengthMismatch { fields: usize, row: usize },
    #[error("invalid schema: {0}")]
    InvalidDescriptor(String),
}

/// Ordered record layout shared by the record builder and the stores.
///
/// A `Schema` can only be obtained through [`Schema::new`], which checks that
/// indices are contiguous, column names are usable as SQL identifiers, and the
/// key column holds text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    label: String,
    fields: Vec<FieldSpec>,
    key: usize,
}

impl Schema {
    #[inline]
    pub fn new(
        label: impl Into<String>,
        fields: Vec<FieldSpec>,
        key_column: &str,
    ) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::EmptyFields);
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for (position, field) in fields.iter().enumerate() {
            if field.index != position {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "field '{}' has index {} but sits at position {}",
                    field.column, field.index, position
                )));
            }
            if !is_identifier(&field.column) {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "column name '{}' must match [a-z_][a-z0-9_]*",
                    field.column
                )));
            }
            if RESERVED_COLUMNS.contains(&field.column.as_str()) {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "column name '{}' is reserved",
                    field.column
                )));
            }
            if !seen.insert(field.column.as_str()) {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "duplicate column '{}'",
                    field.column
                )));
            }
        }

        let key = fields
            .iter()
            .position(|f| f.column == key_column)
            .ok_or_else(|| {
                SchemaError::InvalidDescriptor(format!("key column '{}' not found", key_column))
            })?;
        if fields[key].kind != FieldKind::Text {
            return Err(SchemaError::InvalidDescriptor(format!(
                "key column '{}' must be text, found {}",
                key_column, fields[key].kind
            )));
        }

        Ok(Self {
            label: label.into(),
            fields,
            key,
        })
    }

    /// Build a schema from `(column, kind)` pairs, assigning indices in order
    #[inline]
    pub fn from_columns(
        label: impl Into<String>,
        columns: &[(&str, FieldKind)],
        key_column: &str,
    ) -> Result<Self, SchemaError> {
        let fields = columns
            .iter()
            .enumerate()
            .map(|(index, (column, kind))| FieldSpec {
                index,
                column: (*column).to_string(),
                kind: *kind,
            })
            .collect();
        Self::new(label, fields, key_column)
    }

    /// Layout of the basketball-reference "Player Per Game" table, without the
    /// trailing `Player-additional` identifier column.
    #[inline]
    pub fn player_per_game() -> Self {
        use FieldKind::{Float, Integer, OptionalFloat, Text};

        let columns: [(&str, FieldKind); 30] = [
            ("rank", Integer),
            ("name", Text),
            ("position", Text),
            ("age", Integer),
            ("team", Text),
            ("games", Integer),
            ("games_started", Integer),
            ("minutes_played", Float),
            ("field_goals", Float),
            ("field_goal_attempts", Float),
            ("field_goal_pct", OptionalFloat),
            ("three_pointers", Float),
            ("three_point_attempts", Float),
            ("three_point_pct", OptionalFloat),
            ("two_pointers", Float),
            ("two_point_attempts", Float),
            ("two_point_pct", OptionalFloat),
            ("effective_fg_pct", OptionalFloat),
            ("free_throws", Float),
            ("free_throw_attempts", Float),
            ("free_throw_pct", OptionalFloat),
            ("offensive_rebounds", Float),
            ("defensive_rebounds", Float),
            ("total_rebounds", Float),
            ("assists", Float),
            ("steals", Float),
            ("blocks", Float),
            ("turnovers", Float),
            ("personal_fouls", Float),
            ("points", Float),
        ];

        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(index, (column, kind))| FieldSpec {
                index,
                column: column.to_string(),
                kind,
            })
            .collect();

        Self {
            label: "Player Per Game".to_string(),
            fields,
            key: 1,
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Number of columns an input row must have
    #[inline]
    pub fn width(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn key_index(&self) -> usize {
        self.key
    }

    #[inline]
    pub fn key_field(&self) -> &FieldSpec {
        &self.fields[self.key]
    }

    #[inline]
    pub fn position_of(&self, column: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.column == column)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
