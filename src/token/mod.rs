//! Deterministic text encoding of input rows for the embedding model.


use itertools::Itertools;
use serde::Serialize;

use crate::record::schema::SchemaError;

/// Envelope sent to the embedding model in place of the raw tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingInput<'a> {
    pub tokens: &'a str,
}

/// Return tokens for the given fields and row.
///
/// Each pair becomes a `"<field>": <value>` line, in input order. Identical
/// inputs always produce byte-identical output.
#[inline]
pub fn tokenize<F, V>(fields: &[F], row: &[V]) -> Result<String, SchemaError>
where
    F: AsRef<str>,
    V: AsRef<str>,
{
    if fields.is_empty() {
        return Err(SchemaError::EmptyFields);
    }
    if fields.len() != row.len() {
        return Err(SchemaError::LengthMismatch {
            fields: fields.len(),
            row: row.len(),
        });
    }

    Ok(fields
        .iter()
        .zip(row)
        .map(|(field, value)| format!("{:?}: {}", field.as_ref(), value.as_ref()))
        .join("\n"))
}

/// Wrap tokens into the JSON prompt understood by the embedding model
#[inline]
pub fn embedding_prompt(tokens: &str) -> String {
    serde_json::json!(EmbeddingInput { tokens }).to_string()
}
