//! Labeled text rendering of records for generation prompts.

use itertools::Itertools;

use super::Record;
use super::schema::Schema;

impl Schema {
    /// Render every field as a `column: value` line.
    ///
    /// Absent optional values are written as `N/A` so the consumer sees that
    /// the statistic does not apply instead of a silently missing line.
    #[inline]
    pub fn render(&self, record: &Record) -> String {
        self.fields()
            .iter()
            .zip(record.values())
            .map(|(field, value)| format!("{}: {}", field.column, value))
            .join("\n")
    }
}
