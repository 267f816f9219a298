use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::Result;

/// A header row and the data rows below it, as read from a CSV file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SourceTable {
    /// Read a CSV file with a header row.
    ///
    /// `drop_trailing` metadata columns are removed from the header and from
    /// every row. Rows keep their own length otherwise so that short or long
    /// rows are reported by the record builder with their row index.
    #[inline]
    pub fn from_path(path: &Path, drop_trailing: usize) -> Result<Self> {
        debug!("Reading source table from {}", path.display());
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, drop_trailing)
    }

    #[inline]
    pub fn from_reader<R: Read>(reader: R, drop_trailing: usize) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let header = trim_trailing(
            csv_reader.headers()?.iter().map(str::to_string).collect(),
            drop_trailing,
        );

        let mut rows = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            rows.push(trim_trailing(
                record.iter().map(str::to_string).collect(),
                drop_trailing,
            ));
        }

        debug!(
            "Read {} rows with {} columns",
            rows.len(),
            header.len()
        );
        Ok(Self { header, rows })
    }

    #[inline]
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    #[inline]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    #[inline]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn trim_trailing(mut columns: Vec<String>, drop_trailing: usize) -> Vec<String> {
    let keep = columns.len().saturating_sub(drop_trailing);
    columns.truncate(keep);
    columns
}
