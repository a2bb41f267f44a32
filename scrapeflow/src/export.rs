//! Record table output.
//!
//! Columns always follow the [`FieldSet`] order, whatever the records hold.

use crate::errors::ScrapeflowError;
use crate::extraction::{ExtractionRecord, FieldSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// Output format for the record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    /// Pretty-printed JSON array of objects.
    #[default]
    Json,
    /// Header row of field names, one row per record. Nulls are empty cells.
    Csv,
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown table format: {other}")),
        }
    }
}

/// Writes `records` to `out` in `format`.
///
/// # Errors
///
/// `Serialization` if encoding fails, `Io` if writing fails.
pub fn write_records<W: Write>(
    format: TableFormat,
    fields: &FieldSet,
    records: &[ExtractionRecord],
    mut out: W,
) -> Result<(), ScrapeflowError> {
    match format {
        TableFormat::Json => {
            serde_json::to_writer_pretty(&mut out, records)?;
            writeln!(out)?;
        }
        TableFormat::Csv => write_csv(fields, records, out)?,
    }
    Ok(())
}

fn write_csv<W: Write>(
    fields: &FieldSet,
    records: &[ExtractionRecord],
    out: W,
) -> Result<(), ScrapeflowError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(fields.iter())?;
    for record in records {
        writer.write_record(fields.iter().map(|name| record.get(name).unwrap_or_default()))?;
    }
    writer.flush()?;
    Ok(())
}
