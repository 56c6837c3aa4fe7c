//! CSV parsing and column analysis.
//!
//! This module turns uploaded CSV text into a [`CsvTable`] and provides the
//! read-only statistics and search operations the assistant exposes to the
//! model as tools.
//!
//! # Overview
//!
//! - [`CsvTable`]: parsed header row plus string cells
//! - [`stats`]: mean, median, mode, variance and standard deviation
//! - [`search`]: column summaries, value search and row lookup
//!
//! # Example
//!
//! ```rust
//! use csv_analyst::analysis::CsvTable;
//!
//! let table = CsvTable::parse("name,score\nada,3\nbob,5\n").unwrap();
//! assert_eq!(table.headers(), ["name", "score"]);
//! assert_eq!(table.mean("score").unwrap(), 4.0);
//! ```

pub mod search;
pub mod stats;
mod table;

pub use stats::Mode;
pub use table::{ColumnKind, CsvTable};

/// Errors produced while parsing or analysing CSV data.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The uploaded text contained no header row.
    #[error("CSV data is empty")]
    EmptyCsv,

    /// The CSV reader rejected the input.
    #[error("Failed to parse CSV: {0}")]
    Parse(#[from] csv::Error),

    /// No column with the requested header exists.
    #[error("Column '{0}' not found in CSV")]
    ColumnNotFound(String),

    /// No row whose index cell matches the requested label exists.
    #[error("Row '{0}' not found in CSV")]
    RowNotFound(String),

    /// A numeric operation hit a cell that is not a number.
    #[error("Column '{0}' contains non-numeric values")]
    NonNumeric(String),

    /// A numeric operation found no values to work with.
    #[error("Column '{0}' has no values")]
    EmptyColumn(String),
}
