//! Descriptive statistics over numeric columns.
//!
//! The free functions operate on plain slices; the [`CsvTable`] methods
//! resolve a column by name first.

use std::collections::HashMap;
use std::fmt;

use super::{AnalysisError, CsvTable};

/// Most frequent value(s) of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Every value appears exactly once.
    None,
    /// A single most frequent value.
    Single(f64),
    /// Several values share the highest frequency, in ascending order.
    Multiple(Vec<f64>),
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "No mode - all values appear once"),
            Self::Single(v) => write!(f, "{v}"),
            Self::Multiple(values) => {
                let joined = values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Multiple modes: {joined}")
            }
        }
    }
}

/// Arithmetic mean. `values` must not be empty.
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median; the mean of the two middle values for even-length input.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population variance.
#[allow(clippy::cast_precision_loss)]
pub fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn standard_deviation(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Most frequent value(s).
pub fn mode(values: &[f64]) -> Mode {
    let mut frequencies: HashMap<u64, (f64, usize)> = HashMap::new();
    for &v in values {
        // Fold -0.0 into 0.0 so both count as the same value.
        let v = if v == 0.0 { 0.0 } else { v };
        frequencies.entry(v.to_bits()).or_insert((v, 0)).1 += 1;
    }

    let max_freq = frequencies.values().map(|(_, n)| *n).max().unwrap_or(0);
    if max_freq <= 1 {
        return Mode::None;
    }

    let mut modes: Vec<f64> = frequencies
        .values()
        .filter(|(_, n)| *n == max_freq)
        .map(|(v, _)| *v)
        .collect();
    modes.sort_by(f64::total_cmp);

    if modes.len() == 1 {
        Mode::Single(modes[0])
    } else {
        Mode::Multiple(modes)
    }
}

impl CsvTable {
    /// Mean of a numeric column.
    pub fn mean(&self, column: &str) -> Result<f64, AnalysisError> {
        Ok(mean(&self.numeric_column(column)?))
    }

    /// Median of a numeric column.
    pub fn median(&self, column: &str) -> Result<f64, AnalysisError> {
        Ok(median(&self.numeric_column(column)?))
    }

    /// Mode of a numeric column.
    pub fn mode(&self, column: &str) -> Result<Mode, AnalysisError> {
        Ok(mode(&self.numeric_column(column)?))
    }

    /// Population variance of a numeric column.
    pub fn variance(&self, column: &str) -> Result<f64, AnalysisError> {
        Ok(variance(&self.numeric_column(column)?))
    }

    /// Population standard deviation of a numeric column.
    pub fn standard_deviation(&self, column: &str) -> Result<f64, AnalysisError> {
        Ok(standard_deviation(&self.numeric_column(column)?))
    }
}
