//! Column summaries and text search.
//!
//! These operations produce human-readable reports because their output is
//! fed straight back to the model as tool results.

use std::collections::HashMap;
use std::fmt::Write as _;

use super::{AnalysisError, CsvTable, stats};

/// Default number of rows shown by [`CsvTable::search_rows`].
pub const DEFAULT_ROW_LIMIT: usize = 5;

/// Number of example values shown per column by [`CsvTable::search_value`].
const PREVIEW_VALUES: usize = 3;

/// Number of most common values listed for text columns.
const TOP_VALUES: usize = 3;

fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    !haystack.is_empty() && haystack.to_lowercase().contains(needle_lower)
}

impl CsvTable {
    /// Count of each distinct non-empty cell in a column, most frequent
    /// first. Ties keep the order of first appearance.
    pub fn value_counts(&self, column: &str) -> Result<Vec<(String, usize)>, AnalysisError> {
        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();

        for cell in self.column(column)? {
            if cell.is_empty() {
                continue;
            }
            let count = counts.entry(cell).or_insert(0);
            if *count == 0 {
                order.push(cell.to_string());
            }
            *count += 1;
        }

        let mut result: Vec<(String, usize)> = order
            .into_iter()
            .map(|value| {
                let n = counts[value.as_str()];
                (value, n)
            })
            .collect();
        // Stable sort keeps first-appearance order among equal counts.
        result.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(result)
    }

    /// Describe a column: type, value counts, and either numeric range or
    /// the most common values.
    pub fn column_info(&self, column: &str) -> Result<String, AnalysisError> {
        let kind = self.column_kind(column)?;

        let mut info = format!("Column '{column}' analysis:\n");
        let _ = writeln!(info, "- Data type: {}", kind.label());
        let _ = writeln!(info, "- Total values: {}", self.row_count());
        let _ = writeln!(info, "- Unique values: {}", self.unique_count(column)?);
        let _ = writeln!(info, "- Missing values: {}", self.missing_count(column)?);

        if kind.is_numeric() {
            match self.numeric_column(column) {
                Ok(values) => {
                    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let _ = writeln!(info, "- Minimum value: {min}");
                    let _ = writeln!(info, "- Maximum value: {max}");
                    let _ = writeln!(info, "- Average value: {:.2}", stats::mean(&values));
                }
                Err(AnalysisError::EmptyColumn(_)) => {}
                Err(e) => return Err(e),
            }
        } else {
            info.push_str("- Most common values:\n");
            for (value, count) in self.value_counts(column)?.into_iter().take(TOP_VALUES) {
                let _ = writeln!(info, "  * {value}: {count} times");
            }
        }

        Ok(info)
    }

    /// Search every column for cells containing `query`, ignoring case.
    #[must_use]
    pub fn search_value(&self, query: &str) -> String {
        let needle = query.to_lowercase();
        let mut results = Vec::new();

        for (idx, header) in self.headers().iter().enumerate() {
            let mut matches = 0usize;
            let mut unique: Vec<&str> = Vec::new();

            for row in self.rows() {
                let cell = row[idx].as_str();
                if contains_ignore_case(cell, &needle) {
                    matches += 1;
                    if !unique.contains(&cell) {
                        unique.push(cell);
                    }
                }
            }

            if matches == 0 {
                continue;
            }

            let mut preview = unique
                .iter()
                .take(PREVIEW_VALUES)
                .copied()
                .collect::<Vec<_>>()
                .join(", ");
            if unique.len() > PREVIEW_VALUES {
                let _ = write!(preview, ", ... and {} more", unique.len() - PREVIEW_VALUES);
            }

            results.push(format!(
                "- Column '{header}': {matches} matches found\n  Example matches: {preview}"
            ));
        }

        if results.is_empty() {
            format!("No matches found for '{query}' in any column")
        } else {
            format!("Search results for '{query}':\n{}", results.join("\n"))
        }
    }

    /// Find rows whose `column` cell contains `query` (ignoring case) and
    /// print up to `limit` of them in full.
    pub fn search_rows(
        &self,
        column: &str,
        query: &str,
        limit: usize,
    ) -> Result<String, AnalysisError> {
        let idx = self.column_index(column)?;
        let needle = query.to_lowercase();

        let matches: Vec<(usize, &Vec<String>)> = self
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, row)| contains_ignore_case(&row[idx], &needle))
            .collect();

        if matches.is_empty() {
            return Ok(format!(
                "No matches found for '{query}' in column '{column}'"
            ));
        }

        let total = matches.len();
        let mut result = format!("Found {total} rows where {column} contains '{query}':\n");
        if total > limit {
            let _ = writeln!(result, "(Showing first {limit} matches)\n");
        } else {
            result.push('\n');
        }

        for (row_idx, row) in matches.into_iter().take(limit) {
            let _ = writeln!(result, "Match #{}:", row_idx + 1);
            for (header, value) in self.headers().iter().zip(row) {
                let value = if value.is_empty() { "N/A" } else { value.as_str() };
                let _ = writeln!(result, "- {header}: {value}");
            }
            result.push('\n');
        }

        Ok(result)
    }
}
