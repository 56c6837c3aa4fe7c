//! Parsed CSV table.

use std::collections::HashSet;

use super::AnalysisError;

/// Inferred type of a column, based on its non-empty cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every non-empty cell parses as an integer.
    Integer,
    /// Every non-empty cell parses as a number.
    Float,
    /// At least one cell is not a number.
    Text,
}

impl ColumnKind {
    /// Label used in column summaries.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
        }
    }

    /// Whether numeric summaries apply to this column.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// A CSV file held in memory as a header row and string cells.
///
/// Every row is padded or truncated to the header width, so indexing a row
/// by column position never goes out of bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Parse CSV text whose first record is the header row.
    ///
    /// Literal `\n` escape sequences are treated as line breaks, trailing
    /// commas at the end of the text are dropped and cells are trimmed.
    pub fn parse(text: &str) -> Result<Self, AnalysisError> {
        let cleaned = text
            .trim_end_matches(',')
            .replace("\\n", "\n")
            .replace('\r', "");
        if cleaned.trim().is_empty() {
            return Err(AnalysisError::EmptyCsv);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(cleaned.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(String::is_empty) {
            return Err(AnalysisError::EmptyCsv);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Column names from the header row.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// All data rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// The first data row, or an empty slice when the file has only headers.
    #[must_use]
    pub fn first_data_row(&self) -> &[String] {
        self.rows.first().map_or(&[], Vec::as_slice)
    }

    /// Number of data rows (the header row is not counted).
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column by exact header name.
    pub fn column_index(&self, name: &str) -> Result<usize, AnalysisError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| AnalysisError::ColumnNotFound(name.to_string()))
    }

    /// Cells of a column, one per row.
    pub fn column(&self, name: &str) -> Result<Vec<&str>, AnalysisError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Cells of the first row whose first cell equals `label`, excluding
    /// that index cell.
    pub fn row(&self, label: &str) -> Result<Vec<&str>, AnalysisError> {
        self.rows
            .iter()
            .find(|row| row.first().is_some_and(|cell| cell == label))
            .map(|row| row.iter().skip(1).map(String::as_str).collect())
            .ok_or_else(|| AnalysisError::RowNotFound(label.to_string()))
    }

    /// Numeric values of a column. Empty cells are treated as missing and
    /// skipped; any other cell that is not a number is an error.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>, AnalysisError> {
        let mut values = Vec::new();
        for cell in self.column(name)? {
            if cell.is_empty() {
                continue;
            }
            let value = cell
                .parse::<f64>()
                .map_err(|_| AnalysisError::NonNumeric(name.to_string()))?;
            values.push(value);
        }
        if values.is_empty() {
            return Err(AnalysisError::EmptyColumn(name.to_string()));
        }
        Ok(values)
    }

    /// Infer the type of a column from its non-empty cells.
    pub fn column_kind(&self, name: &str) -> Result<ColumnKind, AnalysisError> {
        let cells = self.column(name)?;
        let present: Vec<&str> = cells.into_iter().filter(|c| !c.is_empty()).collect();

        // A column with no values at all reads as float, like a column of NaNs.
        if present.is_empty() {
            return Ok(ColumnKind::Float);
        }
        if present.iter().all(|c| c.parse::<i64>().is_ok()) {
            return Ok(ColumnKind::Integer);
        }
        if present.iter().all(|c| c.parse::<f64>().is_ok()) {
            return Ok(ColumnKind::Float);
        }
        Ok(ColumnKind::Text)
    }

    /// Number of distinct cells in a column, counting "missing" once.
    pub fn unique_count(&self, name: &str) -> Result<usize, AnalysisError> {
        let cells = self.column(name)?;
        Ok(cells.into_iter().collect::<HashSet<_>>().len())
    }

    /// Number of empty cells in a column.
    pub fn missing_count(&self, name: &str) -> Result<usize, AnalysisError> {
        Ok(self.column(name)?.iter().filter(|c| c.is_empty()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALES: &str = "region,units,price\nnorth,10,2.5\nsouth,4,3\neast,,1.25\n";

    #[test]
    fn test_parse_headers_and_rows() {
        let table = CsvTable::parse(SALES).unwrap();
        assert_eq!(table.headers(), ["region", "units", "price"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.first_data_row(), ["north", "10", "2.5"]);
    }

    #[test]
    fn test_parse_escaped_newlines_and_trailing_commas() {
        let table = CsvTable::parse("a,b\\n1,2\\n3,4,,").unwrap();
        assert_eq!(table.headers(), ["a", "b"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column("b").unwrap(), ["2", "4"]);
    }

    #[test]
    fn test_parse_pads_ragged_rows() {
        let table = CsvTable::parse("a,b,c\r\n1\r\n").unwrap();
        assert_eq!(table.rows()[0], ["1", "", ""]);
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(matches!(
            CsvTable::parse("  \n"),
            Err(AnalysisError::EmptyCsv)
        ));
    }

    #[test]
    fn test_headers_only() {
        let table = CsvTable::parse("a,b").unwrap();
        assert_eq!(table.row_count(), 0);
        assert!(table.first_data_row().is_empty());
    }

    #[test]
    fn test_unknown_column() {
        let table = CsvTable::parse(SALES).unwrap();
        let err = table.column("revenue").unwrap_err();
        assert_eq!(err.to_string(), "Column 'revenue' not found in CSV");
    }

    #[test]
    fn test_row_lookup_by_index_column() {
        let table = CsvTable::parse(SALES).unwrap();
        assert_eq!(table.row("south").unwrap(), ["4", "3"]);
        assert!(matches!(
            table.row("west"),
            Err(AnalysisError::RowNotFound(_))
        ));
    }

    #[test]
    fn test_numeric_column_skips_missing() {
        let table = CsvTable::parse(SALES).unwrap();
        assert_eq!(table.numeric_column("units").unwrap(), vec![10.0, 4.0]);
        assert!(matches!(
            table.numeric_column("region"),
            Err(AnalysisError::NonNumeric(_))
        ));
    }

    #[test]
    fn test_column_kinds() {
        let table = CsvTable::parse(SALES).unwrap();
        assert_eq!(table.column_kind("units").unwrap(), ColumnKind::Integer);
        assert_eq!(table.column_kind("price").unwrap(), ColumnKind::Float);
        assert_eq!(table.column_kind("region").unwrap(), ColumnKind::Text);
        assert_eq!(table.missing_count("units").unwrap(), 1);
        assert_eq!(table.unique_count("units").unwrap(), 3);
    }
}
