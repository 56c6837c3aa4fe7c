//! CSV analysis tools bound to one uploaded dataset.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::registry::{NativeTool, ToolRegistry};
use crate::analysis::{AnalysisError, CsvTable, search::DEFAULT_ROW_LIMIT};

/// The operations exposed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvToolKind {
    Mean,
    Median,
    Mode,
    Variance,
    StandardDeviation,
    ColumnInfo,
    SearchValue,
    SearchRowDetails,
    CountRows,
    ColumnNames,
    Row,
    CountValues,
}

impl CsvToolKind {
    pub const ALL: [Self; 12] = [
        Self::Mean,
        Self::Median,
        Self::Mode,
        Self::Variance,
        Self::StandardDeviation,
        Self::ColumnInfo,
        Self::SearchValue,
        Self::SearchRowDetails,
        Self::CountRows,
        Self::ColumnNames,
        Self::Row,
        Self::CountValues,
    ];

    /// Function name sent to the model.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Mean => "calculateMean",
            Self::Median => "calculateMedian",
            Self::Mode => "calculateMode",
            Self::Variance => "calculateVariance",
            Self::StandardDeviation => "calculateStandardDeviation",
            Self::ColumnInfo => "getColumnInfo",
            Self::SearchValue => "searchValue",
            Self::SearchRowDetails => "searchRowDetails",
            Self::CountRows => "countRows",
            Self::ColumnNames => "getColumnNames",
            Self::Row => "getRow",
            Self::CountValues => "countValues",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Mean => "Calculate the mean of a given column in the CSV file.",
            Self::Median => "Calculate the median of a given column in the CSV file.",
            Self::Mode => "Find the most frequent value(s) of a numeric column in the CSV file.",
            Self::Variance => "Calculate the population variance of a given column in the CSV file.",
            Self::StandardDeviation => {
                "Calculate the population standard deviation of a given column in the CSV file."
            }
            Self::ColumnInfo => {
                "Get detailed information about a column: type, unique and missing values, range or most common values."
            }
            Self::SearchValue => "Search for a value across all columns of the CSV data.",
            Self::SearchRowDetails => {
                "Find rows where a column contains the query and return every field of those rows."
            }
            Self::CountRows => "Count the data rows in the CSV file.",
            Self::ColumnNames => "List the column names of the CSV file.",
            Self::Row => "Get the values of the row whose first column equals the given name.",
            Self::CountValues => "Count how often each distinct value occurs in a column.",
        }
    }

    fn schema(self) -> Value {
        let col_name = json!({
            "type": "string",
            "description": "The name of the column to analyse."
        });
        let (properties, required) = match self {
            Self::Mean
            | Self::Median
            | Self::Mode
            | Self::Variance
            | Self::StandardDeviation
            | Self::ColumnInfo
            | Self::CountValues => (json!({ "colName": col_name }), json!(["colName"])),
            Self::SearchValue => (
                json!({
                    "query": { "type": "string", "description": "Text to look for, case-insensitive." }
                }),
                json!(["query"]),
            ),
            Self::SearchRowDetails => (
                json!({
                    "colName": col_name,
                    "query": { "type": "string", "description": "Text to look for in that column, case-insensitive." },
                    "limit": { "type": "integer", "description": "Maximum rows to return (default 5)." }
                }),
                json!(["colName", "query"]),
            ),
            Self::Row => (
                json!({
                    "rowName": { "type": "string", "description": "Value of the first column identifying the row." }
                }),
                json!(["rowName"]),
            ),
            Self::CountRows | Self::ColumnNames => (json!({}), json!([])),
        };

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }
}

/// One CSV tool operating on a shared dataset.
#[derive(Debug, Clone)]
pub struct CsvTool {
    kind: CsvToolKind,
    table: Arc<CsvTable>,
}

impl CsvTool {
    #[must_use]
    pub fn new(kind: CsvToolKind, table: Arc<CsvTable>) -> Self {
        Self { kind, table }
    }

    fn run(&self, args: &Value) -> anyhow::Result<Result<Value, AnalysisError>> {
        let table = &self.table;
        let result = match self.kind {
            CsvToolKind::Mean => table.mean(str_arg(args, "colName")?).map(|v| json!(v)),
            CsvToolKind::Median => table.median(str_arg(args, "colName")?).map(|v| json!(v)),
            CsvToolKind::Mode => table
                .mode(str_arg(args, "colName")?)
                .map(|m| json!(m.to_string())),
            CsvToolKind::Variance => table.variance(str_arg(args, "colName")?).map(|v| json!(v)),
            CsvToolKind::StandardDeviation => table
                .standard_deviation(str_arg(args, "colName")?)
                .map(|v| json!(v)),
            CsvToolKind::ColumnInfo => table.column_info(str_arg(args, "colName")?).map(Value::from),
            CsvToolKind::SearchValue => Ok(Value::from(table.search_value(str_arg(args, "query")?))),
            CsvToolKind::SearchRowDetails => {
                let limit = args
                    .get("limit")
                    .and_then(Value::as_u64)
                    .and_then(|n| usize::try_from(n).ok())
                    .unwrap_or(DEFAULT_ROW_LIMIT);
                table
                    .search_rows(str_arg(args, "colName")?, str_arg(args, "query")?, limit)
                    .map(Value::from)
            }
            CsvToolKind::CountRows => Ok(json!(table.row_count())),
            CsvToolKind::ColumnNames => Ok(json!(table.headers())),
            CsvToolKind::Row => table.row(str_arg(args, "rowName")?).map(|cells| json!(cells)),
            CsvToolKind::CountValues => table
                .value_counts(str_arg(args, "colName")?)
                .map(|counts| Value::Object(counts.into_iter().map(|(k, n)| (k, json!(n))).collect())),
        };
        Ok(result)
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing {key}"))
}

#[async_trait]
impl NativeTool for CsvTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn schema(&self) -> Value {
        self.kind.schema()
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        // Data problems go back to the model as text so it can pick another
        // column; malformed arguments fail the call.
        Ok(match self.run(&args)? {
            Ok(value) => value,
            Err(e) => Value::String(format!("Error: {e}")),
        })
    }
}

impl ToolRegistry {
    /// Registry holding every CSV tool, bound to `table`.
    #[must_use]
    pub fn for_dataset(table: Arc<CsvTable>) -> Self {
        CsvToolKind::ALL
            .into_iter()
            .fold(Self::new_empty(), |registry, kind| {
                registry.with_native_tool(Arc::new(CsvTool::new(kind, Arc::clone(&table))))
            })
    }
}
