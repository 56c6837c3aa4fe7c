//! Tools offered to the model.
//!
//! Every chat request gets a [`ToolRegistry`] built from the session's
//! uploaded dataset, so tool calls always read the CSV that belongs to the
//! conversation that issued them.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use csv_analyst::analysis::CsvTable;
//! use csv_analyst::tools::ToolRegistry;
//!
//! let table = CsvTable::parse("a,b\n1,2\n").unwrap();
//! let tools = ToolRegistry::for_dataset(Arc::new(table));
//! assert!(tools.names().contains(&"calculateMean"));
//! ```

pub mod csv_tools;
pub mod registry;

pub use csv_tools::{CsvTool, CsvToolKind};
pub use registry::{NativeTool, ToolRegistry};
