//! Session and conversation thread management.
//!
//! This module provides in-memory session storage for managing chat state
//! across requests. Sessions are identified by UUID and hold the uploaded
//! CSV plus the full message history.
//!
//! # Architecture
//!
//! - [`Session`]: a single conversation, with the upload and send pipelines
//! - [`SessionStore`]: thread-safe store for all active sessions
//! - [`ChatContext`]: the read-only snapshot the UI renders from
//!
//! # Example
//!
//! ```rust
//! use csv_analyst::session::{CsvUpload, SessionStore};
//!
//! let store = SessionStore::new();
//! let session = store.create();
//! assert!(!session.context().has_content());
//!
//! let upload = CsvUpload::parse("data.csv", "a,b\n1,2\n").unwrap();
//! session.handle_file_analysis(upload, "Analyst");
//! assert!(session.context().has_content());
//! ```

mod context;
mod thread;

pub use context::{ChatContext, ChatMessage, CsvUpload};
pub use thread::{DEFAULT_SESSION_TIMEOUT, Session, SessionError, SessionStore};
