//! CSV Analyst
//!
//! An HTML-first chat assistant that answers questions about an uploaded CSV
//! file, calling statistics and search functions as LLM tools.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server with HTMX fragments and SSE streaming
//! - **LLM Orchestration**: streaming Chat Completions driver with a tool loop
//! - **Tools**: CSV analysis functions exposed in `OpenAI` function schema form
//! - **UI**: server-rendered HTML wired with HTMX
//!
//! # Modules
//!
//! - [`analysis`]: CSV parsing, statistics and search
//! - [`config`]: layered application configuration
//! - [`llm`]: LLM driver traits and implementations
//! - [`normalized`]: Unified streaming event model
//! - [`session`]: Conversation and session management
//! - [`tools`]: native tool registry bound to a dataset
//! - [`ui`]: HTML rendering

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod analysis;
pub mod config;
pub mod llm;
pub mod normalized;
pub mod server;
pub mod session;
pub mod tools;
pub mod ui;

use crate::config::AppConfig;

use llm::orchestrator::Orchestrator;
use session::SessionStore;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// LLM orchestrator for chat interactions.
    pub orchestrator: Arc<Orchestrator>,
    /// Session store for conversation management.
    pub sessions: SessionStore,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}
