//! Read-only chat state handed to the UI.

use std::sync::Arc;

use serde::Serialize;

use crate::analysis::{AnalysisError, CsvTable};
use crate::llm::{Message, MessageRole};

/// A CSV file uploaded into a session.
#[derive(Debug, Clone)]
pub struct CsvUpload {
    /// Name the file was uploaded under.
    pub filename: String,
    /// Raw text as received.
    pub raw: String,
    /// Parsed table shared with the tools of every chat request.
    pub table: Arc<CsvTable>,
}

impl CsvUpload {
    /// Parse uploaded text into a dataset.
    pub fn parse(filename: impl Into<String>, raw: impl Into<String>) -> Result<Self, AnalysisError> {
        let raw = raw.into();
        let table = CsvTable::parse(&raw)?;
        Ok(Self {
            filename: filename.into(),
            raw,
            table: Arc::new(table),
        })
    }
}

/// One displayable turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    /// Display form of a history message. System prompts, tool results and
    /// tool-call turns without text are not shown.
    #[must_use]
    pub fn from_history(message: &Message) -> Option<Self> {
        match message.role {
            MessageRole::User | MessageRole::Assistant if !message.content.trim().is_empty() => {
                Some(Self::new(message.role, message.content.clone()))
            }
            _ => None,
        }
    }
}

/// Snapshot of a session: uploaded content plus ordered message history.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub csv_content: Option<Arc<CsvUpload>>,
    pub messages: Vec<ChatMessage>,
}

impl ChatContext {
    /// Whether non-blank CSV content has been uploaded.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.csv_content
            .as_ref()
            .is_some_and(|upload| !upload.raw.trim().is_empty())
    }
}
