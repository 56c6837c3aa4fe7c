//! Conversation thread and session storage.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::context::{ChatContext, ChatMessage, CsvUpload};
use crate::analysis::AnalysisError;
use crate::llm::{Message, MessageRole, Orchestrator};
use crate::tools::ToolRegistry;

/// Default session timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Errors from the chat pipelines of a [`Session`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A message was sent before any CSV was uploaded.
    #[error("Upload a CSV file before sending messages")]
    NoDataset,

    /// The message text was blank.
    #[error("Message cannot be empty")]
    EmptyMessage,

    /// The uploaded file could not be parsed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// The model request failed.
    #[error("LLM request failed: {0}")]
    Llm(#[source] anyhow::Error),

    /// A new CSV was uploaded while the answer was being generated.
    #[error("A new CSV was uploaded while this answer was being generated")]
    Superseded,
}

/// A single conversation session.
///
/// Sessions hold the uploaded dataset and the full message history. Clones
/// share state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    /// Unique session identifier.
    id: String,
    /// Conversation messages.
    messages: RwLock<Vec<Message>>,
    /// Uploaded dataset, if any.
    csv: RwLock<Option<Arc<CsvUpload>>>,
    /// Bumped on every upload, under the `messages` write lock.
    generation: AtomicU64,
    /// Last activity time.
    last_activity: RwLock<DateTime<Utc>>,
    /// Optional system prompt.
    system_prompt: RwLock<Option<String>>,
}

impl Session {
    /// Create a new session with the given ID.
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                messages: RwLock::new(Vec::new()),
                csv: RwLock::new(None),
                generation: AtomicU64::new(0),
                last_activity: RwLock::new(now),
                system_prompt: RwLock::new(None),
            }),
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Snapshot of the uploaded content and displayable messages.
    #[must_use]
    pub fn context(&self) -> ChatContext {
        ChatContext {
            csv_content: self.csv(),
            messages: self
                .messages()
                .iter()
                .filter_map(ChatMessage::from_history)
                .collect(),
        }
    }

    /// The uploaded dataset, if any.
    #[must_use]
    pub fn csv(&self) -> Option<Arc<CsvUpload>> {
        self.inner.csv.read().unwrap().clone()
    }

    /// Set the system prompt for this session.
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        let mut guard = self.inner.system_prompt.write().unwrap();
        *guard = Some(prompt.into());
        drop(guard);
        self.touch();
    }

    /// Get the system prompt if set.
    #[must_use]
    pub fn system_prompt(&self) -> Option<String> {
        self.inner.system_prompt.read().unwrap().clone()
    }

    /// Add a user message to the conversation.
    pub fn add_user_message(&self, content: impl Into<String>) {
        self.add_message(Message::text(MessageRole::User, content));
    }

    /// Add an assistant message to the conversation.
    pub fn add_assistant_message(&self, content: impl Into<String>) {
        self.add_message(Message::text(MessageRole::Assistant, content));
    }

    /// Add a message to the conversation.
    pub fn add_message(&self, message: Message) {
        let mut guard = self.inner.messages.write().unwrap();
        guard.push(message);
        drop(guard);
        self.touch();
    }

    /// Get all messages in the conversation.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages.read().unwrap().clone()
    }

    /// Get all messages including the system prompt.
    #[must_use]
    pub fn messages_with_system(&self) -> Vec<Message> {
        let mut result = Vec::new();

        if let Some(prompt) = self.system_prompt() {
            result.push(Message::text(MessageRole::System, prompt));
        }

        result.extend(self.messages());
        result
    }

    /// Get the number of messages in the conversation.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner.messages.read().unwrap().len()
    }

    /// Clear all messages from the session.
    pub fn clear(&self) {
        let mut guard = self.inner.messages.write().unwrap();
        guard.clear();
        drop(guard);
        self.touch();
    }

    /// Install an uploaded CSV as this session's dataset.
    ///
    /// Replaces any earlier dataset, restarts the conversation and greets the
    /// user with a summary of the file. Returns the greeting.
    pub fn handle_file_analysis(&self, upload: CsvUpload, assistant_name: &str) -> String {
        let table = &upload.table;
        tracing::info!(
            session_id = %self.id(),
            filename = %upload.filename,
            rows = table.row_count(),
            columns = table.headers().len(),
            "CSV data stored"
        );

        let prompt = analysis_system_prompt(assistant_name, &upload);
        let greeting = format!(
            "I've loaded {} with {} rows and {} columns: {}. What would you like to know?",
            upload.filename,
            table.row_count(),
            table.headers().len(),
            table.headers().join(", ")
        );

        *self.inner.csv.write().unwrap() = Some(Arc::new(upload));
        let mut guard = self.inner.messages.write().unwrap();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        guard.clear();
        guard.push(Message::text(MessageRole::Assistant, greeting.clone()));
        drop(guard);
        self.set_system_prompt(prompt);
        greeting
    }

    /// Upload generation the conversation currently belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Append the messages of a finished turn, unless a CSV was uploaded
    /// since `generation` was read. Returns whether they were stored.
    pub fn append_turn(&self, generation: u64, messages: Vec<Message>) -> bool {
        let mut guard = self.inner.messages.write().unwrap();
        if self.inner.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        guard.extend(messages);
        drop(guard);
        self.touch();
        true
    }

    /// Send a user message through the model and store the reply.
    ///
    /// The user turn is kept in history even when the model call fails.
    pub async fn handle_send_message(
        &self,
        text: &str,
        orchestrator: &Orchestrator,
    ) -> Result<String, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let generation = self.generation();
        let upload = self.csv().ok_or(SessionError::NoDataset)?;

        if !self.append_turn(generation, vec![Message::text(MessageRole::User, text)]) {
            return Err(SessionError::Superseded);
        }
        let history = self.messages_with_system();

        tracing::info!(
            session_id = %self.id(),
            message_count = history.len(),
            "Dispatching message to orchestrator"
        );

        let tools = ToolRegistry::for_dataset(Arc::clone(&upload.table));
        let transcript = orchestrator
            .complete(history, tools)
            .await
            .map_err(SessionError::Llm)?;

        let reply = transcript.reply().to_string();
        if !self.append_turn(generation, transcript.into_messages()) {
            tracing::info!(
                session_id = %self.id(),
                "Dropping reply for a replaced dataset"
            );
            return Err(SessionError::Superseded);
        }
        Ok(reply)
    }

    /// Update the last activity timestamp.
    fn touch(&self) {
        let mut guard = self.inner.last_activity.write().unwrap();
        *guard = Utc::now();
    }

    /// Check if the session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        let last = *self.inner.last_activity.read().unwrap();
        match (Utc::now() - last).to_std() {
            Ok(idle) => idle > timeout,
            // Negative duration means clock skew or "last" is in future.
            Err(_) => false,
        }
    }
}

/// System prompt describing the uploaded dataset.
fn analysis_system_prompt(assistant_name: &str, upload: &CsvUpload) -> String {
    let table = &upload.table;
    let mut prompt = format!(
        "You are {assistant_name}, a data analysis assistant. The user uploaded the CSV file \
         '{}' with {} data rows.\n",
        upload.filename,
        table.row_count()
    );
    let _ = writeln!(prompt, "Columns: {}", table.headers().join(", "));
    if !table.first_data_row().is_empty() {
        let _ = writeln!(prompt, "First data row: {}", table.first_data_row().join(", "));
    }
    prompt.push_str(
        "Use the provided tools to compute statistics or look up values instead of guessing. \
         Refer to columns by their exact names.",
    );
    prompt
}

/// Thread-safe store for sessions.
///
/// Provides methods for creating, retrieving, and cleaning up sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

#[derive(Debug)]
struct SessionStoreInner {
    sessions: RwLock<HashMap<String, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create a new session store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create a new session and return it.
    #[must_use]
    pub fn create(&self) -> Session {
        let id = Uuid::new_v4().to_string();
        self.create_with_id(id)
    }

    /// Create a new session with a specific ID.
    #[must_use]
    pub fn create_with_id(&self, id: impl Into<String>) -> Session {
        let id = id.into();
        let session = Session::new(id.clone());
        let mut guard = self.inner.sessions.write().unwrap();
        guard.insert(id, session.clone());
        session
    }

    /// Get a session by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        let guard = self.inner.sessions.read().unwrap();
        guard.get(id).cloned()
    }

    /// Get a session by ID, creating it if it doesn't exist.
    #[must_use]
    pub fn get_or_create(&self, id: &str) -> Session {
        let mut guard = self.inner.sessions.write().unwrap();
        guard
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string()))
            .clone()
    }

    /// Remove a session by ID.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let mut guard = self.inner.sessions.write().unwrap();
        guard.remove(id)
    }

    /// Get the number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sessions.read().unwrap().len()
    }

    /// Check if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions that have been inactive longer than the timeout.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self.inner.sessions.write().unwrap();
        let before = guard.len();
        guard.retain(|_, session| !session.is_expired_with_timeout(timeout));
        before - guard.len()
    }

    /// List all session IDs.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        self.inner
            .sessions
            .read()
            .unwrap()
            .keys()
            .cloned()
            .collect()
    }
}
