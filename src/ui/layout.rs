//! Two-pane chat container.
//!
//! The left pane always holds the upload panel. The right pane shows the
//! message thread once a CSV has been uploaded, and a welcome placeholder
//! before that.

use crate::session::ChatContext;

use super::chat_messages::chat_messages;
use super::file_input::file_input;
use super::text;

/// Callback targets wired into the rendered markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRoutes {
    /// Where the upload panel posts the file.
    pub on_analysis: String,
    /// Where the send form posts a message.
    pub on_send_message: String,
}

impl ChatRoutes {
    /// Routes served for one session.
    #[must_use]
    pub fn for_session(session_id: &str) -> Self {
        Self {
            on_analysis: format!("/api/sessions/{session_id}/csv"),
            on_send_message: format!("/api/sessions/{session_id}/messages"),
        }
    }
}

/// Render the chat container for a context snapshot.
#[must_use]
pub fn chat_container(ctx: &ChatContext, routes: &ChatRoutes, assistant_name: &str) -> String {
    let content = if ctx.has_content() {
        chat_messages(&ctx.messages, &routes.on_send_message)
    } else {
        placeholder(assistant_name)
    };

    format!(
        r#"<div id="chat-container" class="chat-container">
    <aside class="upload-region">
        {upload}
    </aside>
    <section class="content-region">
        {content}
    </section>
</div>"#,
        upload = file_input(&routes.on_analysis)
    )
}

fn placeholder(assistant_name: &str) -> String {
    format!(
        r#"<div class="placeholder">
    <h2>Welcome to {}</h2>
    <p>Upload a CSV file to start analyzing your data</p>
</div>"#,
        text(assistant_name)
    )
}
