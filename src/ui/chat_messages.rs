//! Message thread and send form.

use std::fmt::Write as _;

use crate::session::ChatMessage;

use super::{attr, text};

/// Render the ordered conversation followed by the send form.
///
/// The form posts field `message` to `on_send_message` and replaces the
/// thread with the response.
#[must_use]
pub fn chat_messages(messages: &[ChatMessage], on_send_message: &str) -> String {
    chat_messages_with_error(messages, on_send_message, None)
}

/// Like [`chat_messages`], with a failure shown under the send form.
#[must_use]
pub fn chat_messages_with_error(
    messages: &[ChatMessage],
    on_send_message: &str,
    error: Option<&str>,
) -> String {
    let error = text(error.unwrap_or_default());
    let mut items = String::new();
    for message in messages {
        let role = message.role.as_str();
        let _ = write!(
            items,
            r#"
        <li class="message message-{role}" data-role="{role}"><div class="message-text">{}</div></li>"#,
            text(&message.text)
        );
    }

    format!(
        r##"<div id="chat-messages" class="chat-messages">
    <ol class="message-list" aria-live="polite">{items}
    </ol>
    <form class="message-form"
          hx-post="{target}"
          hx-target="#chat-messages"
          hx-swap="outerHTML"
          hx-disabled-elt="find button">
        <textarea name="message" rows="2" placeholder="Ask a question about your data..." required></textarea>
        <button type="submit">Send</button>
        <p id="message-error" class="form-error" role="alert">{error}</p>
    </form>
</div>"##,
        target = attr(on_send_message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;

    #[test]
    fn test_renders_each_message_in_order() {
        let messages = vec![
            ChatMessage::new(MessageRole::User, "first"),
            ChatMessage::new(MessageRole::Assistant, "second"),
        ];
        let html = chat_messages(&messages, "/send");

        assert_eq!(html.matches(r#"class="message "#).count(), 2);
        let first = html.find("first").unwrap();
        let second = html.find("second").unwrap();
        assert!(first < second);
        assert!(html.contains(r#"data-role="assistant""#));
        assert!(html.contains(r#"hx-post="/send""#));
    }

    #[test]
    fn test_error_shown_below_thread() {
        let messages = vec![ChatMessage::new(MessageRole::User, "hello")];

        let html = chat_messages_with_error(&messages, "/send", Some("LLM <down>"));
        assert!(html.contains("hello"));
        assert!(html.contains(
            r#"<p id="message-error" class="form-error" role="alert">LLM &lt;down&gt;</p>"#
        ));

        let clean = chat_messages(&messages, "/send");
        assert!(clean.contains(r#"<p id="message-error" class="form-error" role="alert"></p>"#));
    }

    #[test]
    fn test_escapes_message_text() {
        let messages = vec![ChatMessage::new(MessageRole::User, "<script>x</script>")];
        let html = chat_messages(&messages, "/send");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
