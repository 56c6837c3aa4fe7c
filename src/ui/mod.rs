//! Server-rendered HTML.
//!
//! Every view is a plain function returning an HTML string. Interactivity is
//! HTMX: callbacks are carried in the markup as `hx-post` target URLs and the
//! server answers with re-rendered fragments.
//!
//! # Structure
//!
//! - [`layout`]: the two-pane chat container
//! - [`file_input`]: CSV upload panel
//! - [`chat_messages`]: message thread and send form
//! - [`page`]: full-page shell

pub mod chat_messages;
pub mod file_input;
pub mod layout;
pub mod page;

pub use layout::{ChatRoutes, chat_container};
pub use page::html_shell;

/// Escape user-controlled text for element content.
pub(crate) fn text(value: &str) -> std::borrow::Cow<'_, str> {
    html_escape::encode_text(value)
}

/// Escape a value placed inside a double-quoted attribute.
pub(crate) fn attr(value: &str) -> std::borrow::Cow<'_, str> {
    html_escape::encode_double_quoted_attribute(value)
}
