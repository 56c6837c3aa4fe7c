//! Full-page shell.

use super::text;

/// Swap error responses too, so callbacks can render their failures inline.
const HTMX_CONFIG: &str = r#"{"responseHandling":[{"code":"204","swap":false},{"code":"[23]..","swap":true},{"code":"[45]..","swap":true,"error":true}]}"#;

/// Generate the HTML shell for the application.
#[must_use]
pub fn html_shell(title: &str, assistant_name: &str, content: &str) -> String {
    let title = text(title);
    let assistant_name = text(assistant_name);
    let htmx_config = HTMX_CONFIG;
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="Chat with an assistant about your CSV data">
    <title>{title} - {assistant_name}</title>

    <meta name="htmx-config" content='{htmx_config}'>
    <script src="https://unpkg.com/htmx.org@2.0.8"></script>
    <link rel="stylesheet" href="/static/app.css">
</head>
<body>
    <div id="app-shell">
        <header class="app-header">
            <a href="/" class="brand">{assistant_name}</a>
        </header>

        <main id="app">
            {content}
        </main>
    </div>
</body>
</html>"#
    )
}
