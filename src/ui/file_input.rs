//! CSV upload panel.

use super::attr;

/// Render the upload form.
///
/// Submitting posts the file as multipart field `file` to `on_analysis` and
/// swaps the whole chat container with the response.
#[must_use]
pub fn file_input(on_analysis: &str) -> String {
    format!(
        r##"<form id="file-input" class="file-input"
      hx-post="{target}"
      hx-encoding="multipart/form-data"
      hx-target="#chat-container"
      hx-swap="outerHTML">
    <label for="csv-file">CSV file</label>
    <input id="csv-file" type="file" name="file" accept=".csv,text/csv" required>
    <button type="submit">Analyze</button>
    <p id="upload-error" class="form-error" role="alert"></p>
</form>"##,
        target = attr(on_analysis)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posts_to_callback() {
        let html = file_input("/api/sessions/abc/csv");
        assert!(html.contains(r#"hx-post="/api/sessions/abc/csv""#));
        assert!(html.contains(r#"name="file""#));
        assert!(html.contains("multipart/form-data"));
        assert!(html.contains(r#"<p id="upload-error" class="form-error" role="alert"></p>"#));
    }
}
