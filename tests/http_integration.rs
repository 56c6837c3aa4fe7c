use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use serde_json::Value;

use csv_analyst::AppState;
use csv_analyst::config::{
    AppConfig, AssistantConfig, ResilienceConfig, ServerConfig, SessionConfig, UploadConfig,
};
use csv_analyst::llm::{
    EventStream, LlmDriver, LlmRequest, LlmSettings, MessageRole, Orchestrator, Provider,
};
use csv_analyst::normalized::NormalizedEvent;
use csv_analyst::server::build_router;
use csv_analyst::session::SessionStore;

const SALES_CSV: &str = "region,units\nnorth,10\nsouth,4\n";

/// Driver that replays one scripted response per request.
#[derive(Default)]
struct ScriptedDriver {
    turns: Mutex<VecDeque<Vec<NormalizedEvent>>>,
}

#[async_trait::async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(&self, _req: LlmRequest) -> anyhow::Result<EventStream> {
        let events = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("model unavailable"))?;
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

fn config(max_bytes: usize) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
        },
        assistant: AssistantConfig {
            name: "Test Analyst".to_string(),
        },
        upload: UploadConfig { max_bytes },
        resilience: ResilienceConfig {
            timeout_disabled: false,
            request_timeout_secs: 30,
        },
        session: SessionConfig {
            idle_timeout_secs: 1800,
            cleanup_interval_secs: 60,
        },
    }
}

struct Harness {
    server: TestServer,
    sessions: SessionStore,
}

fn harness_with(turns: Vec<Vec<NormalizedEvent>>, max_bytes: usize) -> Harness {
    let settings = LlmSettings {
        base_url: "http://localhost:11434".to_string(),
        api_key: None,
        model: "test".to_string(),
        provider: Provider::Ollama,
        parallel_tool_calls: None,
    };
    let driver = Arc::new(ScriptedDriver {
        turns: Mutex::new(turns.into()),
    });
    let sessions = SessionStore::new();
    let state = AppState {
        orchestrator: Arc::new(Orchestrator::with_driver(settings, driver)),
        sessions: sessions.clone(),
        config: Arc::new(config(max_bytes)),
    };
    let server = TestServer::new(build_router(state)).unwrap();
    Harness { server, sessions }
}

fn harness(turns: Vec<Vec<NormalizedEvent>>) -> Harness {
    harness_with(turns, 1024 * 1024)
}

fn csv_form(name: &str, content: &str) -> MultipartForm {
    let part = Part::bytes(content.as_bytes().to_vec())
        .file_name(name)
        .mime_type("text/csv");
    MultipartForm::new().add_part("file", part)
}

fn hx_request() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("hx-request"),
        HeaderValue::from_static("true"),
    )
}

fn reply(text: &str) -> Vec<NormalizedEvent> {
    vec![
        NormalizedEvent::MessageDelta {
            text: text.to_string(),
        },
        NormalizedEvent::Done,
    ]
}

#[tokio::test]
async fn index_redirects_to_new_session() {
    let h = harness(Vec::new());

    let response = h.server.get("/").await;

    assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
    let location = response.header("location");
    let location = location.to_str().unwrap();
    let id = location.strip_prefix("/chat/").unwrap();
    assert!(h.sessions.get(id).is_some());
}

#[tokio::test]
async fn chat_page_shows_placeholder_before_upload() {
    let h = harness(Vec::new());

    let response = h.server.get("/chat/s1").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let html = response.text();
    assert!(html.contains("Welcome to Test Analyst"));
    assert!(html.contains("Upload a CSV file to start analyzing your data"));
    assert!(html.contains(r#"hx-post="/api/sessions/s1/csv""#));
    assert!(!html.contains(r#"id="chat-messages""#));
}

#[tokio::test]
async fn upload_runs_file_analysis_once() {
    let h = harness(Vec::new());
    let session = h.sessions.create_with_id("s1");

    let response = h
        .server
        .post("/api/sessions/s1/csv")
        .multipart(csv_form("sales.csv", SALES_CSV))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let html = response.text();
    assert!(html.contains(r#"id="chat-container""#));
    assert!(html.contains(r#"id="chat-messages""#));
    assert!(!html.contains("Welcome to"));

    let ctx = session.context();
    assert!(ctx.has_content());
    let upload = ctx.csv_content.unwrap();
    assert_eq!(upload.filename, "sales.csv");
    assert_eq!(upload.raw, SALES_CSV);
    // One greeting per analysis
    assert_eq!(ctx.messages.len(), 1);
    assert_eq!(ctx.messages[0].role, MessageRole::Assistant);
}

#[tokio::test]
async fn upload_rejects_bad_input() {
    let h = harness(Vec::new());
    let _ = h.sessions.create_with_id("s1");

    let missing = h
        .server
        .post("/api/sessions/unknown/csv")
        .multipart(csv_form("sales.csv", SALES_CSV))
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

    let empty = h
        .server
        .post("/api/sessions/s1/csv")
        .multipart(csv_form("empty.csv", "   "))
        .await;
    assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(empty.json::<Value>()["code"], "INVALID_CSV");

    let image = Part::bytes(vec![0x89, 0x50, 0x4e, 0x47])
        .file_name("photo.png")
        .mime_type("image/png");
    let wrong_type = h
        .server
        .post("/api/sessions/s1/csv")
        .multipart(MultipartForm::new().add_part("file", image))
        .await;
    assert_eq!(wrong_type.status_code(), StatusCode::BAD_REQUEST);

    let no_file = h
        .server
        .post("/api/sessions/s1/csv")
        .multipart(MultipartForm::new().add_text("note", "hello"))
        .await;
    assert_eq!(no_file.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(no_file.json::<Value>()["code"], "MISSING_FILE");
}

#[tokio::test]
async fn upload_over_limit_is_rejected() {
    let h = harness_with(Vec::new(), 256);
    let _ = h.sessions.create_with_id("s1");

    let big = format!("n\n{}", "1\n".repeat(1000));
    let response = h
        .server
        .post("/api/sessions/s1/csv")
        .multipart(csv_form("big.csv", &big))
        .await;

    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn send_message_requires_dataset() {
    let h = harness(vec![reply("unused")]);
    let _ = h.sessions.create_with_id("s1");

    let response = h
        .server
        .post("/api/sessions/s1/messages")
        .form(&[("message", "what is the mean?")])
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["code"], "NO_DATASET");
}

#[tokio::test]
async fn send_message_runs_tools_and_renders_thread() {
    let h = harness(vec![
        vec![
            NormalizedEvent::ToolCallComplete {
                call_index: 0,
                id: "call_1".to_string(),
                name: "calculateMean".to_string(),
                arguments_json: r#"{"colName":"units"}"#.to_string(),
            },
            NormalizedEvent::Done,
        ],
        reply("The average is 7 units."),
    ]);
    let _ = h.sessions.create_with_id("s1");
    h.server
        .post("/api/sessions/s1/csv")
        .multipart(csv_form("sales.csv", SALES_CSV))
        .await;

    let response = h
        .server
        .post("/api/sessions/s1/messages")
        .form(&[("message", "Average units?")])
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let html = response.text();
    assert!(html.contains("Average units?"));
    assert!(html.contains("The average is 7 units."));
    // greeting, question, answer; tool turns stay out of the thread
    assert_eq!(html.matches(r#"class="message "#).count(), 3);

    let history: Value = h.server.get("/api/sessions/s1/messages").await.json();
    let roles: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, ["assistant", "user", "assistant", "tool", "assistant"]);
    assert_eq!(history[3]["content"], "7.0");
}

#[tokio::test]
async fn send_message_llm_failure_is_bad_gateway() {
    let h = harness(Vec::new());
    let _ = h.sessions.create_with_id("s1");
    h.server
        .post("/api/sessions/s1/csv")
        .multipart(csv_form("sales.csv", SALES_CSV))
        .await;

    let response = h
        .server
        .post("/api/sessions/s1/messages")
        .form(&[("message", "hello")])
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["code"], "LLM_ERROR");
}

#[tokio::test]
async fn htmx_send_failure_keeps_thread_and_shows_error() {
    let h = harness(Vec::new());
    let _ = h.sessions.create_with_id("s1");
    h.server
        .post("/api/sessions/s1/csv")
        .multipart(csv_form("sales.csv", SALES_CSV))
        .await;

    let (name, value) = hx_request();
    let response = h
        .server
        .post("/api/sessions/s1/messages")
        .add_header(name, value)
        .form(&[("message", "hello")])
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let html = response.text();
    assert!(html.starts_with(r#"<div id="chat-messages""#));
    // The stored user turn is visible next to the failure
    assert!(html.contains(r#"<div class="message-text">hello</div>"#));
    assert!(html.contains(r#"<p id="message-error" class="form-error" role="alert">LLM request failed"#));
}

#[tokio::test]
async fn htmx_upload_failure_targets_error_slot() {
    let h = harness(Vec::new());
    let _ = h.sessions.create_with_id("s1");

    let (name, value) = hx_request();
    let response = h
        .server
        .post("/api/sessions/s1/csv")
        .add_header(name, value)
        .multipart(csv_form("empty.csv", "   "))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.header("hx-retarget"), "#upload-error");
    assert_eq!(response.header("hx-reswap"), "innerHTML");
    assert_eq!(response.text(), "CSV data is empty");
}

#[tokio::test]
async fn chat_page_swaps_error_responses() {
    let h = harness(Vec::new());

    let html = h.server.get("/chat/s1").await.text();

    assert!(html.contains(r#"<meta name="htmx-config""#));
    assert!(html.contains(r#"id="upload-error""#));
}

#[tokio::test]
async fn session_api_lifecycle() {
    let h = harness(Vec::new());

    let created = h.server.post("/api/sessions").await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    let id = created.json::<Value>()["id"].as_str().unwrap().to_string();

    let listed: Value = h.server.get("/api/sessions").await.json();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let info: Value = h.server.get(&format!("/api/sessions/{id}")).await.json();
    assert_eq!(info["message_count"], 0);
    assert!(info.get("filename").is_none());

    let deleted = h.server.delete(&format!("/api/sessions/{id}")).await;
    assert_eq!(deleted.status_code(), StatusCode::NO_CONTENT);

    let gone = h.server.get(&format!("/api/sessions/{id}")).await;
    assert_eq!(gone.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_stream_emits_sse_and_saves_turn() {
    let h = harness(vec![reply("Two regions.")]);
    let session = h.sessions.create_with_id("s1");
    h.server
        .post("/api/sessions/s1/csv")
        .multipart(csv_form("sales.csv", SALES_CSV))
        .await;

    let started: Value = h
        .server
        .post("/api/chat")
        .json(&serde_json::json!({ "session_id": "s1", "message": "How many regions?" }))
        .await
        .json();
    let stream_url = started["stream_url"].as_str().unwrap();
    assert_eq!(stream_url, "/api/chat/stream?session_id=s1");

    let response = h.server.get(stream_url).await;
    assert_eq!(
        response.header("content-type").to_str().unwrap(),
        "text/event-stream"
    );
    let body = response.text();
    assert!(body.contains("event: stream.start"));
    assert!(body.contains("Two regions."));
    assert!(body.contains("event: done"));

    let last = session.messages().pop().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert_eq!(last.content, "Two regions.");
}

#[tokio::test]
async fn chat_stream_without_session_reports_error() {
    let h = harness(Vec::new());

    let body = h.server.get("/api/chat/stream?session_id=nope").await.text();

    assert!(body.contains("event: error"));
    assert!(body.contains("Session not found"));
}
