use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::analysis::AnalysisError;
use crate::config::AppConfig;
use crate::llm::{LlmSettings, Orchestrator, Transcript};
use crate::normalized::{NormalizedEvent, sse_event};
use crate::session::{CsvUpload, Session, SessionError, SessionStore};
use crate::tools::ToolRegistry;
use crate::ui::{self, ChatRoutes, chat_container, html_shell};

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, settings: LlmSettings) -> anyhow::Result<()> {
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        provider = ?settings.provider,
        "LLM configuration loaded"
    );

    let orchestrator = Arc::new(Orchestrator::new(settings));
    let sessions = SessionStore::new();

    spawn_session_cleanup(
        sessions.clone(),
        Duration::from_secs(config.session.cleanup_interval_secs),
        Duration::from_secs(config.session.idle_timeout_secs),
    );

    let state = AppState {
        orchestrator,
        sessions,
        config: Arc::clone(&config),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        assistant = %config.assistant.name,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the application router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = state.config.resilience.request_timeout();
    let max_body = state.config.upload.max_bytes;

    Router::new()
        // HTML pages
        .route("/", get(index_handler))
        .route("/chat/{id}", get(chat_page))
        // HTMX callbacks
        .route("/api/sessions/{id}/csv", post(upload_csv))
        .route(
            "/api/sessions/{id}/messages",
            post(send_message).get(api_get_messages),
        )
        // JSON session API
        .route("/api/sessions", get(api_list_sessions).post(api_create_session))
        .route(
            "/api/sessions/{id}",
            get(api_get_session).delete(api_delete_session),
        )
        // Streaming chat
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", get(api_chat_stream))
        // Static assets
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_body))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .with_state(state)
}

/// Periodically drop sessions idle for longer than `idle_timeout`.
fn spawn_session_cleanup(sessions: SessionStore, every: Duration, idle_timeout: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired_with_timeout(idle_timeout);
            if removed > 0 {
                info!(
                    name: "session.cleanup",
                    removed,
                    remaining = sessions.len(),
                    "Expired sessions removed"
                );
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// JSON error body returned by API handlers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, code: &'static str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
            code,
        }),
    )
}

fn session_not_found(id: &str) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        "SESSION_NOT_FOUND",
        format!("Session '{id}' not found"),
    )
}

fn find_session(state: &AppState, id: &str) -> Result<Session, ApiError> {
    state.sessions.get(id).ok_or_else(|| session_not_found(id))
}

impl From<SessionError> for ErrorBody {
    fn from(err: SessionError) -> Self {
        let code = match &err {
            SessionError::NoDataset => "NO_DATASET",
            SessionError::EmptyMessage => "EMPTY_MESSAGE",
            SessionError::Analysis(_) => "INVALID_CSV",
            SessionError::Llm(_) => "LLM_ERROR",
            SessionError::Superseded => "SUPERSEDED",
        };
        Self {
            error: err.to_string(),
            code,
        }
    }
}

fn session_error(err: SessionError) -> ApiError {
    let status = match &err {
        SessionError::NoDataset | SessionError::Superseded => StatusCode::CONFLICT,
        SessionError::EmptyMessage | SessionError::Analysis(_) => StatusCode::BAD_REQUEST,
        SessionError::Llm(e) => {
            tracing::error!(error = %e, "LLM request failed");
            StatusCode::BAD_GATEWAY
        }
    };
    (status, Json(err.into()))
}

fn multipart_error(err: &MultipartError) -> ApiError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "UPLOAD_TOO_LARGE"
    } else {
        "MULTIPART_ERROR"
    };
    api_error(status, code, format!("Failed to read upload: {}", err.body_text()))
}

/// Whether the request was issued by HTMX rather than an API client.
fn is_htmx(headers: &HeaderMap) -> bool {
    headers
        .get("hx-request")
        .is_some_and(|value| value.as_bytes() == b"true")
}

/// Render an error into the element `target` instead of the request's own
/// swap target.
fn retargeted_error((status, Json(body)): ApiError, target: &'static str) -> Response {
    (
        status,
        [("hx-retarget", target), ("hx-reswap", "innerHTML")],
        Html(ui::text(&body.error).into_owned()),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET / - Start a fresh session and redirect to its chat page.
async fn index_handler(State(state): State<AppState>) -> Redirect {
    let session = state.sessions.create();
    tracing::debug!(session_id = %session.id(), "Created new session");
    Redirect::to(&format!("/chat/{}", session.id()))
}

/// GET /chat/:id - Full chat page for a session.
async fn chat_page(State(state): State<AppState>, Path(id): Path<String>) -> Html<String> {
    let session = state.sessions.get_or_create(&id);
    let name = &state.config.assistant.name;
    let body = chat_container(&session.context(), &ChatRoutes::for_session(&id), name);
    Html(html_shell("Chat", name, &body))
}

// ─────────────────────────────────────────────────────────────────────────────
// HTMX Callbacks
// ─────────────────────────────────────────────────────────────────────────────

/// Whether an uploaded file looks like CSV, judged by name and declared type.
fn is_csv_file(filename: &str, content_type: Option<&str>) -> bool {
    let declared = content_type.unwrap_or_default();
    if declared.starts_with("text/") || declared == "application/vnd.ms-excel" {
        return true;
    }
    mime_guess::from_path(filename)
        .first()
        .is_some_and(|mime| mime.type_() == mime_guess::mime::TEXT)
}

/// POST /api/sessions/:id/csv - Upload a CSV file into a session.
///
/// Returns the re-rendered chat container. HTMX requests get failures as
/// text in the form's `#upload-error` slot, other clients get JSON.
async fn upload_csv(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    match receive_upload(&state, &id, multipart).await {
        Ok(html) => html.into_response(),
        Err(err) if is_htmx(&headers) => retargeted_error(err, "#upload-error"),
        Err(err) => err.into_response(),
    }
}

async fn receive_upload(
    state: &AppState,
    id: &str,
    mut multipart: Multipart,
) -> Result<Html<String>, ApiError> {
    let session = find_session(state, id)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&e))? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload.csv").to_string();
        let content_type = field.content_type().map(str::to_string);
        if !is_csv_file(&filename, content_type.as_deref()) {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_TYPE",
                format!("File '{filename}' is not a CSV file"),
            ));
        }

        let bytes = field.bytes().await.map_err(|e| multipart_error(&e))?;
        let raw = String::from_utf8(bytes.to_vec()).map_err(|_| {
            api_error(
                StatusCode::BAD_REQUEST,
                "INVALID_ENCODING",
                format!("File '{filename}' is not valid UTF-8"),
            )
        })?;

        tracing::info!(
            session_id = %id,
            filename = %filename,
            size = raw.len(),
            "Received CSV upload"
        );
        upload = Some(
            CsvUpload::parse(filename, raw)
                .map_err(|e: AnalysisError| session_error(SessionError::from(e)))?,
        );
        break;
    }

    let Some(upload) = upload else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "MISSING_FILE",
            "Multipart field 'file' is required",
        ));
    };

    let name = &state.config.assistant.name;
    session.handle_file_analysis(upload, name);
    Ok(Html(chat_container(
        &session.context(),
        &ChatRoutes::for_session(id),
        name,
    )))
}

/// Form body of the send-message callback.
#[derive(Debug, Deserialize)]
struct SendMessageForm {
    message: String,
}

/// POST /api/sessions/:id/messages - Send a message and get the updated thread.
///
/// HTMX requests get failures rendered under the send form, with the thread
/// as stored. Other clients get JSON.
async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<SendMessageForm>,
) -> Response {
    let session = match find_session(&state, &id) {
        Ok(session) => session,
        Err(err) if is_htmx(&headers) => return retargeted_error(err, "#message-error"),
        Err(err) => return err.into_response(),
    };

    tracing::info!(
        session_id = %id,
        message_length = form.message.len(),
        "Received chat message"
    );

    let result = session
        .handle_send_message(&form.message, &state.orchestrator)
        .await
        .map_err(session_error);

    let ctx = session.context();
    let routes = ChatRoutes::for_session(&id);
    match result {
        Ok(_) => Html(ui::chat_messages::chat_messages(
            &ctx.messages,
            &routes.on_send_message,
        ))
        .into_response(),
        Err((status, Json(body))) if is_htmx(&headers) => (
            status,
            Html(ui::chat_messages::chat_messages_with_error(
                &ctx.messages,
                &routes.on_send_message,
                Some(&body.error),
            )),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON Session API
// ─────────────────────────────────────────────────────────────────────────────

/// Session info for listing.
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            message_count: session.message_count(),
            filename: session.csv().map(|upload| upload.filename.clone()),
        }
    }
}

/// GET /api/sessions - List all sessions.
async fn api_list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    let sessions: Vec<SessionInfo> = state
        .sessions
        .list_ids()
        .iter()
        .filter_map(|id| state.sessions.get(id).map(|s| SessionInfo::from(&s)))
        .collect();

    Json(sessions)
}

/// POST /api/sessions - Create a new session.
async fn api_create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionInfo>) {
    let session = state.sessions.create();
    (StatusCode::CREATED, Json(SessionInfo::from(&session)))
}

/// GET /api/sessions/:id - Get session details.
async fn api_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let session = find_session(&state, &id)?;
    Ok(Json(SessionInfo::from(&session)))
}

/// DELETE /api/sessions/:id - Delete a session.
async fn api_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// Message DTO for API responses.
#[derive(Debug, Serialize)]
struct MessageDto {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// GET /api/sessions/:id/messages - Full message history as JSON.
async fn api_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let session = find_session(&state, &id)?;
    let messages = session
        .messages()
        .into_iter()
        .map(|m| MessageDto {
            role: m.role.as_str(),
            content: m.content,
            tool_call_id: m.tool_call_id,
        })
        .collect();
    Ok(Json(messages))
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Chat
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Session that holds the uploaded CSV.
    session_id: String,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
struct ChatResponse {
    /// Session ID for this conversation.
    session_id: String,
    /// URL for the SSE stream.
    stream_url: String,
}

/// Query parameters for stream endpoint.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    /// Session ID.
    session_id: String,
    /// Optional message to send (if not already added).
    #[serde(default)]
    message: Option<String>,
}

/// POST /api/chat - Queue a user message and get the stream URL.
async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    tracing::info!(
        session_id = %req.session_id,
        message_length = req.message.len(),
        "Received chat request"
    );

    let session = find_session(&state, &req.session_id)?;
    let text = req.message.trim();
    if text.is_empty() {
        return Err(session_error(SessionError::EmptyMessage));
    }
    if session.csv().is_none() {
        return Err(session_error(SessionError::NoDataset));
    }

    session.add_user_message(text);
    let stream_url = format!("/api/chat/stream?session_id={}", req.session_id);

    Ok(Json(ChatResponse {
        session_id: req.session_id,
        stream_url,
    }))
}

/// GET /api/chat/stream - SSE stream for chat responses.
async fn api_chat_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    tracing::info!(
        session_id = %query.session_id,
        has_message = query.message.is_some(),
        "Starting SSE stream"
    );

    let Some(session) = state.sessions.get(&query.session_id) else {
        tracing::error!(session_id = %query.session_id, "Session not found");
        return single_error_sse("Session not found");
    };
    let generation = session.generation();
    let Some(upload) = session.csv() else {
        return single_error_sse(&SessionError::NoDataset.to_string());
    };

    if let Some(msg) = &query.message
        && !msg.trim().is_empty()
    {
        session.add_user_message(msg.trim());
    }

    let messages = session.messages_with_system();
    let tools = ToolRegistry::for_dataset(Arc::clone(&upload.table));
    let stream = state.orchestrator.chat_with_history(messages, tools);

    let sse_stream = async_stream::stream! {
        let mut transcript = Transcript::default();

        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match &event {
                NormalizedEvent::ToolResult { id, name, success, .. } => {
                    tracing::info!(tool_id = %id, tool_name = %name, success, "Tool result");
                }
                NormalizedEvent::Error { message, code } => {
                    tracing::error!(error = %message, code = ?code, "Stream error");
                }
                _ => {}
            }
            transcript.record(&event);
            yield Ok::<String, std::convert::Infallible>(sse_event(&event));
        }

        if transcript.error().is_none() {
            let stored = transcript.messages().len();
            if session.append_turn(generation, transcript.into_messages()) {
                tracing::info!(
                    session_id = %session.id(),
                    stored,
                    "Saved streamed turn to session"
                );
            } else {
                tracing::info!(
                    session_id = %session.id(),
                    "Dropping streamed turn for a replaced dataset"
                );
            }
        }
    };

    build_sse_response(axum::body::Body::from_stream(sse_stream))
}

fn single_error_sse(message: &str) -> Response {
    let err = NormalizedEvent::Error {
        message: message.to_string(),
        code: None,
    };
    let done = NormalizedEvent::Done;

    let payload = format!("{}{}", sse_event(&err), sse_event(&done));
    build_sse_response(axum::body::Body::from(payload))
}

fn build_sse_response(body: axum::body::Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}
