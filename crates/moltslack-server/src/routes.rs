use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use libmoltslack::MoltError;
use moltslack_protocol::ErrorCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::AppState;

pub const MIN_COLS: i64 = 20;
pub const MAX_COLS: i64 = 400;
pub const MIN_ROWS: i64 = 5;
pub const MAX_ROWS: i64 = 200;

/// Errors rendered as `{error, code}` with a matching status.
#[derive(Debug)]
pub enum ApiError {
    Core(MoltError),
    /// The request body could not be read or decoded.
    InvalidRequest(String),
}

impl From<MoltError> for ApiError {
    fn from(err: MoltError) -> Self {
        Self::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            ApiError::Core(err) => err.to_error_code(),
            ApiError::InvalidRequest(message) => (ErrorCode::InvalidRequest, message),
        };
        let status = StatusCode::from_u16(code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        debug!(status = status.as_u16(), error = %message, "request failed");
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// JSON body extractor. A missing or blank body decodes as `T::default()`;
/// anything else must be valid JSON for `T`. The content type is not checked.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(T::default()));
        }
        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid JSON body: {e}")))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateChat {
    pub title: String,
    pub cwd: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InputBody {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResizeBody {
    pub cols: Option<i64>,
    pub rows: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TaskBody {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct SummaryBody {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_provider() -> String {
    "claude".to_string()
}

impl Default for TaskBody {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            prompt: String::new(),
        }
    }
}

impl Default for SummaryBody {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: None,
        }
    }
}

/// Clamp a requested terminal size into the supported range.
pub fn clamp_size(cols: Option<i64>, rows: Option<i64>) -> (u16, u16) {
    let cols = cols.unwrap_or(80).clamp(MIN_COLS, MAX_COLS);
    let rows = rows.unwrap_or(24).clamp(MIN_ROWS, MAX_ROWS);
    (cols as u16, rows as u16)
}

/// GET /api/chats
pub async fn list_chats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "chats": state.registry.list() }))
}

/// POST /api/chats
pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<CreateChat>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let title = match body.title.trim() {
        "" => "New Chat",
        t => t,
    };
    let chat = state.registry.create(title, &body.cwd)?;
    Ok((StatusCode::CREATED, Json(json!({ "chat": chat }))))
}

/// GET /api/chats/{id}
pub async fn chat_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = state.registry.get(&id)?;
    Ok(Json(json!({ "chat": session.summary() })))
}

/// POST /api/chats/{id}/input
pub async fn send_input(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<InputBody>,
) -> ApiResult<Json<Value>> {
    state.registry.get(&id)?.write(&body.text)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/chats/{id}/resize
pub async fn resize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<ResizeBody>,
) -> ApiResult<Json<Value>> {
    let (cols, rows) = clamp_size(body.cols, body.rows);
    state.registry.get(&id)?.resize(cols, rows)?;
    Ok(Json(json!({ "ok": true, "cols": cols, "rows": rows })))
}

/// POST /api/chats/{id}/tasks
pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<TaskBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let provider = body.provider.trim().to_lowercase();
    state.registry.get(&id)?.run_task(&provider, &body.prompt)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "ok": true, "provider": provider })),
    ))
}

/// POST /api/chats/{id}/summary
pub async fn summarize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<SummaryBody>,
) -> ApiResult<Json<Value>> {
    let session = state.registry.get(&id)?;
    let timeout = body
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.summary_timeout);
    let summary = session.summarize(&body.provider, timeout).await?;
    Ok(Json(json!({ "summary": summary })))
}

/// POST /api/chats/{id}/stop
pub async fn stop_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.registry.get(&id)?.stop();
    Ok(Json(json!({ "ok": true })))
}
