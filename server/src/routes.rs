//! Request handlers and error mapping.

use std::sync::Arc;

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use docchat_retrieval::{Document, RetrievalError, SessionId, SessionInfo};

use crate::AppState;

/// An error response, rendered as `{"detail": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        let status = match &err {
            RetrievalError::SessionNotFound(_) | RetrievalError::DocumentNotLoaded(_) => {
                StatusCode::NOT_FOUND
            }
            RetrievalError::SessionBusy(_) => StatusCode::CONFLICT,
            RetrievalError::InvalidSessionId(_)
            | RetrievalError::EmptyDocument(_)
            | RetrievalError::Template(_)
            | RetrievalError::Extract(_) => StatusCode::BAD_REQUEST,
            RetrievalError::Embedding(_) | RetrievalError::Generation(_) => StatusCode::BAD_GATEWAY,
            RetrievalError::Configuration(_)
            | RetrievalError::Index(_)
            | RetrievalError::Serialization(_)
            | RetrievalError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{} {}", self.status, self.detail);
        } else {
            debug!("{} {}", self.status, self.detail);
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub message: String,
    pub session_id: String,
    pub document_chunks: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Prompt template name; the configured default when absent.
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub session_id: String,
    pub summary: String,
    pub document_chunks: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionInfo>,
}

/// `GET /`
pub(crate) async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Document chat API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// `GET /health`: liveness plus whether the backends have credentials.
pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let backends = state.engine.backends();
    Json(json!({
        "status": "healthy",
        "embedding_configured": backends.embedding,
        "generation_configured": backends.generation,
        "sessions_dir": state.engine.config().sessions_dir,
    }))
}

/// `POST /api/sessions`
pub(crate) async fn create_session(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let id = state.engine.create_session().await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: id.to_string(),
            message: "Session created successfully".to_string(),
        }),
    ))
}

/// `GET /api/sessions`
pub(crate) async fn list_sessions(State(state): State<Arc<AppState>>) -> ApiResult<Json<SessionList>> {
    let mut sessions = Vec::new();
    for id in state.engine.list_sessions().await? {
        sessions.push(state.engine.describe(id.as_str()).await?);
    }
    Ok(Json(SessionList { sessions }))
}

/// `POST /api/sessions/{id}/upload`, multipart field `file`.
pub(crate) async fn upload_document(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    SessionId::parse(&session_id)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Uploaded file has no name"))?;
        let bytes = field.bytes().await?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("Missing multipart field \"file\""))?;

    let limits = &state.server;
    if !limits.accepts(&filename) {
        return Err(ApiError::bad_request(format!(
            "File type not allowed. Allowed types: {}",
            limits.allowed_extensions.join(", ")
        )));
    }
    if bytes.len() > limits.max_upload_bytes {
        return Err(ApiError::bad_request(format!(
            "File too large. Maximum size is {}MB",
            limits.max_upload_bytes / (1024 * 1024)
        )));
    }

    let document = Document::new(filename.as_str(), bytes.to_vec())?;
    let report = state.engine.ingest(&session_id, document).await?;
    info!(
        "Upload of {filename} to session {session_id} produced {} chunks",
        report.chunk_count
    );

    Ok(Json(UploadResponse {
        filename,
        message: "Document uploaded and processed successfully".to_string(),
        session_id,
        document_chunks: report.chunk_count,
    }))
}

/// `POST /api/sessions/{id}/chat`
pub(crate) async fn chat(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("Message must not be empty"));
    }
    let response = state
        .engine
        .answer(&session_id, &request.message, request.template.as_deref())
        .await?;
    Ok(Json(ChatResponse {
        response,
        session_id,
    }))
}

/// `GET /api/sessions/{id}/status`
pub(crate) async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionInfo>> {
    Ok(Json(state.engine.describe(&session_id).await?))
}

/// `GET /api/sessions/{id}/summary`
pub(crate) async fn document_summary(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SummaryResponse>> {
    let id = SessionId::parse(&session_id)?;
    let engine = state
        .engine
        .store()
        .get_engine(&id)
        .await?
        .ok_or_else(|| RetrievalError::DocumentNotLoaded(id.to_string()))?;
    let summary = state.engine.summarize(&session_id).await?;
    Ok(Json(SummaryResponse {
        session_id,
        summary,
        document_chunks: engine.chunk_count(),
    }))
}

/// `DELETE /api/sessions/{id}`
pub(crate) async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.delete_session(&session_id).await?;
    Ok(Json(json!({
        "message": format!("Session {session_id} deleted successfully"),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_retrieval::TemplateError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (RetrievalError::SessionNotFound("s".into()), StatusCode::NOT_FOUND),
            (RetrievalError::DocumentNotLoaded("s".into()), StatusCode::NOT_FOUND),
            (RetrievalError::SessionBusy("s".into()), StatusCode::CONFLICT),
            (RetrievalError::InvalidSessionId("x".into()), StatusCode::BAD_REQUEST),
            (
                RetrievalError::Template(TemplateError::UnknownTemplate("t".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                RetrievalError::Generation(docchat_retrieval::GenerationError::ApiRequest(
                    "down".into(),
                )),
                StatusCode::BAD_GATEWAY,
            ),
            (
                RetrievalError::Io(std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
