//! HTTP surface for session-scoped document chat.
//!
//! | Method | Path | |
//! |--------|------|-|
//! | GET | `/` | banner |
//! | GET | `/health` | backend status |
//! | GET, POST | `/api/sessions` | list, create |
//! | DELETE | `/api/sessions/{id}` | delete |
//! | POST | `/api/sessions/{id}/upload` | multipart `file` |
//! | POST | `/api/sessions/{id}/chat` | `{ message, template? }` |
//! | GET | `/api/sessions/{id}/status` | session info |
//! | GET | `/api/sessions/{id}/summary` | document summary |

pub mod config;
mod routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};

use docchat_retrieval::RetrievalEngine;

pub use config::{Cli, Config, ServerConfig};
pub use routes::{ApiError, ChatRequest, ChatResponse, SessionResponse, UploadResponse};

/// Room for multipart framing on top of the file itself, so an oversized
/// file is reported with a message rather than cut off.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state of every handler.
pub struct AppState {
    pub engine: RetrievalEngine,
    pub server: ServerConfig,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.server.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route(
            "/api/sessions",
            get(routes::list_sessions).post(routes::create_session),
        )
        .route("/api/sessions/{id}", delete(routes::delete_session))
        .route(
            "/api/sessions/{id}/upload",
            post(routes::upload_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/sessions/{id}/chat", post(routes::chat))
        .route("/api/sessions/{id}/status", get(routes::session_status))
        .route("/api/sessions/{id}/summary", get(routes::document_summary))
        .with_state(state)
}
