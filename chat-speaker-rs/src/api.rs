//! HTTP server for overlay assets and operator endpoints.
//!
//! Serves the overlay front-end from `static_dir`, plus:
//! - `GET /status`: speaking flag, queue depth, viewers, voice state
//! - `POST /speak`: enqueue a manual utterance

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::overlay::OverlayChannel;
use crate::playback::UtteranceQueue;

#[derive(Clone)]
pub struct ApiState {
    pub queue: UtteranceQueue,
    pub overlay: OverlayChannel,
    pub speaking: Arc<AtomicBool>,
    pub voice_connected: bool,
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub speaking: bool,
    pub queued: usize,
    pub overlay_clients: usize,
    pub voice_connected: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }
}

/// Build the axum router.
pub fn router(state: ApiState, static_dir: &Path) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/speak", post(handle_speak))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

/// Serve on `{bind}:{port}` until `shutdown` fires.
pub async fn serve(
    state: ApiState,
    static_dir: &Path,
    bind: &str,
    port: u16,
    shutdown: CancellationToken,
) {
    let addr = format!("{bind}:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind overlay HTTP server on {addr}: {e}");
            return;
        }
    };
    info!("Overlay server running on http://{addr}");
    serve_on(listener, router(state, static_dir), shutdown).await;
}

async fn serve_on(listener: TcpListener, app: Router, shutdown: CancellationToken) {
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        warn!("Overlay HTTP server error: {e}");
    }
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        speaking: state.speaking.load(Ordering::SeqCst),
        queued: state.queue.pending(),
        overlay_clients: state.overlay.viewer_count(),
        voice_connected: state.voice_connected,
    })
}

async fn handle_speak(
    State(state): State<ApiState>,
    Json(req): Json<SpeakRequest>,
) -> Json<SimpleResponse> {
    let text = req.text.trim();
    if text.is_empty() {
        return Json(SimpleResponse::err("empty text"));
    }

    info!("HTTP /speak: \"{text}\"");
    if state.queue.push(text) {
        Json(SimpleResponse::ok("queued"))
    } else {
        Json(SimpleResponse::err("playback stopped"))
    }
}
