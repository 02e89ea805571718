//! REST API server for confab.
//!
//! Provides HTTP endpoints for:
//! - Recording control (start, stop, status, notes)
//! - Meeting-window detection ingress
//! - Transcript history

pub mod error;
pub mod routes;

use std::sync::Arc;

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tracing::info;

use crate::store::TranscriptStore;

pub use routes::recording::{ApiCommand, RecordingRoutesState, StartRequest};

pub struct ApiServer {
    port: u16,
    recording_state: RecordingRoutesState,
    store: Arc<dyn TranscriptStore>,
}

impl ApiServer {
    pub fn new(
        tx: tokio::sync::mpsc::Sender<ApiCommand>,
        status: crate::recording::RecordingStatusHandle,
        store: Arc<dyn TranscriptStore>,
        port: u16,
    ) -> Self {
        Self {
            port,
            recording_state: RecordingRoutesState { tx, status },
            store,
        }
    }

    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            .route("/", get(status))
            .route("/version", get(version))
            .merge(routes::recording::router(self.recording_state))
            .nest("/transcripts", routes::transcripts::router(self.store))
            .layer(ServiceBuilder::new());

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /                - Service info");
        info!("  POST /start           - Start manual recording");
        info!("  POST /stop            - Stop recording, begin transcription");
        info!("  GET  /status          - Get recording status");
        info!("  PUT  /notes           - Update meeting notes");
        info!("  POST /detection       - Report a detected meeting window");
        info!("  POST /detection/clear - Report the meeting window gone");
        info!("  GET  /transcripts     - List transcript history");
        info!("  GET  /transcripts/:id - Get single transcript");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "confab",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "confab"
    }))
}
