//! Transcript history routes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::store::{TranscriptRecord, TranscriptStore};

#[derive(Debug, Deserialize, Default)]
pub struct TranscriptQueryParams {
    /// Search query over title, transcript text, and notes.
    pub q: Option<String>,
    /// Maximum results (default 20).
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub fn router(store: Arc<dyn TranscriptStore>) -> Router {
    Router::new()
        .route("/", get(list_transcripts))
        .route("/search", get(search_transcripts))
        .route("/:id", get(get_transcript_by_id))
        .with_state(store)
}

/// GET /transcripts - List or search transcript history.
async fn list_transcripts(
    Query(params): Query<TranscriptQueryParams>,
    State(store): State<Arc<dyn TranscriptStore>>,
) -> ApiResult<Json<Vec<TranscriptRecord>>> {
    let limit = params.limit.unwrap_or(20);
    let offset = params.offset.unwrap_or(0);

    let records = match params.q {
        Some(query) if !query.trim().is_empty() => store
            .search(&query, limit, offset)
            .map_err(ApiError::from)?,
        _ => store.list(limit, offset).map_err(ApiError::from)?,
    };
    Ok(Json(records))
}

/// GET /transcripts/search?q= - Search transcripts; the query is required.
async fn search_transcripts(
    Query(params): Query<TranscriptQueryParams>,
    State(store): State<Arc<dyn TranscriptStore>>,
) -> ApiResult<Json<Vec<TranscriptRecord>>> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing search query parameter 'q'"))?;

    let records = store
        .search(query, params.limit.unwrap_or(20), params.offset.unwrap_or(0))
        .map_err(ApiError::from)?;
    Ok(Json(records))
}

/// GET /transcripts/:id - Get a single transcript.
async fn get_transcript_by_id(
    Path(id): Path<i64>,
    State(store): State<Arc<dyn TranscriptStore>>,
) -> ApiResult<Json<TranscriptRecord>> {
    let record = store
        .retrieve(id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("Transcript {} not found", id)))?;

    Ok(Json(record))
}
