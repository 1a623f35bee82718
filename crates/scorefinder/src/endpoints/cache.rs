//! Administrative access to the shared query cache.

use axum::Json;
use axum::extract::{Query, State};
use scorefinder_service::service::ScoreService;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateParams {
    /// Only drop entries whose key contains this substring.
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub invalidated: usize,
}

pub async fn invalidate(
    State(service): State<ScoreService>,
    Query(params): Query<InvalidateParams>,
) -> Json<InvalidateResponse> {
    let pattern = params.pattern.as_deref().filter(|p| !p.is_empty());
    let invalidated = service.invalidate(pattern);
    tracing::info!(?pattern, invalidated, "Invalidated cache entries");
    Json(InvalidateResponse { invalidated })
}
