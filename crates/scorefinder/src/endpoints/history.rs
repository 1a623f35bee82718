use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use scorefinder_service::service::ScoreService;
use scorefinder_service::types::HistoryEntry;

use super::suggestions::CompetitorParams;
use super::{ResponseContext, ResponseError};

pub async fn fetch_competition_history(
    State(service): State<ScoreService>,
    Query(params): Query<CompetitorParams>,
) -> Result<Json<Arc<[HistoryEntry]>>, ResponseError> {
    let history = service
        .competition_history(&params.competitor)
        .await
        .or_respond("Failed to fetch competition history")?;
    Ok(Json(history))
}
