//! Autocomplete endpoints for the search form.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use scorefinder_service::service::ScoreService;
use scorefinder_service::types::{Competitor, Style};
use serde::Deserialize;

use super::{ResponseContext, ResponseError};

#[derive(Debug, Default, Deserialize)]
pub struct CompetitorParams {
    #[serde(default)]
    pub competitor: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StyleParams {
    #[serde(default)]
    pub style: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct JudgeParams {
    #[serde(default)]
    pub judge: String,
}

pub async fn fetch_competitors(
    State(service): State<ScoreService>,
    Query(params): Query<CompetitorParams>,
) -> Result<Json<Arc<[Competitor]>>, ResponseError> {
    let competitors = service
        .competitors(&params.competitor)
        .await
        .or_respond("Failed to fetch competitors")?;
    Ok(Json(competitors))
}

pub async fn fetch_styles(
    State(service): State<ScoreService>,
    Query(params): Query<StyleParams>,
) -> Result<Json<Vec<Style>>, ResponseError> {
    let styles = service
        .styles(&params.style)
        .await
        .or_respond("Failed to fetch styles")?;
    Ok(Json(styles))
}

pub async fn fetch_judges(
    State(service): State<ScoreService>,
    Query(params): Query<JudgeParams>,
) -> Result<Json<Vec<String>>, ResponseError> {
    let judges = service
        .judges(&params.judge)
        .await
        .or_respond("Failed to fetch judges")?;
    Ok(Json(judges))
}
