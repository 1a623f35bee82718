use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use scorefinder_service::service::ScoreService;
use scorefinder_service::types::{SearchFilters, SearchRow};
use serde::Deserialize;

use super::{ResponseContext, ResponseError};

/// Query parameters of the score search.
///
/// All values arrive as strings, blank ones count as absent.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub competitor: Option<String>,
    pub style: Option<String>,
    pub judge: Option<String>,
    pub competition: Option<String>,
    pub score: Option<String>,
    pub overall_score: Option<String>,
}

fn parse_number(value: Option<&str>, name: &'static str) -> Result<Option<i64>, ResponseError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ResponseError::bad_request(name)),
    }
}

impl SearchParams {
    fn into_filters(self) -> Result<SearchFilters, ResponseError> {
        Ok(SearchFilters {
            score: parse_number(self.score.as_deref(), "score must be a number")?,
            overall_score: parse_number(
                self.overall_score.as_deref(),
                "overall_score must be a number",
            )?,
            competitor: self.competitor,
            style: self.style,
            judge: self.judge,
            competition: self.competition,
        })
    }
}

pub async fn fetch_data(
    State(service): State<ScoreService>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Arc<[SearchRow]>>, ResponseError> {
    let filters = params.into_filters()?;
    let rows = service
        .search(filters)
        .await
        .or_respond("Failed to fetch data")?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::Value;

    use super::*;
    use crate::test;

    #[test]
    fn test_blank_numbers() {
        let params = SearchParams {
            score: Some(" ".into()),
            overall_score: Some("2".into()),
            ..Default::default()
        };
        let filters = params.into_filters().unwrap();
        assert_eq!(filters.score, None);
        assert_eq!(filters.overall_score, Some(2));
    }

    #[tokio::test]
    async fn test_search() {
        let server = test::server().await;

        let response = reqwest::get(server.url(
            "/fetchData?competition=Emerald%20Ball%202023,Ohio%20Star%20Ball%202024&style=waltz",
        ))
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = response.json().await.unwrap();
        insta::assert_yaml_snapshot!(body, @r###"
        - placement: 1
          person_name: Alice Smith
          style_name: Waltz
          comp_name: Emerald Ball 2023
        - placement: 2
          person_name: Bob Jones
          style_name: Waltz
          comp_name: Emerald Ball 2023
        "###);
    }

    #[tokio::test]
    async fn test_no_matches() {
        let server = test::server().await;

        let body: Value = reqwest::get(server.url("/fetchData?judge=nobody"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, Value::Array(vec![]));
    }

    #[tokio::test]
    async fn test_invalid_score() {
        let server = test::server().await;

        let response = reqwest::get(server.url("/fetchData?score=first"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: Value = response.json().await.unwrap();
        insta::assert_yaml_snapshot!(body, @r###"
        error: score must be a number
        "###);
    }
}
