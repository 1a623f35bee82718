use axum::Json;
use axum::extract::State;
use scorefinder_service::service::ScoreService;
use scorefinder_service::types::Competition;

use super::{ResponseContext, ResponseError};

pub async fn fetch_competitions(
    State(service): State<ScoreService>,
) -> Result<Json<Vec<Competition>>, ResponseError> {
    let competitions = service
        .competitions()
        .await
        .or_respond("Failed to fetch competitions")?;
    Ok(Json(competitions))
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use crate::test;

    #[tokio::test]
    async fn test_most_recent_first() {
        let server = test::server().await;

        let body: Value = reqwest::get(server.url("/fetchCompetitions"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        insta::assert_yaml_snapshot!(body, @r###"
        - id: c2
          name: Ohio Star Ball 2024
        - id: c3
          name: Capital Dancesport 2023
        - id: c1
          name: Emerald Ball 2023
        - id: c4
          name: Local Social
        "###);
    }
}
