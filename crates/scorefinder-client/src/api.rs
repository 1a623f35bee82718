use std::fmt;

use reqwest::{StatusCode, Url};
use scorefinder_cache::CancellationToken;
use thiserror::Error;

use crate::response::{ApiResponse, Named};

/// The suggestion lists the API offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Competitors,
    Styles,
}

impl QueryKind {
    /// The endpoint path, relative to the base URL.
    pub fn path(self) -> &'static str {
        match self {
            QueryKind::Competitors => "fetchCompetitors",
            QueryKind::Styles => "fetchStyles",
        }
    }

    /// The name of the query parameter carrying the input.
    pub fn param(self) -> &'static str {
        match self {
            QueryKind::Competitors => "competitor",
            QueryKind::Styles => "style",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Competitors => "competitors",
            QueryKind::Styles => "styles",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error talking to the API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid request url")]
    Url(#[from] url::ParseError),
    #[error("failed to fetch {kind}: server responded with {status}")]
    Status { kind: QueryKind, status: StatusCode },
    #[error("failed to fetch {kind}")]
    Request {
        kind: QueryKind,
        #[source]
        source: reqwest::Error,
    },
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A client of the Score Finder HTTP API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, mut base_url: Url) -> Self {
        // make `join` append to the path instead of replacing its last segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Names of the competitors matching `query`.
    pub async fn competitors(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>, ClientError> {
        self.names(QueryKind::Competitors, query, token).await
    }

    /// Names of the styles matching `query`.
    pub async fn styles(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>, ClientError> {
        self.names(QueryKind::Styles, query, token).await
    }

    /// Fetches the suggestion list of `kind` for `query`.
    ///
    /// Blank queries return an empty list without a request. The request is abandoned as soon
    /// as `token` is cancelled.
    pub async fn names(
        &self,
        kind: QueryKind,
        query: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>, ClientError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.base_url.join(kind.path())?;
        url.query_pairs_mut().append_pair(kind.param(), query);

        tokio::select! {
            biased;

            _ = token.cancelled() => Err(ClientError::Cancelled),
            result = self.fetch_names(kind, url) => result,
        }
    }

    async fn fetch_names(&self, kind: QueryKind, url: Url) -> Result<Vec<String>, ClientError> {
        tracing::trace!(%url, "Fetching {kind}");
        let request_error = |source| ClientError::Request { kind, source };

        let response = self.client.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status { kind, status });
        }

        let response: ApiResponse<Vec<Named>> = response.json().await.map_err(request_error)?;
        Ok(response.into_inner().into_iter().map(|n| n.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::get;
    use scorefinder_test::HitCounter;
    use serde_json::{Value, json};

    use super::*;

    fn api() -> HitCounter {
        scorefinder_test::setup();
        let router = Router::new()
            .route(
                "/api/fetchCompetitors",
                get(|| async {
                    Json(json!([
                        { "id": "p1", "name": "Alice Smith" },
                        { "id": "p3", "name": "Malia Alison" },
                    ]))
                }),
            )
            .route(
                "/api/fetchStyles",
                get(|| async { Json(json!({ "body": "[{\"name\":\"Waltz\"}]" })) }),
            );
        HitCounter::new(router)
    }

    fn client(server: &HitCounter) -> ApiClient {
        ApiClient::new(server.url("/api"))
    }

    #[tokio::test]
    async fn test_competitors() {
        let server = api();
        let token = CancellationToken::new();

        let names = client(&server).competitors(" ali ", &token).await.unwrap();
        assert_eq!(names, ["Alice Smith", "Malia Alison"]);
        assert_eq!(
            server.all_hits(),
            [("/api/fetchCompetitors?competitor=ali".to_owned(), 1)]
        );
    }

    #[tokio::test]
    async fn test_wrapped_styles() {
        let server = api();
        let token = CancellationToken::new();

        let names = client(&server).styles("wal", &token).await.unwrap();
        assert_eq!(names, ["Waltz"]);
    }

    #[tokio::test]
    async fn test_blank_query() {
        let server = api();
        let token = CancellationToken::new();

        let names = client(&server).competitors("   ", &token).await.unwrap();
        assert!(names.is_empty());
        assert_eq!(server.accesses(), 0);
    }

    #[tokio::test]
    async fn test_error_status() {
        let router = Router::new().route(
            "/fetchCompetitors",
            get(|| async {
                (
                    HttpStatus::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Failed to fetch competitors" })),
                )
            }),
        );
        let server = HitCounter::new(router);
        let token = CancellationToken::new();

        let error = ApiClient::new(server.url("/"))
            .competitors("ali", &token)
            .await
            .unwrap_err();
        let ClientError::Status { kind, status } = &error else {
            panic!("unexpected error: {error}");
        };
        assert_eq!(*kind, QueryKind::Competitors);
        assert_eq!(*status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let router = Router::new().route(
            "/fetchStyles",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(Value::Array(vec![]))
            }),
        );
        let server = HitCounter::new(router);
        let client = ApiClient::new(server.url("/"));
        let token = CancellationToken::new();

        let cancel = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            }
        };
        let (result, ()) = tokio::join!(client.styles("waltz", &token), cancel);

        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_base_url() {
        let client = ApiClient::new("http://localhost:5001/api".parse().unwrap());
        assert_eq!(client.base_url().as_str(), "http://localhost:5001/api/");
        let url = client.base_url().join(QueryKind::Styles.path()).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5001/api/fetchStyles");
    }
}
