use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use scorefinder_cache::{
    CacheKey, CancellationToken, DebounceConfig, Debouncer, Fetcher, FetcherConfig, QuerySource,
    Suggestions,
};
use serde::Deserialize;
use tokio::sync::watch;

use crate::api::{ApiClient, QueryKind};

/// Configuration of an [`Autocomplete`] input.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutocompleteConfig {
    /// The suggestion cache. Should support cancellation.
    pub cache: FetcherConfig,
    pub debounce: DebounceConfig,
}

impl Default for AutocompleteConfig {
    fn default() -> Self {
        // the timing of the search form inputs
        Self {
            cache: FetcherConfig::client(),
            debounce: DebounceConfig {
                delay: Duration::from_millis(400),
                min_input_len: 2,
            },
        }
    }
}

/// Suggestions for one autocomplete input of the search form.
///
/// Feed every keystroke to [`set_input`](Self::set_input) and watch [`results`](Self::results).
/// Dropping it cancels the running request.
#[derive(Debug)]
pub struct Autocomplete {
    kind: QueryKind,
    fetcher: Fetcher<Arc<Vec<String>>>,
    debouncer: Debouncer<Arc<Vec<String>>>,
}

impl Autocomplete {
    /// Creates an input with its own suggestion cache.
    pub fn new(client: ApiClient, kind: QueryKind, config: AutocompleteConfig) -> Self {
        Self::with_fetcher(client, kind, Fetcher::new(config.cache), config.debounce)
    }

    /// Creates an input that shares `fetcher` with other inputs.
    ///
    /// Cache keys include the [`QueryKind`], so inputs of different kinds never collide.
    pub fn with_fetcher(
        client: ApiClient,
        kind: QueryKind,
        fetcher: Fetcher<Arc<Vec<String>>>,
        debounce: DebounceConfig,
    ) -> Self {
        let source = ApiSource { client, kind };
        let debouncer = Debouncer::new(debounce, fetcher.clone(), source);
        Self {
            kind,
            fetcher,
            debouncer,
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// The suggestion cache behind this input.
    pub fn fetcher(&self) -> &Fetcher<Arc<Vec<String>>> {
        &self.fetcher
    }

    pub fn set_input(&self, input: impl Into<String>) {
        self.debouncer.set_input(input);
    }

    pub fn results(&self) -> watch::Receiver<Option<Suggestions<Arc<Vec<String>>>>> {
        self.debouncer.results()
    }

    pub fn latest(&self) -> Option<Suggestions<Arc<Vec<String>>>> {
        self.debouncer.latest()
    }
}

struct ApiSource {
    client: ApiClient,
    kind: QueryKind,
}

impl QuerySource<Arc<Vec<String>>> for ApiSource {
    fn cache_key(&self, input: &str) -> CacheKey {
        CacheKey::builder(self.kind.as_str())
            .param(self.kind.param(), input.trim())
            .build()
    }

    fn query(
        &self,
        input: String,
        token: CancellationToken,
    ) -> BoxFuture<'static, anyhow::Result<Arc<Vec<String>>>> {
        let client = self.client.clone();
        let kind = self.kind;
        async move {
            let names = client.names(kind, &input, &token).await?;
            Ok(Arc::new(names))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use scorefinder_test::HitCounter;
    use serde_json::{Value, json};

    use super::*;

    #[derive(serde::Deserialize)]
    struct Params {
        competitor: String,
    }

    fn api() -> HitCounter {
        scorefinder_test::setup();
        let router = Router::new().route(
            "/fetchCompetitors",
            get(|Query(params): Query<Params>| async move {
                let names: Vec<Value> = ["Alice Smith", "Malia Alison", "Bob Jones"]
                    .into_iter()
                    .filter(|name| name.to_lowercase().contains(&params.competitor))
                    .map(|name| json!({ "name": name }))
                    .collect();
                Json(names)
            }),
        );
        HitCounter::new(router)
    }

    fn autocomplete(server: &HitCounter) -> Autocomplete {
        let config = AutocompleteConfig {
            debounce: DebounceConfig {
                delay: Duration::from_millis(50),
                min_input_len: 1,
            },
            ..Default::default()
        };
        Autocomplete::new(
            ApiClient::new(server.url("/")),
            QueryKind::Competitors,
            config,
        )
    }

    /// Waits for the next published result.
    async fn next(
        results: &mut watch::Receiver<Option<Suggestions<Arc<Vec<String>>>>>,
    ) -> Suggestions<Arc<Vec<String>>> {
        tokio::time::timeout(Duration::from_secs(5), results.changed())
            .await
            .unwrap()
            .unwrap();
        results.borrow_and_update().clone().unwrap()
    }

    #[tokio::test]
    async fn test_typing() {
        let server = api();
        let autocomplete = autocomplete(&server);
        let mut results = autocomplete.results();

        for input in ["a", "al", "ali"] {
            autocomplete.set_input(input);
        }

        let suggestions = next(&mut results).await;
        assert_eq!(suggestions.input, "ali");
        assert_eq!(
            suggestions.value.as_deref().map(Vec::as_slice),
            Some(&["Alice Smith".to_owned(), "Malia Alison".to_owned()][..])
        );
        assert_eq!(
            server.all_hits(),
            [("/fetchCompetitors?competitor=ali".to_owned(), 1)]
        );

        // the same input again is answered from the cache
        autocomplete.set_input("ali");
        let suggestions = next(&mut results).await;
        assert_eq!(suggestions.input, "ali");
        assert_eq!(server.accesses(), 0);
        assert_eq!(autocomplete.fetcher().len(), 1);
    }

    #[tokio::test]
    async fn test_short_input() {
        let server = api();
        let autocomplete = autocomplete(&server);
        let mut results = autocomplete.results();

        autocomplete.set_input("  ");
        let suggestions = next(&mut results).await;
        assert_eq!(suggestions.value, None);
        assert_eq!(server.accesses(), 0);
    }

    #[test]
    fn test_default_config() {
        let config = AutocompleteConfig::default();
        assert_eq!(config.debounce.delay, Duration::from_millis(400));
        assert_eq!(config.debounce.min_input_len, 2);
        assert!(config.cache.supports_cancellation);
    }

    #[tokio::test]
    async fn test_shared_fetcher() {
        let server = api();
        let fetcher = Fetcher::new(FetcherConfig::client());
        let client = ApiClient::new(server.url("/"));

        let competitors = Autocomplete::with_fetcher(
            client.clone(),
            QueryKind::Competitors,
            fetcher.clone(),
            DebounceConfig::default(),
        );
        let styles = Autocomplete::with_fetcher(
            client,
            QueryKind::Styles,
            fetcher.clone(),
            DebounceConfig::default(),
        );

        let competitors_key = ApiSource {
            client: ApiClient::new(server.url("/")),
            kind: competitors.kind(),
        }
        .cache_key("waltz");
        let styles_key = ApiSource {
            client: ApiClient::new(server.url("/")),
            kind: styles.kind(),
        }
        .cache_key(" waltz ");
        assert_ne!(competitors_key, styles_key);
        assert!(styles_key.contains("styles"));
    }
}
