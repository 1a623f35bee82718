use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{CacheKey, Fetcher};

/// Provides the actual query behind a [`Debouncer`].
///
/// The source is responsible for deriving the cache key of an input, and for running the query
/// for an input once the input has settled.
pub trait QuerySource<V>: Send + Sync + 'static {
    /// Returns the cache key corresponding to `input`.
    fn cache_key(&self, input: &str) -> CacheKey;

    /// Runs the query for `input`.
    ///
    /// The `token` is cancelled once the query is superseded by a newer input.
    fn query(&self, input: String, token: CancellationToken) -> BoxFuture<'static, anyhow::Result<V>>;
}

/// Configuration of a [`Debouncer`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DebounceConfig {
    /// How long the input has to be stable before a query is issued.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Inputs with fewer characters (after trimming) never issue a query.
    pub min_input_len: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(300),
            min_input_len: 1,
        }
    }
}

/// The result published for a settled input.
#[derive(Clone, Debug, PartialEq)]
pub struct Suggestions<V> {
    /// The input the result belongs to.
    pub input: String,
    /// The query result, `None` if the input was too short or the query failed.
    pub value: Option<V>,
}

/// Drives a [`Fetcher`] from rapidly changing user input.
///
/// Every new input restarts the delay. Only once the input was stable for the configured
/// delay, the previous query is cancelled and a new one issued, unless the previous query is
/// still running for the same cache key. Results of superseded queries are never published,
/// and cancellations are not reported as errors.
///
/// Dropping the debouncer cancels any running query.
#[derive(Debug)]
pub struct Debouncer<V> {
    input: watch::Sender<String>,
    results: watch::Receiver<Option<Suggestions<V>>>,
    shutdown: CancellationToken,
}

impl<V> Debouncer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Spawns the debouncing task on the current runtime.
    ///
    /// The `fetcher` should support cancellation, otherwise superseded queries run to
    /// completion in the background.
    pub fn new<S>(config: DebounceConfig, fetcher: Fetcher<V>, source: S) -> Self
    where
        S: QuerySource<V>,
    {
        let (input, input_rx) = watch::channel(String::new());
        let (results_tx, results) = watch::channel(None);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            config,
            fetcher,
            source: Arc::new(source),
            results: Arc::new(results_tx),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(driver.run(input_rx));

        Self {
            input,
            results,
            shutdown,
        }
    }

    /// Feeds a new input, restarting the delay.
    pub fn set_input(&self, input: impl Into<String>) {
        self.input.send_replace(input.into());
    }

    /// A receiver that is notified about every published result.
    pub fn results(&self) -> watch::Receiver<Option<Suggestions<V>>> {
        self.results.clone()
    }

    /// The most recently published result.
    pub fn latest(&self) -> Option<Suggestions<V>> {
        self.results.borrow().clone()
    }
}

impl<V> Drop for Debouncer<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Driver<V, S> {
    config: DebounceConfig,
    fetcher: Fetcher<V>,
    source: Arc<S>,
    results: Arc<watch::Sender<Option<Suggestions<V>>>>,
    shutdown: CancellationToken,
}

/// The most recently issued query.
struct InFlight {
    key: CacheKey,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl<V, S> Driver<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: QuerySource<V>,
{
    async fn run(self, mut input: watch::Receiver<String>) {
        let mut current: Option<InFlight> = None;

        while self.next_settled(&mut input).await {
            let text = input.borrow_and_update().clone();
            let key = (text.trim().chars().count() >= self.config.min_input_len)
                .then(|| self.source.cache_key(&text));

            if let Some(previous) = current.take() {
                if key.as_ref() == Some(&previous.key) && !previous.task.is_finished() {
                    // the running query answers this input as well
                    current = Some(previous);
                    continue;
                }
                previous.token.cancel();
            }

            let Some(key) = key else {
                self.results.send_replace(Some(Suggestions {
                    input: text,
                    value: None,
                }));
                continue;
            };

            let token = self.shutdown.child_token();
            let task = tokio::spawn(self.query(text, key.clone(), token.clone()));
            current = Some(InFlight { key, token, task });
        }

        if let Some(current) = current {
            current.token.cancel();
        }
    }

    /// Waits for the next input that stays unchanged for the configured delay.
    ///
    /// Returns `false` once the debouncer is shut down.
    async fn next_settled(&self, input: &mut watch::Receiver<String>) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => return false,
            changed = input.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.config.delay) => return true,
                changed = input.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn query(
        &self,
        text: String,
        key: CacheKey,
        token: CancellationToken,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let fetcher = self.fetcher.clone();
        let source = Arc::clone(&self.source);
        let results = Arc::clone(&self.results);

        async move {
            let query_text = text.clone();
            let outcome = fetcher
                .fetch_cancellable(key, token.clone(), move |token| {
                    source.query(query_text, token)
                })
                .await;

            // a newer input took over in the meantime
            if token.is_cancelled() {
                return;
            }

            let value = match outcome {
                Ok(value) => Some(value),
                Err(error) if error.is_cancelled() => return,
                Err(error) => {
                    tracing::error!(input = %text, %error, "Failed to fetch suggestions");
                    None
                }
            };
            results.send_replace(Some(Suggestions { input: text, value }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::FutureExt;
    use tokio::time;

    use super::*;
    use crate::FetcherConfig;

    #[derive(Clone, Default)]
    struct RecordingSource {
        latency: Duration,
        calls: Arc<Mutex<Vec<String>>>,
        cancelled: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSource {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    /// Records the input of a query that was dropped before it finished.
    struct Abandoned {
        input: Option<String>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Drop for Abandoned {
        fn drop(&mut self) {
            if let Some(input) = self.input.take() {
                self.log.lock().unwrap().push(input);
            }
        }
    }

    impl QuerySource<Arc<Vec<String>>> for RecordingSource {
        fn cache_key(&self, input: &str) -> CacheKey {
            CacheKey::builder("competitors").param("q", input).build()
        }

        fn query(
            &self,
            input: String,
            _token: CancellationToken,
        ) -> BoxFuture<'static, anyhow::Result<Arc<Vec<String>>>> {
            self.calls.lock().unwrap().push(input.clone());
            let latency = self.latency;
            let mut abandoned = Abandoned {
                input: Some(input.clone()),
                log: Arc::clone(&self.cancelled),
            };
            async move {
                time::sleep(latency).await;
                abandoned.input = None;
                Ok(Arc::new(vec![format!("{input} result")]))
            }
            .boxed()
        }
    }

    fn debouncer(source: &RecordingSource) -> Debouncer<Arc<Vec<String>>> {
        let config = DebounceConfig {
            delay: Duration::from_millis(300),
            min_input_len: 1,
        };
        Debouncer::new(config, Fetcher::new(FetcherConfig::client()), source.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_once_after_typing_stops() {
        let source = RecordingSource::default();
        let debouncer = debouncer(&source);
        let mut results = debouncer.results();

        debouncer.set_input("a");
        time::sleep(Duration::from_millis(100)).await;
        debouncer.set_input("al");
        time::sleep(Duration::from_millis(100)).await;
        debouncer.set_input("ali");

        time::sleep(Duration::from_millis(299)).await;
        assert!(source.calls().is_empty());

        results.changed().await.unwrap();
        assert_eq!(source.calls(), ["ali"]);

        let latest = debouncer.latest().unwrap();
        assert_eq!(latest.input, "ali");
        assert_eq!(latest.value.unwrap().as_slice(), ["ali result"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_input_does_not_fetch() {
        let source = RecordingSource::default();
        let debouncer = debouncer(&source);
        let mut results = debouncer.results();

        debouncer.set_input("   ");
        results.changed().await.unwrap();

        assert!(source.calls().is_empty());
        assert_eq!(
            debouncer.latest(),
            Some(Suggestions {
                input: "   ".into(),
                value: None
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_query_is_discarded() {
        let source = RecordingSource {
            latency: Duration::from_secs(1),
            ..Default::default()
        };
        let debouncer = debouncer(&source);
        let mut results = debouncer.results();

        debouncer.set_input("al");
        // the first query is running after the delay, but has not finished yet
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls(), ["al"]);

        debouncer.set_input("ali");
        results.changed().await.unwrap();

        assert_eq!(source.calls(), ["al", "ali"]);
        assert_eq!(source.cancelled.lock().unwrap().as_slice(), ["al"]);
        assert_eq!(debouncer.latest().unwrap().input, "ali");

        // nothing else gets published later on
        time::sleep(Duration::from_secs(5)).await;
        assert!(!results.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retyping_running_input() {
        let source = RecordingSource {
            latency: Duration::from_secs(1),
            ..Default::default()
        };
        let debouncer = debouncer(&source);
        let mut results = debouncer.results();

        debouncer.set_input("ali");
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls(), ["ali"]);

        // "alic" never settles, so the query for "ali" keeps running
        debouncer.set_input("alic");
        time::sleep(Duration::from_millis(100)).await;
        debouncer.set_input("ali");
        results.changed().await.unwrap();

        let latest = debouncer.latest().unwrap();
        assert_eq!(latest.input, "ali");
        assert_eq!(latest.value.unwrap().as_slice(), ["ali result"]);
        assert_eq!(source.calls(), ["ali"]);
        assert!(source.cancelled.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_running_query() {
        let source = RecordingSource {
            latency: Duration::from_secs(1),
            ..Default::default()
        };
        let debouncer = debouncer(&source);

        debouncer.set_input("ali");
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls(), ["ali"]);

        drop(debouncer);
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.cancelled.lock().unwrap().as_slice(), ["ali"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_input_is_served_from_cache() {
        let source = RecordingSource::default();
        let debouncer = debouncer(&source);
        let mut results = debouncer.results();

        debouncer.set_input("ali");
        results.changed().await.unwrap();
        debouncer.set_input("alic");
        results.changed().await.unwrap();
        debouncer.set_input("ali");
        results.changed().await.unwrap();

        assert_eq!(source.calls(), ["ali", "alic"]);
        assert_eq!(debouncer.latest().unwrap().input, "ali");
    }
}
