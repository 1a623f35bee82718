use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::utils::CallOnDrop;
use crate::{CacheKey, FetchError, FetcherConfig, ResultCache};

type FetchResult<V> = Result<V, FetchError>;

/// A computation that can be awaited by any number of callers.
type ComputationChannel<V> = Shared<oneshot::Receiver<FetchResult<V>>>;

type PendingMap<V> = FxHashMap<CacheKey, Pending<V>>;

/// A registered computation and the callers waiting for it.
struct Pending<V> {
    /// Distinguishes this computation from later ones for the same key.
    id: u64,
    channel: ComputationChannel<V>,
    /// Aborts the computation.
    abort: CancellationToken,
    /// The number of cancellable callers that still wait for the result.
    waiters: usize,
    /// Set once a caller that cannot be cancelled depends on the result.
    pinned: bool,
}

impl<V> Pending<V> {
    /// Adds a caller to this computation.
    fn attach(
        &mut self,
        inner: &Arc<Inner<V>>,
        key: &CacheKey,
        cancellable: bool,
    ) -> Option<Interest<V>> {
        if !cancellable {
            self.pinned = true;
            return None;
        }
        self.waiters += 1;
        Some(Interest {
            inner: Arc::clone(inner),
            registration: Some((key.clone(), self.id)),
            abort: self.abort.clone(),
        })
    }
}

/// The interest of a cancellable caller in a computation.
///
/// Dropping the last interest in a computation that no uncancellable caller depends on aborts
/// the computation and unregisters it, so that the next fetch starts a new one.
struct Interest<V> {
    inner: Arc<Inner<V>>,
    /// `None` for computations that are not registered as pending.
    registration: Option<(CacheKey, u64)>,
    abort: CancellationToken,
}

impl<V> Drop for Interest<V> {
    fn drop(&mut self) {
        let Some((key, id)) = &self.registration else {
            // nobody else can be waiting for it
            self.abort.cancel();
            return;
        };

        let mut pending = lock(&self.inner.pending);
        let Some(entry) = pending.get_mut(key).filter(|entry| entry.id == *id) else {
            // the computation has settled already
            return;
        };
        entry.waiters -= 1;
        if entry.waiters == 0 && !entry.pinned {
            entry.abort.cancel();
            pending.remove(key);
        }
    }
}

enum Lookup<V> {
    Cached(V),
    Computing(ComputationChannel<V>, Option<Interest<V>>),
}

struct Inner<V> {
    config: FetcherConfig,

    /// Results of successful computations.
    cache: Mutex<ResultCache<V>>,

    /// Used for deduplicating concurrent fetches of the same key.
    pending: Mutex<PendingMap<V>>,

    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A cache in front of asynchronous operations that coalesces concurrent requests.
///
/// Each fetch goes through the following steps:
///
/// 1. If a fresh result for the key is cached, it is returned right away.
/// 2. If a computation for the key is already running, the caller waits for that computation.
/// 3. Otherwise the operation is spawned as a new computation and registered as pending.
///
/// Once a computation settles, a successful result is stored in the cache, the computation is
/// removed from the pending registry, and its outcome is handed to every waiting caller.
/// Failures are not cached, so the next fetch for the same key runs the operation again.
///
/// Computations run on the tokio runtime independently of their callers, so they finish even
/// when every caller has gone away. The only exception are computations that all of their
/// callers cancelled, see [`fetch_cancellable`](Self::fetch_cancellable).
///
/// Values are handed out by clone. Use an [`Arc`] for anything larger than a few words.
pub struct Fetcher<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Fetcher<V> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Fetcher<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.inner.cache.try_lock().map(|c| c.len()).unwrap_or_default();
        let pending = self.inner.pending.try_lock().map(|p| p.len()).unwrap_or_default();
        f.debug_struct("Fetcher")
            .field("config", &self.inner.config)
            .field("entries", &entries)
            .field("pending", &pending)
            .finish()
    }
}

/// A cache entry to populate ahead of time, see [`Fetcher::warm`].
pub struct WarmEntry<V> {
    key: CacheKey,
    ttl: Duration,
    operation: BoxFuture<'static, anyhow::Result<V>>,
}

impl<V> WarmEntry<V> {
    /// Creates an entry that stores the result of `operation` under `key` for `ttl`.
    pub fn new<F>(key: CacheKey, ttl: Duration, operation: F) -> Self
    where
        F: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        Self {
            key,
            ttl,
            operation: operation.boxed(),
        }
    }
}

impl<V> fmt::Debug for WarmEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmEntry")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// The outcome of [`Fetcher::warm`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WarmReport {
    /// Number of entries that were stored.
    pub warmed: usize,
    /// Number of entries whose operation failed.
    pub failed: usize,
}

impl<V> Fetcher<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new fetcher with an empty cache.
    pub fn new(config: FetcherConfig) -> Self {
        let cache = ResultCache::new(config.max_size);
        Self {
            inner: Arc::new(Inner {
                config,
                cache: Mutex::new(cache),
                pending: Default::default(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration this fetcher was created with.
    pub fn config(&self) -> &FetcherConfig {
        &self.inner.config
    }

    fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Returns the cached value for `key` if it is still fresh.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        lock(&self.inner.cache).try_get(key)
    }

    /// Stores `value` under `key` with the default TTL.
    pub fn set(&self, key: CacheKey, value: V) {
        self.set_with_ttl(key, value, self.inner.config.default_ttl)
    }

    /// Stores `value` under `key` for `ttl`.
    pub fn set_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        self.inner.store(key, value, ttl);
    }

    /// Removes all cached entries whose key contains `pattern`, or every entry for `None`.
    ///
    /// Running computations are not affected.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let removed = lock(&self.inner.cache).invalidate(pattern);
        tracing::debug!(
            cache = self.name(),
            ?pattern,
            removed,
            "Invalidated cache entries"
        );
        removed
    }

    /// Eagerly removes all stale entries.
    pub fn purge_expired(&self) -> usize {
        let purged = lock(&self.inner.cache).purge_expired();
        metric!(counter("caches.expired") += purged as i64, "cache" => self.name());
        purged
    }

    /// The number of cached entries.
    pub fn len(&self) -> usize {
        lock(&self.inner.cache).len()
    }

    /// Whether no entries are cached.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.cache).is_empty()
    }

    /// Whether an entry is stored for `key`, without expiring it.
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        lock(&self.inner.cache).contains_key(key)
    }

    /// The number of computations that are currently running.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Fetches the value for `key`, computing it with `operation` if needed.
    ///
    /// A successful result is cached with the default TTL.
    pub async fn fetch<F, Fut>(&self, key: CacheKey, operation: F) -> FetchResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let ttl = self.inner.config.default_ttl;
        self.fetch_with_ttl(key, ttl, operation).await
    }

    /// Fetches the value for `key`, computing it with `operation` if needed.
    ///
    /// A successful result is cached for `ttl`.
    pub async fn fetch_with_ttl<F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        operation: F,
    ) -> FetchResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.fetch_with_ttl_fn(key, move |_: &V| ttl, operation).await
    }

    /// Fetches the value for `key`, computing it with `operation` if needed.
    ///
    /// A successful result is cached for the duration `ttl` returns for it. This allows, for
    /// example, to keep empty results for a shorter time.
    pub async fn fetch_with_ttl_fn<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: T,
        operation: F,
    ) -> FetchResult<V>
    where
        T: FnOnce(&V) -> Duration + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.fetch_inner(key, ttl, false, move |_: CancellationToken| operation())
            .await
    }

    /// Fetches the value for `key` on behalf of a caller that may lose interest.
    ///
    /// Once `token` is cancelled, this call returns [`FetchError::Cancelled`]. The shared
    /// computation keeps running for as long as any other caller waits for it. Only when every
    /// caller has cancelled, and no plain [`fetch`](Self::fetch) depends on it, the computation
    /// is aborted, its result discarded, and the next fetch for `key` starts over. The
    /// `operation` receives a token that is cancelled at that point, so it can stop early.
    ///
    /// Fetchers without [`supports_cancellation`](FetcherConfig::supports_cancellation) hand
    /// `token` to the operation but otherwise ignore it.
    pub async fn fetch_cancellable<F, Fut>(
        &self,
        key: CacheKey,
        token: CancellationToken,
        operation: F,
    ) -> FetchResult<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let ttl = self.inner.config.default_ttl;
        if !self.inner.config.supports_cancellation {
            tracing::warn!(
                cache = self.name(),
                "Cancellable fetch on a fetcher without cancellation support"
            );
            let operation = move |_: CancellationToken| operation(token);
            return self.fetch_inner(key, move |_: &V| ttl, false, operation).await;
        }

        if token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        // Losing the race drops the inner future along with this caller's interest.
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Cancelled),
            result = self.fetch_inner(key, move |_: &V| ttl, true, operation) => result,
        }
    }

    async fn fetch_inner<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: T,
        cancellable: bool,
        operation: F,
    ) -> FetchResult<V>
    where
        T: FnOnce(&V) -> Duration + Send + 'static,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        match self.lookup_or_spawn(key, ttl, cancellable, operation) {
            Lookup::Cached(value) => Ok(value),
            Lookup::Computing(channel, _interest) => {
                channel.await.unwrap_or(Err(FetchError::Dropped))
            }
        }
    }

    /// Returns the cached value for `key`, or a channel to a running computation for it.
    ///
    /// This is synchronous on purpose, none of the locks it takes may be held across an await.
    fn lookup_or_spawn<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: T,
        cancellable: bool,
        operation: F,
    ) -> Lookup<V>
    where
        T: FnOnce(&V) -> Duration + Send + 'static,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let name = self.name();
        metric!(counter("caches.access") += 1, "cache" => name);

        if let Some(value) = self.get(&key) {
            metric!(counter("caches.memory.hit") += 1, "cache" => name);
            return Lookup::Cached(value);
        }

        let abort = CancellationToken::new();
        let (sender, receiver) = oneshot::channel();
        let channel = receiver.shared();

        let (interest, remove_pending) = if self.inner.config.deduplicate {
            let mut pending = lock(&self.inner.pending);
            if let Some(entry) = pending.get_mut(&key) {
                // A concurrent fetch was deduplicated.
                metric!(counter("caches.pending.hit") += 1, "cache" => name);
                let interest = entry.attach(&self.inner, &key, cancellable);
                return Lookup::Computing(entry.channel.clone(), interest);
            }

            // The computation removes itself from `pending` only after storing its result.
            // Checking the cache again while holding the lock means we either find that result,
            // or the computation is still registered and we got its channel above.
            if let Some(value) = self.get(&key) {
                metric!(counter("caches.memory.hit") += 1, "cache" => name);
                return Lookup::Cached(value);
            }

            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let mut entry = Pending {
                id,
                channel: channel.clone(),
                abort: abort.clone(),
                waiters: 0,
                pinned: false,
            };
            let interest = entry.attach(&self.inner, &key, cancellable);
            pending.insert(key.clone(), entry);

            let inner = Arc::clone(&self.inner);
            let registered = key.clone();
            let remove_pending = CallOnDrop::new(move || {
                let mut pending = lock(&inner.pending);
                if pending.get(&registered).is_some_and(|entry| entry.id == id) {
                    pending.remove(&registered);
                }
            });
            (interest, Some(remove_pending))
        } else {
            let interest = cancellable.then(|| Interest {
                inner: Arc::clone(&self.inner),
                registration: None,
                abort: abort.clone(),
            });
            (interest, None)
        };

        // The registry lock is released here, so `operation` may call into this fetcher.
        self.spawn_computation(key, ttl, abort, operation, sender, remove_pending);
        Lookup::Computing(channel, interest)
    }

    /// Spawns `operation` as a separate task that sends its result to `sender`.
    ///
    /// NOTE: This function itself is *not* `async`, because it should eagerly spawn the
    /// computation on the runtime, even if nobody awaits its result.
    fn spawn_computation<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: T,
        abort: CancellationToken,
        operation: F,
        sender: oneshot::Sender<FetchResult<V>>,
        remove_pending: Option<CallOnDrop>,
    ) where
        T: FnOnce(&V) -> Duration + Send + 'static,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        metric!(counter("caches.computation") += 1, "cache" => self.name());
        tracing::trace!(cache = self.name(), %key, "Spawning computation");

        let computation = operation(abort.clone());
        let timeout = self.inner.config.operation_timeout;

        let inner = Arc::clone(&self.inner);
        let task = async move {
            let result = run_operation(computation, abort, timeout).await;
            let name = inner.config.name.as_str();
            match &result {
                Ok(value) => {
                    let ttl = ttl(value);
                    inner.store(key, value.clone(), ttl)
                }
                Err(FetchError::Cancelled) => {
                    tracing::trace!(cache = name, %key, "Computation cancelled");
                }
                Err(error) => {
                    metric!(counter("caches.computation.error") += 1, "cache" => name);
                    tracing::debug!(cache = name, %key, %error, "Computation failed");
                }
            }
            // Drop the guard first to remove the computation from the registry. This ensures
            // that callers either get a channel that will receive data, or find the cached value.
            drop(remove_pending);
            sender.send(result).ok();
        }
        .in_current_span();

        tokio::spawn(task);
    }

    /// Populates the cache ahead of time.
    ///
    /// All operations run concurrently. Failures are logged and otherwise ignored, the
    /// affected keys are filled on demand by later fetches.
    pub async fn warm<I>(&self, entries: I) -> WarmReport
    where
        I: IntoIterator<Item = WarmEntry<V>>,
    {
        let name = self.name();
        let warmings = entries.into_iter().map(|entry| async move {
            let WarmEntry {
                key,
                ttl,
                operation,
            } = entry;
            match operation.await {
                Ok(value) => {
                    self.set_with_ttl(key, value, ttl);
                    true
                }
                Err(error) => {
                    tracing::error!(
                        cache = name,
                        %key,
                        error = &*error as &dyn std::error::Error,
                        "Failed to warm cache entry"
                    );
                    false
                }
            }
        });

        let mut report = WarmReport::default();
        for warmed in join_all(warmings).await {
            if warmed {
                report.warmed += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.failed == 0 {
            tracing::info!(cache = name, warmed = report.warmed, "Cache warmed successfully");
        } else {
            tracing::warn!(
                cache = name,
                warmed = report.warmed,
                failed = report.failed,
                "Cache warming incomplete"
            );
        }
        report
    }
}

impl<V> Inner<V> {
    fn store(&self, key: CacheKey, value: V, ttl: Duration) {
        let evicted = lock(&self.cache).set(key, value, ttl);
        if let Some(evicted) = evicted {
            metric!(counter("caches.eviction") += 1, "cache" => self.config.name.as_str());
            tracing::trace!(cache = self.config.name.as_str(), key = %evicted, "Evicted cache entry");
        }
    }
}

/// Runs the operation, honoring the timeout and the abort token.
async fn run_operation<V, Fut>(
    computation: Fut,
    abort: CancellationToken,
    timeout: Option<Duration>,
) -> FetchResult<V>
where
    Fut: Future<Output = anyhow::Result<V>>,
{
    let computation = async {
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, computation).await {
                Ok(result) => result.map_err(FetchError::from),
                Err(_elapsed) => Err(FetchError::Timeout(timeout)),
            },
            None => computation.await.map_err(FetchError::from),
        }
    };

    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(FetchError::Cancelled),
        result = computation => result,
    }
}
