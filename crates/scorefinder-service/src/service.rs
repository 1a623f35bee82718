//! The query service shared by all request handlers.
//!
//! [`ScoreService`] owns the data store and the one shared [`Fetcher`]. Every cached query
//! derives a [`CacheKey`] from its parameters and hands its operation to the fetcher, which
//! coalesces concurrent requests and keeps successful results around for the query's TTL.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::TryFutureExt;
use rustc_hash::FxHashSet;
use scorefinder_cache::{CacheKey, FetchError, Fetcher, FetcherConfig, WarmReport};
use thiserror::Error;

use crate::config::{Config, Ttls};
use crate::lookups::{self, Lookup, NameMap};
use crate::queries::{self, Matcher, Names, ScoreFilter};
use crate::store::{Collection, DataStore, JsonStore, StoreError};
use crate::types::{Competition, Competitor, HistoryEntry, SearchFilters, SearchRow, Style};

/// A value held by the shared query cache.
#[derive(Debug, Clone)]
pub enum Cached {
    Competitors(Arc<[Competitor]>),
    Names(Arc<NameMap>),
    PersonIds(Arc<[String]>),
    Search(Arc<[SearchRow]>),
    History(Arc<[HistoryEntry]>),
}

/// Conversion between concrete query results and [`Cached`].
pub trait CachedValue: Sized + Send + 'static {
    fn into_cached(self) -> Cached;
    fn from_cached(cached: Cached) -> Option<Self>;
}

macro_rules! cached_value {
    ($($variant:ident => $ty:ty),* $(,)?) => {$(
        impl CachedValue for $ty {
            fn into_cached(self) -> Cached {
                Cached::$variant(self)
            }

            fn from_cached(cached: Cached) -> Option<Self> {
                match cached {
                    Cached::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    )*};
}

cached_value! {
    Competitors => Arc<[Competitor]>,
    Names => Arc<NameMap>,
    PersonIds => Arc<[String]>,
    Search => Arc<[SearchRow]>,
    History => Arc<[HistoryEntry]>,
}

/// An error answering a query.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A cached query failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// An uncached query failed to read the store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Answers the Score Finder queries.
///
/// The service is cheap to clone, all clones share the store and the cache.
#[derive(Clone)]
pub struct ScoreService {
    store: Arc<dyn DataStore>,
    fetcher: Fetcher<Cached>,
    ttls: Ttls,
}

impl fmt::Debug for ScoreService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoreService")
            .field("fetcher", &self.fetcher)
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}

impl ScoreService {
    /// Opens the JSON store configured in `config` and creates the service on top of it.
    pub async fn create(config: &Config) -> anyhow::Result<Self> {
        let store = JsonStore::open(&config.data_dir)
            .await
            .context("failed to open data store")?;
        Ok(Self::new(Arc::new(store), config.cache.clone(), config.ttls))
    }

    pub fn new(store: Arc<dyn DataStore>, cache: FetcherConfig, ttls: Ttls) -> Self {
        Self {
            store,
            fetcher: Fetcher::new(cache),
            ttls,
        }
    }

    /// The shared query cache.
    pub fn fetcher(&self) -> &Fetcher<Cached> {
        &self.fetcher
    }

    /// Loads the lookup maps into the cache.
    ///
    /// Failures are logged and reported, the affected maps are loaded on first use instead.
    pub async fn warm(&self) -> WarmReport {
        let entries = lookups::warm_entries(&self.store, self.ttls.lookups);
        self.fetcher.warm(entries).await
    }

    /// Drops cached results whose key contains `pattern`, or all of them.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        self.fetcher.invalidate(pattern)
    }

    /// Competitors whose name contains `query`.
    pub async fn competitors(&self, query: &str) -> Result<Arc<[Competitor]>, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Arc::from(Vec::new()));
        }

        let key = CacheKey::builder("competitors")
            .param("competitor", query)
            .build();
        let store = Arc::clone(&self.store);
        let query = query.to_owned();

        let competitors = self
            .fetch(key, self.ttls.competitors, move || async move {
                let people = store
                    .list(Collection::People, Some(queries::COMPETITOR_SCAN_LIMIT))
                    .await?;
                let found = queries::competitors(&people, &query);
                tracing::debug!(
                    %query,
                    scanned = people.len(),
                    found = found.len(),
                    "Searched competitors"
                );
                Ok(Arc::from(found))
            })
            .await?;
        Ok(competitors)
    }

    /// Styles whose name contains `query`.
    pub async fn styles(&self, query: &str) -> Result<Vec<Style>, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let styles = self
            .store
            .list(Collection::Styles, Some(queries::STYLE_SCAN_LIMIT))
            .await?;
        Ok(queries::styles(&styles, query))
    }

    /// Names of the judges containing `query`.
    pub async fn judges(&self, query: &str) -> Result<Vec<String>, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let judges = self.store.list(Collection::Judges, None).await?;
        Ok(queries::judges(&judges, query))
    }

    /// All competitions, the most recent ones first.
    pub async fn competitions(&self) -> Result<Vec<Competition>, ServiceError> {
        let competitions = self.store.list(Collection::Competitions, None).await?;
        Ok(queries::competitions(&competitions))
    }

    /// Searches scores, returning one row per competitor, style and competition.
    pub async fn search(&self, filters: SearchFilters) -> Result<Arc<[SearchRow]>, ServiceError> {
        let filters = filters.normalized();
        let key = CacheKey::new("search", &filters);

        let (search_ttl, empty_ttl) = (self.ttls.search, self.ttls.empty_search);
        let ttl = move |cached: &Cached| match cached {
            Cached::Search(rows) if rows.is_empty() => empty_ttl,
            _ => search_ttl,
        };

        let this = self.clone();
        let rows = self
            .fetch_with_ttl_fn(key, ttl, move || async move { this.run_search(&filters).await })
            .await?;
        Ok(rows)
    }

    /// The competitions the matching competitors took part in.
    pub async fn competition_history(
        &self,
        competitor: &str,
    ) -> Result<Arc<[HistoryEntry]>, ServiceError> {
        let competitor = competitor.trim();
        if competitor.is_empty() {
            return Ok(Arc::from(Vec::new()));
        }

        let key = CacheKey::builder("competition_history")
            .param("competitor", competitor)
            .build();
        let this = self.clone();
        let competitor = competitor.to_owned();

        let history = self
            .fetch(key, self.ttls.competition_history, move || async move {
                this.run_competition_history(&competitor).await
            })
            .await?;
        Ok(history)
    }

    async fn fetch<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        operation: F,
    ) -> Result<T, FetchError>
    where
        T: CachedValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.fetch_with_ttl_fn(key, move |_: &Cached| ttl, operation).await
    }

    async fn fetch_with_ttl_fn<T, L, F, Fut>(
        &self,
        key: CacheKey,
        ttl: L,
        operation: F,
    ) -> Result<T, FetchError>
    where
        T: CachedValue,
        L: FnOnce(&Cached) -> Duration + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let cached = self
            .fetcher
            .fetch_with_ttl_fn(key.clone(), ttl, move || {
                operation().map_ok(T::into_cached)
            })
            .await?;

        T::from_cached(cached)
            .ok_or_else(|| anyhow::anyhow!("unexpected value cached under {key}").into())
    }

    /// The id to name map of `lookup`, loading it if it is not cached.
    async fn lookup(&self, lookup: Lookup) -> Result<Arc<NameMap>, FetchError> {
        let store = Arc::clone(&self.store);
        self.fetch(lookup.cache_key(), self.ttls.lookups, move || async move {
            Ok(Arc::new(lookup.load(&*store).await?))
        })
        .await
    }

    /// Returns a lookup map that contains the names of all `ids` that exist.
    ///
    /// Ids missing from the cached map are fetched from the store, and the extended map is put
    /// back into the cache.
    async fn resolve<'a, I>(&self, lookup: Lookup, ids: I) -> anyhow::Result<Arc<NameMap>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let map = self.lookup(lookup).await?;
        let missing: FxHashSet<&str> = ids
            .into_iter()
            .filter(|id| !map.contains_key(*id))
            .collect();
        if missing.is_empty() {
            return Ok(map);
        }

        let missing: Vec<String> = missing.into_iter().map(str::to_owned).collect();
        let documents = self.store.get_many(lookup.collection(), &missing).await?;

        let mut extended = NameMap::clone(&map);
        extended.extend(lookups::name_map(&documents));
        let extended = Arc::new(extended);
        tracing::debug!(
            %lookup,
            missing = missing.len(),
            found = documents.len(),
            "Extended lookup map"
        );

        self.fetcher.set_with_ttl(
            lookup.cache_key(),
            Cached::Names(Arc::clone(&extended)),
            self.ttls.lookups,
        );
        Ok(extended)
    }

    /// The names of the given people.
    async fn people_names<'a, I>(&self, ids: I) -> anyhow::Result<NameMap>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: FxHashSet<&str> = ids.into_iter().collect();
        let ids: Vec<String> = ids.into_iter().map(str::to_owned).collect();
        let people = self.store.get_many(Collection::People, &ids).await?;
        Ok(lookups::name_map(&people))
    }

    /// The ids of all people whose name contains `competitor`.
    async fn person_ids(&self, competitor: &str) -> Result<Arc<[String]>, FetchError> {
        let key = CacheKey::builder("person_ids")
            .param("competitor", competitor)
            .build();
        let store = Arc::clone(&self.store);
        let matcher = Matcher::new(competitor);

        self.fetch(key, self.ttls.person_ids, move || async move {
            let people = store.list(Collection::People, None).await?;
            let ids: Vec<String> = people
                .into_iter()
                .filter(|person| person.name().is_some_and(|name| matcher.matches(name)))
                .map(|person| person.id)
                .collect();
            Ok(Arc::from(ids))
        })
        .await
    }

    async fn run_search(&self, filters: &SearchFilters) -> anyhow::Result<Arc<[SearchRow]>> {
        let nothing = || Ok(Arc::from(Vec::new()));
        let mut filter = ScoreFilter::new(filters);

        if let Some(names) = filters.competition_names() {
            let competitions = self.store.list(Collection::Competitions, None).await?;
            let ids = queries::ids_by_exact_name(&competitions, &names);
            if ids.is_empty() {
                tracing::debug!(?names, "No matching competitions");
                return nothing();
            }
            filter.comp_ids = Some(ids);
        }

        if let Some(judge) = &filters.judge {
            let judges = self.store.list(Collection::Judges, None).await?;
            let ids = queries::ids_by_name(&judges, judge);
            if ids.is_empty() {
                tracing::debug!(%judge, "No matching judges");
                return nothing();
            }
            filter.judge_ids = Some(ids);
        }

        let documents = self.store.list(Collection::Scores, None).await?;
        let scores: Vec<_> = queries::parse_scores(&documents)
            .into_iter()
            .filter(|score| filter.matches(score))
            .collect();
        if scores.is_empty() {
            return nothing();
        }

        let people = self
            .people_names(scores.iter().map(|score| score.people_id.as_str()))
            .await?;
        let styles = self
            .resolve(Lookup::Styles, scores.iter().map(|score| score.style_id.as_str()))
            .await?;

        let no_competitions = NameMap::default();
        let scores = queries::filter_by_names(
            scores,
            filters,
            &Names {
                people: &people,
                styles: &styles,
                competitions: &no_competitions,
            },
        );

        let competitions = self
            .resolve(Lookup::Competitions, scores.iter().map(|score| score.comp_id.as_str()))
            .await?;
        let rows = queries::search_rows(
            &scores,
            &Names {
                people: &people,
                styles: &styles,
                competitions: &competitions,
            },
        );

        tracing::debug!(scores = scores.len(), rows = rows.len(), "Search completed");
        Ok(Arc::from(rows))
    }

    async fn run_competition_history(
        &self,
        competitor: &str,
    ) -> anyhow::Result<Arc<[HistoryEntry]>> {
        let people_ids = self.person_ids(competitor).await?;
        if people_ids.is_empty() {
            return Ok(Arc::from(Vec::new()));
        }

        let filter = ScoreFilter {
            people_ids: Some(people_ids.iter().cloned().collect()),
            ..Default::default()
        };
        let documents = self.store.list(Collection::Scores, None).await?;
        let scores: Vec<_> = queries::parse_scores(&documents)
            .into_iter()
            .filter(|score| filter.matches(score))
            .collect();

        let competitions = self
            .resolve(Lookup::Competitions, scores.iter().map(|score| score.comp_id.as_str()))
            .await?;
        Ok(Arc::from(queries::competition_history(&scores, &competitions)))
    }
}
