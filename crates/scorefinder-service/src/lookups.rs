//! Id to name maps of the small reference collections.
//!
//! Scores only reference judges, styles and competitions by id. Resolving those ids is needed by
//! almost every search, so the maps are kept in the shared cache under well-known keys and
//! loaded ahead of time when the server starts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use scorefinder_cache::{CacheKey, WarmEntry};

use crate::service::Cached;
use crate::store::{Collection, DataStore, Document};

/// Maps document ids to names.
pub type NameMap = FxHashMap<String, String>;

/// One of the cached id to name maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Judges,
    Styles,
    Competitions,
}

impl Lookup {
    pub const ALL: [Lookup; 3] = [Lookup::Judges, Lookup::Styles, Lookup::Competitions];

    /// The collection holding the named documents.
    pub fn collection(self) -> Collection {
        match self {
            Lookup::Judges => Collection::Judges,
            Lookup::Styles => Collection::Styles,
            Lookup::Competitions => Collection::Competitions,
        }
    }

    /// The well-known cache key of the map.
    pub fn cache_key(self) -> CacheKey {
        CacheKey::from_raw(match self {
            Lookup::Judges => "judges_map",
            Lookup::Styles => "styles_map",
            Lookup::Competitions => "comps_map",
        })
    }

    /// How many documents are loaded into the initial map.
    ///
    /// Ids beyond this limit are resolved on demand.
    pub fn initial_size(self) -> usize {
        match self {
            Lookup::Judges => 100,
            Lookup::Styles | Lookup::Competitions => 50,
        }
    }

    /// Loads the initial map from `store`.
    pub async fn load(self, store: &dyn DataStore) -> anyhow::Result<NameMap> {
        let documents = store
            .list(self.collection(), Some(self.initial_size()))
            .await?;
        Ok(name_map(&documents))
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cache_key(), f)
    }
}

/// Builds a [`NameMap`] from documents, skipping documents without a name.
pub fn name_map<'a>(documents: impl IntoIterator<Item = &'a Document>) -> NameMap {
    documents
        .into_iter()
        .filter_map(|document| Some((document.id.clone(), document.name()?.to_owned())))
        .collect()
}

/// The entries that preload all lookup maps into the cache for `ttl`.
pub fn warm_entries(store: &Arc<dyn DataStore>, ttl: Duration) -> Vec<WarmEntry<Cached>> {
    Lookup::ALL
        .into_iter()
        .map(|lookup| {
            let store = Arc::clone(store);
            WarmEntry::new(lookup.cache_key(), ttl, async move {
                let map = lookup.load(&*store).await?;
                Ok(Cached::Names(Arc::new(map)))
            })
        })
        .collect()
}
