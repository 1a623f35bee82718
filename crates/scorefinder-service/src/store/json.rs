use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use super::{Collection, DataStore, Document, StoreError};

#[derive(Debug, Default)]
struct Documents {
    documents: Vec<Document>,
    by_id: FxHashMap<String, usize>,
}

impl Documents {
    fn new(documents: Vec<Document>) -> Self {
        let by_id = documents
            .iter()
            .enumerate()
            .map(|(index, document)| (document.id.clone(), index))
            .collect();
        Self { documents, by_id }
    }
}

/// A read-only [`DataStore`] backed by JSON files.
///
/// Every collection lives in `<data_dir>/<collection>.json`, which holds an array of documents.
/// The files are read once when the store is opened. A missing file is an empty collection.
#[derive(Debug, Default)]
pub struct JsonStore {
    collections: FxHashMap<Collection, Documents>,
}

impl JsonStore {
    /// Opens the store, reading all collection files from `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let mut store = Self::default();
        for collection in Collection::ALL {
            let path = collection_path(data_dir, collection);
            let documents = match tokio::fs::read(&path).await {
                Ok(contents) => serde_json::from_slice(&contents)
                    .map_err(|source| StoreError::Malformed { collection, source })?,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(%collection, path = %path.display(), "Collection file not found");
                    Vec::new()
                }
                Err(source) => {
                    return Err(StoreError::Io {
                        collection,
                        path,
                        source,
                    });
                }
            };
            tracing::debug!(%collection, count = documents.len(), "Loaded collection");
            store.insert(collection, documents);
        }
        Ok(store)
    }

    /// Creates a store from in-memory documents.
    pub fn from_documents<I>(collections: I) -> Self
    where
        I: IntoIterator<Item = (Collection, Vec<Document>)>,
    {
        let mut store = Self::default();
        for (collection, documents) in collections {
            store.insert(collection, documents);
        }
        store
    }

    fn insert(&mut self, collection: Collection, documents: Vec<Document>) {
        self.collections
            .insert(collection, Documents::new(documents));
    }

    fn documents(&self, collection: Collection) -> Option<&Documents> {
        self.collections.get(&collection)
    }
}

fn collection_path(data_dir: &Path, collection: Collection) -> PathBuf {
    data_dir.join(format!("{collection}.json"))
}

#[async_trait::async_trait]
impl DataStore for JsonStore {
    async fn list(
        &self,
        collection: Collection,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let Some(documents) = self.documents(collection) else {
            return Ok(Vec::new());
        };
        let limit = limit.unwrap_or(usize::MAX);
        Ok(documents.documents.iter().take(limit).cloned().collect())
    }

    async fn get_many(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<Document>, StoreError> {
        let Some(documents) = self.documents(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| documents.by_id.get(id))
            .map(|&index| documents.documents[index].clone())
            .collect())
    }
}
