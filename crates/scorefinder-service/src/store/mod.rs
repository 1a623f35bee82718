//! Access to the document collections the queries run against.
//!
//! The service only ever reads whole collections, optionally limited, or a batch of documents
//! by id. The [`DataStore`] trait captures exactly that, and [`JsonStore`] implements it on top
//! of one JSON file per collection.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

mod json;

pub use json::JsonStore;

/// The collections of the score database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    People,
    Competitions,
    Scores,
    Styles,
    Judges,
}

impl Collection {
    /// All collections, in no particular order.
    pub const ALL: [Collection; 5] = [
        Collection::People,
        Collection::Competitions,
        Collection::Scores,
        Collection::Styles,
        Collection::Judges,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::People => "people",
            Collection::Competitions => "competitions",
            Collection::Scores => "scores",
            Collection::Styles => "styles",
            Collection::Judges => "judges",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single document of a [`Collection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Returns a string field, `None` if it is missing or not a string.
    pub fn str(&self, field: &str) -> Option<&str> {
        self.fields.get(field)?.as_str()
    }

    /// Returns an integer field.
    ///
    /// Integers that were stored as strings are accepted as well.
    pub fn int(&self, field: &str) -> Option<i64> {
        match self.fields.get(field)? {
            Value::Number(number) => number.as_i64(),
            Value::String(string) => string.trim().parse().ok(),
            _ => None,
        }
    }

    /// The `name` field, which every collection apart from scores carries.
    pub fn name(&self) -> Option<&str> {
        self.str("name")
    }
}

/// An error reading from a [`DataStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read collection {collection} from {path}")]
    Io {
        collection: Collection,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("collection {collection} is malformed")]
    Malformed {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },
    #[error("the data store is unavailable")]
    Unavailable,
}

/// Read access to the document collections.
#[async_trait::async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// Lists the documents of `collection` in storage order, at most `limit` of them.
    async fn list(
        &self,
        collection: Collection,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Looks up documents by id.
    ///
    /// Unknown ids are skipped, so the result may be shorter than `ids`.
    async fn get_many(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<Document>, StoreError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_document_fields() {
        let document: Document = serde_json::from_value(json!({
            "id": "s1",
            "people_id": "p1",
            "score": 3,
            "overall_score": "2",
            "name": 12,
        }))
        .unwrap();

        assert_eq!(document.id, "s1");
        assert_eq!(document.str("people_id"), Some("p1"));
        assert_eq!(document.int("score"), Some(3));
        assert_eq!(document.int("overall_score"), Some(2));
        assert_eq!(document.name(), None);
        assert_eq!(document.int("missing"), None);
    }

    #[test]
    fn test_collection_names() {
        for collection in Collection::ALL {
            let serialized = serde_json::to_value(collection).unwrap();
            assert_eq!(serialized, collection.as_str());
        }
    }
}
