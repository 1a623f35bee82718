use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Separates the operation name from its serialized parameters.
///
/// JSON output never contains this character unescaped.
const SEPARATOR: char = '\u{1f}';

/// Identifies one logical query: an operation name together with its parameters.
///
/// Two keys built from the same operation and semantically identical parameters are always
/// equal, no matter in which order the parameters were provided.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Creates a key from an operation name and a serializable parameter structure.
    ///
    /// The parameters are converted into a [`Value`] first, which stores object keys sorted,
    /// so construction order of maps and structs does not matter.
    pub fn new<P: Serialize>(operation: &str, params: P) -> Self {
        let params = serde_json::to_value(params).unwrap_or(Value::Null);
        let mut builder = Self::builder(operation);
        builder.write_value(&params);
        builder.build()
    }

    /// Creates a key from a literal, for well-known entries such as lookup tables.
    pub fn from_raw(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Creates a [`CacheKeyBuilder`] for the given operation.
    pub fn builder(operation: &str) -> CacheKeyBuilder {
        debug_assert!(
            !operation.contains(SEPARATOR),
            "operation names must not contain the key separator"
        );
        CacheKeyBuilder {
            operation: operation.replace(SEPARATOR, ""),
            params: BTreeMap::new(),
        }
    }

    /// Returns the string form of this key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key contains `pattern` as a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.0.contains(pattern)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the separator is invisible, so render it in a readable way
        f.write_str(&self.0.replace(SEPARATOR, ":"))
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::from_raw(key)
    }
}

/// A builder for [`CacheKey`]s.
///
/// Parameters are collected into a sorted map, and parameters with a `None` value are left out
/// entirely, so `{ a: 1, b: None }` produces the same key as `{ a: 1 }`.
///
/// The builder also implements [`Write`](std::fmt::Write), and everything written to it is
/// appended verbatim to the operation name. This is useful for keys that carry a free-form
/// suffix, such as the user input of an autocomplete query.
#[derive(Debug)]
pub struct CacheKeyBuilder {
    operation: String,
    params: BTreeMap<String, Value>,
}

impl CacheKeyBuilder {
    /// Adds a single named parameter.
    pub fn param<V: Serialize>(mut self, name: &str, value: V) -> Self {
        self.add_param(name, value);
        self
    }

    /// Adds a single named parameter by reference.
    pub fn add_param<V: Serialize>(&mut self, name: &str, value: V) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        if !value.is_null() {
            self.params.insert(name.to_owned(), value);
        }
    }

    fn write_value(&mut self, value: &Value) {
        match value {
            Value::Object(map) => {
                for (name, value) in map {
                    if !value.is_null() {
                        self.params.insert(name.clone(), value.clone());
                    }
                }
            }
            Value::Null => {}
            other => {
                self.params.insert(String::new(), other.clone());
            }
        }
    }

    /// Finishes the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let mut key = self.operation;
        if !self.params.is_empty() {
            key.push(SEPARATOR);
            // serializing a map of `Value`s can not fail
            let params = serde_json::to_string(&self.params).unwrap_or_default();
            key.push_str(&params);
        }
        CacheKey(key.into())
    }
}

impl Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.operation.extend(s.chars().filter(|c| *c != SEPARATOR));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_param_order_is_irrelevant() {
        let a = CacheKey::new("search", json!({ "a": 1, "b": 2 }));
        let b = CacheKey::new("search", json!({ "b": 2, "a": 1 }));
        assert_eq!(a, b);

        let a = CacheKey::builder("search").param("a", 1).param("b", 2).build();
        let b = CacheKey::builder("search").param("b", 2).param("a", 1).build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_structs_and_maps_agree() {
        #[derive(Serialize)]
        struct Params {
            b: u32,
            a: u32,
        }

        let from_struct = CacheKey::new("search", Params { b: 2, a: 1 });
        let from_builder = CacheKey::builder("search").param("a", 1).param("b", 2).build();
        assert_eq!(from_struct, from_builder);
    }

    #[test]
    fn test_missing_params_are_omitted() {
        let with_none = CacheKey::builder("search")
            .param("competitor", "Alice")
            .param("judge", None::<String>)
            .build();
        let without = CacheKey::builder("search")
            .param("competitor", "Alice")
            .build();
        assert_eq!(with_none, without);
    }

    #[test]
    fn test_different_params_differ() {
        let a = CacheKey::new("search", json!({ "a": 1 }));
        let b = CacheKey::new("search", json!({ "a": 2 }));
        let c = CacheKey::new("analytics", json!({ "a": 1 }));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_operation_can_not_collide_with_params() {
        // An operation name that looks like serialized params must not produce the same key.
        let a = CacheKey::new("x", json!({ "a": 1 }));
        let b = CacheKey::from_raw(r#"x{"a":1}"#);
        assert_ne!(a, b);
    }

    #[test]
    fn test_written_suffix() {
        let mut builder = CacheKey::builder("competitors_");
        write!(builder, "{}", "ali").unwrap();
        let key = builder.build();
        assert_eq!(key.as_str(), "competitors_ali");
        assert!(key.contains("competitors"));
    }

    #[test]
    fn test_display() {
        let key = CacheKey::builder("search").param("a", 1).build();
        assert_eq!(key.to_string(), r#"search:{"a":1}"#);
        assert_eq!(CacheKey::from_raw("judges_map").to_string(), "judges_map");
    }
}
