use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

/// A response of the API, which comes in one of two shapes.
///
/// Depending on the deployment, the payload is either returned as is, or wrapped in an object
/// whose `body` holds the payload, usually as an encoded JSON string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Direct(T),
    Wrapped { body: WrappedBody },
    Unexpected(IgnoredAny),
}

/// The `body` of a wrapped response.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WrappedBody {
    Encoded(String),
    Inline(serde_json::Value),
}

impl<T> ApiResponse<T>
where
    T: DeserializeOwned + Default,
{
    /// Unwraps the payload.
    ///
    /// Payloads of an unexpected shape are logged and replaced by `T::default()`, which is the
    /// empty list for all list endpoints.
    pub fn into_inner(self) -> T {
        let result = match self {
            Self::Direct(value) => return value,
            Self::Wrapped {
                body: WrappedBody::Encoded(body),
            } => serde_json::from_str(&body),
            Self::Wrapped {
                body: WrappedBody::Inline(body),
            } => serde_json::from_value(body),
            Self::Unexpected(_) => {
                tracing::debug!("Ignoring response of unexpected shape");
                return T::default();
            }
        };

        result.unwrap_or_else(|error| {
            tracing::debug!(%error, "Ignoring malformed response body");
            T::default()
        })
    }
}

/// An entry of the competitor and style suggestion lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named {
    pub name: String,
}
