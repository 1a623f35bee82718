use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

/// An error returned by a handler.
///
/// Clients only ever see the generic `message`, the underlying error is logged and, for server
/// errors, reported to Sentry.
#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    message: &'static str,
    err: anyhow::Error,
}

impl ResponseError {
    pub fn new(status: StatusCode, message: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            message,
            err: err.into(),
        }
    }

    pub fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, anyhow::anyhow!(message))
    }
}

/// Converts handler errors into a [`ResponseError`] with a generic message.
pub trait ResponseContext<T> {
    /// Turns an error into an internal server error that responds with `message`.
    fn or_respond(self, message: &'static str) -> Result<T, ResponseError>;
}

impl<T, E> ResponseContext<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn or_respond(self, message: &'static str) -> Result<T, ResponseError> {
        self.map_err(|err| ResponseError::new(StatusCode::INTERNAL_SERVER_ERROR, message, err))
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        tracing::warn!(
            status = self.status.as_u16(),
            error = &*self.err as &dyn std::error::Error,
            "{}",
            self.message
        );
        if self.status.is_server_error() {
            capture_anyhow(&self.err);
        }

        let body = ApiErrorResponse {
            error: self.message.to_owned(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// The JSON body of an error response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ApiErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generic_message() {
        let result: Result<(), _> = Err(anyhow::anyhow!("connection refused"));
        let response = result
            .or_respond("Failed to fetch competitors")
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ApiErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "Failed to fetch competitors");
    }

    #[test]
    fn test_bad_request() {
        let response = ResponseError::bad_request("score must be a number").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
