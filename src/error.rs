// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("TLS_CERT_PATH and TLS_KEY_PATH must be set together")]
    IncompleteTls,

    #[error("failed to build identity service client: {0}")]
    HttpClient(String),
}

/// Error returned by non-authentication HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_message() {
        let missing = ApiError::not_found("gone");
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(missing.message, "gone");
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::new(StatusCode::BAD_REQUEST, "bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data"}"#);
    }

    #[test]
    fn config_error_messages_name_the_variable() {
        let err = ConfigError::InvalidValue {
            name: "PORT",
            reason: "invalid digit".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value for PORT: invalid digit");
    }
}
