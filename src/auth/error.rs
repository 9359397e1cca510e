// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication error codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Closed set of authentication failure codes sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    /// No credential found in the handshake
    NoToken,
    /// Credential is structurally malformed
    InvalidFormat,
    /// Identity service explicitly rejected the credential
    ValidationFailed,
    /// Identity service unreachable or erroring after retries
    AuthServiceError,
    /// Unanticipated internal fault in the gateway
    WebsocketAuthException,
}

/// Failure body sent to the client before the connection closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthFailureBody {
    pub success: bool,
    pub error_code: AuthErrorCode,
    pub message: String,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::NoToken => "NO_TOKEN",
            AuthErrorCode::InvalidFormat => "INVALID_FORMAT",
            AuthErrorCode::ValidationFailed => "VALIDATION_FAILED",
            AuthErrorCode::AuthServiceError => "AUTH_SERVICE_ERROR",
            AuthErrorCode::WebsocketAuthException => "WEBSOCKET_AUTH_EXCEPTION",
        }
    }

    /// HTTP status for REST responses.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthErrorCode::NoToken
            | AuthErrorCode::InvalidFormat
            | AuthErrorCode::ValidationFailed => StatusCode::UNAUTHORIZED,
            AuthErrorCode::AuthServiceError => StatusCode::SERVICE_UNAVAILABLE,
            AuthErrorCode::WebsocketAuthException => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_body(self, message: impl Into<String>) -> AuthFailureBody {
        AuthFailureBody {
            success: false,
            error_code: self,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IntoResponse for AuthFailureBody {
    fn into_response(self) -> Response {
        let status = self.error_code.status_code();
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn codes_serialize_as_wire_strings() {
        for code in [
            AuthErrorCode::NoToken,
            AuthErrorCode::InvalidFormat,
            AuthErrorCode::ValidationFailed,
            AuthErrorCode::AuthServiceError,
            AuthErrorCode::WebsocketAuthException,
        ] {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, code.as_str());
        }
    }

    #[tokio::test]
    async fn no_token_returns_401_with_body() {
        let response = AuthErrorCode::NoToken
            .into_body("No authentication token provided")
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "NO_TOKEN");
        assert_eq!(body["message"], "No authentication token provided");
    }

    #[tokio::test]
    async fn service_error_returns_503() {
        let response = AuthErrorCode::AuthServiceError.into_body("down").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
