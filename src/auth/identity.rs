// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity service client.
//!
//! The identity service is the only party that can assert a token is
//! cryptographically valid. The gateway talks to it through the
//! [`IdentityServiceClient`] trait; [`HttpIdentityClient`] is the production
//! implementation.
//!
//! ## Wire contract
//!
//! `POST {base}/api/v1/auth/validate` with `{"token": "..."}` returns
//! `{valid, user_id?, email?, permissions?, iat?, exp?, error?}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::circuit::{CircuitBreaker, CircuitState};
use crate::config::IdentityServiceConfig;
use crate::error::ConfigError;

const VALIDATE_PATH: &str = "api/v1/auth/validate";
const SERVICE_ID_HEADER: &str = "X-Service-ID";
const SERVICE_SECRET_HEADER: &str = "X-Service-Secret";
/// Upstream error bodies are truncated to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Structured validation answer from the identity service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityValidation {
    pub valid: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Issued-at (Unix seconds).
    #[serde(default)]
    pub iat: Option<i64>,
    /// Expiry (Unix seconds).
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl IdentityValidation {
    pub fn accepted(user_id: impl Into<String>, email: Option<String>, permissions: Vec<String>) -> Self {
        Self {
            valid: true,
            user_id: Some(user_id.into()),
            email,
            permissions,
            ..Default::default()
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Errors raised by an identity service call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityServiceError {
    #[error("identity service unreachable: {0}")]
    Network(String),

    #[error("identity service circuit breaker is open")]
    CircuitOpen,

    #[error("identity service error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("identity service rejected the request (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    #[error("token rejected by identity service: {0}")]
    InvalidToken(String),

    #[error("unexpected identity service failure: {0}")]
    Unexpected(String),
}

/// Retry classification of an [`IdentityServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Network,
    CircuitBreaker,
    ServerError,
    ClientError,
    InvalidToken,
    Unknown,
}

impl ErrorClass {
    /// Terminal classes stop the retry loop immediately.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorClass::ClientError | ErrorClass::InvalidToken)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::CircuitBreaker => "circuit_breaker",
            ErrorClass::ServerError => "server_error",
            ErrorClass::ClientError => "client_error",
            ErrorClass::InvalidToken => "invalid_token",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl IdentityServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IdentityServiceError::Network(_) => ErrorClass::Network,
            IdentityServiceError::CircuitOpen => ErrorClass::CircuitBreaker,
            IdentityServiceError::Server { .. } => ErrorClass::ServerError,
            IdentityServiceError::Client { .. } => ErrorClass::ClientError,
            IdentityServiceError::InvalidToken(_) => ErrorClass::InvalidToken,
            IdentityServiceError::Unexpected(_) => ErrorClass::Unknown,
        }
    }
}

/// Remote identity service.
#[async_trait]
pub trait IdentityServiceClient: Send + Sync {
    /// Validate a raw token.
    async fn validate(&self, token: &str) -> Result<IdentityValidation, IdentityServiceError>;

    /// Current circuit breaker snapshot.
    fn circuit_status(&self) -> CircuitState;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

/// HTTP identity service client with a built-in circuit breaker.
///
/// One instance per process: the inner `reqwest::Client` pools connections.
pub struct HttpIdentityClient {
    endpoint: Url,
    service_id: Option<String>,
    service_secret: Option<String>,
    http: Client,
    breaker: CircuitBreaker,
}

impl HttpIdentityClient {
    pub fn new(config: &IdentityServiceConfig) -> Result<Self, ConfigError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join(VALIDATE_PATH))
            .map_err(|e| ConfigError::InvalidValue {
                name: crate::config::IDENTITY_SERVICE_URL_ENV,
                reason: e.to_string(),
            })?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout.min(Duration::from_secs(1)))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            endpoint,
            service_id: config.service_id.clone(),
            service_secret: config.service_secret.clone(),
            http,
            breaker: CircuitBreaker::new(
                config.circuit_failure_threshold,
                config.circuit_recovery_timeout,
            ),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, token: &str) -> Result<IdentityValidation, IdentityServiceError> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .json(&ValidateRequest { token });
        if let Some(id) = &self.service_id {
            request = request.header(SERVICE_ID_HEADER, id);
        }
        if let Some(secret) = &self.service_secret {
            request = request.header(SERVICE_SECRET_HEADER, secret);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<IdentityValidation>()
                .await
                .map_err(|e| IdentityServiceError::Unexpected(format!("invalid response body: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        let message = summarize_body(&body, status);
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                IdentityServiceError::InvalidToken(message)
            }
            s if s.is_client_error() => IdentityServiceError::Client {
                status: s.as_u16(),
                message,
            },
            s => IdentityServiceError::Server {
                status: s.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl IdentityServiceClient for HttpIdentityClient {
    async fn validate(&self, token: &str) -> Result<IdentityValidation, IdentityServiceError> {
        let Some(permit) = self.breaker.try_acquire() else {
            return Err(IdentityServiceError::CircuitOpen);
        };
        if permit.is_trial() {
            tracing::debug!("Identity service breaker half-open, sending trial call");
        }

        let result = self.send(token).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            // The service answered; it is healthy even if it said no.
            Err(IdentityServiceError::InvalidToken(_) | IdentityServiceError::Client { .. }) => {
                self.breaker.record_success()
            }
            Err(IdentityServiceError::CircuitOpen) => {}
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    fn circuit_status(&self) -> CircuitState {
        self.breaker.status()
    }

    fn name(&self) -> &'static str {
        "http-identity-service"
    }
}

fn map_transport_error(e: reqwest::Error) -> IdentityServiceError {
    if e.is_decode() {
        IdentityServiceError::Unexpected(e.to_string())
    } else {
        IdentityServiceError::Network(e.to_string())
    }
}

/// Prefer a JSON `error`/`detail`/`message` field, else the raw text.
fn summarize_body(body: &str, status: StatusCode) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|v| {
        ["error", "detail", "message"]
            .iter()
            .find_map(|key| v.get(key).and_then(|m| m.as_str()).map(str::to_string))
    });
    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        return status.to_string();
    }
    message.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
