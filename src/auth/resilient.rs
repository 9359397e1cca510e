// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Retrying token validation against the identity service.
//!
//! ## Strategy
//!
//! 1. Structurally malformed tokens fail with `INVALID_FORMAT` and never
//!    reach the network.
//! 2. Each attempt first reads the breaker status for telemetry, then calls
//!    the identity service. An open breaker is logged, not enforced here.
//! 3. Errors are classified; `client_error` and `invalid_token` stop the
//!    loop, everything else is retried after
//!    `min(base_delay * 2^attempt, max_delay)` until the budget runs out.
//! 4. Backoff sleeps and in-flight calls are raced against a
//!    `CancellationToken` so a closed connection stops retrying at once.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::circuit::CircuitState;
use super::error::AuthErrorCode;
use super::identity::{ErrorClass, IdentityServiceClient, IdentityServiceError, IdentityValidation};
use super::verdict::{AuthenticatedIdentity, AuthenticationVerdict};
use crate::config::RetryPolicy;

/// Identity service validation with retry, backoff and breaker telemetry.
#[derive(Clone)]
pub struct ResilientAuthenticator {
    client: Arc<dyn IdentityServiceClient>,
    policy: RetryPolicy,
}

impl ResilientAuthenticator {
    pub fn new(client: Arc<dyn IdentityServiceClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &Arc<dyn IdentityServiceClient> {
        &self.client
    }

    /// Validate a token. Always returns a verdict.
    pub async fn validate(&self, token: &str) -> AuthenticationVerdict {
        self.validate_with_cancel(token, &CancellationToken::new())
            .await
    }

    /// Validate a token, giving up as soon as `cancel` fires.
    pub async fn validate_with_cancel(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> AuthenticationVerdict {
        if let Err(reason) = check_token_format(token) {
            debug!(reason = %reason, "Rejecting malformed token");
            return AuthenticationVerdict::failure(AuthErrorCode::InvalidFormat, reason)
                .with_metadata("attempts_made", 0);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts_made = 0;
        let mut last_error: Option<IdentityServiceError> = None;
        let mut circuit = CircuitState::closed();

        for attempt in 0..max_attempts {
            circuit = self.client.circuit_status();
            if circuit.open {
                warn!(
                    service = self.client.name(),
                    attempt = attempt + 1,
                    failure_count = circuit.failure_count,
                    "Identity service circuit breaker is open"
                );
            }

            attempts_made = attempt + 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(attempt),
                result = self.client.validate(token) => result,
            };

            match result {
                Ok(validation) => return verdict_from_validation(validation, attempts_made),
                Err(err) => {
                    let class = err.class();
                    warn!(
                        service = self.client.name(),
                        attempt = attempts_made,
                        max_attempts,
                        class = class.as_str(),
                        circuit_state = circuit.state_name,
                        error = %err,
                        "Identity service call failed"
                    );
                    if class.is_terminal() {
                        return terminal_failure(&err, class, attempts_made, circuit);
                    }
                    last_error = Some(err);
                }
            }

            if attempts_made < max_attempts {
                let delay = self.policy.delay_for(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return cancelled(attempts_made),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let last_class = last_error
            .as_ref()
            .map(IdentityServiceError::class)
            .unwrap_or(ErrorClass::Unknown);
        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no response".to_string());

        AuthenticationVerdict::failure(
            AuthErrorCode::AuthServiceError,
            format!("Authentication service unavailable after {attempts_made} attempts: {detail}"),
        )
        .with_metadata("attempts_made", attempts_made)
        .with_metadata("error_class", last_class.as_str())
        .with_metadata("circuit_state", circuit_json(circuit))
    }
}

/// Structural token check. Dot-free tokens are treated as opaque; anything
/// containing a `.` must be a three-segment JWT.
pub fn check_token_format(token: &str) -> Result<(), String> {
    if token.trim().is_empty() {
        return Err("Token is empty".to_string());
    }
    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Token contains whitespace or control characters".to_string());
    }
    if token.contains('.') {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(format!(
                "Malformed JWT: expected 3 segments, found {}",
                segments.len()
            ));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err("Malformed JWT: empty segment".to_string());
        }
    }
    Ok(())
}

fn verdict_from_validation(validation: IdentityValidation, attempts_made: u32) -> AuthenticationVerdict {
    if !validation.valid {
        let reason = validation
            .error
            .unwrap_or_else(|| "token rejected".to_string());
        return AuthenticationVerdict::failure(
            AuthErrorCode::ValidationFailed,
            format!("Token validation failed: {reason}"),
        )
        .with_metadata("attempts_made", attempts_made);
    }

    let identity = validation.user_id.and_then(|user_id| {
        AuthenticatedIdentity::new(user_id, validation.email, validation.permissions)
    });
    match identity {
        Some(identity) => AuthenticationVerdict::success(identity)
            .with_metadata("attempts_made", attempts_made)
            .with_metadata("token_issued_at", validation.iat)
            .with_metadata("token_expires_at", validation.exp),
        None => AuthenticationVerdict::failure(
            AuthErrorCode::ValidationFailed,
            "Token validation failed: identity service returned no user id",
        )
        .with_metadata("attempts_made", attempts_made),
    }
}

fn terminal_failure(
    err: &IdentityServiceError,
    class: ErrorClass,
    attempts_made: u32,
    circuit: CircuitState,
) -> AuthenticationVerdict {
    let (code, message) = match err {
        IdentityServiceError::InvalidToken(reason) => (
            AuthErrorCode::ValidationFailed,
            format!("Token validation failed: {reason}"),
        ),
        other => (
            AuthErrorCode::AuthServiceError,
            format!("Authentication service rejected the request: {other}"),
        ),
    };
    AuthenticationVerdict::failure(code, message)
        .with_metadata("attempts_made", attempts_made)
        .with_metadata("error_class", class.as_str())
        .with_metadata("circuit_state", circuit_json(circuit))
}

fn cancelled(attempts_made: u32) -> AuthenticationVerdict {
    AuthenticationVerdict::failure(
        AuthErrorCode::AuthServiceError,
        "Authentication cancelled before the identity service answered",
    )
    .with_metadata("attempts_made", attempts_made)
    .with_metadata("cancelled", true)
}

fn circuit_json(circuit: CircuitState) -> Value {
    json!({
        "open": circuit.open,
        "failure_count": circuit.failure_count,
        "state_name": circuit.state_name,
    })
}
