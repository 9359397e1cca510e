// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Canonical authentication verdict.
//!
//! A verdict is either a success carrying a non-empty user id or a failure
//! carrying an [`AuthErrorCode`]; the sum type makes any other combination
//! unrepresentable. It serializes to the flat wire shape
//! `{success, user_id, email, permissions, error_code, error_message,
//! metadata, validated_at}` for server-side logging, and
//! [`AuthenticationVerdict::client_payload`] yields the terse failure body
//! that is safe to send to the client.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::{AuthErrorCode, AuthFailureBody};

/// Identity asserted by a successful verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    user_id: String,
    email: Option<String>,
    permissions: Vec<String>,
}

impl AuthenticatedIdentity {
    /// Returns `None` when `user_id` is empty.
    pub fn new(
        user_id: impl Into<String>,
        email: Option<String>,
        permissions: Vec<String>,
    ) -> Option<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return None;
        }
        Some(Self {
            user_id,
            email,
            permissions,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub code: AuthErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Success(AuthenticatedIdentity),
    Failure(AuthFailure),
}

/// Outcome of one connection authentication attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationVerdict {
    outcome: Verdict,
    metadata: Map<String, Value>,
    validated_at: DateTime<Utc>,
}

impl AuthenticationVerdict {
    pub fn success(identity: AuthenticatedIdentity) -> Self {
        Self {
            outcome: Verdict::Success(identity),
            metadata: Map::new(),
            validated_at: Utc::now(),
        }
    }

    pub fn failure(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            outcome: Verdict::Failure(AuthFailure {
                code,
                message: message.into(),
            }),
            metadata: Map::new(),
            validated_at: Utc::now(),
        }
    }

    /// Attach a metadata entry while the verdict is being built.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Verdict::Success(_))
    }

    pub fn identity(&self) -> Option<&AuthenticatedIdentity> {
        match &self.outcome {
            Verdict::Success(identity) => Some(identity),
            Verdict::Failure(_) => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity().map(AuthenticatedIdentity::user_id)
    }

    pub fn email(&self) -> Option<&str> {
        self.identity().and_then(AuthenticatedIdentity::email)
    }

    pub fn permissions(&self) -> &[String] {
        self.identity()
            .map(AuthenticatedIdentity::permissions)
            .unwrap_or(&[])
    }

    pub fn failure_info(&self) -> Option<&AuthFailure> {
        match &self.outcome {
            Verdict::Failure(failure) => Some(failure),
            Verdict::Success(_) => None,
        }
    }

    pub fn error_code(&self) -> Option<AuthErrorCode> {
        self.failure_info().map(|f| f.code)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.failure_info().map(|f| f.message.as_str())
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn validated_at(&self) -> DateTime<Utc> {
        self.validated_at
    }

    /// Client-facing body for a failure; metadata is never included.
    pub fn client_payload(&self) -> Option<AuthFailureBody> {
        self.failure_info()
            .map(|f| f.code.into_body(f.message.clone()))
    }
}

#[derive(Serialize)]
struct VerdictWire<'a> {
    success: bool,
    user_id: Option<&'a str>,
    email: Option<&'a str>,
    permissions: &'a [String],
    error_code: Option<AuthErrorCode>,
    error_message: Option<&'a str>,
    metadata: &'a Map<String, Value>,
    validated_at: DateTime<Utc>,
}

impl Serialize for AuthenticationVerdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VerdictWire {
            success: self.is_success(),
            user_id: self.user_id(),
            email: self.email(),
            permissions: self.permissions(),
            error_code: self.error_code(),
            error_message: self.error_message(),
            metadata: &self.metadata,
            validated_at: self.validated_at,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AuthenticatedIdentity {
        AuthenticatedIdentity::new(
            "user_1",
            Some("u1@example.com".to_string()),
            vec!["chat:write".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn empty_user_id_is_rejected() {
        assert!(AuthenticatedIdentity::new("", None, vec![]).is_none());
        assert!(AuthenticatedIdentity::new("   ", None, vec![]).is_none());
    }

    #[test]
    fn success_has_no_error_fields() {
        let verdict = AuthenticationVerdict::success(identity());
        assert!(verdict.is_success());
        assert_eq!(verdict.user_id(), Some("user_1"));
        assert_eq!(verdict.error_code(), None);
        assert_eq!(verdict.error_message(), None);
        assert!(verdict.client_payload().is_none());
    }

    #[test]
    fn failure_has_no_identity_fields() {
        let verdict = AuthenticationVerdict::failure(AuthErrorCode::NoToken, "missing");
        assert!(!verdict.is_success());
        assert_eq!(verdict.user_id(), None);
        assert_eq!(verdict.email(), None);
        assert!(verdict.permissions().is_empty());
        assert_eq!(verdict.error_code(), Some(AuthErrorCode::NoToken));
    }

    #[test]
    fn serializes_flat_wire_shape() {
        let verdict = AuthenticationVerdict::success(identity()).with_metadata("attempts_made", 2);
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["user_id"], "user_1");
        assert_eq!(json["email"], "u1@example.com");
        assert_eq!(json["permissions"][0], "chat:write");
        assert!(json["error_code"].is_null());
        assert_eq!(json["metadata"]["attempts_made"], 2);
        assert!(json["validated_at"].is_string());
    }

    #[test]
    fn client_payload_omits_metadata() {
        let verdict = AuthenticationVerdict::failure(AuthErrorCode::AuthServiceError, "down")
            .with_metadata("circuit_state", "open");
        let payload = serde_json::to_value(verdict.client_payload().unwrap()).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "success": false,
                "error_code": "AUTH_SERVICE_ERROR",
                "message": "down"
            })
        );
    }
}
