// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-connection execution context.
//!
//! Built once from a successful verdict and owned by the connection for its
//! lifetime. A preliminary connection id issued before authentication is
//! reused verbatim so state keyed on it stays valid; every other identifier
//! is generated here and never taken from client input.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::verdict::{AuthenticatedIdentity, AuthenticationVerdict};

/// Longest preliminary connection id accepted for reuse.
pub const MAX_CONNECTION_ID_LEN: usize = 128;

/// Isolated per-connection identity and correlation ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionContext {
    pub user_id: String,
    pub connection_id: String,
    pub thread_id: String,
    pub run_id: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub agent_context: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// Called with a failed verdict. This is a caller bug.
    #[error("connection context requires a successful verdict with a user id")]
    NotAuthenticated,

    #[error("invalid connection id: {0}")]
    InvalidConnectionId(String),

    #[error("invalid user id: {0}")]
    InvalidUserId(String),
}

/// Builds [`ConnectionContext`]s from successful verdicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionContextFactory;

impl ExecutionContextFactory {
    pub fn new() -> Self {
        Self
    }

    /// Build the context for an authenticated connection.
    ///
    /// If the full construction fails, one minimal construction with only
    /// the user id is attempted before the error is returned. The minimal
    /// context still reuses the preliminary id when that id is valid.
    pub fn create(
        &self,
        verdict: &AuthenticationVerdict,
        preliminary_connection_id: Option<&str>,
    ) -> Result<ConnectionContext, ContextError> {
        let identity = verdict.identity().ok_or(ContextError::NotAuthenticated)?;
        let preliminary = preliminary_connection_id.filter(|id| !id.trim().is_empty());

        match build_full(identity, verdict, preliminary) {
            Ok(context) => Ok(context),
            Err(err) => {
                warn!(
                    user_id = %identity.user_id(),
                    error = %err,
                    "Full connection context construction failed, using minimal context"
                );
                let reusable = preliminary.filter(|id| check_connection_id(id).is_ok());
                build_minimal(identity.user_id(), reusable).map_err(|fallback_err| {
                    warn!(error = %fallback_err, "Minimal connection context construction failed");
                    err
                })
            }
        }
    }
}

fn build_full(
    identity: &AuthenticatedIdentity,
    verdict: &AuthenticationVerdict,
    preliminary: Option<&str>,
) -> Result<ConnectionContext, ContextError> {
    let connection_id = match preliminary {
        Some(id) => {
            check_connection_id(id).map_err(ContextError::InvalidConnectionId)?;
            debug!(connection_id = %id, "Reusing preliminary connection id");
            id.to_string()
        }
        None => new_connection_id(),
    };

    let mut agent_context = Map::new();
    agent_context.insert("user_id".into(), identity.user_id().into());
    agent_context.insert("email".into(), identity.email().into());
    agent_context.insert("permissions".into(), identity.permissions().into());
    agent_context.insert(
        "bypass".into(),
        verdict
            .metadata()
            .get("bypass")
            .cloned()
            .unwrap_or(Value::Bool(false)),
    );
    if let Some(exp) = verdict.metadata().get("token_expires_at") {
        agent_context.insert("token_expires_at".into(), exp.clone());
    }

    Ok(ConnectionContext {
        user_id: identity.user_id().to_string(),
        connection_id,
        thread_id: prefixed_id("thread"),
        run_id: prefixed_id("run"),
        request_id: prefixed_id("req"),
        created_at: Utc::now(),
        agent_context,
    })
}

fn build_minimal(
    user_id: &str,
    connection_id: Option<&str>,
) -> Result<ConnectionContext, ContextError> {
    if user_id.trim().is_empty() {
        return Err(ContextError::InvalidUserId("empty".to_string()));
    }
    Ok(ConnectionContext {
        user_id: user_id.to_string(),
        connection_id: connection_id.map_or_else(new_connection_id, str::to_string),
        thread_id: prefixed_id("thread"),
        run_id: prefixed_id("run"),
        request_id: prefixed_id("req"),
        created_at: Utc::now(),
        agent_context: Map::new(),
    })
}

fn check_connection_id(id: &str) -> Result<(), String> {
    if id.len() > MAX_CONNECTION_ID_LEN {
        return Err(format!("longer than {MAX_CONNECTION_ID_LEN} bytes"));
    }
    if id.chars().any(char::is_control) {
        return Err("contains control characters".to_string());
    }
    Ok(())
}

/// `conn_<unix millis>_<12 hex>`.
fn new_connection_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("conn_{}_{}", Utc::now().timestamp_millis(), &random[..12])
}

fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}
