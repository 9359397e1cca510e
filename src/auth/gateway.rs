// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication gateway.
//!
//! ## Pipeline
//!
//! ```text
//! extract token ─┬─ none ──────────────────────────────▶ NO_TOKEN
//!                └─ resolve bypass ─┬─ bypass ─────────▶ synthetic success
//!                                   └─ validate ─┬─────▶ success
//!                                                └─────▶ failure
//! ```
//!
//! Each call runs the pipeline as its own task under the handshake deadline.
//! A panic in that task, an expired deadline or a cancelled connection all
//! still produce a verdict: nothing escapes [`AuthenticationGateway::authenticate`].

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bypass;
use super::circuit::CircuitState;
use super::context::{ConnectionContext, ContextError, ExecutionContextFactory};
use super::environment::{BypassContext, EnvironmentContextResolver};
use super::error::AuthErrorCode;
use super::extractor::{BearerCredential, CredentialExtractor};
use super::identity::IdentityServiceClient;
use super::resilient::ResilientAuthenticator;
use super::verdict::{AuthenticatedIdentity, AuthenticationVerdict};
use super::Handshake;
use crate::config::{Environment, GatewayConfig};

/// Verdict plus the connection context, present only on success.
#[derive(Debug, Clone)]
pub struct AuthenticationOutcome {
    pub verdict: AuthenticationVerdict,
    pub context: Option<ConnectionContext>,
    /// Subprotocol the credential came from, to echo back on upgrade.
    pub subprotocol: Option<String>,
}

impl AuthenticationOutcome {
    fn failed(verdict: AuthenticationVerdict) -> Self {
        Self {
            verdict,
            context: None,
            subprotocol: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.verdict.is_success()
    }

    pub fn into_parts(self) -> (AuthenticationVerdict, Option<ConnectionContext>) {
        (self.verdict, self.context)
    }
}

/// Internal pipeline faults, reported to clients as `WEBSOCKET_AUTH_EXCEPTION`.
#[derive(Debug, thiserror::Error)]
pub(crate) enum GatewayError {
    #[error("authentication task panicked")]
    Panicked,

    #[error("authentication task was aborted")]
    Aborted,

    #[error("connection context construction failed: {0}")]
    Context(#[from] ContextError),

    #[error("bypass produced an empty synthetic user id")]
    EmptySyntheticUser,
}

struct GatewayInner {
    config: Arc<GatewayConfig>,
    extractor: CredentialExtractor,
    resolver: EnvironmentContextResolver,
    authenticator: ResilientAuthenticator,
    contexts: ExecutionContextFactory,
}

/// Connection authentication orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct AuthenticationGateway {
    inner: Arc<GatewayInner>,
}

impl AuthenticationGateway {
    pub fn new(config: Arc<GatewayConfig>, client: Arc<dyn IdentityServiceClient>) -> Self {
        let resolver = EnvironmentContextResolver::new(&config);
        let authenticator = ResilientAuthenticator::new(client, config.retry);
        Self {
            inner: Arc::new(GatewayInner {
                config,
                extractor: CredentialExtractor::new(),
                resolver,
                authenticator,
                contexts: ExecutionContextFactory::new(),
            }),
        }
    }

    pub fn environment(&self) -> Environment {
        self.inner.resolver.environment()
    }

    /// Identity service breaker snapshot (read-only).
    pub fn circuit_status(&self) -> CircuitState {
        self.inner.authenticator.client().circuit_status()
    }

    /// Authenticate a handshake under the configured deadline.
    pub async fn authenticate(
        &self,
        handshake: &Handshake,
        preliminary_connection_id: Option<&str>,
    ) -> AuthenticationOutcome {
        self.authenticate_with_cancel(handshake, preliminary_connection_id, &CancellationToken::new())
            .await
    }

    /// Authenticate a handshake, stopping early when `cancel` fires.
    ///
    /// Dropping the returned future also cancels the in-flight pipeline.
    pub async fn authenticate_with_cancel(
        &self,
        handshake: &Handshake,
        preliminary_connection_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> AuthenticationOutcome {
        let task_cancel = cancel.child_token();
        let _cancel_on_drop = task_cancel.clone().drop_guard();

        let gateway = self.clone();
        let handshake = handshake.clone();
        let preliminary = preliminary_connection_id.map(str::to_string);
        let pipeline_cancel = task_cancel.clone();
        let mut task = tokio::spawn(async move {
            gateway
                .run_pipeline(&handshake, preliminary.as_deref(), &pipeline_cancel)
                .await
        });

        let deadline = self.inner.config.handshake_timeout;
        let result = tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(GatewayError::Panicked),
                Err(_) => Err(GatewayError::Aborted),
            },
            _ = tokio::time::sleep(deadline) => {
                task_cancel.cancel();
                warn!(timeout_ms = deadline.as_millis() as u64, "Authentication deadline exceeded");
                return AuthenticationOutcome::failed(
                    AuthenticationVerdict::failure(
                        AuthErrorCode::AuthServiceError,
                        "Authentication timed out",
                    )
                    .with_metadata("timed_out", true)
                    .with_metadata("timeout_ms", deadline.as_millis() as u64),
                );
            }
            _ = cancel.cancelled() => {
                info!("Connection closed during authentication");
                return AuthenticationOutcome::failed(
                    AuthenticationVerdict::failure(
                        AuthErrorCode::AuthServiceError,
                        "Authentication cancelled: connection closed",
                    )
                    .with_metadata("cancelled", true),
                );
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "Authentication pipeline fault");
                AuthenticationOutcome::failed(AuthenticationVerdict::failure(
                    AuthErrorCode::WebsocketAuthException,
                    "Internal authentication error",
                ))
            }
        }
    }

    async fn run_pipeline(
        &self,
        handshake: &Handshake,
        preliminary_connection_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationOutcome, GatewayError> {
        let Some(credential) = self.inner.extractor.extract(handshake) else {
            info!("No credential in handshake");
            return Ok(AuthenticationOutcome::failed(AuthenticationVerdict::failure(
                AuthErrorCode::NoToken,
                "No authentication token provided",
            )));
        };
        debug!(
            source = credential.source().as_str(),
            token_len = credential.token().len(),
            "Credential extracted"
        );

        let verdict = match self.inner.resolver.resolve(handshake) {
            Some(bypass) => bypass_verdict(&bypass, &credential)?,
            None => {
                self.inner
                    .authenticator
                    .validate_with_cancel(credential.token(), cancel)
                    .await
            }
        }
        .with_metadata("credential_source", credential.source().as_str());

        if let Some(failure) = verdict.failure_info() {
            info!(
                error_code = %failure.code,
                source = credential.source().as_str(),
                "Authentication failed"
            );
            return Ok(AuthenticationOutcome::failed(verdict));
        }

        let context = self
            .inner
            .contexts
            .create(&verdict, preliminary_connection_id)?;
        info!(
            user_id = %context.user_id,
            connection_id = %context.connection_id,
            source = credential.source().as_str(),
            "Connection authenticated"
        );

        Ok(AuthenticationOutcome {
            verdict,
            context: Some(context),
            subprotocol: credential.subprotocol().map(str::to_string),
        })
    }
}

fn bypass_verdict(
    bypass: &BypassContext,
    credential: &BearerCredential,
) -> Result<AuthenticationVerdict, GatewayError> {
    let synthetic = bypass::synthetic_user(credential.token());
    warn!(
        environment = %bypass.environment,
        via_headers = bypass.detection_method.via_headers,
        via_environment = bypass.detection_method.via_environment,
        user_id = %synthetic.user_id,
        rule = synthetic.rule,
        "Authentication bypass granted"
    );

    let identity = AuthenticatedIdentity::new(synthetic.user_id, None, Vec::new())
        .ok_or(GatewayError::EmptySyntheticUser)?;
    Ok(AuthenticationVerdict::success(identity)
        .with_metadata("bypass", true)
        .with_metadata("environment", bypass.environment.as_str())
        .with_metadata(
            "detection_method",
            json!({
                "via_headers": bypass.detection_method.via_headers,
                "via_environment": bypass.detection_method.via_environment,
            }),
        )
        .with_metadata("bypass_reason", bypass.reason.as_str())
        .with_metadata("synthetic_user_rule", synthetic.rule))
}
