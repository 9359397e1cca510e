// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scripted identity service for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::circuit::CircuitState;
use super::identity::{IdentityServiceClient, IdentityServiceError, IdentityValidation};

type Reply = Result<IdentityValidation, IdentityServiceError>;

/// Replays queued replies in order, then repeats `fallback` forever.
pub struct ScriptedIdentityClient {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    circuit: Mutex<CircuitState>,
    latency: Duration,
}

impl ScriptedIdentityClient {
    pub fn new(fallback: Reply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            circuit: Mutex::new(CircuitState::closed()),
            latency: Duration::ZERO,
        }
    }

    /// Always accepts as `user_id`.
    pub fn accepting(user_id: &str) -> Self {
        Self::new(Ok(IdentityValidation {
            iat: Some(1_700_000_000),
            exp: Some(1_700_003_600),
            ..IdentityValidation::accepted(
                user_id,
                Some(format!("{user_id}@example.com")),
                vec!["chat:read".to_string(), "chat:write".to_string()],
            )
        }))
    }

    pub fn then(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_circuit(self, state: CircuitState) -> Self {
        *self.circuit.lock().unwrap() = state;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityServiceClient for ScriptedIdentityClient {
    async fn validate(&self, _token: &str) -> Result<IdentityValidation, IdentityServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    fn circuit_status(&self) -> CircuitState {
        *self.circuit.lock().unwrap()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Accepts any token as user `user_<token>`.
pub struct EchoIdentityClient;

#[async_trait]
impl IdentityServiceClient for EchoIdentityClient {
    async fn validate(&self, token: &str) -> Result<IdentityValidation, IdentityServiceError> {
        Ok(IdentityValidation::accepted(format!("user_{token}"), None, Vec::new()))
    }

    fn circuit_status(&self) -> CircuitState {
        CircuitState::closed()
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Panics on every call.
pub struct PanickingIdentityClient;

#[async_trait]
impl IdentityServiceClient for PanickingIdentityClient {
    async fn validate(&self, _token: &str) -> Result<IdentityValidation, IdentityServiceError> {
        panic!("identity client exploded")
    }

    fn circuit_status(&self) -> CircuitState {
        CircuitState::closed()
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}
