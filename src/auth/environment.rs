// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test/bypass context detection.
//!
//! A handshake may skip identity service validation only in a non-production
//! environment and only when a handshake header or an environment flag asks
//! for it. The production determination is made once, from configuration,
//! when the resolver is built; [`EnvironmentContextResolver::resolve`] checks
//! it before looking at any other signal.

use serde::Serialize;

use super::Handshake;
use crate::config::{BypassSignals, Environment, GatewayConfig};

/// Handshake headers that request a test context. Any non-empty value counts.
pub const BYPASS_HEADERS: [&str; 3] = ["x-e2e-test", "x-test-mode", "x-staging-test"];

/// Which kinds of signal matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectionMethod {
    pub via_headers: bool,
    pub via_environment: bool,
}

/// An active non-production bypass decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassContext {
    pub is_bypass: bool,
    pub environment: Environment,
    pub detection_method: DetectionMethod,
    pub reason: String,
}

/// Resolves whether a handshake runs in an authorized test/bypass context.
#[derive(Debug, Clone)]
pub struct EnvironmentContextResolver {
    environment: Environment,
    is_production: bool,
    signals: BypassSignals,
}

impl EnvironmentContextResolver {
    pub fn new(config: &GatewayConfig) -> Self {
        let environment = config.environment;
        Self {
            environment,
            is_production: environment.is_production(),
            signals: config.bypass,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Returns a bypass context only for a non-production environment with
    /// at least one matching signal.
    pub fn resolve(&self, handshake: &Handshake) -> Option<BypassContext> {
        if self.is_production {
            tracing::debug!("Production environment, bypass signals ignored");
            return None;
        }
        if self.signals.disabled {
            return None;
        }

        let matched_headers: Vec<&str> = BYPASS_HEADERS
            .iter()
            .copied()
            .filter(|name| {
                handshake
                    .header(name)
                    .map(|value| !value.trim().is_empty())
                    .unwrap_or(false)
            })
            .collect();
        let matched_env = self.signals.active();

        if matched_headers.is_empty() && matched_env.is_empty() {
            return None;
        }

        let mut reasons = Vec::new();
        if !matched_headers.is_empty() {
            reasons.push(format!("headers: {}", matched_headers.join(", ")));
        }
        if !matched_env.is_empty() {
            reasons.push(format!("environment: {}", matched_env.join(", ")));
        }

        Some(BypassContext {
            is_bypass: true,
            environment: self.environment,
            detection_method: DetectionMethod {
                via_headers: !matched_headers.is_empty(),
                via_environment: !matched_env.is_empty(),
            },
            reason: reasons.join("; "),
        })
    }
}
