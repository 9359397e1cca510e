// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Connection authentication for the chat platform's WebSocket and REST
//! surfaces. Downstream handlers trust the verdict produced here and never
//! re-validate the token.
//!
//! ## Auth Flow
//!
//! 1. The client presents a token in `Authorization: Bearer`, a
//!    `Sec-WebSocket-Protocol` entry, or (test clients) `?token=`
//! 2. [`AuthenticationGateway`]:
//!    - Extracts the token ([`CredentialExtractor`])
//!    - Checks for an authorized non-production bypass
//!      ([`EnvironmentContextResolver`])
//!    - Otherwise validates against the identity service with retry and
//!      backoff ([`ResilientAuthenticator`])
//! 3. On success a per-connection [`ConnectionContext`] is built
//!    ([`ExecutionContextFactory`]), keeping any preliminary connection id
//!
//! ## Security
//!
//! - Bypass is impossible in production, whatever the client sends
//! - Tokens are never logged
//! - Client-facing failures carry only an [`AuthErrorCode`] and a message

pub mod bypass;
pub mod circuit;
pub mod context;
pub mod environment;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod handshake;
pub mod identity;
pub mod resilient;
pub mod verdict;

#[cfg(test)]
pub(crate) mod testing;

pub use circuit::CircuitState;
pub use context::{ConnectionContext, ContextError, ExecutionContextFactory};
pub use environment::{BypassContext, DetectionMethod, EnvironmentContextResolver};
pub use error::{AuthErrorCode, AuthFailureBody};
pub use extractor::{BearerCredential, CredentialExtractor, CredentialSource};
pub use gateway::{AuthenticationGateway, AuthenticationOutcome};
pub use handshake::Handshake;
pub use identity::{
    ErrorClass, HttpIdentityClient, IdentityServiceClient, IdentityServiceError, IdentityValidation,
};
pub use resilient::ResilientAuthenticator;
pub use verdict::{AuthenticatedIdentity, AuthenticationVerdict};
