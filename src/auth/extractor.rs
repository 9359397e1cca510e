// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer credential extraction from a connection handshake.
//!
//! Sources are tried in order and the first non-empty token wins:
//!
//! 1. `Authorization: Bearer <token>`
//! 2. `Sec-WebSocket-Protocol` entries `jwt.<b64url>`, `jwt-auth.<b64url>`
//!    or `bearer.<b64url>` (browsers cannot set headers on a WebSocket)
//! 3. `?token=<token>` query parameter, for non-browser test clients
//!
//! A subprotocol entry that fails to decode yields no token and extraction
//! moves on; it never turns into a handshake error.

use std::fmt;

use axum::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::Serialize;

use super::Handshake;

/// Subprotocol prefixes that carry a base64url-encoded token.
const SUBPROTOCOL_PREFIXES: [&str; 3] = ["jwt.", "jwt-auth.", "bearer."];

/// Query parameter used as the last-resort token source.
const TOKEN_QUERY_PARAM: &str = "token";

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Header,
    Subprotocol,
    Query,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Header => "header",
            CredentialSource::Subprotocol => "subprotocol",
            CredentialSource::Query => "query",
        }
    }
}

/// A raw bearer token and the handshake source it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerCredential {
    token: String,
    source: CredentialSource,
    subprotocol: Option<String>,
}

impl BearerCredential {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// The subprotocol entry that carried the token, for echoing back in the
    /// handshake response.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredential")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("source", &self.source)
            .field("subprotocol", &self.subprotocol.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Stateless credential extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialExtractor;

impl CredentialExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the first non-empty credential from the handshake.
    pub fn extract(&self, handshake: &Handshake) -> Option<BearerCredential> {
        from_authorization_header(handshake)
            .or_else(|| from_subprotocols(handshake))
            .or_else(|| from_query(handshake))
    }
}

fn from_authorization_header(handshake: &Handshake) -> Option<BearerCredential> {
    let value = handshake.header(AUTHORIZATION.as_str())?.trim();
    // RFC 6750: the auth-scheme is case-insensitive.
    let (scheme, rest) = value.split_at_checked(6)?;
    if !scheme.eq_ignore_ascii_case("bearer") || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        return None;
    }
    Some(BearerCredential {
        token: token.to_string(),
        source: CredentialSource::Header,
        subprotocol: None,
    })
}

fn from_subprotocols(handshake: &Handshake) -> Option<BearerCredential> {
    handshake
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .find_map(|entry| {
            let token = decode_subprotocol_entry(entry)?;
            Some(BearerCredential {
                token,
                source: CredentialSource::Subprotocol,
                subprotocol: Some(entry.to_string()),
            })
        })
}

/// Decode one `prefix.<b64url>` subprotocol entry into its token.
pub(crate) fn decode_subprotocol_entry(entry: &str) -> Option<String> {
    let payload = SUBPROTOCOL_PREFIXES
        .iter()
        .find_map(|prefix| entry.strip_prefix(prefix))?;
    let payload = payload.trim_end_matches('=');
    if payload.is_empty() {
        return None;
    }
    let bytes = Base64UrlUnpadded::decode_vec(payload).ok()?;
    let token = String::from_utf8(bytes).ok()?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn from_query(handshake: &Handshake) -> Option<BearerCredential> {
    let token = handshake.query_param(TOKEN_QUERY_PARAM)?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(BearerCredential {
        token: token.to_string(),
        source: CredentialSource::Query,
        subprotocol: None,
    })
}
