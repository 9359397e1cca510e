// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Synthetic user ids for bypass (E2E/demo) connections.
//!
//! Rules are an ordered table of `(pattern, builder)` pairs, first match
//! wins. Each rule is tried against the raw token and then against the
//! unverified `sub` claim of a JWT-shaped token. Every produced id carries a
//! test prefix so it cannot collide with a real identity service user id.
//! When nothing matches, the id is derived from a SHA-256 of the token, so
//! the same token always maps to the same synthetic user. Hashed ids live
//! under [`GENERATED_PREFIX`], which no rule can produce.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Name reported when no rule matched and the id was hashed from the token.
pub const GENERATED_RULE: &str = "generated";

/// Prefix of hashed fallback ids.
pub const GENERATED_PREFIX: &str = "anon-e2e-";

struct SyntheticUserRule {
    name: &'static str,
    pattern: Regex,
    build: fn(&Captures<'_>) -> String,
}

static RULES: LazyLock<Vec<SyntheticUserRule>> = LazyLock::new(|| {
    vec![
        SyntheticUserRule {
            name: "e2e_user",
            pattern: Regex::new(r"^(?:e2e|test|staging-e2e)[-_]user[-_]([A-Za-z0-9][A-Za-z0-9_-]{0,63})$")
                .expect("static pattern"),
            build: |caps| format!("e2e-user-{}", &caps[1]),
        },
        SyntheticUserRule {
            name: "demo_token",
            pattern: Regex::new(r"^(?:mock|demo)[-_]token[-_]([A-Za-z0-9][A-Za-z0-9_-]{0,63})$")
                .expect("static pattern"),
            build: |caps| format!("demo-user-{}", &caps[1]),
        },
        SyntheticUserRule {
            name: "e2e_subject",
            pattern: Regex::new(r"^(e2e[-_][A-Za-z0-9_-]{1,64})$").expect("static pattern"),
            build: |caps| caps[1].to_string(),
        },
    ]
});

#[derive(Deserialize)]
struct SubjectClaims {
    #[serde(default)]
    sub: Option<String>,
}

/// A synthetic user id and the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticUser {
    pub user_id: String,
    pub rule: &'static str,
}

/// Derive a deterministic synthetic user id for a bypass token.
pub fn synthetic_user(token: &str) -> SyntheticUser {
    let subject = unverified_subject(token);
    let candidates = std::iter::once(token).chain(subject.as_deref());

    for candidate in candidates {
        for rule in RULES.iter() {
            if let Some(caps) = rule.pattern.captures(candidate) {
                return SyntheticUser {
                    user_id: (rule.build)(&caps),
                    rule: rule.name,
                };
            }
        }
    }

    SyntheticUser {
        user_id: format!("{GENERATED_PREFIX}{}", token_fingerprint(token)),
        rule: GENERATED_RULE,
    }
}

/// `sub` claim of a JWT-shaped token, read without signature verification.
/// Only ever used on the non-production bypass path.
fn unverified_subject(token: &str) -> Option<String> {
    if !token.contains('.') {
        return None;
    }
    jsonwebtoken::dangerous::insecure_decode::<SubjectClaims>(token)
        .ok()
        .and_then(|data| data.claims.sub)
        .filter(|sub| !sub.is_empty())
}

/// First 16 hex characters of SHA-256(token).
fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
