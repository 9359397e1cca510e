// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Connection handshake input surface.

use axum::http::{request::Parts, HeaderMap, HeaderName, HeaderValue, Uri};

/// The parts of an inbound WebSocket or REST handshake the gateway reads:
/// request headers and the raw URL query string.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    headers: HeaderMap,
    query: Option<String>,
}

impl Handshake {
    pub fn new(headers: HeaderMap, uri: &Uri) -> Self {
        Self {
            headers,
            query: uri.query().map(str::to_string),
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(parts.headers.clone(), &parts.uri)
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// First value of a URL-decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn from_parts_keeps_headers_and_query() {
        let parts = Request::builder()
            .uri("/ws?token=abc&room=1")
            .header("Authorization", "Bearer xyz")
            .body(())
            .unwrap()
            .into_parts()
            .0;

        let handshake = Handshake::from_parts(&parts);
        assert_eq!(handshake.header("authorization"), Some("Bearer xyz"));
        assert_eq!(handshake.query(), Some("token=abc&room=1"));
    }

    #[test]
    fn query_param_is_url_decoded() {
        let handshake = Handshake::default().with_query("token=a%2Bb%3D&x=1");
        assert_eq!(handshake.query_param("token").as_deref(), Some("a+b="));
        assert_eq!(handshake.query_param("missing"), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let handshake = Handshake::default().with_header("X-E2E-Test", "1");
        assert_eq!(handshake.header("x-e2e-test"), Some("1"));
    }

    #[test]
    fn invalid_header_is_ignored() {
        let handshake = Handshake::default().with_header("bad header", "v");
        assert!(handshake.headers().is_empty());
    }
}
