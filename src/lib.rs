// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chat Auth Gateway - Connection Authentication for the Chat Platform
//!
//! Authenticates inbound WebSocket and REST connections against a remote
//! identity service and produces one canonical verdict plus an isolated
//! per-connection execution context.
//!
//! ## Modules
//!
//! - `api` - HTTP and WebSocket handlers (Axum)
//! - `auth` - Credential extraction, validation and connection contexts
//! - `config` - Environment-driven runtime configuration
//! - `state` - Shared application state

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;
