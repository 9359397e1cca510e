// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{AuthenticationGateway, HttpIdentityClient};
use crate::config::GatewayConfig;
use crate::error::ConfigError;

#[derive(Clone)]
pub struct AppState {
    pub gateway: AuthenticationGateway,
}

impl AppState {
    pub fn new(gateway: AuthenticationGateway) -> Self {
        Self { gateway }
    }

    /// State backed by the HTTP identity service client.
    pub fn from_config(config: Arc<GatewayConfig>) -> Result<Self, ConfigError> {
        let client = HttpIdentityClient::new(&config.identity)?;
        Ok(Self::new(AuthenticationGateway::new(config, Arc::new(client))))
    }
}
