// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_auth_gateway::{
    api::router,
    config::{GatewayConfig, LOG_FORMAT_ENV},
    state::AppState,
};

/// In-flight connections get this long to finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    init_tracing();

    let config = match GatewayConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let state = match AppState::from_config(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialise identity service client");
            std::process::exit(1);
        }
    };
    let app = router(state);

    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, host = %config.server.host, "Failed to parse bind address");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let handle = Handle::new();
    tokio::spawn(wait_for_ctrl_c(shutdown.clone()));
    tokio::spawn({
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            info!("Shutting down, draining connections");
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    });

    info!(
        environment = %config.environment,
        identity_service = %config.identity.base_url,
        max_attempts = config.retry.max_attempts,
        handshake_timeout_ms = config.handshake_timeout.as_millis() as u64,
        "Gateway configured"
    );

    let result = match &config.server.tls {
        Some((cert, key)) => {
            let tls = match RustlsConfig::from_pem_file(cert, key).await {
                Ok(tls) => tls,
                Err(e) => {
                    error!(error = %e, cert = %cert.display(), "Failed to load TLS credentials");
                    std::process::exit(1);
                }
            };
            info!("Chat auth gateway listening on https://{addr} (docs at /docs)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!("Chat auth gateway listening on http://{addr} (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server failed");
        std::process::exit(1);
    }
    info!("Server stopped");
}

/// `RUST_LOG` selects the filter, `LOG_FORMAT=json` the formatter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    shutdown.cancel();
}
