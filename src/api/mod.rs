// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{AuthErrorCode, AuthFailureBody},
    error::ApiError,
    state::AppState,
};

pub mod health;
pub mod verify;
pub mod ws;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/auth/verify", post(verify::verify))
        .with_state(state.clone());

    Router::new()
        .route("/ws", get(ws::websocket))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
        .layer(CorsLayer::permissive())
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}

#[derive(OpenApi)]
#[openapi(
    paths(
        ws::websocket,
        verify::verify,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            AuthErrorCode,
            AuthFailureBody,
            verify::VerifyResponse,
            ws::ConnectionEstablished,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks
        )
    ),
    tags(
        (name = "Connections", description = "Authenticated WebSocket connections"),
        (name = "Auth", description = "REST authentication"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
