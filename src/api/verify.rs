// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::State,
    http::{HeaderMap, Uri},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{AuthErrorCode, AuthFailureBody, Handshake};
use crate::state::AppState;

/// Header carrying a connection id issued earlier in the client's session.
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// Successful REST authentication.
#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub success: bool,
    pub user_id: String,
    pub email: Option<String>,
    pub permissions: Vec<String>,
    pub connection_id: String,
    pub thread_id: String,
    pub run_id: String,
    pub request_id: String,
    pub validated_at: DateTime<Utc>,
}

/// Authenticate a REST caller with the same pipeline as WebSocket handshakes.
#[utoipa::path(
    post,
    path = "/v1/auth/verify",
    tag = "Auth",
    params(
        ("token" = Option<String>, Query, description = "Fallback token for non-browser test clients"),
        ("x-connection-id" = Option<String>, Header, description = "Previously issued connection id to keep")
    ),
    responses(
        (status = 200, description = "Authenticated", body = VerifyResponse),
        (status = 401, description = "Missing, malformed or rejected token", body = AuthFailureBody),
        (status = 503, description = "Identity service unavailable", body = AuthFailureBody),
        (status = 500, description = "Internal authentication error", body = AuthFailureBody)
    )
)]
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<VerifyResponse>, AuthFailureBody> {
    let preliminary = headers
        .get(CONNECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let handshake = Handshake::new(headers, &uri);

    let (verdict, context) = state
        .gateway
        .authenticate(&handshake, preliminary.as_deref())
        .await
        .into_parts();

    if let Some(failure) = verdict.client_payload() {
        return Err(failure);
    }
    let (Some(identity), Some(context)) = (verdict.identity(), context) else {
        return Err(AuthErrorCode::WebsocketAuthException.into_body("Internal authentication error"));
    };

    Ok(Json(VerifyResponse {
        success: true,
        user_id: identity.user_id().to_string(),
        email: identity.email().map(str::to_string),
        permissions: identity.permissions().to_vec(),
        connection_id: context.connection_id,
        thread_id: context.thread_id,
        run_id: context.run_id,
        request_id: context.request_id,
        validated_at: verdict.validated_at(),
    }))
}
