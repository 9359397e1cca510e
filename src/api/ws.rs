// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WebSocket handshake endpoint.
//!
//! A preliminary connection id is issued before authentication and kept for
//! the lifetime of the connection. Authentication finishes before the
//! upgrade; a rejected client still gets the upgrade so it can read the
//! failure body before the 1008 close.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, Uri},
    response::Response,
};
use serde::Serialize;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthErrorCode, AuthFailureBody, ConnectionContext, Handshake};
use crate::state::AppState;

/// First message sent on an authenticated connection.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionEstablished {
    #[serde(rename = "type")]
    pub kind: String,
    pub connection_id: String,
    pub user_id: String,
    pub thread_id: String,
    pub run_id: String,
}

impl ConnectionEstablished {
    pub fn new(context: &ConnectionContext) -> Self {
        Self {
            kind: "connection_established".to_string(),
            connection_id: context.connection_id.clone(),
            user_id: context.user_id.clone(),
            thread_id: context.thread_id.clone(),
            run_id: context.run_id.clone(),
        }
    }
}

/// `ws_<12 hex>`, issued before authentication completes.
pub fn preliminary_connection_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("ws_{}", &random[..12])
}

/// Authenticate and upgrade a chat WebSocket connection.
#[utoipa::path(
    get,
    path = "/ws",
    tag = "Connections",
    params(
        ("token" = Option<String>, Query, description = "Fallback token for non-browser test clients")
    ),
    responses(
        (status = 101, description = "Upgraded; first frame is connection_established or an auth failure", body = ConnectionEstablished),
        (status = 400, description = "Not a WebSocket upgrade request")
    )
)]
pub async fn websocket(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let preliminary_id = preliminary_connection_id();
    let handshake = Handshake::new(headers, &uri);
    debug!(connection_id = %preliminary_id, "WebSocket handshake received");

    let outcome = state
        .gateway
        .authenticate(&handshake, Some(&preliminary_id))
        .await;

    let ws = match outcome.subprotocol.clone() {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    let (verdict, context) = outcome.into_parts();
    match context {
        Some(context) => ws.on_upgrade(move |socket| serve_connection(socket, context)),
        None => {
            // A successful verdict always carries a context.
            let failure = verdict.client_payload().unwrap_or_else(|| {
                AuthErrorCode::WebsocketAuthException.into_body("Internal authentication error")
            });
            ws.on_upgrade(move |socket| reject(socket, failure))
        }
    }
}

async fn reject(mut socket: WebSocket, failure: AuthFailureBody) {
    if let Ok(body) = serde_json::to_string(&failure) {
        let _ = socket.send(Message::Text(body.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: Utf8Bytes::from_static(failure.error_code.as_str()),
        })))
        .await;
}

async fn serve_connection(mut socket: WebSocket, context: ConnectionContext) {
    let established = ConnectionEstablished::new(&context);
    match serde_json::to_string(&established) {
        Ok(body) => {
            if socket.send(Message::Text(body.into())).await.is_err() {
                return;
            }
        }
        Err(e) => {
            debug!(error = %e, "Failed to encode connection_established");
            return;
        }
    }

    // Message routing lives downstream; this endpoint only holds the
    // connection open until the client leaves.
    while let Some(frame) = socket.recv().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %context.connection_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
    info!(
        connection_id = %context.connection_id,
        user_id = %context.user_id,
        "WebSocket connection closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use futures_util::StreamExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{
            client::IntoClientRequest,
            http::{header::AUTHORIZATION, HeaderValue},
            protocol::frame::coding::CloseCode,
            Message as ClientMessage,
        },
        MaybeTlsStream, WebSocketStream,
    };

    use crate::api::router;
    use crate::auth::testing::ScriptedIdentityClient;
    use crate::auth::{
        AuthenticatedIdentity, AuthenticationGateway, AuthenticationVerdict,
        ExecutionContextFactory,
    };
    use crate::config::{Environment, GatewayConfig};

    const JWT: &str = "aGVhZGVy.cGF5bG9hZA.c2ln";

    type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve() -> SocketAddr {
        let config = Arc::new(GatewayConfig::for_environment(Environment::Production));
        let client = Arc::new(ScriptedIdentityClient::accepting("user_1"));
        let app = router(AppState::new(AuthenticationGateway::new(config, client)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn next_json(stream: &mut ClientStream) -> serde_json::Value {
        match stream.next().await {
            Some(Ok(ClientMessage::Text(text))) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authenticated_client_receives_connection_established() {
        let addr = serve().await;
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {JWT}")).unwrap(),
        );

        let (mut stream, _response) = connect_async(request).await.unwrap();
        let established = next_json(&mut stream).await;
        assert_eq!(established["type"], "connection_established");
        assert_eq!(established["user_id"], "user_1");
        assert!(established["connection_id"].as_str().unwrap().starts_with("ws_"));
        assert!(established["thread_id"].as_str().unwrap().starts_with("thread_"));
    }

    #[tokio::test]
    async fn rejected_client_gets_failure_then_policy_close() {
        let addr = serve().await;
        let (mut stream, _response) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        let failure = next_json(&mut stream).await;
        assert_eq!(failure["success"], false);
        assert_eq!(failure["error_code"], "NO_TOKEN");

        match stream.next().await {
            Some(Ok(ClientMessage::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::Policy);
                assert_eq!(frame.reason.as_str(), "NO_TOKEN");
            }
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn credential_subprotocol_is_selected() {
        let addr = serve().await;
        let entry = format!("jwt.{}", URL_SAFE_NO_PAD.encode(JWT));
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request.headers_mut().insert(
            "sec-websocket-protocol",
            HeaderValue::from_str(&format!("chat, {entry}")).unwrap(),
        );

        let (mut stream, response) = connect_async(request).await.unwrap();
        assert_eq!(
            response.headers()["sec-websocket-protocol"].to_str().unwrap(),
            entry
        );
        assert_eq!(next_json(&mut stream).await["type"], "connection_established");
    }

    #[test]
    fn preliminary_id_shape() {
        let id = preliminary_connection_id();
        assert!(id.starts_with("ws_"));
        assert_eq!(id.len(), 15);
        assert!(id[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, preliminary_connection_id());
    }

    #[test]
    fn established_message_shape() {
        let verdict = AuthenticationVerdict::success(
            AuthenticatedIdentity::new("user_1", None, vec![]).unwrap(),
        );
        let context = ExecutionContextFactory::new()
            .create(&verdict, Some("ws_abc123"))
            .unwrap();
        let json = serde_json::to_value(ConnectionEstablished::new(&context)).unwrap();
        assert_eq!(json["type"], "connection_established");
        assert_eq!(json["connection_id"], "ws_abc123");
        assert_eq!(json["user_id"], "user_1");
        assert_eq!(json["thread_id"], context.thread_id.as_str());
        assert_eq!(json["run_id"], context.run_id.as_str());
    }
}
