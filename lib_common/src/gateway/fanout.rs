//! # Client Fanout Server
//!
//! Serves the realtime push endpoint. Each accepted WebSocket connection owns
//! one [`Subscription`] on the [`EventRouter`] and forwards every record it
//! receives as a JSON text packet:
//!
//! ```json
//! {"type":"event","name":"credit","args":{"event":"credit","block_time":1700000000,"block_time_str":"...","msg":{...}}}
//! ```
//!
//! ## Access Rule
//! Only request paths equal to the configured prefix, or continuing it with
//! `/`, are served. Everything else is answered with `401 Unauthorized`
//! before a subscription exists.
//!
//! ## Lifecycle
//! A connection loop ends when the client closes or errors, when the router
//! is gone, or when the shutdown token fires (the client then gets a Close
//! frame). The subscription is released on every exit path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::core::event::EventRecord;
use crate::core::router::EventRouter;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// One push packet, borrowed from the shared record.
#[derive(Debug, Serialize)]
pub struct FanoutPacket<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: &'a str,
    pub args: &'a EventRecord,
}

impl<'a> FanoutPacket<'a> {
    pub fn event(record: &'a EventRecord) -> Self {
        Self {
            kind: "event",
            name: &record.event_type,
            args: record,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Segment-aware prefix check: `/socket.io` accepts `/socket.io` and
/// `/socket.io/...` but not `/socket.iox`.
pub fn accepts_path(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[derive(Clone)]
struct FanoutState {
    router: Arc<EventRouter>,
    prefix: Arc<str>,
    shutdown: CancellationToken,
}

/// Builds the axum application. A single fallback handler covers every path
/// so that the prefix rule is the only routing decision.
pub fn fanout_router(router: Arc<EventRouter>, prefix: &str, shutdown: CancellationToken) -> Router {
    let state = FanoutState {
        router,
        prefix: Arc::from(prefix),
        shutdown,
    };
    Router::new().fallback(fanout_handler).with_state(state)
}

/// Serves `app` on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Fanout server listening on {}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            log::info!("Fanout server shutting down.");
        })
        .await
}

async fn fanout_handler(
    State(state): State<FanoutState>,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !accepts_path(uri.path(), &state.prefix) {
        log::warn!("Rejected request for {} (outside {})", uri.path(), state.prefix);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(mut socket: WebSocket, state: FanoutState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let mut subscription = state.router.subscribe(&format!("ws-client-{}", client_id));
    log::info!("Client {} connected (subscriber {})", client_id, subscription.id());

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Nothing a client sends changes what it receives.
                Some(Ok(_)) => {}
            },
            record = subscription.recv() => {
                let Some(record) = record else { break };
                match FanoutPacket::event(&record).to_text() {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::error!("Failed to encode '{}' for client {}: {}", record.event_type, client_id, e),
                }
            }
        }
    }

    subscription.unsubscribe();
    log::info!("Client {} disconnected", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::normalize;
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_accepts_path_is_segment_aware() {
        assert!(accepts_path("/socket.io", "/socket.io"));
        assert!(accepts_path("/socket.io/", "/socket.io"));
        assert!(accepts_path("/socket.io/1/websocket", "/socket.io"));
        assert!(!accepts_path("/socket.iox", "/socket.io"));
        assert!(!accepts_path("/admin", "/socket.io"));
        assert!(!accepts_path("/", "/socket.io"));
    }

    #[test]
    fn test_accepts_path_with_trailing_slash_prefix() {
        assert!(accepts_path("/socket.io/x", "/socket.io/"));
        assert!(accepts_path("/anything", "/"));
    }

    #[test]
    fn test_packet_wraps_record_wire_form() {
        let raw = json!({"_EVENT": "credit", "_BLOCKTIME": 1_700_000_000, "asset": "XYZ"});
        let record = normalize(raw.as_object().unwrap().clone()).unwrap();
        let text = FanoutPacket::event(&record).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "event");
        assert_eq!(value["name"], "credit");
        assert_eq!(value["args"]["event"], "credit");
        assert_eq!(value["args"]["block_time"], 1_700_000_000);
        assert_eq!(value["args"]["block_time_str"], "2023-11-14T22:13:20.000000Z");
        assert_eq!(value["args"]["msg"], json!({"asset": "XYZ"}));
    }

    #[tokio::test]
    async fn test_path_outside_prefix_gets_401_without_subscribing() {
        let router = EventRouter::new();
        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = fanout_router(router.clone(), "/socket.io", shutdown.clone());
        let server = tokio::spawn(serve(listener, app, shutdown.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /admin HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 401"), "got: {}", response);
        assert_eq!(router.subscriber_count(), 0);

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
