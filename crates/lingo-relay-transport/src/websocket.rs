//! WebSocket endpoint exposing a router to remote contexts.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use lingo_relay_core::InboundSink;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::protocol::Frame;

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Receiver for inbound requests.
    pub sink: Arc<dyn InboundSink>,
}

impl WsState {
    /// State forwarding every request to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn InboundSink>) -> Self {
        Self { sink }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Produce the reply for one text frame, if any.
pub async fn answer(sink: &dyn InboundSink, text: &str) -> Option<Frame> {
    match Frame::parse(text) {
        Ok(Frame::Request { message }) => Some(Frame::Response {
            message: sink.on_inbound(message).await,
        }),
        Ok(Frame::Ping) => Some(Frame::Pong),
        Ok(Frame::Pong | Frame::Response { .. }) => None,
        Err(rejection) => Some(rejection),
    }
}

/// Text carried by a binary frame, or the rejection to send back.
fn binary_text(data: &[u8]) -> Result<String, Frame> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|e| Frame::rejection(format!("binary frame is not UTF-8: {e}")))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize frame: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match binary_text(&data) {
                Ok(text) => text,
                Err(rejection) => {
                    let _ = tx.send(rejection);
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        // Requests are answered concurrently; replies carry their own id.
        let sink = Arc::clone(&state.sink);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(reply) = answer(sink.as_ref(), &text).await {
                let _ = tx.send(reply);
            }
        });
    }

    drop(tx);
    let _ = send_task.await;
    tracing::debug!("WebSocket disconnected");
}

/// Create the WebSocket router serving `/ws`.
///
/// # Example
/// ```ignore
/// let app = axum::Router::new().merge(create_ws_router(router));
/// ```
#[must_use]
pub fn create_ws_router(sink: Arc<dyn InboundSink>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(WsState::new(sink))
}
