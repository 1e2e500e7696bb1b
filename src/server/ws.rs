use crate::errors::SimError;
use crate::server::routes::{self, PriceRequest, PriceResponse};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use portable_atomic::Ordering;
use std::sync::Arc;

/// Replies sent back over the interactive channel.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type")]
enum WsReply {
    #[serde(rename = "pricing_report")]
    PricingReport(PriceResponse),

    #[serde(rename = "error")]
    Error {
        error: String,
        kind: &'static str,
        field: Option<&'static str>,
    },
}

impl From<SimError> for WsReply {
    fn from(e: SimError) -> Self {
        WsReply::Error {
            error: e.to_string(),
            kind: e.kind(),
            field: e.field(),
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Each text frame is a pricing request (a slider change); each gets exactly
/// one reply, in order.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };
        state.counters.ws_messages_handled.fetch_add(1, Ordering::Relaxed);

        let reply = match handle_text(&state, text.as_str()).await {
            Ok(resp) => WsReply::PricingReport(resp),
            Err(e) => {
                tracing::warn!(kind = e.kind(), "ws request rejected: {e}");
                e.into()
            }
        };

        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("ws reply serialization failed: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }

    tracing::debug!("ws client disconnected");
}

async fn handle_text(state: &Arc<AppState>, text: &str) -> Result<PriceResponse, SimError> {
    let req: PriceRequest = serde_json::from_str(text)?;
    routes::price_once(state, req).await
}
