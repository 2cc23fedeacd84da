//! `GET /live`: the dashboard push channel.
//!
//! Each socket is one broker subscriber. Envelopes go out as JSON text
//! frames and broker probes as WebSocket pings; a pong (or a text `pong`
//! for clients that cannot see control frames) answers the probe.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use bistro_notify::{NotificationBroker, Outbound};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/live", get(live_channel))
}

async fn live_channel(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state.broker))
}

async fn serve_subscriber(socket: WebSocket, broker: Arc<NotificationBroker>) {
    let mut handle = broker.connect().await;
    let id = handle.id;
    let (mut sender, mut receiver) = socket.split();
    info!(subscriber = id, "Live channel opened");

    loop {
        tokio::select! {
            outbound = handle.recv() => {
                let frame = match outbound {
                    Some(Outbound::Message(envelope)) => match serde_json::to_string(&envelope) {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            error!(error = %e, "Failed to serialize envelope");
                            continue;
                        }
                    },
                    Some(Outbound::Probe) => Message::Ping(Default::default()),
                    // dropped by the broker
                    None => break,
                };
                if sender.send(frame).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Pong(_))) => {
                    broker.acknowledge(id).await;
                }
                Some(Ok(Message::Text(text))) if text.as_str().trim().eq_ignore_ascii_case("pong") => {
                    broker.acknowledge(id).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(other)) => {
                    debug!(subscriber = id, ?other, "Ignoring client frame");
                }
            },
        }
    }

    broker.disconnect(id).await;
    info!(subscriber = id, "Live channel closed");
}
