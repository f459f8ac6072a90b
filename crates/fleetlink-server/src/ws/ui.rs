//! The observer channel.
//!
//! UI clients subscribe to one device key and receive every status
//! broadcast for it, starting with the cached latest message. Inbound
//! frames are drained and ignored; the channel exists to push.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use super::{run_writer, OUTBOUND_BUFFER};
use crate::link::{ChannelSink, FrameSink};
use crate::state::AppState;

/// `GET /ws/ui/{device_id}`: upgrade and run the observer channel.
pub async fn ui_channel(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ui(socket, device_id, state))
}

async fn handle_ui(socket: WebSocket, device_id: String, state: AppState) {
    let (sink_half, mut frames) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(run_writer(sink_half, rx));
    let observer_id = Uuid::now_v7();
    let sink: Arc<dyn FrameSink> = Arc::new(ChannelSink::new(tx));

    state.fanout.subscribe(&device_id, observer_id, Arc::clone(&sink));
    info!(device_id = %device_id, observer = %observer_id, "observer subscribed");

    while let Some(message) = frames.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.fanout.unsubscribe(&device_id, observer_id);
    info!(device_id = %device_id, observer = %observer_id, "observer unsubscribed");
    drop(sink);
    let _ = writer.await;
}
