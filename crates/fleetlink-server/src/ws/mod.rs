//! WebSocket channels.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `device` | Device channel: hello, telemetry intake, keep-alive pings |
//! | `ui` | Observer channel: fan-out subscription per device key |
//!
//! Both channels share the same shape: the socket's sink half is owned by
//! a writer task fed over a bounded channel, so everything that holds a
//! registry lock only ever queues frames.

pub mod device;
pub mod ui;

pub use device::device_channel;
pub use ui::ui_channel;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;

use crate::link::OutboundFrame;

/// Outbound queue depth per connection.
pub(crate) const OUTBOUND_BUFFER: usize = 64;

/// Drain queued frames onto the socket until a close frame or the last
/// sender drops. Owns the sink half; the socket closes when this returns.
pub(crate) async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            OutboundFrame::Close(reason) => {
                let close = CloseFrame {
                    code: reason.code(),
                    reason: reason.label().into(),
                };
                let _ = sink.send(Message::Close(Some(close))).await;
                break;
            }
        }
    }
}
