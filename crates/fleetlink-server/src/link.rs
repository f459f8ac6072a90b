//! Outbound socket abstraction.
//!
//! Registries never touch a socket directly: frames are queued over a
//! bounded channel to a writer task that owns the sink half. Queueing is
//! non-blocking, so shared locks stay free of socket I/O and a slow peer
//! never stalls anyone else.

use fleetlink_core::close::CloseReason;
use tokio::sync::mpsc;

/// Send-side failure on a device or observer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The peer is gone; the writer task has ended.
    #[error("sink closed")]
    Closed,

    /// The outbound queue is full; the peer is not draining.
    #[error("outbound queue full")]
    Backpressure,
}

/// One frame queued for a writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Close the socket with a policy code, then stop writing.
    Close(CloseReason),
}

/// Outbound half of a socket, shareable across tasks.
pub trait FrameSink: Send + Sync {
    /// Queue a text frame.
    fn send_text(&self, text: &str) -> Result<(), SinkError>;

    /// Queue a policy close.
    fn close(&self, reason: CloseReason) -> Result<(), SinkError>;

    /// Whether the writer side is still attached.
    fn is_open(&self) -> bool;
}

/// [`FrameSink`] over a bounded channel to a writer task.
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundFrame>,
}

impl ChannelSink {
    /// Wrap the sending half of a writer task's channel.
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { tx }
    }
}

impl FrameSink for ChannelSink {
    fn send_text(&self, text: &str) -> Result<(), SinkError> {
        queue(&self.tx, OutboundFrame::Text(text.to_string()))
    }

    fn close(&self, reason: CloseReason) -> Result<(), SinkError> {
        queue(&self.tx, OutboundFrame::Close(reason))
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

fn queue(tx: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) -> Result<(), SinkError> {
    match tx.try_send(frame) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => Err(SinkError::Backpressure),
        Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_text_frames_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        sink.send_text("one").unwrap();
        sink.send_text("two").unwrap();
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("one".to_string()));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("two".to_string()));
    }

    #[test]
    fn full_queue_reports_backpressure() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.send_text("one").unwrap();
        assert_eq!(sink.send_text("two"), Err(SinkError::Backpressure));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChannelSink::new(tx);
        assert!(!sink.is_open());
        assert_eq!(sink.send_text("one"), Err(SinkError::Closed));
        assert_eq!(sink.close(CloseReason::ShuttingDown), Err(SinkError::Closed));
    }

    #[test]
    fn close_queues_the_policy_reason() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.close(CloseReason::Superseded).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundFrame::Close(CloseReason::Superseded)
        );
    }
}
