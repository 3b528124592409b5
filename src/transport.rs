//! Outbound transport handle shared by the dispatcher and push loops.
//!
//! Each WebSocket session owns a single writer task; everything that wants
//! to send — the RPC dispatcher, any number of push loops, application-driven
//! event notifications — goes through a [`Sink`] clone backed by an mpsc
//! queue. The writer drains the queue one message at a time, so concurrent
//! producers can never interleave the bytes of two JSON documents.

use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Queue depth of the per-connection outbound channel.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Clonable handle for sending one complete JSON document per call.
#[derive(Debug, Clone)]
pub struct Sink {
    tx: mpsc::Sender<String>,
}

impl Sink {
    /// Wraps an existing sender.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Creates a sink plus the receiver a writer task drains.
    ///
    /// The hub wires the receiver to the WebSocket write half; tests read it
    /// directly to observe outbound traffic.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Queues one message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the writer task is gone, which
    /// is how a peer disconnect surfaces to producers.
    pub async fn send(&self, text: String) -> Result<()> {
        self.tx.send(text).await.map_err(|_| Error::TransportClosed)
    }

    /// Returns true while the writer side is still alive.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
