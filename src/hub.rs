//! WebSocket session hub.
//!
//! Thin transport wrapper around the core: binds a TCP listener, accepts
//! WebSocket upgrades, and runs one session per connection. Each session
//! spawns a single writer task draining the per-connection queue, attaches
//! the queue handle to every registered peripheral, and feeds inbound text
//! frames through a [`Dispatcher`] in arrival order. Disconnects tear down
//! every peripheral's loops before the session task exits.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::peripheral::Peripheral;
use crate::transport::{OUTBOUND_QUEUE_CAPACITY, Sink};

/// Default listen address for Scratch Link clients.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:20111";

/// Accepts Scratch client sessions and fans them out to peripherals.
#[derive(Default)]
pub struct LinkHub {
    peripherals: Vec<Arc<dyn Peripheral>>,
}

impl LinkHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peripheral served to every session.
    pub fn register(&mut self, peripheral: Arc<dyn Peripheral>) {
        self.peripherals.push(peripheral);
    }

    /// Runs the accept loop forever.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or accepting fails.
    pub async fn run(&self, address: &str) -> Result<()> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!("listening on ws://{address}/");

        loop {
            let (stream, peer) = listener.accept().await?;
            let peripherals = self.peripherals.clone();
            tokio::spawn(async move {
                tracing::info!(%peer, "client connected");
                if let Err(e) = run_session(peripherals, stream).await {
                    tracing::debug!(%peer, "session error: {e}");
                }
                tracing::info!(%peer, "client disconnected");
            });
        }
    }
}

/// Runs one WebSocket session to completion.
async fn run_session(peripherals: Vec<Arc<dyn Peripheral>>, stream: TcpStream) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    // Single writer task: every producer goes through the queue, so two
    // concurrent sends can never interleave on the wire.
    let (sink, mut outbound) = Sink::channel(OUTBOUND_QUEUE_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            tracing::trace!("→ {text}");
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    for peripheral in &peripherals {
        peripheral.register_transport(sink.clone()).await;
    }
    let dispatcher = Dispatcher::new(peripherals.clone(), sink);

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                tracing::trace!("← {text}");
                if let Err(e) = dispatcher.dispatch(&text).await {
                    tracing::debug!("dispatch stopped: {e}");
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("read error: {e}");
                break;
            }
        }
    }

    for peripheral in &peripherals {
        peripheral.on_disconnect().await;
    }
    writer.abort();
    Ok(())
}
