//! WebSocket hub
//!
//! Fans resource-change names out to every live WebSocket subscriber. The
//! hub is a broadcast channel: per-subscriber buffers drop on overflow,
//! which is acceptable because clients re-fetch the named resource anyway.
//! Each connection gets an initial `ok` frame and a `ping` frame after five
//! seconds of channel idleness.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

const PING_INTERVAL: Duration = Duration::from_secs(5);
const SUBSCRIBER_BUFFER: usize = 100;

/// Resource-change fan-out to WebSocket subscribers
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<String>,
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { tx }
    }

    /// Announce a changed resource path to every subscriber.
    pub fn broadcast(&self, path: &str) {
        // no subscribers is fine
        let _ = self.tx.send(path.to_string());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Drive one upgraded connection until the peer goes away.
    pub async fn run_socket(&self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        if sink.send(Message::Text("ok".into())).await.is_err() {
            return;
        }
        let mut rx = self.subscribe();
        // the read side only signals liveness; any error tears down
        let mut reader = tokio::spawn(async move {
            while let Some(Ok(_)) = stream.next().await {}
        });
        loop {
            tokio::select! {
                _ = &mut reader => break,
                received = tokio::time::timeout(PING_INTERVAL, rx.recv()) => match received {
                    Ok(Ok(path)) => {
                        if sink.send(Message::Text(path.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        debug!(skipped, "websocket subscriber lagged, events dropped");
                    }
                    Ok(Err(broadcast::error::RecvError::Closed)) => break,
                    Err(_idle) => {
                        if sink.send(Message::Text("ping".into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        reader.abort();
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
