//! MPD change-event watcher
//!
//! Dedicated connection sitting in `idle`, translating `changed: <subsystem>`
//! lines into [`MpdEvent`] values. When the connection drops the watcher
//! emits `Reconnecting`, retries with a fixed delay, and emits `Reconnect`
//! once the handshake succeeds again.

use super::client::{dial, Connection};
use super::MpdError;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Daemon change notifications consumed by the event router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpdEvent {
    /// Connection lost; the daemon state is unknown
    Reconnecting,
    /// Connection re-established; all caches must refresh
    Reconnect,
    Database,
    Playlist,
    Player,
    Mixer,
    Options,
    Update,
    Output,
    Mount,
    Neighbor,
}

impl MpdEvent {
    fn from_subsystem(name: &str) -> Option<Self> {
        match name {
            "database" => Some(Self::Database),
            "playlist" => Some(Self::Playlist),
            "player" => Some(Self::Player),
            "mixer" => Some(Self::Mixer),
            "options" => Some(Self::Options),
            "update" => Some(Self::Update),
            "output" => Some(Self::Output),
            "mount" => Some(Self::Mount),
            "neighbor" => Some(Self::Neighbor),
            _ => None,
        }
    }
}

/// Handle to the background idle loop
pub struct Watcher {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Watcher {
    /// Connect and start watching. The initial connection must succeed;
    /// later drops are retried internally.
    pub async fn connect(addr: &str) -> Result<(Self, mpsc::Receiver<MpdEvent>), MpdError> {
        let conn = dial(addr).await?;
        let (tx, rx) = mpsc::channel(16);
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(addr.to_string(), conn, tx, stop_rx));
        Ok((Self { stop, task }, rx))
    }

    /// Stop the idle loop and close the event stream.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

async fn run(
    addr: String,
    conn: Connection,
    tx: mpsc::Sender<MpdEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let mut conn = Some(conn);
    loop {
        let current = match conn.take() {
            Some(c) => c,
            None => {
                if tx.send(MpdEvent::Reconnecting).await.is_err() {
                    return;
                }
                match reconnect(&addr, &mut stop).await {
                    Some(c) => {
                        if tx.send(MpdEvent::Reconnect).await.is_err() {
                            return;
                        }
                        c
                    }
                    None => return,
                }
            }
        };
        if idle_loop(current, &tx, &mut stop).await.is_none() {
            return;
        }
        // fall through with conn = None to trigger a reconnect
    }
}

/// Redial until it works or shutdown is requested.
async fn reconnect(addr: &str, stop: &mut watch::Receiver<bool>) -> Option<Connection> {
    loop {
        tokio::select! {
            _ = stop.changed() => return None,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
        match dial(addr).await {
            Ok(conn) => return Some(conn),
            Err(err) => debug!(addr, %err, "mpd reconnect failed"),
        }
    }
}

/// Run `idle` rounds on one connection until it fails (Some) or shutdown is
/// requested (None).
async fn idle_loop(
    mut conn: Connection,
    tx: &mpsc::Sender<MpdEvent>,
    stop: &mut watch::Receiver<bool>,
) -> Option<()> {
    loop {
        let round = async {
            let pairs = conn.roundtrip("idle").await?;
            let mut events = Vec::new();
            for (key, value) in pairs {
                if key == "changed" {
                    if let Some(event) = MpdEvent::from_subsystem(&value) {
                        events.push(event);
                    }
                }
            }
            Ok::<_, MpdError>(events)
        };
        tokio::select! {
            _ = stop.changed() => return None,
            result = round => match result {
                Ok(events) => {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            return None;
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "mpd idle connection lost");
                    return Some(());
                }
            }
        }
    }
}
