//! Playlist songs resource
//!
//! The daemon queue in play order, enriched by the song-hook pipeline. The
//! change stream fires only when the queue content actually changed; the
//! playlist coordinator uses it for stale-sort detection.

use super::cache::ResourceCache;
use super::SongsHook;
use crate::error::Result;
use crate::mpd::MpdError;
use crate::song::Song;
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::response::Response;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Daemon interface for the playlist songs resource
#[async_trait]
pub trait PlaylistSongsApi: Send + Sync {
    async fn playlist_info(&self) -> std::result::Result<Vec<Song>, MpdError>;
}

#[async_trait]
impl PlaylistSongsApi for crate::mpd::Client {
    async fn playlist_info(&self) -> std::result::Result<Vec<Song>, MpdError> {
        crate::mpd::Client::playlist_info(self).await
    }
}

pub struct PlaylistSongsHandler {
    mpd: Arc<dyn PlaylistSongsApi>,
    cache: ResourceCache,
    hook: SongsHook,
    data: Mutex<Vec<Song>>,
    changed_tx: Mutex<Option<mpsc::Sender<()>>>,
    changed_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl PlaylistSongsHandler {
    pub fn new(mpd: Arc<dyn PlaylistSongsApi>, hook: SongsHook) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&Vec::<Song>::new())?,
            hook,
            data: Mutex::new(Vec::new()),
            changed_tx: Mutex::new(Some(tx)),
            changed_rx: Mutex::new(Some(rx)),
        })
    }

    pub async fn update(&self) -> Result<()> {
        let songs = self.mpd.playlist_info().await?;
        let songs = (self.hook)(songs);
        let changed = self.cache.set_if_modified(&songs)?;
        *self.data.lock().unwrap() = songs;
        if changed {
            if let Some(tx) = self.changed_tx.lock().unwrap().as_ref() {
                let _ = tx.try_send(());
            }
        }
        Ok(())
    }

    /// The canonical queue array from the last refresh.
    pub fn data(&self) -> Vec<Song> {
        self.data.lock().unwrap().clone()
    }

    pub fn serve(&self, headers: &HeaderMap) -> Response {
        self.cache.serve(headers, None)
    }

    pub fn take_changed(&self) -> mpsc::Receiver<()> {
        self.changed_rx
            .lock()
            .unwrap()
            .take()
            .expect("change stream already taken")
    }

    pub fn close(&self) {
        self.changed_tx.lock().unwrap().take();
        self.cache.close();
    }
}
