//! Current song resource

use super::cache::ResourceCache;
use super::SongHook;
use crate::error::Result;
use crate::mpd::MpdError;
use crate::song::Song;
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::response::Response;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Daemon interface for the current song resource
#[async_trait]
pub trait CurrentSongApi: Send + Sync {
    async fn current_song(&self) -> std::result::Result<Song, MpdError>;
}

#[async_trait]
impl CurrentSongApi for crate::mpd::Client {
    async fn current_song(&self) -> std::result::Result<Song, MpdError> {
        crate::mpd::Client::current_song(self).await
    }
}

pub struct CurrentSongHandler {
    mpd: Arc<dyn CurrentSongApi>,
    cache: ResourceCache,
    hook: SongHook,
}

impl CurrentSongHandler {
    pub fn new(mpd: Arc<dyn CurrentSongApi>, hook: SongHook) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&Song::new())?,
            hook,
        })
    }

    pub async fn update(&self) -> Result<()> {
        let song = self.mpd.current_song().await?;
        self.cache.set_if_modified(&(self.hook)(song))?;
        Ok(())
    }

    pub fn serve(&self, headers: &HeaderMap) -> Response {
        self.cache.serve(headers, None)
    }

    pub fn take_changed(&self) -> mpsc::Receiver<()> {
        self.cache.take_changed()
    }

    pub fn close(&self) {
        self.cache.close();
    }
}
