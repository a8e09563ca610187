//! Library songs resource
//!
//! The full song list in daemon order, enriched by the song-hook pipeline.
//! The snapshot is installed unconditionally so `Last-Modified` moves on
//! every refresh, and the change stream fires on every refresh so dependent
//! resources re-derive their views.

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

/// Daemon interface for the library songs resource
#[async_trait]
pub trait LibrarySongsApi: Send + Sync {
    async fn list_all_info(&self, path: &str) -> std::result::Result<Vec<Song>, MpdError>;
}

#[async_trait]
impl LibrarySongsApi for crate::mpd::Client {
    async fn list_all_info(&self, path: &str) -> std::result::Result<Vec<Song>, MpdError> {
        crate::mpd::Client::list_all_info(self, path).await
    }
}

pub struct LibrarySongsHandler {
    mpd: Arc<dyn LibrarySongsApi>,
    cache: ResourceCache,
    hook: SongsHook,
    data: Mutex<Vec<Song>>,
    changed_tx: Mutex<Option<mpsc::Sender<()>>>,
    changed_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl LibrarySongsHandler {
    pub fn new(mpd: Arc<dyn LibrarySongsApi>, hook: SongsHook) -> Result<Self> {
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
        let songs = self.mpd.list_all_info("/").await?;
        let songs = (self.hook)(songs);
        self.cache.set(&songs)?;
        *self.data.lock().unwrap() = songs;
        if let Some(tx) = self.changed_tx.lock().unwrap().as_ref() {
            let _ = tx.try_send(());
        }
        Ok(())
    }

    /// The canonical library array from the last refresh.
    pub fn data(&self) -> Vec<Song> {
        self.data.lock().unwrap().clone()
    }

    pub fn serve(&self, headers: &HeaderMap) -> Response {
        self.cache.serve(headers, None)
    }

    /// Fires on every refresh, not only on byte changes; dependent views
    /// must always re-check.
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

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLibrarySongs(Mutex<Vec<Song>>);

    #[async_trait]
    impl LibrarySongsApi for FakeLibrarySongs {
        async fn list_all_info(&self, path: &str) -> std::result::Result<Vec<Song>, MpdError> {
            assert_eq!(path, "/");
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn song(file: &str) -> Song {
        Song::from([("file".to_string(), vec![file.to_string()])])
    }

    fn tagging_hook() -> SongsHook {
        Arc::new(|songs: Vec<Song>| {
            songs
                .into_iter()
                .map(|mut s| {
                    s.insert("hooked".to_string(), vec!["1".to_string()]);
                    s
                })
                .collect()
        })
    }

    #[tokio::test]
    async fn test_update_applies_hook_and_signals() {
        let mpd = Arc::new(FakeLibrarySongs(Mutex::new(vec![song("a.mp3")])));
        let handler = LibrarySongsHandler::new(mpd, tagging_hook()).unwrap();
        let mut changed = handler.take_changed();

        handler.update().await.unwrap();
        assert!(changed.try_recv().is_ok());
        let data = handler.data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["hooked"], vec!["1"]);

        // identical content still signals: Last-Modified must move
        handler.update().await.unwrap();
        assert!(changed.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_failed_update_keeps_snapshot() {
        struct Failing;
        #[async_trait]
        impl LibrarySongsApi for Failing {
            async fn list_all_info(
                &self,
                _path: &str,
            ) -> std::result::Result<Vec<Song>, MpdError> {
                Err(MpdError::Closed)
            }
        }
        let handler = LibrarySongsHandler::new(Arc::new(Failing), tagging_hook()).unwrap();
        let mut changed = handler.take_changed();
        assert!(handler.update().await.is_err());
        assert!(changed.try_recv().is_err());
        assert!(handler.data().is_empty());
    }
}
