//! Cover images resource and song enrichment hook
//!
//! `{updating}` mirrors the image batch's busy state. POST with
//! `{"updating":true}` rescans the whole library; a rescan already in
//! flight answers 500. The handler also provides the song hook that strips
//! and re-resolves the derived `cover` tag on every pass.

use super::cache::{error_response, ResourceCache};
use crate::error::{Error, Result};
use crate::images::{ImageBatch, ImageProvider};
use crate::song::{add_tags, Song};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HttpImages {
    updating: bool,
}

pub struct ImagesHandler {
    cache: ResourceCache,
    batch: ImageBatch,
    library: Mutex<Vec<Song>>,
}

impl ImagesHandler {
    pub fn new(providers: Vec<Arc<dyn ImageProvider>>) -> Result<Self> {
        Ok(Self {
            cache: ResourceCache::new(&HttpImages::default())?,
            batch: ImageBatch::new(providers),
            library: Mutex::new(Vec::new()),
        })
    }

    /// Enrich one song: derived tags, then the best-known cover URLs. The
    /// flag reports whether resolution for this song is complete.
    pub fn conv_song(&self, song: Song) -> (Song, bool) {
        let mut song = add_tags(song);
        song.remove("cover");
        let (urls, complete) = self.batch.get_urls(&song);
        if !urls.is_empty() {
            song.insert("cover".to_string(), urls);
        }
        (song, complete)
    }

    /// Enrich many songs and queue the incomplete ones for resolution.
    pub fn conv_songs(&self, songs: Vec<Song>) -> Vec<Song> {
        let mut need_update = Vec::new();
        let converted: Vec<Song> = songs
            .into_iter()
            .map(|song| {
                let (song, complete) = self.conv_song(song);
                if !complete {
                    need_update.push(song.clone());
                }
                song
            })
            .collect();
        if !need_update.is_empty() {
            self.batch.update(need_update);
        }
        converted
    }

    /// Songs covered by a future rescan.
    pub fn update_library_songs(&self, songs: Vec<Song>) {
        *self.library.lock().unwrap() = songs;
    }

    /// Mirror a batch busy/idle transition into the snapshot.
    pub fn set_updating(&self, updating: bool) -> Result<()> {
        self.cache.set_if_modified(&HttpImages { updating })?;
        Ok(())
    }

    pub fn take_batch_events(&self) -> mpsc::Receiver<bool> {
        self.batch.take_events()
    }

    pub fn serve(&self, headers: &HeaderMap) -> Response {
        self.cache.serve(headers, None)
    }

    pub fn post(&self, headers: &HeaderMap, body: &[u8]) -> Response {
        let req: HttpImages = match serde_json::from_slice(body) {
            Ok(req) => req,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        };
        if !req.updating {
            return error_response(StatusCode::BAD_REQUEST, "requires updating=true");
        }
        let library = self.library.lock().unwrap().clone();
        match self.batch.rescan(library) {
            Ok(()) => {}
            Err(Error::AlreadyUpdating) => {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "update already started")
            }
            Err(err) => {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
            }
        }
        self.cache.serve(headers, Some(Utc::now()))
    }

    pub fn take_changed(&self) -> mpsc::Receiver<()> {
        self.cache.take_changed()
    }

    pub fn close(&self) {
        self.cache.close();
    }

    pub async fn shutdown(&self) {
        self.batch.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct StaticProvider {
        urls: Vec<String>,
        complete: bool,
    }

    #[async_trait]
    impl ImageProvider for StaticProvider {
        async fn update(&self, _song: &Song) -> Result<()> {
            Ok(())
        }
        async fn rescan(&self, _song: &Song, _batch: Uuid) -> Result<()> {
            Ok(())
        }
        fn get_urls(&self, _song: &Song) -> (Vec<String>, bool) {
            (self.urls.clone(), self.complete)
        }
    }

    fn song(file: &str) -> Song {
        Song::from([("file".to_string(), vec![file.to_string()])])
    }

    #[tokio::test]
    async fn test_conv_song_replaces_cover_tag() {
        let provider = Arc::new(StaticProvider {
            urls: vec!["/covers/a.jpg".to_string()],
            complete: true,
        });
        let handler = ImagesHandler::new(vec![provider]).unwrap();
        let mut stale = song("a.mp3");
        stale.insert("cover".to_string(), vec!["/covers/old.jpg".to_string()]);

        let (converted, complete) = handler.conv_song(stale);
        assert!(complete);
        assert_eq!(converted["cover"], vec!["/covers/a.jpg"]);
        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_conv_song_omits_unresolved_cover() {
        let provider = Arc::new(StaticProvider {
            urls: Vec::new(),
            complete: false,
        });
        let handler = ImagesHandler::new(vec![provider]).unwrap();
        let (converted, complete) = handler.conv_song(song("a.mp3"));
        assert!(!complete);
        assert!(!converted.contains_key("cover"));
        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_post_requires_updating_true() {
        let handler = ImagesHandler::new(Vec::new()).unwrap();
        let response = handler.post(&HeaderMap::new(), br#"{"updating":false}"#);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_post_busy_rescan_is_500() {
        let provider = Arc::new(StaticProvider {
            urls: Vec::new(),
            complete: true,
        });
        let handler = ImagesHandler::new(vec![provider]).unwrap();
        handler.update_library_songs(vec![song("a.mp3")]);

        let first = handler.post(&HeaderMap::new(), br#"{"updating":true}"#);
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        // the worker has not been polled yet, so the rescan is still running
        let second = handler.post(&HeaderMap::new(), br#"{"updating":true}"#);
        assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "update already started");
        handler.shutdown().await;
    }
}
