//! Filesystem cover lookup
//!
//! Searches the music directory for cover files placed next to each song and
//! maps hits to URLs under a configurable prefix. Results are cached per
//! song directory; a rescan invalidates the affected directory first.

use super::ImageProvider;
use crate::error::Result;
use crate::song::{first, Song};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

const COVER_FILES: &[&str] = &["cover.jpg", "cover.jpeg", "cover.png", "cover.webp"];

/// Cover provider backed by the daemon's music directory
pub struct LocalCoverProvider {
    music_directory: PathBuf,
    url_prefix: String,
    cache: Mutex<HashMap<String, Vec<String>>>,
}

impl LocalCoverProvider {
    pub fn new(music_directory: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            music_directory: music_directory.into(),
            url_prefix: url_prefix.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Directory of the song inside the library, with `/` separators.
    fn song_dir(song: &Song) -> Option<String> {
        let file = first(song, "file");
        if file.is_empty() {
            return None;
        }
        Some(match file.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        })
    }

    async fn scan(&self, dir: &str) -> Vec<String> {
        let fs_dir = if dir.is_empty() {
            self.music_directory.clone()
        } else {
            self.music_directory.join(Path::new(dir))
        };
        let mut urls = Vec::new();
        for name in COVER_FILES {
            if tokio::fs::metadata(fs_dir.join(name)).await.is_ok() {
                urls.push(if dir.is_empty() {
                    format!("{}/{}", self.url_prefix, name)
                } else {
                    format!("{}/{}/{}", self.url_prefix, dir, name)
                });
            }
        }
        urls
    }
}

#[async_trait]
impl ImageProvider for LocalCoverProvider {
    async fn update(&self, song: &Song) -> Result<()> {
        let Some(dir) = Self::song_dir(song) else {
            return Ok(());
        };
        if self.cache.lock().unwrap().contains_key(&dir) {
            return Ok(());
        }
        let urls = self.scan(&dir).await;
        self.cache.lock().unwrap().insert(dir, urls);
        Ok(())
    }

    async fn rescan(&self, song: &Song, _batch: Uuid) -> Result<()> {
        let Some(dir) = Self::song_dir(song) else {
            return Ok(());
        };
        self.cache.lock().unwrap().remove(&dir);
        let urls = self.scan(&dir).await;
        self.cache.lock().unwrap().insert(dir, urls);
        Ok(())
    }

    fn get_urls(&self, song: &Song) -> (Vec<String>, bool) {
        let Some(dir) = Self::song_dir(song) else {
            return (Vec::new(), true);
        };
        match self.cache.lock().unwrap().get(&dir) {
            Some(urls) => (urls.clone(), true),
            None => (Vec::new(), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(file: &str) -> Song {
        Song::from([("file".to_string(), vec![file.to_string()])])
    }

    #[tokio::test]
    async fn test_resolves_cover_next_to_song() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("artist/album");
        std::fs::create_dir_all(&album).unwrap();
        std::fs::write(album.join("cover.jpg"), b"jpg").unwrap();

        let provider = LocalCoverProvider::new(dir.path(), "/covers");
        let s = song("artist/album/track.mp3");

        let (urls, complete) = provider.get_urls(&s);
        assert!(urls.is_empty());
        assert!(!complete);

        provider.update(&s).await.unwrap();
        let (urls, complete) = provider.get_urls(&s);
        assert_eq!(urls, vec!["/covers/artist/album/cover.jpg"]);
        assert!(complete);
    }

    #[tokio::test]
    async fn test_caches_missing_covers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("artist/album")).unwrap();

        let provider = LocalCoverProvider::new(dir.path(), "/covers");
        let s = song("artist/album/track.mp3");
        provider.update(&s).await.unwrap();

        // no cover file: resolution is complete with no URLs
        let (urls, complete) = provider.get_urls(&s);
        assert!(urls.is_empty());
        assert!(complete);
    }

    #[tokio::test]
    async fn test_rescan_picks_up_new_cover() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("a");
        std::fs::create_dir_all(&album).unwrap();

        let provider = LocalCoverProvider::new(dir.path(), "/covers");
        let s = song("a/track.mp3");
        provider.update(&s).await.unwrap();
        assert!(provider.get_urls(&s).0.is_empty());

        std::fs::write(album.join("cover.png"), b"png").unwrap();
        provider.update(&s).await.unwrap();
        // update keeps the cached miss; only rescan invalidates
        assert!(provider.get_urls(&s).0.is_empty());

        provider.rescan(&s, Uuid::new_v4()).await.unwrap();
        assert_eq!(provider.get_urls(&s).0, vec!["/covers/a/cover.png"]);
    }
}
