//! Server statistics resource
//!
//! Selected integer counters coerced from the daemon's string map. Missing
//! keys default to zero; malformed integers fail the refresh and leave the
//! previous snapshot in place. The snapshot is installed unconditionally so
//! clients can derive the current play time from `Last-Modified`.

use super::cache::ResourceCache;
use crate::error::{Error, Result};
use crate::mpd::MpdError;
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Daemon interface for the stats resource
#[async_trait]
pub trait StatsApi: Send + Sync {
    async fn stats(&self) -> std::result::Result<HashMap<String, String>, MpdError>;
}

#[async_trait]
impl StatsApi for crate::mpd::Client {
    async fn stats(&self) -> std::result::Result<HashMap<String, String>, MpdError> {
        crate::mpd::Client::stats(self).await
    }
}

#[derive(Debug, Default, Serialize)]
struct HttpStats {
    uptime: i64,
    playtime: i64,
    artists: i64,
    albums: i64,
    songs: i64,
    library_playtime: i64,
    library_update: i64,
}

pub struct StatsHandler {
    mpd: Arc<dyn StatsApi>,
    cache: ResourceCache,
}

impl StatsHandler {
    pub fn new(mpd: Arc<dyn StatsApi>) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&HttpStats::default())?,
        })
    }

    pub async fn update(&self) -> Result<()> {
        let raw = self.mpd.stats().await?;
        let field = |key: &str| -> Result<i64> {
            match raw.get(key) {
                None => Ok(0),
                Some(value) => value.parse().map_err(|_| {
                    Error::Mpd(MpdError::Protocol(format!("stats {key}: {value}")))
                }),
            }
        };
        let stats = HttpStats {
            uptime: field("uptime")?,
            playtime: field("playtime")?,
            artists: field("artists")?,
            albums: field("albums")?,
            songs: field("songs")?,
            library_playtime: field("db_playtime")?,
            library_update: field("db_update")?,
        };
        self.cache.set(&stats)?;
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
