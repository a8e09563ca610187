//! Library metadata resource
//!
//! `{updating}` derived from the status resource's `updating_db` flag. POST
//! with `{"updating":true}` asks the daemon for a full database update.

use super::cache::{error_response, ResourceCache};
use crate::error::Result;
use crate::mpd::MpdError;
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Daemon interface for the library resource
#[async_trait]
pub trait LibraryApi: Send + Sync {
    async fn update(&self, path: &str) -> std::result::Result<HashMap<String, String>, MpdError>;
}

#[async_trait]
impl LibraryApi for crate::mpd::Client {
    async fn update(&self, path: &str) -> std::result::Result<HashMap<String, String>, MpdError> {
        crate::mpd::Client::update(self, path).await
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HttpLibraryInfo {
    updating: bool,
}

pub struct LibraryHandler {
    mpd: Arc<dyn LibraryApi>,
    cache: ResourceCache,
}

impl LibraryHandler {
    pub fn new(mpd: Arc<dyn LibraryApi>) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&HttpLibraryInfo::default())?,
        })
    }

    /// Mirror the daemon's database-updating flag.
    pub fn update_updating(&self, updating: bool) -> Result<()> {
        self.cache.set_if_modified(&HttpLibraryInfo { updating })?;
        Ok(())
    }

    pub fn serve(&self, headers: &HeaderMap) -> Response {
        self.cache.serve(headers, None)
    }

    pub async fn post(&self, headers: &HeaderMap, body: &[u8]) -> Response {
        let req: HttpLibraryInfo = match serde_json::from_slice(body) {
            Ok(req) => req,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        };
        if !req.updating {
            return error_response(StatusCode::BAD_REQUEST, "requires updating=true");
        }
        let now = Utc::now();
        if let Err(err) = self.mpd.update("").await {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
        self.cache.serve(headers, Some(now))
    }

    pub fn take_changed(&self) -> mpsc::Receiver<()> {
        self.cache.take_changed()
    }

    pub fn close(&self) {
        self.cache.close();
    }
}
