//! Storage mounts resource
//!
//! Mount name to URI mapping. Daemons built without mount support reject
//! `listmounts` with a command error; that is treated as "feature absent"
//! and the resource becomes an empty map.

use super::cache::ResourceCache;
use crate::error::Result;
use crate::mpd::MpdError;
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Daemon interface for the storage resource
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_mounts(&self) -> std::result::Result<Vec<HashMap<String, String>>, MpdError>;
}

#[async_trait]
impl StorageApi for crate::mpd::Client {
    async fn list_mounts(&self) -> std::result::Result<Vec<HashMap<String, String>>, MpdError> {
        crate::mpd::Client::list_mounts(self).await
    }
}

/// Wire shape shared with the neighbors resource
#[derive(Debug, Serialize)]
pub struct HttpStorage {
    pub uri: Option<String>,
}

pub struct StorageHandler {
    mpd: Arc<dyn StorageApi>,
    cache: ResourceCache,
}

impl StorageHandler {
    pub fn new(mpd: Arc<dyn StorageApi>) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&BTreeMap::<String, HttpStorage>::new())?,
        })
    }

    pub async fn update(&self) -> Result<()> {
        let mounts = match self.mpd.list_mounts().await {
            Ok(mounts) => mounts,
            Err(err) if err.is_command_error() => {
                // old daemon without mount support
                self.cache
                    .set_if_modified(&BTreeMap::<String, HttpStorage>::new())?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let mut data = BTreeMap::new();
        for mount in mounts {
            let name = mount.get("mount").cloned().unwrap_or_default();
            data.insert(
                name,
                HttpStorage {
                    uri: mount.get("storage").cloned(),
                },
            );
        }
        self.cache.set_if_modified(&data)?;
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
