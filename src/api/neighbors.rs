//! Storage neighbors resource
//!
//! Neighbor name to URI mapping, same error policy as the storage resource:
//! a command error from an old daemon yields an empty map, not a failure.

use super::cache::ResourceCache;
use super::storage::HttpStorage;
use crate::error::Result;
use crate::mpd::MpdError;
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::response::Response;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Daemon interface for the neighbors resource
#[async_trait]
pub trait NeighborsApi: Send + Sync {
    async fn list_neighbors(&self) -> std::result::Result<Vec<HashMap<String, String>>, MpdError>;
}

#[async_trait]
impl NeighborsApi for crate::mpd::Client {
    async fn list_neighbors(&self) -> std::result::Result<Vec<HashMap<String, String>>, MpdError> {
        crate::mpd::Client::list_neighbors(self).await
    }
}

pub struct NeighborsHandler {
    mpd: Arc<dyn NeighborsApi>,
    cache: ResourceCache,
}

impl NeighborsHandler {
    pub fn new(mpd: Arc<dyn NeighborsApi>) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&BTreeMap::<String, HttpStorage>::new())?,
        })
    }

    pub async fn update(&self) -> Result<()> {
        let neighbors = match self.mpd.list_neighbors().await {
            Ok(neighbors) => neighbors,
            Err(err) if err.is_command_error() => {
                self.cache
                    .set_if_modified(&BTreeMap::<String, HttpStorage>::new())?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let mut data = BTreeMap::new();
        for neighbor in neighbors {
            let name = neighbor.get("name").cloned().unwrap_or_default();
            data.insert(
                name,
                HttpStorage {
                    uri: neighbor.get("neighbor").cloned(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeNeighbors(Mutex<std::result::Result<Vec<HashMap<String, String>>, bool>>);

    #[async_trait]
    impl NeighborsApi for FakeNeighbors {
        async fn list_neighbors(
            &self,
        ) -> std::result::Result<Vec<HashMap<String, String>>, MpdError> {
            match &*self.0.lock().unwrap() {
                Ok(neighbors) => Ok(neighbors.clone()),
                Err(true) => Err(MpdError::Command {
                    code: 5,
                    index: 0,
                    command: "listneighbors".to_string(),
                    message: "unknown command \"listneighbors\"".to_string(),
                }),
                Err(false) => Err(MpdError::Closed),
            }
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_update_maps_neighbors() {
        let mpd = Arc::new(FakeNeighbors(Mutex::new(Ok(vec![HashMap::from([
            ("neighbor".to_string(), "smb://FOO".to_string()),
            ("name".to_string(), "FOO (Samba 4.1.11-Debian)".to_string()),
        ])]))));
        let handler = NeighborsHandler::new(mpd).unwrap();
        handler.update().await.unwrap();
        assert_eq!(
            body_string(handler.serve(&HeaderMap::new())).await,
            r#"{"FOO (Samba 4.1.11-Debian)":{"uri":"smb://FOO"}}"#
        );
    }

    #[tokio::test]
    async fn test_unknown_command_means_feature_absent() {
        let mpd = Arc::new(FakeNeighbors(Mutex::new(Err(true))));
        let handler = NeighborsHandler::new(mpd).unwrap();
        handler.update().await.unwrap();
        assert_eq!(body_string(handler.serve(&HeaderMap::new())).await, "{}");
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mpd = Arc::new(FakeNeighbors(Mutex::new(Err(false))));
        let handler = NeighborsHandler::new(mpd).unwrap();
        assert!(handler.update().await.is_err());
    }
}
