//! Version resource
//!
//! Aggregates the gateway version, the build-time runtime descriptor, and
//! the daemon version from the connection handshake. The daemon field is
//! empty while the connection is down.

use super::cache::ResourceCache;
use crate::error::Result;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Daemon interface for the version resource
pub trait VersionApi: Send + Sync {
    /// Version from the last handshake; `None` while disconnected.
    fn version(&self) -> Option<String>;
}

impl VersionApi for crate::mpd::Client {
    fn version(&self) -> Option<String> {
        crate::mpd::Client::version(self)
    }
}

fn runtime_descriptor() -> String {
    format!(
        "{} {} {}",
        env!("MPDWEB_RUSTC_VERSION"),
        env!("MPDWEB_TARGET_OS"),
        env!("MPDWEB_TARGET_ARCH")
    )
}

#[derive(Serialize)]
struct HttpVersion {
    app: String,
    rust: String,
    mpd: String,
}

pub struct VersionHandler {
    mpd: Arc<dyn VersionApi>,
    cache: ResourceCache,
    app_version: String,
}

impl VersionHandler {
    pub fn new(mpd: Arc<dyn VersionApi>, app_version: &str) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&serde_json::Map::new())?,
            app_version: app_version.to_string(),
        })
    }

    pub fn update(&self) -> Result<()> {
        let mpd_version = match self.mpd.version() {
            Some(v) if !v.is_empty() => v,
            _ => "unknown".to_string(),
        };
        self.cache.set_if_modified(&HttpVersion {
            app: self.app_version.clone(),
            rust: runtime_descriptor(),
            mpd: mpd_version,
        })?;
        Ok(())
    }

    /// Install a snapshot marking the daemon unreachable.
    pub fn update_disconnected(&self) -> Result<()> {
        self.cache.set_if_modified(&HttpVersion {
            app: self.app_version.clone(),
            rust: runtime_descriptor(),
            mpd: String::new(),
        })?;
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
