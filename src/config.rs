//! Configuration for mpdweb
//!
//! A single TOML file covers everything that cannot change while running:
//! listen address, MPD address, the music directory used for local cover
//! lookup, and the audio proxy map. Command-line flags override the file.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loaded from TOML, with built-in defaults for every field
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// MPD server address
    #[serde(default = "default_mpd_addr")]
    pub mpd_addr: String,

    /// MPD music directory, used to resolve cover art on the local filesystem
    #[serde(default)]
    pub music_directory: Option<PathBuf>,

    /// URL prefix under which cover files are exposed
    #[serde(default = "default_cover_prefix")]
    pub cover_url_prefix: String,

    /// Deadline for background cache refreshes, in seconds
    #[serde(default = "default_background_timeout")]
    pub background_timeout_secs: u64,

    /// Output name to upstream stream URL pairs for the audio proxy
    #[serde(default)]
    pub audio_proxy: HashMap<String, String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_mpd_addr() -> String {
    "localhost:6600".to_string()
}

fn default_cover_prefix() -> String {
    "/covers".to_string()
}

fn default_background_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            mpd_addr: default_mpd_addr(),
            music_directory: None,
            cover_url_prefix: default_cover_prefix(),
            background_timeout_secs: default_background_timeout(),
            audio_proxy: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Deadline applied to every background cache refresh.
    pub fn background_timeout(&self) -> Duration {
        Duration::from_secs(self.background_timeout_secs)
    }
}
