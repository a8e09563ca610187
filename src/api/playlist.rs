//! Playlist resource and sort coordinator
//!
//! Holds the committed sort view (sort keys, filters, minimum filter count)
//! and the current queue position. A POST computes the desired queue order
//! over the library; when the daemon queue already matches, only the play
//! position moves, otherwise the queue is rewritten asynchronously with a
//! `clear; add ...; play` batch. A one-slot semaphore gates both paths, and
//! the sort view is rolled back whenever the daemon rejects the change or
//! the queue diverges externally.

use super::cache::{error_response, ResourceCache};
use crate::error::Result;
use crate::mpd::{CommandList, MpdError};
use crate::song::{first, sort_equal, weak_filter_sort, Filter, Song};
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

/// Daemon interface for the playlist coordinator
#[async_trait]
pub trait PlaylistApi: Send + Sync {
    async fn play(&self, pos: i64) -> std::result::Result<(), MpdError>;
    async fn exec_command_list(&self, list: &CommandList) -> std::result::Result<(), MpdError>;
}

#[async_trait]
impl PlaylistApi for crate::mpd::Client {
    async fn play(&self, pos: i64) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::play(self, pos).await
    }
    async fn exec_command_list(&self, list: &CommandList) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::exec_command_list(self, list).await
    }
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Wire shape of the playlist resource; also the POST request body, where
/// `current`, `sort` and `filters` are all required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpPlaylistInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub must: usize,
}

#[derive(Default)]
struct PlaylistState {
    library: Vec<Song>,
    /// Library projected through the committed sort view
    library_sort: Option<Vec<Song>>,
    playlist: Vec<Song>,
    data: HttpPlaylistInfo,
}

pub struct PlaylistHandler {
    mpd: Arc<dyn PlaylistApi>,
    cache: ResourceCache,
    state: Mutex<PlaylistState>,
    sem: Arc<Semaphore>,
    background_timeout: Duration,
}

impl PlaylistHandler {
    pub fn new(mpd: Arc<dyn PlaylistApi>, background_timeout: Duration) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&HttpPlaylistInfo::default())?,
            state: Mutex::new(PlaylistState::default()),
            sem: Arc::new(Semaphore::new(1)),
            background_timeout,
        })
    }

    pub fn serve(&self, headers: &HeaderMap) -> Response {
        self.cache.serve(headers, None)
    }

    pub async fn post(self: &Arc<Self>, headers: &HeaderMap, body: &[u8]) -> Response {
        let req: HttpPlaylistInfo = match serde_json::from_slice(body) {
            Ok(req) => req,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        };
        let (Some(current), Some(sort), Some(filters)) = (req.current, req.sort, req.filters)
        else {
            return error_response(
                StatusCode::BAD_REQUEST,
                "current, filters and sort fields are required",
            );
        };

        let Ok(permit) = self.sem.clone().try_acquire_owned() else {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "updating playlist");
        };

        let (rewrite, kept_filters, new_pos, commands) = {
            let mut state = self.state.lock().unwrap();
            let (sorted, kept, new_pos) =
                weak_filter_sort(&state.library, &sort, &filters, req.must, current);
            let rewrite = !sort_equal(&state.playlist, &sorted);
            let mut commands = CommandList::new();
            commands.clear();
            for song in &sorted {
                commands.add(first(song, "file"));
            }
            commands.play(new_pos);
            state.library_sort = Some(sorted);
            (rewrite, kept, new_pos, commands)
        };
        if !rewrite {
            // queue already matches: only the play position moves
            self.install_sort(Some(sort), Some(kept_filters), req.must);
            let now = Utc::now();
            return match self.mpd.play(new_pos as i64).await {
                Ok(()) => self.cache.serve(headers, Some(now)),
                Err(err) => {
                    self.clear_sort();
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
                }
            };
        }

        let response = self.cache.serve(headers, Some(Utc::now()));
        drop(permit);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(Ok(_permit)) =
                tokio::time::timeout(this.background_timeout, this.sem.clone().acquire_owned())
                    .await
            else {
                return;
            };
            match tokio::time::timeout(
                this.background_timeout,
                this.mpd.exec_command_list(&commands),
            )
            .await
            {
                Ok(Ok(())) => this.install_sort(Some(sort), Some(kept_filters), req.must),
                Ok(Err(err)) => {
                    warn!(%err, "playlist rewrite failed");
                    this.clear_sort();
                }
                Err(_) => {
                    warn!("playlist rewrite deadline exceeded");
                    this.clear_sort();
                }
            }
        });
        response
    }

    /// Record the queue position reported by the latest status refresh.
    pub fn update_current(&self, pos: usize) {
        let mut state = self.state.lock().unwrap();
        state.data.current = Some(pos);
        let data = state.data.clone();
        if let Err(err) = self.cache.set_if_modified(&data) {
            warn!(%err, "playlist snapshot failed");
        }
    }

    /// Adopt a fresh queue; an externally changed queue invalidates the
    /// committed sort view.
    pub fn update_playlist_songs(&self, songs: Vec<Song>) {
        let stale = {
            let mut state = self.state.lock().unwrap();
            state.playlist = songs;
            state.data.sort.is_some()
                && !sort_equal(
                    &state.playlist,
                    state.library_sort.as_deref().unwrap_or_default(),
                )
        };
        if stale {
            self.clear_sort();
        }
    }

    /// Adopt a fresh library; the previous sort view no longer applies.
    pub fn update_library_songs(&self, songs: Vec<Song>) {
        {
            let mut state = self.state.lock().unwrap();
            state.library = songs;
            state.library_sort = None;
        }
        self.clear_sort();
    }

    fn install_sort(&self, sort: Option<Vec<String>>, filters: Option<Vec<Filter>>, must: usize) {
        let mut state = self.state.lock().unwrap();
        state.data.sort = sort;
        state.data.filters = filters;
        state.data.must = must;
        let data = state.data.clone();
        if let Err(err) = self.cache.set_if_modified(&data) {
            warn!(%err, "playlist snapshot failed");
        }
    }

    fn clear_sort(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.library_sort = None;
        }
        self.install_sort(None, None, 0);
    }

    pub fn take_changed(&self) -> mpsc::Receiver<()> {
        self.cache.take_changed()
    }

    pub fn close(&self) {
        self.cache.close();
    }
}
