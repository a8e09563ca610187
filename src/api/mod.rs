//! HTTP API for the MPD gateway
//!
//! One handler per resource, each owning a JSON snapshot cache. The event
//! router consumes the daemon's change stream and fans each tag out to the
//! affected handlers; every cache change is forwarded as a resource path to
//! the WebSocket hub. Handlers talk to the daemon through narrow traits so
//! tests can stand in for it.

pub mod cache;
pub mod current_song;
pub mod images;
pub mod library;
pub mod library_songs;
pub mod neighbors;
pub mod outputs;
pub mod playlist;
pub mod playlist_songs;
pub mod stats;
pub mod status;
pub mod storage;
pub mod version;
pub mod ws;

use crate::error::Result;
use crate::images::ImageProvider;
use crate::mpd::MpdEvent;
use crate::song::Song;
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::header::UPGRADE;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use current_song::{CurrentSongApi, CurrentSongHandler};
use images::ImagesHandler;
use library::{LibraryApi, LibraryHandler};
use library_songs::{LibrarySongsApi, LibrarySongsHandler};
use neighbors::{NeighborsApi, NeighborsHandler};
use outputs::{OutputsApi, OutputsHandler, OutputsStreamHandler};
use playlist::{PlaylistApi, PlaylistHandler};
use playlist_songs::{PlaylistSongsApi, PlaylistSongsHandler};
use stats::{StatsApi, StatsHandler};
use status::{StatusApi, StatusHandler};
use storage::{StorageApi, StorageHandler};
use version::{VersionApi, VersionHandler};
use ws::Hub;

pub const PATH_VERSION: &str = "/api/version";
pub const PATH_MUSIC: &str = "/api/music";
pub const PATH_MUSIC_STATS: &str = "/api/music/stats";
pub const PATH_MUSIC_PLAYLIST: &str = "/api/music/playlist";
pub const PATH_MUSIC_PLAYLIST_SONGS: &str = "/api/music/playlist/songs";
pub const PATH_MUSIC_PLAYLIST_SONGS_CURRENT: &str = "/api/music/playlist/songs/current";
pub const PATH_MUSIC_LIBRARY: &str = "/api/music/library";
pub const PATH_MUSIC_LIBRARY_SONGS: &str = "/api/music/library/songs";
pub const PATH_MUSIC_OUTPUTS: &str = "/api/music/outputs";
pub const PATH_MUSIC_OUTPUTS_STREAM: &str = outputs::PATH_OUTPUTS_STREAM;
pub const PATH_MUSIC_IMAGES: &str = "/api/music/images";
pub const PATH_MUSIC_STORAGE: &str = "/api/music/storage";
pub const PATH_MUSIC_STORAGE_NEIGHBORS: &str = "/api/music/storage/neighbors";

/// Hook applied to one song before it enters a snapshot
pub type SongHook = Arc<dyn Fn(Song) -> Song + Send + Sync>;
/// Hook applied to a song array before it enters a snapshot
pub type SongsHook = Arc<dyn Fn(Vec<Song>) -> Vec<Song> + Send + Sync>;

/// The daemon as seen by the handlers, one narrow interface per resource
#[derive(Clone)]
pub struct Daemon {
    pub version: Arc<dyn VersionApi>,
    pub status: Arc<dyn StatusApi>,
    pub library: Arc<dyn LibraryApi>,
    pub library_songs: Arc<dyn LibrarySongsApi>,
    pub playlist: Arc<dyn PlaylistApi>,
    pub playlist_songs: Arc<dyn PlaylistSongsApi>,
    pub current_song: Arc<dyn CurrentSongApi>,
    pub outputs: Arc<dyn OutputsApi>,
    pub stats: Arc<dyn StatsApi>,
    pub storage: Arc<dyn StorageApi>,
    pub neighbors: Arc<dyn NeighborsApi>,
}

impl Daemon {
    pub fn from_client(client: Arc<crate::mpd::Client>) -> Self {
        Self {
            version: client.clone(),
            status: client.clone(),
            library: client.clone(),
            library_songs: client.clone(),
            playlist: client.clone(),
            playlist_songs: client.clone(),
            current_song: client.clone(),
            outputs: client.clone(),
            stats: client.clone(),
            storage: client.clone(),
            neighbors: client,
        }
    }
}

/// Options for the API handler
pub struct ApiConfig {
    pub app_version: String,
    /// Deadline for background cache refreshes
    pub background_timeout: Duration,
    /// Output name to upstream URL pairs for the audio proxy
    pub audio_proxy: HashMap<String, String>,
    /// Skip the initial cache population (tests drive updates themselves)
    pub skip_init: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            background_timeout: Duration::from_secs(30),
            audio_proxy: HashMap::new(),
            skip_init: false,
        }
    }
}

/// All resource handlers plus the fan-out machinery
pub struct Handler {
    version: Arc<VersionHandler>,
    status: Arc<StatusHandler>,
    library: Arc<LibraryHandler>,
    library_songs: Arc<LibrarySongsHandler>,
    playlist: Arc<PlaylistHandler>,
    playlist_songs: Arc<PlaylistSongsHandler>,
    current_song: Arc<CurrentSongHandler>,
    outputs: Arc<OutputsHandler>,
    outputs_stream: Arc<OutputsStreamHandler>,
    stats: Arc<StatsHandler>,
    storage: Arc<StorageHandler>,
    neighbors: Arc<NeighborsHandler>,
    images: Arc<ImagesHandler>,
    hub: Hub,
    background_timeout: Duration,
}

impl Handler {
    /// Build every resource handler, populate the caches, and start the
    /// event router and fan-out loops.
    pub async fn new(
        daemon: Daemon,
        events: mpsc::Receiver<MpdEvent>,
        providers: Vec<Arc<dyn ImageProvider>>,
        config: ApiConfig,
    ) -> Result<Arc<Self>> {
        let images = Arc::new(ImagesHandler::new(providers)?);
        let song_hook: SongHook = {
            let images = images.clone();
            Arc::new(move |song| images.conv_song(song).0)
        };
        let songs_hook: SongsHook = {
            let images = images.clone();
            Arc::new(move |songs| images.conv_songs(songs))
        };

        let handler = Arc::new(Self {
            version: Arc::new(VersionHandler::new(daemon.version, &config.app_version)?),
            status: Arc::new(StatusHandler::new(daemon.status)?),
            library: Arc::new(LibraryHandler::new(daemon.library)?),
            library_songs: Arc::new(LibrarySongsHandler::new(
                daemon.library_songs,
                songs_hook.clone(),
            )?),
            playlist: Arc::new(PlaylistHandler::new(
                daemon.playlist,
                config.background_timeout,
            )?),
            playlist_songs: Arc::new(PlaylistSongsHandler::new(
                daemon.playlist_songs,
                songs_hook,
            )?),
            current_song: Arc::new(CurrentSongHandler::new(daemon.current_song, song_hook)?),
            outputs: Arc::new(OutputsHandler::new(
                daemon.outputs,
                config.audio_proxy.clone(),
            )?),
            outputs_stream: Arc::new(OutputsStreamHandler::new(config.audio_proxy)),
            stats: Arc::new(StatsHandler::new(daemon.stats)?),
            storage: Arc::new(StorageHandler::new(daemon.storage)?),
            neighbors: Arc::new(NeighborsHandler::new(daemon.neighbors)?),
            images,
            hub: Hub::new(),
            background_timeout: config.background_timeout,
        });

        if !config.skip_init {
            handler.version.update()?;
            handler.library_songs.update().await?;
            handler.playlist_songs.update().await?;
            handler.status.update_options().await?;
            handler.status.update().await?;
            handler.current_song.update().await?;
            handler.outputs.update().await?;
            handler.stats.update().await?;
            handler.storage.update().await?;
            handler.neighbors.update().await?;
        }
        handler.spawn_loops(events);
        Ok(handler)
    }

    /// Stop background cover resolution.
    pub async fn shutdown(&self) {
        self.images.shutdown().await;
    }

    fn spawn_loops(self: &Arc<Self>, events: mpsc::Receiver<MpdEvent>) {
        self.spawn_forward(self.version.take_changed(), PATH_VERSION);
        self.spawn_forward(self.library.take_changed(), PATH_MUSIC_LIBRARY);
        self.spawn_forward(self.playlist.take_changed(), PATH_MUSIC_PLAYLIST);
        self.spawn_forward(
            self.current_song.take_changed(),
            PATH_MUSIC_PLAYLIST_SONGS_CURRENT,
        );
        self.spawn_forward(self.outputs.take_changed(), PATH_MUSIC_OUTPUTS);
        self.spawn_forward(self.stats.take_changed(), PATH_MUSIC_STATS);
        self.spawn_forward(self.storage.take_changed(), PATH_MUSIC_STORAGE);
        self.spawn_forward(
            self.neighbors.take_changed(),
            PATH_MUSIC_STORAGE_NEIGHBORS,
        );
        self.spawn_forward(self.images.take_changed(), PATH_MUSIC_IMAGES);

        // status changes feed the library flag and the playlist position
        {
            let h = self.clone();
            let mut rx = self.status.take_changed();
            tokio::spawn(async move {
                while rx.recv().await.is_some() {
                    h.hub.broadcast(PATH_MUSIC);
                    let (song, updating) = h.status.last();
                    if let Err(err) = h.library.update_updating(updating) {
                        warn!(%err, "library snapshot failed");
                    }
                    if let Some(pos) = song {
                        if pos >= 0 {
                            h.playlist.update_current(pos as usize);
                        }
                    }
                }
            });
        }
        // library changes invalidate the sort view and seed the rescan set
        {
            let h = self.clone();
            let mut rx = self.library_songs.take_changed();
            tokio::spawn(async move {
                while rx.recv().await.is_some() {
                    h.hub.broadcast(PATH_MUSIC_LIBRARY_SONGS);
                    let data = h.library_songs.data();
                    h.playlist.update_library_songs(data.clone());
                    h.images.update_library_songs(data);
                }
            });
        }
        // queue changes drive stale-sort detection
        {
            let h = self.clone();
            let mut rx = self.playlist_songs.take_changed();
            tokio::spawn(async move {
                while rx.recv().await.is_some() {
                    h.hub.broadcast(PATH_MUSIC_PLAYLIST_SONGS);
                    h.playlist.update_playlist_songs(h.playlist_songs.data());
                }
            });
        }
        // batch busy/idle transitions; resolved covers re-enter the song
        // caches once the batch goes idle
        {
            let h = self.clone();
            let mut rx = self.images.take_batch_events();
            tokio::spawn(async move {
                while let Some(updating) = rx.recv().await {
                    if let Err(err) = h.images.set_updating(updating) {
                        warn!(%err, "images snapshot failed");
                    }
                    if !updating {
                        h.refresh(PATH_MUSIC_PLAYLIST_SONGS_CURRENT, h.current_song.update())
                            .await;
                        h.refresh(PATH_MUSIC_LIBRARY_SONGS, h.library_songs.update())
                            .await;
                    }
                }
            });
        }
        {
            let h = self.clone();
            tokio::spawn(h.run_event_router(events));
        }
    }

    fn spawn_forward(self: &Arc<Self>, mut rx: mpsc::Receiver<()>, path: &'static str) {
        let hub = self.hub.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                hub.broadcast(path);
            }
        });
    }

    async fn refresh<F>(&self, name: &str, update: F)
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.background_timeout, update).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(resource = name, %err, "refresh failed"),
            Err(_) => warn!(resource = name, "refresh deadline exceeded"),
        }
    }

    async fn refresh_all(&self) {
        let _ = self.version.update();
        self.refresh(PATH_MUSIC_LIBRARY_SONGS, self.library_songs.update())
            .await;
        self.refresh(PATH_MUSIC_PLAYLIST_SONGS, self.playlist_songs.update())
            .await;
        self.refresh(PATH_MUSIC, self.status.update_options()).await;
        self.refresh(PATH_MUSIC, self.status.update()).await;
        self.refresh(
            PATH_MUSIC_PLAYLIST_SONGS_CURRENT,
            self.current_song.update(),
        )
        .await;
        self.refresh(PATH_MUSIC_OUTPUTS, self.outputs.update()).await;
        self.refresh(PATH_MUSIC_STATS, self.stats.update()).await;
        self.refresh(PATH_MUSIC_STORAGE, self.storage.update()).await;
        self.refresh(PATH_MUSIC_STORAGE_NEIGHBORS, self.neighbors.update())
            .await;
    }

    /// Translate each daemon change tag into the resource refreshes it
    /// affects. Runs until the event stream closes, then closes every cache.
    async fn run_event_router(self: Arc<Self>, mut events: mpsc::Receiver<MpdEvent>) {
        while let Some(event) = events.recv().await {
            debug!(?event, "daemon event");
            match event {
                MpdEvent::Reconnecting => {
                    if let Err(err) = self.version.update_disconnected() {
                        warn!(%err, "version snapshot failed");
                    }
                }
                MpdEvent::Reconnect => {
                    self.refresh_all().await;
                }
                MpdEvent::Database => {
                    self.refresh(PATH_MUSIC_LIBRARY_SONGS, self.library_songs.update())
                        .await;
                    self.refresh(PATH_MUSIC, self.status.update()).await;
                    self.refresh(PATH_MUSIC_STATS, self.stats.update()).await;
                }
                MpdEvent::Playlist => {
                    self.refresh(PATH_MUSIC_PLAYLIST_SONGS, self.playlist_songs.update())
                        .await;
                }
                MpdEvent::Player => {
                    self.refresh(PATH_MUSIC, self.status.update()).await;
                    self.refresh(
                        PATH_MUSIC_PLAYLIST_SONGS_CURRENT,
                        self.current_song.update(),
                    )
                    .await;
                    self.refresh(PATH_MUSIC_STATS, self.stats.update()).await;
                }
                MpdEvent::Mixer => {
                    self.refresh(PATH_MUSIC, self.status.update()).await;
                }
                MpdEvent::Options => {
                    self.refresh(PATH_MUSIC, self.status.update_options()).await;
                    self.refresh(PATH_MUSIC, self.status.update()).await;
                }
                MpdEvent::Update => {
                    self.refresh(PATH_MUSIC, self.status.update()).await;
                }
                MpdEvent::Output => {
                    self.refresh(PATH_MUSIC_OUTPUTS, self.outputs.update()).await;
                }
                MpdEvent::Mount => {
                    self.refresh(PATH_MUSIC_STORAGE, self.storage.update()).await;
                }
                MpdEvent::Neighbor => {
                    self.refresh(PATH_MUSIC_STORAGE_NEIGHBORS, self.neighbors.update())
                        .await;
                }
            }
        }
        info!("daemon event stream closed, closing resource caches");
        self.close();
    }

    fn close(&self) {
        self.version.close();
        self.status.close();
        self.library.close();
        self.library_songs.close();
        self.playlist.close();
        self.playlist_songs.close();
        self.current_song.close();
        self.outputs.close();
        self.stats.close();
        self.storage.close();
        self.neighbors.close();
        self.images.close();
    }
}

/// Bind every resource path to its handler.
pub fn router(handler: Arc<Handler>) -> Router {
    Router::new()
        .route(PATH_VERSION, get(get_version))
        .route(PATH_MUSIC, get(get_music).post(post_music))
        .route(PATH_MUSIC_STATS, get(get_stats))
        .route(PATH_MUSIC_PLAYLIST, get(get_playlist).post(post_playlist))
        .route(PATH_MUSIC_PLAYLIST_SONGS, get(get_playlist_songs))
        .route(
            PATH_MUSIC_PLAYLIST_SONGS_CURRENT,
            get(get_playlist_songs_current),
        )
        .route(PATH_MUSIC_LIBRARY, get(get_library).post(post_library))
        .route(PATH_MUSIC_LIBRARY_SONGS, get(get_library_songs))
        .route(PATH_MUSIC_OUTPUTS, get(get_outputs).post(post_outputs))
        .route(PATH_MUSIC_OUTPUTS_STREAM, get(get_outputs_stream))
        .route(PATH_MUSIC_IMAGES, get(get_images).post(post_images))
        .route(PATH_MUSIC_STORAGE, get(get_storage))
        .route(PATH_MUSIC_STORAGE_NEIGHBORS, get(get_neighbors))
        .with_state(handler)
}

async fn get_version(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.version.serve(&headers)
}

/// Status resource, or the WebSocket event stream when the client upgrades.
async fn get_music(
    State(h): State<Arc<Handler>>,
    request: axum::extract::Request,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    let upgrade_requested = parts
        .headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if upgrade_requested {
        if let Ok(upgrade) = WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            let hub = h.hub.clone();
            return upgrade.on_upgrade(move |socket| async move { hub.run_socket(socket).await });
        }
    }
    h.status.serve(&parts.headers)
}

async fn post_music(State(h): State<Arc<Handler>>, headers: HeaderMap, body: Bytes) -> Response {
    h.status.post(&headers, &body).await
}

async fn get_stats(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.stats.serve(&headers)
}

async fn get_playlist(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.playlist.serve(&headers)
}

async fn post_playlist(State(h): State<Arc<Handler>>, headers: HeaderMap, body: Bytes) -> Response {
    h.playlist.post(&headers, &body).await
}

async fn get_playlist_songs(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.playlist_songs.serve(&headers)
}

async fn get_playlist_songs_current(
    State(h): State<Arc<Handler>>,
    headers: HeaderMap,
) -> Response {
    h.current_song.serve(&headers)
}

async fn get_library(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.library.serve(&headers)
}

async fn post_library(State(h): State<Arc<Handler>>, headers: HeaderMap, body: Bytes) -> Response {
    h.library.post(&headers, &body).await
}

async fn get_library_songs(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.library_songs.serve(&headers)
}

async fn get_outputs(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.outputs.serve(&headers)
}

async fn post_outputs(State(h): State<Arc<Handler>>, headers: HeaderMap, body: Bytes) -> Response {
    h.outputs.post(&headers, &body).await
}

async fn get_outputs_stream(
    State(h): State<Arc<Handler>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    h.outputs_stream.serve(query.get("name").map(String::as_str)).await
}

async fn get_images(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.images.serve(&headers)
}

async fn post_images(State(h): State<Arc<Handler>>, headers: HeaderMap, body: Bytes) -> Response {
    h.images.post(&headers, &body)
}

async fn get_storage(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.storage.serve(&headers)
}

async fn get_neighbors(State(h): State<Arc<Handler>>, headers: HeaderMap) -> Response {
    h.neighbors.serve(&headers)
}
