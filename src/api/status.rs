//! Playback status resource
//!
//! GET mirrors the daemon's `status` output. POST dispatches each present
//! field to the matching daemon command and answers 202 with the last-known
//! snapshot; the daemon's follow-up event triggers the real refresh. The
//! snapshot is installed unconditionally so `Last-Modified` always moves,
//! letting clients compute the current elapsed time.

use super::cache::{error_response, ResourceCache};
use crate::error::Result;
use crate::mpd::MpdError;
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Daemon interface for the status resource
#[async_trait]
pub trait StatusApi: Send + Sync {
    async fn status(&self) -> std::result::Result<HashMap<String, String>, MpdError>;
    async fn replay_gain_status(&self) -> std::result::Result<HashMap<String, String>, MpdError>;
    async fn set_vol(&self, volume: i64) -> std::result::Result<(), MpdError>;
    async fn repeat(&self, enable: bool) -> std::result::Result<(), MpdError>;
    async fn random(&self, enable: bool) -> std::result::Result<(), MpdError>;
    async fn single(&self, enable: bool) -> std::result::Result<(), MpdError>;
    async fn one_shot(&self) -> std::result::Result<(), MpdError>;
    async fn consume(&self, enable: bool) -> std::result::Result<(), MpdError>;
    async fn seek_cur(&self, seconds: f64) -> std::result::Result<(), MpdError>;
    async fn replay_gain_mode(&self, mode: &str) -> std::result::Result<(), MpdError>;
    async fn crossfade(&self, duration: Duration) -> std::result::Result<(), MpdError>;
    async fn play(&self, pos: i64) -> std::result::Result<(), MpdError>;
    async fn pause(&self, enable: bool) -> std::result::Result<(), MpdError>;
    async fn next(&self) -> std::result::Result<(), MpdError>;
    async fn previous(&self) -> std::result::Result<(), MpdError>;
}

#[async_trait]
impl StatusApi for crate::mpd::Client {
    async fn status(&self) -> std::result::Result<HashMap<String, String>, MpdError> {
        crate::mpd::Client::status(self).await
    }
    async fn replay_gain_status(&self) -> std::result::Result<HashMap<String, String>, MpdError> {
        crate::mpd::Client::replay_gain_status(self).await
    }
    async fn set_vol(&self, volume: i64) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::set_vol(self, volume).await
    }
    async fn repeat(&self, enable: bool) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::repeat(self, enable).await
    }
    async fn random(&self, enable: bool) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::random(self, enable).await
    }
    async fn single(&self, enable: bool) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::single(self, enable).await
    }
    async fn one_shot(&self) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::one_shot(self).await
    }
    async fn consume(&self, enable: bool) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::consume(self, enable).await
    }
    async fn seek_cur(&self, seconds: f64) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::seek_cur(self, seconds).await
    }
    async fn replay_gain_mode(&self, mode: &str) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::replay_gain_mode(self, mode).await
    }
    async fn crossfade(&self, duration: Duration) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::crossfade(self, duration).await
    }
    async fn play(&self, pos: i64) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::play(self, pos).await
    }
    async fn pause(&self, enable: bool) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::pause(self, enable).await
    }
    async fn next(&self) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::next(self).await
    }
    async fn previous(&self) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::previous(self).await
    }
}

/// Wire shape of the status resource; also the POST request body, where any
/// subset of fields may be present.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HttpStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oneshot: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consume: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_elapsed: Option<f64>,
    pub replay_gain: Option<String>,
    pub crossfade: Option<i64>,
}

#[derive(Default)]
struct StatusData {
    /// Queue position of the current song, from the last refresh
    song: Option<i64>,
    /// Whether the daemon reported a running database update
    updating_db: bool,
    replay_gain_mode: String,
}

pub struct StatusHandler {
    mpd: Arc<dyn StatusApi>,
    cache: ResourceCache,
    data: Mutex<StatusData>,
}

impl StatusHandler {
    pub fn new(mpd: Arc<dyn StatusApi>) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&HttpStatus::default())?,
            data: Mutex::new(StatusData::default()),
        })
    }

    /// Refresh replay-gain options; `options` events fire this before the
    /// status refresh so the snapshot carries the current mode.
    pub async fn update_options(&self) -> Result<()> {
        let options = self.mpd.replay_gain_status().await?;
        let mode = options.get("replay_gain_mode").cloned().unwrap_or_default();
        self.data.lock().unwrap().replay_gain_mode = mode;
        Ok(())
    }

    pub async fn update(&self) -> Result<()> {
        let s = self.mpd.status().await?;
        let volume = s
            .get("volume")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v >= 0);
        let song = s.get("song").and_then(|v| v.parse::<i64>().ok());
        let elapsed = s
            .get("elapsed")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        let crossfade = s
            .get("xfade")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let single = s.get("single").map(String::as_str).unwrap_or("");
        let replay_gain = self.data.lock().unwrap().replay_gain_mode.clone();
        let status = HttpStatus {
            volume,
            repeat: Some(s.get("repeat").map(String::as_str) == Some("1")),
            random: Some(s.get("random").map(String::as_str) == Some("1")),
            single: Some(single == "1"),
            oneshot: Some(single == "oneshot"),
            consume: Some(s.get("consume").map(String::as_str) == Some("1")),
            state: Some(s.get("state").cloned().unwrap_or_default()),
            song_elapsed: Some(elapsed),
            replay_gain: Some(replay_gain),
            crossfade: Some(crossfade),
        };
        self.cache.set(&status)?;
        let mut data = self.data.lock().unwrap();
        data.song = song;
        data.updating_db = s.contains_key("updating_db");
        Ok(())
    }

    /// Current queue position and database-updating flag from the last
    /// refresh, for the playlist and library resources.
    pub fn last(&self) -> (Option<i64>, bool) {
        let data = self.data.lock().unwrap();
        (data.song, data.updating_db)
    }

    pub fn serve(&self, headers: &HeaderMap) -> Response {
        self.cache.serve(headers, None)
    }

    /// Dispatch a POST body to daemon commands and answer with the cached
    /// snapshot, 202 while the change is not yet reflected.
    pub async fn post(&self, headers: &HeaderMap, body: &[u8]) -> Response {
        let req: HttpStatus = match serde_json::from_slice(body) {
            Ok(req) => req,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        };
        let now = Utc::now();
        let mut changed = false;
        macro_rules! dispatch {
            ($call:expr) => {
                if let Err(err) = $call.await {
                    return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
                }
                changed = true;
            };
        }
        if let Some(volume) = req.volume {
            dispatch!(self.mpd.set_vol(volume));
        }
        if let Some(repeat) = req.repeat {
            dispatch!(self.mpd.repeat(repeat));
        }
        if let Some(random) = req.random {
            dispatch!(self.mpd.random(random));
        }
        if let Some(single) = req.single {
            dispatch!(self.mpd.single(single));
        }
        if req.oneshot == Some(true) {
            dispatch!(self.mpd.one_shot());
        }
        if let Some(consume) = req.consume {
            dispatch!(self.mpd.consume(consume));
        }
        if let Some(elapsed) = req.song_elapsed {
            dispatch!(self.mpd.seek_cur(elapsed));
        }
        if let Some(mode) = &req.replay_gain {
            dispatch!(self.mpd.replay_gain_mode(mode));
        }
        if let Some(seconds) = req.crossfade {
            dispatch!(self.mpd.crossfade(Duration::from_secs(seconds.max(0) as u64)));
        }
        if let Some(state) = &req.state {
            let result = match state.as_str() {
                "play" => self.mpd.play(-1).await,
                "pause" => self.mpd.pause(true).await,
                "next" => self.mpd.next().await,
                "previous" => self.mpd.previous().await,
                other => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        &format!("unknown state: {other}"),
                    )
                }
            };
            if let Err(err) = result {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
            }
            changed = true;
        }
        self.cache.serve(headers, changed.then_some(now))
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
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeStatus {
        status: Mutex<HashMap<String, String>>,
        replay_gain: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<String>>,
        fail: Mutex<VecDeque<MpdError>>,
    }

    impl FakeStatus {
        fn record(&self, call: &str) -> std::result::Result<(), MpdError> {
            self.calls.lock().unwrap().push(call.to_string());
            match self.fail.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl StatusApi for FakeStatus {
        async fn status(&self) -> std::result::Result<HashMap<String, String>, MpdError> {
            Ok(self.status.lock().unwrap().clone())
        }
        async fn replay_gain_status(
            &self,
        ) -> std::result::Result<HashMap<String, String>, MpdError> {
            Ok(self.replay_gain.lock().unwrap().clone())
        }
        async fn set_vol(&self, volume: i64) -> std::result::Result<(), MpdError> {
            self.record(&format!("setvol {volume}"))
        }
        async fn repeat(&self, enable: bool) -> std::result::Result<(), MpdError> {
            self.record(&format!("repeat {enable}"))
        }
        async fn random(&self, enable: bool) -> std::result::Result<(), MpdError> {
            self.record(&format!("random {enable}"))
        }
        async fn single(&self, enable: bool) -> std::result::Result<(), MpdError> {
            self.record(&format!("single {enable}"))
        }
        async fn one_shot(&self) -> std::result::Result<(), MpdError> {
            self.record("oneshot")
        }
        async fn consume(&self, enable: bool) -> std::result::Result<(), MpdError> {
            self.record(&format!("consume {enable}"))
        }
        async fn seek_cur(&self, seconds: f64) -> std::result::Result<(), MpdError> {
            self.record(&format!("seekcur {seconds}"))
        }
        async fn replay_gain_mode(&self, mode: &str) -> std::result::Result<(), MpdError> {
            self.record(&format!("replay_gain_mode {mode}"))
        }
        async fn crossfade(&self, duration: Duration) -> std::result::Result<(), MpdError> {
            self.record(&format!("crossfade {}", duration.as_secs()))
        }
        async fn play(&self, pos: i64) -> std::result::Result<(), MpdError> {
            self.record(&format!("play {pos}"))
        }
        async fn pause(&self, enable: bool) -> std::result::Result<(), MpdError> {
            self.record(&format!("pause {enable}"))
        }
        async fn next(&self) -> std::result::Result<(), MpdError> {
            self.record("next")
        }
        async fn previous(&self) -> std::result::Result<(), MpdError> {
            self.record("previous")
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn playing_status() -> HashMap<String, String> {
        HashMap::from([
            ("volume".to_string(), "42".to_string()),
            ("repeat".to_string(), "0".to_string()),
            ("random".to_string(), "1".to_string()),
            ("single".to_string(), "oneshot".to_string()),
            ("consume".to_string(), "0".to_string()),
            ("state".to_string(), "play".to_string()),
            ("song".to_string(), "2".to_string()),
            ("elapsed".to_string(), "12.5".to_string()),
            ("xfade".to_string(), "3".to_string()),
        ])
    }

    #[tokio::test]
    async fn test_update_mirrors_daemon_status() {
        let mpd = Arc::new(FakeStatus::default());
        *mpd.status.lock().unwrap() = playing_status();
        let handler = StatusHandler::new(mpd).unwrap();
        handler.update().await.unwrap();

        let body = body_json(handler.serve(&HeaderMap::new())).await;
        assert_eq!(body["volume"], 42);
        assert_eq!(body["repeat"], false);
        assert_eq!(body["random"], true);
        assert_eq!(body["single"], false);
        assert_eq!(body["oneshot"], true);
        assert_eq!(body["state"], "play");
        assert_eq!(body["song_elapsed"], 12.5);
        assert_eq!(body["crossfade"], 3);
        assert_eq!(handler.last(), (Some(2), false));
    }

    #[tokio::test]
    async fn test_update_tracks_database_updates() {
        let mpd = Arc::new(FakeStatus::default());
        mpd.status
            .lock()
            .unwrap()
            .insert("updating_db".to_string(), "1".to_string());
        let handler = StatusHandler::new(mpd).unwrap();
        handler.update().await.unwrap();
        assert_eq!(handler.last(), (None, true));
    }

    #[tokio::test]
    async fn test_options_feed_replay_gain() {
        let mpd = Arc::new(FakeStatus::default());
        mpd.replay_gain
            .lock()
            .unwrap()
            .insert("replay_gain_mode".to_string(), "album".to_string());
        let handler = StatusHandler::new(mpd).unwrap();
        handler.update_options().await.unwrap();
        handler.update().await.unwrap();
        let body = body_json(handler.serve(&HeaderMap::new())).await;
        assert_eq!(body["replay_gain"], "album");
    }

    #[tokio::test]
    async fn test_post_volume_dispatches_and_accepts() {
        let mpd = Arc::new(FakeStatus::default());
        let handler = StatusHandler::new(mpd.clone()).unwrap();
        handler.update().await.unwrap();

        let response = handler
            .post(&HeaderMap::new(), br#"{"volume":42}"#)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(*mpd.calls.lock().unwrap(), vec!["setvol 42".to_string()]);
    }

    #[tokio::test]
    async fn test_post_state_transitions() {
        let mpd = Arc::new(FakeStatus::default());
        let handler = StatusHandler::new(mpd.clone()).unwrap();
        for (body, call) in [
            (br#"{"state":"play"}"# as &[u8], "play -1"),
            (br#"{"state":"pause"}"#, "pause true"),
            (br#"{"state":"next"}"#, "next"),
            (br#"{"state":"previous"}"#, "previous"),
        ] {
            handler.post(&HeaderMap::new(), body).await;
            assert_eq!(mpd.calls.lock().unwrap().pop().unwrap(), call);
        }
    }

    #[tokio::test]
    async fn test_post_unknown_state_is_rejected() {
        let mpd = Arc::new(FakeStatus::default());
        let handler = StatusHandler::new(mpd.clone()).unwrap();
        let response = handler
            .post(&HeaderMap::new(), br#"{"state":"rewind"}"#)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unknown state: rewind");
        assert!(mpd.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_command_failure_is_500() {
        let mpd = Arc::new(FakeStatus::default());
        mpd.fail.lock().unwrap().push_back(MpdError::Closed);
        let handler = StatusHandler::new(mpd).unwrap();
        let response = handler
            .post(&HeaderMap::new(), br#"{"repeat":true}"#)
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "mpd: connection closed");
    }

    #[tokio::test]
    async fn test_post_malformed_body_is_400() {
        let mpd = Arc::new(FakeStatus::default());
        let handler = StatusHandler::new(mpd).unwrap();
        let response = handler.post(&HeaderMap::new(), b"not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
