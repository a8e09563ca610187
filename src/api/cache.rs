//! Per-resource JSON snapshot cache
//!
//! Each resource holds its most recent serialized snapshot, a pre-compressed
//! gzip form, and the instant it was installed. GETs are served straight
//! from the snapshot with conditional-request semantics; installs announce
//! themselves on a single-slot coalescing channel.
//!
//! Serialization and compression happen before the write lock is taken, so
//! the critical section only swaps fields.

use crate::error::Result;
use axum::body::{Body, Bytes};
use axum::http::header::{
    ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, VARY,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::Write;
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;

const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

struct Snapshot {
    json: Bytes,
    gzip: Option<Bytes>,
    date: DateTime<Utc>,
}

/// Cacheable JSON resource with change notification
pub struct ResourceCache {
    state: RwLock<Snapshot>,
    changed_tx: Mutex<Option<mpsc::Sender<()>>>,
    changed_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ResourceCache {
    /// Create a cache holding the zero-value snapshot of the resource.
    pub fn new<T: Serialize>(initial: &T) -> Result<Self> {
        let (json, gzip) = encode(initial)?;
        let (tx, rx) = mpsc::channel(1);
        Ok(Self {
            state: RwLock::new(Snapshot {
                json,
                gzip,
                date: Utc::now(),
            }),
            changed_tx: Mutex::new(Some(tx)),
            changed_rx: Mutex::new(Some(rx)),
        })
    }

    /// Install a snapshot unconditionally, refreshing `Last-Modified` even
    /// when the bytes did not change.
    pub fn set<T: Serialize>(&self, value: &T) -> Result<bool> {
        self.install(value, true)
    }

    /// Install a snapshot only when its bytes differ from the current one.
    /// Returns whether anything changed.
    pub fn set_if_modified<T: Serialize>(&self, value: &T) -> Result<bool> {
        self.install(value, false)
    }

    fn install<T: Serialize>(&self, value: &T, force: bool) -> Result<bool> {
        let (json, gzip) = encode(value)?;
        let mut state = self.state.write().unwrap();
        if force || state.json != json {
            state.json = json;
            state.gzip = gzip;
            state.date = Utc::now();
            drop(state);
            if let Some(tx) = self.changed_tx.lock().unwrap().as_ref() {
                let _ = tx.try_send(());
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Change-notification stream: at most one pending notification per
    /// installed snapshot. May be taken once.
    pub fn take_changed(&self) -> mpsc::Receiver<()> {
        self.changed_rx
            .lock()
            .unwrap()
            .take()
            .expect("change stream already taken")
    }

    /// Close the change stream; pending receivers observe end-of-stream.
    pub fn close(&self) {
        self.changed_tx.lock().unwrap().take();
    }

    /// Serve the current snapshot with conditional-request handling.
    ///
    /// `update_time` is the POST handlers' hint: a snapshot older than the
    /// hint is served as 202 because the caller's action is not reflected
    /// yet.
    pub fn serve(&self, headers: &HeaderMap, update_time: Option<DateTime<Utc>>) -> Response {
        let (json, gzip, date) = {
            let state = self.state.read().unwrap();
            (state.json.clone(), state.gzip.clone(), state.date)
        };
        let etag = format!("\"{}.{}\"", date.timestamp(), date.timestamp_subsec_nanos());
        if none_match(headers, &etag) || !modified_since(headers, date) {
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(Body::empty())
                .unwrap();
        }
        let status = match update_time {
            Some(hint) if hint > date => StatusCode::ACCEPTED,
            _ => StatusCode::OK,
        };
        let mut builder = Response::builder()
            .status(status)
            .header(CACHE_CONTROL, "max-age=0")
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(LAST_MODIFIED, http_date(date))
            .header(VARY, "Accept-Encoding")
            .header(ETAG, etag);
        let body = match gzip {
            Some(gz) if accepts_gzip(headers) => {
                builder = builder.header(CONTENT_ENCODING, "gzip");
                gz
            }
            _ => json,
        };
        builder = builder.header(CONTENT_LENGTH, body.len());
        builder.body(Body::from(body)).unwrap()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<(Bytes, Option<Bytes>)> {
    let json = serde_json::to_vec(value)?;
    let gzip = gzip_encode(&json);
    Ok((Bytes::from(json), gzip))
}

/// Compress a snapshot; a failure leaves the raw bytes authoritative.
fn gzip_encode(data: &[u8]) -> Option<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    Some(Bytes::from(encoder.finish().ok()?))
}

/// Format an instant as an RFC 7231 HTTP date.
pub fn http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn none_match(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    value
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == etag || candidate == "*")
}

/// Whether the snapshot is newer than the request's `If-Modified-Since`
/// header, at one-second resolution. No header means modified.
fn modified_since(headers: &HeaderMap, date: DateTime<Utc>) -> bool {
    let Some(since) = headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
    else {
        return true;
    };
    date.timestamp() > since.timestamp()
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"))
}

/// JSON error body with the message verbatim.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))
        .unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
        .header(CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::HeaderValue;

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn etag_of(response: &Response) -> String {
        response
            .headers()
            .get(ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_serves_snapshot_with_headers() {
        let cache = ResourceCache::new(&serde_json::json!({"updating": false})).unwrap();
        let response = cache.serve(&HeaderMap::new(), None);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(response.headers().get(VARY).unwrap(), "Accept-Encoding");
        let length: usize = response
            .headers()
            .get(CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = body_bytes(response).await;
        assert_eq!(body.len(), length);
        assert_eq!(body, br#"{"updating":false}"#);
    }

    #[tokio::test]
    async fn test_if_none_match_yields_304() {
        let cache = ResourceCache::new(&serde_json::json!([])).unwrap();
        let first = cache.serve(&HeaderMap::new(), None);
        let etag = etag_of(&first);

        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_str(&etag).unwrap());
        let second = cache.serve(&headers, None);
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert!(body_bytes(second).await.is_empty());

        // a new install invalidates the etag
        cache.set(&serde_json::json!(["x"])).unwrap();
        let third = cache.serve(&headers, None);
        assert_eq!(third.status(), StatusCode::OK);
        assert_ne!(etag_of(&third), etag);
    }

    #[tokio::test]
    async fn test_if_modified_since_yields_304() {
        let cache = ResourceCache::new(&serde_json::json!([])).unwrap();
        let response = cache.serve(&HeaderMap::new(), None);
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_str(&last_modified).unwrap(),
        );
        let conditional = cache.serve(&headers, None);
        assert_eq!(conditional.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_gzip_body_when_accepted() {
        let cache = ResourceCache::new(&serde_json::json!({"k": "v"})).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        let response = cache.serve(&headers, None);
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        let length: usize = response
            .headers()
            .get(CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = body_bytes(response).await;
        assert_eq!(body.len(), length);
        // gzip magic bytes
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test]
    async fn test_update_time_hint_yields_202() {
        let cache = ResourceCache::new(&serde_json::json!({})).unwrap();
        let response = cache.serve(&HeaderMap::new(), Some(Utc::now() + chrono::Duration::seconds(1)));
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        cache.set(&serde_json::json!({"fresh": true})).unwrap();
        let past = Utc::now() - chrono::Duration::seconds(1);
        let response = cache.serve(&HeaderMap::new(), Some(past));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_set_if_modified_skips_identical_bytes() {
        let cache = ResourceCache::new(&serde_json::json!({"n": 1})).unwrap();
        let mut changed = cache.take_changed();

        assert!(!cache.set_if_modified(&serde_json::json!({"n": 1})).unwrap());
        assert!(changed.try_recv().is_err());

        assert!(cache.set_if_modified(&serde_json::json!({"n": 2})).unwrap());
        assert!(changed.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_change_notifications_coalesce() {
        let cache = ResourceCache::new(&serde_json::json!(0)).unwrap();
        let mut changed = cache.take_changed();
        cache.set(&serde_json::json!(1)).unwrap();
        cache.set(&serde_json::json!(2)).unwrap();
        cache.set(&serde_json::json!(3)).unwrap();
        assert!(changed.try_recv().is_ok());
        assert!(changed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_change_stream() {
        let cache = ResourceCache::new(&serde_json::json!(0)).unwrap();
        let mut changed = cache.take_changed();
        cache.close();
        assert!(changed.recv().await.is_none());
        // installs after close still work, they just announce to nobody
        assert!(cache.set(&serde_json::json!(1)).unwrap());
    }

    #[tokio::test]
    async fn test_instants_non_decreasing() {
        let cache = ResourceCache::new(&serde_json::json!(0)).unwrap();
        let first = cache.serve(&HeaderMap::new(), None);
        cache.set(&serde_json::json!(1)).unwrap();
        let second = cache.serve(&HeaderMap::new(), None);
        let parse = |r: &Response| {
            let etag = etag_of(r);
            let inner = etag.trim_matches('"').to_string();
            let (secs, nanos) = inner.split_once('.').unwrap();
            (secs.parse::<i64>().unwrap(), nanos.parse::<u32>().unwrap())
        };
        assert!(parse(&second) >= parse(&first));
    }
}
