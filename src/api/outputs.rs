//! Audio outputs resource and stream proxy
//!
//! GET maps output id to name, plugin, enabled flag, attributes, and the
//! proxied stream URL when one is configured. POST applies partial updates
//! per output; command failures abort with 500 and already-applied changes
//! are not rolled back.

use super::cache::{error_response, ResourceCache};
use crate::error::Result;
use crate::mpd::{MpdError, MpdOutput};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub const PATH_OUTPUTS_STREAM: &str = "/api/music/outputs/stream";

/// Daemon interface for the outputs resource
#[async_trait]
pub trait OutputsApi: Send + Sync {
    async fn outputs(&self) -> std::result::Result<Vec<MpdOutput>, MpdError>;
    async fn enable_output(&self, id: &str) -> std::result::Result<(), MpdError>;
    async fn disable_output(&self, id: &str) -> std::result::Result<(), MpdError>;
    async fn output_set(
        &self,
        id: &str,
        name: &str,
        value: &str,
    ) -> std::result::Result<(), MpdError>;
}

#[async_trait]
impl OutputsApi for crate::mpd::Client {
    async fn outputs(&self) -> std::result::Result<Vec<MpdOutput>, MpdError> {
        crate::mpd::Client::outputs(self).await
    }
    async fn enable_output(&self, id: &str) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::enable_output(self, id).await
    }
    async fn disable_output(&self, id: &str) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::disable_output(self, id).await
    }
    async fn output_set(
        &self,
        id: &str,
        name: &str,
        value: &str,
    ) -> std::result::Result<(), MpdError> {
        crate::mpd::Client::output_set(self, id, name, value).await
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HttpOutputAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dop: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_formats: Option<Vec<String>>,
}

/// Wire shape of one output; also the POST body value, where every field is
/// optional.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HttpOutput {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin: String,
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HttpOutputAttributes>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream: String,
}

pub struct OutputsHandler {
    mpd: Arc<dyn OutputsApi>,
    cache: ResourceCache,
    proxy: HashMap<String, String>,
}

impl OutputsHandler {
    pub fn new(mpd: Arc<dyn OutputsApi>, proxy: HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            mpd,
            cache: ResourceCache::new(&BTreeMap::<String, HttpOutput>::new())?,
            proxy,
        })
    }

    pub async fn update(&self) -> Result<()> {
        let outputs = self.mpd.outputs().await?;
        let mut data = BTreeMap::new();
        for output in outputs {
            let stream = if self.proxy.contains_key(&output.name) {
                let query: String = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("name", &output.name)
                    .finish();
                format!("{PATH_OUTPUTS_STREAM}?{query}")
            } else {
                String::new()
            };
            let attributes = if output.attributes.is_empty() {
                None
            } else {
                Some(HttpOutputAttributes {
                    dop: output.attributes.get("dop").map(|v| v == "1"),
                    allowed_formats: output.attributes.get("allowed_formats").map(|v| {
                        if v.is_empty() {
                            Vec::new()
                        } else {
                            v.split(' ').map(str::to_string).collect()
                        }
                    }),
                })
            };
            data.insert(
                output.id,
                HttpOutput {
                    name: output.name,
                    plugin: output.plugin,
                    enabled: Some(output.enabled),
                    attributes,
                    stream,
                },
            );
        }
        self.cache.set_if_modified(&data)?;
        Ok(())
    }

    pub fn serve(&self, headers: &HeaderMap) -> Response {
        self.cache.serve(headers, None)
    }

    pub async fn post(&self, headers: &HeaderMap, body: &[u8]) -> Response {
        let req: BTreeMap<String, HttpOutput> = match serde_json::from_slice(body) {
            Ok(req) => req,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        };
        let now = Utc::now();
        let mut changed = false;
        for (id, output) in &req {
            if let Some(enabled) = output.enabled {
                changed = true;
                let result = if enabled {
                    self.mpd.enable_output(id).await
                } else {
                    self.mpd.disable_output(id).await
                };
                if let Err(err) = result {
                    return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
                }
            }
            if let Some(attributes) = &output.attributes {
                if let Some(dop) = attributes.dop {
                    changed = true;
                    let value = if dop { "1" } else { "0" };
                    if let Err(err) = self.mpd.output_set(id, "dop", value).await {
                        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
                    }
                }
                if let Some(formats) = &attributes.allowed_formats {
                    changed = true;
                    let value = formats.join(" ");
                    if let Err(err) = self.mpd.output_set(id, "allowed_formats", &value).await {
                        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
                    }
                }
            }
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

/// One-shot copy of an upstream audio stream for a configured output
pub struct OutputsStreamHandler {
    proxy: HashMap<String, String>,
    client: reqwest::Client,
}

impl OutputsStreamHandler {
    pub fn new(proxy: HashMap<String, String>) -> Self {
        Self {
            proxy,
            client: reqwest::Client::new(),
        }
    }

    pub async fn serve(&self, name: Option<&str>) -> Response {
        let Some(upstream) = name.and_then(|n| self.proxy.get(n)) else {
            return error_response(StatusCode::NOT_FOUND, "stream not found");
        };
        match self.client.get(upstream).send().await {
            Ok(upstream_response) => {
                let mut builder = Response::builder().status(upstream_response.status());
                for (key, value) in upstream_response.headers() {
                    builder = builder.header(key, value);
                }
                builder
                    .body(Body::from_stream(upstream_response.bytes_stream()))
                    .unwrap_or_else(|_| {
                        error_response(StatusCode::INTERNAL_SERVER_ERROR, "stream copy failed")
                    })
            }
            Err(err) => {
                warn!(upstream = %upstream, %err, "audio stream request failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
            }
        }
    }
}
