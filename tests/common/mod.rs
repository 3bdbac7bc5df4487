//! Shared fixtures for integration tests
//!
//! `MockChannel` serves in-memory resources through the `Transport` trait and
//! honours the subset of HTTP the sync engine relies on: `If-None-Match`,
//! open-ended `Range` requests, 404 for anything not published.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::{json, Value};
use url::Url;

use repodata_sync::app::client::{HttpResponse, Transport};
use repodata_sync::app::{Blake2Hash, Jlap};
use repodata_sync::constants::jlap::DEFAULT_IV;
use repodata_sync::errors::DownloadResult;

pub const CHANNEL: &str = "https://repo.example.com/conda-forge/noarch";

pub fn channel_file(name: &str) -> String {
    format!("{CHANNEL}/{name}")
}

#[derive(Debug, Clone)]
struct Resource {
    body: Vec<u8>,
    etag: Option<String>,
    cache_control: Option<String>,
}

/// One request as the server saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Default)]
struct Inner {
    resources: HashMap<String, Resource>,
    requests: Vec<RecordedRequest>,
}

/// In-memory channel subdirectory
#[derive(Clone, Default)]
pub struct MockChannel {
    inner: Arc<Mutex<Inner>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `body` under the channel file `name`
    pub fn publish(&self, name: &str, body: impl Into<Vec<u8>>, etag: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.resources.insert(
            channel_file(name),
            Resource {
                body: body.into(),
                etag: etag.map(str::to_string),
                cache_control: Some("public, max-age=30".to_string()),
            },
        );
    }

    pub fn unpublish(&self, name: &str) {
        self.inner.lock().unwrap().resources.remove(&channel_file(name));
    }

    /// Every request whose URL ends with `suffix`
    pub fn requests_for(&self, suffix: &str) -> Vec<RecordedRequest> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .cloned()
            .collect()
    }

    pub fn count(&self, suffix: &str) -> usize {
        self.requests_for(suffix).len()
    }

    fn respond(&self, url: &Url, headers: &HeaderMap) -> (StatusCode, HeaderMap, Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(RecordedRequest {
            url: url.to_string(),
            headers: headers.clone(),
        });

        let Some(resource) = inner.resources.get(url.as_str()).cloned() else {
            return (StatusCode::NOT_FOUND, HeaderMap::new(), b"not found".to_vec());
        };

        let mut response_headers = HeaderMap::new();
        if let Some(etag) = &resource.etag {
            response_headers.insert("etag", HeaderValue::from_str(etag).unwrap());
        }
        if let Some(cache_control) = &resource.cache_control {
            response_headers.insert("cache-control", HeaderValue::from_str(cache_control).unwrap());
        }

        let if_none_match = headers.get("if-none-match").and_then(|v| v.to_str().ok());
        if resource.etag.is_some() && if_none_match == resource.etag.as_deref() {
            return (StatusCode::NOT_MODIFIED, response_headers, Vec::new());
        }

        let range_start = headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.strip_suffix('-'))
            .and_then(|v| v.parse::<usize>().ok());
        match range_start {
            Some(start) if start >= resource.body.len() => {
                (StatusCode::RANGE_NOT_SATISFIABLE, response_headers, Vec::new())
            }
            Some(start) => (
                StatusCode::PARTIAL_CONTENT,
                response_headers,
                resource.body[start..].to_vec(),
            ),
            None => (StatusCode::OK, response_headers, resource.body),
        }
    }
}

#[async_trait]
impl Transport for MockChannel {
    async fn get(&self, url: &Url, headers: HeaderMap) -> DownloadResult<HttpResponse> {
        let (status, response_headers, body) = self.respond(url, &headers);
        Ok(HttpResponse::from_bytes(url.clone(), status, response_headers, body))
    }
}

/// Compact JSON bytes of `doc`
pub fn to_bytes(doc: &Value) -> Vec<u8> {
    serde_json::to_vec(doc).unwrap()
}

pub fn blake2_hex(data: &[u8]) -> String {
    Blake2Hash::digest(data).to_hex()
}

pub fn zstd_bytes(data: &[u8]) -> Vec<u8> {
    zstd::encode_all(data, 3).unwrap()
}

/// `{"from", "to", "patch"}` line
pub fn patch_line(from: &str, to: &str, ops: Value) -> Value {
    json!({"from": from, "to": to, "patch": ops})
}

/// Complete log file as a server would publish it
///
/// Growing `records` keeps every byte before the old footer unchanged.
pub fn jlap_file(records: &[Value], latest: &str) -> Vec<u8> {
    let mut log = Jlap::new(Blake2Hash::from_bytes(DEFAULT_IV));
    for record in records {
        log.append(record.to_string()).unwrap();
    }
    log.append(json!({"latest": latest}).to_string()).unwrap();
    log.terminate();
    let mut data = log.serialize().into_bytes();
    data.push(b'\n');
    data
}

pub fn repodata(packages: Value) -> Value {
    json!({
        "info": {"subdir": "noarch"},
        "packages": packages,
        "repodata_version": 1
    })
}
