//! HTTP access to conda channels
//!
//! The engine only needs conditional and ranged GETs, so it talks to the
//! network through the [`Transport`] trait. [`HttpHandler`] is the reqwest
//! implementation; tests substitute an in-memory one.
//!
//! The module is organized into specialized components:
//! - `config`: HTTP client configuration and building
//! - `http`: reqwest transport with rate limiting and retries
//! - `download`: streaming downloads hashed on the way to disk

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use url::Url;

use crate::errors::{DownloadError, DownloadResult};

pub mod config;
pub mod download;
pub mod http;

pub use config::ClientConfig;
pub use download::{conditional_headers, Compression, DownloadHandler, HashedDownload};
pub use http::HttpHandler;

/// Response body as a stream of chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = DownloadResult<Bytes>> + Send>>;

/// Status, headers and streaming body of a GET
pub struct HttpResponse {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("url", &self.url.as_str())
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Response whose whole body is already in memory
    pub fn from_bytes(url: Url, status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            url,
            status,
            headers,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// Header value as text, if present and printable
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Turn 4xx and 5xx answers into `DownloadError::Status`
    pub fn error_for_status(self) -> DownloadResult<Self> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(DownloadError::Status {
                url: self.url.to_string(),
                status: self.status.as_u16(),
            });
        }
        Ok(self)
    }

    /// Collect the body into memory
    pub async fn bytes(self) -> DownloadResult<Vec<u8>> {
        self.body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }
}

/// Minimal HTTP client contract used by the sync engine
///
/// Implementations perform one GET with the given extra headers and return
/// whatever status the server answered, including 304, 404 and 416.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url, headers: HeaderMap) -> DownloadResult<HttpResponse>;
}

/// Replace the last extension of `url`'s file name with `ext`
///
/// `.../repodata.json` with `.jlap` gives `.../repodata.jlap`; with
/// `.json.zst` it gives `.../repodata.json.zst`.
pub fn with_ext(url: &Url, ext: &str) -> Url {
    let path = url.path();
    let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
    let stem = name.rfind('.').map_or(name, |i| &name[..i]);
    let mut out = url.clone();
    out.set_path(&format!("{dir}/{stem}{ext}"));
    out
}

/// Build the document URL from a channel subdirectory URL
///
/// # Errors
///
/// Returns `DownloadError::InvalidUrl` if the result does not parse.
pub fn repodata_url(channel_url: &str, repodata_fn: &str) -> DownloadResult<Url> {
    let joined = format!("{}/{}", channel_url.trim_end_matches('/'), repodata_fn);
    Url::parse(&joined).map_err(|e| DownloadError::InvalidUrl {
        url: joined,
        error: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_ext() {
        let url = Url::parse("https://conda.anaconda.org/conda-forge/noarch/repodata.json").unwrap();
        assert_eq!(
            with_ext(&url, ".jlap").as_str(),
            "https://conda.anaconda.org/conda-forge/noarch/repodata.jlap"
        );
        assert_eq!(
            with_ext(&url, ".json.zst").as_str(),
            "https://conda.anaconda.org/conda-forge/noarch/repodata.json.zst"
        );
        assert_eq!(with_ext(&url, ".json"), url);
    }

    #[test]
    fn test_repodata_url() {
        let url = repodata_url("https://conda.anaconda.org/conda-forge/linux-64/", "repodata.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://conda.anaconda.org/conda-forge/linux-64/repodata.json"
        );
        assert!(repodata_url("not a url", "repodata.json").is_err());
    }

    #[tokio::test]
    async fn test_response_helpers() {
        let url = Url::parse("https://example.com/repodata.json").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("etag", "\"abc\"".parse().unwrap());

        let response = HttpResponse::from_bytes(url.clone(), StatusCode::OK, headers, "{}");
        assert_eq!(response.header("etag"), Some("\"abc\""));
        assert_eq!(response.bytes().await.unwrap(), b"{}");

        let missing = HttpResponse::from_bytes(url, StatusCode::NOT_FOUND, HeaderMap::new(), "");
        let err = missing.error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.is_client_error());
    }
}
