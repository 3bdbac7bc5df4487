//! Ranged `.jlap` requests
//!
//! A log is fetched from the last recorded footer offset, seeded with the
//! checksum recorded for the line before it. The server answers with the old
//! footer onwards, so an unchanged log costs two short lines.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::app::cache::JlapState;
use crate::app::client::{HttpResponse, Transport};
use crate::app::hash::Blake2Hash;
use crate::app::jlap::{split_lines, Jlap};
use crate::constants::http;
use crate::errors::{CodecError, DownloadError, SyncResult};

/// Parsed answer to a `.jlap` request
#[derive(Debug)]
pub enum JlapResponse {
    /// The stored ETag still matches
    NotModified,
    /// Verified log plus the position to resume from next time
    Log { log: Jlap, state: JlapState },
}

/// GET `url` from byte `pos`, conditional on `etag`
///
/// # Errors
///
/// * `DownloadError::Status` for 4xx and 5xx answers
/// * `DownloadError::UnexpectedStatus` when a ranged request gets anything
///   other than 206 or 304
pub async fn request_jlap(
    transport: &dyn Transport,
    url: &Url,
    pos: u64,
    etag: Option<&str>,
) -> SyncResult<HttpResponse> {
    let mut headers = HeaderMap::new();
    // Offsets count raw bytes of the file
    headers.insert(http::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    if pos > 0 {
        if let Ok(range) = HeaderValue::from_str(&format!("bytes={pos}-")) {
            headers.insert(http::RANGE, range);
        }
    }
    if let Some(etag) = etag.and_then(|e| HeaderValue::from_str(e).ok()) {
        headers.insert(http::IF_NONE_MATCH, etag);
    }
    debug!("GET {} {:?}", url, headers);

    let response = transport.get(url, headers).await?.error_for_status()?;
    debug!("HTTP {} for {}", response.status, url);

    if pos > 0
        && response.status != StatusCode::PARTIAL_CONTENT
        && response.status != StatusCode::NOT_MODIFIED
    {
        return Err(DownloadError::UnexpectedStatus {
            url: url.to_string(),
            status: response.status.as_u16(),
        }
        .into());
    }
    Ok(response)
}

/// Verify a `.jlap` response body read from `pos` with seed `iv`
///
/// # Errors
///
/// Returns `CodecError` if the body does not decode, the chain does not
/// verify, or the footer is not an object.
pub async fn process_jlap_response(
    response: HttpResponse,
    pos: u64,
    iv: Blake2Hash,
) -> SyncResult<JlapResponse> {
    if response.status == StatusCode::NOT_MODIFIED {
        return Ok(JlapResponse::NotModified);
    }

    let headers = stored_headers(&response.headers);
    let body = response.bytes().await?;
    let log = Jlap::parse(split_lines(&body), iv, pos, true)?;

    let (Some(footer), Some(before)) = (log.footer(), log.before_footer()) else {
        return Err(CodecError::TooShort {
            lines: log.line_count(),
        }
        .into());
    };
    let state = JlapState {
        headers,
        iv: before.checksum.to_hex(),
        pos: footer.offset.unwrap_or(pos),
        footer: log.footer_value()?,
    };
    debug!(
        "JLAP at {} bytes, {} patch lines, resume from {}",
        log.next_offset(),
        log.body().len(),
        state.pos
    );
    Ok(JlapResponse::Log { log, state })
}

/// Request and verify in one step
pub async fn fetch_jlap(
    transport: &dyn Transport,
    url: &Url,
    pos: u64,
    iv: Blake2Hash,
    etag: Option<&str>,
) -> SyncResult<JlapResponse> {
    let response = request_jlap(transport, url, pos, etag).await?;
    process_jlap_response(response, pos, iv).await
}

/// Lower-cased copy of the headers worth keeping between fetches
fn stored_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| http::STORE_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::jlap::DEFAULT_IV;
    use serde_json::json;

    fn sample_log() -> Jlap {
        let mut log = Jlap::new(Blake2Hash::from_bytes(DEFAULT_IV));
        log.append(json!({"from": "a", "to": "b", "patch": []}).to_string())
            .unwrap();
        log.append(json!({"latest": "b"}).to_string()).unwrap();
        log.terminate();
        log
    }

    fn response(status: StatusCode, body: Vec<u8>) -> HttpResponse {
        let mut headers = HeaderMap::new();
        headers.insert("ETag", HeaderValue::from_static("\"v1\""));
        headers.insert("X-Served-By", HeaderValue::from_static("cache-1"));
        HttpResponse::from_bytes(
            Url::parse("https://example.com/repodata.jlap").unwrap(),
            status,
            headers,
            body,
        )
    }

    #[tokio::test]
    async fn test_process_complete_log() {
        let log = sample_log();
        let result = process_jlap_response(
            response(StatusCode::OK, log.serialize().into_bytes()),
            0,
            Blake2Hash::from_bytes(DEFAULT_IV),
        )
        .await
        .unwrap();

        let JlapResponse::Log { log: parsed, state } = result else {
            panic!("expected a log");
        };
        assert_eq!(parsed, log);
        assert_eq!(state.footer, json!({"latest": "b"}));
        assert_eq!(Some(state.pos), log.footer().unwrap().offset);
        assert_eq!(state.iv, log.before_footer().unwrap().checksum.to_hex());
        assert_eq!(state.etag(), Some("\"v1\""));
        assert!(!state.headers.contains_key("x-served-by"));
    }

    #[tokio::test]
    async fn test_process_resumed_tail() {
        let log = sample_log();
        let text = log.serialize();
        // Resume from the footer, as a range request would
        let pos = log.footer().unwrap().offset.unwrap();
        let iv = log.before_footer().unwrap().checksum;
        let tail = text.as_bytes()[pos as usize..].to_vec();

        let result = process_jlap_response(response(StatusCode::PARTIAL_CONTENT, tail), pos, iv)
            .await
            .unwrap();
        let JlapResponse::Log { log: parsed, state } = result else {
            panic!("expected a log");
        };
        assert!(parsed.body().is_empty());
        assert_eq!(state.pos, pos);
        assert_eq!(state.iv, iv.to_hex());
    }

    #[tokio::test]
    async fn test_process_wrong_seed_fails() {
        let log = sample_log();
        let text = log.serialize();
        let pos = log.footer().unwrap().offset.unwrap();
        let tail = text.as_bytes()[pos as usize..].to_vec();

        let err = process_jlap_response(
            response(StatusCode::PARTIAL_CONTENT, tail),
            pos,
            Blake2Hash::digest(b"stale"),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::SyncError::Codec(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_not_modified() {
        let result = process_jlap_response(
            response(StatusCode::NOT_MODIFIED, Vec::new()),
            10,
            Blake2Hash::default(),
        )
        .await
        .unwrap();
        assert!(matches!(result, JlapResponse::NotModified));
    }
}
