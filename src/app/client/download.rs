//! Streaming downloads hashed on the way to disk
//!
//! A full repodata fetch writes the (possibly zstd-compressed) body to a
//! temp file in one pass. The BLAKE2b-256 of the decoded bytes is computed
//! as they are written, so the caller never re-reads the file to hash it.

use std::path::Path;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tokio::fs::File;
use tokio::io::{AsyncWrite, BufWriter};
use url::Url;
use zstd::stream::raw::{Decoder, InBuffer, Operation, OutBuffer};

use super::Transport;
use crate::app::cache::RepodataState;
use crate::app::hash::{Blake2Hash, HashWriter};
use crate::constants::{files, http};
use crate::errors::{DownloadError, DownloadResult};

/// Encoding of the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zstd,
}

/// Result of a conditional download
#[derive(Debug)]
pub struct HashedDownload {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Digest of the decoded body, `None` on 304
    pub hash: Option<Blake2Hash>,
    pub bytes_written: u64,
}

impl HashedDownload {
    pub fn not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// `If-None-Match` / `If-Modified-Since` built from the stored validators
///
/// Validators are only sent when a local copy exists to fall back on.
/// Values that are not legal header text are skipped.
pub fn conditional_headers(state: &RepodataState, json_exists: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !json_exists {
        return headers;
    }
    let pairs = [
        (http::IF_NONE_MATCH, state.etag.as_deref()),
        (http::IF_MODIFIED_SINCE, state.last_modified.as_deref()),
    ];
    for (name, value) in pairs {
        let Some(value) = value else { continue };
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => tracing::debug!("Skipping unsendable {} value {:?}", name, value),
        }
    }
    headers
}

/// Incremental zstd frame decoder feeding a [`HashWriter`]
struct ZstdSink {
    decoder: Decoder<'static>,
    buffer: Vec<u8>,
    /// Last size hint from the decoder; zero once a frame is complete
    hint: usize,
    /// The previous step filled `buffer`, so the decoder may hold more output
    pending: bool,
}

impl ZstdSink {
    fn new(url: &Url) -> DownloadResult<Self> {
        let decoder = Decoder::new().map_err(|e| decompress_error(url, e))?;
        Ok(Self {
            decoder,
            buffer: vec![0u8; files::DECOMPRESS_BUFFER_SIZE],
            hint: 1,
            pending: false,
        })
    }

    /// Run the decoder once, returning (consumed, produced, hint)
    fn step(&mut self, url: &Url, input: &[u8]) -> DownloadResult<(usize, usize, usize)> {
        let mut src = InBuffer::around(input);
        let mut dst = OutBuffer::around(&mut self.buffer[..]);
        let hint = self
            .decoder
            .run(&mut src, &mut dst)
            .map_err(|e| decompress_error(url, e))?;
        let produced = dst.pos();
        self.pending = produced == self.buffer.len();
        Ok((src.pos(), produced, hint))
    }

    async fn write<W: AsyncWrite + Unpin>(
        &mut self,
        url: &Url,
        mut input: &[u8],
        out: &mut HashWriter<W>,
    ) -> DownloadResult<()> {
        while !input.is_empty() {
            let (consumed, produced, hint) = self.step(url, input)?;
            if consumed == 0 && produced == 0 {
                return Err(DownloadError::Decompress {
                    url: url.to_string(),
                    reason: "decoder made no progress".to_string(),
                });
            }
            self.hint = hint;
            out.write_all(&self.buffer[..produced]).await?;
            input = &input[consumed..];
        }
        Ok(())
    }

    /// Drain buffered output and check the last frame was complete
    async fn finish<W: AsyncWrite + Unpin>(
        &mut self,
        url: &Url,
        out: &mut HashWriter<W>,
    ) -> DownloadResult<()> {
        // An empty-input step on a finished frame starts a new one, so only
        // drain while output is still owed.
        while self.pending {
            let (_, produced, hint) = self.step(url, &[])?;
            out.write_all(&self.buffer[..produced]).await?;
            if self.hint != 0 {
                self.hint = hint;
            }
        }
        if self.hint != 0 {
            return Err(DownloadError::Decompress {
                url: url.to_string(),
                reason: "truncated zstd frame".to_string(),
            });
        }
        Ok(())
    }
}

fn decompress_error(url: &Url, e: std::io::Error) -> DownloadError {
    DownloadError::Decompress {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

/// File download operations handler
pub struct DownloadHandler<'a> {
    transport: &'a dyn Transport,
}

impl<'a> DownloadHandler<'a> {
    /// Creates a new DownloadHandler over the given transport
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    /// Conditionally GET `url`, decode it, and write it to `destination`
    ///
    /// On 304 nothing is written. Otherwise `destination` is created or
    /// truncated and receives the decoded body.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The server answers 4xx or 5xx (`Status`)
    /// - The body stream fails or times out
    /// - The zstd stream is corrupt or truncated (`Decompress`)
    /// - File I/O operations fail
    pub async fn download_and_hash(
        &self,
        url: &Url,
        destination: &Path,
        headers: HeaderMap,
        compression: Compression,
    ) -> DownloadResult<HashedDownload> {
        let response = self.transport.get(url, headers).await?.error_for_status()?;
        let status = response.status;
        let headers = response.headers;

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("{} not modified", url);
            return Ok(HashedDownload {
                status,
                headers,
                hash: None,
                bytes_written: 0,
            });
        }

        let file = File::create(destination).await?;
        let mut writer = HashWriter::new(BufWriter::new(file));
        let mut zstd = match compression {
            Compression::Zstd => Some(ZstdSink::new(url)?),
            Compression::None => None,
        };

        let mut body = response.body;
        let mut received: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            match zstd.as_mut() {
                Some(sink) => sink.write(url, &chunk, &mut writer).await?,
                None => writer.write_all(&chunk).await?,
            }
        }
        if let Some(sink) = zstd.as_mut() {
            sink.finish(url, &mut writer).await?;
        }

        let (_, hash, bytes_written) = writer.finish().await?;
        tracing::info!(
            "Downloaded {} ({} bytes received, {} written)",
            url,
            received,
            bytes_written
        );

        Ok(HashedDownload {
            status,
            headers,
            hash: Some(hash),
            bytes_written,
        })
    }
}
