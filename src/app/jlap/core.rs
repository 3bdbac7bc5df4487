//! JLAP log codec
//!
//! A JLAP log is a line-oriented, append-only file: an IV line, any number of
//! patch records, a `{"latest": ...}` footer and a trailing checksum. Each line
//! is chained to the previous one by a keyed BLAKE2b digest, so verifying the
//! trailing line verifies every line before it.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::app::hash::Blake2Hash;
use crate::constants::jlap::{DEFAULT_IV, LATEST};
use crate::errors::{CodecError, CodecResult};

/// One line of a log with its running checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JlapEntry {
    /// Byte offset of the line in the log file. `None` for a seed supplied by
    /// the caller when resuming from the middle of a log.
    pub offset: Option<u64>,
    /// Line text without the trailing newline
    pub text: String,
    /// Chain checksum through this line
    pub checksum: Blake2Hash,
}

/// Parsed JLAP log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jlap {
    entries: Vec<JlapEntry>,
    next_offset: u64,
}

impl Jlap {
    /// Start an empty log whose first line is `iv`
    pub fn new(iv: Blake2Hash) -> Self {
        let text = iv.to_hex();
        let next_offset = text.len() as u64 + 1;
        Self {
            entries: vec![JlapEntry {
                offset: Some(0),
                text,
                checksum: iv,
            }],
            next_offset,
        }
    }

    /// Parse lines read from a log starting at `start_offset`
    ///
    /// At offset 0 the first line is the log's own IV and `iv` is ignored.
    /// Otherwise `iv` must be the checksum of the line preceding
    /// `start_offset`, which is how a range request resumes the chain.
    ///
    /// # Errors
    ///
    /// * `CodecError::InvalidUtf8` / `InvalidHex` for undecodable lines
    /// * `CodecError::TooShort` when `verify` is set and fewer than two lines
    ///   were read
    /// * `CodecError::ChecksumMismatch` when `verify` is set and the trailing
    ///   line is not the checksum of the line before it
    pub fn parse<I, L>(lines: I, iv: Blake2Hash, start_offset: u64, verify: bool) -> CodecResult<Self>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut log = Self {
            entries: vec![JlapEntry {
                offset: None,
                text: iv.to_hex(),
                checksum: iv,
            }],
            next_offset: start_offset,
        };

        let mut lines_read = 0usize;
        for line in lines {
            let bytes = line.as_ref();
            let offset = log.next_offset;
            let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { offset })?;

            if start_offset == 0 && lines_read == 0 {
                let seed = Blake2Hash::from_hex(text)?;
                log.entries[0] = JlapEntry {
                    offset: Some(0),
                    text: text.to_string(),
                    checksum: seed,
                };
            } else {
                let checksum = Blake2Hash::keyed(bytes, &log.last().checksum);
                log.entries.push(JlapEntry {
                    offset: Some(offset),
                    text: text.to_string(),
                    checksum,
                });
            }

            log.next_offset = offset + bytes.len() as u64 + 1;
            lines_read += 1;
        }

        if verify {
            log.verify()?;
        }
        Ok(log)
    }

    /// Parse a complete log held in memory
    pub fn from_bytes(data: &[u8], verify: bool) -> CodecResult<Self> {
        Self::parse(split_lines(data), Blake2Hash::from_bytes(DEFAULT_IV), 0, verify)
    }

    /// Read and parse a complete log file
    pub async fn from_path(path: &Path, verify: bool) -> std::io::Result<CodecResult<Self>> {
        let data = tokio::fs::read(path).await?;
        debug!("Read {} bytes of JLAP from {}", data.len(), path.display());
        Ok(Self::from_bytes(&data, verify))
    }

    /// Check the trailing line against the checksum of the line before it
    pub fn verify(&self) -> CodecResult<()> {
        let lines = self.line_count();
        if lines < 2 {
            return Err(CodecError::TooShort { lines });
        }

        let n = self.entries.len();
        let expected = self.entries[n - 2].checksum.to_hex();
        let found = &self.entries[n - 1].text;
        if *found != expected {
            return Err(CodecError::ChecksumMismatch {
                expected,
                found: found.clone(),
            });
        }
        Ok(())
    }

    /// Append one line, chaining it to the current last entry
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidInput` if `line` contains a newline.
    pub fn append(&mut self, line: impl Into<String>) -> CodecResult<()> {
        let text = line.into();
        if text.contains('\n') {
            return Err(CodecError::InvalidInput);
        }

        let checksum = Blake2Hash::keyed(text.as_bytes(), &self.last().checksum);
        let offset = self.next_offset;
        self.next_offset = offset + text.len() as u64 + 1;
        self.entries.push(JlapEntry {
            offset: Some(offset),
            text,
            checksum,
        });
        Ok(())
    }

    /// Append the trailing checksum line
    pub fn terminate(&mut self) {
        let text = self.last().checksum.to_hex();
        let checksum = Blake2Hash::keyed(text.as_bytes(), &self.last().checksum);
        let offset = self.next_offset;
        self.next_offset = offset + text.len() as u64 + 1;
        self.entries.push(JlapEntry {
            offset: Some(offset),
            text,
            checksum,
        });
    }

    /// Entry texts joined with `\n`, no trailing newline
    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.serialize()).await
    }

    pub fn entries(&self) -> &[JlapEntry] {
        &self.entries
    }

    /// Number of lines actually read or appended, excluding a resume seed
    pub fn line_count(&self) -> usize {
        self.entries.len() - usize::from(self.entries[0].offset.is_none())
    }

    /// Byte offset where the next appended line would start
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Patch records between the seed and the footer
    pub fn body(&self) -> &[JlapEntry] {
        let n = self.entries.len();
        if n < 3 {
            &[]
        } else {
            &self.entries[1..n - 2]
        }
    }

    /// Second-to-last entry
    pub fn footer(&self) -> Option<&JlapEntry> {
        let n = self.entries.len();
        (n >= 3).then(|| &self.entries[n - 2])
    }

    /// Last entry, normally the trailing checksum
    pub fn trailing(&self) -> Option<&JlapEntry> {
        let n = self.entries.len();
        (n >= 2).then(|| &self.entries[n - 1])
    }

    /// Entry preceding the footer; its checksum seeds the next range request
    pub fn before_footer(&self) -> Option<&JlapEntry> {
        let n = self.entries.len();
        (n >= 3).then(|| &self.entries[n - 3])
    }

    fn last(&self) -> &JlapEntry {
        // `entries` always holds at least the seed
        &self.entries[self.entries.len() - 1]
    }

    /// Footer parsed as a JSON object
    pub fn footer_value(&self) -> CodecResult<Value> {
        let footer = self.footer().ok_or(CodecError::TooShort {
            lines: self.line_count(),
        })?;
        let value: Value = serde_json::from_str(&footer.text).map_err(|e| CodecError::MalformedLine {
            reason: format!("footer: {e}"),
        })?;
        if !value.is_object() {
            return Err(CodecError::MalformedLine {
                reason: "footer is not a JSON object".to_string(),
            });
        }
        Ok(value)
    }

    /// Hash the log converges to
    pub fn latest(&self) -> CodecResult<String> {
        self.footer_value()?
            .get(LATEST)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CodecError::MalformedLine {
                reason: format!("footer has no string '{LATEST}'"),
            })
    }
}

/// Split raw log bytes on `\n`, ignoring one trailing newline
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    data.split(|b| *b == b'\n').collect()
}
