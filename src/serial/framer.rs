//! # Line Framing
//!
//! Splits the serial byte stream into newline-terminated lines and pulls the
//! JSON object out of each one.
//!
//! The dongle interleaves telemetry with boot banners and log chatter, so the
//! extractor is tolerant: it takes everything between the first `{` and the
//! last `}` and leaves validation to the decoder.

use bytes::{Bytes, BytesMut};
use std::borrow::Cow;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Line delimiter used by the dongle firmware
pub const LINE_DELIMITER: u8 = b'\n';

/// Longest line kept; anything longer is discarded up to the next delimiter
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Bytes reserved per read call
const READ_CHUNK: usize = 1024;

/// Reassembles delimiter-terminated lines from arbitrary read chunks
///
/// Reads go through `read_buf` into an owned buffer, so a `read_line` future
/// may be dropped (e.g. by a timeout) without losing bytes.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
    /// Set after an over-long line was dropped, until its delimiter shows up
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next line, without its delimiter
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, or `UnexpectedEof` when the link
    /// reports end of stream (device unplugged).
    pub async fn read_line<R>(&mut self, reader: &mut R) -> io::Result<Bytes>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            self.buf.reserve(READ_CHUNK);
            if reader.read_buf(&mut self.buf).await? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial link closed"));
            }
        }
    }

    /// Drop any partial line, e.g. after a reconnect
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Bytes buffered without a delimiter yet
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn take_line(&mut self) -> Option<Bytes> {
        while let Some(pos) = self.buf.iter().position(|&b| b == LINE_DELIMITER) {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);

            if self.discarding {
                self.discarding = false;
                continue;
            }
            return Some(line.freeze());
        }

        if self.buf.len() > MAX_LINE_LEN {
            debug!(len = self.buf.len(), "Discarding over-long serial line");
            self.buf.clear();
            self.discarding = true;
        }
        None
    }
}

/// Decode raw line bytes as text, replacing invalid UTF-8 sequences
pub fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(raw)
}

/// Extract the candidate JSON object from a line of text
///
/// # Returns
///
/// * `Option<&str>` - Text from the first `{` to the last `}` inclusive, or
///   `None` for blank lines and lines without a well-ordered brace pair
///
/// # Examples
///
/// ```
/// use dongle_telemetry::serial::framer::extract_json;
///
/// assert_eq!(
///     extract_json("I (1234) main: {\"type\":\"hr\",\"bpm\":60} \r"),
///     Some("{\"type\":\"hr\",\"bpm\":60}")
/// );
/// assert_eq!(extract_json("boot: ok"), None);
/// ```
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;

    (end > start).then(|| &trimmed[start..=end])
}
