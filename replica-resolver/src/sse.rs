//! Incremental Server-Sent-Events reading.
//!
//! [`LineDecoder`] turns arbitrarily chunked bytes into lines, [`LineReader`]
//! drives it from an async byte stream, and [`EventExtractor`] picks the data
//! payloads of one event type out of those lines.

use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use std::error::Error;

pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum SseError {
    #[error("failed to read event stream: {0}")]
    Read(#[source] Box<dyn Error + Send + Sync>),

    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

/// Buffers raw bytes and yields complete lines.
///
/// Lines are split on the `\n` byte before decoding. That byte never appears
/// inside a multi-byte UTF-8 sequence, so a character split across two
/// chunks is always reassembled before it is decoded.
#[derive(Debug)]
pub struct LineDecoder {
    buf: BytesMut,
    // bytes of `buf` already known not to contain a newline
    scanned: usize,
    max_line_length: usize,
}

impl LineDecoder {
    pub fn new(max_line_length: usize) -> Self {
        LineDecoder {
            buf: BytesMut::new(),
            scanned: 0,
            max_line_length,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete line without its terminator (`\n` or `\r\n`),
    /// or `None` if more input is needed.
    pub fn next_line(&mut self) -> Result<Option<String>, SseError> {
        let Some(pos) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buf.len();
            if self.buf.len() > self.max_line_length {
                return Err(SseError::LineTooLong {
                    limit: self.max_line_length,
                });
            }
            return Ok(None);
        };

        let end = self.scanned + pos;
        let raw = self.buf.split_to(end + 1);
        self.scanned = 0;

        let mut line = &raw[..end];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line.len() > self.max_line_length {
            return Err(SseError::LineTooLong {
                limit: self.max_line_length,
            });
        }

        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }

    /// Bytes received after the last complete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        LineDecoder::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

/// Reads lines from a stream of byte chunks.
///
/// A trailing line without a terminator is discarded when the stream ends.
pub struct LineReader<S> {
    stream: S,
    decoder: LineDecoder,
    finished: bool,
}

impl<S, B, E> LineReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    pub fn new(stream: S) -> Self {
        Self::with_decoder(stream, LineDecoder::default())
    }

    pub fn with_decoder(stream: S, decoder: LineDecoder) -> Self {
        LineReader {
            stream,
            decoder,
            finished: false,
        }
    }

    pub async fn next_line(&mut self) -> Result<Option<String>, SseError> {
        loop {
            if let Some(line) = self.decoder.next_line()? {
                return Ok(Some(line));
            }
            if self.finished {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.decoder.push(chunk.as_ref()),
                Some(Err(e)) => return Err(SseError::Read(e.into())),
                None => {
                    if self.decoder.pending() > 0 {
                        tracing::debug!(
                            bytes = self.decoder.pending(),
                            "discarding unterminated line at end of stream"
                        );
                    }
                    self.finished = true;
                }
            }
        }
    }
}

/// One SSE field line.
#[derive(Debug, PartialEq, Eq)]
pub enum Field<'a> {
    Blank,
    Comment,
    Named { name: &'a str, value: &'a str },
}

/// Splits a line on its first `:` and drops exactly one space following it.
pub fn parse_field(line: &str) -> Field<'_> {
    if line.is_empty() {
        return Field::Blank;
    }
    if line.starts_with(':') {
        return Field::Comment;
    }

    match line.split_once(':') {
        Some((name, value)) => Field::Named {
            name,
            value: value.strip_prefix(' ').unwrap_or(value),
        },
        None => Field::Named {
            name: line,
            value: "",
        },
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Matches `event: <name>` immediately followed by a `data:` line.
pub struct EventExtractor<'a> {
    event_name: &'a str,
    armed: bool,
}

impl<'a> EventExtractor<'a> {
    pub fn new(event_name: &'a str) -> Self {
        EventExtractor {
            event_name,
            armed: false,
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<SseEvent> {
        match parse_field(line) {
            Field::Comment => None,
            Field::Blank => {
                self.armed = false;
                None
            }
            Field::Named {
                name: "data",
                value,
            } if self.armed => {
                self.armed = false;
                Some(SseEvent {
                    event: self.event_name.to_string(),
                    data: value.to_string(),
                })
            }
            Field::Named { name, value } => {
                self.armed = name == "event" && value == self.event_name;
                None
            }
        }
    }
}

/// Collects up to `max_count` events named `event_name`, fewer if the stream ends first.
pub async fn extract_events<S, B, E>(
    reader: &mut LineReader<S>,
    event_name: &str,
    max_count: usize,
) -> Result<Vec<SseEvent>, SseError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    let mut extractor = EventExtractor::new(event_name);
    let mut events = Vec::with_capacity(max_count);

    while events.len() < max_count {
        let Some(line) = reader.next_line().await? else {
            break;
        };
        if let Some(event) = extractor.feed(&line) {
            events.push(event);
        }
    }

    Ok(events)
}
