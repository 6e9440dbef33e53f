//! Incremental message decoding.
//!
//! A [`MessageParser`] turns raw chunks into discrete messages. Decode
//! failures are reported as outcomes and never end the stream.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use serde_json::Value;

use crate::error::StreamError;

/// Delimiter between messages on the wire.
pub const MESSAGE_DELIMITER: &[u8] = b"\r\n";

/// Default cap on a buffered, not yet delimited message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Result of decoding part of a chunk.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A complete decoded message.
    Message(Value),
    /// A piece that could not be decoded.
    Error(StreamError),
}

/// Incremental decoder fed with raw chunks.
pub trait MessageParser: Send + 'static {
    /// Feed a chunk; returns every outcome it completes, in order.
    fn push(&mut self, chunk: &[u8]) -> Vec<ParseOutcome>;

    /// Drop any partially buffered message.
    fn reset(&mut self);
}

/// Builds a fresh parser for each stream instance.
pub type ParserFactory = Arc<dyn Fn() -> Box<dyn MessageParser> + Send + Sync>;

/// Decides whether a decoded message is an error payload.
pub type ErrorClassifier = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Default classifier: an object carrying `errors` and no `data`.
pub fn is_error_payload(message: &Value) -> bool {
    message
        .as_object()
        .is_some_and(|object| object.contains_key("errors") && !object.contains_key("data"))
}

pub(crate) fn default_parser_factory() -> ParserFactory {
    Arc::new(|| Box::new(JsonLinesParser::new()) as Box<dyn MessageParser>)
}

pub(crate) fn default_error_classifier() -> ErrorClassifier {
    Arc::new(is_error_payload)
}

/// `\r\n`-delimited JSON decoder.
#[derive(Debug)]
pub struct JsonLinesParser {
    buffer: BytesMut,
    /// Prefix of `buffer` known to hold no delimiter.
    searched: usize,
    max_message_size: usize,
}

impl Default for JsonLinesParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLinesParser {
    /// Create a parser with the default size cap.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a parser that gives up on messages larger than `max`.
    pub fn with_max_message_size(max: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            searched: 0,
            max_message_size: max,
        }
    }

    /// Bytes held for an incomplete message.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn decode(piece: &[u8]) -> ParseOutcome {
        match serde_json::from_slice(piece) {
            Ok(message) => ParseOutcome::Message(message),
            Err(e) => ParseOutcome::Error(StreamError::Json(e)),
        }
    }
}

impl MessageParser for JsonLinesParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<ParseOutcome> {
        self.buffer.extend_from_slice(chunk);

        let mut outcomes = Vec::new();
        while let Some(found) =
            memchr::memmem::find(&self.buffer[self.searched..], MESSAGE_DELIMITER)
        {
            let piece = self.buffer.split_to(self.searched + found);
            self.buffer.advance(MESSAGE_DELIMITER.len());
            self.searched = 0;
            if piece.is_empty() {
                continue;
            }
            outcomes.push(Self::decode(&piece));
        }
        // A delimiter may straddle this chunk and the next.
        self.searched = self.buffer.len().saturating_sub(MESSAGE_DELIMITER.len() - 1);

        if self.buffer.len() > self.max_message_size {
            let dropped = self.buffer.len();
            self.buffer.clear();
            self.searched = 0;
            outcomes.push(ParseOutcome::Error(StreamError::decode(format!(
                "message exceeds {} bytes ({dropped} buffered)",
                self.max_message_size
            ))));
        }

        outcomes
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.searched = 0;
    }
}
