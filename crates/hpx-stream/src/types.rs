//! Event taxonomy published on the [`EventBus`](crate::bus::EventBus).

use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::error::StreamError;

/// Subscription key for a [`StreamEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First connection of a `connect()` episode established.
    Connected,
    /// A replacement connection succeeded.
    Reconnected,
    /// A retry is being initiated.
    ReconnectAttempt,
    /// A retry attempt failed to establish.
    ReconnectError,
    /// Retry budget exhausted; precedes [`EventKind::ConnectionClosed`].
    ReconnectLimitExceeded,
    /// Watchdog-detected silent failure.
    ConnectionLost,
    /// Transport-level error.
    ConnectionError,
    /// The decoder rejected a chunk.
    TweetParseError,
    /// A decoded message.
    Data,
    /// A decoded message classified as an error payload.
    DataError,
    /// Unified error channel.
    Error,
    /// Terminal: the connection will not be retried.
    ConnectionClosed,
    /// Heartbeat received.
    KeepAlive,
}

impl EventKind {
    /// Every event kind, in declaration order.
    pub const ALL: [EventKind; 13] = [
        Self::Connected,
        Self::Reconnected,
        Self::ReconnectAttempt,
        Self::ReconnectError,
        Self::ReconnectLimitExceeded,
        Self::ConnectionLost,
        Self::ConnectionError,
        Self::TweetParseError,
        Self::Data,
        Self::DataError,
        Self::Error,
        Self::ConnectionClosed,
        Self::KeepAlive,
    ];

    /// Wire-style event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnected => "reconnected",
            Self::ReconnectAttempt => "reconnect-attempt",
            Self::ReconnectError => "reconnect-error",
            Self::ReconnectLimitExceeded => "reconnect-limit-exceeded",
            Self::ConnectionLost => "connection-lost",
            Self::ConnectionError => "connection-error",
            Self::TweetParseError => "tweet-parse-error",
            Self::Data => "data",
            Self::DataError => "data-error",
            Self::Error => "error",
            Self::ConnectionClosed => "connection-closed",
            Self::KeepAlive => "keep-alive",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category carried by the unified `error` channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport-level error on the live connection or the first attempt.
    ConnectionError,
    /// Decoder failure; the stream continues.
    TweetParseError,
    /// Error payload from the remote; the stream continues.
    DataError,
    /// A retry attempt failed.
    ReconnectError,
}

impl ErrorKind {
    /// Matching dedicated event kind.
    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::ConnectionError => EventKind::ConnectionError,
            Self::TweetParseError => EventKind::TweetParseError,
            Self::DataError => EventKind::DataError,
            Self::ReconnectError => EventKind::ReconnectError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_kind().as_str())
    }
}

/// Payload of the unified `error` channel.
#[derive(Clone, Debug)]
pub struct ErrorEvent {
    /// Which error-like event this aggregates.
    pub kind: ErrorKind,
    /// The underlying error.
    pub error: Arc<StreamError>,
}

impl ErrorEvent {
    /// Create a new error event.
    pub fn new(kind: ErrorKind, error: Arc<StreamError>) -> Self {
        Self { kind, error }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

/// An event published by a stream instance.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Connected,
    Reconnected,
    /// Zero-based index of the retry being initiated.
    ReconnectAttempt(u32),
    /// Zero-based index of the retry that failed.
    ReconnectError(u32),
    ReconnectLimitExceeded,
    ConnectionLost,
    ConnectionError(Arc<StreamError>),
    TweetParseError(Arc<StreamError>),
    Data(Value),
    DataError(Value),
    Error(ErrorEvent),
    ConnectionClosed,
    KeepAlive,
}

impl StreamEvent {
    /// The subscription key of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Reconnected => EventKind::Reconnected,
            Self::ReconnectAttempt(_) => EventKind::ReconnectAttempt,
            Self::ReconnectError(_) => EventKind::ReconnectError,
            Self::ReconnectLimitExceeded => EventKind::ReconnectLimitExceeded,
            Self::ConnectionLost => EventKind::ConnectionLost,
            Self::ConnectionError(_) => EventKind::ConnectionError,
            Self::TweetParseError(_) => EventKind::TweetParseError,
            Self::Data(_) => EventKind::Data,
            Self::DataError(_) => EventKind::DataError,
            Self::Error(_) => EventKind::Error,
            Self::ConnectionClosed => EventKind::ConnectionClosed,
            Self::KeepAlive => EventKind::KeepAlive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::ReconnectLimitExceeded.as_str(), "reconnect-limit-exceeded");
        assert_eq!(EventKind::TweetParseError.to_string(), "tweet-parse-error");
        assert_eq!(EventKind::KeepAlive.to_string(), "keep-alive");
    }

    #[test]
    fn test_all_kinds_are_distinct() {
        let mut names: Vec<_> = EventKind::ALL.iter().map(EventKind::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::ALL.len());
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(StreamEvent::ReconnectAttempt(3).kind(), EventKind::ReconnectAttempt);
        assert_eq!(
            StreamEvent::Data(serde_json::json!({"id": 1})).kind(),
            EventKind::Data
        );
        let error = ErrorEvent::new(
            ErrorKind::DataError,
            Arc::new(StreamError::decode("x")),
        );
        assert_eq!(StreamEvent::Error(error).kind(), EventKind::Error);
        assert_eq!(StreamEvent::ConnectionClosed.kind(), EventKind::ConnectionClosed);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::ConnectionError.to_string(), "connection-error");
        assert_eq!(ErrorKind::ReconnectError.event_kind(), EventKind::ReconnectError);
    }
}
