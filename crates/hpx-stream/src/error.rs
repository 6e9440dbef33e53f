//! Error handling for the resilient stream.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::types::ErrorKind;

/// The main result type used throughout the stream layer.
pub type StreamResult<T> = Result<T, StreamError>;

/// Error type for every stream operation and every error-like event.
///
/// Events carry errors behind an [`Arc`] so the same value can be published
/// on a dedicated channel and on the unified `error` channel.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Socket or connection-level failure on either side of the transport.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// I/O failure reported by the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote endpoint closed the response.
    #[error("Connection closed by remote endpoint")]
    ConnectionClosed,

    /// Nothing arrived within the keep-alive window.
    #[error("No data received for {timeout:?}")]
    SilentTimeout { timeout: Duration },

    /// A chunk could not be decoded into a message.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// A decoded piece was not valid JSON.
    #[error("Decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// A decoded message is itself an error payload.
    #[error("Error payload received: {payload}")]
    Application { payload: serde_json::Value },

    /// The first connection of a `connect()`/`reconnect()` call failed.
    #[error("Connection attempt failed: {source}")]
    ConnectFailed {
        #[source]
        source: Arc<StreamError>,
    },

    /// A retry attempt could not establish a replacement connection.
    #[error("Reconnect attempt {attempt} failed: {source}")]
    Reconnect {
        attempt: u32,
        #[source]
        source: Arc<StreamError>,
    },

    /// The retry budget ran out.
    #[error("Retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },

    /// An error-classified event observed by a pull consumer.
    #[error("{kind}: {source}")]
    Failure {
        kind: ErrorKind,
        #[source]
        source: Arc<StreamError>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A connection attempt is already in flight.
    #[error("Connection process is already running")]
    ConnectionInProgress,

    /// The background driver is gone.
    #[error("Stream driver shut down")]
    Shutdown,
}

impl StreamError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
