//! # hpx-stream
//!
//! Resilient consumption of long-lived, chunked HTTP streams.
//!
//! A streaming endpoint can fail loudly (transport errors, the server closing
//! the response) or silently (the socket stays open but nothing arrives).
//! [`ResilientStream`] detects both, reconnects with a capped backoff and a
//! retry budget, and turns the raw bytes into decoded JSON messages.
//!
//! ## Features
//!
//! - **Silent-failure detection**: a keep-alive watchdog rearmed by every
//!   chunk, including the server's heartbeat marker
//! - **Reconnection**: quadratic (default) or exponential backoff, finite or
//!   unlimited retry budget
//! - **Push and pull**: subscribe to a fixed event taxonomy with
//!   [`ResilientStream::on`], or iterate messages with
//!   [`ResilientStream::messages`]
//! - **Pluggable transport**: the request itself is built by a
//!   [`ConnectionFactory`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use futures_util::StreamExt;
//! use hpx_stream::{ConnectionFactory, ResilientStream, RetryLimit, StreamConfig};
//!
//! async fn run(factory: Arc<dyn ConnectionFactory>) -> hpx_stream::StreamResult<()> {
//!     let stream = ResilientStream::new(factory);
//!     let mut messages = stream.messages();
//!
//!     stream
//!         .connect(StreamConfig::new().auto_reconnect(true).max_retries(RetryLimit::Finite(10)))
//!         .await?;
//!
//!     while let Some(message) = messages.next().await {
//!         println!("{}", message?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod iter;
pub mod parser;
pub mod reconnect;
pub mod session;
pub mod stream;
pub mod transport;
pub mod types;
pub mod watchdog;

// Re-export commonly used types
pub use bus::{EventBus, EventHandler, SubscriptionId};
pub use config::{DEFAULT_KEEP_ALIVE_MARKER, ManualReconnectPolicy, StreamConfig};
pub use controller::ConnectionState;
pub use error::{StreamError, StreamResult};
pub use iter::MessageStream;
pub use parser::{
    ErrorClassifier, JsonLinesParser, MessageParser, ParseOutcome, ParserFactory, is_error_payload,
};
pub use reconnect::{BackoffConfig, BackoffPolicy, RetryLimit};
pub use session::ConnectionFailure;
pub use stream::{ResilientStream, ResilientStreamBuilder};
pub use transport::{ByteStream, ConnectionFactory, FnConnectionFactory, Transport};
pub use types::{ErrorEvent, ErrorKind, EventKind, StreamEvent};
pub use watchdog::Watchdog;
