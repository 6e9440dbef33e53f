//! A single live connection.
//!
//! [`ConnectionSession`] owns one [`Transport`] and its [`Watchdog`]. It
//! forwards chunks to the decoder through a [`Relay`] and folds transport
//! errors, transport close and watchdog expiry into one
//! [`ConnectionFailure`].

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, trace};

use crate::{
    bus::EventBus,
    error::StreamError,
    parser::{ErrorClassifier, MessageParser, ParseOutcome},
    transport::{Transport, request_failure},
    types::{ErrorEvent, ErrorKind, StreamEvent},
    watchdog::Watchdog,
};

/// Why a session stopped.
#[derive(Debug)]
pub enum ConnectionFailure {
    /// Error on the request or response side.
    Transport(StreamError),
    /// The response stream ended.
    Closed,
    /// No chunk within the keep-alive interval.
    Lost(Duration),
}

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Forwarding bytes.
    Open,
    /// Failure reported; waiting for teardown.
    Closing,
    /// Transport released.
    Closed,
}

/// Decoder plus bus: where a session's bytes end up.
pub(crate) struct Relay {
    parser: Box<dyn MessageParser>,
    classifier: ErrorClassifier,
    bus: Arc<EventBus>,
}

impl Relay {
    pub(crate) fn new(
        parser: Box<dyn MessageParser>,
        classifier: ErrorClassifier,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            parser,
            classifier,
            bus,
        }
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn publish(&self, event: StreamEvent) {
        self.bus.publish(&event);
    }

    /// Publish `dedicated`, then the same error on the unified `error` channel.
    pub(crate) fn publish_error(&self, dedicated: StreamEvent, kind: ErrorKind, error: Arc<StreamError>) {
        self.publish(dedicated);
        self.publish(StreamEvent::Error(ErrorEvent::new(kind, error)));
    }

    pub(crate) fn reset_parser(&mut self) {
        self.parser.reset();
    }

    fn forward(&mut self, chunk: &[u8]) {
        for outcome in self.parser.push(chunk) {
            match outcome {
                ParseOutcome::Message(message) if (self.classifier)(&message) => {
                    let dedicated = StreamEvent::DataError(message.clone());
                    let error = Arc::new(StreamError::Application { payload: message });
                    self.publish_error(dedicated, ErrorKind::DataError, error);
                }
                ParseOutcome::Message(message) => self.publish(StreamEvent::Data(message)),
                ParseOutcome::Error(e) => {
                    let error = Arc::new(e);
                    let dedicated = StreamEvent::TweetParseError(Arc::clone(&error));
                    self.publish_error(dedicated, ErrorKind::TweetParseError, error);
                }
            }
        }
    }
}

enum Signal {
    Chunk(Bytes),
    Failed(ConnectionFailure),
}

/// Owns one transport connection for its lifetime.
#[derive(Debug)]
pub(crate) struct ConnectionSession {
    transport: Option<Transport>,
    watchdog: Watchdog,
    keep_alive_marker: Bytes,
    state: SessionState,
}

impl ConnectionSession {
    /// Bind to `transport` and arm the watchdog.
    pub(crate) fn open(
        transport: Transport,
        keep_alive_timeout: Option<Duration>,
        keep_alive_marker: Bytes,
    ) -> Self {
        let mut watchdog = Watchdog::new(keep_alive_timeout);
        watchdog.reset();
        Self {
            transport: Some(transport),
            watchdog,
            keep_alive_marker,
            state: SessionState::Open,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Forward bytes until the connection fails.
    ///
    /// Resolves at most once per session; afterwards it stays pending.
    /// Cancel-safe between chunks. Each chunk spends a unit of the task's
    /// coop budget, so a response that is always ready still lets the driver
    /// take commands.
    pub(crate) async fn run(&mut self, relay: &mut Relay) -> ConnectionFailure {
        loop {
            if self.state != SessionState::Open {
                return std::future::pending().await;
            }
            let Some(transport) = self.transport.as_mut() else {
                return std::future::pending().await;
            };

            let signal = tokio::select! {
                biased;
                error = request_failure(&mut transport.request_error) => {
                    Signal::Failed(ConnectionFailure::Transport(error))
                }
                item = transport.response.next() => match item {
                    Some(Ok(chunk)) => Signal::Chunk(chunk),
                    Some(Err(e)) => Signal::Failed(ConnectionFailure::Transport(e)),
                    None => Signal::Failed(ConnectionFailure::Closed),
                },
                timeout = self.watchdog.expired() => Signal::Failed(ConnectionFailure::Lost(timeout)),
            };

            match signal {
                Signal::Chunk(chunk) => {
                    self.handle_chunk(&chunk, relay);
                    tokio::task::coop::consume_budget().await;
                }
                Signal::Failed(failure) => {
                    self.state = SessionState::Closing;
                    self.watchdog.cancel();
                    return failure;
                }
            }
        }
    }

    fn handle_chunk(&mut self, chunk: &[u8], relay: &mut Relay) {
        self.watchdog.reset();
        if chunk == self.keep_alive_marker.as_ref() {
            debug!("Keep-alive received");
            relay.publish(StreamEvent::KeepAlive);
            return;
        }
        trace!(len = chunk.len(), "Forwarding chunk to parser");
        relay.forward(chunk);
    }

    /// Detach and abort the transport without publishing anything.
    pub(crate) fn close(&mut self) {
        self.watchdog.cancel();
        if let Some(transport) = self.transport.take() {
            debug!("Tearing down connection session");
            transport.abort();
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
