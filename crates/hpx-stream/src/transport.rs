//! Transport handles and the connection factory seam.
//!
//! Building and authenticating the streaming request is left to the
//! [`ConnectionFactory`]; this crate only consumes what it yields: a readable
//! byte stream, an optional request-side error signal, and an abort hook.

use std::{fmt, future::Future, pin::Pin};

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::oneshot;

use crate::error::{StreamError, StreamResult};

/// Readable side of a transport connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = StreamResult<Bytes>> + Send>>;

/// One request/response pair yielded by a [`ConnectionFactory`].
///
/// An `Err` item on the response, a request-side error, or the end of the
/// response stream each count as a connection failure.
pub struct Transport {
    pub(crate) response: ByteStream,
    pub(crate) request_error: Option<oneshot::Receiver<StreamError>>,
    abort: Option<Box<dyn FnOnce() + Send>>,
}

impl Transport {
    /// Wrap a response body stream.
    pub fn new<S>(response: S) -> Self
    where
        S: Stream<Item = StreamResult<Bytes>> + Send + 'static,
    {
        Self {
            response: Box::pin(response),
            request_error: None,
            abort: None,
        }
    }

    /// Attach the request side: an error sent on `rx` fails the connection.
    ///
    /// Dropping the sender without sending means the request side finished
    /// cleanly.
    #[must_use]
    pub fn with_request_errors(mut self, rx: oneshot::Receiver<StreamError>) -> Self {
        self.request_error = Some(rx);
        self
    }

    /// Run `abort` when the connection is torn down by this side.
    #[must_use]
    pub fn on_abort(mut self, abort: impl FnOnce() + Send + 'static) -> Self {
        self.abort = Some(Box::new(abort));
        self
    }

    /// Detach both sides and abort the underlying connection.
    pub(crate) fn abort(mut self) {
        self.request_error = None;
        if let Some(abort) = self.abort.take() {
            abort();
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("request_error", &self.request_error.is_some())
            .field("abort", &self.abort.is_some())
            .finish_non_exhaustive()
    }
}

/// Opens the streaming connection.
///
/// Called for the first connection and for every reconnect; implementations
/// own the request parameters and credentials.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new transport connection.
    async fn connect(&self) -> StreamResult<Transport>;
}

/// [`ConnectionFactory`] backed by an async closure.
#[derive(Clone)]
pub struct FnConnectionFactory<F> {
    connect: F,
}

impl<F> FnConnectionFactory<F> {
    /// Wrap `connect`.
    pub fn new(connect: F) -> Self {
        Self { connect }
    }
}

#[async_trait]
impl<F, Fut> ConnectionFactory for FnConnectionFactory<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StreamResult<Transport>> + Send + 'static,
{
    async fn connect(&self) -> StreamResult<Transport> {
        (self.connect)().await
    }
}

/// Waits for a request-side failure; pending forever if there is none.
pub(crate) async fn request_failure(rx: &mut Option<oneshot::Receiver<StreamError>>) -> StreamError {
    if let Some(receiver) = rx.as_mut()
        && let Ok(error) = receiver.await
    {
        *rx = None;
        return error;
    }
    *rx = None;
    std::future::pending().await
}
