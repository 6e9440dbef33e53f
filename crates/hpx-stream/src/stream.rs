//! Public stream handle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::{
    bus::{EventBus, EventHandler, SubscriptionId},
    config::StreamConfig,
    controller::{Command, ConnectionState, StreamDriver},
    error::{StreamError, StreamResult},
    iter::MessageStream,
    parser::{ErrorClassifier, ParserFactory, default_error_classifier, default_parser_factory},
    session::Relay,
    transport::ConnectionFactory,
    types::EventKind,
};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`ResilientStream`] with a custom decoder or classifier.
pub struct ResilientStreamBuilder {
    factory: Arc<dyn ConnectionFactory>,
    parser_factory: ParserFactory,
    classifier: ErrorClassifier,
    config: StreamConfig,
}

impl ResilientStreamBuilder {
    /// Initial configuration, used until the first `connect()`.
    #[must_use]
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Decoder used for every connection of the stream.
    #[must_use]
    pub fn parser(mut self, parser_factory: ParserFactory) -> Self {
        self.parser_factory = parser_factory;
        self
    }

    /// Predicate marking decoded messages as error payloads.
    #[must_use]
    pub fn error_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Build the stream. No connection is opened yet.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn build(self) -> StreamResult<ResilientStream> {
        self.config.validate().map_err(StreamError::config)?;
        Ok(ResilientStream::assemble(
            self.factory,
            self.parser_factory,
            self.classifier,
            Arc::new(EventBus::new()),
            self.config,
        ))
    }
}

// ---------------------------------------------------------------------------
// ResilientStream
// ---------------------------------------------------------------------------

/// A long-lived streaming connection that survives transport failures.
///
/// Lifecycle and data are observed through [`on`](Self::on) subscriptions or
/// pulled through [`messages`](Self::messages). The connection itself is run
/// by a background task which is spawned on the first command, so building or
/// cloning a stream does not require a runtime.
///
/// Dropping the stream tears the connection down without publishing
/// anything.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use hpx_stream::{EventKind, ResilientStream, RetryLimit, StreamConfig, StreamEvent};
/// # async fn example(factory: Arc<dyn hpx_stream::ConnectionFactory>) -> hpx_stream::StreamResult<()> {
///
/// let stream = ResilientStream::new(factory);
/// stream.on(EventKind::Data, Arc::new(|event: &StreamEvent| println!("{event:?}")));
///
/// let config = StreamConfig::new()
///     .auto_reconnect(true)
///     .max_retries(RetryLimit::Unlimited);
/// stream.connect(config).await?;
/// # Ok(())
/// # }
/// ```
pub struct ResilientStream {
    factory: Arc<dyn ConnectionFactory>,
    parser_factory: ParserFactory,
    classifier: ErrorClassifier,
    bus: Arc<EventBus>,
    config: Mutex<StreamConfig>,
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    /// Driver waiting for its first command.
    driver: Mutex<Option<StreamDriver>>,
}

impl ResilientStream {
    /// Create a stream with the default decoder, classifier and config.
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::assemble(
            factory,
            default_parser_factory(),
            default_error_classifier(),
            Arc::new(EventBus::new()),
            StreamConfig::default(),
        )
    }

    /// Start building a customised stream.
    pub fn builder(factory: Arc<dyn ConnectionFactory>) -> ResilientStreamBuilder {
        ResilientStreamBuilder {
            factory,
            parser_factory: default_parser_factory(),
            classifier: default_error_classifier(),
            config: StreamConfig::default(),
        }
    }

    fn assemble(
        factory: Arc<dyn ConnectionFactory>,
        parser_factory: ParserFactory,
        classifier: ErrorClassifier,
        bus: Arc<EventBus>,
        config: StreamConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let relay = Relay::new(parser_factory(), Arc::clone(&classifier), Arc::clone(&bus));
        let driver = StreamDriver::new(
            Arc::clone(&factory),
            relay,
            config.clone(),
            state_tx,
            cmd_rx,
        );

        Self {
            factory,
            parser_factory,
            classifier,
            bus,
            config: Mutex::new(config),
            cmd_tx,
            state_rx,
            driver: Mutex::new(Some(driver)),
        }
    }

    // -- subscriptions ------------------------------------------------------

    /// Register `handler` for events of `kind`.
    pub fn on(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.bus.subscribe(kind, handler)
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Remove every registration, including those of open
    /// [`MessageStream`]s, which then end.
    pub fn remove_all_listeners(&self) {
        self.bus.unsubscribe_all();
    }

    /// Number of handlers registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.bus.subscriber_count(kind)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Apply `config`, reset the retry budget and open the first connection.
    ///
    /// Resolves once connected. When the first attempt fails the failure is
    /// also published, and retries continue in the background if
    /// `auto_reconnect` is set.
    ///
    /// # Errors
    ///
    /// - [`StreamError::Config`] if `config` is invalid
    /// - [`StreamError::ConnectionInProgress`] if an attempt is in flight
    /// - [`StreamError::ConnectFailed`] if the first attempt failed
    /// - [`StreamError::Shutdown`] after [`destroy`](Self::destroy)
    pub async fn connect(&self, config: StreamConfig) -> StreamResult<()> {
        config.validate().map_err(StreamError::config)?;

        let applied = config.clone();
        let result = self
            .request(|reply| Command::Connect {
                config: Box::new(applied),
                reply,
            })
            .await?;

        if !matches!(result, Err(StreamError::ConnectionInProgress)) {
            *self.config.lock() = config;
        }
        result
    }

    /// Tear down the current connection and open a new one.
    ///
    /// The retry budget is reset according to
    /// [`ManualReconnectPolicy`](crate::ManualReconnectPolicy).
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect), plus
    /// [`StreamError::RetryBudgetExhausted`] when the budget is kept and
    /// already spent.
    pub async fn reconnect(&self) -> StreamResult<()> {
        self.request(|reply| Command::Reconnect { reply }).await?
    }

    /// Cancel timers, abort the connection and publish `connection-closed`
    /// unless the stream is already closed.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Shutdown`] after [`destroy`](Self::destroy).
    pub async fn close(&self) -> StreamResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Remove every listener, close, and stop the background task.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Shutdown`] if the stream was already destroyed.
    pub async fn destroy(&self) -> StreamResult<()> {
        self.request(|reply| Command::Destroy { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> StreamResult<T> {
        self.ensure_driver();

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(command(reply))
            .await
            .map_err(|_| StreamError::Shutdown)?;
        rx.await.map_err(|_| StreamError::Shutdown)
    }

    fn ensure_driver(&self) {
        if let Some(driver) = self.driver.lock().take() {
            debug!("Spawning stream driver");
            tokio::spawn(driver.run());
        }
    }

    // -- observation --------------------------------------------------------

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Configuration applied by the last `connect()`, or the initial one.
    pub fn config(&self) -> StreamConfig {
        self.config.lock().clone()
    }

    /// Pull-based view of decoded messages from now on.
    pub fn messages(&self) -> MessageStream {
        MessageStream::attach(&self.bus)
    }
}

impl Clone for ResilientStream {
    /// A new, idle stream with the same factory, decoder, classifier,
    /// configuration and subscriptions.
    ///
    /// The copy shares nothing at runtime: it has its own connection, retry
    /// state and event bus. Registrations made later on either side are not
    /// mirrored, and open [`MessageStream`]s stay with the original.
    fn clone(&self) -> Self {
        Self::assemble(
            Arc::clone(&self.factory),
            Arc::clone(&self.parser_factory),
            Arc::clone(&self.classifier),
            Arc::new(self.bus.duplicate()),
            self.config(),
        )
    }
}

impl std::fmt::Debug for ResilientStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStream")
            .field("state", &*self.state_rx.borrow())
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::{
        transport::{FnConnectionFactory, Transport},
        types::StreamEvent,
    };

    fn idle_factory() -> Arc<dyn ConnectionFactory> {
        Arc::new(FnConnectionFactory::new(|| async { Ok::<_, StreamError>(Transport::new(stream::pending())) }))
    }

    #[test]
    fn test_new_stream_is_idle_without_runtime() {
        let stream = ResilientStream::new(idle_factory());
        assert_eq!(stream.state(), ConnectionState::Idle);
        assert!(!stream.config().auto_reconnect);

        let copy = stream.clone();
        assert_eq!(copy.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = ResilientStream::builder(idle_factory())
            .config(StreamConfig::new().command_channel_capacity(0))
            .build();
        assert!(matches!(result, Err(StreamError::Config { .. })));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let stream = ResilientStream::new(idle_factory());
        let result = stream.connect(StreamConfig::new().keep_alive_marker(bytes::Bytes::new())).await;
        assert!(matches!(result, Err(StreamError::Config { .. })));
        assert_eq!(stream.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_listener_registration() {
        let stream = ResilientStream::new(idle_factory());
        let id = stream.on(EventKind::Data, Arc::new(|_: &StreamEvent| {}));
        stream.on(EventKind::Error, Arc::new(|_: &StreamEvent| {}));
        assert_eq!(stream.listener_count(EventKind::Data), 1);

        assert!(stream.off(id));
        assert!(!stream.off(id));
        stream.remove_all_listeners();
        assert_eq!(stream.listener_count(EventKind::Error), 0);
    }
}
