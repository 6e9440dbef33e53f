//! Reconnection controller.
//!
//! The driver is the long-lived background task behind a
//! [`ResilientStream`](crate::ResilientStream). It owns the live
//! [`ConnectionSession`], the retry state and the retry timer, and is the only
//! place where they change. Every lifecycle transition publishes on the bus
//! from this task, so subscribers observe events in production order.
//!
//! ```text
//! Idle ── connect ──► Connecting ──ok──► Connected ──failure──► Reconnecting{n}
//!                         │                  ▲                     │   │
//!                         └──failure──┐      └────────ok───────────┘   │ failure
//!                                     ▼                                ▼
//!                       Closed ◄── budget/no auto ──── backoff timer ──┘
//!                     LimitExceeded
//! ```

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Sleep, sleep},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{ManualReconnectPolicy, StreamConfig},
    error::{StreamError, StreamResult},
    reconnect::RetryState,
    session::{ConnectionFailure, ConnectionSession, Relay},
    transport::{ConnectionFactory, Transport},
    types::{ErrorKind, StreamEvent},
};

/// Connection state as seen by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// `connect()` has not been called yet.
    Idle,
    /// Opening the first connection of a `connect()` or `reconnect()` call.
    Connecting,
    /// A session is live.
    Connected,
    /// Retrying after a failure.
    Reconnecting {
        /// Zero-based index of the current or next attempt.
        attempt: u32,
    },
    /// Terminal until the next `connect()`/`reconnect()`.
    Closed,
    /// Terminal after the retry budget ran out.
    LimitExceeded,
}

impl ConnectionState {
    /// Returns `true` if a session is live.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` for `Closed` and `LimitExceeded`.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::LimitExceeded)
    }
}

/// Control commands sent from the handle to the driver.
pub(crate) enum Command {
    /// `config` has already been validated by the handle.
    Connect {
        config: Box<StreamConfig>,
        reply: oneshot::Sender<StreamResult<()>>,
    },
    Reconnect {
        reply: oneshot::Sender<StreamResult<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

type Connecting = Pin<Box<dyn Future<Output = StreamResult<Transport>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttemptOrigin {
    /// Started by `connect()` or a caller's `reconnect()`.
    Caller,
    /// Started by the controller after a failure.
    Retry(u32),
}

struct PendingAttempt {
    origin: AttemptOrigin,
    connecting: Connecting,
    reply: Option<oneshot::Sender<StreamResult<()>>>,
}

enum Step {
    Command(Option<Command>),
    Attempt(StreamResult<Transport>),
    SessionFailed(ConnectionFailure),
    RetryDue,
}

pub(crate) struct StreamDriver {
    factory: Arc<dyn ConnectionFactory>,
    relay: Relay,
    config: StreamConfig,
    retry: RetryState,
    state: watch::Sender<ConnectionState>,
    session: Option<ConnectionSession>,
    attempt: Option<PendingAttempt>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    /// A connection was established since the last `connect()`.
    has_connected: bool,
    cmd_rx: mpsc::Receiver<Command>,
}

impl StreamDriver {
    pub(crate) fn new(
        factory: Arc<dyn ConnectionFactory>,
        relay: Relay,
        config: StreamConfig,
        state: watch::Sender<ConnectionState>,
        cmd_rx: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            factory,
            relay,
            config,
            retry: RetryState::default(),
            state,
            session: None,
            attempt: None,
            retry_timer: None,
            has_connected: false,
            cmd_rx,
        }
    }

    /// Run until destroyed or until every handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            let step = tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => Step::Command(cmd),
                result = poll_attempt(self.attempt.as_mut()) => Step::Attempt(result),
                failure = poll_session(self.session.as_mut(), &mut self.relay) => {
                    Step::SessionFailed(failure)
                }
                () = poll_retry_timer(self.retry_timer.as_mut()) => Step::RetryDue,
            };

            match step {
                Step::Command(Some(cmd)) => {
                    if !self.handle_command(cmd) {
                        return;
                    }
                }
                Step::Command(None) => {
                    debug!("All stream handles dropped, stopping driver");
                    self.teardown();
                    return;
                }
                Step::Attempt(result) => self.on_attempt_finished(result),
                Step::SessionFailed(failure) => self.on_connection_failed(failure),
                Step::RetryDue => {
                    self.retry_timer = None;
                    self.start_retry();
                }
            }
        }
    }

    /// Returns `false` once the driver should stop.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Connect { config, reply } => {
                if self.attempt.is_some() {
                    let _ = reply.send(Err(StreamError::ConnectionInProgress));
                    return true;
                }
                self.config = *config;
                self.retry.reset();
                self.has_connected = false;
                self.start_caller_attempt(reply);
            }
            Command::Reconnect { reply } => {
                if self.attempt.is_some() {
                    let _ = reply.send(Err(StreamError::ConnectionInProgress));
                    return true;
                }
                match self.config.manual_reconnect {
                    ManualReconnectPolicy::ResetBudget => self.retry.reset(),
                    ManualReconnectPolicy::KeepBudget
                        if *self.state.borrow() == ConnectionState::LimitExceeded =>
                    {
                        let attempts = self.retry.attempts_made();
                        let _ = reply.send(Err(StreamError::RetryBudgetExhausted { attempts }));
                        return true;
                    }
                    ManualReconnectPolicy::KeepBudget => {}
                }
                self.start_caller_attempt(reply);
            }
            Command::Close { reply } => {
                self.close();
                let _ = reply.send(());
            }
            Command::Destroy { reply } => {
                self.relay.bus().unsubscribe_all();
                self.close();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn start_caller_attempt(&mut self, reply: oneshot::Sender<StreamResult<()>>) {
        self.retry_timer = None;
        self.set_state(ConnectionState::Connecting);
        self.begin_attempt(AttemptOrigin::Caller, Some(reply));
    }

    /// Silently tear down the previous session and ask the factory for a new
    /// transport.
    fn begin_attempt(&mut self, origin: AttemptOrigin, reply: Option<oneshot::Sender<StreamResult<()>>>) {
        if let Some(mut previous) = self.session.take() {
            previous.close();
        }

        let factory = Arc::clone(&self.factory);
        self.attempt = Some(PendingAttempt {
            origin,
            connecting: Box::pin(async move { factory.connect().await }),
            reply,
        });
    }

    fn on_attempt_finished(&mut self, result: StreamResult<Transport>) {
        let Some(PendingAttempt { origin, reply, .. }) = self.attempt.take() else {
            return;
        };

        match result {
            Ok(transport) => {
                // A partial message from the previous connection must not
                // bleed into this one.
                self.relay.reset_parser();
                self.session = Some(ConnectionSession::open(
                    transport,
                    self.config.keep_alive_timeout,
                    self.config.keep_alive_marker.clone(),
                ));
                self.set_state(ConnectionState::Connected);

                let event = if self.has_connected {
                    StreamEvent::Reconnected
                } else {
                    StreamEvent::Connected
                };
                self.has_connected = true;
                info!(
                    ?origin,
                    attempts_made = self.retry.attempts_made(),
                    "Stream connection established"
                );
                self.relay.publish(event);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(err) => {
                let err = Arc::new(err);
                match origin {
                    AttemptOrigin::Caller => {
                        warn!(error = %err, "Stream connection failed");
                        self.relay.publish_error(
                            StreamEvent::ConnectionError(Arc::clone(&err)),
                            ErrorKind::ConnectionError,
                            Arc::clone(&err),
                        );
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(StreamError::ConnectFailed { source: err }));
                        }
                        self.recover();
                    }
                    AttemptOrigin::Retry(attempt) => {
                        warn!(attempt, error = %err, "Stream reconnect attempt failed");
                        let error = Arc::new(StreamError::Reconnect {
                            attempt,
                            source: err,
                        });
                        self.relay.publish_error(
                            StreamEvent::ReconnectError(attempt),
                            ErrorKind::ReconnectError,
                            error,
                        );
                        self.schedule_retry();
                    }
                }
            }
        }
    }

    fn on_connection_failed(&mut self, failure: ConnectionFailure) {
        if let Some(mut session) = self.session.take() {
            debug!(state = ?session.state(), "Releasing failed session");
            session.close();
        }

        match failure {
            ConnectionFailure::Transport(err) => {
                warn!(error = %err, "Stream connection error");
                let err = Arc::new(err);
                self.relay.publish_error(
                    StreamEvent::ConnectionError(Arc::clone(&err)),
                    ErrorKind::ConnectionError,
                    err,
                );
            }
            ConnectionFailure::Closed => {
                let error = StreamError::ConnectionClosed;
                warn!(%error, "Stream ended");
            }
            ConnectionFailure::Lost(timeout) => {
                let error = StreamError::SilentTimeout { timeout };
                warn!(%error, "Stream connection lost");
                self.relay.publish(StreamEvent::ConnectionLost);
            }
        }

        self.recover();
    }

    /// Decide between an immediate retry and termination after a failure.
    fn recover(&mut self) {
        if !self.config.auto_reconnect {
            info!("Auto-reconnect disabled, closing stream");
            self.terminate(ConnectionState::Closed);
            return;
        }
        if !self.config.max_retries.allows(self.retry.attempts_made()) {
            self.exhaust();
            return;
        }
        self.start_retry();
    }

    fn start_retry(&mut self) {
        let attempt = self.retry.record_attempt();
        info!(
            attempt,
            remaining = ?self.config.max_retries.remaining(self.retry.attempts_made()),
            "Stream reconnect attempt"
        );
        self.set_state(ConnectionState::Reconnecting { attempt });
        self.relay.publish(StreamEvent::ReconnectAttempt(attempt));
        self.begin_attempt(AttemptOrigin::Retry(attempt), None);
    }

    /// Arm the backoff timer for the next attempt, or give up.
    fn schedule_retry(&mut self) {
        if !self.config.max_retries.allows(self.retry.attempts_made()) {
            self.exhaust();
            return;
        }

        let attempt = self.retry.attempts_made();
        let delay = self.retry.next_delay(&self.config.backoff);
        warn!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Stream reconnecting after backoff"
        );
        self.set_state(ConnectionState::Reconnecting { attempt });
        self.retry_timer = Some(Box::pin(sleep(delay)));
    }

    fn exhaust(&mut self) {
        error!(
            attempts = self.retry.attempts_made(),
            "Max stream reconnect attempts exceeded"
        );
        self.relay.publish(StreamEvent::ReconnectLimitExceeded);
        self.terminate(ConnectionState::LimitExceeded);
    }

    fn terminate(&mut self, state: ConnectionState) {
        self.teardown();
        self.set_state(state);
        self.relay.publish(StreamEvent::ConnectionClosed);
    }

    /// Caller-requested close: cancel everything, then report once.
    fn close(&mut self) {
        let already_closed = self.state.borrow().is_closed();
        self.teardown();
        if already_closed {
            debug!("Stream already closed");
            return;
        }
        info!("Stream closing (requested)");
        self.set_state(ConnectionState::Closed);
        self.relay.publish(StreamEvent::ConnectionClosed);
    }

    /// Drop timers, in-flight attempts and the live session without
    /// publishing.
    fn teardown(&mut self) {
        self.retry_timer = None;
        if let Some(PendingAttempt { reply, .. }) = self.attempt.take()
            && let Some(reply) = reply
        {
            let _ = reply.send(Err(StreamError::Shutdown));
        }
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

async fn poll_attempt(attempt: Option<&mut PendingAttempt>) -> StreamResult<Transport> {
    match attempt {
        Some(attempt) => attempt.connecting.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn poll_session(session: Option<&mut ConnectionSession>, relay: &mut Relay) -> ConnectionFailure {
    match session {
        Some(session) => session.run(relay).await,
        None => std::future::pending().await,
    }
}

async fn poll_retry_timer(timer: Option<&mut Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}
