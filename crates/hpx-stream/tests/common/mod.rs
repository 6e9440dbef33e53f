//! Shared helpers for the stream integration tests: an in-memory connection
//! factory driven by a script, and an event recorder.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use hpx_stream::{
    ConnectionFactory, EventKind, ResilientStream, StreamError, StreamEvent, StreamResult,
    Transport,
};
use parking_lot::Mutex;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Scripted factory
// ---------------------------------------------------------------------------

/// What the factory does on one `connect()` call.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Yield a transport driven by a [`MockRemote`].
    Open,
    /// Reject with a transport error.
    Fail(&'static str),
    /// Never resolve.
    Hang,
}

/// Server side of one in-memory connection.
#[derive(Clone)]
pub struct MockRemote {
    tx: mpsc::UnboundedSender<StreamResult<Bytes>>,
    aborted: Arc<AtomicBool>,
}

impl MockRemote {
    pub fn send(&self, chunk: &str) {
        let _ = self.tx.unbounded_send(Ok(Bytes::copy_from_slice(chunk.as_bytes())));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.unbounded_send(Err(StreamError::transport(message)));
    }

    /// End the response body.
    pub fn end(&self) {
        self.tx.close_channel();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Connection factory that follows a script; once the script runs out every
/// call fails.
#[derive(Default)]
pub struct ScriptedFactory {
    script: Mutex<VecDeque<Outcome>>,
    remotes: Mutex<Vec<MockRemote>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedFactory {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        })
    }

    /// A factory whose every call fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    /// Remote of the `index`-th opened connection.
    pub fn remote(&self, index: usize) -> MockRemote {
        self.remotes.lock()[index].clone()
    }

    pub fn opened(&self) -> usize {
        self.remotes.lock().len()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Time elapsed between consecutive `connect()` calls.
    pub fn call_gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock();
        calls.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    fn open(&self) -> Transport {
        let (tx, rx) = mpsc::unbounded();
        let aborted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&aborted);
        self.remotes.lock().push(MockRemote { tx, aborted });
        Transport::new(rx).on_abort(move || flag.store(true, Ordering::SeqCst))
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(&self) -> StreamResult<Transport> {
        self.calls.lock().push(Instant::now());
        let outcome = self.script.lock().pop_front();
        match outcome {
            Some(Outcome::Open) => Ok(self.open()),
            Some(Outcome::Fail(message)) => Err(StreamError::transport(message)),
            Some(Outcome::Hang) => std::future::pending().await,
            None => Err(StreamError::transport("connection refused")),
        }
    }
}

pub fn stream_for(factory: &Arc<ScriptedFactory>) -> ResilientStream {
    ResilientStream::new(Arc::clone(factory) as Arc<dyn ConnectionFactory>)
}

// ---------------------------------------------------------------------------
// Event recorder
// ---------------------------------------------------------------------------

/// Records every event published on a stream.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl Recorder {
    pub fn attach(stream: &ResilientStream) -> Self {
        let recorder = Self::default();
        for kind in EventKind::ALL {
            let events = Arc::clone(&recorder.events);
            stream.on(kind, Arc::new(move |event: &StreamEvent| events.lock().push(event.clone())));
        }
        recorder
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(StreamEvent::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Let the driver task run until it is idle, without moving the clock.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
