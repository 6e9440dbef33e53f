//! Pull-based consumption of a stream's messages.
//!
//! [`MessageStream`] bridges the push-style bus into a
//! [`futures_core::Stream`]. Events published while nobody polls are queued
//! in arrival order; the consumer's waker is stored and woken on the next
//! push.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll, Waker},
};

use futures_core::Stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    bus::{EventBus, EventHandler, SubscriptionId},
    error::{StreamError, StreamResult},
    types::{EventKind, StreamEvent},
};

#[derive(Default)]
struct BridgeState {
    queue: VecDeque<StreamResult<Value>>,
    waker: Option<Waker>,
    /// No further items will be queued.
    input_closed: bool,
}

impl BridgeState {
    fn take_waker(&mut self) -> Option<Waker> {
        self.waker.take()
    }
}

/// Bus-side half of the bridge, shared by the bridge's handlers.
///
/// Dropped once every bridge handler is gone, which also ends iteration when
/// listeners are removed from under the iterator.
struct BridgeSink {
    state: Arc<Mutex<BridgeState>>,
}

impl BridgeSink {
    fn accept(&self, event: &StreamEvent) {
        let waker = {
            let mut state = self.state.lock();
            if state.input_closed {
                return;
            }
            match event {
                StreamEvent::Data(message) => state.queue.push_back(Ok(message.clone())),
                StreamEvent::Error(error) => {
                    state.queue.push_back(Err(StreamError::Failure {
                        kind: error.kind,
                        source: Arc::clone(&error.error),
                    }));
                    state.input_closed = true;
                }
                StreamEvent::ConnectionClosed => state.input_closed = true,
                _ => return,
            }
            state.take_waker()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl Drop for BridgeSink {
    fn drop(&mut self) {
        let waker = {
            let mut state = self.state.lock();
            state.input_closed = true;
            state.take_waker()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Messages of a [`ResilientStream`](crate::ResilientStream), in order.
///
/// Yields `Ok` for every `data` event. An `error` event is yielded as
/// [`StreamError::Failure`] and ends the sequence; `connection-closed` ends
/// it without an item. The sequence also ends when the stream is destroyed
/// or dropped.
///
/// Dropping the iterator removes its subscriptions and discards anything
/// still buffered.
pub struct MessageStream {
    state: Arc<Mutex<BridgeState>>,
    bus: Weak<EventBus>,
    subscriptions: Vec<SubscriptionId>,
}

impl MessageStream {
    pub(crate) fn attach(bus: &Arc<EventBus>) -> Self {
        let state = Arc::new(Mutex::new(BridgeState::default()));
        let sink = Arc::new(BridgeSink {
            state: Arc::clone(&state),
        });

        let subscriptions = [EventKind::Data, EventKind::Error, EventKind::ConnectionClosed]
            .into_iter()
            .map(|kind| {
                let sink = Arc::clone(&sink);
                let handler: EventHandler = Arc::new(move |event: &StreamEvent| sink.accept(event));
                bus.subscribe_bridge(kind, handler)
            })
            .collect();

        Self {
            state,
            bus: Arc::downgrade(bus),
            subscriptions,
        }
    }

    /// Wait for the next message; `None` once the sequence has ended.
    pub async fn next_message(&mut self) -> Option<StreamResult<Value>> {
        self.next().await
    }

    /// Returns `true` if items are queued.
    pub fn has_buffered(&self) -> bool {
        !self.state.lock().queue.is_empty()
    }

    /// Take every queued item without waiting.
    pub fn drain_buffered(&mut self) -> Vec<StreamResult<Value>> {
        self.state.lock().queue.drain(..).collect()
    }

    /// Stop listening and discard the queue. Polling afterwards yields `None`.
    pub fn close(&mut self) {
        self.detach();
        let mut state = self.state.lock();
        state.queue.clear();
        state.input_closed = true;
        state.waker = None;
    }

    fn detach(&mut self) {
        let subscriptions = std::mem::take(&mut self.subscriptions);
        if let Some(bus) = self.bus.upgrade() {
            for id in subscriptions {
                bus.unsubscribe(id);
            }
        }
    }
}

impl Stream for MessageStream {
    type Item = StreamResult<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let finished = {
            let mut state = this.state.lock();
            if let Some(item) = state.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if !state.input_closed {
                match &state.waker {
                    Some(waker) if waker.will_wake(cx.waker()) => {}
                    _ => state.waker = Some(cx.waker().clone()),
                }
            }
            state.input_closed
        };

        if finished {
            this.detach();
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageStream")
            .field("buffered", &state.queue.len())
            .field("input_closed", &state.input_closed)
            .finish_non_exhaustive()
    }
}
