//! Incremental event delivery for streaming runs.
//!
//! A streaming run starts on its own task at the first poll and pushes one
//! [`Event`] per completed node into a bounded channel. Before each node the
//! producer reserves a channel slot, so with the default capacity of one the
//! next node waits until the consumer has taken the previous event. Dropping
//! the [`RunStream`] cancels the run.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::core::run_state::RunState;
use crate::core::transitions::Node;
use crate::core::types::{ReasoningStep, ResultRecord, SafetyCheckResult, Terminal};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Intermediate,
    Final,
    Error,
}

/// Point-in-time view of a run after one node completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub node: Node,
    pub reasoning_log: Vec<ReasoningStep>,
    pub safety_log: Vec<SafetyCheckResult>,
    pub iteration: u32,
    /// Only set on `react_observe` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_policy: Option<bool>,
    pub elapsed_ms: u64,
    /// Present on the terminal event only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultRecord>,
}

impl Event {
    pub(crate) fn intermediate(node: Node, state: &RunState, elapsed_ms: u64) -> Self {
        let snapshot = state.snapshot();
        Self {
            kind: EventKind::Intermediate,
            node,
            reasoning_log: snapshot.reasoning_log,
            safety_log: snapshot.safety_log,
            iteration: snapshot.iteration,
            continue_policy: (node == Node::Observe).then_some(snapshot.continue_policy),
            elapsed_ms,
            result: None,
        }
    }

    pub(crate) fn terminal(record: ResultRecord) -> Self {
        let kind = if record.terminal == Terminal::Failed {
            EventKind::Error
        } else {
            EventKind::Final
        };
        Self {
            kind,
            node: Node::Done,
            reasoning_log: record.reasoning_log.clone(),
            safety_log: record.safety_log.clone(),
            iteration: record.react_cycles,
            continue_policy: None,
            elapsed_ms: record.elapsed_ms,
            result: Some(record),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind != EventKind::Intermediate
    }
}

/// Where a run reports its progress.
pub(crate) enum Emitter {
    /// Blocking `run`: nothing observes intermediate state.
    Silent,
    Channel(mpsc::Sender<Event>),
}

impl Emitter {
    /// Wait for room for the next event. A closed channel means the consumer
    /// is gone and the run must stop.
    pub(crate) async fn reserve(&self) -> Result<Slot<'_>, EngineError> {
        match self {
            Self::Silent => Ok(Slot::Silent),
            Self::Channel(tx) => tx
                .reserve()
                .await
                .map(Slot::Reserved)
                .map_err(|_| consumer_dropped()),
        }
    }

    /// Deliver an event, waiting for channel capacity.
    pub(crate) async fn emit(&self, make: impl FnOnce() -> Event) -> Result<(), EngineError> {
        self.reserve().await?.fill(make);
        Ok(())
    }
}

/// Channel capacity held for one event.
pub(crate) enum Slot<'a> {
    Silent,
    Reserved(mpsc::Permit<'a, Event>),
}

impl Slot<'_> {
    pub(crate) fn fill(self, make: impl FnOnce() -> Event) {
        if let Self::Reserved(permit) = self {
            permit.send(make());
        }
    }
}

fn consumer_dropped() -> EngineError {
    EngineError::cancelled("stream consumer dropped")
}

/// Lazy, finite sequence of events for one run. Ends after the terminal event.
pub struct RunStream {
    inner: Pin<Box<dyn Stream<Item = Event> + Send>>,
    _cancel_on_drop: DropGuard,
}

impl RunStream {
    /// `producer` is spawned on the first poll; an unpolled stream runs nothing.
    pub(crate) fn new<F>(
        producer: F,
        mut rx: mpsc::Receiver<Event>,
        cancel_on_drop: DropGuard,
    ) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = async_stream::stream! {
            tokio::spawn(producer);
            while let Some(event) = rx.recv().await {
                let done = event.is_terminal();
                yield event;
                if done {
                    break;
                }
            }
        };
        Self {
            inner: Box::pin(inner),
            _cancel_on_drop: cancel_on_drop,
        }
    }

    /// Drain the stream and return the terminal result.
    pub async fn into_result(mut self) -> Option<ResultRecord> {
        while let Some(event) = self.next().await {
            if event.is_terminal() {
                return event.result;
            }
        }
        None
    }
}

impl Stream for RunStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.inner.as_mut().poll_next(cx)
    }
}
