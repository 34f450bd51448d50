// ABOUTME: Per-operation progress event bus between a runtime adapter and its consumer.
// ABOUTME: Best-effort intermediate events, guaranteed terminal event, single owner closes.

use crate::status::{DomainError, WireStatus, translate};
use crate::types::CallContext;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tonic::Status;

/// Default number of intermediate events a bus buffers.
pub const DEFAULT_CAPACITY: usize = 4;

// Slots held back so the terminal event never competes with progress.
const RESERVED_SLOTS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProgress {
    pub image: String,
    pub tag: String,
    /// Cumulative, never a delta.
    pub bytes_received: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub message: String,
    pub stream: LogStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    Image(ImageProgress),
    Container(ContainerInfo),
    Log(LogLine),
    Volume(VolumeInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    InProgress,
    Finished,
}

/// One incremental status or result message for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub body: EventBody,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireStatus>,
}

impl ProgressEvent {
    pub fn progress(body: EventBody) -> Self {
        Self {
            body,
            status: EventStatus::InProgress,
            error: None,
        }
    }

    pub fn finished(body: EventBody) -> Self {
        Self {
            body,
            status: EventStatus::Finished,
            error: None,
        }
    }

    pub fn failed(body: EventBody, status: &Status) -> Self {
        Self {
            body,
            status: EventStatus::Finished,
            error: Some(WireStatus::from(status)),
        }
    }

    /// Finished or carrying an error; nothing may follow it.
    pub fn is_terminal(&self) -> bool {
        self.status == EventStatus::Finished || self.error.is_some()
    }

    pub fn domain_error(&self) -> Option<DomainError> {
        self.error.as_ref().map(|e| translate(&e.to_status()))
    }
}

/// Create a bus holding up to `capacity` intermediate events.
///
/// The receiver stops yielding once `ctx` is cancelled or past its deadline.
pub fn bus(capacity: usize, ctx: CallContext) -> (EventSender, EventReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity + RESERVED_SLOTS);
    let sender = EventSender {
        tx,
        ctx: ctx.clone(),
        dropped: AtomicU64::new(0),
        terminated: AtomicBool::new(false),
    };
    let receiver = EventReceiver {
        rx,
        ctx,
        terminated: false,
    };
    (sender, receiver)
}

/// Producer half. Not `Clone`: only the orchestrator owns it, and
/// adapters borrow it for the duration of a call.
#[derive(Debug)]
pub struct EventSender {
    tx: mpsc::Sender<ProgressEvent>,
    ctx: CallContext,
    dropped: AtomicU64,
    terminated: AtomicBool,
}

impl EventSender {
    /// Offer an intermediate event without blocking.
    ///
    /// Returns `true` when the call is cancelled, expired, or the consumer is
    /// gone, telling the producer to stop. A full bus drops the event.
    pub fn send(&self, event: ProgressEvent) -> bool {
        if self.ctx.is_done() {
            return true;
        }
        if self.terminated.load(Ordering::Acquire) {
            tracing::debug!("event after terminal event ignored");
            return false;
        }
        if self.tx.capacity() <= RESERVED_SLOTS {
            self.record_drop();
            return false;
        }
        let terminal = event.is_terminal();
        match self.tx.try_send(event) {
            Ok(()) => {
                if terminal {
                    self.terminated.store(true, Ordering::Release);
                }
                false
            }
            Err(TrySendError::Full(_)) => {
                self.record_drop();
                false
            }
            Err(TrySendError::Closed(_)) => true,
        }
    }

    /// Deliver the terminal event. Later sends are ignored.
    ///
    /// Uses the reserved slot; if the consumer has fallen behind, waits for
    /// room unless the call is cancelled first.
    pub async fn finish(&self, event: ProgressEvent) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            tracing::debug!("terminal event already delivered");
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tokio::select! {
                    res = self.tx.send(event) => {
                        if res.is_err() {
                            tracing::debug!("consumer gone before terminal event");
                        }
                    }
                    _ = self.ctx.done() => {
                        tracing::debug!("call ended before terminal event was delivered");
                    }
                }
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("consumer gone before terminal event");
            }
        }
    }

    /// Close the bus. Consumes the sender, so it can only happen once.
    pub fn close(self) {
        let dropped = self.dropped();
        if dropped > 0 {
            tracing::debug!(dropped, "bus closed with dropped events");
        }
    }

    /// Intermediate events dropped because the bus was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(dropped, "unable to send event; dropping");
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
    ctx: CallContext,
    terminated: bool,
}

impl EventReceiver {
    /// Next event in send order, or `None` once the bus is closed, the
    /// terminal event has been seen, or the call is cancelled.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if self.terminated {
            return None;
        }
        let event = tokio::select! {
            biased;
            _ = self.ctx.done() => None,
            event = self.rx.recv() => event,
        }?;
        if event.is_terminal() {
            self.terminated = true;
        }
        Some(event)
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        })
    }
}
