// ABOUTME: Per-request state tracking and supervised worker tasks.
// ABOUTME: Workers race the adapter against cancellation; stragglers are aborted as orphans.

use crate::types::CallContext;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tonic::{Code, Status};

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    Cancelled,
}

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Validating,
    Dispatched,
    Streaming,
    Terminated(Outcome),
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Validating => f.write_str("validating"),
            OperationState::Dispatched => f.write_str("dispatched"),
            OperationState::Streaming => f.write_str("streaming"),
            OperationState::Terminated(Outcome::Success) => f.write_str("terminated(success)"),
            OperationState::Terminated(Outcome::Error) => f.write_str("terminated(error)"),
            OperationState::Terminated(Outcome::Cancelled) => {
                f.write_str("terminated(cancelled)")
            }
        }
    }
}

/// State machine for one request. Transitions are logged; nothing leaves
/// `Terminated`.
#[derive(Debug)]
pub struct Operation {
    name: &'static str,
    state: OperationState,
}

impl Operation {
    pub fn begin(name: &'static str) -> Self {
        tracing::debug!(op = name, state = %OperationState::Validating, "operation started");
        Self {
            name,
            state: OperationState::Validating,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn advance(&mut self, next: OperationState) {
        if matches!(self.state, OperationState::Terminated(_)) {
            return;
        }
        tracing::debug!(op = self.name, from = %self.state, to = %next, "operation state");
        self.state = next;
    }

    pub fn succeed(&mut self) {
        self.advance(OperationState::Terminated(Outcome::Success));
    }

    /// Terminate with `status`, treating cancellation codes as cancellation.
    pub fn fail(&mut self, status: &Status) {
        let outcome = match status.code() {
            Code::Cancelled | Code::DeadlineExceeded => Outcome::Cancelled,
            _ => Outcome::Error,
        };
        if outcome == Outcome::Error {
            tracing::debug!(op = self.name, code = ?status.code(), message = status.message(), "operation failed");
        }
        self.advance(OperationState::Terminated(outcome));
    }

    pub fn cancel(&mut self) {
        self.advance(OperationState::Terminated(Outcome::Cancelled));
    }

    /// Run a validation step; a failure terminates the operation.
    pub fn validate<T>(&mut self, step: Result<T, Status>) -> Result<T, Status> {
        step.inspect_err(|status| self.fail(status))
    }
}

/// The status reported for a call that ended through its context.
pub fn cancelled_status(ctx: &CallContext) -> Status {
    if ctx.is_cancelled() {
        Status::cancelled("call cancelled")
    } else {
        Status::deadline_exceeded("deadline exceeded")
    }
}

/// Fails if the call is already over before any work starts.
pub fn check_context(ctx: &CallContext) -> Result<(), Status> {
    if ctx.is_done() {
        Err(cancelled_status(ctx))
    } else {
        Ok(())
    }
}

/// Drive `fut` until it completes or the call ends. Dropping `fut` on
/// cancellation is how cancellation reaches the adapter.
pub async fn until_done<T>(ctx: &CallContext, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = ctx.done() => None,
        out = fut => Some(out),
    }
}

/// Spawn a worker on `tasks` under supervision.
///
/// After the call ends the worker gets `grace` to wind down; past that it is
/// aborted and logged as an orphan.
pub fn spawn_supervised<F>(
    tasks: &TaskTracker,
    name: &'static str,
    ctx: CallContext,
    grace: Duration,
    work: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let mut worker = tasks.spawn(work);
    tasks.spawn(async move {
        tokio::select! {
            res = &mut worker => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    tracing::error!(op = name, "operation worker panicked");
                }
            }
            _ = ctx.done() => {
                if tokio::time::timeout(grace, &mut worker).await.is_err() {
                    worker.abort();
                    tracing::warn!(op = name, ?grace, "worker ignored cancellation; aborted as orphan");
                }
            }
        }
    });
}
