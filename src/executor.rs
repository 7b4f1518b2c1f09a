//! Listener execution: the ack phase and background lazy work.
//!
//! A matched listener walks a fixed sequence of [`Phase`]s chosen by the
//! app's [`LazyPolicy`]. Lazy work is handed to a [`LazyScheduler`] and never
//! delays or alters the response.

use crate::context::SlackRequest;
use crate::listener::{LazyFuture, Listener, OptionsListener};
use crate::response::AckResponse;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio_util::task::TaskTracker;

/// Step in the lifecycle of one matched listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Matched,
    LazyDispatched,
    AckAwaited,
    Responded,
}

/// When lazy work is submitted relative to the ack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LazyPolicy {
    /// Submit lazy work, then await the ack.
    #[default]
    BeforeAck,
    /// Await the ack, then submit lazy work. Lazy work never starts when the
    /// ack fails.
    AfterAck,
}

impl LazyPolicy {
    pub fn from_lazy_after_ack(lazy_after_ack: bool) -> Self {
        if lazy_after_ack {
            Self::AfterAck
        } else {
            Self::BeforeAck
        }
    }

    /// Phase sequence for a listener with or without lazy work.
    pub fn phases(self, has_lazy: bool) -> Vec<Phase> {
        use Phase::*;
        match (self, has_lazy) {
            (_, false) => vec![Matched, AckAwaited, Responded],
            (Self::BeforeAck, true) => vec![Matched, LazyDispatched, AckAwaited, Responded],
            (Self::AfterAck, true) => vec![Matched, AckAwaited, Responded, LazyDispatched],
        }
    }
}

/// Accepts background work that must outlive the request.
#[async_trait]
pub trait LazyScheduler: Send + Sync {
    fn wait_until(&self, work: LazyFuture);

    /// Resolve once submitted work has finished. Schedulers that hand work
    /// to another system return immediately.
    async fn drain(&self) {}
}

/// Runs lazy work on the tokio runtime and tracks it for shutdown.
///
/// Errors and panics are logged and never reach the requester.
#[derive(Clone, Default)]
pub struct TaskTrackerScheduler {
    tracker: TaskTracker,
}

impl TaskTrackerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lazy tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task submitted so far to finish.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[async_trait]
impl LazyScheduler for TaskTrackerScheduler {
    async fn drain(&self) {
        self.wait().await;
    }

    fn wait_until(&self, work: LazyFuture) {
        self.tracker.spawn(async move {
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Slack: lazy listener failed: {e:#}"),
                Err(_) => tracing::error!("Slack: lazy listener panicked"),
            }
        });
    }
}

/// Run a matched listener and return its ack.
///
/// An ack error propagates to the caller. Lazy work submitted before the ack
/// still runs.
pub async fn execute(
    listener: &Listener,
    req: &SlackRequest,
    policy: LazyPolicy,
    scheduler: &dyn LazyScheduler,
) -> anyhow::Result<AckResponse> {
    let mut response = AckResponse::Empty;
    for phase in policy.phases(listener.has_lazy()) {
        tracing::trace!(?phase, "Slack: listener phase");
        match phase {
            Phase::Matched | Phase::Responded => {}
            Phase::LazyDispatched => {
                if let Some(lazy) = &listener.lazy {
                    scheduler.wait_until(lazy(req.clone()));
                }
            }
            Phase::AckAwaited => response = (listener.ack)(req.clone()).await?,
        }
    }
    Ok(response)
}

/// Options listeners only ack.
pub async fn execute_options(
    listener: &OptionsListener,
    req: &SlackRequest,
) -> anyhow::Result<AckResponse> {
    (listener.ack)(req.clone()).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
