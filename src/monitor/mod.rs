//! Bounded, cancellable polling for asynchronous external work
//!
//! [`CompletionMonitor`] blocks one flow (never the process) between
//! polls of an external operation until it reaches a terminal state.
//! Time comes from an injected [`Clock`] so tests run without real
//! delays, and the loop is an explicit state machine: it is always in
//! exactly one of [`MonitorState`]'s states and every exit path reports
//! which one it ended in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Errors from a monitored wait
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The poll callback itself failed; no further poll is attempted
    #[error("status poll failed")]
    Poll(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The external operation reached a failure status
    #[error("external operation failed: {0}")]
    Failed(String),

    /// The optional maximum wait was exceeded
    #[error("timed out after {0:?} waiting for terminal status")]
    TimedOut(Duration),

    /// The wait was cancelled
    #[error("cancelled while waiting for terminal status")]
    Cancelled,
}

/// What one poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Not terminal yet, keep waiting
    Pending,
    /// Terminal success
    Succeeded,
    /// Terminal failure, with the observed reason
    Failed(String),
}

/// The monitor's internal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Waiting between polls or about to poll
    Polling,
    /// Observed a terminal success
    Succeeded,
    /// Observed a terminal failure or a poll error
    Failed,
    /// Cancelled before a terminal status was observed
    Cancelled,
}

/// Source of delay between polls.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspend the calling flow for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the tokio timer.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Create a linked cancellation handle/token pair.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Sender side: signals the monitor to stop waiting.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation. Safe to call more than once.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver side: handed to the monitor.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is signalled. If the handle is dropped
    /// without cancelling, this never resolves.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Fixed-interval poller that waits for a terminal status.
pub struct CompletionMonitor {
    interval: Duration,
    max_duration: Option<Duration>,
    clock: Arc<dyn Clock>,
    cancel: Option<CancelToken>,
}

impl CompletionMonitor {
    /// Create a monitor polling at `interval` on the real clock, with no
    /// maximum duration and no cancellation token.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_duration: None,
            clock: Arc::new(TokioClock),
            cancel: None,
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound the total wait; exceeding it fails with [`MonitorError::TimedOut`].
    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.max_duration = Some(max);
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The configured poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until a terminal status, an error, cancellation, or timeout.
    ///
    /// The first poll happens immediately; subsequent polls are spaced by
    /// the configured interval. A `Pending` result continues the loop, a
    /// `Succeeded` result returns `Ok`, anything else stops with an error
    /// and no further poll. The sleep future is scoped to one loop
    /// iteration, so the timer is released on every exit path.
    pub async fn wait_for_terminal<F>(&self, mut poll: F) -> Result<(), MonitorError>
    where
        F: FnMut() -> BoxFuture<'static, Result<PollStatus, MonitorError>> + Send,
    {
        let mut state = MonitorState::Polling;
        let mut cancel = self.cancel.clone();
        let mut waited = Duration::ZERO;
        debug!(?state, interval = ?self.interval, "waiting for terminal status");

        let result = loop {
            if cancel.as_ref().map(|t| t.is_cancelled()).unwrap_or(false) {
                state = MonitorState::Cancelled;
                break Err(MonitorError::Cancelled);
            }

            match poll().await {
                Ok(PollStatus::Succeeded) => {
                    state = MonitorState::Succeeded;
                    break Ok(());
                }
                Ok(PollStatus::Failed(reason)) => {
                    state = MonitorState::Failed;
                    break Err(MonitorError::Failed(reason));
                }
                Ok(PollStatus::Pending) => {}
                Err(err) => {
                    state = MonitorState::Failed;
                    break Err(err);
                }
            }

            if let Some(max) = self.max_duration {
                if waited + self.interval > max {
                    state = MonitorState::Failed;
                    break Err(MonitorError::TimedOut(max));
                }
            }

            match cancel.as_mut() {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            state = MonitorState::Cancelled;
                            break Err(MonitorError::Cancelled);
                        }
                        _ = self.clock.sleep(self.interval) => {}
                    }
                }
                None => self.clock.sleep(self.interval).await,
            }
            waited += self.interval;
        };

        match &result {
            Ok(()) => debug!(?state, "monitor finished"),
            Err(err) => warn!(?state, error = %err, "monitor finished"),
        }
        result
    }
}
