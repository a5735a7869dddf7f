//! Cancellable operation context.
//!
//! # Responsibility
//! - Carry cancellation and deadline state for one logical operation.
//! - Let callers stop in-flight table I/O without the store swallowing it.
//!
//! # Invariants
//! - Cancelling a parent cancels every child derived from it.
//! - A child deadline is never later than its parent deadline.
//! - Dropping a [`Handler`] cancels its context.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The context (or one of its parents) was cancelled explicitly.
    Cancelled,
    /// The context deadline elapsed.
    DeadlineExceeded,
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Cloneable view of an operation's cancellation state.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

/// Owner side of a [`Context`]; cancels it on `cancel()` or drop.
#[derive(Debug)]
pub struct Handler {
    token: CancellationToken,
}

impl Handler {
    /// Cancels the context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl Context {
    /// Creates a root context without a deadline.
    #[must_use]
    pub fn new() -> (Self, Handler) {
        Self::root(None)
    }

    /// Creates a context nobody can cancel. Meant for tools and tests.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Creates a root context that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> (Self, Handler) {
        Self::root(Some(Instant::now() + timeout))
    }

    /// Derives a child sharing this context's deadline.
    #[must_use]
    pub fn child(&self) -> (Self, Handler) {
        self.derive(self.deadline)
    }

    /// Derives a child that expires after `timeout` or at the parent deadline,
    /// whichever comes first.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> (Self, Handler) {
        let requested = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => parent.min(requested),
            None => requested,
        };
        self.derive(Some(deadline))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason this context is finished, if it is.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.cancel_reason().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => CancelReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }

    /// Drives `future` until it completes or the context finishes.
    ///
    /// An already finished context never polls `future`.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, CancelReason> {
        if let Some(reason) = self.cancel_reason() {
            return Err(reason);
        }
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = future => Ok(output),
        }
    }

    fn root(deadline: Option<Instant>) -> (Self, Handler) {
        let token = CancellationToken::new();
        (
            Self {
                token: token.clone(),
                deadline,
            },
            Handler { token },
        )
    }

    fn derive(&self, deadline: Option<Instant>) -> (Self, Handler) {
        let token = self.token.child_token();
        (
            Self {
                token: token.clone(),
                deadline,
            },
            Handler { token },
        )
    }
}
