//! Failure values travelling through a future/promise pair.
//!
//! Infrastructure failures (a producer destroyed without a result, an
//! executor refusing work) are converted into in-band [`Failure`] values so
//! that consumers observe a uniform success/failure channel. Programmer
//! errors (setting a result or callback twice, detaching an attached core)
//! are never represented here; they panic at the call site.
use std::sync::Arc;

use thiserror::Error;

/// The outcome of an asynchronous computation: a value or a captured
/// failure.
pub type Try<T> = Result<T, Failure>;

/// A captured failure delivered through the result slot of a core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// The producer side was destroyed without ever supplying a result.
    /// Carries the type name of the value the consumer was waiting for.
    #[error("broken promise for a value of type {0}")]
    BrokenPromise(&'static str),

    /// The executor refused the armed callback at submission time.
    #[error("executor rejected the callback: {0}")]
    Rejected(#[from] Rejected),

    /// An application-supplied failure.
    #[error("{0}")]
    Message(Arc<str>),
}

impl Failure {
    /// Build an application failure from a message.
    pub fn msg(message: impl Into<Arc<str>>) -> Failure {
        Failure::Message(message.into())
    }
}

/// Error returned by an [`Executor`] that refuses submitted work. The
/// executor must have dropped the task without running it.
///
/// [`Executor`]: crate::Executor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Rejected {
    reason: Arc<str>,
}

impl Rejected {
    pub fn new(reason: impl Into<Arc<str>>) -> Rejected {
        Rejected {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The consumer asked for the result before one was installed. Recoverable;
/// check [`ready`] first or retry later.
///
/// [`ready`]: crate::Future::ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("future not ready")]
pub struct NotReady;
