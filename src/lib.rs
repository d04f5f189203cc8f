//! Shared rendezvous state for future/promise pairs.
//!
//! A [`pair`] allocates one heap-pinned core jointly referenced by a
//! producer-side [`Promise`] and a consumer-side [`Future`]. The producer
//! deposits a [`Try`] result; the consumer arms a one-shot callback;
//! whichever arrives second fires the callback — directly, or through an
//! assigned [`Executor`] — under the request context captured when the
//! callback was armed. Either side may let go at any time: dropping a
//! handle detaches its side, a producer that never delivered completes the
//! consumer with a broken-promise failure, and the core frees itself when
//! the last attachment drops.
//!
//! Some operations must only be called by the side that owns them: results
//! and interrupt handlers belong to the promise side, callbacks, executors
//! and interrupts to the future side. The handles enforce this by
//! existing — each side gets exactly one, and arming a callback trades the
//! [`Future`] for a [`Subscription`] that retains just the operations that
//! stay legal afterwards. Handles may migrate between threads freely; the
//! move itself is the required synchronization.
//!
//! # Example
//!
//! ```
//! use rendezvous::pair;
//!
//! let (mut promise, future) = pair::<u32>();
//! assert!(!future.ready());
//!
//! let subscription = future.set_callback(|result| {
//!     assert_eq!(result, Ok(7));
//! });
//! promise.set_value(7);
//! drop(subscription);
//! ```
mod context;
mod core;
mod error;
mod executor;

pub use crate::context::{ContextGuard, RequestContext};
pub use crate::core::{pair, Future, InterruptHandler, Promise, Subscription};
pub use crate::error::{Failure, NotReady, Rejected, Try};
pub use crate::executor::{
    Executor, InlineExecutor, ManualExecutor, Task, HI_PRI, LO_PRI, MID_PRI,
};
