//! The shared state core bridging the two sides of a future/promise pair.
//!
//! [`shared`] holds the raw heap-pinned core: the rendezvous state machine
//! from [`fsm`], the result/callback slots, the interrupt channel and the
//! two reference counters that drive destruction. [`handle`] wraps it in
//! the safe one-owner-per-side handles that make up the public surface.
mod fsm;
mod handle;
mod shared;

pub use handle::{pair, Future, Promise, Subscription};
pub use shared::InterruptHandler;
