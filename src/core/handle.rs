//! Handles for safely driving the two sides of a shared core.
//!
//! The raw core documents which side may call what; these handles make the
//! rules structural. Each side holds exactly one handle, handles do not
//! clone, and consumer operations that stop being legal once a callback is
//! armed live on [`Future`] only: arming consumes the `Future` and leaves a
//! [`Subscription`] carrying the still-legal remainder. Dropping a handle
//! detaches its side.
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::core::fsm::State;
use crate::core::shared::{InterruptHandler, RawCore};
use crate::error::{Failure, NotReady, Try};
use crate::executor::{Executor, MID_PRI};

/// Create the shared core for one future/promise pair, attached to both
/// sides.
pub fn pair<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let core = RawCore::alloc();
    (Promise { core: Some(core) }, Future { core: Some(core) })
}

/// Producer side of a core: deposits the result, observes interrupts.
pub struct Promise<T: Send + 'static> {
    core: Option<NonNull<RawCore<T>>>,
}

// Safety: a handle is the sole owner of its side; the core it points at is
// Sync. Moving it between threads is the supported ownership hand-off.
unsafe impl<T: Send + 'static> Send for Promise<T> {}

impl<T: Send + 'static> Promise<T> {
    fn core(&self) -> &RawCore<T> {
        // Safety: populated until drop; the attachment keeps the core
        // alive.
        unsafe { self.core.expect("promise already detached").as_ref() }
    }

    /// Install the result, firing a previously armed callback. Panics if a
    /// result was already installed.
    pub fn set_result(&mut self, result: Try<T>) {
        self.core().set_result(result);
    }

    /// Shorthand for a successful [`set_result`](Promise::set_result).
    pub fn set_value(&mut self, value: T) {
        self.set_result(Ok(value));
    }

    /// Shorthand for a failed [`set_result`](Promise::set_result).
    pub fn set_failure(&mut self, failure: Failure) {
        self.set_result(Err(failure));
    }

    pub fn is_fulfilled(&self) -> bool {
        self.core().has_result()
    }

    pub fn is_active(&self) -> bool {
        self.core().is_active()
    }

    /// Register a handler for consumer interrupts. If an interrupt is
    /// already pending the handler runs synchronously with it right here
    /// instead of being installed; once a result exists this is a no-op.
    ///
    /// The handler runs under the interrupt lock and must not reenter the
    /// interrupt APIs.
    pub fn set_interrupt_handler(&mut self, handler: impl Fn(&Failure) + Send + Sync + 'static) {
        self.core().set_interrupt_handler(Arc::new(handler));
    }

    /// Copy of the registered interrupt handler, if any.
    pub fn interrupt_handler(&self) -> Option<InterruptHandler> {
        self.core().interrupt_handler()
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            // Safety: releases this side's attachment exactly once; a
            // missing result becomes a broken-promise failure first.
            unsafe { RawCore::detach_promise(core) }
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Promise")
    }
}

/// Consumer side of a core before a callback is armed.
pub struct Future<T: Send + 'static> {
    core: Option<NonNull<RawCore<T>>>,
}

// Safety: as for [`Promise`].
unsafe impl<T: Send + 'static> Send for Future<T> {}

impl<T: Send + 'static> Future<T> {
    /// A core completed up front; only the consumer side is attached.
    pub fn from_try(result: Try<T>) -> Future<T> {
        Future {
            core: Some(RawCore::alloc_with(result)),
        }
    }

    /// A core completed up front with a value constructed in place.
    pub fn from_value(value: T) -> Future<T> {
        Future::from_try(Ok(value))
    }

    fn core(&self) -> &RawCore<T> {
        // Safety: populated until drop or set_callback; the attachment
        // keeps the core alive.
        unsafe { self.core.expect("future already detached").as_ref() }
    }

    /// Whether a result has been installed.
    pub fn ready(&self) -> bool {
        self.core().has_result()
    }

    /// Borrow the installed result, or report that none exists yet.
    pub fn try_ref(&self) -> Result<&Try<T>, NotReady> {
        let core = self.core();
        if !core.has_result() {
            return Err(NotReady);
        }
        // Safety: arming a callback consumes this handle, so while `self`
        // exists no dispatch can claim the result out of its slot.
        Ok(unsafe { core.result_ref() }.expect("result slot empty despite ready state"))
    }

    /// Assign the executor the callback will be submitted to, at default
    /// priority.
    pub fn set_executor(&mut self, executor: Arc<dyn Executor>) {
        self.set_executor_with_priority(executor, MID_PRI);
    }

    /// Assign the executor together with a priority hint.
    pub fn set_executor_with_priority(&mut self, executor: Arc<dyn Executor>, priority: i8) {
        // This handle existing means no callback is armed, so dispatch
        // cannot run concurrently.
        debug_assert!(matches!(
            self.core().state(),
            State::Start | State::OnlyResult
        ));
        // Safety: see above; the &mut receiver serializes this against the
        // reads on the same handle.
        unsafe { self.core().set_executor(executor, priority) }
    }

    /// Current executor assignment.
    pub fn executor(&self) -> Option<Arc<dyn Executor>> {
        // Safety: writes go through the &mut methods on this same handle.
        unsafe { self.core().executor() }
    }

    /// Signal the producer that this consumer lost interest. Best-effort:
    /// never completes the future by itself.
    pub fn raise(&self, interrupt: Failure) {
        self.core().raise(interrupt);
    }

    /// Copy of the producer's registered interrupt handler, if any.
    pub fn interrupt_handler(&self) -> Option<InterruptHandler> {
        self.core().interrupt_handler()
    }

    /// Defer callback firing until a matching [`activate`].
    ///
    /// [`activate`]: Future::activate
    pub fn deactivate(&self) {
        self.core().deactivate();
    }

    /// Permit callback firing and re-drive a deferred rendezvous.
    pub fn activate(&self) {
        self.core().activate();
    }

    pub fn is_active(&self) -> bool {
        self.core().is_active()
    }

    /// Arm the one-shot completion callback, capturing the calling
    /// thread's ambient request context. Consumes the handle; the returned
    /// [`Subscription`] keeps the consumer side attached and retains the
    /// operations that remain legal while a callback is armed.
    pub fn set_callback(
        mut self,
        func: impl FnOnce(Try<T>) + Send + 'static,
    ) -> Subscription<T> {
        let core = self.core.take().expect("future already detached");
        // Safety: the attachment moves into the subscription below.
        unsafe { core.as_ref() }.set_callback(func);
        Subscription { core: Some(core) }
    }
}

impl<T: Send + 'static> Drop for Future<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            // Safety: releases this side's attachment exactly once.
            unsafe { RawCore::detach_future(core) }
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Future")
    }
}

/// Consumer side of a core after a callback has been armed.
///
/// Dropping it detaches the consumer, flushing any dispatch the active
/// flag was holding back.
pub struct Subscription<T: Send + 'static> {
    core: Option<NonNull<RawCore<T>>>,
}

// Safety: as for [`Promise`].
unsafe impl<T: Send + 'static> Send for Subscription<T> {}

impl<T: Send + 'static> Subscription<T> {
    fn core(&self) -> &RawCore<T> {
        // Safety: populated until drop; the attachment keeps the core
        // alive.
        unsafe { self.core.expect("subscription already detached").as_ref() }
    }

    /// Defer callback firing until a matching [`activate`].
    ///
    /// [`activate`]: Subscription::activate
    pub fn deactivate(&self) {
        self.core().deactivate();
    }

    /// Permit callback firing and re-drive a deferred rendezvous.
    pub fn activate(&self) {
        self.core().activate();
    }

    pub fn is_active(&self) -> bool {
        self.core().is_active()
    }

    /// Signal the producer that this consumer lost interest.
    pub fn raise(&self, interrupt: Failure) {
        self.core().raise(interrupt);
    }
}

impl<T: Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            // Safety: releases this side's attachment exactly once.
            unsafe { RawCore::detach_future(core) }
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}
