//! The shared core jointly referenced by the two sides of a future/promise
//! pair, and the reference-counting machinery that destroys it.
//!
//! ### Design
//!
//! A [`RawCore<T>`] is a single pinned heap allocation that the producer
//! side deposits a result into and the consumer side hangs a one-shot
//! callback off of. It can logically be thought of as two "halves" of the
//! same heap allocation.
//!
//! ```ascii
//! +-------------+-------------+
//! |             |             |
//! |  Producer   |  Consumer   |
//! |             |             |
//! +-------------+-------------+
//! ```
//!
//! The producer half supports installing the result, registering an
//! interrupt handler, and detaching; the consumer half supports installing
//! the callback, assigning an executor, raising an interrupt, deferring
//! dispatch via the active flag, and detaching. The state machine in
//! [`fsm`](super::fsm) negotiates the rendezvous between the two halves:
//! whichever side performs the `Armed` transition owns dispatching the
//! callback and advancing the machine to `Done`.
//!
//! ### Destruction rules
//!
//! Two independent counters govern teardown:
//!
//! 1. `attached` counts external holders of the allocation: one per side,
//!    plus transient references dispatch takes out to keep the core alive
//!    across an executor hop. Whoever drops it to zero frees the core.
//! 2. `callback_refs` counts holders of the armed callback. Dispatch with
//!    an executor hands one reference to the submitted task; when the last
//!    reference drops the callback slot is cleared, whether the task ran or
//!    the executor discarded it. Splitting this from `attached` lets an
//!    executor keep the core alive without also keeping the user's closure
//!    alive.
//!
//! ### Locking
//!
//! The FSM spin lock serializes `state`, and writes to the `result`,
//! `callback` and `context` slots. A second spin lock protects the
//! interrupt slot and handler. `attached`, `callback_refs`, `active` and
//! the interrupt fast-path flag are lock-free atomics: publishing stores
//! are release, observing loads acquire, counter decrements acq-rel.
use std::any::type_name;
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use spin::Mutex;

use crate::context::RequestContext;
use crate::core::fsm::{Fsm, State};
use crate::error::{Failure, Try};
use crate::executor::{Executor, Task};

/// One-shot continuation taking the rendezvoused outcome by move.
pub(crate) type Callback<T> = Box<dyn FnOnce(Try<T>) + Send + 'static>;

/// Handler the producer side registers to observe consumer interrupts.
pub type InterruptHandler = Arc<dyn Fn(&Failure) + Send + Sync + 'static>;

/// Interrupt slot and handler, both guarded by one lock.
#[derive(Default)]
struct InterruptState {
    interrupt: Option<Failure>,
    handler: Option<InterruptHandler>,
}

/// The shared state backing one future/promise pair.
///
/// Always heap-allocated through [`alloc`] or [`alloc_with`] and never
/// moved afterwards; both sides hold raw addresses into it. Freed in place
/// by the [`detach_one`] that drops `attached` to zero.
///
/// Slot accesses follow the locking protocol in the module docs; the safe
/// handles in [`handle`](super::handle) additionally enforce the
/// one-owner-per-side rules that the raw layer only documents.
///
/// [`alloc`]: RawCore::alloc
/// [`alloc_with`]: RawCore::alloc_with
/// [`detach_one`]: RawCore::detach_one
pub(crate) struct RawCore<T: Send + 'static> {
    // Keep the callback and result slots adjacent: the pair is read
    // together on every dispatch.
    callback: UnsafeCell<Option<Callback<T>>>,
    result: UnsafeCell<Option<Try<T>>>,
    fsm: Fsm,
    attached: AtomicU8,
    callback_refs: AtomicU8,
    active: AtomicBool,
    interrupt_handler_set: AtomicBool,
    priority: UnsafeCell<i8>,
    executor: UnsafeCell<Option<Arc<dyn Executor>>>,
    context: UnsafeCell<Option<RequestContext>>,
    interrupt: Mutex<InterruptState>,
}

// Safety: every interior-mutable field is serialized either by the FSM
// lock, the interrupt lock, or the documented atomic protocol; the
// remaining unsynchronized slots (`executor`, `priority`) carry their own
// safety contracts on the accessors.
unsafe impl<T: Send + 'static> Send for RawCore<T> {}
unsafe impl<T: Send + 'static> Sync for RawCore<T> {}

impl<T: Send + 'static> RawCore<T> {
    fn new(state: State, result: Option<Try<T>>, attached: u8) -> RawCore<T> {
        RawCore {
            callback: UnsafeCell::new(None),
            result: UnsafeCell::new(result),
            fsm: Fsm::new(state),
            attached: AtomicU8::new(attached),
            callback_refs: AtomicU8::new(0),
            active: AtomicBool::new(true),
            interrupt_handler_set: AtomicBool::new(false),
            priority: UnsafeCell::new(-1),
            executor: UnsafeCell::new(None),
            context: UnsafeCell::new(None),
            interrupt: Mutex::new(InterruptState::default()),
        }
    }

    /// Allocate an empty core attached to both sides.
    pub(crate) fn alloc() -> NonNull<RawCore<T>> {
        NonNull::from(Box::leak(Box::new(RawCore::new(State::Start, None, 2))))
    }

    /// Allocate a core with a prebaked result. The producer side is
    /// already detached: only the consumer attachment remains.
    pub(crate) fn alloc_with(result: Try<T>) -> NonNull<RawCore<T>> {
        NonNull::from(Box::leak(Box::new(RawCore::new(
            State::OnlyResult,
            Some(result),
            1,
        ))))
    }

    pub(crate) fn state(&self) -> State {
        self.fsm.state()
    }

    /// May call from either side.
    pub(crate) fn has_result(&self) -> bool {
        matches!(
            self.fsm.state(),
            State::OnlyResult | State::Armed | State::Done
        )
    }

    /// Install the result. Call only from the producer side; a second call
    /// is a programmer error and panics.
    pub(crate) fn set_result(&self, result: Try<T>) {
        let mut armed = false;
        let mut result = Some(result);
        let mut install = || {
            // Safety: runs inside the FSM critical section; the result slot
            // is only written on the Start/OnlyCallback transitions below.
            unsafe {
                *self.result.get() = result.take();
            }
        };
        self.fsm.transition(|state| match state {
            State::Start => {
                self.fsm
                    .try_update(State::Start, State::OnlyResult, &mut install, || {})
            }
            State::OnlyCallback => {
                self.fsm
                    .try_update(State::OnlyCallback, State::Armed, &mut install, || {
                        armed = true;
                    })
            }
            State::OnlyResult | State::Armed | State::Done => {
                panic!("result set twice on a promise core")
            }
        });
        if armed {
            self.maybe_callback();
        }
    }

    /// Install the callback and capture the caller's ambient context. Call
    /// only from the consumer side; a second call is a programmer error and
    /// panics.
    pub(crate) fn set_callback(&self, func: impl FnOnce(Try<T>) + Send + 'static) {
        let mut armed = false;
        let mut func = Some(Box::new(func) as Callback<T>);
        let mut install = || {
            // Safety: runs inside the FSM critical section; the callback
            // and context slots are only written here.
            unsafe {
                *self.context.get() = RequestContext::save();
                *self.callback.get() = func.take();
            }
        };
        self.fsm.transition(|state| match state {
            State::Start => {
                self.fsm
                    .try_update(State::Start, State::OnlyCallback, &mut install, || {})
            }
            State::OnlyResult => {
                self.fsm
                    .try_update(State::OnlyResult, State::Armed, &mut install, || {
                        armed = true;
                    })
            }
            State::OnlyCallback | State::Armed | State::Done => {
                panic!("callback set twice on a future core")
            }
        });
        if armed {
            self.maybe_callback();
        }
    }

    /// Advance `Armed` to `Done` and fire the callback, provided the core
    /// is active. Harmless in every other state.
    fn maybe_callback(&self) {
        self.fsm.transition(|state| match state {
            State::Armed if self.is_active() => {
                self.fsm
                    .try_update(State::Armed, State::Done, || {}, || self.do_callback())
            }
            _ => true,
        });
    }

    /// Fire the armed callback, via the executor when one is assigned.
    /// Runs exactly once per core, immediately after the unique
    /// `Armed` -> `Done` transition.
    fn do_callback(&self) {
        // Safety: the executor slot is written by `set_executor`, whose
        // contract forbids it racing dispatch.
        let executor = unsafe { (*self.executor.get()).clone() };
        let priority = unsafe { *self.priority.get() };

        if let Some(executor) = executor {
            // The submitted task claims the callback and result when it
            // runs, but the executor may equally discard it unrun. Either
            // way the core has to stay alive until the task is destroyed
            // and the callback slot has to survive until the last holder
            // lets go. Take out two paired references: one guarding this
            // scope, one travelling inside the task.
            self.attached.fetch_add(2, Ordering::Relaxed);
            self.callback_refs.fetch_add(2, Ordering::Relaxed);
            // Safety: matching increments were just performed.
            let local = unsafe { CallbackRef::new(NonNull::from(self)) };
            let remote = unsafe { CallbackRef::new(NonNull::from(self)) };

            let task: Task = Box::new(move || {
                let core = remote.core();
                let _ambient = RequestContext::install(core.saved_context());
                let callback = core.claim_callback();
                let result = core.claim_result();
                callback(result);
            });
            let submitted = if executor.num_priorities() <= 1 {
                executor.add(task)
            } else {
                executor.add_with_priority(task, priority)
            };
            if let Err(rejected) = submitted {
                // The executor dropped the task (releasing its reference)
                // without running it. Deliver the rejection through the
                // result slot, synchronously on this thread.
                warn!(
                    "executor rejected an armed callback ({}); running it inline",
                    rejected
                );
                let _ambient = RequestContext::install(self.saved_context());
                let callback = self.claim_callback();
                // Safety: the result slot is quiescent after Done; only
                // this dispatch path touches it.
                unsafe {
                    *self.result.get() = Some(Err(Failure::Rejected(rejected)));
                }
                let result = self.claim_result();
                callback(result);
            }
            drop(local);
        } else {
            // Synchronous path. Keep the core attached until the callback
            // returns or unwinds.
            self.attached.fetch_add(1, Ordering::Relaxed);
            let _detach = DetachGuard {
                core: NonNull::from(self),
            };
            let _ambient = RequestContext::install(self.saved_context());
            let callback = self.claim_callback();
            let result = self.claim_result();
            callback(result);
        }
    }

    /// Take the armed callback out of its slot for invocation.
    ///
    /// Only reachable from dispatch, after the unique `Armed` -> `Done`
    /// transition and while the caller pins the slot through `attached`
    /// (and `callback_refs` on the executor path), so nothing clears it
    /// concurrently.
    fn claim_callback(&self) -> Callback<T> {
        unsafe { (*self.callback.get()).take() }.expect("callback slot empty at dispatch")
    }

    /// Take the result out of its slot for invocation. Same reachability
    /// argument as [`claim_callback`](RawCore::claim_callback).
    fn claim_result(&self) -> Try<T> {
        unsafe { (*self.result.get()).take() }.expect("result slot empty at dispatch")
    }

    /// Clone the context captured when the callback was armed.
    fn saved_context(&self) -> Option<RequestContext> {
        // Safety: written once inside the critical section that installed
        // the callback; the Armed -> Done transition ordered that write
        // before any dispatch read.
        unsafe { (*self.context.get()).clone() }
    }

    /// Permit dispatch again and re-drive any pending `Armed` state. May
    /// call from any thread.
    pub(crate) fn activate(&self) {
        self.active.store(true, Ordering::Release);
        self.maybe_callback();
    }

    /// Defer callback firing until [`activate`](RawCore::activate). May
    /// call from any thread.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Assign the executor dispatch will submit the callback to.
    ///
    /// # Safety
    ///
    /// Must not race anything that can trigger dispatch: the state must be
    /// `Start`, `OnlyResult` or `Done` and stay out of `Armed` for the
    /// duration of the call. The safe handles guarantee this structurally
    /// by requiring the consumer handle, which cannot coexist with an
    /// armed callback.
    pub(crate) unsafe fn set_executor(&self, executor: Arc<dyn Executor>, priority: i8) {
        debug_assert!(matches!(
            self.fsm.state(),
            State::Start | State::OnlyResult | State::Done
        ));
        *self.executor.get() = Some(executor);
        *self.priority.get() = priority;
    }

    /// Current executor assignment.
    ///
    /// # Safety
    ///
    /// Must not race [`set_executor`](RawCore::set_executor); the safe
    /// handles serialize the two through the consumer handle.
    pub(crate) unsafe fn executor(&self) -> Option<Arc<dyn Executor>> {
        (*self.executor.get()).clone()
    }

    /// Borrow the installed result.
    ///
    /// # Safety
    ///
    /// No dispatch may claim the result while the borrow lives; the safe
    /// consumer handle proves this by existing (arming a callback consumes
    /// it).
    pub(crate) unsafe fn result_ref(&self) -> Option<&Try<T>> {
        (*self.result.get()).as_ref()
    }

    /// Raise an interrupt from the consumer side. Stored at most once and
    /// only while no result exists; a registered handler is invoked
    /// synchronously with the stored value.
    pub(crate) fn raise(&self, interrupt: Failure) {
        let mut state = self.interrupt.lock();
        if state.interrupt.is_none() && !self.has_result() {
            state.interrupt = Some(interrupt);
            if let Some(handler) = &state.handler {
                handler(state.interrupt.as_ref().expect("interrupt just stored"));
            }
        }
    }

    /// Register the producer-side interrupt handler. If an interrupt is
    /// already stored the handler runs synchronously with it instead of
    /// being installed. No-op once a result exists.
    ///
    /// The handler runs with the interrupt lock held, here or in
    /// [`raise`](RawCore::raise); it must not reenter the interrupt APIs.
    pub(crate) fn set_interrupt_handler(&self, handler: InterruptHandler) {
        let mut state = self.interrupt.lock();
        if !self.has_result() {
            if let Some(interrupt) = &state.interrupt {
                handler(interrupt);
            } else {
                self.set_interrupt_handler_no_lock(&mut state, handler);
            }
        }
    }

    fn set_interrupt_handler_no_lock(&self, state: &mut InterruptState, handler: InterruptHandler) {
        self.interrupt_handler_set.store(true, Ordering::Relaxed);
        state.handler = Some(handler);
    }

    /// Copy of the registered interrupt handler, if any. May call from any
    /// thread; a relaxed flag load skips the lock when no handler was ever
    /// registered.
    pub(crate) fn interrupt_handler(&self) -> Option<InterruptHandler> {
        if !self.interrupt_handler_set.load(Ordering::Relaxed) {
            return None;
        }
        self.interrupt.lock().handler.clone()
    }

    /// Drop one callback reference, clearing the slot when the last holder
    /// lets go.
    fn deref_callback(&self) {
        if self.callback_refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Safety: zero references means no dispatch path can touch the
            // slot anymore.
            unsafe {
                *self.callback.get() = None;
            }
        }
    }

    /// Drop one attachment, freeing the core when the last holder lets go.
    ///
    /// # Safety
    ///
    /// `core` must carry an attachment the caller owns; the caller must not
    /// touch the core afterwards.
    pub(crate) unsafe fn detach_one(core: NonNull<RawCore<T>>) {
        let remaining = core.as_ref().attached.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(remaining >= 1);
        if remaining == 1 {
            drop(Box::from_raw(core.as_ptr()));
        }
    }

    /// Consumer-side detachment: flush any deferred dispatch, then let go.
    ///
    /// # Safety
    ///
    /// Same contract as [`detach_one`](RawCore::detach_one).
    pub(crate) unsafe fn detach_future(core: NonNull<RawCore<T>>) {
        core.as_ref().activate();
        RawCore::detach_one(core);
    }

    /// Producer-side detachment: a producer that never supplied a result
    /// completes the consumer with a broken-promise failure first.
    ///
    /// # Safety
    ///
    /// Same contract as [`detach_one`](RawCore::detach_one), and the
    /// producer side must be quiescent (detachment never runs in parallel
    /// with `set_result`).
    pub(crate) unsafe fn detach_promise(core: NonNull<RawCore<T>>) {
        if !core.as_ref().has_result() {
            debug!("promise detached without a result; completing with a broken promise");
            core.as_ref()
                .set_result(Err(Failure::BrokenPromise(type_name::<T>())));
        }
        RawCore::detach_one(core);
    }

    #[cfg(test)]
    pub(crate) fn has_callback(&self) -> bool {
        // Test-only peek; callers hold the core quiescent.
        unsafe { (*self.callback.get()).is_some() }
    }

    #[cfg(test)]
    pub(crate) fn attached(&self) -> u8 {
        self.attached.load(Ordering::SeqCst)
    }
}

impl<T: Send + 'static> fmt::Debug for RawCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCore")
            .field("state", &self.fsm.state())
            .field("active", &self.is_active())
            .finish()
    }
}

impl<T: Send + 'static> Drop for RawCore<T> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.attached.load(Ordering::Relaxed),
            0,
            "core destroyed while still attached"
        );
    }
}

/// Paired reference dispatch takes out on the executor path: holds both an
/// attachment and a callback reference, releasing the two on drop whether
/// the submitted task ran or was discarded.
struct CallbackRef<T: Send + 'static> {
    core: NonNull<RawCore<T>>,
}

impl<T: Send + 'static> CallbackRef<T> {
    /// # Safety
    ///
    /// `attached` and `callback_refs` must each have been incremented on
    /// behalf of this reference.
    unsafe fn new(core: NonNull<RawCore<T>>) -> CallbackRef<T> {
        CallbackRef { core }
    }

    fn core(&self) -> &RawCore<T> {
        // Safety: the attachment this reference holds keeps the core alive.
        unsafe { self.core.as_ref() }
    }
}

impl<T: Send + 'static> Drop for CallbackRef<T> {
    fn drop(&mut self) {
        // Safety: releases exactly the references taken out in `new`; the
        // core is not touched after the detach.
        unsafe {
            self.core.as_ref().deref_callback();
            RawCore::detach_one(self.core);
        }
    }
}

// Safety: the reference travels into executor tasks; the core it points at
// is Sync and outlives it by construction.
unsafe impl<T: Send + 'static> Send for CallbackRef<T> {}

/// Scope guard for the synchronous dispatch path: releases one attachment
/// even when the callback unwinds.
struct DetachGuard<T: Send + 'static> {
    core: NonNull<RawCore<T>>,
}

impl<T: Send + 'static> Drop for DetachGuard<T> {
    fn drop(&mut self) {
        // Safety: releases the attachment taken out by the dispatch path.
        unsafe {
            RawCore::detach_one(self.core);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ManualExecutor;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Mutex as StdMutex;
    use std::thread;

    fn recording_callback<T: Send + 'static>(
    ) -> (impl FnOnce(Try<T>) + Send + 'static, Arc<StdMutex<Vec<Try<T>>>>) {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (
            move |result| sink.lock().unwrap().push(result),
            calls,
        )
    }

    /// Tracks whether the closure that captured it was dropped.
    struct DropSentinel {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for DropSentinel {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn sentinel() -> (DropSentinel, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        (
            DropSentinel {
                dropped: Arc::clone(&dropped),
            },
            dropped,
        )
    }

    #[test]
    fn test_callback_first_rendezvous() {
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };
        let (callback, calls) = recording_callback();

        shared.set_callback(callback);
        assert_eq!(shared.state(), State::OnlyCallback);
        assert!(calls.lock().unwrap().is_empty());

        shared.set_result(Ok(7));
        assert_eq!(shared.state(), State::Done);
        assert_eq!(*calls.lock().unwrap(), vec![Ok(7)]);
        assert!(!shared.has_callback());

        unsafe {
            RawCore::detach_promise(core);
            RawCore::detach_future(core);
        }
    }

    #[test]
    fn test_result_first_fires_synchronously() {
        let core = RawCore::<i32>::alloc_with(Ok(42));
        let shared = unsafe { core.as_ref() };
        assert_eq!(shared.state(), State::OnlyResult);
        assert!(shared.has_result());

        let (callback, calls) = recording_callback();
        shared.set_callback(callback);
        assert_eq!(*calls.lock().unwrap(), vec![Ok(42)]);
        assert_eq!(shared.state(), State::Done);

        unsafe { RawCore::detach_future(core) };
    }

    #[test]
    #[should_panic(expected = "result set twice")]
    fn test_duplicate_result_panics() {
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };
        shared.set_result(Ok(1));
        shared.set_result(Ok(2));
    }

    #[test]
    #[should_panic(expected = "callback set twice")]
    fn test_duplicate_callback_panics() {
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };
        shared.set_callback(|_| {});
        shared.set_callback(|_| {});
    }

    #[test]
    fn test_deactivated_core_defers_dispatch() {
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };
        let (callback, calls) = recording_callback();

        shared.deactivate();
        shared.set_callback(callback);
        shared.set_result(Ok(1));
        assert_eq!(shared.state(), State::Armed);
        assert!(calls.lock().unwrap().is_empty());

        shared.activate();
        assert_eq!(shared.state(), State::Done);
        assert_eq!(*calls.lock().unwrap(), vec![Ok(1)]);

        unsafe {
            RawCore::detach_promise(core);
            RawCore::detach_future(core);
        }
    }

    #[test]
    fn test_executor_runs_callback_and_clears_slot() {
        let executor = Arc::new(ManualExecutor::new());
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };
        let (callback, calls) = recording_callback();

        unsafe { shared.set_executor(Arc::clone(&executor) as Arc<dyn Executor>, 0) };
        shared.set_callback(callback);
        shared.set_result(Ok(5));

        // Submitted but not yet run: the machine is Done, the callback
        // slot still populated on behalf of the queued task.
        assert_eq!(shared.state(), State::Done);
        assert_eq!(executor.pending(), 1);
        assert!(calls.lock().unwrap().is_empty());
        assert!(shared.has_callback());

        assert_eq!(executor.run(), 1);
        assert_eq!(*calls.lock().unwrap(), vec![Ok(5)]);
        assert!(!shared.has_callback());

        unsafe {
            RawCore::detach_promise(core);
            RawCore::detach_future(core);
        }
    }

    #[test]
    fn test_discarded_task_still_clears_callback() {
        let executor = Arc::new(ManualExecutor::new());
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };
        let (guard, dropped) = sentinel();
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked2 = Arc::clone(&invoked);

        unsafe { shared.set_executor(Arc::clone(&executor) as Arc<dyn Executor>, 0) };
        shared.set_callback(move |_| {
            let _guard = guard;
            invoked2.store(true, Ordering::SeqCst);
        });
        shared.set_result(Ok(9));
        assert!(shared.has_callback());

        // The executor throws the queued task away without running it. The
        // travelling reference is released and the slot must clear.
        assert_eq!(executor.clear(), 1);
        assert!(!shared.has_callback());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!invoked.load(Ordering::SeqCst));

        unsafe {
            RawCore::detach_promise(core);
            RawCore::detach_future(core);
        }
    }

    #[test]
    fn test_attachment_accounting_across_executor_hop() {
        let executor = Arc::new(ManualExecutor::new());
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };

        assert_eq!(shared.attached(), 2);
        unsafe { shared.set_executor(Arc::clone(&executor) as Arc<dyn Executor>, 0) };
        shared.set_callback(|_| {});
        shared.set_result(Ok(0));
        // Both sides plus the reference inside the queued task.
        assert_eq!(shared.attached(), 3);
        executor.run();
        assert_eq!(shared.attached(), 2);

        unsafe {
            RawCore::detach_promise(core);
            RawCore::detach_future(core);
        }
    }

    #[test]
    fn test_interrupt_stored_at_most_once() {
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        assert!(shared.interrupt_handler().is_none());
        shared.raise(Failure::msg("first"));
        shared.set_interrupt_handler(Arc::new(move |interrupt| {
            assert_eq!(*interrupt, Failure::msg("first"));
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // A second interrupt is dropped on the floor.
        shared.raise(Failure::msg("second"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(shared.interrupt_handler().is_none());

        unsafe {
            RawCore::detach_promise(core);
            RawCore::detach_future(core);
        }
    }

    #[test]
    fn test_interrupt_ignored_once_result_exists() {
        let core = RawCore::<i32>::alloc();
        let shared = unsafe { core.as_ref() };
        shared.set_result(Ok(3));

        shared.raise(Failure::msg("too late"));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        shared.set_interrupt_handler(Arc::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(shared.interrupt_handler().is_none());

        unsafe {
            RawCore::detach_promise(core);
            RawCore::detach_future(core);
        }
    }

    #[test]
    fn test_racing_setters_fire_exactly_once() {
        for i in 0..200 {
            let core = RawCore::<usize>::alloc();
            let shared = unsafe { core.as_ref() };
            let (sender, receiver) = mpsc::channel::<Try<usize>>();

            thread::scope(|scope| {
                scope.spawn(|| shared.set_result(Ok(i)));
                scope.spawn(move || {
                    shared.set_callback(move |result| {
                        sender.send(result).unwrap();
                    });
                });
            });

            assert_eq!(receiver.recv().unwrap(), Ok(i));
            assert!(receiver.try_recv().is_err());
            assert_eq!(shared.state(), State::Done);

            unsafe {
                RawCore::detach_promise(core);
                RawCore::detach_future(core);
            }
        }
    }
}
