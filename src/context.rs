//! Ambient request context carried across the callback boundary.
//!
//! A [`RequestContext`] is an immutable bag of request-scoped values kept in
//! thread-local storage. Arming a callback snapshots the caller's current
//! context; dispatch reinstalls that snapshot around the callback so request
//! attribution survives the thread hop, then restores whatever the running
//! thread had before.
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

thread_local! {
    /// The calling thread's current ambient context.
    static CURRENT: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

/// A cheaply clonable handle to request-scoped data.
///
/// Values are keyed by `&'static str` and stored type-erased; [`get`]
/// recovers them by downcast. The map is copy-on-write: [`with_value`]
/// only clones the underlying storage when the handle is shared.
///
/// [`get`]: RequestContext::get
/// [`with_value`]: RequestContext::with_value
#[derive(Clone, Default)]
pub struct RequestContext {
    data: Arc<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl RequestContext {
    pub fn new() -> RequestContext {
        RequestContext::default()
    }

    /// Return a context extended with `value` under `key`.
    pub fn with_value<V>(mut self, key: &'static str, value: V) -> RequestContext
    where
        V: Any + Send + Sync,
    {
        Arc::make_mut(&mut self.data).insert(key, Arc::new(value));
        self
    }

    /// Look up a value by key and concrete type.
    pub fn get<V>(&self, key: &'static str) -> Option<&V>
    where
        V: Any + Send + Sync,
    {
        self.data.get(key).and_then(|value| value.downcast_ref())
    }

    /// Snapshot the calling thread's current context, if any.
    pub fn save() -> Option<RequestContext> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Make `context` the calling thread's current context. The returned
    /// guard restores the previous context when dropped.
    pub fn install(context: Option<RequestContext>) -> ContextGuard {
        let previous =
            CURRENT.with(|current| mem::replace(&mut *current.borrow_mut(), context));
        ContextGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("keys", &self.data.len())
            .finish()
    }
}

/// Restores the previously installed context on drop. Must stay on the
/// thread that created it.
#[must_use = "dropping the guard restores the previous context immediately"]
pub struct ContextGuard {
    previous: Option<RequestContext>,
    // Restoration has to happen on the installing thread.
    _not_send: PhantomData<*mut ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}
