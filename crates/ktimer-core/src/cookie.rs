//! Callback context and callback type
//!
//! A [`Cookie`] is the opaque context handed back to a timer callback on
//! every firing. It is reference counted so that one recurring timer
//! replicated across reactor threads can share it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Timer callback, invoked with the cookie given at `schedule`
pub type TimerFn = Arc<dyn Fn(&Cookie) + Send + Sync + 'static>;

/// Opaque, shareable callback context
#[derive(Clone, Default)]
pub struct Cookie(Option<Arc<dyn Any + Send + Sync>>);

impl Cookie {
    /// Wrap a value as a cookie
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Cookie(Some(Arc::new(value)))
    }

    /// Cookie carrying no context
    #[inline]
    pub const fn none() -> Self {
        Cookie(None)
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the context as `T`, if it is one
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// True when both cookies refer to the same allocation (or both are empty)
    pub fn ptr_eq(&self, other: &Cookie) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(v) => write!(f, "Cookie({:p})", Arc::as_ptr(v)),
            None => f.write_str("Cookie(none)"),
        }
    }
}
