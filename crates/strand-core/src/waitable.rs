//! Uniform event access for synchronizable objects
//!
//! Anything that can surface an [`Event`] plugs into the wait strategies by
//! implementing [`Waitable`].

use crate::event::Event;

/// Access to the event behind a synchronizable object.
pub trait Waitable {
    /// The object's event. The object retains ownership; callers may only
    /// perform wait-side operations (`try_wait`/`wait`/`dismiss_wait`) on
    /// the result, and only while the object is alive.
    fn event(&self) -> *mut Event;
}

impl Waitable for *mut Event {
    fn event(&self) -> *mut Event {
        *self
    }
}

impl Waitable for Event {
    fn event(&self) -> *mut Event {
        self as *const Event as *mut Event
    }
}
