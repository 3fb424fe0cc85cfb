//! Closure-only shared access

use std::sync::Mutex;

/// Mutex wrapper whose only access path is a closure.
///
/// A panic inside one closure does not lock everyone else out: the poisoned
/// state is recovered and handed to the next caller.
#[derive(Debug, Default)]
pub struct AccessLock<T> {
    inner: Mutex<T>,
}

impl<T> AccessLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Run `f` with exclusive access to the value
    pub fn use_locked<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}
