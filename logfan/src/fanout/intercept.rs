use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::record::LogRecord;

pub type Interceptor = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Holds at most one interceptor. Install and clear are plain swaps: the
/// last writer wins and clearing never checks who installed the callback.
#[derive(Default)]
pub(crate) struct InterceptSlot {
    current: Mutex<Option<Interceptor>>,
}

impl InterceptSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Interceptor>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn install(&self, interceptor: Interceptor) {
        *self.lock() = Some(interceptor);
    }

    pub(crate) fn clear(&self) {
        *self.lock() = None;
    }

    /// Clones the current callback out so it can run without the lock held.
    pub(crate) fn current(&self) -> Option<Interceptor> {
        self.lock().clone()
    }
}

/// Scope of an installed interceptor. Dropping it empties the slot, even if
/// another interceptor replaced this one in the meantime.
#[must_use = "the interceptor is removed as soon as the guard is dropped"]
pub struct InterceptGuard<'a> {
    slot: &'a InterceptSlot,
}

impl<'a> InterceptGuard<'a> {
    pub(crate) fn new(slot: &'a InterceptSlot, interceptor: Interceptor) -> Self {
        slot.install(interceptor);
        InterceptGuard { slot }
    }

    /// Releases the scope now instead of at the end of the block.
    pub fn release(self) {}
}

impl Drop for InterceptGuard<'_> {
    fn drop(&mut self) {
        self.slot.clear();
    }
}
