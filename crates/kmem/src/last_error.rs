//! Process-wide "last error" slot.
//!
//! Allocation paths that report failure through `None` record
//! [`ErrorKind::OutOfMemory`] here, matching the errno-style convention the
//! rest of the kernel's library shim uses. Once set, the slot is never
//! cleared.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::ErrorKind;

const NO_ERROR: u8 = 0;

static LAST_ERROR: AtomicU8 = AtomicU8::new(NO_ERROR);

/// Returns the most recently recorded error, if any.
#[must_use]
pub fn last_error() -> Option<ErrorKind> {
    ErrorKind::from_raw(LAST_ERROR.load(Ordering::Relaxed))
}

pub(crate) fn record(kind: ErrorKind) {
    LAST_ERROR.store(kind as u8, Ordering::Relaxed);
}
