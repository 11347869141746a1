//! Handles naming readiness sources in the notification queue

use std::sync::atomic::{AtomicI64, Ordering};

/// Event value carried through the queue: readiness bits, or `UNLISTED`
pub type IntCanBeHandle = i64;

/// Key under which a pipe publishes readiness in the notification queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: i64,
}

impl Handle {
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }
}

/// Fresh process-wide handle; pipes sharing one queue never collide
pub fn next_handle() -> Handle {
    static NEXT_ID: AtomicI64 = AtomicI64::new(1);
    Handle {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
    }
}
