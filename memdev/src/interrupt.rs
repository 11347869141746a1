//! Caller interruption for blocking waits
//!
//! A blocking call parks on a `parking_lot::Condvar` while holding nothing
//! else. To abort such a wait from another thread, the caller hands the
//! operation an [`Interrupt`] token and later calls [`Interrupt::raise`].
//!
//! The lost-wakeup problem is the same as in `notification_queue`: the raise
//! can happen between the waiter's "is it raised?" check and its park. To
//! close that window, the waiter registers a wake hook while holding the
//! guarded mutex, and the hook takes that same mutex before notifying. So the
//! raiser either runs before the check (the waiter sees the flag) or after
//! the park (the waiter gets the notification).

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{DevError, Result};

/// Wakes one parked waiter; must lock the waiter's mutex before notifying
pub type WakeHook = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    raised: AtomicBool,
    next_id: AtomicU64,
    hooks: Mutex<Vec<(u64, WakeHook)>>,
}

/// Cloneable interrupt token; clones raise the same flag
#[derive(Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Interrupt {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                raised: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Raise the flag and wake every wait currently using this token
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        // Snapshot outside the hooks lock: a hook takes the waiter's mutex,
        // and the waiter registers hooks while holding that mutex.
        let hooks: Vec<WakeHook> = self
            .inner
            .hooks
            .lock()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        log::debug!("interrupt raised, waking {} waiter(s)", hooks.len());
        for hook in hooks {
            hook();
        }
    }

    /// Clear the flag after the caller has handled the interruption
    pub fn clear(&self) {
        self.inner.raised.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    fn register(&self, hook: WakeHook) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.hooks.lock().push((id, hook));
        id
    }

    fn unregister(&self, id: u64) {
        self.inner.hooks.lock().retain(|(hid, _)| *hid != id);
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish_non_exhaustive()
    }
}

/// Park on `cond` until `blocked` returns false.
///
/// `blocked` is re-evaluated after every wakeup, spurious or not. If an
/// interrupt token is given, `hook` must build a [`WakeHook`] that locks the
/// mutex behind `guard` and notifies `cond`.
///
/// On return the guard is held again, whatever the outcome.
///
/// # Errors
/// `Interrupted` if the token is (or becomes) raised before the condition
/// clears.
pub fn wait_interruptible<T>(
    cond: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    interrupt: Option<&Interrupt>,
    hook: impl FnOnce() -> WakeHook,
    mut blocked: impl FnMut(&mut T) -> bool,
) -> Result<()> {
    let Some(interrupt) = interrupt else {
        while blocked(&mut **guard) {
            cond.wait(guard);
        }
        return Ok(());
    };

    let id = interrupt.register(hook());
    let outcome = loop {
        if interrupt.is_raised() {
            break Err(DevError::Interrupted);
        }
        if !blocked(&mut **guard) {
            break Ok(());
        }
        cond.wait(guard);
    };
    interrupt.unregister(id);
    outcome
}
