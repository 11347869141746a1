//! Notification Queue
//!
//! Readiness fabric shared by pipes: a pipe publishes events under a
//! [`Handle`] (one for "became readable", one for "became writable"), and
//! two kinds of clients consume them:
//!
//! - one-shot waiters (`wait_async`), used by the `readable()`/`writable()`
//!   futures of a pipe handle;
//! - broadcast subscribers (`subscribe`), used as asynchronous listeners.
//!   Every subscriber receives every event published after it subscribed.
//!
//! # Waiting for a handle
//!
//! 10. Client: check readiness (takes the pipe lock)
//! 20. Client: call `wait_async`
//! 30. Queue: add client to the waiting list
//!
//! 40. Producer: change pipe state, release the pipe lock
//! 50. Producer: call `notify`
//! 60. Queue: drain the waiting list and wake the clients
//!
//! Step 60 may run between steps 10 and 30, and then the client sleeps
//! forever. The client therefore re-checks readiness while holding the
//! queue lock, and registers before releasing it:
//!
//! ```ignore
//! if !ready() {
//!     let lock = queue.get_lock();
//!     if !ready() {
//!         queue.wait_async(handle, debug_hint, lock).await;
//!     }
//! }
//! ```
//!
//! Producers never hold a pipe lock while calling into the queue, so the
//! order "queue lock, then pipe lock" taken by clients cannot deadlock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::idgen::{Handle, IntCanBeHandle};

/// Value sent to waiters and subscribers when a handle is unlisted
pub const UNLISTED: IntCanBeHandle = -1;

struct WaitingClient {
    sender: tokio::sync::oneshot::Sender<IntCanBeHandle>,
    debug_hint: String,
}

impl std::fmt::Debug for WaitingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitingClient")
            .field("debug_hint", &self.debug_hint)
            .finish_non_exhaustive()
    }
}

/// One broadcast channel per handle, any number of receivers
struct BroadcastChannel {
    sender: tokio::sync::broadcast::Sender<IntCanBeHandle>,
    debug_hint: String,
}

impl std::fmt::Debug for BroadcastChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastChannel")
            .field("debug_hint", &self.debug_hint)
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

pub struct InnerState {
    whitelist: HashMap<Handle, String>,
    waiting_clients: HashMap<Handle, Vec<WaitingClient>>,
    broadcast_channels: HashMap<Handle, BroadcastChannel>,
}

impl InnerState {
    fn new() -> Self {
        Self {
            whitelist: HashMap::new(),
            waiting_clients: HashMap::new(),
            broadcast_channels: HashMap::new(),
        }
    }
}

/// Thread-safe queue of readiness events keyed by handle
#[derive(Clone)]
pub struct NotificationQueueArc {
    inner: Arc<Mutex<InnerState>>,
}

impl NotificationQueueArc {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InnerState::new())),
        }
    }

    /// Get the lock for atomic condition-check + register operations
    pub fn get_lock(&self) -> parking_lot::MutexGuard<'_, InnerState> {
        self.inner.lock()
    }

    /// Start accepting waiters and subscribers for `handle`
    pub fn whitelist(&self, handle: Handle, debug_hint: &str) {
        let mut state = self.inner.lock();
        if let Some(old_hint) = state.whitelist.insert(handle, debug_hint.to_string()) {
            log::warn!(
                "queue.whitelist: handle {handle:?} already in whitelist (was: '{old_hint}')",
            );
        }
    }

    /// Stop accepting waiters for `handle`
    ///
    /// Wakes every waiter and subscriber with [`UNLISTED`] and drops the
    /// broadcast channel, so subscribers then see the channel closed.
    pub fn unlist(&self, handle: Handle) {
        let mut state = self.inner.lock();
        if state.whitelist.remove(&handle).is_none() {
            log::warn!("queue.unlist: handle {handle:?} not in whitelist");
        }
        drop(state);

        self.notify_and_optionally_delete(handle, UNLISTED, true);
    }

    /// Publish `arg` to the waiters and subscribers of `handle`
    pub fn notify(&self, handle: Handle, arg: IntCanBeHandle) {
        self.notify_and_optionally_delete(handle, arg, false);
    }

    /// Wait for the next event on `handle`
    ///
    /// Precondition: the caller acquired the lock with [`Self::get_lock`] and
    /// re-checked its condition under it.
    /// Post-condition: the lock is released before the returned future is
    /// polled.
    ///
    /// Resolves immediately if the handle is not whitelisted.
    pub fn wait_async(
        &self,
        handle: Handle,
        debug_hint: &str,
        mut lock: parking_lot::MutexGuard<'_, InnerState>,
    ) -> impl std::future::Future<Output = IntCanBeHandle> + Send {
        let (tx, rx) = tokio::sync::oneshot::channel();

        if lock.whitelist.contains_key(&handle) {
            lock.waiting_clients
                .entry(handle)
                .or_default()
                .push(WaitingClient {
                    sender: tx,
                    debug_hint: debug_hint.to_string(),
                });
        } else {
            // No warning: an unlisted handle is the normal end of a pipe
            let _ = tx.send(UNLISTED);
        }
        drop(lock);

        // The sender is only dropped unsent if the whole queue goes away
        // with clients still waiting; report that as unlisted too.
        async move { rx.await.unwrap_or(UNLISTED) }
    }

    /// Subscribe to every future event on `handle`
    ///
    /// Returns `None` if the handle is not whitelisted. Drop the receiver to
    /// unsubscribe.
    #[must_use]
    pub fn subscribe(
        &self,
        handle: Handle,
        channel_capacity: usize,
        debug_hint: &str,
    ) -> Option<tokio::sync::broadcast::Receiver<IntCanBeHandle>> {
        let mut state = self.inner.lock();

        if !state.whitelist.contains_key(&handle) {
            log::warn!("queue.subscribe: handle {handle:?} not in whitelist");
            return None;
        }

        let broadcast = state.broadcast_channels.entry(handle).or_insert_with(|| {
            let (tx, _rx) = tokio::sync::broadcast::channel(channel_capacity);
            BroadcastChannel {
                sender: tx,
                debug_hint: debug_hint.to_string(),
            }
        });

        Some(broadcast.sender.subscribe())
    }

    /// Number of live subscribers on `handle`
    #[must_use]
    pub fn subscriber_count(&self, handle: Handle) -> usize {
        self.inner
            .lock()
            .broadcast_channels
            .get(&handle)
            .map_or(0, |bc| bc.sender.receiver_count())
    }

    fn notify_and_optionally_delete(
        &self,
        handle: Handle,
        arg: IntCanBeHandle,
        delete_subscribed: bool,
    ) {
        let mut state = self.inner.lock();

        let waiters = state.waiting_clients.remove(&handle).unwrap_or_default();

        log::debug!(
            "queue.notify: handle {:?}, arg={}, waiters: {}, subscribers: {}",
            handle,
            arg,
            waiters.len(),
            state
                .broadcast_channels
                .get(&handle)
                .map_or(0, |bc| bc.sender.receiver_count())
        );

        for waiter in waiters {
            if waiter.sender.send(arg).is_err() {
                log::debug!(
                    "queue.notify: waiter gone for handle {:?} (hint: {})",
                    handle,
                    waiter.debug_hint
                );
            }
        }

        let channel = if delete_subscribed {
            state.broadcast_channels.remove(&handle)
        } else {
            None
        };
        let channel = channel.as_ref().or_else(|| state.broadcast_channels.get(&handle));
        if let Some(bc) = channel {
            // Err only means nobody is subscribed right now
            if bc.sender.send(arg).is_err() {
                log::debug!(
                    "queue.notify: no subscribers for handle {:?} (hint: {})",
                    handle,
                    bc.debug_hint
                );
            }
        }
    }
}
