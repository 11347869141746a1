//! Access policies: who may attach to a block device, and when
//!
//! A policy decides at open time whether the caller may attach and to which
//! [`Device`]; [`AccessDevice`] does the rest (trim on write-only open, handle
//! construction, release on close). Policy bookkeeping has its own lock and
//! is never mutated while a device lock is held.

mod cloned;
mod exclusive;
mod same_user;

pub use cloned::Cloned;
pub use exclusive::Exclusive;
pub use same_user::{SameUser, SameUserBlocking};

use std::fmt;
use std::sync::Arc;

use crate::context::OpenContext;
use crate::error::Result;
use crate::store::{Device, DeviceFile};

pub trait AccessPolicy: Send + Sync + 'static {
    /// Admit the caller and pick the device it attaches to
    ///
    /// # Errors
    /// Policy specific: `Busy`, `WouldBlock`, `Interrupted`,
    /// `InvalidArgument` or `OutOfMemory`.
    fn acquire(&self, ctx: &OpenContext) -> Result<Arc<Device>>;

    /// Undo one successful `acquire`
    fn release(&self, ctx: &OpenContext, device: &Arc<Device>);

    /// Free the storage of every device the policy owns
    fn cleanup(&self);
}

/// Block device guarded by an access policy
pub struct AccessDevice<P: AccessPolicy> {
    policy: Arc<P>,
}

impl<P: AccessPolicy> AccessDevice<P> {
    #[must_use]
    pub fn new(policy: P) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Attach the caller and return a handle positioned at 0
    ///
    /// A write-only open trims the device once the caller is admitted.
    /// The handle releases its slot in the policy when closed or dropped.
    ///
    /// # Errors
    /// Whatever the policy's `acquire` reports.
    pub fn open(&self, ctx: &OpenContext) -> Result<DeviceFile> {
        let device = self.policy.acquire(ctx)?;
        if ctx.flags.is_write_only() {
            device.trim();
        }

        let policy = Arc::clone(&self.policy);
        let release_ctx = ctx.clone();
        let release_device = Arc::clone(&device);
        let hook = Box::new(move || policy.release(&release_ctx, &release_device));
        Ok(DeviceFile::new(device, ctx.flags).with_release(hook))
    }

    pub fn cleanup(&self) {
        self.policy.cleanup();
    }
}

impl<P: AccessPolicy + fmt::Debug> fmt::Debug for AccessDevice<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessDevice({:?})", self.policy)
    }
}
