//! Same-user policies
//!
//! Any number of handles may be open at once as long as they all belong to
//! the user that opened first. The owner is recorded when the open count
//! goes from 0 to 1 and is meaningless while the count is 0.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

use super::AccessPolicy;
use crate::config::SharedTunables;
use crate::context::{Capabilities, Credentials, OpenContext};
use crate::error::{DevError, Result};
use crate::interrupt::{wait_interruptible, WakeHook};
use crate::store::Device;

#[derive(Debug, Default)]
struct OwnerState {
    count: usize,
    owner: u32,
}

impl OwnerState {
    fn admits(&self, cred: &Credentials) -> bool {
        self.count == 0
            || self.owner == cred.uid
            || self.owner == cred.euid
            || cred.has(Capabilities::DAC_OVERRIDE)
    }

    fn attach(&mut self, cred: &Credentials) {
        if self.count == 0 {
            self.owner = cred.uid;
        }
        self.count += 1;
    }

    /// Returns true when the last handle went away
    fn detach(&mut self, device: &str) -> bool {
        if self.count == 0 {
            log::warn!("{device}: release without a matching open");
            return false;
        }
        self.count -= 1;
        self.count == 0
    }
}

/// Refuses other users with `Busy`
pub struct SameUser {
    device: Arc<Device>,
    state: Mutex<OwnerState>,
}

impl SameUser {
    #[must_use]
    pub fn new(name: &str, tunables: SharedTunables) -> Self {
        Self {
            device: Arc::new(Device::new(name, tunables)),
            state: Mutex::new(OwnerState::default()),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Current owner and number of open handles
    #[must_use]
    pub fn owner(&self) -> Option<(u32, usize)> {
        let state = self.state.lock();
        (state.count > 0).then_some((state.owner, state.count))
    }
}

impl AccessPolicy for SameUser {
    fn acquire(&self, ctx: &OpenContext) -> Result<Arc<Device>> {
        let mut state = self.state.lock();
        if !state.admits(&ctx.credentials) {
            tracing::debug!(
                device = self.device.name(),
                uid = ctx.credentials.uid,
                owner = state.owner,
                "same-user: refused"
            );
            return Err(DevError::Busy);
        }
        state.attach(&ctx.credentials);
        Ok(Arc::clone(&self.device))
    }

    fn release(&self, _ctx: &OpenContext, _device: &Arc<Device>) {
        self.state.lock().detach(self.device.name());
    }

    fn cleanup(&self) {
        self.device.trim();
    }
}

impl fmt::Debug for SameUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SameUser(device={}, owner={:?})", self.device.name(), self.owner())
    }
}

struct Gate {
    state: Mutex<OwnerState>,
    released: Condvar,
}

/// Parks other users until the owner's last handle is closed
///
/// A non-blocking open fails with `WouldBlock` instead; a parked open
/// returns `Interrupted` if the caller's interrupt token is raised.
pub struct SameUserBlocking {
    device: Arc<Device>,
    gate: Arc<Gate>,
}

impl SameUserBlocking {
    #[must_use]
    pub fn new(name: &str, tunables: SharedTunables) -> Self {
        Self {
            device: Arc::new(Device::new(name, tunables)),
            gate: Arc::new(Gate {
                state: Mutex::new(OwnerState::default()),
                released: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[must_use]
    pub fn owner(&self) -> Option<(u32, usize)> {
        let state = self.gate.state.lock();
        (state.count > 0).then_some((state.owner, state.count))
    }
}

impl AccessPolicy for SameUserBlocking {
    fn acquire(&self, ctx: &OpenContext) -> Result<Arc<Device>> {
        let cred = &ctx.credentials;
        let mut state = self.gate.state.lock();

        if !state.admits(cred) {
            if ctx.flags.is_nonblocking() {
                return Err(DevError::WouldBlock);
            }
            tracing::debug!(
                device = self.device.name(),
                uid = cred.uid,
                owner = state.owner,
                "same-user: waiting for owner to leave"
            );
            let gate = Arc::clone(&self.gate);
            wait_interruptible(
                &self.gate.released,
                &mut state,
                ctx.interrupt.as_ref(),
                move || -> WakeHook {
                    Arc::new(move || {
                        let _guard = gate.state.lock();
                        gate.released.notify_all();
                    })
                },
                |s| !s.admits(cred),
            )?;
        }

        state.attach(cred);
        Ok(Arc::clone(&self.device))
    }

    fn release(&self, _ctx: &OpenContext, _device: &Arc<Device>) {
        let mut state = self.gate.state.lock();
        if state.detach(self.device.name()) {
            log::debug!("{}: last handle closed, waking waiters", self.device.name());
            self.gate.released.notify_all();
        }
    }

    fn cleanup(&self) {
        self.device.trim();
    }
}

impl fmt::Debug for SameUserBlocking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SameUserBlocking(device={}, owner={:?})",
            self.device.name(),
            self.owner()
        )
    }
}
