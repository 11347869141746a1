use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use super::AccessPolicy;
use crate::config::SharedTunables;
use crate::context::OpenContext;
use crate::error::{DevError, Result};
use crate::store::Device;

/// One opener at a time, system-wide
pub struct Exclusive {
    device: Arc<Device>,
    /// 1 when free, 0 when taken; dips below 0 only inside `acquire`
    available: AtomicI32,
}

impl Exclusive {
    #[must_use]
    pub fn new(name: &str, tunables: SharedTunables) -> Self {
        Self {
            device: Arc::new(Device::new(name, tunables)),
            available: AtomicI32::new(1),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.available.load(Ordering::SeqCst) <= 0
    }
}

impl AccessPolicy for Exclusive {
    fn acquire(&self, ctx: &OpenContext) -> Result<Arc<Device>> {
        if self.available.fetch_sub(1, Ordering::SeqCst) != 1 {
            self.available.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                device = self.device.name(),
                uid = ctx.credentials.uid,
                "exclusive: already open"
            );
            return Err(DevError::Busy);
        }
        Ok(Arc::clone(&self.device))
    }

    fn release(&self, _ctx: &OpenContext, _device: &Arc<Device>) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }

    fn cleanup(&self) {
        self.device.trim();
    }
}

impl fmt::Debug for Exclusive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Exclusive(device={}, open={})",
            self.device.name(),
            self.is_open()
        )
    }
}
