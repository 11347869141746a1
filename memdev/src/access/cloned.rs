//! One private device per session
//!
//! The registry maps a session key to a device created on first use. Any
//! number of handles from the same session share that device without
//! further exclusion. By default an entry lives until cleanup; with
//! `reclaim` set it is dropped when its last handle closes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::AccessPolicy;
use crate::config::SharedTunables;
use crate::context::{OpenContext, SessionKey};
use crate::error::{DevError, Result};
use crate::store::Device;

struct Entry {
    device: Arc<Device>,
    opens: usize,
}

pub struct Cloned {
    devices: Mutex<HashMap<SessionKey, Entry>>,
    tunables: SharedTunables,
    reclaim: bool,
    name: String,
}

impl Cloned {
    #[must_use]
    pub fn new(name: &str, tunables: SharedTunables, reclaim: bool) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            tunables,
            reclaim,
            name: name.to_string(),
        }
    }

    /// Device of `session`, if it has been created
    #[must_use]
    pub fn device_for(&self, session: SessionKey) -> Option<Arc<Device>> {
        self.devices
            .lock()
            .get(&session)
            .map(|e| Arc::clone(&e.device))
    }

    /// Number of sessions with a device
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccessPolicy for Cloned {
    fn acquire(&self, ctx: &OpenContext) -> Result<Arc<Device>> {
        let key = ctx
            .session
            .ok_or_else(|| DevError::invalid("cloned device needs a session key"))?;

        let mut devices = self.devices.lock();
        if let Some(entry) = devices.get_mut(&key) {
            entry.opens += 1;
            return Ok(Arc::clone(&entry.device));
        }

        devices.try_reserve(1)?;
        let device = Arc::new(Device::new(
            &format!("{}/{}", self.name, key.0),
            self.tunables.clone(),
        ));
        devices.insert(
            key,
            Entry {
                device: Arc::clone(&device),
                opens: 1,
            },
        );
        tracing::debug!(device = self.name.as_str(), session = key.0, "cloned: new device");
        Ok(device)
    }

    fn release(&self, ctx: &OpenContext, _device: &Arc<Device>) {
        let Some(key) = ctx.session else {
            return;
        };
        let mut devices = self.devices.lock();
        let Some(entry) = devices.get_mut(&key) else {
            log::warn!("{}: release for unknown session {}", self.name, key.0);
            return;
        };
        entry.opens = entry.opens.saturating_sub(1);
        if self.reclaim && entry.opens == 0 {
            devices.remove(&key);
            tracing::debug!(device = self.name.as_str(), session = key.0, "cloned: reclaimed");
        }
    }

    fn cleanup(&self) {
        let drained: Vec<Entry> = self.devices.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.device.trim();
        }
    }
}

impl fmt::Debug for Cloned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cloned(name={}, sessions={}, reclaim={})",
            self.name,
            self.len(),
            self.reclaim
        )
    }
}
