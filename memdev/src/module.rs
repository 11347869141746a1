//! Device set lifecycle: everything created at load time, torn down together

use std::sync::Arc;

use crate::access::{AccessDevice, Cloned, Exclusive, SameUser, SameUserBlocking};
use crate::config::{ModuleParams, SharedTunables};
use crate::control::Control;
use crate::error::Result;
use crate::notification_queue::NotificationQueueArc;
use crate::pipe::PipeDevice;
use crate::store::Device;

pub struct Memdev {
    params: ModuleParams,
    tunables: SharedTunables,
    queue: NotificationQueueArc,
    devices: Vec<Arc<Device>>,
    pipes: Vec<Arc<PipeDevice>>,
    single: AccessDevice<Exclusive>,
    user: AccessDevice<SameUser>,
    wuser: AccessDevice<SameUserBlocking>,
    private: AccessDevice<Cloned>,
    control: Control,
    cleaned_up: bool,
}

impl Memdev {
    /// Create every device described by `params`
    ///
    /// All devices share one set of tunables, seeded from `params`, and one
    /// notification queue.
    ///
    /// # Errors
    /// `InvalidArgument` for invalid sizes, `OutOfMemory` if the device
    /// tables cannot be allocated.
    pub fn init(params: ModuleParams) -> Result<Self> {
        let initial = params.tunables();
        initial.validate()?;
        let tunables = SharedTunables::new(initial);
        let queue = NotificationQueueArc::new();

        let mut devices = Vec::new();
        devices.try_reserve_exact(params.nr_devs)?;
        for i in 0..params.nr_devs {
            devices.push(Arc::new(Device::new(&format!("memdev{i}"), tunables.clone())));
        }

        let mut pipes = Vec::new();
        pipes.try_reserve_exact(params.pipe_nr_devs)?;
        for i in 0..params.pipe_nr_devs {
            pipes.push(Arc::new(PipeDevice::new(
                &format!("memdevpipe{i}"),
                tunables.clone(),
                queue.clone(),
            )));
        }

        let memdev = Self {
            single: AccessDevice::new(Exclusive::new("memdevsingle", tunables.clone())),
            user: AccessDevice::new(SameUser::new("memdevuid", tunables.clone())),
            wuser: AccessDevice::new(SameUserBlocking::new("memdevwuid", tunables.clone())),
            private: AccessDevice::new(Cloned::new(
                "memdevpriv",
                tunables.clone(),
                params.clone_reclaim,
            )),
            control: Control::new(tunables.clone()),
            params,
            tunables,
            queue,
            devices,
            pipes,
            cleaned_up: false,
        };
        tracing::info!(
            quantum = initial.quantum,
            qset = initial.qset,
            pipe_buffer = initial.pipe_buffer,
            devices = memdev.devices.len(),
            pipes = memdev.pipes.len(),
            "memdev initialised"
        );
        Ok(memdev)
    }

    #[must_use]
    pub fn params(&self) -> &ModuleParams {
        &self.params
    }

    #[must_use]
    pub fn tunables(&self) -> &SharedTunables {
        &self.tunables
    }

    #[must_use]
    pub fn queue(&self) -> &NotificationQueueArc {
        &self.queue
    }

    #[must_use]
    pub fn device(&self, index: usize) -> Option<&Arc<Device>> {
        self.devices.get(index)
    }

    #[must_use]
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    #[must_use]
    pub fn pipe(&self, index: usize) -> Option<&Arc<PipeDevice>> {
        self.pipes.get(index)
    }

    #[must_use]
    pub fn pipes(&self) -> &[Arc<PipeDevice>] {
        &self.pipes
    }

    #[must_use]
    pub fn single(&self) -> &AccessDevice<Exclusive> {
        &self.single
    }

    #[must_use]
    pub fn user(&self) -> &AccessDevice<SameUser> {
        &self.user
    }

    #[must_use]
    pub fn wuser(&self) -> &AccessDevice<SameUserBlocking> {
        &self.wuser
    }

    #[must_use]
    pub fn private(&self) -> &AccessDevice<Cloned> {
        &self.private
    }

    #[must_use]
    pub fn control(&self) -> &Control {
        &self.control
    }

    /// Free the storage of every block device, cloned ones included
    ///
    /// Runs at most once; dropping the set calls it too.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        for device in &self.devices {
            device.trim();
        }
        self.single.cleanup();
        self.user.cleanup();
        self.wuser.cleanup();
        self.private.cleanup();
        tracing::info!("memdev cleaned up");
    }
}

impl Drop for Memdev {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for Memdev {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memdev")
            .field("tunables", &self.tunables.snapshot())
            .field("devices", &self.devices.len())
            .field("pipes", &self.pipes.len())
            .field("private", self.private.policy())
            .finish_non_exhaustive()
    }
}
