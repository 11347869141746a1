//! Bounded pipe device with blocking, non-blocking and async I/O
//!
//! A [`PipeDevice`] owns a ring buffer, allocated on the first open and freed
//! when the last handle closes. Handles ([`PipeFile`]) read and write through
//! it under one mutex:
//!
//! - Blocking callers park on a condition variable (`inq` for readers,
//!   `outq` for writers) and re-check after every wakeup.
//! - Non-blocking callers get `WouldBlock`.
//! - Async callers await [`PipeFile::readable`] / [`PipeFile::writable`], or
//!   [`PipeFile::subscribe`] to get one event per write.
//!
//! Async readiness goes through the notification queue. As everywhere in
//! the crate, the queue is only called after the pipe lock is released.

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::config::SharedTunables;
use crate::context::{OpenContext, OpenFlags};
use crate::error::{DevError, Result};
use crate::idgen::{self, Handle, IntCanBeHandle};
use crate::interrupt::{wait_interruptible, Interrupt, WakeHook};
use crate::notification_queue::{NotificationQueueArc, UNLISTED};
use crate::ring::RingBuffer;

bitflags! {
    /// Poll-style readiness mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Readiness: u32 {
        const IN = 0x001;
        const OUT = 0x004;
        /// No writer is left
        const HUP = 0x010;
        const RDNORM = 0x040;
        const WRNORM = 0x100;
    }
}

impl Readiness {
    pub const READABLE: Self = Self::IN.union(Self::RDNORM);
    pub const WRITABLE: Self = Self::OUT.union(Self::WRNORM);

    fn as_event(self) -> IntCanBeHandle {
        IntCanBeHandle::from(self.bits())
    }
}

#[derive(Default)]
struct PipeState {
    ring: Option<RingBuffer>,
    readers: usize,
    writers: usize,
}

impl PipeState {
    fn is_empty(&self) -> bool {
        self.ring.as_ref().map_or(true, RingBuffer::is_empty)
    }

    fn space_free(&self) -> usize {
        self.ring.as_ref().map_or(0, RingBuffer::space_free)
    }

    fn readiness(&self) -> Readiness {
        let mut mask = Readiness::empty();
        if !self.is_empty() {
            mask |= Readiness::READABLE;
        }
        if self.space_free() > 0 {
            mask |= Readiness::WRITABLE;
        }
        if self.writers == 0 {
            mask |= Readiness::HUP;
        }
        mask
    }
}

struct Shared {
    state: Mutex<PipeState>,
    /// Data arrived, or the last writer left
    inq: Condvar,
    /// Space was freed
    outq: Condvar,
}

fn wake_hook(shared: &Arc<Shared>) -> impl FnOnce() -> WakeHook {
    let shared = Arc::clone(shared);
    move || -> WakeHook {
        Arc::new(move || {
            let _guard = shared.state.lock();
            shared.inq.notify_all();
            shared.outq.notify_all();
        })
    }
}

pub struct PipeDevice {
    shared: Arc<Shared>,
    queue: NotificationQueueArc,
    /// Published on every write and when the last writer leaves
    readable: Handle,
    /// Published on every read that frees space
    writable: Handle,
    tunables: SharedTunables,
    name: String,
}

impl PipeDevice {
    #[must_use]
    pub fn new(name: &str, tunables: SharedTunables, queue: NotificationQueueArc) -> Self {
        let readable = idgen::next_handle();
        let writable = idgen::next_handle();
        queue.whitelist(readable, &format!("{name}.readable"));
        queue.whitelist(writable, &format!("{name}.writable"));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PipeState::default()),
                inq: Condvar::new(),
                outq: Condvar::new(),
            }),
            queue,
            readable,
            writable,
            tunables,
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a handle
    ///
    /// The first open after the ring was freed allocates a new one with
    /// the current `pipe_buffer` size. Every open rewinds both cursors to
    /// the start of the ring, discarding anything still buffered.
    ///
    /// # Errors
    /// `InvalidArgument` if neither READ nor WRITE is requested,
    /// `OutOfMemory` if the ring cannot be allocated.
    pub fn open(self: &Arc<Self>, ctx: &OpenContext) -> Result<PipeFile> {
        let flags = ctx.flags;
        if !flags.intersects(OpenFlags::READ_WRITE) {
            return Err(DevError::invalid("pipe open needs READ or WRITE"));
        }

        let mut state = self.shared.state.lock();
        if state.ring.is_none() {
            let capacity = self.tunables.snapshot().pipe_buffer;
            state.ring = Some(RingBuffer::try_new(capacity).inspect_err(|e| {
                log::warn!("{}: cannot allocate {capacity}-byte ring: {e}", self.name);
            })?);
            log::debug!("{}: allocated {capacity}-byte ring", self.name);
        }
        if let Some(ring) = state.ring.as_mut() {
            ring.reset();
        }
        if flags.contains(OpenFlags::READ) {
            state.readers += 1;
        }
        if flags.contains(OpenFlags::WRITE) {
            state.writers += 1;
        }
        drop(state);

        Ok(PipeFile {
            device: Arc::clone(self),
            flags,
            interrupt: ctx.interrupt.clone(),
            released: false,
        })
    }

    /// Free space in the ring, 0 if no ring is allocated
    #[must_use]
    pub fn space_free(&self) -> usize {
        self.shared.state.lock().space_free()
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.shared.state.lock().ring.is_some()
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.shared.state.lock().ring.as_ref().map(RingBuffer::capacity)
    }

    /// Bytes waiting to be read
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().ring.as_ref().map_or(0, RingBuffer::len)
    }

    /// Read and write cursors, if a ring is allocated
    #[must_use]
    pub fn cursors(&self) -> Option<(usize, usize)> {
        self.shared.state.lock().ring.as_ref().map(RingBuffer::cursors)
    }

    #[must_use]
    pub fn readers(&self) -> usize {
        self.shared.state.lock().readers
    }

    #[must_use]
    pub fn writers(&self) -> usize {
        self.shared.state.lock().writers
    }

    #[must_use]
    pub fn poll(&self) -> Readiness {
        self.shared.state.lock().readiness()
    }
}

impl Drop for PipeDevice {
    fn drop(&mut self) {
        self.queue.unlist(self.readable);
        self.queue.unlist(self.writable);
    }
}

impl fmt::Debug for PipeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        write!(
            f,
            "PipeDevice(name={}, ring={:?}, readers={}, writers={})",
            self.name, state.ring, state.readers, state.writers
        )
    }
}

/// One open handle on a pipe
///
/// `read` and `write` take `&mut self` only to match the `std::io` traits;
/// several handles on the same pipe may be used from different threads.
pub struct PipeFile {
    device: Arc<PipeDevice>,
    flags: OpenFlags,
    interrupt: Option<Interrupt>,
    released: bool,
}

impl PipeFile {
    #[must_use]
    pub fn device(&self) -> &Arc<PipeDevice> {
        &self.device
    }

    #[must_use]
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.flags.set(OpenFlags::NONBLOCK, nonblocking);
    }

    /// Read what is contiguously available, up to `buf.len()`
    ///
    /// An empty pipe parks the caller until a writer delivers data, or
    /// fails with `WouldBlock` in non-blocking mode. Whether a writer is
    /// open does not matter: an empty pipe never reads as end of stream.
    ///
    /// # Errors
    /// `BadDescriptor` for a handle without READ, `WouldBlock`,
    /// `Interrupted`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(DevError::BadDescriptor("pipe handle not opened for reading"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let device = &self.device;
        let shared = &device.shared;

        let mut state = shared.state.lock();
        if state.is_empty() {
            if self.flags.is_nonblocking() {
                return Err(DevError::WouldBlock);
            }
            log::debug!("{}: reader going to sleep", device.name);
            wait_interruptible(
                &shared.inq,
                &mut state,
                self.interrupt.as_ref(),
                wake_hook(shared),
                |s| s.is_empty(),
            )?;
        }

        let count = state.ring.as_mut().map_or(0, |ring| ring.read_into(buf));
        drop(state);

        if count > 0 {
            shared.outq.notify_all();
            device
                .queue
                .notify(device.writable, Readiness::WRITABLE.as_event());
            log::debug!("{}: read {count} bytes", device.name);
        }
        Ok(count)
    }

    /// Write what fits contiguously, up to `data.len()`
    ///
    /// A full pipe parks the caller, or fails with `WouldBlock` in
    /// non-blocking mode. Every successful write wakes parked readers and
    /// sends one event to every async listener.
    ///
    /// # Errors
    /// `BadDescriptor` for a handle without WRITE, `WouldBlock`,
    /// `Interrupted`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(DevError::BadDescriptor("pipe handle not opened for writing"));
        }
        if data.is_empty() {
            return Ok(0);
        }
        let device = &self.device;
        let shared = &device.shared;

        let mut state = shared.state.lock();
        if state.space_free() == 0 {
            if self.flags.is_nonblocking() {
                return Err(DevError::WouldBlock);
            }
            log::debug!("{}: writer going to sleep", device.name);
            wait_interruptible(
                &shared.outq,
                &mut state,
                self.interrupt.as_ref(),
                wake_hook(shared),
                |s| s.space_free() == 0,
            )?;
        }

        let count = state.ring.as_mut().map_or(0, |ring| ring.write_from(data));
        drop(state);

        shared.inq.notify_all();
        device
            .queue
            .notify(device.readable, Readiness::READABLE.as_event());
        log::debug!("{}: wrote {count} bytes", device.name);
        Ok(count)
    }

    /// Current readiness of the pipe; never blocks
    #[must_use]
    pub fn poll(&self) -> Readiness {
        self.device.poll()
    }

    /// Resolve once the pipe has data, or no writer is left
    pub async fn readable(&self) -> Readiness {
        self.wait_for(Readiness::READABLE | Readiness::HUP, self.device.readable, "readable")
            .await
    }

    /// Resolve once the pipe has free space
    pub async fn writable(&self) -> Readiness {
        self.wait_for(Readiness::WRITABLE, self.device.writable, "writable")
            .await
    }

    /// See the `crate::notification_queue` documentation for the
    /// check, lock, re-check sequence.
    fn wait_for(
        &self,
        wanted: Readiness,
        handle: Handle,
        hint: &'static str,
    ) -> impl Future<Output = Readiness> + Send + '_ {
        async move {
            loop {
                let ready = self.poll();
                if ready.intersects(wanted) {
                    return ready;
                }
                let wait = {
                    let lock = self.device.queue.get_lock();
                    if self.poll().intersects(wanted) {
                        None
                    } else {
                        Some(self.device.queue.wait_async(handle, hint, lock))
                    }
                };
                if let Some(wait) = wait {
                    if wait.await == UNLISTED {
                        return self.poll();
                    }
                }
            }
        }
    }

    /// Register an async listener for "input became available"
    ///
    /// The receiver gets one event per write carrying the
    /// [`Readiness::READABLE`] bits, plus one [`Readiness::HUP`] event when
    /// the last writer closes. Drop the receiver to unregister.
    ///
    /// # Errors
    /// `BadDescriptor` if the pipe no longer accepts listeners.
    pub fn subscribe(
        &self,
        capacity: usize,
    ) -> Result<tokio::sync::broadcast::Receiver<IntCanBeHandle>> {
        self.device
            .queue
            .subscribe(self.device.readable, capacity, &self.device.name)
            .ok_or(DevError::BadDescriptor("pipe no longer accepts listeners"))
    }

    /// Release the handle now instead of at drop
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            log::warn!("{}: pipe handle released twice", self.device.name);
            return;
        }
        self.released = true;

        let device = &self.device;
        let shared = &device.shared;
        let mut state = shared.state.lock();
        if self.flags.contains(OpenFlags::READ) {
            state.readers = state.readers.saturating_sub(1);
        }
        let mut writers_gone = false;
        if self.flags.contains(OpenFlags::WRITE) {
            state.writers = state.writers.saturating_sub(1);
            writers_gone = state.writers == 0;
        }
        if state.readers == 0 && state.writers == 0 && state.ring.take().is_some() {
            log::debug!("{}: last handle closed, ring freed", device.name);
        }
        drop(state);

        shared.inq.notify_all();
        shared.outq.notify_all();
        if writers_gone {
            device.queue.notify(device.readable, Readiness::HUP.as_event());
        }
    }
}

impl Drop for PipeFile {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}

impl fmt::Debug for PipeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipeFile(device={}, flags={:?}, released={})",
            self.device.name, self.flags, self.released
        )
    }
}

impl std::io::Read for PipeFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(PipeFile::read(self, buf)?)
    }
}

impl std::io::Write for PipeFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(PipeFile::write(self, buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl embedded_io::ErrorType for PipeFile {
    type Error = DevError;
}

impl embedded_io::Read for PipeFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        PipeFile::read(self, buf)
    }
}

impl embedded_io::Write for PipeFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        PipeFile::write(self, buf)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
