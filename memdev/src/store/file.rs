//! Per-open handle on a block device
//!
//! Carries the file position and open mode. Dropping the handle, or calling
//! [`DeviceFile::close`], runs the access policy's release step exactly once.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;

use super::device::Device;
use crate::context::OpenFlags;
use crate::error::{DevError, Result};

/// Release step installed by an access policy
pub(crate) type ReleaseHook = Box<dyn FnOnce() + Send>;

pub struct DeviceFile {
    device: Arc<Device>,
    flags: OpenFlags,
    pos: u64,
    release: Option<ReleaseHook>,
}

impl DeviceFile {
    pub(crate) fn new(device: Arc<Device>, flags: OpenFlags) -> Self {
        Self {
            device,
            flags,
            pos: 0,
            release: None,
        }
    }

    pub(crate) fn with_release(mut self, hook: ReleaseHook) -> Self {
        self.release = Some(hook);
        self
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[must_use]
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read at the current position and advance it
    ///
    /// `Ok(0)` means end of data or a hole, never an error.
    ///
    /// # Errors
    /// `BadDescriptor` if the handle was not opened for reading.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(DevError::BadDescriptor("not opened for reading"));
        }
        let n = self.device.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at the current position and advance it
    ///
    /// Short writes are normal: at most one block is filled per call.
    ///
    /// # Errors
    /// `BadDescriptor` if the handle was not opened for writing,
    /// `OutOfMemory` if the block could not be allocated.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(DevError::BadDescriptor("not opened for writing"));
        }
        let n = self.device.write_at(self.pos, data)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write all of `data`, looping over block boundaries
    ///
    /// # Errors
    /// As for [`Self::write`]; bytes written before the failure stay written.
    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Fill `buf` as far as the data allows, looping over block boundaries
    ///
    /// Stops early at the end of data or at a hole.
    ///
    /// # Errors
    /// As for [`Self::read`].
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Move the position; there is no upper bound
    ///
    /// # Errors
    /// `InvalidArgument` if the result would be negative or overflow.
    pub fn seek(&mut self, from: SeekFrom) -> Result<u64> {
        let new_pos = match from {
            SeekFrom::Start(off) => Some(off),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.device.size().checked_add_signed(delta),
        };
        let new_pos = new_pos.ok_or_else(|| {
            DevError::invalid(format!("seek {from:?} from {} is out of range", self.pos))
        })?;
        self.pos = new_pos;
        Ok(new_pos)
    }

    /// Release the handle now instead of at drop
    pub fn close(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for DeviceFile {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for DeviceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceFile(device={}, pos={}, flags={:?})",
            self.device.name(),
            self.pos,
            self.flags
        )
    }
}

impl std::io::Read for DeviceFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(DeviceFile::read(self, buf)?)
    }
}

impl std::io::Write for DeviceFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(DeviceFile::write(self, buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::io::Seek for DeviceFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        Ok(DeviceFile::seek(self, pos)?)
    }
}

impl embedded_io::ErrorType for DeviceFile {
    type Error = DevError;
}

impl embedded_io::Read for DeviceFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        DeviceFile::read(self, buf)
    }
}

impl embedded_io::Write for DeviceFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        DeviceFile::write(self, buf)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl embedded_io::Seek for DeviceFile {
    fn seek(&mut self, pos: embedded_io::SeekFrom) -> Result<u64> {
        let pos = match pos {
            embedded_io::SeekFrom::Start(off) => SeekFrom::Start(off),
            embedded_io::SeekFrom::End(delta) => SeekFrom::End(delta),
            embedded_io::SeekFrom::Current(delta) => SeekFrom::Current(delta),
        };
        DeviceFile::seek(self, pos)
    }
}
