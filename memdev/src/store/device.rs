//! Block-structured device
//!
//! One mutex guards the whole device; every read, write, trim and size query
//! holds it for the full call. Reads and writes never cross a block boundary
//! in one call, callers loop for larger transfers.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::file::DeviceFile;
use super::segment::{Position, SegmentList};
use crate::config::SharedTunables;
use crate::context::OpenFlags;
use crate::error::{DevError, Result};

struct StoreState {
    data: SegmentList,
    quantum: usize,
    qset: usize,
    /// Highest offset ever reached by a write
    size: u64,
}

/// Snapshot of a device's shape, for inspection and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub quantum: usize,
    pub qset: usize,
    pub size: u64,
    pub segments: usize,
    pub blocks: usize,
}

pub struct Device {
    state: Mutex<StoreState>,
    tunables: SharedTunables,
    name: String,
}

impl Device {
    /// Create an empty device with the current global quantum and qset
    #[must_use]
    pub fn new(name: &str, tunables: SharedTunables) -> Self {
        let current = tunables.snapshot();
        Self {
            state: Mutex::new(StoreState {
                data: SegmentList::default(),
                quantum: current.quantum,
                qset: current.qset,
                size: 0,
            }),
            tunables,
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        let state = self.state.lock();
        Geometry {
            quantum: state.quantum,
            qset: state.qset,
            size: state.size,
            segments: state.data.segment_count(),
            blocks: state.data.allocated_blocks(),
        }
    }

    /// Read up to `buf.len()` bytes at `offset`
    ///
    /// Returns 0 at or past the logical end, and also when `offset` falls in
    /// a hole: holes are not zero-filled. Never reads past the end of the
    /// block `offset` lands in.
    ///
    /// # Errors
    /// `InvalidArgument` if `offset` is beyond the addressable range.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let state = self.state.lock();
        if offset >= state.size || buf.is_empty() {
            return Ok(0);
        }

        let pos = Position::locate(offset, state.quantum, state.qset)?;
        let Some(block) = state.data.block(pos) else {
            log::debug!("{}: read at {offset} hits a hole", self.name);
            return Ok(0);
        };

        let to_end = usize::try_from(state.size - offset).unwrap_or(usize::MAX);
        let count = buf.len().min(to_end).min(state.quantum - pos.offset);
        buf[..count].copy_from_slice(&block[pos.offset..pos.offset + count]);
        Ok(count)
    }

    /// Write up to `data.len()` bytes at `offset`
    ///
    /// Allocates the block under `offset` on demand and stops at its end.
    /// Writing past the current size is legal and leaves a hole behind.
    ///
    /// # Errors
    /// `OutOfMemory` if allocation fails (the device is left unchanged),
    /// `InvalidArgument` if `offset + len` overflows.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        let (quantum, qset) = (state.quantum, state.qset);

        let pos = Position::locate(offset, quantum, qset)?;
        let count = data.len().min(quantum - pos.offset);
        let end = offset
            .checked_add(count as u64)
            .ok_or_else(|| DevError::invalid("write end overflows"))?;

        let block = state.data.block_mut(pos, quantum, qset).inspect_err(|e| {
            log::warn!("{}: write at {offset} failed: {e}", self.name);
        })?;
        block[pos.offset..pos.offset + count].copy_from_slice(&data[..count]);

        if state.size < end {
            state.size = end;
        }
        Ok(count)
    }

    /// Free all storage and pick up the current global quantum and qset
    ///
    /// Idempotent; safe on an empty device.
    pub fn trim(&self) {
        let current = self.tunables.snapshot();
        let mut state = self.state.lock();
        state.data.clear();
        state.size = 0;
        state.quantum = current.quantum;
        state.qset = current.qset;
    }

    /// Open the device without any access control
    ///
    /// A write-only open trims the device first.
    #[must_use]
    pub fn open(self: &Arc<Self>, flags: OpenFlags) -> DeviceFile {
        if flags.is_write_only() {
            self.trim();
        }
        DeviceFile::new(Arc::clone(self), flags)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.geometry();
        write!(
            f,
            "Device(name={}, size={}, quantum={}, qset={}, blocks={})",
            self.name, g.size, g.quantum, g.qset, g.blocks
        )
    }
}
