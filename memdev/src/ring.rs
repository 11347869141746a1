//! Fixed-capacity circular byte buffer
//!
//! `rp == wp` means empty. One slot is always left free, so a ring of
//! capacity `n` holds at most `n - 1` bytes. Neither copy wraps past the
//! physical end in one call; callers loop for the remainder.

use crate::config::MIN_PIPE_BUFFER;
use crate::error::{DevError, Result};

pub struct RingBuffer {
    buf: Box<[u8]>,
    rp: usize,
    wp: usize,
}

impl RingBuffer {
    /// # Errors
    /// `InvalidArgument` below the minimum capacity, `OutOfMemory` if the
    /// storage cannot be allocated.
    pub fn try_new(capacity: usize) -> Result<Self> {
        if capacity < MIN_PIPE_BUFFER {
            return Err(DevError::invalid(format!(
                "ring capacity {capacity} below {MIN_PIPE_BUFFER}"
            )));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        data.resize(capacity, 0u8);
        Ok(Self {
            buf: data.into_boxed_slice(),
            rp: 0,
            wp: 0,
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rp == self.wp
    }

    /// Bytes waiting to be read
    #[must_use]
    pub fn len(&self) -> usize {
        (self.wp + self.capacity() - self.rp) % self.capacity()
    }

    #[must_use]
    pub fn space_free(&self) -> usize {
        if self.rp == self.wp {
            return self.capacity() - 1;
        }
        (self.rp + self.capacity() - self.wp) % self.capacity() - 1
    }

    #[must_use]
    pub fn cursors(&self) -> (usize, usize) {
        (self.rp, self.wp)
    }

    /// Rewind both cursors to the start; buffered bytes are dropped
    pub fn reset(&mut self) {
        self.rp = 0;
        self.wp = 0;
    }

    /// Copy out the contiguous run starting at `rp`
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        if self.is_empty() {
            return 0;
        }
        let run = if self.wp > self.rp {
            self.wp - self.rp
        } else {
            self.capacity() - self.rp
        };
        let count = out.len().min(run);
        out[..count].copy_from_slice(&self.buf[self.rp..self.rp + count]);
        self.rp += count;
        if self.rp == self.capacity() {
            self.rp = 0;
        }
        count
    }

    /// Copy in as much as fits without wrapping
    pub fn write_from(&mut self, data: &[u8]) -> usize {
        let mut count = data.len().min(self.space_free());
        count = if self.wp >= self.rp {
            count.min(self.capacity() - self.wp)
        } else {
            count.min(self.rp - self.wp - 1)
        };
        self.buf[self.wp..self.wp + count].copy_from_slice(&data[..count]);
        self.wp += count;
        if self.wp == self.capacity() {
            self.wp = 0;
        }
        count
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RingBuffer(capacity={}, rp={}, wp={})",
            self.capacity(),
            self.rp,
            self.wp
        )
    }
}
