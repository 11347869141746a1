//! Segment arena: the sparse block map behind a device
//!
//! Segments live in a `Vec` addressed by index. Each one owns a slot table of
//! `qset` entries, allocated on the first write that touches the segment, and
//! each slot owns at most one `quantum`-sized block.

use crate::error::{DevError, Result};

type Block = Box<[u8]>;

#[derive(Default)]
pub(crate) struct Segment {
    slots: Option<Vec<Option<Block>>>,
}

impl Segment {
    fn block(&self, index: usize) -> Option<&[u8]> {
        self.slots.as_ref()?.get(index)?.as_deref()
    }

    fn allocated(&self) -> usize {
        self.slots
            .as_ref()
            .map_or(0, |slots| slots.iter().filter(|s| s.is_some()).count())
    }
}

/// Where a byte offset lands: segment index, slot index, offset in block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub segment: usize,
    pub block: usize,
    pub offset: usize,
}

impl Position {
    /// # Errors
    /// `InvalidArgument` if the segment index does not fit in `usize`.
    pub fn locate(offset: u64, quantum: usize, qset: usize) -> Result<Self> {
        let itemsize = (quantum as u64) * (qset as u64);
        let segment = usize::try_from(offset / itemsize)
            .map_err(|_| DevError::invalid("offset beyond addressable range"))?;
        // rest < quantum * qset, which fits in usize by Tunables::validate
        #[allow(clippy::cast_possible_truncation)]
        let rest = (offset % itemsize) as usize;
        Ok(Self {
            segment,
            block: rest / quantum,
            offset: rest % quantum,
        })
    }
}

#[derive(Default)]
pub(crate) struct SegmentList {
    segments: Vec<Segment>,
}

impl SegmentList {
    /// Block at `pos`, or `None` for a hole
    pub fn block(&self, pos: Position) -> Option<&[u8]> {
        self.segments.get(pos.segment)?.block(pos.block)
    }

    /// Block at `pos`, allocating the segment chain, slot table and block
    /// as needed.
    ///
    /// Every allocation is made before anything is linked in, so a failure
    /// leaves the list exactly as it was.
    ///
    /// # Errors
    /// `OutOfMemory` if any allocation fails.
    pub fn block_mut(&mut self, pos: Position, quantum: usize, qset: usize) -> Result<&mut [u8]> {
        let missing_segments = (pos.segment + 1).saturating_sub(self.segments.len());
        self.segments.try_reserve(missing_segments)?;

        let has_slots = self
            .segments
            .get(pos.segment)
            .is_some_and(|s| s.slots.is_some());
        let new_slots = if has_slots {
            None
        } else {
            let mut slots = Vec::new();
            slots.try_reserve_exact(qset)?;
            slots.resize_with(qset, || None);
            Some(slots)
        };

        let has_block = self.block(pos).is_some();
        let new_block = if has_block {
            None
        } else {
            let mut data = Vec::new();
            data.try_reserve_exact(quantum)?;
            data.resize(quantum, 0u8);
            Some(data.into_boxed_slice())
        };

        // Commit: nothing below allocates
        if missing_segments > 0 {
            self.segments.resize_with(pos.segment + 1, Segment::default);
        }
        let segment = &mut self.segments[pos.segment];
        let slots = segment.slots.get_or_insert_with(|| new_slots.unwrap_or_default());
        let slot = slots
            .get_mut(pos.block)
            .ok_or_else(|| DevError::invalid("block index outside the slot table"))?;
        if let Some(block) = new_block {
            *slot = Some(block);
        }
        slot.as_deref_mut()
            .ok_or_else(|| DevError::invalid("block vanished during allocation"))
    }

    /// Drop every segment and block
    pub fn clear(&mut self) {
        self.segments = Vec::new();
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn allocated_blocks(&self) -> usize {
        self.segments.iter().map(Segment::allocated).sum()
    }
}
