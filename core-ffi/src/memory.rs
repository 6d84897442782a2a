//! Linear memory shared between the core and the host.
//!
//! Regions are identified by a [`Handle`]. A handle is valid from
//! allocation until the region is freed, and handle values are never
//! reused, so freeing or reading a stale handle is always detected.

use bytes::Bytes;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::error::{FfiError, Result};

/// Opaque reference to an allocated region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    offset: usize,
    length: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    bytes: Vec<u8>,
    regions: HashMap<Handle, Region>,
    /// Freed spans available for reuse, keyed by offset. Adjacent spans are
    /// always merged, so no two entries touch.
    free: BTreeMap<usize, usize>,
    next_handle: u32,
}

impl MemoryState {
    fn region(&self, handle: Handle) -> Result<Region> {
        self.regions
            .get(&handle)
            .copied()
            .ok_or(FfiError::InvalidHandle(handle))
    }

    fn check_range(&self, offset: usize, length: usize) -> Result<()> {
        let size = self.bytes.len();
        match offset.checked_add(length) {
            Some(end) if end <= size => Ok(()),
            _ => Err(FfiError::OutOfBounds {
                offset,
                length,
                size,
            }),
        }
    }

    fn reserve(&mut self, length: usize) -> Region {
        // First fit by offset; the remainder of a larger span stays free.
        let fit = self
            .free
            .iter()
            .find(|&(_, &span)| span >= length)
            .map(|(&offset, &span)| (offset, span));
        if let Some((offset, span)) = fit {
            self.free.remove(&offset);
            if span > length {
                self.free.insert(offset + length, span - length);
            }
            return Region { offset, length };
        }

        // A free span at the end of the arena only needs topping up.
        let end = self.bytes.len();
        let offset = match self.free.last_key_value() {
            Some((&offset, &span)) if offset + span == end => {
                self.free.remove(&offset);
                offset
            }
            _ => end,
        };
        self.bytes.resize(offset + length, 0);
        Region { offset, length }
    }

    fn release(&mut self, region: Region) {
        if region.length == 0 {
            return;
        }
        let mut offset = region.offset;
        let mut length = region.length;

        let before = self
            .free
            .range(..offset)
            .next_back()
            .map(|(&start, &span)| (start, span));
        if let Some((start, span)) = before {
            if start + span == offset {
                self.free.remove(&start);
                offset = start;
                length += span;
            }
        }
        if let Some(span) = self.free.remove(&(offset + length)) {
            length += span;
        }
        self.free.insert(offset, length);
    }
}

/// Handle to the shared arena. Clones refer to the same memory.
#[derive(Debug, Clone, Default)]
pub struct SharedMemory {
    state: Rc<RefCell<MemoryState>>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed region of `length` bytes.
    pub fn allocate(&self, length: usize) -> Handle {
        let mut state = self.state.borrow_mut();
        let region = state.reserve(length);
        state.bytes[region.offset..region.offset + region.length].fill(0);

        let handle = Handle(state.next_handle);
        state.next_handle = state.next_handle.wrapping_add(1);
        state.regions.insert(handle, region);
        handle
    }

    /// Allocate a region holding a copy of `data`.
    pub fn allocate_bytes(&self, data: &[u8]) -> Handle {
        let handle = self.allocate(data.len());
        let mut state = self.state.borrow_mut();
        if let Some(region) = state.regions.get(&handle).copied() {
            state.bytes[region.offset..region.offset + region.length].copy_from_slice(data);
        }
        handle
    }

    pub fn offset(&self, handle: Handle) -> Result<usize> {
        Ok(self.state.borrow().region(handle)?.offset)
    }

    pub fn length(&self, handle: Handle) -> Result<usize> {
        Ok(self.state.borrow().region(handle)?.length)
    }

    /// Copy `length` bytes starting at `offset` out of shared memory.
    ///
    /// The copy is owned by the caller and stays valid after the region
    /// behind it is freed or reused.
    pub fn read(&self, offset: usize, length: usize) -> Result<Bytes> {
        let state = self.state.borrow();
        state.check_range(offset, length)?;
        Ok(Bytes::copy_from_slice(&state.bytes[offset..offset + length]))
    }

    /// Overwrite bytes in place. Used by the core side to fill regions it
    /// allocated.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_range(offset, data.len())?;
        state.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy a region's contents out and free it.
    pub fn take(&self, handle: Handle) -> Result<Bytes> {
        let mut state = self.state.borrow_mut();
        let region = state.region(handle)?;
        let data = Bytes::copy_from_slice(&state.bytes[region.offset..region.offset + region.length]);
        state.regions.remove(&handle);
        state.release(region);
        Ok(data)
    }

    pub fn free(&self, handle: Handle) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let region = state.regions.remove(&handle).ok_or(FfiError::InvalidHandle(handle))?;
        state.release(region);
        Ok(())
    }

    /// Number of regions currently allocated.
    pub fn live_regions(&self) -> usize {
        self.state.borrow().regions.len()
    }

    /// Total size of the arena in bytes.
    pub fn size(&self) -> usize {
        self.state.borrow().bytes.len()
    }
}
