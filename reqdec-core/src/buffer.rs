// BUFFER - Typed buffer store
//
// Slice data is written straight into the device-visible bitstream region of the
// current input slot: each SliceData buffer is a window at the slot's running offset,
// so consecutive slices land back to back. Every other kind owns a heap block.

use crate::context::DecodeContext;
use crate::device::{DecodeDevice, SlotRegion};
use crate::error::{DriverError, Result};
use crate::handle::BufferId;
use crate::va::BufferKind;
use parking_lot::{MappedMutexGuard, MutexGuard};
use serde::Serialize;
use std::ops::{Deref, DerefMut};

// ============================================================================
// Buffer
// ============================================================================

#[derive(Debug)]
pub(crate) enum Storage {
    Heap(Vec<u8>),
    /// `[offset, offset + len)` of an input slot's shared region
    Window { region: SlotRegion, offset: usize },
}

#[derive(Debug)]
pub struct Buffer {
    pub kind: BufferKind,
    pub element_size: usize,
    pub element_count: usize,
    /// Count at creation; the element count can only shrink below it
    pub max_elements: usize,
    pub(crate) storage: Storage,
}

impl Buffer {
    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.element_size * self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over the buffer's current contents.
    pub(crate) fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let len = self.len();
        match &self.storage {
            Storage::Heap(data) => f(&data[..len]),
            Storage::Window { region, offset } => {
                let region = region.lock();
                f(&region.as_slice()[*offset..*offset + len])
            }
        }
    }

    pub(crate) fn mapping(&mut self) -> BufferMapping<'_> {
        let len = self.len();
        match &mut self.storage {
            Storage::Heap(data) => BufferMapping::Heap(&mut data[..len]),
            Storage::Window { region, offset } => {
                let offset = *offset;
                let guard = MutexGuard::map(region.lock(), |r| &mut r.as_mut_slice()[offset..offset + len]);
                BufferMapping::Window(guard)
            }
        }
    }
}

/// Writable view of a buffer's storage. Window mappings hold the slot region's lock.
pub enum BufferMapping<'a> {
    Heap(&'a mut [u8]),
    Window(MappedMutexGuard<'a, [u8]>),
}

impl Deref for BufferMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Heap(data) => data,
            Self::Window(guard) => guard,
        }
    }
}

impl DerefMut for BufferMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Heap(data) => data,
            Self::Window(guard) => guard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferInfo {
    pub kind: BufferKind,
    pub element_size: usize,
    pub element_count: usize,
}

// ============================================================================
// Operations
// ============================================================================

impl<D: DecodeDevice> DecodeContext<D> {
    /// Create a buffer of `element_count` elements of `element_size` bytes, optionally
    /// filled from `data`.
    ///
    /// SliceData buffers wait for any job still running on the current input slot.
    pub fn create_buffer(
        &mut self,
        kind: BufferKind,
        element_size: usize,
        element_count: usize,
        data: Option<&[u8]>,
    ) -> Result<BufferId> {
        let len = element_size.checked_mul(element_count).ok_or_else(|| {
            DriverError::InvalidArgument(format!("{} x {} bytes overflows", element_count, element_size))
        })?;
        if let Some(data) = data {
            if data.len() < len {
                return Err(DriverError::InvalidArgument(format!(
                    "initial data holds {} bytes, buffer needs {}",
                    data.len(),
                    len
                )));
            }
        }

        let storage = match kind {
            BufferKind::SliceData => self.slice_window(len, data)?,
            _ => {
                let mut block = Vec::new();
                block
                    .try_reserve_exact(len)
                    .map_err(|e| DriverError::AllocationFailed(format!("{} bytes: {}", len, e)))?;
                match data {
                    Some(data) => block.extend_from_slice(&data[..len]),
                    None => block.resize(len, 0),
                }
                Storage::Heap(block)
            }
        };

        let id = BufferId(self.buffers.insert(Buffer {
            kind,
            element_size,
            element_count,
            max_elements: element_count,
            storage,
        }));
        tracing::debug!("Buffer {}: {:?}, {} bytes", id, kind, len);
        Ok(id)
    }

    /// Carve `len` bytes at the running offset of the current input slot.
    fn slice_window(&mut self, len: usize, data: Option<&[u8]>) -> Result<Storage> {
        let slot = self.current_input_slot();
        self.wait_for_slot(slot)?;
        let region = self.slot_region(slot)?;

        let offset = self.slots[slot].running_offset;
        let end = {
            let mut shared = region.lock();
            let capacity = shared.len();
            let end = offset.checked_add(len).filter(|end| *end <= capacity).ok_or_else(|| {
                DriverError::AllocationFailed(format!(
                    "input slot {} full: {} + {} bytes exceeds {}",
                    slot, offset, len, capacity
                ))
            })?;
            if let Some(data) = data {
                shared.as_mut_slice()[offset..end].copy_from_slice(&data[..len]);
            }
            end
        };
        self.slots[slot].running_offset = end;

        tracing::trace!("Slice data window {}..{} in input slot {}", offset, end, slot);
        Ok(Storage::Window { region, offset })
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut Buffer> {
        self.buffers.get_mut(id.0).ok_or(DriverError::InvalidBuffer(id.0))
    }

    pub fn buffer(&self, id: BufferId) -> Result<&Buffer> {
        self.buffers.get(id.0).ok_or(DriverError::InvalidBuffer(id.0))
    }

    pub fn buffer_set_num_elements(&mut self, id: BufferId, count: usize) -> Result<()> {
        let buffer = self.buffer_mut(id)?;
        if count > buffer.max_elements {
            return Err(DriverError::InvalidArgument(format!(
                "buffer {} holds at most {} elements, asked for {}",
                id, buffer.max_elements, count
            )));
        }
        buffer.element_count = count;
        Ok(())
    }

    /// Writable view of a buffer. Data is resident; nothing is copied.
    pub fn map_buffer(&mut self, id: BufferId) -> Result<BufferMapping<'_>> {
        Ok(self.buffer_mut(id)?.mapping())
    }

    /// Mapping is a plain borrow, so there is nothing to release.
    pub fn unmap_buffer(&mut self, id: BufferId) -> Result<()> {
        self.buffer(id).map(|_| ())
    }

    /// Free a buffer. A slot region goes away with the last window into it.
    pub fn destroy_buffer(&mut self, id: BufferId) -> Result<()> {
        let buffer = self.buffers.remove(id.0).ok_or(DriverError::InvalidBuffer(id.0))?;
        tracing::debug!("Destroyed buffer {} ({:?})", id, buffer.kind);
        Ok(())
    }

    pub fn buffer_info(&self, id: BufferId) -> Result<BufferInfo> {
        let buffer = self.buffer(id)?;
        Ok(BufferInfo {
            kind: buffer.kind,
            element_size: buffer.element_size,
            element_count: buffer.element_count,
        })
    }
}
