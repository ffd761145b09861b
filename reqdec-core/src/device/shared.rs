// Shared memory regions backing bitstream slots and decoded planes.

use crate::error::DeviceError;
use parking_lot::Mutex;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::Arc;

/// Handle to a slot's bitstream region, shared by every slice buffer carved from it.
pub type SlotRegion = Arc<Mutex<SharedRegion>>;

/// A block of memory the device can see: a kernel `mmap` or, for in-memory
/// devices, a plain heap allocation.
pub enum SharedRegion {
    Mapped { ptr: NonNull<u8>, len: usize },
    Heap(Vec<u8>),
}

// The mapping is owned exclusively by this value; access goes through &/&mut.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Map `len` bytes of a device buffer at `offset` read/write and shared.
    pub fn map_device(fd: RawFd, offset: u32, len: usize) -> Result<Self, DeviceError> {
        // SAFETY: fresh mapping, no aliasing with existing memory.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(DeviceError::last_os_error("mmap"));
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| DeviceError::last_os_error("mmap"))?;
        Ok(Self::Mapped { ptr, len })
    }

    pub fn heap(len: usize) -> Self {
        Self::Heap(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Mapped { len, .. } => *len,
            Self::Heap(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            // SAFETY: ptr/len describe a live mapping owned by self.
            Self::Mapped { ptr, len } => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *len) },
            Self::Heap(data) => data,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            // SAFETY: as above, and &mut self guarantees exclusivity.
            Self::Mapped { ptr, len } => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), *len) },
            Self::Heap(data) => data,
        }
    }

    pub fn into_slot(self) -> SlotRegion {
        Arc::new(Mutex::new(self))
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mapped { ptr, len } => write!(f, "SharedRegion::Mapped({:p}, {} bytes)", ptr, len),
            Self::Heap(data) => write!(f, "SharedRegion::Heap({} bytes)", data.len()),
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Self::Mapped { ptr, len } = self {
            // SAFETY: mapping created by map_device and not yet unmapped.
            let rc = unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, *len) };
            if rc != 0 {
                tracing::warn!("munmap of {} bytes failed: {}", len, std::io::Error::last_os_error());
            }
        }
    }
}
