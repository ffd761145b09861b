//! # Device Channel
//!
//! Everything the decode pipeline needs from a memory-to-memory decoder, behind one trait:
//!
//! - a shared bitstream region per input slot (`map_bitstream_slot`)
//! - job handles that group a frame header with its buffers (`new_job`, `set_controls`)
//! - two buffer queues: `Bitstream` in, `Decoded` out (`enqueue`, `dequeue`)
//! - read access to the decoded (tiled) planes of an output slot
//!
//! [`V4l2Device`] talks to a real kernel driver, [`LoopbackDevice`] completes jobs in memory.

mod loopback;
mod shared;
#[cfg(target_os = "linux")]
mod v4l2;

pub use loopback::{DeviceEvent, LoopbackDevice};
pub use shared::{SharedRegion, SlotRegion};
#[cfg(target_os = "linux")]
pub use v4l2::{DeviceSummary, V4l2Device};

use crate::error::DeviceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Types
// ============================================================================

/// The two queues of a memory-to-memory decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    /// Compressed slices going in (V4L2 OUTPUT)
    Bitstream,
    /// Decoded pictures coming out (V4L2 CAPTURE)
    Decoded,
}

/// Device handle for one schedulable job (a media request fd on V4L2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub i32);

/// One control applied to a job.
#[derive(Debug, Clone, Copy)]
pub struct ControlPayload<'a> {
    pub id: u32,
    pub data: &'a [u8],
}

/// A buffer handed back by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub index: usize,
    /// Device flagged the buffer as corrupt
    pub failed: bool,
}

/// Tiled planes of one decoded picture.
#[derive(Debug, Clone, Copy)]
pub struct DecodedPlanes<'a> {
    pub luma: &'a [u8],
    pub chroma: &'a [u8],
}

// ============================================================================
// Device trait
// ============================================================================

/// Control channel to a stateless decode engine.
///
/// All calls are synchronous. `dequeue` is the only one that blocks, for at most
/// `timeout` when one is given.
pub trait DecodeDevice {
    /// Map the shared bitstream buffer of an input slot.
    ///
    /// The device may keep its own reference to the region; the caller's mapping lives
    /// as long as any clone of the returned handle.
    fn map_bitstream_slot(&mut self, slot: usize) -> Result<SlotRegion, DeviceError>;

    /// Allocate a new job handle.
    fn new_job(&mut self) -> Result<JobHandle, DeviceError>;

    /// Atomically attach a control to a job. Replaces whatever the job carried before.
    fn set_controls(&mut self, job: JobHandle, control: &ControlPayload<'_>) -> Result<(), DeviceError>;

    /// Queue buffer `index` on `queue` as part of `job`.
    ///
    /// `bytes_used` is meaningful for the bitstream queue only.
    fn enqueue(
        &mut self,
        queue: QueueKind,
        index: usize,
        job: JobHandle,
        bytes_used: usize,
    ) -> Result<(), DeviceError>;

    /// Wait for the next finished buffer on `queue`.
    fn dequeue(&mut self, queue: QueueKind, timeout: Option<Duration>) -> Result<Completion, DeviceError>;

    /// Tiled luma/chroma of output slot `index`.
    fn decoded_planes(&self, index: usize) -> Result<DecodedPlanes<'_>, DeviceError>;
}
