//! # Decode Context
//!
//! One decoding session against one device. Owns every handle table, the per-slot
//! submission state and the codec chosen for the session's profile.
//!
//! Operations are split by concern across the pipeline modules:
//!
//! | Module       | Operations                                                      |
//! |--------------|-----------------------------------------------------------------|
//! | `buffer.rs`  | create/map/unmap/destroy buffers, element count, info           |
//! | `surface.rs` | create/destroy surfaces, status, sync                           |
//! | `picture.rs` | begin/render/end picture                                        |
//! | `image.rs`   | create/destroy/derive images, formats                           |

use crate::buffer::Buffer;
use crate::codec::Codec;
use crate::config::DriverConfig;
use crate::device::{DecodeDevice, JobHandle, LoopbackDevice, SharedRegion, SlotRegion};
use crate::error::{DriverError, Result};
use crate::handle::{HandleTable, SurfaceId};
use crate::image::Image;
use crate::surface::{Surface, SurfaceStatus};
use crate::va::Profile;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

// ============================================================================
// Input slots
// ============================================================================

/// Submission state of one bitstream (input) slot.
#[derive(Debug)]
pub(crate) struct InputSlot {
    /// Allocated on the slot's first submission, reused afterwards
    pub job: Option<JobHandle>,
    /// Bytes of slice data accumulated for the next submission
    pub running_offset: usize,
    /// Shared region, alive while any slice buffer holds it
    pub region: Weak<Mutex<SharedRegion>>,
    /// Last surface that took this slot
    pub owner: Option<SurfaceId>,
}

impl InputSlot {
    fn new() -> Self {
        Self {
            job: None,
            running_offset: 0,
            region: Weak::new(),
            owner: None,
        }
    }
}

// ============================================================================
// Context
// ============================================================================

pub struct DecodeContext<D: DecodeDevice> {
    pub(crate) config: DriverConfig,
    pub(crate) device: D,
    pub(crate) profile: Profile,
    pub(crate) codec: Codec,

    pub(crate) buffers: HandleTable<Buffer>,
    pub(crate) surfaces: HandleTable<Surface>,
    pub(crate) images: HandleTable<Image>,

    pub(crate) slots: Vec<InputSlot>,
    /// Pictures begun so far; picks the next input slot
    pub(crate) submission_counter: usize,
    /// Surface between begin_picture and end_picture
    pub(crate) render_target: Option<SurfaceId>,
    pub(crate) next_output_slot: usize,
    /// Orders submitted surfaces for completion matching
    pub(crate) next_sequence: u64,
    /// Output slots still queued on the device after a rolled-back submission
    pub(crate) stranded_outputs: Vec<usize>,
}

impl<D: DecodeDevice> DecodeContext<D> {
    pub fn new(config: DriverConfig, device: D, profile: Profile) -> Result<Self> {
        config.validate()?;
        let codec = Codec::for_profile(profile);

        tracing::info!(
            "Decode context: {:?} via {:?}, {} input / {} output slots",
            profile,
            codec,
            config.input_slots,
            config.output_slots
        );

        Ok(Self {
            slots: (0..config.input_slots).map(|_| InputSlot::new()).collect(),
            config,
            device,
            profile,
            codec,
            buffers: HandleTable::new(),
            surfaces: HandleTable::new(),
            images: HandleTable::new(),
            submission_counter: 0,
            render_target: None,
            next_output_slot: 0,
            next_sequence: 0,
            stranded_outputs: Vec::new(),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Surface currently being assembled, if any.
    pub fn render_target(&self) -> Option<SurfaceId> {
        self.render_target
    }

    /// Bytes of slice data waiting in an input slot.
    pub fn slot_offset(&self, slot: usize) -> Option<usize> {
        self.slots.get(slot).map(|s| s.running_offset)
    }

    /// Slot that slice data goes to right now: the render target's while a picture is
    /// being assembled, otherwise the one the next picture will take.
    pub(crate) fn current_input_slot(&self) -> usize {
        self.render_target
            .and_then(|id| self.surfaces.get(id.0))
            .and_then(|surface| surface.input_slot)
            .unwrap_or(self.submission_counter % self.slots.len())
    }

    /// Shared region of an input slot, mapping it again if nothing holds it.
    pub(crate) fn slot_region(&mut self, slot: usize) -> Result<SlotRegion> {
        if let Some(region) = self.slots[slot].region.upgrade() {
            return Ok(region);
        }
        let region = self
            .device
            .map_bitstream_slot(slot)
            .map_err(|e| DriverError::AllocationFailed(format!("input slot {}: {}", slot, e)))?;
        tracing::debug!("Mapped input slot {} ({} bytes)", slot, region.lock().len());
        self.slots[slot].region = Arc::downgrade(&region);
        Ok(region)
    }

    /// Block until no job is in flight on `slot`.
    pub(crate) fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let Some(owner) = self.slots[slot].owner else {
            return Ok(());
        };
        let in_flight = self
            .surfaces
            .get(owner.0)
            .is_some_and(|s| s.status == SurfaceStatus::Submitted);
        if !in_flight {
            return Ok(());
        }

        tracing::debug!("Input slot {} busy with surface {}, waiting", slot, owner);
        match self.wait_surface(owner, self.config.sync_timeout()) {
            // The slot is free either way.
            Err(DriverError::DecodeFailed(id)) => {
                tracing::warn!("Surface {} failed to decode while waiting for slot {}", id, slot);
                Ok(())
            }
            other => other,
        }
    }
}

impl DecodeContext<LoopbackDevice> {
    /// Context over an in-memory device sized from `config`.
    pub fn loopback(config: DriverConfig, profile: Profile) -> Result<Self> {
        let device = LoopbackDevice::new(&config);
        Self::new(config, device, profile)
    }
}
