// PICTURE - Per-frame submission
//
// begin_picture   reserve an input slot for the surface, reset its descriptor
// render_picture  fold parameter buffers into the descriptor
// end_picture     finalize the descriptor and submit it as one job:
//                   controls -> decoded buffer -> bitstream buffer
//
// Each input slot carries one job in flight. A slot's job handle is allocated on its
// first submission and reused afterwards.

use crate::codec::{FrameDescriptor, HeaderTranslator, TranslationTarget};
use crate::context::DecodeContext;
use crate::device::{DecodeDevice, JobHandle, QueueKind};
use crate::error::{DriverError, Result};
use crate::handle::{BufferId, SurfaceId};
use crate::surface::SurfaceStatus;
use std::time::Duration;

impl<D: DecodeDevice> DecodeContext<D> {
    /// Start assembling a picture into `id`.
    ///
    /// Blocks while the surface, the surface holding the input slot it gets, or any
    /// surface sharing its output slot is still being decoded. A picture left
    /// unfinished on another surface is abandoned.
    pub fn begin_picture(&mut self, id: SurfaceId) -> Result<()> {
        let status = self.surface(id)?.status;
        if status == SurfaceStatus::Submitted {
            self.wait_tolerating_decode_error(id)?;
        }

        if let Some(previous) = self.render_target {
            tracing::warn!("Picture on surface {} never ended, dropping it", previous);
            self.abandon_picture(previous);
        }

        let slot = self.submission_counter % self.slots.len();
        self.submission_counter += 1;

        if let Some(owner) = self.slots[slot].owner.filter(|owner| *owner != id) {
            let busy = self
                .surfaces
                .get(owner.0)
                .is_some_and(|s| s.status == SurfaceStatus::Submitted);
            if busy {
                tracing::debug!("Input slot {} still decoding surface {}, waiting", slot, owner);
                self.wait_tolerating_decode_error(owner)?;
            }
        }
        self.wait_for_output_slot(id)?;

        let descriptor = self.codec.empty_descriptor();
        let surface = self.surfaces.get_mut(id.0).ok_or(DriverError::InvalidSurface(id.0))?;
        surface.status = SurfaceStatus::Assembling;
        surface.input_slot = Some(slot);
        surface.descriptor = descriptor;
        surface.input_done = false;
        surface.output_done = false;
        surface.failed = false;

        self.slots[slot].owner = Some(id);
        self.render_target = Some(id);
        tracing::debug!("Begin picture: surface {} on input slot {}", id, slot);
        Ok(())
    }

    /// Translate `buffers` into the picture being assembled.
    ///
    /// Every id is checked before any of them is applied.
    pub fn render_picture(&mut self, buffers: &[BufferId]) -> Result<()> {
        let target = self.render_target.ok_or(DriverError::NoRenderTarget)?;

        for id in buffers {
            self.buffer(*id)?;
        }

        let surface = self.surface(target)?;
        let own_slot = surface.output_slot;
        let mut descriptor = surface.descriptor;

        let surfaces = &self.surfaces;
        let reference_slot = |raw: u32| surfaces.get(raw).map(|s| s.output_slot);
        let translation = TranslationTarget {
            own_slot,
            reference_slot: &reference_slot,
        };

        for id in buffers {
            let buffer = self.buffer(*id)?;
            let kind = buffer.kind;
            buffer.with_bytes(|data| self.codec.translate(&mut descriptor, kind, data, &translation))?;
        }

        let surface = self.surfaces.get_mut(target.0).ok_or(DriverError::InvalidSurface(target.0))?;
        surface.descriptor = descriptor;
        Ok(())
    }

    /// Submit the picture being assembled.
    ///
    /// On failure the surface is marked Skipped and the slot's accumulated slice data
    /// is dropped. Either way the context is ready for the next begin_picture.
    pub fn end_picture(&mut self) -> Result<()> {
        let id = self.render_target.ok_or(DriverError::NoRenderTarget)?;
        let surface = self.surface(id)?;
        let output_slot = surface.output_slot;
        let slot = surface.input_slot.ok_or(DriverError::NoRenderTarget)?;
        let mut descriptor = surface.descriptor;

        let job = match self.slots[slot].job {
            Some(job) => job,
            None => match self.device.new_job() {
                Ok(job) => {
                    tracing::debug!("Allocated job {:?} for input slot {}", job, slot);
                    self.slots[slot].job = Some(job);
                    job
                }
                Err(e) => {
                    self.abandon_picture(id);
                    return Err(DriverError::SubmissionFailed(e));
                }
            },
        };

        let bytes = self.slots[slot].running_offset;
        descriptor.finalize(bytes);

        let result = self.submit(job, &descriptor, output_slot, slot, bytes);

        self.slots[slot].running_offset = 0;
        self.render_target = None;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let surface = self.surfaces.get_mut(id.0).ok_or(DriverError::InvalidSurface(id.0))?;
        surface.descriptor = descriptor;

        match result {
            Ok(()) => {
                surface.status = SurfaceStatus::Submitted;
                surface.sequence = sequence;
                tracing::debug!(
                    "Submitted surface {}: {} bytes from input slot {} into output slot {}",
                    id,
                    bytes,
                    slot,
                    output_slot
                );
                Ok(())
            }
            Err(e) => {
                surface.status = SurfaceStatus::Skipped;
                self.slots[slot].owner = None;
                tracing::warn!("Submission of surface {} failed: {}", id, e);
                Err(e)
            }
        }
    }

    fn submit(
        &mut self,
        job: JobHandle,
        descriptor: &FrameDescriptor,
        output_slot: usize,
        input_slot: usize,
        bytes: usize,
    ) -> Result<()> {
        self.device
            .set_controls(job, &descriptor.control())
            .map_err(DriverError::ControlApplyFailed)?;

        if let Some(pos) = self.stranded_outputs.iter().position(|slot| *slot == output_slot) {
            // Still queued from a rolled-back submission
            self.stranded_outputs.swap_remove(pos);
            tracing::debug!("Output slot {} already queued, reusing it", output_slot);
        } else {
            self.device
                .enqueue(QueueKind::Decoded, output_slot, job, 0)
                .map_err(|source| DriverError::EnqueueFailed {
                    queue: QueueKind::Decoded,
                    source,
                })?;
        }

        if let Err(source) = self.device.enqueue(QueueKind::Bitstream, input_slot, job, bytes) {
            self.reclaim_output_slot(output_slot);
            return Err(DriverError::EnqueueFailed {
                queue: QueueKind::Bitstream,
                source,
            });
        }
        Ok(())
    }

    /// Take a queued decoded buffer back after its bitstream failed to queue.
    ///
    /// Buffers that finished ahead of it belong to other submitted surfaces and are
    /// credited to them. If the slot does not come back it is remembered as still
    /// queued, and the next submission into it skips the decoded enqueue.
    fn reclaim_output_slot(&mut self, output_slot: usize) {
        loop {
            match self.device.dequeue(QueueKind::Decoded, Some(Duration::ZERO)) {
                Ok(completion) if completion.index == output_slot => return,
                Ok(completion) => {
                    self.record_completion(QueueKind::Decoded, completion.index, completion.failed);
                }
                Err(e) => {
                    tracing::warn!("Could not reclaim output slot {}: {}", output_slot, e);
                    self.stranded_outputs.push(output_slot);
                    return;
                }
            }
        }
    }

    /// Wait out every other submitted surface decoding into `id`'s output slot.
    fn wait_for_output_slot(&mut self, id: SurfaceId) -> Result<()> {
        let output_slot = self.surface(id)?.output_slot;
        loop {
            let holder = self
                .surfaces
                .iter()
                .filter(|(raw, s)| *raw != id.0 && s.output_slot == output_slot)
                .filter(|(_, s)| s.status == SurfaceStatus::Submitted)
                .min_by_key(|(_, s)| s.sequence)
                .map(|(raw, _)| SurfaceId(raw));

            let Some(holder) = holder else {
                return Ok(());
            };
            tracing::debug!("Output slot {} still decoding surface {}, waiting", output_slot, holder);
            self.wait_tolerating_decode_error(holder)?;
        }
    }

    /// Drop an unsubmitted picture: Skipped, slice data discarded, slot released.
    pub(crate) fn abandon_picture(&mut self, id: SurfaceId) {
        if self.render_target == Some(id) {
            self.render_target = None;
        }
        let Some(surface) = self.surfaces.get_mut(id.0) else {
            return;
        };
        if surface.status != SurfaceStatus::Assembling {
            return;
        }
        surface.status = SurfaceStatus::Skipped;

        if let Some(slot) = surface.input_slot.and_then(|slot| self.slots.get_mut(slot)) {
            slot.running_offset = 0;
            if slot.owner == Some(id) {
                slot.owner = None;
            }
        }
    }

    fn wait_tolerating_decode_error(&mut self, id: SurfaceId) -> Result<()> {
        match self.wait_surface(id, self.config.sync_timeout()) {
            Err(DriverError::DecodeFailed(failed)) => {
                tracing::warn!("Surface {} failed to decode, reusing its slot", failed);
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::device::{DeviceEvent, LoopbackDevice};
    use crate::va::{BufferKind, PictureParameterBufferMpeg2, Profile, VA_INVALID_ID};

    fn context() -> DecodeContext<LoopbackDevice> {
        let config = DriverConfig {
            bitstream_buffer_size: 4096,
            coded_width: 64,
            coded_height: 64,
            ..Default::default()
        };
        DecodeContext::loopback(config, Profile::Mpeg2Main).unwrap()
    }

    fn picture_params(ctx: &mut DecodeContext<LoopbackDevice>, fwd: u32, bwd: u32) -> BufferId {
        let params = PictureParameterBufferMpeg2 {
            horizontal_size: 64,
            vertical_size: 64,
            forward_reference_picture: fwd,
            backward_reference_picture: bwd,
            picture_coding_type: 2,
            f_code: 0x1234,
            picture_coding_extension: 0b11 << 2,
            va_reserved: [0; 4],
        };
        ctx.create_buffer(BufferKind::PictureParameters, 40, 1, Some(bytemuck::bytes_of(&params)))
            .unwrap()
    }

    fn decode(ctx: &mut DecodeContext<LoopbackDevice>, surface: SurfaceId, slice: &[u8]) {
        let data = ctx.create_buffer(BufferKind::SliceData, slice.len(), 1, Some(slice)).unwrap();
        let params = picture_params(ctx, VA_INVALID_ID, VA_INVALID_ID);
        ctx.begin_picture(surface).unwrap();
        ctx.render_picture(&[params, data]).unwrap();
        ctx.end_picture().unwrap();
    }

    fn header(ctx: &DecodeContext<LoopbackDevice>, id: SurfaceId) -> crate::mpeg2::Mpeg2FrameHeader {
        let FrameDescriptor::Mpeg2(header) = ctx.surface(id).unwrap().descriptor;
        header
    }

    #[test]
    fn test_submission_order() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 2).unwrap()[1];
        decode(&mut ctx, id, &[0xAB; 300]);

        let events: Vec<_> = ctx
            .device()
            .events()
            .iter()
            .filter(|e| !matches!(e, DeviceEvent::MapSlot { .. }))
            .cloned()
            .collect();
        let job = crate::device::JobHandle(100);
        assert!(matches!(events[0], DeviceEvent::NewJob { job: j } if j == job));
        assert!(matches!(events[1], DeviceEvent::SetControls { job: j, .. } if j == job));
        assert_eq!(
            events[2],
            DeviceEvent::Enqueue { queue: QueueKind::Decoded, index: 1, job, bytes_used: 0 }
        );
        assert_eq!(
            events[3],
            DeviceEvent::Enqueue { queue: QueueKind::Bitstream, index: 0, job, bytes_used: 300 }
        );
        assert_eq!(ctx.device().submitted_bitstreams()[0], vec![0xAB; 300]);
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Submitted);
    }

    #[test]
    fn test_descriptor_complete_after_end() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        decode(&mut ctx, id, &[0u8; 300]);

        let header = header(&ctx, id);
        assert_eq!(header.slice_len, 2400);
        assert_eq!(header.slice_pos, 0);
        assert_eq!((header.width, header.height), (64, 64));
        assert_eq!(header.picture_coding_type, 2);
        assert_eq!(header.f_code, [[1, 2], [3, 4]]);
        assert_eq!(header.picture_structure, 3);

        let (control, payload) = ctx.device().last_controls().unwrap();
        assert_eq!(control, crate::mpeg2::V4L2_CID_MPEG_VIDEO_MPEG2_FRAME_HDR);
        assert_eq!(payload, header.as_bytes());
    }

    #[test]
    fn test_offsets_reset_only_after_end() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];

        ctx.create_buffer(BufferKind::SliceData, 100, 1, None).unwrap();
        ctx.begin_picture(id).unwrap();
        ctx.create_buffer(BufferKind::SliceData, 100, 1, None).unwrap();
        assert_eq!(ctx.slot_offset(0), Some(200));

        ctx.end_picture().unwrap();
        assert_eq!(ctx.slot_offset(0), Some(0));
        assert_eq!(header(&ctx, id).slice_len, 1600);
    }

    #[test]
    fn test_slots_rotate_and_jobs_are_reused() {
        let mut ctx = context();
        let ids = ctx.create_surfaces(64, 64, 3).unwrap();
        for id in &ids {
            decode(&mut ctx, *id, &[1u8; 10]);
            ctx.sync_surface(*id).unwrap();
        }

        let slots: Vec<_> = ids.iter().map(|id| ctx.surface(*id).unwrap().input_slot).collect();
        assert_eq!(slots, vec![Some(0), Some(1), Some(0)]);

        let new_jobs = ctx
            .device()
            .events()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::NewJob { .. }))
            .count();
        assert_eq!(new_jobs, 2);
    }

    #[test]
    fn test_slot_exclusivity() {
        let mut ctx = context();
        let ids = ctx.create_surfaces(64, 64, 3).unwrap();
        decode(&mut ctx, ids[0], &[1u8; 10]);
        decode(&mut ctx, ids[1], &[2u8; 10]);
        assert_eq!(ctx.query_surface_status(ids[0]).unwrap(), SurfaceStatus::Submitted);

        // Third picture wraps onto slot 0 and must wait out surface 0.
        ctx.begin_picture(ids[2]).unwrap();
        assert_eq!(ctx.query_surface_status(ids[0]).unwrap(), SurfaceStatus::Ready);
        assert_eq!(ctx.query_surface_status(ids[1]).unwrap(), SurfaceStatus::Submitted);
        assert_eq!(ctx.query_surface_status(ids[2]).unwrap(), SurfaceStatus::Assembling);
    }

    #[test]
    fn test_slice_data_waits_for_slot() {
        let mut ctx = context();
        let ids = ctx.create_surfaces(64, 64, 2).unwrap();
        decode(&mut ctx, ids[0], &[1u8; 10]);
        decode(&mut ctx, ids[1], &[2u8; 10]);

        // Next slice data goes to slot 0, still busy with surface 0.
        ctx.create_buffer(BufferKind::SliceData, 10, 1, None).unwrap();
        assert_eq!(ctx.query_surface_status(ids[0]).unwrap(), SurfaceStatus::Ready);
    }

    #[test]
    fn test_reference_resolution() {
        let mut ctx = context();
        let ids = ctx.create_surfaces(64, 64, 2).unwrap();
        decode(&mut ctx, ids[0], &[1u8; 10]);
        ctx.sync_surface(ids[0]).unwrap();

        let data = ctx.create_buffer(BufferKind::SliceData, 10, 1, None).unwrap();
        let params = picture_params(&mut ctx, ids[0].0, 0);
        ctx.begin_picture(ids[1]).unwrap();
        ctx.render_picture(&[params, data]).unwrap();

        let header = header(&ctx, ids[1]);
        assert_eq!(header.forward_index, 0);
        assert_eq!(header.backward_index, 1);
    }

    #[test]
    fn test_render_resolves_all_ids_first() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        let params = picture_params(&mut ctx, 0, 0);
        ctx.begin_picture(id).unwrap();

        let before = ctx.surface(id).unwrap().descriptor;
        let err = ctx.render_picture(&[params, BufferId(99)]).unwrap_err();
        assert!(matches!(err, DriverError::InvalidBuffer(99)));
        assert_eq!(ctx.surface(id).unwrap().descriptor, before);
    }

    #[test]
    fn test_short_picture_parameters() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        let short = ctx.create_buffer(BufferKind::PictureParameters, 16, 1, None).unwrap();
        ctx.begin_picture(id).unwrap();
        assert!(matches!(
            ctx.render_picture(&[short]),
            Err(DriverError::InvalidArgument(_))
        ));
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Assembling);
    }

    #[test]
    fn test_no_render_target() {
        let mut ctx = context();
        assert!(matches!(ctx.render_picture(&[]), Err(DriverError::NoRenderTarget)));
        assert!(matches!(ctx.end_picture(), Err(DriverError::NoRenderTarget)));
    }

    #[test]
    fn test_bitstream_enqueue_failure_rolls_back() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.create_buffer(BufferKind::SliceData, 10, 1, None).unwrap();
        ctx.begin_picture(id).unwrap();
        ctx.device_mut().fail_enqueue_on(Some(QueueKind::Bitstream));

        let err = ctx.end_picture().unwrap_err();
        assert!(matches!(err, DriverError::EnqueueFailed { queue: QueueKind::Bitstream, .. }));
        assert_eq!(ctx.device().pending(QueueKind::Decoded), 0);
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Skipped);
        assert_eq!(ctx.slot_offset(0), Some(0));
        assert_eq!(ctx.render_target(), None);
    }

    #[test]
    fn test_rollback_credits_other_surfaces() {
        let mut ctx = context();
        let ids = ctx.create_surfaces(64, 64, 2).unwrap();
        decode(&mut ctx, ids[0], &[1u8; 10]);

        ctx.create_buffer(BufferKind::SliceData, 10, 1, None).unwrap();
        ctx.begin_picture(ids[1]).unwrap();
        ctx.device_mut().fail_enqueue_on(Some(QueueKind::Bitstream));
        assert!(ctx.end_picture().is_err());
        assert_eq!(ctx.query_surface_status(ids[1]).unwrap(), SurfaceStatus::Skipped);
        assert_eq!(ctx.device().pending(QueueKind::Decoded), 0);

        // Surface 0's decoded buffer came back during the rollback and was kept.
        ctx.device_mut().fail_enqueue_on(None);
        ctx.sync_surface(ids[0]).unwrap();
        assert_eq!(ctx.query_surface_status(ids[0]).unwrap(), SurfaceStatus::Ready);
    }

    #[test]
    fn test_unreclaimed_output_slot_not_queued_twice() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.begin_picture(id).unwrap();
        ctx.device_mut().stall(true);
        ctx.device_mut().fail_enqueue_on(Some(QueueKind::Bitstream));
        assert!(ctx.end_picture().is_err());
        assert_eq!(ctx.device().pending(QueueKind::Decoded), 1);

        ctx.device_mut().stall(false);
        ctx.device_mut().fail_enqueue_on(None);
        decode(&mut ctx, id, &[4u8; 8]);
        assert_eq!(ctx.device().pending(QueueKind::Decoded), 1);

        ctx.sync_surface(id).unwrap();
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Ready);
        let decoded_enqueues = ctx
            .device()
            .events()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Enqueue { queue: QueueKind::Decoded, .. }))
            .count();
        assert_eq!(decoded_enqueues, 1);
    }

    #[test]
    fn test_begin_waits_for_shared_output_slot() {
        let mut ctx = context();
        // Output slots 0, 1, 0
        let ids = ctx.create_surfaces(64, 64, 3).unwrap();
        decode(&mut ctx, ids[1], &[1u8; 10]);
        decode(&mut ctx, ids[2], &[2u8; 10]);

        ctx.begin_picture(ids[0]).unwrap();
        assert_eq!(ctx.query_surface_status(ids[1]).unwrap(), SurfaceStatus::Ready);
        assert_eq!(ctx.query_surface_status(ids[2]).unwrap(), SurfaceStatus::Ready);

        ctx.end_picture().unwrap();
        assert_eq!(ctx.device().pending(QueueKind::Decoded), 1);
    }

    #[test]
    fn test_decoded_enqueue_failure_skips_bitstream() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.begin_picture(id).unwrap();
        ctx.device_mut().fail_enqueue_on(Some(QueueKind::Decoded));

        let err = ctx.end_picture().unwrap_err();
        assert!(matches!(err, DriverError::EnqueueFailed { queue: QueueKind::Decoded, .. }));
        assert!(!ctx
            .device()
            .events()
            .iter()
            .any(|e| matches!(e, DeviceEvent::Enqueue { queue: QueueKind::Bitstream, .. })));
    }

    #[test]
    fn test_control_failure_marks_skipped() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.create_buffer(BufferKind::SliceData, 10, 1, None).unwrap();
        ctx.begin_picture(id).unwrap();
        ctx.device_mut().fail_controls(true);

        assert!(matches!(ctx.end_picture(), Err(DriverError::ControlApplyFailed(_))));
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Skipped);
        assert_eq!(ctx.device().pending(QueueKind::Decoded), 0);
        assert_eq!(ctx.slot_offset(0), Some(0));

        // The context recovers for the next picture.
        ctx.device_mut().fail_controls(false);
        decode(&mut ctx, id, &[3u8; 5]);
        ctx.sync_surface(id).unwrap();
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Ready);
    }

    #[test]
    fn test_job_allocation_failure() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.begin_picture(id).unwrap();
        ctx.device_mut().fail_new_job(true);

        assert!(matches!(ctx.end_picture(), Err(DriverError::SubmissionFailed(_))));
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Skipped);
        assert_eq!(ctx.render_target(), None);
    }

    #[test]
    fn test_abandoned_picture_is_skipped() {
        let mut ctx = context();
        let ids = ctx.create_surfaces(64, 64, 2).unwrap();
        ctx.begin_picture(ids[0]).unwrap();
        ctx.create_buffer(BufferKind::SliceData, 10, 1, None).unwrap();

        ctx.begin_picture(ids[1]).unwrap();
        assert_eq!(ctx.query_surface_status(ids[0]).unwrap(), SurfaceStatus::Skipped);
        assert_eq!(ctx.slot_offset(0), Some(0));
        assert_eq!(ctx.render_target(), Some(ids[1]));
    }

    #[test]
    fn test_decode_error_reported_on_sync() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.device_mut().fail_decode_of(Some(0));
        decode(&mut ctx, id, &[1u8; 10]);

        assert!(matches!(ctx.sync_surface(id), Err(DriverError::DecodeFailed(_))));
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Skipped);
        assert_eq!(ctx.device().pending(QueueKind::Bitstream), 0);
    }

    #[test]
    fn test_sync_timeout_leaves_submitted() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        decode(&mut ctx, id, &[1u8; 10]);
        ctx.device_mut().stall(true);

        let err = ctx.sync_surface_timeout(id, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, DriverError::Timeout(_)));
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Submitted);

        ctx.device_mut().stall(false);
        ctx.sync_surface(id).unwrap();
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Ready);
    }
}
