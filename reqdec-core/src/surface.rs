// SURFACE - Decode targets and their lifecycle
//
//   Idle ──begin──► Assembling ──end──► Submitted ──sync──► Ready
//                        ▲                  │
//                        │                  └──(error)──► Skipped
//                        └───────begin (reuse)──────────────┘
//
// A submitted surface becomes Ready once the device has handed back both its decoded
// buffer and the bitstream buffer it was decoded from.

use crate::codec::{FrameDescriptor, HeaderTranslator};
use crate::context::DecodeContext;
use crate::device::{DecodeDevice, QueueKind};
use crate::error::{DeviceError, DriverError, Result};
use crate::handle::SurfaceId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceStatus {
    /// Created, never decoded into
    Idle,
    /// Between begin_picture and end_picture
    Assembling,
    /// Job queued on the device
    Submitted,
    /// Decoded picture available
    Ready,
    /// Submission or decode failed, or the picture was abandoned
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub status: SurfaceStatus,
    /// Bitstream slot taken at begin_picture
    pub input_slot: Option<usize>,
    /// Decoded-picture slot, fixed at creation
    pub output_slot: usize,
    pub descriptor: FrameDescriptor,

    pub(crate) sequence: u64,
    pub(crate) input_done: bool,
    pub(crate) output_done: bool,
    pub(crate) failed: bool,
}

impl Surface {
    fn is_complete(&self) -> bool {
        self.input_done && self.output_done
    }
}

impl<D: DecodeDevice> DecodeContext<D> {
    /// Create `count` surfaces. Output slots are handed out round-robin.
    pub fn create_surfaces(&mut self, width: u32, height: u32, count: usize) -> Result<Vec<SurfaceId>> {
        if width == 0 || height == 0 {
            return Err(DriverError::InvalidArgument(format!("surface size {}x{}", width, height)));
        }

        let ids = (0..count)
            .map(|_| {
                let output_slot = self.next_output_slot;
                self.next_output_slot = (self.next_output_slot + 1) % self.config.output_slots;
                let id = SurfaceId(self.surfaces.insert(Surface {
                    width,
                    height,
                    status: SurfaceStatus::Idle,
                    input_slot: None,
                    output_slot,
                    descriptor: self.codec.empty_descriptor(),
                    sequence: 0,
                    input_done: false,
                    output_done: false,
                    failed: false,
                }));
                tracing::debug!("Surface {} ({}x{}) on output slot {}", id, width, height, output_slot);
                id
            })
            .collect();
        Ok(ids)
    }

    /// Destroy a surface, waiting for its job first.
    pub fn destroy_surface(&mut self, id: SurfaceId) -> Result<()> {
        let status = self.surface(id)?.status;
        if status == SurfaceStatus::Submitted {
            match self.wait_surface(id, self.config.sync_timeout()) {
                Ok(()) | Err(DriverError::DecodeFailed(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if self.render_target == Some(id) {
            self.abandon_picture(id);
        }
        for slot in &mut self.slots {
            if slot.owner == Some(id) {
                slot.owner = None;
            }
        }
        self.surfaces.remove(id.0);
        tracing::debug!("Destroyed surface {}", id);
        Ok(())
    }

    pub fn surface(&self, id: SurfaceId) -> Result<&Surface> {
        self.surfaces.get(id.0).ok_or(DriverError::InvalidSurface(id.0))
    }

    /// Status without waiting.
    pub fn query_surface_status(&self, id: SurfaceId) -> Result<SurfaceStatus> {
        Ok(self.surface(id)?.status)
    }

    /// Block until the surface's job completes. Uses the configured timeout.
    pub fn sync_surface(&mut self, id: SurfaceId) -> Result<()> {
        self.wait_surface(id, self.config.sync_timeout())
    }

    /// Block for at most `timeout`. On expiry the surface stays Submitted.
    pub fn sync_surface_timeout(&mut self, id: SurfaceId, timeout: Duration) -> Result<()> {
        self.wait_surface(id, Some(timeout))
    }

    pub(crate) fn wait_surface(&mut self, id: SurfaceId, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let surface = self.surface(id)?;
            if surface.status != SurfaceStatus::Submitted {
                return Ok(());
            }

            let queue = if surface.output_done {
                QueueKind::Bitstream
            } else {
                QueueKind::Decoded
            };
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));

            let completion = match self.device.dequeue(queue, remaining) {
                Ok(completion) => completion,
                Err(DeviceError::Timeout(_)) => return Err(DriverError::Timeout(id.0)),
                Err(e) => return Err(e.into()),
            };

            if let Some(done) = self.record_completion(queue, completion.index, completion.failed) {
                if done == id {
                    let surface = self.surface(id)?;
                    if surface.failed {
                        return Err(DriverError::DecodeFailed(id.0));
                    }
                }
            }
        }
    }

    /// Credit a dequeued buffer to the oldest submitted surface using that slot.
    /// Returns the surface if this finished it.
    pub(crate) fn record_completion(&mut self, queue: QueueKind, index: usize, failed: bool) -> Option<SurfaceId> {
        let owner = self
            .surfaces
            .iter()
            .filter(|(_, s)| s.status == SurfaceStatus::Submitted)
            .filter(|(_, s)| match queue {
                QueueKind::Decoded => s.output_slot == index && !s.output_done,
                QueueKind::Bitstream => s.input_slot == Some(index) && !s.input_done,
            })
            .min_by_key(|(_, s)| s.sequence)
            .map(|(id, _)| id);

        let Some(raw) = owner else {
            if queue == QueueKind::Decoded && self.stranded_outputs.contains(&index) {
                self.stranded_outputs.retain(|slot| *slot != index);
                tracing::debug!("Output slot {} came back after a rolled-back submission", index);
            } else {
                tracing::warn!("Spurious {:?} completion for slot {}", queue, index);
            }
            return None;
        };
        let surface = self.surfaces.get_mut(raw)?;

        match queue {
            QueueKind::Decoded => surface.output_done = true,
            QueueKind::Bitstream => surface.input_done = true,
        }
        surface.failed |= failed;

        if !surface.is_complete() {
            return None;
        }
        if surface.failed {
            tracing::warn!("Device reported a decode error for surface {}", raw);
            surface.status = SurfaceStatus::Skipped;
        } else {
            surface.status = SurfaceStatus::Ready;
            tracing::debug!("Surface {} ready", raw);
        }
        Some(SurfaceId(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::va::Profile;

    fn context() -> DecodeContext<crate::device::LoopbackDevice> {
        let config = DriverConfig {
            coded_width: 64,
            coded_height: 64,
            ..Default::default()
        };
        DecodeContext::loopback(config, Profile::Mpeg2Main).unwrap()
    }

    #[test]
    fn test_output_slots_round_robin() {
        let mut ctx = context();
        let ids = ctx.create_surfaces(64, 64, 3).unwrap();
        let slots: Vec<_> = ids.iter().map(|id| ctx.surface(*id).unwrap().output_slot).collect();
        assert_eq!(slots, vec![0, 1, 0]);
        assert_eq!(ctx.query_surface_status(ids[0]).unwrap(), SurfaceStatus::Idle);
    }

    #[test]
    fn test_unknown_surface() {
        let mut ctx = context();
        assert!(matches!(ctx.sync_surface(SurfaceId(9)), Err(DriverError::InvalidSurface(9))));
        assert!(matches!(ctx.query_surface_status(SurfaceId(0)), Err(DriverError::InvalidSurface(0))));
        assert!(matches!(ctx.destroy_surface(SurfaceId(3)), Err(DriverError::InvalidSurface(3))));
    }

    #[test]
    fn test_sync_idle_surface_returns_immediately() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.sync_surface(id).unwrap();
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Idle);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut ctx = context();
        assert!(matches!(
            ctx.create_surfaces(0, 64, 1),
            Err(DriverError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_destroy_idle_surface() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.destroy_surface(id).unwrap();
        assert!(ctx.surface(id).is_err());
    }

    #[test]
    fn test_destroy_submitted_surface_waits() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.create_buffer(crate::va::BufferKind::SliceData, 10, 1, None).unwrap();
        ctx.begin_picture(id).unwrap();
        ctx.end_picture().unwrap();
        assert_eq!(ctx.query_surface_status(id).unwrap(), SurfaceStatus::Submitted);

        ctx.destroy_surface(id).unwrap();
        assert!(ctx.surface(id).is_err());
        assert_eq!(ctx.device().pending(QueueKind::Decoded), 0);
        assert_eq!(ctx.device().pending(QueueKind::Bitstream), 0);
        assert_eq!(ctx.slots[0].owner, None);
    }

    #[test]
    fn test_destroy_render_target_abandons_picture() {
        let mut ctx = context();
        let id = ctx.create_surfaces(64, 64, 1).unwrap()[0];
        ctx.begin_picture(id).unwrap();
        ctx.create_buffer(crate::va::BufferKind::SliceData, 10, 1, None).unwrap();
        assert_eq!(ctx.slot_offset(0), Some(10));

        ctx.destroy_surface(id).unwrap();
        assert_eq!(ctx.render_target(), None);
        assert_eq!(ctx.slot_offset(0), Some(0));
        assert_eq!(ctx.slots[0].owner, None);
        assert!(matches!(ctx.end_picture(), Err(DriverError::NoRenderTarget)));
    }
}
