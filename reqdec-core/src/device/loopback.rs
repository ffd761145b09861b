// LOOPBACK - In-memory decode device
//
// Accepts the same call sequence as a kernel decoder and "completes" every queued
// buffer in FIFO order. Records each call so tests and dry runs can inspect what a
// real engine would have received. Individual steps can be made to fail.
//
// Slot regions live as long as the device, like kernel MMAP buffers. Remapping a slot
// after every slice buffer into it is gone hands back the same bytes.

use super::{Completion, ControlPayload, DecodeDevice, DecodedPlanes, JobHandle, QueueKind};
use super::shared::{SharedRegion, SlotRegion};
use crate::config::DriverConfig;
use crate::error::DeviceError;
use crate::tiled;
use std::collections::VecDeque;
use std::time::Duration;

/// One recorded device call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    MapSlot { slot: usize },
    NewJob { job: JobHandle },
    SetControls { job: JobHandle, id: u32, payload: Vec<u8> },
    Enqueue { queue: QueueKind, index: usize, job: JobHandle, bytes_used: usize },
    Dequeue { queue: QueueKind, index: usize },
}

#[derive(Debug)]
pub struct LoopbackDevice {
    input_slots: usize,
    output_slots: usize,
    region_size: usize,
    regions: Vec<Option<SlotRegion>>,
    next_job: i32,
    pending: [VecDeque<usize>; 2],
    planes: Vec<(Vec<u8>, Vec<u8>)>,
    events: Vec<DeviceEvent>,
    submitted: Vec<Vec<u8>>,

    // Fault injection
    fail_enqueue: Option<QueueKind>,
    fail_controls: bool,
    fail_new_job: bool,
    fail_decode: Option<usize>,
    stalled: bool,
}

fn queue_index(queue: QueueKind) -> usize {
    match queue {
        QueueKind::Bitstream => 0,
        QueueKind::Decoded => 1,
    }
}

impl LoopbackDevice {
    pub fn new(config: &DriverConfig) -> Self {
        let luma = tiled::tiled_luma_size(config.coded_width as usize, config.coded_height as usize);
        let chroma = tiled::tiled_chroma_size(config.coded_width as usize, config.coded_height as usize);

        Self {
            input_slots: config.input_slots,
            output_slots: config.output_slots,
            region_size: config.bitstream_buffer_size,
            regions: (0..config.input_slots).map(|_| None).collect(),
            next_job: 100,
            pending: [VecDeque::new(), VecDeque::new()],
            planes: (0..config.output_slots).map(|_| (vec![0u8; luma], vec![0u8; chroma])).collect(),
            events: Vec::new(),
            submitted: Vec::new(),
            fail_enqueue: None,
            fail_controls: false,
            fail_new_job: false,
            fail_decode: None,
            stalled: false,
        }
    }

    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Bitstream bytes captured at each input enqueue, in submission order.
    pub fn submitted_bitstreams(&self) -> &[Vec<u8>] {
        &self.submitted
    }

    /// Last frame header applied to any job.
    pub fn last_controls(&self) -> Option<(u32, &[u8])> {
        self.events.iter().rev().find_map(|event| match event {
            DeviceEvent::SetControls { id, payload, .. } => Some((*id, payload.as_slice())),
            _ => None,
        })
    }

    pub fn pending(&self, queue: QueueKind) -> usize {
        self.pending[queue_index(queue)].len()
    }

    /// Writable tiled planes of an output slot, to stand in for decoder output.
    pub fn planes_mut(&mut self, index: usize) -> Option<(&mut [u8], &mut [u8])> {
        self.planes
            .get_mut(index)
            .map(|(luma, chroma)| (luma.as_mut_slice(), chroma.as_mut_slice()))
    }

    pub fn fail_enqueue_on(&mut self, queue: Option<QueueKind>) {
        self.fail_enqueue = queue;
    }

    pub fn fail_controls(&mut self, fail: bool) {
        self.fail_controls = fail;
    }

    pub fn fail_new_job(&mut self, fail: bool) {
        self.fail_new_job = fail;
    }

    /// Flag the next completion of output slot `index` as a decode error.
    pub fn fail_decode_of(&mut self, index: Option<usize>) {
        self.fail_decode = index;
    }

    /// Hold every queued buffer; dequeue then times out.
    pub fn stall(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    fn check_slot(&self, queue: QueueKind, index: usize) -> Result<(), DeviceError> {
        let count = match queue {
            QueueKind::Bitstream => self.input_slots,
            QueueKind::Decoded => self.output_slots,
        };
        if index >= count {
            return Err(DeviceError::InvalidSlot { queue, index, count });
        }
        Ok(())
    }
}

impl DecodeDevice for LoopbackDevice {
    fn map_bitstream_slot(&mut self, slot: usize) -> Result<SlotRegion, DeviceError> {
        self.check_slot(QueueKind::Bitstream, slot)?;
        self.events.push(DeviceEvent::MapSlot { slot });

        let size = self.region_size;
        let region = self.regions[slot].get_or_insert_with(|| SharedRegion::heap(size).into_slot());
        Ok(region.clone())
    }

    fn new_job(&mut self) -> Result<JobHandle, DeviceError> {
        if self.fail_new_job {
            return Err(DeviceError::Injected("new_job"));
        }
        let job = JobHandle(self.next_job);
        self.next_job += 1;
        self.events.push(DeviceEvent::NewJob { job });
        Ok(job)
    }

    fn set_controls(&mut self, job: JobHandle, control: &ControlPayload<'_>) -> Result<(), DeviceError> {
        if self.fail_controls {
            return Err(DeviceError::Injected("set_controls"));
        }
        self.events.push(DeviceEvent::SetControls {
            job,
            id: control.id,
            payload: control.data.to_vec(),
        });
        Ok(())
    }

    fn enqueue(
        &mut self,
        queue: QueueKind,
        index: usize,
        job: JobHandle,
        bytes_used: usize,
    ) -> Result<(), DeviceError> {
        self.check_slot(queue, index)?;
        if self.fail_enqueue == Some(queue) {
            return Err(DeviceError::Injected("enqueue"));
        }

        if queue == QueueKind::Bitstream {
            let snapshot = match &self.regions[index] {
                Some(region) => {
                    let region = region.lock();
                    region.as_slice()[..bytes_used.min(region.len())].to_vec()
                }
                None => Vec::new(),
            };
            self.submitted.push(snapshot);
        }

        self.events.push(DeviceEvent::Enqueue { queue, index, job, bytes_used });
        self.pending[queue_index(queue)].push_back(index);
        Ok(())
    }

    fn dequeue(&mut self, queue: QueueKind, timeout: Option<Duration>) -> Result<Completion, DeviceError> {
        let next = if self.stalled {
            None
        } else {
            self.pending[queue_index(queue)].pop_front()
        };

        let index = match next {
            Some(index) => index,
            // Nothing will ever arrive; a real device would block here forever.
            None if timeout.is_some() || self.stalled => return Err(DeviceError::Timeout(queue)),
            None => return Err(DeviceError::Idle(queue)),
        };

        let failed = queue == QueueKind::Decoded && self.fail_decode == Some(index);
        if failed {
            self.fail_decode = None;
        }
        self.events.push(DeviceEvent::Dequeue { queue, index });
        Ok(Completion { index, failed })
    }

    fn decoded_planes(&self, index: usize) -> Result<DecodedPlanes<'_>, DeviceError> {
        self.check_slot(QueueKind::Decoded, index)?;
        let (luma, chroma) = &self.planes[index];
        Ok(DecodedPlanes { luma, chroma })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_completion() {
        let mut device = LoopbackDevice::new(&DriverConfig::default());
        let job = device.new_job().unwrap();
        device.enqueue(QueueKind::Decoded, 1, job, 0).unwrap();
        device.enqueue(QueueKind::Decoded, 0, job, 0).unwrap();

        assert_eq!(device.dequeue(QueueKind::Decoded, None).unwrap().index, 1);
        assert_eq!(device.dequeue(QueueKind::Decoded, None).unwrap().index, 0);
        assert!(matches!(
            device.dequeue(QueueKind::Decoded, Some(Duration::ZERO)),
            Err(DeviceError::Timeout(QueueKind::Decoded))
        ));
    }

    #[test]
    fn test_slot_bounds() {
        let mut device = LoopbackDevice::new(&DriverConfig::default());
        assert!(matches!(
            device.map_bitstream_slot(2),
            Err(DeviceError::InvalidSlot { index: 2, count: 2, .. })
        ));
    }

    #[test]
    fn test_region_is_shared_with_device() {
        let mut device = LoopbackDevice::new(&DriverConfig::default());
        let region = device.map_bitstream_slot(0).unwrap();
        region.lock().as_mut_slice()[..3].copy_from_slice(b"abc");

        let job = device.new_job().unwrap();
        device.enqueue(QueueKind::Bitstream, 0, job, 3).unwrap();
        assert_eq!(device.submitted_bitstreams()[0], b"abc");
    }

    #[test]
    fn test_region_outlives_mappings() {
        let mut device = LoopbackDevice::new(&DriverConfig::default());
        let region = device.map_bitstream_slot(1).unwrap();
        region.lock().as_mut_slice()[0] = 9;
        drop(region);

        let again = device.map_bitstream_slot(1).unwrap();
        assert_eq!(again.lock().as_slice()[0], 9);
        assert!(device.map_bitstream_slot(0).unwrap().lock().as_slice().iter().all(|&b| b == 0));
    }
}
