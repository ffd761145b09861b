// V4L2 - Stateless decoder over the Linux request API
//
// Pipeline:
// 1. Open the m2m video node (non-blocking) and its media controller node
// 2. OUTPUT_MPLANE  <- MPEG-2 slices ('MG2S'), one MMAP buffer per input slot
// 3. CAPTURE_MPLANE <- 32x32 tiled NV12 ('ST12'), one MMAP buffer per output slot
// 4. Per job: MEDIA_IOC_REQUEST_ALLOC once, then REINIT + S_EXT_CTRLS for every frame
// 5. QBUF capture, QBUF output with the request fd, MEDIA_REQUEST_IOC_QUEUE
// 6. poll + DQBUF to observe completion

use super::shared::{SharedRegion, SlotRegion};
use super::{Completion, ControlPayload, DecodeDevice, DecodedPlanes, JobHandle, QueueKind};
use crate::config::DriverConfig;
use crate::error::DeviceError;
use crate::tiled;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

// ============================================================================
// Kernel ABI (linux/videodev2.h, linux/media.h)
// ============================================================================

const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | ((ty as u32) << 8) | nr as u32
}

const fn iowr<T>(ty: u8, nr: u8) -> u32 {
    ioc(IOC_READ | IOC_WRITE, ty, nr, std::mem::size_of::<T>())
}

const VIDIOC_S_FMT: u32 = iowr::<V4l2Format>(b'V', 5);
const VIDIOC_REQBUFS: u32 = iowr::<V4l2RequestBuffers>(b'V', 8);
const VIDIOC_QUERYBUF: u32 = iowr::<V4l2Buffer>(b'V', 9);
const VIDIOC_QBUF: u32 = iowr::<V4l2Buffer>(b'V', 15);
const VIDIOC_DQBUF: u32 = iowr::<V4l2Buffer>(b'V', 17);
const VIDIOC_STREAMON: u32 = ioc(IOC_WRITE, b'V', 18, std::mem::size_of::<libc::c_int>());
const VIDIOC_STREAMOFF: u32 = ioc(IOC_WRITE, b'V', 19, std::mem::size_of::<libc::c_int>());
const VIDIOC_S_EXT_CTRLS: u32 = iowr::<V4l2ExtControls>(b'V', 72);

const MEDIA_IOC_REQUEST_ALLOC: u32 = ioc(IOC_READ, b'|', 0x05, std::mem::size_of::<libc::c_int>());
const MEDIA_REQUEST_IOC_QUEUE: u32 = ioc(IOC_NONE, b'|', 0x80, 0);
const MEDIA_REQUEST_IOC_REINIT: u32 = ioc(IOC_NONE, b'|', 0x81, 0);

const V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;
const V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE: u32 = 10;
const V4L2_MEMORY_MMAP: u32 = 1;
const V4L2_FIELD_NONE: u32 = 1;
const V4L2_BUF_FLAG_ERROR: u32 = 0x0000_0040;
const V4L2_BUF_FLAG_REQUEST_FD: u32 = 0x0080_0000;
const V4L2_CTRL_WHICH_REQUEST_VAL: u32 = 0x0f01_0000;
const VIDEO_MAX_PLANES: usize = 8;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

const V4L2_PIX_FMT_MPEG2_SLICE: u32 = fourcc(b"MG2S");
const V4L2_PIX_FMT_SUNXI_TILED_NV12: u32 = fourcc(b"ST12");

#[repr(C)]
#[derive(Clone, Copy)]
struct V4l2Plane {
    bytesused: u32,
    length: u32,
    /// Low half of the `m` union (mem_offset); high half keeps the union 8 bytes wide
    mem_offset: u32,
    m_high: u32,
    data_offset: u32,
    reserved: [u32; 11],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct V4l2Buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: [u32; 4],
    sequence: u32,
    memory: u32,
    planes: *mut V4l2Plane,
    length: u32,
    reserved2: u32,
    request_fd: i32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct V4l2ExtControl {
    id: u32,
    size: u32,
    reserved2: u32,
    /// `ptr` member of the value union, widened to the union's 64 bits
    ptr: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct V4l2ExtControls {
    which: u32,
    count: u32,
    error_idx: u32,
    request_fd: i32,
    reserved: [u32; 1],
    controls: *mut V4l2ExtControl,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct V4l2RequestBuffers {
    count: u32,
    type_: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
union V4l2FormatUnion {
    raw: [u8; 200],
    _align: *mut libc::c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct V4l2Format {
    type_: u32,
    fmt: V4l2FormatUnion,
}

fn zeroed<T: Copy>() -> T {
    // SAFETY: only used for the plain-old-data kernel structs above.
    unsafe { std::mem::zeroed() }
}

fn xioctl<T>(fd: RawFd, request: u32, arg: *mut T, op: &'static str) -> Result<(), DeviceError> {
    loop {
        // SAFETY: request codes are built from the size of T, arg points to a live T.
        let rc = unsafe { libc::ioctl(fd, request as _, arg) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(DeviceError::Io { op, source: err });
        }
    }
}

fn buffer_type(queue: QueueKind) -> u32 {
    match queue {
        QueueKind::Bitstream => V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
        QueueKind::Decoded => V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
    }
}

// ============================================================================
// Device
// ============================================================================

/// Summary printed by the probe tool.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub video_device: String,
    pub media_device: String,
    pub input_slots: usize,
    pub output_slots: usize,
    pub coded_width: u32,
    pub coded_height: u32,
    pub decoded_plane_sizes: Vec<Vec<usize>>,
}

pub struct V4l2Device {
    video: File,
    media: File,
    config: DriverConfig,
    capture: Vec<Vec<SharedRegion>>,
    jobs: HashMap<i32, OwnedFd>,
    streaming: bool,
}

impl V4l2Device {
    /// Open and configure the decoder described by `config`, then start streaming.
    pub fn open(config: &DriverConfig) -> Result<Self, DeviceError> {
        let video = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(&config.video_device)
            .map_err(|source| DeviceError::Io { op: "open video device", source })?;

        let media = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&config.media_device)
            .map_err(|source| DeviceError::Io { op: "open media device", source })?;

        let mut device = Self {
            video,
            media,
            config: config.clone(),
            capture: Vec::new(),
            jobs: HashMap::new(),
            streaming: false,
        };

        device.set_format(
            V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
            V4L2_PIX_FMT_MPEG2_SLICE,
            config.bitstream_buffer_size as u32,
        )?;
        device.set_format(V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE, V4L2_PIX_FMT_SUNXI_TILED_NV12, 0)?;
        device.request_buffers(V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE, config.input_slots)?;
        device.request_buffers(V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE, config.output_slots)?;

        for index in 0..config.output_slots {
            let planes = device.map_capture_buffer(index)?;
            device.capture.push(planes);
        }

        device.stream(true)?;

        tracing::info!(
            "V4L2 decoder ready on {} ({} input / {} output slots, {}x{})",
            config.video_device.display(),
            config.input_slots,
            config.output_slots,
            config.coded_width,
            config.coded_height
        );

        Ok(device)
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            video_device: self.config.video_device.display().to_string(),
            media_device: self.config.media_device.display().to_string(),
            input_slots: self.config.input_slots,
            output_slots: self.config.output_slots,
            coded_width: self.config.coded_width,
            coded_height: self.config.coded_height,
            decoded_plane_sizes: self
                .capture
                .iter()
                .map(|planes| planes.iter().map(SharedRegion::len).collect())
                .collect(),
        }
    }

    fn fd(&self) -> RawFd {
        self.video.as_raw_fd()
    }

    fn set_format(&self, type_: u32, pixelformat: u32, sizeimage: u32) -> Result<(), DeviceError> {
        let mut format: V4l2Format = zeroed();
        format.type_ = type_;

        // struct v4l2_pix_format_mplane (packed)
        let mut raw = [0u8; 200];
        raw[0..4].copy_from_slice(&self.config.coded_width.to_ne_bytes());
        raw[4..8].copy_from_slice(&self.config.coded_height.to_ne_bytes());
        raw[8..12].copy_from_slice(&pixelformat.to_ne_bytes());
        raw[12..16].copy_from_slice(&V4L2_FIELD_NONE.to_ne_bytes());
        // plane_fmt[0].sizeimage
        raw[20..24].copy_from_slice(&sizeimage.to_ne_bytes());
        // num_planes
        raw[180] = 1;
        format.fmt.raw = raw;

        xioctl(self.fd(), VIDIOC_S_FMT, &mut format, "VIDIOC_S_FMT")
    }

    fn request_buffers(&self, type_: u32, count: usize) -> Result<(), DeviceError> {
        let mut request: V4l2RequestBuffers = zeroed();
        request.count = count as u32;
        request.type_ = type_;
        request.memory = V4L2_MEMORY_MMAP;
        xioctl(self.fd(), VIDIOC_REQBUFS, &mut request, "VIDIOC_REQBUFS")?;

        if (request.count as usize) < count {
            let queue = if type_ == V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE {
                QueueKind::Bitstream
            } else {
                QueueKind::Decoded
            };
            return Err(DeviceError::InvalidSlot {
                queue,
                index: count - 1,
                count: request.count as usize,
            });
        }
        Ok(())
    }

    fn query_buffer(
        &self,
        queue: QueueKind,
        index: usize,
        planes: &mut [V4l2Plane; VIDEO_MAX_PLANES],
    ) -> Result<usize, DeviceError> {
        let mut buf: V4l2Buffer = zeroed();
        buf.index = index as u32;
        buf.type_ = buffer_type(queue);
        buf.memory = V4L2_MEMORY_MMAP;
        buf.length = VIDEO_MAX_PLANES as u32;
        buf.planes = planes.as_mut_ptr();
        xioctl(self.fd(), VIDIOC_QUERYBUF, &mut buf, "VIDIOC_QUERYBUF")?;
        Ok(buf.length as usize)
    }

    fn map_capture_buffer(&self, index: usize) -> Result<Vec<SharedRegion>, DeviceError> {
        let mut planes: [V4l2Plane; VIDEO_MAX_PLANES] = zeroed();
        let count = self.query_buffer(QueueKind::Decoded, index, &mut planes)?;

        planes[..count.min(VIDEO_MAX_PLANES)]
            .iter()
            .map(|plane| SharedRegion::map_device(self.fd(), plane.mem_offset, plane.length as usize))
            .collect()
    }

    fn stream(&mut self, on: bool) -> Result<(), DeviceError> {
        let request = if on { VIDIOC_STREAMON } else { VIDIOC_STREAMOFF };
        for type_ in [V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE, V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE] {
            let mut arg = type_ as libc::c_int;
            xioctl(self.fd(), request, &mut arg, if on { "VIDIOC_STREAMON" } else { "VIDIOC_STREAMOFF" })?;
        }
        self.streaming = on;
        Ok(())
    }

    fn job_fd(&self, job: JobHandle) -> Result<RawFd, DeviceError> {
        self.jobs
            .get(&job.0)
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| DeviceError::Io {
                op: "lookup request",
                source: std::io::Error::from_raw_os_error(libc::EBADF),
            })
    }

    /// Wait until the video node signals `events`, bounded by `deadline`.
    fn wait_ready(&self, queue: QueueKind, events: libc::c_short, deadline: Option<Instant>) -> Result<(), DeviceError> {
        loop {
            let timeout_ms = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    left.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
                }
                None => -1,
            };

            let mut pfd = libc::pollfd { fd: self.fd(), events, revents: 0 };
            // SAFETY: single valid pollfd.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(DeviceError::Io { op: "poll", source: err });
            }
            if rc == 0 {
                return Err(DeviceError::Timeout(queue));
            }
            if pfd.revents & libc::POLLERR != 0 {
                return Err(DeviceError::Io {
                    op: "poll",
                    source: std::io::Error::from_raw_os_error(libc::EIO),
                });
            }
            if pfd.revents & events != 0 {
                return Ok(());
            }
        }
    }
}

impl DecodeDevice for V4l2Device {
    fn map_bitstream_slot(&mut self, slot: usize) -> Result<SlotRegion, DeviceError> {
        if slot >= self.config.input_slots {
            return Err(DeviceError::InvalidSlot {
                queue: QueueKind::Bitstream,
                index: slot,
                count: self.config.input_slots,
            });
        }

        let mut planes: [V4l2Plane; VIDEO_MAX_PLANES] = zeroed();
        self.query_buffer(QueueKind::Bitstream, slot, &mut planes)?;
        let plane = planes[0];

        tracing::debug!("Mapping bitstream slot {} ({} bytes at 0x{:x})", slot, plane.length, plane.mem_offset);
        let region = SharedRegion::map_device(self.fd(), plane.mem_offset, plane.length as usize)?;
        Ok(region.into_slot())
    }

    fn new_job(&mut self) -> Result<JobHandle, DeviceError> {
        let mut fd: libc::c_int = -1;
        xioctl(self.media.as_raw_fd(), MEDIA_IOC_REQUEST_ALLOC, &mut fd, "MEDIA_IOC_REQUEST_ALLOC")?;
        // SAFETY: the kernel just handed us this descriptor.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        self.jobs.insert(fd, owned);
        tracing::debug!("Allocated media request {}", fd);
        Ok(JobHandle(fd))
    }

    fn set_controls(&mut self, job: JobHandle, control: &ControlPayload<'_>) -> Result<(), DeviceError> {
        let request_fd = self.job_fd(job)?;

        // A request can only be reused once the previous frame completed.
        // SAFETY: argument-less ioctl on a request fd we own.
        let rc = unsafe { libc::ioctl(request_fd, MEDIA_REQUEST_IOC_REINIT as _) };
        if rc != 0 {
            return Err(DeviceError::last_os_error("MEDIA_REQUEST_IOC_REINIT"));
        }

        let mut ctrl = V4l2ExtControl {
            id: control.id,
            size: control.data.len() as u32,
            reserved2: 0,
            ptr: control.data.as_ptr() as usize as u64,
        };
        let mut ctrls: V4l2ExtControls = zeroed();
        ctrls.which = V4L2_CTRL_WHICH_REQUEST_VAL;
        ctrls.count = 1;
        ctrls.request_fd = request_fd;
        ctrls.controls = &mut ctrl;

        xioctl(self.fd(), VIDIOC_S_EXT_CTRLS, &mut ctrls, "VIDIOC_S_EXT_CTRLS")
    }

    fn enqueue(
        &mut self,
        queue: QueueKind,
        index: usize,
        job: JobHandle,
        bytes_used: usize,
    ) -> Result<(), DeviceError> {
        let mut planes: [V4l2Plane; VIDEO_MAX_PLANES] = zeroed();
        let mut buf: V4l2Buffer = zeroed();
        buf.index = index as u32;
        buf.type_ = buffer_type(queue);
        buf.memory = V4L2_MEMORY_MMAP;
        buf.planes = planes.as_mut_ptr();

        match queue {
            QueueKind::Bitstream => {
                let request_fd = self.job_fd(job)?;
                planes[0].bytesused = bytes_used as u32;
                buf.length = 1;
                buf.flags = V4L2_BUF_FLAG_REQUEST_FD;
                buf.request_fd = request_fd;
                xioctl(self.fd(), VIDIOC_QBUF, &mut buf, "VIDIOC_QBUF(output)")?;

                // SAFETY: argument-less ioctl on a request fd we own.
                let rc = unsafe { libc::ioctl(request_fd, MEDIA_REQUEST_IOC_QUEUE as _) };
                if rc != 0 {
                    return Err(DeviceError::last_os_error("MEDIA_REQUEST_IOC_QUEUE"));
                }
            }
            QueueKind::Decoded => {
                let count = self.capture.get(index).map(Vec::len).ok_or(DeviceError::InvalidSlot {
                    queue,
                    index,
                    count: self.capture.len(),
                })?;
                buf.length = count as u32;
                xioctl(self.fd(), VIDIOC_QBUF, &mut buf, "VIDIOC_QBUF(capture)")?;
            }
        }
        Ok(())
    }

    fn dequeue(&mut self, queue: QueueKind, timeout: Option<Duration>) -> Result<Completion, DeviceError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        // Output buffers signal POLLOUT once consumed, capture buffers POLLIN.
        let events = match queue {
            QueueKind::Bitstream => libc::POLLOUT,
            QueueKind::Decoded => libc::POLLIN,
        };

        loop {
            let mut planes: [V4l2Plane; VIDEO_MAX_PLANES] = zeroed();
            let mut buf: V4l2Buffer = zeroed();
            buf.type_ = buffer_type(queue);
            buf.memory = V4L2_MEMORY_MMAP;
            buf.length = VIDEO_MAX_PLANES as u32;
            buf.planes = planes.as_mut_ptr();

            match xioctl(self.fd(), VIDIOC_DQBUF, &mut buf, "VIDIOC_DQBUF") {
                Ok(()) => {
                    return Ok(Completion {
                        index: buf.index as usize,
                        failed: buf.flags & V4L2_BUF_FLAG_ERROR != 0,
                    });
                }
                Err(DeviceError::Io { source, .. }) if source.kind() == std::io::ErrorKind::WouldBlock => {
                    self.wait_ready(queue, events, deadline)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn decoded_planes(&self, index: usize) -> Result<DecodedPlanes<'_>, DeviceError> {
        let planes = self.capture.get(index).ok_or(DeviceError::InvalidSlot {
            queue: QueueKind::Decoded,
            index,
            count: self.capture.len(),
        })?;

        match planes.as_slice() {
            [luma, chroma, ..] => Ok(DecodedPlanes {
                luma: luma.as_slice(),
                chroma: chroma.as_slice(),
            }),
            [single] => {
                // Single-plane variant: chroma tiles follow the luma tiles.
                let split = tiled::tiled_luma_size(self.config.coded_width as usize, self.config.coded_height as usize)
                    .min(single.len());
                let (luma, chroma) = single.as_slice().split_at(split);
                Ok(DecodedPlanes { luma, chroma })
            }
            [] => Err(DeviceError::InvalidSlot {
                queue: QueueKind::Decoded,
                index,
                count: 0,
            }),
        }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        if self.streaming {
            if let Err(e) = self.stream(false) {
                tracing::warn!("Failed to stop streaming: {}", e);
            }
        }
        // Unmap capture planes and close request fds before the nodes close.
        self.capture.clear();
        self.jobs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_struct_sizes() {
        assert_eq!(std::mem::size_of::<V4l2Plane>(), 64);
        assert_eq!(std::mem::size_of::<V4l2ExtControl>(), 20);
        assert_eq!(std::mem::size_of::<V4l2RequestBuffers>(), 20);
        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(std::mem::size_of::<V4l2Buffer>(), 88);
            assert_eq!(std::mem::size_of::<V4l2ExtControls>(), 32);
            assert_eq!(std::mem::size_of::<V4l2Format>(), 208);
        }
    }

    #[test]
    fn test_ioctl_codes() {
        // Values from a 64-bit videodev2.h build.
        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(VIDIOC_QBUF, 0xc058_560f);
            assert_eq!(VIDIOC_DQBUF, 0xc058_5611);
            assert_eq!(VIDIOC_S_EXT_CTRLS, 0xc020_5648);
            assert_eq!(VIDIOC_S_FMT, 0xc0d0_5605);
        }
        assert_eq!(VIDIOC_STREAMON, 0x4004_5612);
        assert_eq!(MEDIA_IOC_REQUEST_ALLOC, 0x8004_7c05);
        assert_eq!(MEDIA_REQUEST_IOC_QUEUE, 0x0000_7c80);
    }

    #[test]
    fn test_fourcc() {
        assert_eq!(V4L2_PIX_FMT_MPEG2_SLICE, 0x5332_474d);
    }

    #[test]
    fn test_open_missing_device() {
        let config = DriverConfig {
            video_device: "/nonexistent/video99".into(),
            ..Default::default()
        };
        assert!(matches!(V4l2Device::open(&config), Err(DeviceError::Io { .. })));
    }
}
