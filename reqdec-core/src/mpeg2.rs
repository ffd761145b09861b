// MPEG2 - VA parameter buffers to the Cedrus MPEG-2 frame header
//
// The engine takes one frame header control per job. Picture parameters fill most of
// it; slice position and length are set from the slot's accumulated bitstream when the
// picture ends. Slice parameters are only inspected.

use crate::error::Result;
use crate::va::{self, CodingExtension, PictureParameterBufferMpeg2, SliceDataFlag, SliceParameterBufferMpeg2};
use bytemuck::{Pod, Zeroable};
use serde::Serialize;

const V4L2_CID_MPEG_BASE: u32 = 0x0099_0900;

/// `V4L2_CID_MPEG_VIDEO_MPEG2_FRAME_HDR`
pub const V4L2_CID_MPEG_VIDEO_MPEG2_FRAME_HDR: u32 = V4L2_CID_MPEG_BASE + 450;

/// Stream type tag carried in the header.
pub const STREAM_TYPE_MPEG2: u32 = 1;

/// `struct v4l2_ctrl_mpeg2_frame_hdr`, byte-exact.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize)]
pub struct Mpeg2FrameHeader {
    /// Bits of slice data in the input buffer
    pub slice_len: u32,
    /// First bit of slice data
    pub slice_pos: u32,
    pub stream_type: u32,

    pub width: u16,
    pub height: u16,

    pub picture_coding_type: u32,
    /// [forward|backward][horizontal|vertical]
    pub f_code: [[u8; 2]; 2],

    pub intra_dc_precision: u8,
    pub picture_structure: u8,
    pub top_field_first: u8,
    pub frame_pred_frame_dct: u8,
    pub concealment_motion_vectors: u8,
    pub q_scale_type: u8,
    pub intra_vlc_format: u8,
    pub alternate_scan: u8,

    /// Output slots holding the reference pictures
    pub backward_index: u8,
    pub forward_index: u8,

    #[serde(skip)]
    pub _pad: [u8; 2],
}

impl Mpeg2FrameHeader {
    /// Point the header at `running_offset` bytes of slice data from the start of
    /// the input buffer.
    pub fn finalize(&mut self, running_offset: usize) {
        self.slice_len = (running_offset * 8) as u32;
        self.slice_pos = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Single-letter name of a VA picture coding type.
pub fn coding_type_name(picture_coding_type: u32) -> char {
    match picture_coding_type {
        1 => 'I',
        2 => 'P',
        3 => 'B',
        _ => '?',
    }
}

/// Fill `header` from a `VAPictureParameterBufferMPEG2`.
///
/// `reference_slot` maps a surface id to its output slot; references it cannot
/// resolve point at `own_slot`.
pub fn apply_picture_parameters(
    header: &mut Mpeg2FrameHeader,
    data: &[u8],
    own_slot: usize,
    reference_slot: impl Fn(u32) -> Option<usize>,
) -> Result<()> {
    let params: PictureParameterBufferMpeg2 = va::read_param(data)?;

    header.stream_type = STREAM_TYPE_MPEG2;
    header.width = params.horizontal_size;
    header.height = params.vertical_size;
    header.picture_coding_type = params.picture_coding_type as u32;

    let f_code = params.f_code as u32;
    header.f_code = [
        [((f_code >> 12) & 0xf) as u8, ((f_code >> 8) & 0xf) as u8],
        [((f_code >> 4) & 0xf) as u8, (f_code & 0xf) as u8],
    ];

    let ext = CodingExtension(params.picture_coding_extension);
    header.intra_dc_precision = ext.intra_dc_precision();
    header.picture_structure = ext.picture_structure();
    header.top_field_first = ext.top_field_first();
    header.frame_pred_frame_dct = ext.frame_pred_frame_dct();
    header.concealment_motion_vectors = ext.concealment_motion_vectors();
    header.q_scale_type = ext.q_scale_type();
    header.intra_vlc_format = ext.intra_vlc_format();
    header.alternate_scan = ext.alternate_scan();

    let resolve = |surface: u32| reference_slot(surface).unwrap_or(own_slot) as u8;
    header.forward_index = resolve(params.forward_reference_picture);
    header.backward_index = resolve(params.backward_reference_picture);

    tracing::debug!(
        "MPEG-2 {} picture {}x{}, refs fwd={} bwd={}",
        coding_type_name(header.picture_coding_type),
        header.width,
        header.height,
        header.forward_index,
        header.backward_index
    );
    Ok(())
}

/// Parse a `VASliceParameterBufferMPEG2` and report where the slice sits in its data.
pub fn classify_slice(data: &[u8]) -> Result<Option<SliceDataFlag>> {
    let params: SliceParameterBufferMpeg2 = va::read_param(data)?;
    let flag = SliceDataFlag::from_va(params.slice_data_flag);

    match flag {
        Some(flag) => tracing::trace!(
            "Slice {:?}: {} bytes at {}, macroblock offset {}",
            flag,
            params.slice_data_size,
            params.slice_data_offset,
            params.macroblock_offset
        ),
        None => tracing::warn!("Unknown slice data flag {:#x}", params.slice_data_flag),
    }
    Ok(flag)
}
