// VA - Video Acceleration API buffer types and parameter layouts
//
// Byte-exact mirrors of the libva structures the caller hands us (va/va.h).
// Parameter buffers arrive as raw bytes and are decoded with bytemuck, never
// by pointer casts.

use crate::error::{DriverError, Result};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

// ============================================================================
// VA constants
// ============================================================================

const VA_PICTURE_PARAMETER_BUFFER_TYPE: i32 = 0;
const VA_IQ_MATRIX_BUFFER_TYPE: i32 = 1;
const VA_SLICE_PARAMETER_BUFFER_TYPE: i32 = 4;
const VA_SLICE_DATA_BUFFER_TYPE: i32 = 5;
const VA_IMAGE_BUFFER_TYPE: i32 = 9;

const VA_PROFILE_MPEG2_SIMPLE: i32 = 0;
const VA_PROFILE_MPEG2_MAIN: i32 = 1;

/// `VA_INVALID_ID` / `VA_INVALID_SURFACE`
pub const VA_INVALID_ID: u32 = 0xffff_ffff;

/// 'NV12'
pub const VA_FOURCC_NV12: u32 = 0x3231_564E;

// ============================================================================
// Buffer kinds
// ============================================================================

/// Buffer types accepted by the buffer store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferKind {
    PictureParameters,
    /// Accepted and stored, not consumed by the MPEG-2 path
    QuantizationMatrix,
    SliceParameters,
    SliceData,
    Image,
}

impl BufferKind {
    /// Map a raw `VABufferType`.
    pub fn from_va(raw: i32) -> Result<Self> {
        match raw {
            VA_PICTURE_PARAMETER_BUFFER_TYPE => Ok(Self::PictureParameters),
            VA_IQ_MATRIX_BUFFER_TYPE => Ok(Self::QuantizationMatrix),
            VA_SLICE_PARAMETER_BUFFER_TYPE => Ok(Self::SliceParameters),
            VA_SLICE_DATA_BUFFER_TYPE => Ok(Self::SliceData),
            VA_IMAGE_BUFFER_TYPE => Ok(Self::Image),
            other => Err(DriverError::UnsupportedBufferKind(other)),
        }
    }

    pub fn to_va(self) -> i32 {
        match self {
            Self::PictureParameters => VA_PICTURE_PARAMETER_BUFFER_TYPE,
            Self::QuantizationMatrix => VA_IQ_MATRIX_BUFFER_TYPE,
            Self::SliceParameters => VA_SLICE_PARAMETER_BUFFER_TYPE,
            Self::SliceData => VA_SLICE_DATA_BUFFER_TYPE,
            Self::Image => VA_IMAGE_BUFFER_TYPE,
        }
    }
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    Mpeg2Simple,
    Mpeg2Main,
}

impl Profile {
    pub fn from_va(raw: i32) -> Result<Self> {
        match raw {
            VA_PROFILE_MPEG2_SIMPLE => Ok(Self::Mpeg2Simple),
            VA_PROFILE_MPEG2_MAIN => Ok(Self::Mpeg2Main),
            other => Err(DriverError::UnsupportedProfile(other)),
        }
    }

    pub fn to_va(self) -> i32 {
        match self {
            Self::Mpeg2Simple => VA_PROFILE_MPEG2_SIMPLE,
            Self::Mpeg2Main => VA_PROFILE_MPEG2_MAIN,
        }
    }
}

// ============================================================================
// MPEG-2 parameter buffers
// ============================================================================

/// `VAPictureParameterBufferMPEG2`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PictureParameterBufferMpeg2 {
    pub horizontal_size: u16,
    pub vertical_size: u16,
    pub forward_reference_picture: u32,
    pub backward_reference_picture: u32,
    /// 1 = I, 2 = P, 3 = B
    pub picture_coding_type: i32,
    /// Four 4-bit codes: fwd-h, fwd-v, bwd-h, bwd-v from the high nibble down
    pub f_code: i32,
    /// `picture_coding_extension` bit-field group, see [`CodingExtension`]
    pub picture_coding_extension: u32,
    pub va_reserved: [u32; 4],
}

/// Accessors for the `picture_coding_extension.bits` group (LSB first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodingExtension(pub u32);

impl CodingExtension {
    fn field(self, shift: u32, width: u32) -> u8 {
        ((self.0 >> shift) & ((1 << width) - 1)) as u8
    }

    pub fn intra_dc_precision(self) -> u8 {
        self.field(0, 2)
    }

    pub fn picture_structure(self) -> u8 {
        self.field(2, 2)
    }

    pub fn top_field_first(self) -> u8 {
        self.field(4, 1)
    }

    pub fn frame_pred_frame_dct(self) -> u8 {
        self.field(5, 1)
    }

    pub fn concealment_motion_vectors(self) -> u8 {
        self.field(6, 1)
    }

    pub fn q_scale_type(self) -> u8 {
        self.field(7, 1)
    }

    pub fn intra_vlc_format(self) -> u8 {
        self.field(8, 1)
    }

    pub fn alternate_scan(self) -> u8 {
        self.field(9, 1)
    }

    pub fn repeat_first_field(self) -> u8 {
        self.field(10, 1)
    }

    pub fn progressive_frame(self) -> u8 {
        self.field(11, 1)
    }

    pub fn is_first_field(self) -> u8 {
        self.field(12, 1)
    }
}

/// `VASliceParameterBufferMPEG2`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SliceParameterBufferMpeg2 {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub macroblock_offset: u32,
    pub slice_horizontal_position: u32,
    pub slice_vertical_position: u32,
    pub quantiser_scale_code: i32,
    pub intra_slice_flag: i32,
    pub va_reserved: [u32; 4],
}

/// `VA_SLICE_DATA_FLAG_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceDataFlag {
    All,
    Begin,
    Middle,
    End,
}

impl SliceDataFlag {
    pub fn from_va(raw: u32) -> Option<Self> {
        match raw {
            0x00 => Some(Self::All),
            0x01 => Some(Self::Begin),
            0x02 => Some(Self::Middle),
            0x04 => Some(Self::End),
            _ => None,
        }
    }
}

/// Decode a parameter structure from the head of a buffer.
pub fn read_param<T: Pod>(bytes: &[u8]) -> Result<T> {
    let size = std::mem::size_of::<T>();
    let head = bytes.get(..size).ok_or_else(|| {
        DriverError::InvalidArgument(format!(
            "{} needs {} bytes, buffer holds {}",
            std::any::type_name::<T>(),
            size,
            bytes.len()
        ))
    })?;
    Ok(bytemuck::pod_read_unaligned(head))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes_match_libva() {
        assert_eq!(std::mem::size_of::<PictureParameterBufferMpeg2>(), 40);
        assert_eq!(std::mem::size_of::<SliceParameterBufferMpeg2>(), 48);
    }

    #[test]
    fn test_buffer_kind_mapping() {
        assert_eq!(BufferKind::from_va(5).unwrap(), BufferKind::SliceData);
        assert_eq!(BufferKind::from_va(1).unwrap(), BufferKind::QuantizationMatrix);
        assert!(matches!(
            BufferKind::from_va(2),
            Err(DriverError::UnsupportedBufferKind(2))
        ));
        assert_eq!(BufferKind::Image.to_va(), 9);
    }

    #[test]
    fn test_coding_extension_bits() {
        // intra_dc_precision=2, picture_structure=3, top_field_first, alternate_scan
        let ext = CodingExtension(0b10_0001_1110);
        assert_eq!(ext.intra_dc_precision(), 2);
        assert_eq!(ext.picture_structure(), 3);
        assert_eq!(ext.top_field_first(), 1);
        assert_eq!(ext.frame_pred_frame_dct(), 0);
        assert_eq!(ext.alternate_scan(), 1);
        assert_eq!(ext.intra_vlc_format(), 0);
    }

    #[test]
    fn test_read_param_short_buffer() {
        let err = read_param::<SliceParameterBufferMpeg2>(&[0u8; 12]).unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
    }

    #[test]
    fn test_read_param_unaligned() {
        let params = SliceParameterBufferMpeg2 {
            slice_data_size: 1234,
            slice_data_flag: 4,
            ..Default::default()
        };
        let mut bytes = vec![0u8; 1];
        bytes.extend_from_slice(bytemuck::bytes_of(&params));
        let decoded: SliceParameterBufferMpeg2 = read_param(&bytes[1..]).unwrap();
        assert_eq!(decoded, params);
        assert_eq!(SliceDataFlag::from_va(decoded.slice_data_flag), Some(SliceDataFlag::End));
    }
}
