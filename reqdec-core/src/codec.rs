// CODEC - Header translation dispatch
//
// Each context picks one codec from its profile at creation. The codec owns the shape
// of the frame descriptor and knows which buffer kinds feed it.

use crate::device::ControlPayload;
use crate::error::Result;
use crate::mpeg2::{self, Mpeg2FrameHeader};
use crate::va::{BufferKind, Profile};
use serde::Serialize;

/// Hardware control structure for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameDescriptor {
    Mpeg2(Mpeg2FrameHeader),
}

impl FrameDescriptor {
    /// Set slice length/position from the bytes accumulated in the input slot.
    pub fn finalize(&mut self, running_offset: usize) {
        match self {
            Self::Mpeg2(header) => header.finalize(running_offset),
        }
    }

    /// The control that carries this descriptor to the device.
    pub fn control(&self) -> ControlPayload<'_> {
        match self {
            Self::Mpeg2(header) => ControlPayload {
                id: mpeg2::V4L2_CID_MPEG_VIDEO_MPEG2_FRAME_HDR,
                data: header.as_bytes(),
            },
        }
    }
}

/// Where the picture being translated sits, and how to find its references.
pub struct TranslationTarget<'a> {
    /// Output slot of the picture itself
    pub own_slot: usize,
    /// Output slot of another surface, if it exists
    pub reference_slot: &'a dyn Fn(u32) -> Option<usize>,
}

/// Folds parameter buffers into a frame descriptor.
pub trait HeaderTranslator {
    /// Descriptor for a picture that has seen no buffers yet.
    fn empty_descriptor(&self) -> FrameDescriptor;

    /// Apply one buffer. Kinds the codec does not consume are ignored.
    fn translate(
        &self,
        descriptor: &mut FrameDescriptor,
        kind: BufferKind,
        data: &[u8],
        target: &TranslationTarget<'_>,
    ) -> Result<()>;
}

/// Codecs the context can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Codec {
    Mpeg2,
}

impl Codec {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Mpeg2Simple | Profile::Mpeg2Main => Self::Mpeg2,
        }
    }
}

impl HeaderTranslator for Codec {
    fn empty_descriptor(&self) -> FrameDescriptor {
        match self {
            Self::Mpeg2 => FrameDescriptor::Mpeg2(Mpeg2FrameHeader::default()),
        }
    }

    fn translate(
        &self,
        descriptor: &mut FrameDescriptor,
        kind: BufferKind,
        data: &[u8],
        target: &TranslationTarget<'_>,
    ) -> Result<()> {
        match (self, descriptor) {
            (Self::Mpeg2, FrameDescriptor::Mpeg2(header)) => match kind {
                BufferKind::PictureParameters => {
                    mpeg2::apply_picture_parameters(header, data, target.own_slot, target.reference_slot)
                }
                BufferKind::SliceParameters => mpeg2::classify_slice(data).map(|_| ()),
                // Slice bytes already sit in the input slot.
                BufferKind::SliceData => Ok(()),
                BufferKind::QuantizationMatrix | BufferKind::Image => {
                    tracing::debug!("Ignoring {:?} buffer for MPEG-2", kind);
                    Ok(())
                }
            },
        }
    }
}
