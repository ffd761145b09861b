// IMAGE - Planar export of decoded surfaces
//
// Images are NV12: a luma plane followed by an interleaved chroma plane, both with the
// same pitch. Deriving an image from a surface waits for its decode and converts the
// engine's tiled output into the image buffer.

use crate::context::DecodeContext;
use crate::device::DecodeDevice;
use crate::error::{DriverError, Result};
use crate::handle::{BufferId, ImageId, SurfaceId};
use crate::surface::SurfaceStatus;
use crate::tiled;
use crate::va::{BufferKind, VA_FOURCC_NV12};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageFormat {
    pub fourcc: u32,
    pub bits_per_pixel: u32,
}

impl ImageFormat {
    pub const NV12: Self = Self {
        fourcc: VA_FOURCC_NV12,
        bits_per_pixel: 12,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub id: ImageId,
    /// Image buffer holding the pixels
    pub buffer: BufferId,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub data_size: usize,
    pub num_planes: u32,
    pub pitches: [u32; 3],
    pub offsets: [u32; 3],
}

/// Plane layout of an NV12 image: (pitch, chroma offset, total size).
fn nv12_layout(width: u32, height: u32) -> (usize, usize, usize) {
    let pitch = tiled::planar_stride(width as usize);
    let luma = pitch * height as usize;
    let chroma_rows = (height as usize + 2) / 2;
    (pitch, luma, luma + pitch * chroma_rows)
}

impl<D: DecodeDevice> DecodeContext<D> {
    /// Formats images can be created in.
    pub fn query_image_formats(&self) -> Vec<ImageFormat> {
        vec![ImageFormat::NV12]
    }

    pub fn create_image(&mut self, format: ImageFormat, width: u32, height: u32) -> Result<Image> {
        if format.fourcc != VA_FOURCC_NV12 {
            return Err(DriverError::InvalidArgument(format!("unsupported image fourcc {:#010x}", format.fourcc)));
        }
        if width == 0 || height == 0 {
            return Err(DriverError::InvalidArgument(format!("image size {}x{}", width, height)));
        }

        let (pitch, chroma_offset, data_size) = nv12_layout(width, height);
        let buffer = self.create_buffer(BufferKind::Image, data_size, 1, None)?;

        let image = Image {
            id: ImageId(0),
            buffer,
            format,
            width,
            height,
            data_size,
            num_planes: 2,
            pitches: [pitch as u32, pitch as u32, 0],
            offsets: [0, chroma_offset as u32, 0],
        };
        let id = ImageId(self.images.insert(image));
        let image = self
            .images
            .get_mut(id.0)
            .ok_or(DriverError::InvalidHandle { kind: "image", id: id.0 })?;
        image.id = id;

        tracing::debug!("Image {} ({}x{}, pitch {}) in buffer {}", id, width, height, pitch, buffer);
        Ok(image.clone())
    }

    pub fn image(&self, id: ImageId) -> Result<&Image> {
        self.images.get(id.0).ok_or(DriverError::InvalidHandle { kind: "image", id: id.0 })
    }

    /// Destroy an image and its buffer.
    pub fn destroy_image(&mut self, id: ImageId) -> Result<()> {
        let image = self
            .images
            .remove(id.0)
            .ok_or(DriverError::InvalidHandle { kind: "image", id: id.0 })?;
        self.destroy_buffer(image.buffer)
    }

    /// Wait for a surface and export its picture as a new NV12 image.
    pub fn derive_image(&mut self, surface: SurfaceId) -> Result<Image> {
        self.sync_surface(surface)?;

        let source = self.surface(surface)?;
        if source.status != SurfaceStatus::Ready {
            return Err(DriverError::InvalidSurface(surface.0));
        }
        let (width, height, output_slot) = (source.width, source.height, source.output_slot);

        let image = self.create_image(ImageFormat::NV12, width, height)?;
        if let Err(e) = self.detile_into(&image, output_slot) {
            self.destroy_image(image.id)?;
            return Err(e);
        }

        tracing::debug!("Derived image {} from surface {}", image.id, surface);
        Ok(image)
    }

    fn detile_into(&mut self, image: &Image, output_slot: usize) -> Result<()> {
        let planes = self.device.decoded_planes(output_slot)?;
        let buffer = self
            .buffers
            .get_mut(image.buffer.0)
            .ok_or(DriverError::InvalidBuffer(image.buffer.0))?;
        let mut mapping = buffer.mapping();

        let (width, height) = (image.width as usize, image.height as usize);
        let pitch = image.pitches[0] as usize;
        let (luma, chroma) = mapping.split_at_mut(image.offsets[1] as usize);

        tiled::detile_luma(planes.luma, luma, width, height, pitch)?;
        tiled::detile_chroma(planes.chroma, chroma, width, height, pitch)?;
        Ok(())
    }
}
