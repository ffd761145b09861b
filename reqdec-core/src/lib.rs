//! # reqdec Core
//!
//! Stateless MPEG-2 decoding on memory-to-memory hardware engines driven through the
//! V4L2 request API (Allwinner Cedrus and friends).
//!
//! The caller describes one encoded frame as a set of typed buffers, the context folds
//! them into a single hardware frame header and submits one decode job per picture.
//! Decoded surfaces come back in the engine's 32x32 tiled layout and are converted to
//! planar NV12 on image export.
//!
//! ```text
//! create_buffer ──► begin_picture ──► render_picture ──► end_picture ──► sync / derive_image
//!   (buffer.rs)      (picture.rs)       (codec.rs)        (picture.rs)     (image.rs, tiled.rs)
//! ```

// ============================================================================
// Foundation
// ============================================================================
pub mod error;
pub mod config;
pub mod handle;
pub mod va;

// ============================================================================
// Device Channel
// ============================================================================
pub mod device;

// ============================================================================
// Decode Pipeline
// ============================================================================
pub mod context;
pub mod buffer;
pub mod surface;
pub mod codec;
pub mod mpeg2;
pub mod picture;

// ============================================================================
// Image Export
// ============================================================================
pub mod tiled;
pub mod image;

pub use config::DriverConfig;
pub use context::DecodeContext;
pub use error::{DeviceError, DriverError, Result};
pub use handle::{BufferId, ImageId, SurfaceId};
pub use va::{BufferKind, Profile};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
