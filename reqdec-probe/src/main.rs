//! # reqdec probe
//!
//! Small companion tool for the decode backend.
//!
//! ## Usage
//! ```bash
//! # Effective configuration (REQDEC_CONFIG or defaults)
//! reqdec-probe config [path]
//!
//! # Open the V4L2 decoder and report its buffers
//! reqdec-probe device [path]
//!
//! # Convert a dumped tiled capture buffer to planar NV12
//! reqdec-probe detile 1920 1088 capture.bin frame.nv12
//!
//! # Push one MPEG-2 I-frame through the in-memory device
//! RUST_LOG=debug reqdec-probe selftest
//! ```

use anyhow::{bail, Context, Result};
use reqdec_core::va::PictureParameterBufferMpeg2;
use reqdec_core::{tiled, BufferKind, DecodeContext, DriverConfig, Profile};
use serde::Serialize;
use serde_json::json;
use std::io;
use std::path::Path;
use tracing::info;

const USAGE: &str = "usage: reqdec-probe <config [path] | device [path] | detile <w> <h> <in> <out> | selftest>";

fn load_config(path: Option<&String>) -> Result<DriverConfig> {
    let config = match path {
        Some(path) => DriverConfig::load(Path::new(path))?,
        None => DriverConfig::from_env()?,
    };
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_config(path: Option<&String>) -> Result<()> {
    print_json(&load_config(path)?)
}

#[cfg(target_os = "linux")]
fn cmd_device(path: Option<&String>) -> Result<()> {
    let config = load_config(path)?;
    let device = reqdec_core::device::V4l2Device::open(&config)
        .with_context(|| format!("opening {}", config.video_device.display()))?;
    print_json(&device.summary())
}

#[cfg(not(target_os = "linux"))]
fn cmd_device(_path: Option<&String>) -> Result<()> {
    bail!("V4L2 devices are only available on Linux")
}

fn cmd_detile(args: &[String]) -> Result<()> {
    let [width, height, input, output] = args else {
        bail!(USAGE);
    };
    let width: usize = width.parse().context("width")?;
    let height: usize = height.parse().context("height")?;

    let tiled_data = std::fs::read(input).with_context(|| format!("reading {}", input))?;
    let luma_size = tiled::tiled_luma_size(width, height);
    let chroma_size = tiled::tiled_chroma_size(width, height);
    if tiled_data.len() < luma_size + chroma_size {
        bail!(
            "{} holds {} bytes, a {}x{} tiled picture needs {}",
            input,
            tiled_data.len(),
            width,
            height,
            luma_size + chroma_size
        );
    }
    let (luma, chroma) = tiled_data.split_at(luma_size);

    let pitch = tiled::planar_stride(width);
    let chroma_offset = pitch * height;
    let mut planar = vec![0u8; chroma_offset + pitch * ((height + 2) / 2)];
    let (luma_out, chroma_out) = planar.split_at_mut(chroma_offset);
    tiled::detile_luma(luma, luma_out, width, height, pitch)?;
    tiled::detile_chroma(chroma, chroma_out, width, height, pitch)?;

    std::fs::write(output, &planar).with_context(|| format!("writing {}", output))?;
    info!("Wrote {}x{} NV12 (pitch {}) to {}", width, height, pitch, output);
    Ok(())
}

fn cmd_selftest() -> Result<()> {
    let config = DriverConfig {
        coded_width: 64,
        coded_height: 64,
        bitstream_buffer_size: 64 * 1024,
        ..Default::default()
    };
    let mut ctx = DecodeContext::loopback(config, Profile::Mpeg2Main)?;
    let surface = ctx.create_surfaces(64, 64, 1)?[0];

    let params = PictureParameterBufferMpeg2 {
        horizontal_size: 64,
        vertical_size: 64,
        picture_coding_type: 1,
        f_code: 0xffff,
        // intra_vlc_format, progressive_frame, picture_structure = frame
        picture_coding_extension: (1 << 8) | (1 << 11) | (3 << 2),
        ..Default::default()
    };
    // Picture start code followed by filler
    let mut slice = vec![0u8, 0, 1, 0];
    slice.resize(256, 0x5a);

    let slice_data = ctx.create_buffer(BufferKind::SliceData, slice.len(), 1, Some(&slice))?;
    let picture = ctx.create_buffer(
        BufferKind::PictureParameters,
        std::mem::size_of::<PictureParameterBufferMpeg2>(),
        1,
        Some(bytemuck::bytes_of(&params)),
    )?;

    ctx.begin_picture(surface)?;
    ctx.render_picture(&[picture, slice_data])?;
    ctx.end_picture()?;
    let image = ctx.derive_image(surface)?;

    let descriptor = ctx.surface(surface)?.descriptor;
    print_json(&json!({
        "surface": surface,
        "status": ctx.query_surface_status(surface)?,
        "descriptor": descriptor,
        "image": image,
        "formats": ctx.query_image_formats(),
        "submitted_bytes": ctx.device().submitted_bitstreams().iter().map(Vec::len).collect::<Vec<_>>(),
    }))?;

    ctx.destroy_image(image.id)?;
    ctx.destroy_surface(surface)?;
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reqdec_core=info".parse()?)
                .add_directive("reqdec_probe=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    info!("reqdec-probe v{}", reqdec_core::VERSION);

    match args.first().map(String::as_str) {
        Some("config") => cmd_config(args.get(1)),
        Some("device") => cmd_device(args.get(1)),
        Some("detile") => cmd_detile(&args[1..]),
        Some("selftest") => cmd_selftest(),
        _ => {
            eprintln!("{}", USAGE);
            bail!("no command given")
        }
    }
}
