// TILED - 32x32 macroblock-tiled to planar conversion
//
// The decode engine writes pictures as 32x32 byte tiles, each tile a contiguous
// 1024-byte block, tiles laid out tile-row-major:
//
//   tile(0,0) tile(0,1) ... tile(0,n-1) tile(1,0) ...
//
// Luma tiles hold 32 rows of 32 pixels. Chroma tiles hold 32 rows of 16 interleaved
// sample pairs over the half-resolution plane. Conversion walks the tiles in memory
// order and scatters each 32-byte tile row to its destination row.

use crate::error::{DriverError, Result};

pub const TILE: usize = 32;
pub const TILE_BYTES: usize = TILE * TILE;

fn align(value: usize, to: usize) -> usize {
    (value + to - 1) & !(to - 1)
}

/// Default row stride of converted planes.
pub fn planar_stride(width: usize) -> usize {
    align(width, 16)
}

/// Bytes in the tiled luma plane of a `width` x `height` picture.
pub fn tiled_luma_size(width: usize, height: usize) -> usize {
    align(width, TILE) * align(height, TILE)
}

/// Bytes in the tiled chroma plane of a `width` x `height` picture.
pub fn tiled_chroma_size(width: usize, height: usize) -> usize {
    let (row_bytes, rows) = chroma_extent(width, height);
    align(row_bytes, TILE) * align(rows, TILE)
}

/// Interleaved chroma row width in bytes and number of chroma rows.
fn chroma_extent(width: usize, height: usize) -> (usize, usize) {
    (width.div_ceil(2) * 2, height.div_ceil(2))
}

/// Validate sizes shared by both planes and return (tile columns, tile rows).
fn check_geometry(
    plane: &str,
    src: &[u8],
    dst: &[u8],
    row_bytes: usize,
    rows: usize,
    stride: usize,
) -> Result<(usize, usize)> {
    if stride < row_bytes {
        return Err(DriverError::InvalidArgument(format!(
            "{} stride {} narrower than row ({} bytes)",
            plane, stride, row_bytes
        )));
    }

    let tile_cols = align(row_bytes, TILE) / TILE;
    let tile_rows = align(rows, TILE) / TILE;

    let needed_src = tile_cols * tile_rows * TILE_BYTES;
    if src.len() < needed_src {
        return Err(DriverError::InvalidArgument(format!(
            "{} source holds {} bytes, {} tiles need {}",
            plane,
            src.len(),
            tile_cols * tile_rows,
            needed_src
        )));
    }

    let needed_dst = match rows {
        0 => 0,
        _ => (rows - 1) * stride + (tile_cols * TILE).min(stride),
    };
    if dst.len() < needed_dst {
        return Err(DriverError::InvalidArgument(format!(
            "{} destination holds {} bytes, needs {}",
            plane,
            dst.len(),
            needed_dst
        )));
    }

    Ok((tile_cols, tile_rows))
}

/// Convert a tiled luma plane to row-major rows of `stride` bytes.
///
/// Rows at or past `height` are skipped. When `stride` is not a whole number of
/// tiles the last tile column goes through a scratch row and is cut at the stride.
pub fn detile_luma(src: &[u8], dst: &mut [u8], width: usize, height: usize, stride: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Ok(());
    }
    let (tile_cols, tile_rows) = check_geometry("luma", src, dst, width, height, stride)?;

    let aligned = tile_cols * TILE == stride;
    let direct_cols = if aligned { tile_cols } else { tile_cols - 1 };
    let mut scratch = [0u8; TILE];

    for tile_row in 0..tile_rows {
        for col in 0..tile_cols {
            let tile = (tile_row * tile_cols + col) * TILE_BYTES;

            for m in 0..TILE {
                let line = tile_row * TILE + m;
                if line >= height {
                    continue;
                }
                let from = tile + m * TILE;
                let to = line * stride + col * TILE;

                if col < direct_cols {
                    dst[to..to + TILE].copy_from_slice(&src[from..from + TILE]);
                } else {
                    scratch.copy_from_slice(&src[from..from + TILE]);
                    let n = TILE.min(stride - col * TILE);
                    dst[to..to + n].copy_from_slice(&scratch[..n]);
                }
            }
        }
    }

    Ok(())
}

/// Convert a tiled interleaved chroma plane to row-major rows of `stride` bytes.
///
/// `width`/`height` are the picture (luma) dimensions. Each sample pair is written
/// back swapped: second component first.
pub fn detile_chroma(src: &[u8], dst: &mut [u8], width: usize, height: usize, stride: usize) -> Result<()> {
    let (row_bytes, rows) = chroma_extent(width, height);
    if row_bytes == 0 || rows == 0 {
        return Ok(());
    }
    if stride % 2 != 0 {
        return Err(DriverError::InvalidArgument(format!("chroma stride {} is odd", stride)));
    }
    let (tile_cols, tile_rows) = check_geometry("chroma", src, dst, row_bytes, rows, stride)?;

    let mut first = [0u8; TILE / 2];
    let mut second = [0u8; TILE / 2];

    for tile_row in 0..tile_rows {
        for col in 0..tile_cols {
            let tile = (tile_row * tile_cols + col) * TILE_BYTES;

            for m in 0..TILE {
                let line = tile_row * TILE + m;
                if line >= rows {
                    continue;
                }
                let from = tile + m * TILE;
                for (k, pair) in src[from..from + TILE].chunks_exact(2).enumerate() {
                    first[k] = pair[0];
                    second[k] = pair[1];
                }

                let to = line * stride + col * TILE;
                for k in 0..TILE / 2 {
                    if col * TILE + 2 * k >= stride {
                        break;
                    }
                    dst[to + 2 * k] = second[k];
                    dst[to + 2 * k + 1] = first[k];
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tiled plane where every byte holds the index of its tile.
    fn tile_index_plane(width: usize, height: usize) -> Vec<u8> {
        let tiles = tiled_luma_size(width, height) / TILE_BYTES;
        (0..tiles).flat_map(|t| std::iter::repeat(t as u8).take(TILE_BYTES)).collect()
    }

    fn tile_value(width: usize, row: usize, col: usize) -> u8 {
        let tile_cols = align(width, TILE) / TILE;
        ((row / TILE) * tile_cols + col / TILE) as u8
    }

    #[test]
    fn test_luma_tile_index_aligned_and_misaligned() {
        let src = tile_index_plane(64, 64);

        let mut aligned = vec![0xEEu8; 64 * 64];
        detile_luma(&src, &mut aligned, 64, 64, 64).unwrap();

        let mut padded = vec![0xEEu8; 63 * 70 + 64];
        detile_luma(&src, &mut padded, 64, 64, 70).unwrap();

        for row in 0..64 {
            for col in 0..64 {
                assert_eq!(aligned[row * 64 + col], tile_value(64, row, col), "aligned ({row},{col})");
                assert_eq!(padded[row * 70 + col], aligned[row * 64 + col], "padded ({row},{col})");
            }
        }
    }

    #[test]
    fn test_luma_pixel_positions_within_tile() {
        // Distinct value per in-tile position so row/column mixups show.
        let mut src = vec![0u8; tiled_luma_size(32, 32)];
        for m in 0..32 {
            for x in 0..32 {
                src[m * 32 + x] = (m * 7 + x) as u8;
            }
        }
        let mut dst = vec![0u8; 32 * 32];
        detile_luma(&src, &mut dst, 32, 32, 32).unwrap();
        assert_eq!(dst[5 * 32 + 9], (5 * 7 + 9) as u8);
        assert_eq!(dst[31 * 32 + 31], (31 * 7 + 31) as u8);
    }

    #[test]
    fn test_luma_partial_column_truncated_at_stride() {
        // 70 wide: three tile columns, stride 80 cuts the last one at 16 bytes.
        let src = tile_index_plane(70, 32);
        let stride = planar_stride(70);
        assert_eq!(stride, 80);

        let mut dst = vec![0u8; 31 * stride + stride];
        detile_luma(&src, &mut dst, 70, 32, stride).unwrap();
        for row in 0..32 {
            for col in 0..70 {
                assert_eq!(dst[row * stride + col], tile_value(70, row, col));
            }
        }
    }

    #[test]
    fn test_luma_rows_past_height_untouched() {
        let src = tile_index_plane(32, 40);
        let mut dst = vec![0xAAu8; 64 * 32];
        detile_luma(&src, &mut dst, 32, 40, 32).unwrap();

        assert_eq!(dst[39 * 32], 2);
        assert!(dst[40 * 32..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_chroma_pairs_swapped() {
        // 64x64 picture: chroma is 32 pairs (64 bytes) x 32 rows -> 2 tiles.
        let mut src = vec![0u8; tiled_chroma_size(64, 64)];
        assert_eq!(src.len(), 2 * TILE_BYTES);
        for (i, byte) in src.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }

        let stride = planar_stride(64);
        let mut dst = vec![0u8; 32 * stride];
        detile_chroma(&src, &mut dst, 64, 64, stride).unwrap();

        for row in 0..32 {
            for col in 0..2 {
                let tile = col * TILE_BYTES + row * TILE;
                for k in 0..16 {
                    let out = row * stride + col * TILE + 2 * k;
                    assert_eq!(dst[out], src[tile + 2 * k + 1]);
                    assert_eq!(dst[out + 1], src[tile + 2 * k]);
                }
            }
        }
    }

    #[test]
    fn test_chroma_odd_dimensions() {
        // 33x33: 17 pairs (34 bytes) x 17 rows.
        assert_eq!(chroma_extent(33, 33), (34, 17));
        let src = vec![1u8; tiled_chroma_size(33, 33)];
        let stride = planar_stride(33);
        let mut dst = vec![0u8; 17 * stride];
        detile_chroma(&src, &mut dst, 33, 33, stride).unwrap();
        assert!(dst[..16 * stride + 34].iter().all(|&b| b == 1));
    }

    #[test]
    fn test_short_buffers_rejected() {
        let src = vec![0u8; 100];
        let mut dst = vec![0u8; 64 * 64];
        assert!(matches!(
            detile_luma(&src, &mut dst, 64, 64, 64),
            Err(DriverError::InvalidArgument(_))
        ));

        let src = tile_index_plane(64, 64);
        let mut dst = vec![0u8; 64 * 63];
        assert!(detile_luma(&src, &mut dst, 64, 64, 64).is_err());
        assert!(detile_luma(&src, &mut vec![0u8; 64 * 64], 64, 64, 60).is_err());
    }
}
