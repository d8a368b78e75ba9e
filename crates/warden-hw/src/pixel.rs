//! Sensor pixel formats and gray-level preprocessing.

use thiserror::Error;

/// Pixels darker than this count towards the dark-frame test.
pub const DARK_LEVEL: u8 = 32;
/// A frame is dark when more than this share of its pixels are below [`DARK_LEVEL`].
pub const DARK_FRACTION: f32 = 0.95;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PixelError {
    #[error("{format:?} buffer too short: expected {expected} bytes, got {actual}")]
    ShortBuffer {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Capture formats the camera knows how to turn into 8-bit gray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, `[Y0 U Y1 V]` per pixel pair.
    Yuyv,
    /// 8-bit luminance, the usual IR sensor output.
    Grey,
    /// 16-bit little-endian luminance.
    Y16,
}

impl PixelFormat {
    /// Map a V4L2 fourcc to a supported format.
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            b"Y16 " | b"Y16\0" => Some(PixelFormat::Y16),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }

    /// Convert one captured buffer to `width * height` gray bytes.
    /// Trailing driver padding is ignored.
    pub fn to_gray(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, PixelError> {
        let pixels = width as usize * height as usize;
        let expected = pixels * self.bytes_per_pixel();
        if buf.len() < expected {
            return Err(PixelError::ShortBuffer {
                format: self,
                expected,
                actual: buf.len(),
            });
        }
        let buf = &buf[..expected];

        Ok(match self {
            PixelFormat::Grey => buf.to_vec(),
            // Y is every even byte.
            PixelFormat::Yuyv => buf.iter().step_by(2).copied().collect(),
            // Keep the high byte of each little-endian sample.
            PixelFormat::Y16 => buf.chunks_exact(2).map(|px| px[1]).collect(),
        })
    }
}

/// True if (almost) every pixel is black: lens covered, emitter off, etc.
pub fn is_dark(gray: &[u8]) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_LEVEL).count();
    dark as f32 / gray.len() as f32 > DARK_FRACTION
}

/// Contrast-limited adaptive histogram equalization over a square tile grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clahe {
    pub tiles: u32,
    /// Per-bin ceiling as a fraction of the tile's pixel count.
    pub clip_limit: f32,
}

impl Default for Clahe {
    fn default() -> Self {
        Self {
            tiles: 8,
            clip_limit: 0.02,
        }
    }
}

impl Clahe {
    /// Equalize `gray` in place. Images smaller than the grid are left
    /// untouched.
    pub fn apply(&self, gray: &mut [u8], width: u32, height: u32) {
        let (w, h) = (width as usize, height as usize);
        let tiles = self.tiles as usize;
        if tiles == 0 || w < tiles || h < tiles || gray.len() < w * h {
            return;
        }
        let (tile_w, tile_h) = (w / tiles, h / tiles);

        let mut luts = Vec::with_capacity(tiles * tiles);
        for ty in 0..tiles {
            for tx in 0..tiles {
                luts.push(self.tile_lut(gray, w, tx * tile_w, ty * tile_h, tile_w, tile_h));
            }
        }

        // Blend the four nearest tile mappings, weighted by distance to
        // each tile centre.
        let last = (tiles - 1) as f32;
        for y in 0..h {
            let gy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, last);
            let (r0, dy) = (gy as usize, gy.fract());
            let r1 = (r0 + 1).min(tiles - 1);

            for x in 0..w {
                let gx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, last);
                let (c0, dx) = (gx as usize, gx.fract());
                let c1 = (c0 + 1).min(tiles - 1);

                let v = gray[y * w + x] as usize;
                let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
                let top = lerp(luts[r0 * tiles + c0][v], luts[r0 * tiles + c1][v], dx);
                let bottom = lerp(luts[r1 * tiles + c0][v], luts[r1 * tiles + c1][v], dx);
                gray[y * w + x] = lerp(top, bottom, dy).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    /// Clipped, redistributed CDF of one tile scaled to 0–255.
    fn tile_lut(&self, gray: &[u8], stride: usize, x0: usize, y0: usize, tw: usize, th: usize) -> [f32; 256] {
        let mut hist = [0u32; 256];
        for row in gray[y0 * stride..].chunks(stride).take(th) {
            for &p in &row[x0..x0 + tw] {
                hist[p as usize] += 1;
            }
        }

        let total = (tw * th) as u32;
        let ceiling = (self.clip_limit * total as f32) as u32;
        let excess: u32 = hist.iter().map(|&n| n.saturating_sub(ceiling)).sum();
        let (share, spill) = (excess / 256, (excess % 256) as usize);
        for (i, n) in hist.iter_mut().enumerate() {
            *n = (*n).min(ceiling) + share + u32::from(i < spill);
        }

        let mut lut = [0f32; 256];
        let mut acc = 0u32;
        for (slot, &n) in lut.iter_mut().zip(hist.iter()) {
            acc += n;
            *slot = acc as f32;
        }

        let floor = lut.iter().copied().find(|&c| c > 0.0).unwrap_or(0.0);
        let span = total as f32 - floor;
        if span > 0.0 {
            for c in lut.iter_mut() {
                *c = ((*c - floor) / span * 255.0).clamp(0.0, 255.0);
            }
        }
        lut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"GREY"), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(b"Y16 "), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }

    #[test]
    fn test_yuyv_keeps_luma() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = PixelFormat::Yuyv.to_gray(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_y16_takes_high_byte() {
        let y16 = [0x34, 0x12, 0xFF, 0x80];
        assert_eq!(PixelFormat::Y16.to_gray(&y16, 2, 1).unwrap(), vec![0x12, 0x80]);
    }

    #[test]
    fn test_grey_ignores_padding() {
        let buf = [1, 2, 3, 4, 99, 99];
        assert_eq!(PixelFormat::Grey.to_gray(&buf, 2, 2).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_short_buffer() {
        assert_eq!(
            PixelFormat::Yuyv.to_gray(&[100, 128], 2, 1),
            Err(PixelError::ShortBuffer {
                format: PixelFormat::Yuyv,
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_dark_detection() {
        assert!(is_dark(&[]));
        assert!(is_dark(&[0u8; 1000]));
        assert!(!is_dark(&[128u8; 1000]));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend([128u8; 40]);
        assert!(is_dark(&mostly_dark));

        let mut lit = vec![10u8; 940];
        lit.extend([128u8; 60]);
        assert!(!is_dark(&lit));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let (w, h) = (16u32, 16u32);
        let mut gray: Vec<u8> = (0..(w * h) as usize).map(|i| 100 + (i % 11) as u8).collect();
        let before = spread(&gray);
        Clahe { tiles: 2, clip_limit: 0.02 }.apply(&mut gray, w, h);
        assert!(spread(&gray) > before);
    }

    #[test]
    fn test_clahe_skips_tiny_images() {
        let mut gray = vec![50u8; 4];
        Clahe::default().apply(&mut gray, 2, 2);
        assert_eq!(gray, vec![50u8; 4]);
    }

    fn spread(data: &[u8]) -> f32 {
        let n = data.len() as f32;
        let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
        (data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n).sqrt()
    }
}
