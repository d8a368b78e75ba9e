//! Local Binary Pattern Histograms.
//!
//! Each face is described by the concatenated, per-cell normalised
//! histograms of its circular LBP codes over a `grid_x` × `grid_y` grid.
//! Faces are compared with the symmetric chi-square distance, so identical
//! inputs score exactly 0 and the maximum is 4 per grid cell.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

// Codes are stored as u32 and the histogram has 2^neighbors bins.
const MAX_NEIGHBORS: u32 = 16;
// Neighbour-vs-centre tolerance; absorbs rounding in the bilinear weights.
const SAMPLE_EPSILON: f64 = f32::EPSILON as f64;

#[derive(Error, Debug, PartialEq)]
pub enum LbphError {
    #[error("radius must be positive")]
    ZeroRadius,
    #[error("neighbors must be within 1..={MAX_NEIGHBORS}, got {0}")]
    Neighbors(u32),
    #[error("grid must be at least 1x1, got {0}x{1}")]
    Grid(u32, u32),
    #[error("{size}x{size} image too small for radius {radius} and a {grid_x}x{grid_y} grid")]
    ImageTooSmall {
        size: u32,
        radius: u32,
        grid_x: u32,
        grid_y: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    /// Check the parameters against a square image of side `size`.
    pub fn validate(&self, size: u32) -> Result<(), LbphError> {
        if self.radius == 0 {
            return Err(LbphError::ZeroRadius);
        }
        if self.neighbors == 0 || self.neighbors > MAX_NEIGHBORS {
            return Err(LbphError::Neighbors(self.neighbors));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(LbphError::Grid(self.grid_x, self.grid_y));
        }
        let inner = size.saturating_sub(2 * self.radius);
        if inner / self.grid_x == 0 || inner / self.grid_y == 0 {
            return Err(LbphError::ImageTooSmall {
                size,
                radius: self.radius,
                grid_x: self.grid_x,
                grid_y: self.grid_y,
            });
        }
        Ok(())
    }

    pub fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    /// Length of the feature vector produced by [`histogram`].
    pub fn histogram_len(&self) -> usize {
        self.grid_x as usize * self.grid_y as usize * self.bins()
    }
}

/// Circular LBP codes for a `width` × `height` grayscale image.
///
/// Neighbours are sampled on a circle of `radius` with bilinear
/// interpolation. The output excludes a `radius`-wide border and is
/// `(width - 2r) × (height - 2r)`, row-major.
pub fn lbp_codes(pixels: &[u8], width: usize, height: usize, params: &LbphParams) -> Vec<u32> {
    let r = params.radius as usize;
    if width <= 2 * r || height <= 2 * r || pixels.len() < width * height {
        return Vec::new();
    }
    let out_w = width - 2 * r;
    let out_h = height - 2 * r;
    let mut codes = vec![0u32; out_w * out_h];

    let at = |row: usize, col: usize| pixels[row * width + col] as f64;

    for n in 0..params.neighbors {
        let angle = 2.0 * PI * n as f64 / params.neighbors as f64;
        let sx = params.radius as f64 * angle.cos();
        let sy = -(params.radius as f64) * angle.sin();

        let fx = sx.floor();
        let fy = sy.floor();
        let cx = sx.ceil();
        let cy = sy.ceil();
        let tx = sx - fx;
        let ty = sy - fy;

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        // Offsets lie within [-r, r], so every sample stays inside the image.
        let (fx, fy, cx, cy) = (fx as isize, fy as isize, cx as isize, cy as isize);

        for i in r..height - r {
            for j in r..width - r {
                let row_f = (i as isize + fy) as usize;
                let row_c = (i as isize + cy) as usize;
                let col_f = (j as isize + fx) as usize;
                let col_c = (j as isize + cx) as usize;

                let t = w1 * at(row_f, col_f)
                    + w2 * at(row_f, col_c)
                    + w3 * at(row_c, col_f)
                    + w4 * at(row_c, col_c);
                let center = at(i, j);

                if t > center || (t - center).abs() < SAMPLE_EPSILON {
                    codes[(i - r) * out_w + (j - r)] |= 1 << n;
                }
            }
        }
    }

    codes
}

/// Spatial histogram of a `width` × `height` code image.
///
/// Cells are `width / grid_x` × `height / grid_y`; remainder rows and
/// columns are ignored. Every cell histogram sums to 1.
pub fn spatial_histogram(codes: &[u32], width: usize, height: usize, params: &LbphParams) -> Vec<f32> {
    let bins = params.bins();
    let grid_x = params.grid_x as usize;
    let grid_y = params.grid_y as usize;
    let mut hist = vec![0.0f32; grid_x * grid_y * bins];

    let cell_w = width / grid_x;
    let cell_h = height / grid_y;
    if cell_w == 0 || cell_h == 0 || codes.len() < width * height {
        return hist;
    }
    let cell_total = (cell_w * cell_h) as f32;

    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let cell = &mut hist[(gy * grid_x + gx) * bins..][..bins];
            for y in gy * cell_h..(gy + 1) * cell_h {
                for &code in &codes[y * width + gx * cell_w..][..cell_w] {
                    cell[code as usize] += 1.0;
                }
            }
            for v in cell.iter_mut() {
                *v /= cell_total;
            }
        }
    }

    hist
}

/// LBPH feature vector of a square `size` × `size` image.
pub fn histogram(pixels: &[u8], size: u32, params: &LbphParams) -> Vec<f32> {
    let size = size as usize;
    let inner = size.saturating_sub(2 * params.radius as usize);
    let codes = lbp_codes(pixels, size, size, params);
    spatial_histogram(&codes, inner, inner, params)
}

/// Symmetric chi-square distance, `Σ 2(a−b)² / (a+b)`.
pub fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&a, &b)| {
            let (a, b) = (a as f64, b as f64);
            let sum = a + b;
            if sum.abs() > f64::EPSILON {
                2.0 * (a - b).powi(2) / sum
            } else {
                0.0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = LbphParams::default();
        assert_eq!(params.bins(), 256);
        assert_eq!(params.histogram_len(), 8 * 8 * 256);
        params.validate(200).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let base = LbphParams::default();
        assert_eq!(
            LbphParams { radius: 0, ..base }.validate(200),
            Err(LbphError::ZeroRadius)
        );
        assert_eq!(
            LbphParams { neighbors: 17, ..base }.validate(200),
            Err(LbphError::Neighbors(17))
        );
        assert_eq!(
            LbphParams { grid_x: 0, ..base }.validate(200),
            Err(LbphError::Grid(0, 8))
        );
        assert!(matches!(
            LbphParams { grid_x: 100, ..base }.validate(20),
            Err(LbphError::ImageTooSmall { .. })
        ));
    }

    #[test]
    fn test_uniform_image_sets_every_bit() {
        // Every neighbour equals the centre, which counts as "greater or equal".
        let pixels = vec![90u8; 5 * 5];
        let codes = lbp_codes(&pixels, 5, 5, &LbphParams::default());
        assert_eq!(codes.len(), 3 * 3);
        assert!(codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_bright_center_clears_every_bit() {
        let mut pixels = vec![10u8; 3 * 3];
        pixels[4] = 200;
        let codes = lbp_codes(&pixels, 3, 3, &LbphParams::default());
        assert_eq!(codes, vec![0]);
    }

    #[test]
    fn test_right_neighbour_is_bit_zero() {
        // Neighbour 0 sits at angle 0, i.e. directly to the right of the centre.
        let mut pixels = vec![10u8; 3 * 3];
        pixels[4] = 100;
        pixels[5] = 200;
        let codes = lbp_codes(&pixels, 3, 3, &LbphParams::default());
        assert_eq!(codes[0] & 1, 1);
    }

    #[test]
    fn test_cells_are_normalised() {
        let params = LbphParams::default();
        let pixels: Vec<u8> = (0..200 * 200).map(|i| (i * 7 % 251) as u8).collect();
        let hist = histogram(&pixels, 200, &params);
        assert_eq!(hist.len(), params.histogram_len());
        for cell in hist.chunks(params.bins()) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-4, "cell sums to {total}");
        }
    }

    #[test]
    fn test_chi_square_identity_and_symmetry() {
        let a = vec![0.5, 0.25, 0.25, 0.0];
        let b = vec![0.0, 0.5, 0.25, 0.25];
        assert_eq!(chi_square(&a, &a), 0.0);
        assert!((chi_square(&a, &b) - chi_square(&b, &a)).abs() < 1e-12);
        // 2*(0.25/0.5) + 2*(0.0625/0.75) + 0 + 2*(0.0625/0.25)
        let expected = 1.0 + 0.125 / 0.75 + 0.5;
        assert!((chi_square(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_chi_square_skips_empty_bins() {
        assert_eq!(chi_square(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }
}
