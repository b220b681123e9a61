use tracing::{debug, warn};

/// Values below this never seed dilation.
pub const DILATION_SEED_THRESHOLD: u8 = 10;

/// Single-channel 8-bit depth raster, near = 255 and far = 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthRaster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl DepthRaster {
    /// Returns `None` when `data` does not hold exactly `width * height` samples.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Extracts the red channel of a decoded RGBA8 depth image.
    pub fn from_rgba(image: &image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let data = image.pixels().map(|p| p.0[0]).collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// Width over height; 1.0 for a degenerate raster.
    pub fn aspect(&self) -> f32 {
        if self.width == 0 || self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Grows near regions outward by one pixel per pass to close gaps left by
    /// the depth estimator.
    ///
    /// Each pass reads the previous pass only. Interior pixels with a value of
    /// at least [`DILATION_SEED_THRESHOLD`] raise every 8-neighbour holding a
    /// strictly lower value. When several seeds reach one neighbour the largest
    /// value wins. The outer border never seeds but can be raised.
    pub fn dilate(&mut self, radius: u32) {
        if radius == 0 || self.width < 3 || self.height < 3 {
            return;
        }
        let w = self.width as usize;
        let h = self.height as usize;
        let mut dst = self.data.clone();
        for pass in 0..radius {
            let src = &self.data;
            let mut changed = false;
            for y in 1..h - 1 {
                for x in 1..w - 1 {
                    let current = src[y * w + x];
                    if current < DILATION_SEED_THRESHOLD {
                        continue;
                    }
                    for ny in y - 1..=y + 1 {
                        for nx in x - 1..=x + 1 {
                            let n = ny * w + nx;
                            if src[n] < current && dst[n] < current {
                                dst[n] = current;
                                changed = true;
                            }
                        }
                    }
                }
            }
            self.data.copy_from_slice(&dst);
            if !changed {
                debug!(pass, radius, "depth dilation converged");
                break;
            }
        }
    }
}

/// Normalized depth samples on the mesh vertex grid, row-major from the top row.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthField {
    cols: u32,
    rows: u32,
    values: Vec<f32>,
}

impl DepthField {
    /// Resamples `raster` onto a `cols` x `rows` grid. Both must be at least 1.
    pub fn sample(raster: &DepthRaster, cols: u32, rows: u32) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let mut values = Vec::with_capacity(cols as usize * rows as usize);
        for iy in 0..rows {
            for ix in 0..cols {
                let (u, v) = grid_uv(ix, iy, cols, rows);
                values.push(sample_uv(raster, u, v));
            }
        }
        Self { cols, rows, values }
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn at(&self, ix: u32, iy: u32) -> f32 {
        self.values[iy as usize * self.cols as usize + ix as usize]
    }

    /// Central-difference gradient magnitude, one-sided on the border.
    pub fn gradient_magnitude(&self, ix: u32, iy: u32) -> f32 {
        let here = self.at(ix, iy);
        let right = if ix + 1 < self.cols { self.at(ix + 1, iy) } else { here };
        let left = if ix > 0 { self.at(ix - 1, iy) } else { here };
        let down = if iy + 1 < self.rows { self.at(ix, iy + 1) } else { here };
        let up = if iy > 0 { self.at(ix, iy - 1) } else { here };
        let dx = right - left;
        let dy = down - up;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Texture coordinate of a grid vertex. `v` is 1 on the top row.
pub fn grid_uv(ix: u32, iy: u32, cols: u32, rows: u32) -> (f32, f32) {
    let u = if cols > 1 {
        ix as f32 / (cols - 1) as f32
    } else {
        0.5
    };
    let v = if rows > 1 {
        1.0 - iy as f32 / (rows - 1) as f32
    } else {
        0.5
    };
    (u, v)
}

/// Normalized depth under texture coordinate (u, v). Out-of-range reads
/// yield 0 with a warning.
pub fn sample_uv(raster: &DepthRaster, u: f32, v: f32) -> f32 {
    let u = u.clamp(0.0, 1.0);
    let v = v.clamp(0.0, 1.0);
    let x = (u * raster.width().saturating_sub(1) as f32).floor() as u32;
    let y = ((1.0 - v) * raster.height().saturating_sub(1) as f32).floor() as u32;
    match raster.get(x, y) {
        Some(value) => value as f32 / 255.0,
        None => {
            warn!(x, y, "depth map sample out of range; using 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(width: u32, height: u32, data: &[u8]) -> DepthRaster {
        DepthRaster::new(width, height, data.to_vec()).unwrap()
    }

    #[test]
    fn rejects_mismatched_length() {
        assert!(DepthRaster::new(2, 2, vec![0; 3]).is_none());
    }

    #[test]
    fn radius_zero_is_identity() {
        let mut r = raster(3, 3, &[0, 0, 0, 0, 200, 0, 0, 0, 0]);
        let before = r.clone();
        r.dilate(0);
        assert_eq!(r, before);
    }

    #[test]
    fn single_pass_spreads_to_eight_neighbours() {
        let mut data = vec![0u8; 25];
        data[12] = 200;
        let mut r = raster(5, 5, &data);
        r.dilate(1);
        for y in 0..5 {
            for x in 0..5 {
                let expected = if (1..=3).contains(&x) && (1..=3).contains(&y) {
                    200
                } else {
                    0
                };
                assert_eq!(r.get(x, y), Some(expected), "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn faint_values_do_not_seed() {
        let mut data = vec![0u8; 25];
        data[12] = 9;
        let mut r = raster(5, 5, &data);
        let before = r.clone();
        r.dilate(3);
        assert_eq!(r, before);
    }

    #[test]
    fn border_pixels_do_not_seed() {
        let mut data = vec![0u8; 25];
        data[0] = 255;
        let mut r = raster(5, 5, &data);
        r.dilate(2);
        assert_eq!(r.get(1, 1), Some(0));
        assert_eq!(r.get(0, 0), Some(255));
    }

    #[test]
    fn larger_value_wins_between_seeds() {
        let mut data = vec![0u8; 25];
        data[11] = 100;
        data[13] = 200;
        let mut r = raster(5, 5, &data);
        r.dilate(1);
        assert_eq!(r.get(2, 2), Some(200));
        assert_eq!(r.get(1, 2), Some(100));
    }

    #[test]
    fn dilation_is_monotonic_and_converges() {
        let mut data = vec![0u8; 64];
        data[9] = 40;
        data[27] = 180;
        data[45] = 90;
        let mut r = raster(8, 8, &data);
        let mut previous = r.clone();
        for _ in 0..12 {
            r.dilate(1);
            for (a, b) in previous.data().iter().zip(r.data()) {
                assert!(b >= a);
            }
            previous = r.clone();
        }
        let settled = r.clone();
        r.dilate(5);
        assert_eq!(r, settled);
    }

    #[test]
    fn grid_uv_handles_single_row_and_column() {
        assert_eq!(grid_uv(0, 0, 1, 1), (0.5, 0.5));
        assert_eq!(grid_uv(0, 0, 3, 3), (0.0, 1.0));
        assert_eq!(grid_uv(2, 2, 3, 3), (1.0, 0.0));
    }

    #[test]
    fn sample_reads_top_row_for_v_one() {
        let r = raster(2, 2, &[255, 0, 0, 51]);
        assert_eq!(sample_uv(&r, 0.0, 1.0), 1.0);
        assert!((sample_uv(&r, 1.0, 0.0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn gradient_is_one_sided_on_border() {
        let r = raster(3, 1, &[0, 0, 255]);
        let field = DepthField::sample(&r, 3, 1);
        assert_eq!(field.gradient_magnitude(0, 0), 0.0);
        assert!((field.gradient_magnitude(2, 0) - 1.0).abs() < 1e-6);
        assert!((field.gradient_magnitude(1, 0) - 1.0).abs() < 1e-6);
    }
}
