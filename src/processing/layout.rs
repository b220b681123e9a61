//! Aspect-fit and letterbox math shared by the views and the compositor.

use crate::processing::mesh::CAMERA_DISTANCE;

/// Vertical field of view of the flat camera, in degrees.
pub const CAMERA_FOV_DEG: f32 = 45.0;

/// Axis-aligned rectangle in logical pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }

    /// Rectangle expressed as fractions of `outer`, mapped onto `outer`.
    pub fn fraction_of(fx: f32, fy: f32, fw: f32, fh: f32, outer: Rect) -> Self {
        Self::new(
            outer.x + fx * outer.width,
            outer.y + fy * outer.height,
            fw * outer.width,
            fh * outer.height,
        )
    }

    /// Converts to whole device pixels, clamped to a `bound_w` x `bound_h` target.
    pub fn to_pixels(&self, ratio: f32, bound_w: u32, bound_h: u32) -> PixelRect {
        let x0 = (self.x * ratio).round().clamp(0.0, bound_w as f32);
        let y0 = (self.y * ratio).round().clamp(0.0, bound_h as f32);
        let x1 = ((self.x + self.width) * ratio)
            .round()
            .clamp(0.0, bound_w as f32);
        let y1 = ((self.y + self.height) * ratio)
            .round()
            .clamp(0.0, bound_h as f32);
        PixelRect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0).max(0.0) as u32,
            height: (y1 - y0).max(0.0) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// World-space height visible at the plane for the flat camera.
pub fn visible_height() -> f32 {
    2.0 * (CAMERA_FOV_DEG.to_radians() / 2.0).tan() * CAMERA_DISTANCE
}

/// Uniform mesh scale that fits a plane of `plane_w` x `plane_h` into a
/// container: height-bound when the container is wider than the plane,
/// width-bound otherwise.
pub fn fit_scale(container_w: f32, container_h: f32, plane_w: f32, plane_h: f32) -> f32 {
    let container_aspect = container_w.max(1.0) / container_h.max(1.0);
    let plane_aspect = plane_w / plane_h;
    let vh = visible_height();
    let vw = vh * container_aspect;
    let scale = if container_aspect > plane_aspect {
        vh / plane_h
    } else {
        vw / plane_w
    };
    if scale.is_finite() { scale } else { 1.0 }
}

/// Largest rectangle of `image_aspect` centred inside `container`.
pub fn letterbox(container: Rect, image_aspect: f32) -> Rect {
    if container.is_empty() || !(image_aspect.is_finite() && image_aspect > 0.0) {
        return container;
    }
    let (w, h) = if container.aspect() > image_aspect {
        (container.height * image_aspect, container.height)
    } else {
        (container.width, container.width / image_aspect)
    };
    let (ox, oy) = center_offset(w, h, container.width, container.height);
    Rect::new(container.x + ox, container.y + oy, w, h)
}

pub fn center_offset(inner_w: f32, inner_h: f32, outer_w: f32, outer_h: f32) -> (f32, f32) {
    let ox = (outer_w - inner_w).max(0.0) / 2.0;
    let oy = (outer_h - inner_h).max(0.0) / 2.0;
    (ox, oy)
}

/// Largest size with the source's aspect whose edges are both within
/// `max_dim`. Sources already inside the bound are returned unchanged.
pub fn fit_within(src_w: u32, src_h: u32, max_dim: u32) -> (u32, u32) {
    let max_dim = max_dim.max(1);
    if src_w <= max_dim && src_h <= max_dim {
        return (src_w, src_h);
    }
    let iw = src_w.max(1) as f32;
    let ih = src_h.max(1) as f32;
    let scale = (max_dim as f32 / iw).min(max_dim as f32 / ih);
    let w = (iw * scale).round().clamp(1.0, max_dim as f32);
    let h = (ih * scale).round().clamp(1.0, max_dim as f32);
    (w as u32, h as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_within_keeps_small_rasters() {
        assert_eq!(fit_within(640, 480, 8192), (640, 480));
        assert_eq!(fit_within(8192, 8192, 8192), (8192, 8192));
    }

    #[test]
    fn fit_within_scales_the_long_edge_down() {
        assert_eq!(fit_within(16392, 4, 16384), (16384, 4));
        assert_eq!(fit_within(6000, 12000, 4096), (2048, 4096));
        assert_eq!(fit_within(100_000, 10, 8192), (8192, 1));
    }

    #[test]
    fn visible_height_matches_camera() {
        assert!((visible_height() - 3.3137085).abs() < 1e-4);
    }

    #[test]
    fn wide_container_is_height_bound() {
        let s = fit_scale(1600.0, 800.0, 1.0, 1.0);
        assert!((s - visible_height()).abs() < 1e-5);
    }

    #[test]
    fn tall_container_is_width_bound() {
        let s = fit_scale(800.0, 800.0, 2.0, 1.0);
        assert!((s - visible_height() / 2.0).abs() < 1e-5);
    }

    #[test]
    fn letterbox_pillarboxes_narrow_image() {
        let r = letterbox(Rect::new(0.0, 0.0, 1000.0, 500.0), 1.0);
        assert_eq!(r, Rect::new(250.0, 0.0, 500.0, 500.0));
    }

    #[test]
    fn letterbox_bands_wide_image() {
        let r = letterbox(Rect::new(100.0, 0.0, 400.0, 400.0), 2.0);
        assert_eq!(r, Rect::new(100.0, 100.0, 400.0, 200.0));
    }

    #[test]
    fn pixel_rect_is_clamped_to_target() {
        let px = Rect::new(-10.0, 5.0, 200.0, 100.0).to_pixels(2.0, 300, 300);
        assert_eq!(
            px,
            PixelRect {
                x: 0,
                y: 10,
                width: 300,
                height: 200
            }
        );
    }
}
