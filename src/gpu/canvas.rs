use tracing::debug;

use super::parallax::DEPTH_FORMAT;

/// Offscreen colour + depth target the views render into. Its size is the
/// logical window size times the pixel ratio, so the ratio trades sharpness
/// for fill rate independently of the surface.
pub struct Canvas {
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl Canvas {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("canvas-color"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("canvas-depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        debug!(width, height, format = ?format, "canvas allocated");
        Self {
            color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            _color: color,
            format,
            width,
            height,
        }
    }

    /// Reallocates when the requested size differs. Returns true if it did.
    pub fn ensure_size(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.width && height == self.height {
            return false;
        }
        *self = Self::new(device, self.format, width, height);
        true
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Canvas dimensions for a logical size and pixel ratio, clamped to the
/// device's texture limit.
pub fn canvas_extent(logical_w: f32, logical_h: f32, ratio: f32, max_dim: u32) -> (u32, u32) {
    let max_dim = max_dim.max(1) as f32;
    let w = (logical_w * ratio).round().clamp(1.0, max_dim);
    let h = (logical_h * ratio).round().clamp(1.0, max_dim);
    (w as u32, h as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_scales_with_ratio() {
        assert_eq!(canvas_extent(800.0, 600.0, 1.5, 8192), (1200, 900));
    }

    #[test]
    fn extent_is_clamped() {
        assert_eq!(canvas_extent(5000.0, 0.0, 2.0, 8192), (8192, 1));
    }
}
