use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};
use tracing::{debug, warn};

use crate::events::PreparedScene;
use crate::gpu::parallax::{ParallaxPipeline, ViewResources};
use crate::parallax::shader::{DisplacementParams, EDGE_WIDTH, ParallaxUniforms};
use crate::processing::layout::{self, CAMERA_FOV_DEG, Rect};
use crate::processing::mesh::{CAMERA_DISTANCE, DisplacementMesh};

/// Per-frame low-pass factor pulling the animated offset toward the pointer.
pub const EASING: f32 = 0.05;
pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewOptions {
    pub focus: f32,
    pub mouse_x_offset: f32,
    pub mouse_sensitivity: f32,
    pub mesh_depth: f32,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            focus: 0.25,
            mouse_x_offset: 0.0,
            mouse_sensitivity: 0.5,
            mesh_depth: 1.0,
        }
    }
}

/// Whether a `width` x `height` raster can become a texture on a device
/// whose 2D limit is `max_dim`.
pub fn fits_texture_limit(width: u32, height: u32, max_dim: u32) -> bool {
    width <= max_dim && height <= max_dim
}

/// One rendered parallax surface.
///
/// `container` is the rectangle the view's camera and pointer mapping are
/// defined over; `eye` is where its pixels land in the window. They differ
/// in the side-by-side modes, where an eye is the container squeezed.
pub struct ParallaxView {
    container: Rect,
    eye: Rect,
    options: ViewOptions,
    sensitivity_scale: f32,
    pointer: Vec2,
    target: Vec2,
    params: DisplacementParams,
    scene: Option<Arc<PreparedScene>>,
    scale: f32,
    scissor: Rect,
    frame_scheduled: bool,
    gpu: Option<ViewResources>,
}

impl ParallaxView {
    /// Creates a view in the pre-load state; it renders nothing until a
    /// scene is attached.
    pub fn new(container: Rect, eye: Rect, options: ViewOptions) -> Self {
        Self {
            container,
            eye,
            options,
            sensitivity_scale: 1.0,
            pointer: Vec2::ZERO,
            target: Vec2::ZERO,
            params: DisplacementParams {
                focus: options.focus,
                mesh_depth: options.mesh_depth,
                sensitivity: options.mouse_sensitivity,
                ..Default::default()
            },
            scene: None,
            scale: 1.0,
            scissor: Rect::new(0.0, 0.0, container.width, container.height),
            frame_scheduled: true,
            gpu: None,
        }
    }

    /// Holds the scene (its mesh is shared with the other views) and fits
    /// it to the container.
    pub fn attach_scene(&mut self, scene: Arc<PreparedScene>) {
        if !self.frame_scheduled {
            debug!("ignoring scene for destroyed view");
            return;
        }
        self.scene = Some(scene);
        self.gpu = None;
        self.update_layout();
    }

    pub fn has_scene(&self) -> bool {
        self.scene.is_some()
    }

    pub fn mesh(&self) -> Option<&Arc<DisplacementMesh>> {
        self.scene.as_ref().map(|s| &s.mesh)
    }

    /// Maps a window-space pointer to the raw offset: normalized to [-1, 1]
    /// over the container, biased by the stereo offset and mirrored on x.
    pub fn on_pointer_move(&mut self, x: f32, y: f32) {
        let w = self.container.width.max(1.0);
        let h = self.container.height.max(1.0);
        let mut mx = ((x - self.container.x) / w * 2.0 - 1.0).clamp(-1.0, 1.0);
        let my = ((y - self.container.y) / h * 2.0 - 1.0).clamp(-1.0, 1.0);
        mx += 2.0 * self.options.mouse_x_offset;
        self.pointer = Vec2::new(-mx, my);
    }

    pub fn set_focus(&mut self, focus: f32) {
        self.options.focus = focus;
    }

    pub fn set_mouse_x_offset(&mut self, offset: f32) {
        self.options.mouse_x_offset = offset;
    }

    /// Extra multiplier on the shader sensitivity (immersive comfort).
    pub fn set_sensitivity_scale(&mut self, scale: f32) {
        self.sensitivity_scale = scale;
    }

    pub fn focus(&self) -> f32 {
        self.options.focus
    }

    pub fn mouse_x_offset(&self) -> f32 {
        self.options.mouse_x_offset
    }

    pub fn pointer(&self) -> Vec2 {
        self.pointer
    }

    pub fn target(&self) -> Vec2 {
        self.target
    }

    pub fn params(&self) -> &DisplacementParams {
        &self.params
    }

    pub fn container(&self) -> Rect {
        self.container
    }

    pub fn eye(&self) -> Rect {
        self.eye
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_frame_scheduled(&self) -> bool {
        self.frame_scheduled
    }

    /// Recomputes mesh scale and scissor; the mesh itself is kept.
    pub fn resize(&mut self, container: Rect, eye: Rect) {
        self.container = container;
        self.eye = eye;
        self.update_layout();
    }

    fn update_layout(&mut self) {
        let local = Rect::new(0.0, 0.0, self.container.width, self.container.height);
        let Some(scene) = self.scene.as_ref() else {
            self.scissor = local;
            return;
        };
        let mesh = &scene.mesh;
        self.scale = layout::fit_scale(
            self.container.width,
            self.container.height,
            mesh.plane_width(),
            mesh.plane_height(),
        );
        let image_aspect = if scene.image.width > 0 && scene.image.height > 0 {
            scene.image.width as f32 / scene.image.height as f32
        } else {
            mesh.plane_aspect()
        };
        self.scissor = layout::letterbox(local, image_aspect);
    }

    /// Eases the animated offset toward the pointer and refreshes the
    /// uniform set.
    pub fn advance_frame(&mut self) {
        if !self.frame_scheduled {
            return;
        }
        let factor = 0.3 + 1.4 * self.options.focus;
        let goal = self.pointer * factor * self.options.mouse_sensitivity;
        self.target += (goal - self.target) * EASING;

        self.params.mouse_delta = Vec2::new(self.target.x, -self.target.y);
        self.params.focus = self.options.focus;
        self.params.mesh_depth = self.options.mesh_depth;
        self.params.sensitivity = self.options.mouse_sensitivity * self.sensitivity_scale;
        self.params.edge_width = EDGE_WIDTH;
    }

    pub fn view_proj(&self) -> Mat4 {
        let aspect = self.container.aspect();
        let proj = Mat4::perspective_rh(CAMERA_FOV_DEG.to_radians(), aspect, NEAR_PLANE, FAR_PLANE);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, CAMERA_DISTANCE), Vec3::ZERO, Vec3::Y);
        proj * view
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_scale(Vec3::new(self.scale, self.scale, 1.0))
    }

    pub fn uniforms(&self) -> ParallaxUniforms {
        ParallaxUniforms::new(self.view_proj(), self.model(), &self.params)
    }

    /// Scissor in window logical coordinates: the letterboxed image inside
    /// the container, carried into the eye rectangle.
    pub fn scissor(&self) -> Rect {
        let sx = self.eye.width / self.container.width.max(1.0);
        let sy = self.eye.height / self.container.height.max(1.0);
        Rect::new(
            self.eye.x + self.scissor.x * sx,
            self.eye.y + self.scissor.y * sy,
            self.scissor.width * sx,
            self.scissor.height * sy,
        )
    }

    /// Uploads the attached scene on first use. A colour raster larger
    /// than the device accepts is skipped rather than handed to wgpu.
    pub fn prepare_gpu(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipeline: &ParallaxPipeline,
    ) -> Option<&ViewResources> {
        if !self.frame_scheduled {
            return None;
        }
        if self.gpu.is_none() {
            let scene = self.scene.as_ref()?;
            let max_dim = device.limits().max_texture_dimension_2d;
            if !fits_texture_limit(scene.image.width, scene.image.height, max_dim) {
                warn!(
                    width = scene.image.width,
                    height = scene.image.height,
                    max_dim,
                    "colour raster exceeds the texture limit; not uploading"
                );
                return None;
            }
            self.gpu = Some(ViewResources::upload(
                device,
                queue,
                pipeline,
                &scene.image,
                &scene.mesh,
            ));
            debug!(vertices = scene.mesh.vertex_count(), "view resources uploaded");
        }
        self.gpu.as_ref()
    }

    pub fn gpu(&self) -> Option<&ViewResources> {
        self.gpu.as_ref()
    }

    /// Stops frame scheduling, then releases mesh, scene and GPU resources.
    /// Safe to call more than once.
    pub fn destroy(&mut self) {
        if !self.frame_scheduled && self.scene.is_none() && self.gpu.is_none() {
            return;
        }
        self.frame_scheduled = false;
        self.gpu = None;
        self.scene = None;
        debug!("parallax view destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PreparedImageCpu;
    use crate::processing::depth_field::DepthRaster;
    use std::path::PathBuf;

    fn scene(w: u32, h: u32) -> Arc<PreparedScene> {
        let raster = DepthRaster::new(w, h, vec![128; (w * h) as usize]).unwrap();
        Arc::new(PreparedScene {
            image: PreparedImageCpu {
                path: PathBuf::from("photo.png"),
                width: w,
                height: h,
                pixels: vec![0; (w * h * 4) as usize],
            },
            depth_path: PathBuf::from("depth.png"),
            mesh: Arc::new(DisplacementMesh::build(&raster, 64, 1.0)),
        })
    }

    fn view(offset: f32) -> ParallaxView {
        let rect = Rect::new(0.0, 0.0, 800.0, 600.0);
        ParallaxView::new(
            rect,
            rect,
            ViewOptions {
                mouse_x_offset: offset,
                ..Default::default()
            },
        )
    }

    #[test]
    fn centre_pointer_converges_to_zero() {
        let mut v = view(0.0);
        v.on_pointer_move(400.0, 300.0);
        assert!(v.pointer().length() < 1e-6);
        for _ in 0..200 {
            v.advance_frame();
        }
        assert!(v.target().length() < 1e-6);
    }

    #[test]
    fn pointer_is_clamped_and_mirrored() {
        let mut v = view(0.0);
        v.on_pointer_move(-500.0, 10_000.0);
        assert_eq!(v.pointer(), Vec2::new(1.0, 1.0));
        v.on_pointer_move(800.0, 0.0);
        assert_eq!(v.pointer(), Vec2::new(-1.0, -1.0));
    }

    #[test]
    fn stereo_offset_biases_x_after_clamp() {
        let mut v = view(-0.2);
        v.on_pointer_move(400.0, 300.0);
        assert!((v.pointer().x - 0.4).abs() < 1e-6);
    }

    #[test]
    fn target_eases_with_focus_factor() {
        let mut v = view(0.0);
        v.set_focus(0.5);
        v.on_pointer_move(0.0, 300.0);
        v.advance_frame();
        // goal = 1.0 * (0.3 + 0.7) * 0.5
        assert!((v.target().x - 0.5 * EASING).abs() < 1e-6);
        assert!((v.params().mouse_delta.x - v.target().x).abs() < 1e-6);
        assert_eq!(v.params().focus, 0.5);
    }

    #[test]
    fn mouse_delta_flips_y() {
        let mut v = view(0.0);
        v.on_pointer_move(400.0, 600.0);
        v.advance_frame();
        assert!(v.target().y > 0.0);
        assert!(v.params().mouse_delta.y < 0.0);
    }

    #[test]
    fn sensitivity_scale_applies_to_uniforms() {
        let mut v = view(0.0);
        v.set_sensitivity_scale(0.3);
        v.advance_frame();
        assert!((v.params().sensitivity - 0.15).abs() < 1e-6);
    }

    #[test]
    fn attach_fits_mesh_and_letterboxes() {
        let mut v = view(0.0);
        assert!(!v.has_scene());
        v.attach_scene(scene(100, 100));
        assert!(v.has_scene());
        assert!((v.scale() - layout::visible_height()).abs() < 1e-5);
        assert_eq!(v.scissor(), Rect::new(100.0, 0.0, 600.0, 600.0));
    }

    #[test]
    fn resize_keeps_mesh() {
        let mut v = view(0.0);
        v.attach_scene(scene(100, 50));
        let before = v.mesh().cloned().unwrap();
        let rect = Rect::new(0.0, 0.0, 400.0, 400.0);
        v.resize(rect, Rect::new(0.0, 100.0, 200.0, 200.0));
        assert!(Arc::ptr_eq(v.mesh().unwrap(), &before));
        assert_eq!(v.scissor(), Rect::new(0.0, 150.0, 200.0, 100.0));
    }

    #[test]
    fn views_share_one_mesh() {
        let shared = scene(40, 20);
        let mut left = view(0.0);
        let mut right = view(-0.2);
        left.attach_scene(shared.clone());
        right.attach_scene(shared.clone());
        assert!(Arc::ptr_eq(left.mesh().unwrap(), &shared.mesh));
        assert!(Arc::ptr_eq(right.mesh().unwrap(), &shared.mesh));
        left.destroy();
        assert!(right.has_scene());
    }

    #[test]
    fn texture_limit_check() {
        assert!(fits_texture_limit(16384, 4, 16384));
        assert!(!fits_texture_limit(16392, 4, 16384));
        assert!(!fits_texture_limit(4, 8193, 8192));
    }

    #[test]
    fn destroy_is_idempotent_and_stops_frames() {
        let mut v = view(0.0);
        v.attach_scene(scene(10, 10));
        v.destroy();
        assert!(!v.is_frame_scheduled());
        assert!(!v.has_scene());
        v.destroy();
        v.attach_scene(scene(10, 10));
        assert!(!v.has_scene());
    }
}
