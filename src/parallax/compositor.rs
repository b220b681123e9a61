use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec2;
use tracing::{debug, info, warn};

use crate::config::{Configuration, DisplayMode};
use crate::error::Error;
use crate::events::{HostEvent, LoadId, LoadRequest, PreparedScene, SceneLoaded};
use crate::gpu::canvas::Canvas;
use crate::gpu::parallax::{ChannelMask, ParallaxPipeline};
use crate::immersive::platform::ImmersivePlatform;
use crate::immersive::session::{ImmersiveSessionManager, SessionPhase};
use crate::parallax::idle::{IdleMotionSimulator, IdleTick};
use crate::parallax::shader::ParallaxUniforms;
use crate::parallax::view::{ParallaxView, ViewOptions};
use crate::processing::layout::Rect;

/// Which renderer owns the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    /// Every view renders into its eye rectangle with the flat camera.
    Flat,
    /// The immersive session renders view 1 with the head pose.
    Immersive,
}

impl RenderStrategy {
    pub fn for_phase(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Active => Self::Immersive,
            _ => Self::Flat,
        }
    }
}

/// Where one view sits: the container its camera and pointer mapping use,
/// the eye rectangle its pixels land in, and its colour mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLayout {
    pub container: Rect,
    pub eye: Rect,
    pub mask: ChannelMask,
}

/// Eye layouts for `mode` in a window of `width` x `height` logical pixels.
///
/// Stereo modes render each eye at full window size. `hsbs` squeezes the
/// two eyes horizontally into the two halves, `fsbs` squeezes them in both
/// axes and centres them vertically, and `anaglyph` overlays them with
/// complementary colour masks. The second view's container is offset by
/// half a window so pointer fan-out lands at the same relative spot.
pub fn eye_layouts(mode: DisplayMode, width: f32, height: f32) -> Vec<EyeLayout> {
    let window = Rect::new(0.0, 0.0, width, height);
    let right_container = Rect::new(width / 2.0, 0.0, width, height);
    match mode {
        DisplayMode::Full => vec![EyeLayout {
            container: window,
            eye: window,
            mask: ChannelMask::All,
        }],
        DisplayMode::HalfSideBySide => vec![
            EyeLayout {
                container: window,
                eye: Rect::fraction_of(0.0, 0.0, 0.5, 1.0, window),
                mask: ChannelMask::All,
            },
            EyeLayout {
                container: right_container,
                eye: Rect::fraction_of(0.5, 0.0, 0.5, 1.0, window),
                mask: ChannelMask::All,
            },
        ],
        DisplayMode::FullSideBySide => vec![
            EyeLayout {
                container: window,
                eye: Rect::fraction_of(0.0, 0.25, 0.5, 0.5, window),
                mask: ChannelMask::All,
            },
            EyeLayout {
                container: right_container,
                eye: Rect::fraction_of(0.5, 0.25, 0.5, 0.5, window),
                mask: ChannelMask::All,
            },
        ],
        DisplayMode::Anaglyph => vec![
            EyeLayout {
                container: window,
                eye: window,
                mask: ChannelMask::Red,
            },
            EyeLayout {
                container: right_container,
                eye: window,
                mask: ChannelMask::Cyan,
            },
        ],
    }
}

/// Owns the views, routes input to them and exposes the control surface.
pub struct StereoCompositor {
    settings: Configuration,
    pixel_ratio: f32,
    width: f32,
    height: f32,
    views: Vec<ParallaxView>,
    masks: Vec<ChannelMask>,
    idle: IdleMotionSimulator,
    cursor_visible: bool,
    touch_anchor: Option<Vec2>,
    dragging: bool,
    max_texture_dim: u32,
    immersive: ImmersiveSessionManager,
    sources: Option<(PathBuf, PathBuf)>,
    load_id: LoadId,
    scene: Option<Arc<PreparedScene>>,
    outbox: Vec<HostEvent>,
}

impl StereoCompositor {
    pub fn new(
        settings: Configuration,
        platform: Box<dyn ImmersivePlatform>,
        logical_size: (f32, f32),
        scale_factor: f64,
        now: Instant,
    ) -> Self {
        let pixel_ratio = settings.effective_pixel_ratio(scale_factor);
        let idle = IdleMotionSimulator::new(
            settings.idle_movement_enabled,
            settings.idle_movement_after,
            now,
        );
        let immersive = ImmersiveSessionManager::new(platform, settings.immersive.clone());
        let mut compositor = Self {
            settings,
            pixel_ratio,
            width: logical_size.0.max(1.0),
            height: logical_size.1.max(1.0),
            views: Vec::new(),
            masks: Vec::new(),
            idle,
            cursor_visible: true,
            touch_anchor: None,
            dragging: false,
            max_texture_dim: wgpu::Limits::default().max_texture_dimension_2d,
            immersive,
            sources: None,
            load_id: 0,
            scene: None,
            outbox: Vec::new(),
        };
        compositor.rebuild_views();
        compositor
    }

    fn view_options(&self, index: usize) -> ViewOptions {
        ViewOptions {
            focus: self.settings.focus,
            mouse_x_offset: if index == 0 {
                0.0
            } else {
                -self.settings.mouse_x_offset
            },
            mouse_sensitivity: self.settings.mouse_sensitivity,
            mesh_depth: self.settings.mesh_depth,
        }
    }

    /// Destroys the current views and creates the set the mode calls for.
    fn rebuild_views(&mut self) {
        for view in &mut self.views {
            view.destroy();
        }
        let layouts = eye_layouts(self.settings.display_mode, self.width, self.height);
        self.views = layouts
            .iter()
            .enumerate()
            .map(|(i, l)| ParallaxView::new(l.container, l.eye, self.view_options(i)))
            .collect();
        self.masks = layouts.iter().map(|l| l.mask).collect();
        debug!(
            mode = %self.settings.display_mode,
            views = self.views.len(),
            "views rebuilt"
        );
    }

    fn attach_current_scene(&mut self) {
        let Some(scene) = self.scene.clone() else {
            return;
        };
        let scale = self.immersive.sensitivity_scale();
        for (i, view) in self.views.iter_mut().enumerate() {
            view.attach_scene(scene.clone());
            if i == 0 {
                view.set_sensitivity_scale(scale);
            }
        }
    }

    pub fn views(&self) -> &[ParallaxView] {
        &self.views
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn settings(&self) -> &Configuration {
        &self.settings
    }

    pub fn possible_display_modes(&self) -> &'static [&'static str] {
        DisplayMode::NAMES
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.settings.display_mode
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        if mode == self.settings.display_mode && !self.views.is_empty() {
            return;
        }
        info!(mode = %mode, "display mode changed");
        self.settings.display_mode = mode;
        self.rebuild_views();
        self.attach_current_scene();
    }

    /// Accepts a mode name; unknown names fall back to `full`.
    pub fn set_display_mode_named(&mut self, raw: &str) {
        self.set_display_mode(DisplayMode::parse_lenient(raw));
    }

    /// Starts a new load cycle: views are torn down and recreated empty, and
    /// the returned request must be handed to the loader.
    pub fn load(&mut self, image: PathBuf, depth_map: PathBuf) -> LoadRequest {
        self.load_id += 1;
        self.scene = None;
        self.rebuild_views();
        self.sources = Some((image.clone(), depth_map.clone()));
        info!(
            id = self.load_id,
            image = %image.display(),
            depth = %depth_map.display(),
            "loading scene"
        );
        LoadRequest {
            id: self.load_id,
            image,
            depth_map,
            expand_radius: self.settings.expand_depthmap_radius,
            mesh_resolution: self.settings.mesh_resolution,
            mesh_depth: self.settings.mesh_depth,
            max_texture_dim: self.max_texture_dim,
        }
    }

    /// Reloads the current sources with the current settings.
    pub fn reload(&mut self) -> Option<LoadRequest> {
        let (image, depth) = self.sources.clone()?;
        Some(self.load(image, depth))
    }

    pub fn current_load(&self) -> LoadId {
        self.load_id
    }

    pub fn sources(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.sources.as_ref().map(|(i, d)| (i, d))
    }

    /// Attaches a finished scene. Returns false for a superseded load.
    pub fn attach_scene(&mut self, loaded: SceneLoaded) -> bool {
        if loaded.id != self.load_id {
            debug!(id = loaded.id, current = self.load_id, "dropping stale scene");
            return false;
        }
        self.scene = Some(loaded.scene);
        self.attach_current_scene();
        true
    }

    pub fn has_scene(&self) -> bool {
        self.scene.is_some()
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dim
    }

    /// Device texture limit used for subsequent load requests.
    pub fn set_max_texture_dimension(&mut self, max_dim: u32) {
        self.max_texture_dim = max_dim.max(1);
    }

    /// Real pointer input: resets the idle timer and fans out. While the
    /// button is held in a side-by-side mode it also sets the stereo offset.
    pub fn on_pointer_move(&mut self, x: f32, y: f32, now: Instant) {
        self.idle.note_input(now);
        if self.dragging {
            self.drag_stereo_offset(x);
        }
        self.fan_out(x, y);
    }

    pub fn on_pointer_down(&mut self, x: f32, y: f32, now: Instant) {
        self.dragging = true;
        self.on_pointer_move(x, y, now);
    }

    pub fn on_pointer_up(&mut self) {
        self.dragging = false;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Only the left half counts: its horizontal position scales the
    /// offset from 0 up to the maximum.
    fn drag_stereo_offset(&mut self, x: f32) {
        if !self.settings.display_mode.is_side_by_side() {
            return;
        }
        let half = self.width / 2.0;
        let offset = (x / 2.0) / half * Configuration::MAX_MOUSE_X_OFFSET;
        self.set_mouse_x_offset(offset);
    }

    pub fn on_touch_start(&mut self, x: f32, y: f32, now: Instant) {
        self.touch_anchor = Some(Vec2::new(x, y));
        self.on_pointer_move(x, y, now);
    }

    pub fn on_touch_move(&mut self, x: f32, y: f32, now: Instant) {
        self.touch_anchor = Some(Vec2::new(x, y));
        self.on_pointer_move(x, y, now);
    }

    pub fn on_touch_end(&mut self) {
        self.touch_anchor = None;
    }

    pub fn touch_anchor(&self) -> Option<Vec2> {
        self.touch_anchor
    }

    /// View 1 gets the pointer as is, view 2 shifted half a window right.
    fn fan_out(&mut self, x: f32, y: f32) {
        let half = self.width / 2.0;
        for (i, view) in self.views.iter_mut().enumerate() {
            if i == 0 {
                view.on_pointer_move(x, y);
            } else {
                view.on_pointer_move(x + half, y);
            }
        }
    }

    /// Per-frame work: idle motion, immersive input and view easing.
    pub fn tick(&mut self, now: Instant) {
        match self.idle.tick(self.window_rect(), now) {
            IdleTick::Simulated(p) => {
                self.cursor_visible = false;
                self.fan_out(p.x, p.y);
            }
            IdleTick::Inactive => self.cursor_visible = true,
        }

        self.immersive.on_frame(now);
        self.collect_immersive_events();

        let scale = self.immersive.sensitivity_scale();
        if let Some(first) = self.views.first_mut() {
            first.set_sensitivity_scale(scale);
        }
        for view in &mut self.views {
            view.advance_frame();
        }
    }

    fn collect_immersive_events(&mut self) {
        let events = self.immersive.take_host_events();
        self.outbox.extend(events);
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    pub fn take_host_events(&mut self) -> Vec<HostEvent> {
        self.collect_immersive_events();
        std::mem::take(&mut self.outbox)
    }

    fn window_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    pub fn logical_size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    /// New window size; meshes are kept, only layout is recomputed.
    pub fn resize(&mut self, logical_size: (f32, f32), scale_factor: f64) {
        self.width = logical_size.0.max(1.0);
        self.height = logical_size.1.max(1.0);
        if self.settings.device_pixel_ratio.is_none() {
            self.apply_pixel_ratio(self.settings.effective_pixel_ratio(scale_factor));
        }
        let layouts = eye_layouts(self.settings.display_mode, self.width, self.height);
        for (view, layout) in self.views.iter_mut().zip(&layouts) {
            view.resize(layout.container, layout.eye);
        }
    }

    pub fn focus(&self) -> f32 {
        self.settings.focus
    }

    pub fn set_focus(&mut self, focus: f32) {
        let focus = focus.clamp(0.0, 1.0);
        self.settings.focus = focus;
        for view in &mut self.views {
            view.set_focus(focus);
        }
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// `None` returns to following the window scale factor.
    pub fn set_pixel_ratio(&mut self, ratio: Option<f32>, scale_factor: f64) {
        let ratio = match ratio {
            Some(r) if r.is_finite() && r > 0.0 => Some(r),
            Some(r) => {
                warn!(ratio = r, "ignoring non-positive pixel ratio");
                return;
            }
            None => None,
        };
        self.settings.device_pixel_ratio = ratio;
        self.apply_pixel_ratio(self.settings.effective_pixel_ratio(scale_factor));
    }

    fn apply_pixel_ratio(&mut self, ratio: f32) {
        self.pixel_ratio = ratio;
    }

    pub fn mouse_x_offset(&self) -> f32 {
        self.settings.mouse_x_offset
    }

    pub fn set_mouse_x_offset(&mut self, offset: f32) {
        let offset = offset.clamp(0.0, Configuration::MAX_MOUSE_X_OFFSET);
        self.settings.mouse_x_offset = offset;
        if let Some(second) = self.views.get_mut(1) {
            second.set_mouse_x_offset(-offset);
        }
    }

    pub fn expand_radius(&self) -> u32 {
        self.settings.expand_depthmap_radius
    }

    /// Takes effect on the next load.
    pub fn set_expand_radius(&mut self, radius: u32) {
        self.settings.expand_depthmap_radius = radius;
    }

    pub fn mesh_resolution(&self) -> u32 {
        self.settings.mesh_resolution
    }

    /// Takes effect on the next load.
    pub fn set_mesh_resolution(&mut self, resolution: u32) {
        self.settings.mesh_resolution = resolution.max(2);
    }

    pub fn idle_movement_enabled(&self) -> bool {
        self.idle.is_enabled()
    }

    pub fn set_idle_movement_enabled(&mut self, enabled: bool) {
        self.settings.idle_movement_enabled = enabled;
        self.idle.set_enabled(enabled);
    }

    pub fn idle_movement_after(&self) -> Duration {
        self.idle.after()
    }

    pub fn set_idle_movement_after(&mut self, after: Duration) {
        self.settings.idle_movement_after = after;
        self.idle.set_after(after);
    }

    pub fn render_strategy(&self) -> RenderStrategy {
        RenderStrategy::for_phase(self.immersive.phase())
    }

    pub fn immersive(&self) -> &ImmersiveSessionManager {
        &self.immersive
    }

    pub fn enter_immersive(&mut self) -> Result<(), Error> {
        let result = self.immersive.enter();
        if let Err(err) = &result {
            warn!(error = %err, "could not enter immersive mode");
            self.outbox.push(HostEvent::ImmersiveEnterFailed(err.to_string()));
        }
        let scale = self.immersive.sensitivity_scale();
        if let Some(first) = self.views.first_mut() {
            first.set_sensitivity_scale(scale);
        }
        self.collect_immersive_events();
        result
    }

    pub fn exit_immersive(&mut self) -> bool {
        let exited = self.immersive.exit();
        if let Some(first) = self.views.first_mut() {
            first.set_sensitivity_scale(1.0);
        }
        self.collect_immersive_events();
        exited
    }

    pub fn is_immersive_available(&self) -> bool {
        self.immersive.is_available()
    }

    pub fn is_immersive_active(&self) -> bool {
        self.immersive.is_active()
    }

    pub fn immersive_distance(&self) -> f32 {
        self.immersive.distance()
    }

    pub fn set_immersive_distance(&mut self, distance: f32) {
        self.immersive.set_distance(distance);
    }

    pub fn adjust_immersive_distance(&mut self, delta: f32) {
        self.immersive.adjust_distance(delta);
    }

    /// Records this frame into `canvas` with the active strategy.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipeline: &ParallaxPipeline,
        encoder: &mut wgpu::CommandEncoder,
        canvas: &Canvas,
    ) {
        let (cw, ch) = canvas.size();
        let ratio = cw as f32 / self.width.max(1.0);
        let strategy = self.render_strategy();

        let drawn: Vec<usize> = match strategy {
            RenderStrategy::Flat => (0..self.views.len()).collect(),
            RenderStrategy::Immersive => vec![0],
        };

        for &i in &drawn {
            let uniforms = match strategy {
                RenderStrategy::Flat => self.views[i].uniforms(),
                RenderStrategy::Immersive => ParallaxUniforms::new(
                    self.immersive.view_proj(cw as f32 / ch.max(1) as f32),
                    self.immersive.model(),
                    self.views[i].params(),
                ),
            };
            if let Some(res) = self.views[i].prepare_gpu(device, queue, pipeline) {
                res.write_uniforms(queue, &uniforms);
            }
        }

        let mut first = true;
        for &i in &drawn {
            let view = &self.views[i];
            let color_load = if first {
                wgpu::LoadOp::Clear(wgpu::Color::BLACK)
            } else {
                wgpu::LoadOp::Load
            };
            first = false;

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("parallax-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: canvas.color_view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: canvas.depth_view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            let Some(res) = view.gpu() else {
                continue;
            };

            let (mask, viewport, scissor) = match strategy {
                RenderStrategy::Flat => (
                    self.masks.get(i).copied().unwrap_or(ChannelMask::All),
                    view.eye().to_pixels(ratio, cw, ch),
                    view.scissor().to_pixels(ratio, cw, ch),
                ),
                RenderStrategy::Immersive => {
                    let full = self.window_rect().to_pixels(ratio, cw, ch);
                    (ChannelMask::All, full, full)
                }
            };
            if viewport.is_empty() || scissor.is_empty() {
                continue;
            }
            pass.set_pipeline(pipeline.pipeline(mask));
            pass.set_viewport(
                viewport.x as f32,
                viewport.y as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );
            pass.set_scissor_rect(scissor.x, scissor.y, scissor.width, scissor.height);
            res.draw(&mut pass);
        }
    }
}
