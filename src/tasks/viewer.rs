use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wgpu::{self, SurfaceError};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, KeyEvent, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Fullscreen, Window, WindowAttributes},
};

use crate::{
    config::{Configuration, SceneSource},
    events::{HostEvent, LoadRequest, SceneLoaded, ViewerCommand},
    gpu::{
        blit::BlitPipeline,
        canvas::{Canvas, canvas_extent},
        parallax::ParallaxPipeline,
    },
    immersive::{
        platform::{ControllerId, Gamepad, Handedness, ImmersivePlatform, InputSource, SessionEvent},
        stub::{SimulatedPlatform, UnavailablePlatform},
    },
    parallax::compositor::StereoCompositor,
};

const FOCUS_STEP: f32 = 0.05;
const SIM_LEFT: ControllerId = 0;
const SIM_RIGHT: ControllerId = 1;

#[derive(Debug)]
enum ViewerEvent {
    Cancelled,
}

type SceneReceiver = mpsc::Receiver<SceneLoaded>;
type LoadSender = mpsc::Sender<LoadRequest>;
type HostSender = mpsc::Sender<HostEvent>;
type CommandReceiver = mpsc::Receiver<ViewerCommand>;

/// Channels connecting the window thread to the async side.
pub struct ViewerLinks {
    pub from_loader: SceneReceiver,
    pub to_loader: LoadSender,
    pub to_host: HostSender,
    pub control: CommandReceiver,
}

/// Keyboard-driven stand-in for two tracked controllers.
struct SimulatedControllers {
    platform: SimulatedPlatform,
    left_y: f32,
    right_x: f32,
}

impl SimulatedControllers {
    fn new() -> Self {
        let platform = SimulatedPlatform::new();
        for (id, handedness) in [(SIM_LEFT, Handedness::Left), (SIM_RIGHT, Handedness::Right)] {
            platform.connect_controller(InputSource {
                id,
                handedness,
                gamepad: Some(Gamepad {
                    axes: vec![0.0; 4],
                }),
            });
        }
        Self {
            platform,
            left_y: 0.0,
            right_x: 0.0,
        }
    }

    fn push_axes(&self) {
        self.platform.set_axes(SIM_LEFT, [0.0, 0.0, 0.0, self.left_y]);
        self.platform.set_axes(SIM_RIGHT, [0.0, 0.0, self.right_x, 0.0]);
    }
}

struct ViewerApp {
    cfg: Configuration,
    cancel: CancellationToken,
    links: ViewerLinks,
    initial_scene: Option<SceneSource>,
    platform: Option<Box<dyn ImmersivePlatform>>,
    simulated: Option<SimulatedControllers>,
    window: Option<Arc<Window>>,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    device: Option<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    parallax: Option<ParallaxPipeline>,
    blit: Option<BlitPipeline>,
    canvas: Option<Canvas>,
    blit_bind: Option<wgpu::BindGroup>,
    compositor: Option<StereoCompositor>,
    cursor_visible: bool,
    // last logical cursor position; button events carry none
    cursor: (f32, f32),
}

impl ViewerApp {
    fn new(
        cfg: Configuration,
        cancel: CancellationToken,
        links: ViewerLinks,
        initial_scene: Option<SceneSource>,
        simulate_immersive: bool,
    ) -> Self {
        let (platform, simulated) = if simulate_immersive {
            let sim = SimulatedControllers::new();
            let platform: Box<dyn ImmersivePlatform> = Box::new(sim.platform.clone());
            (platform, Some(sim))
        } else {
            let platform: Box<dyn ImmersivePlatform> = Box::new(UnavailablePlatform);
            (platform, None)
        };
        Self {
            cfg,
            cancel,
            links,
            initial_scene,
            platform: Some(platform),
            simulated,
            window: None,
            surface: None,
            surface_config: None,
            device: None,
            queue: None,
            parallax: None,
            blit: None,
            canvas: None,
            blit_bind: None,
            compositor: None,
            cursor_visible: true,
            cursor: (0.0, 0.0),
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Some(window.clone());
        }

        let attrs = WindowAttributes::default().with_title("Parallax Viewer");
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                Some(window)
            }
            Err(err) => {
                error!(error = %err, "failed to create viewer window");
                None
            }
        }
    }

    fn init_gpu(&mut self, window: Arc<Window>) -> Result<()> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to acquire GPU adapter")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no formats")?;

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("viewer-device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
        }))
        .context("failed to acquire GPU device")?;

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        info!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            "viewer surface configured",
        );

        let scale_factor = window.scale_factor();
        let logical = size.to_logical::<f32>(scale_factor);
        let platform = self
            .platform
            .take()
            .unwrap_or_else(|| Box::new(UnavailablePlatform) as Box<dyn ImmersivePlatform>);
        let mut compositor = StereoCompositor::new(
            self.cfg.clone(),
            platform,
            (logical.width, logical.height),
            scale_factor,
            Instant::now(),
        );
        compositor.set_max_texture_dimension(device.limits().max_texture_dimension_2d);
        info!(
            mode = %compositor.display_mode(),
            pixel_ratio = compositor.pixel_ratio(),
            max_texture_dim = compositor.max_texture_dimension(),
            immersive = compositor.is_immersive_available(),
            "viewer ready"
        );

        self.parallax = Some(ParallaxPipeline::new(&device, format));
        self.blit = Some(BlitPipeline::new(&device, format));
        self.canvas = Some(Canvas::new(&device, format, config.width, config.height));
        self.blit_bind = None;
        self.surface = Some(surface);
        self.surface_config = Some(config);
        self.device = Some(device);
        self.queue = Some(queue);
        self.compositor = Some(compositor);

        if let Some(scene) = self.initial_scene.take() {
            self.apply_command(ViewerCommand::Load {
                image: scene.image,
                depth_map: scene.depth_map,
            });
        }
        Ok(())
    }

    fn scale_factor(&self) -> f64 {
        self.window.as_ref().map_or(1.0, |w| w.scale_factor())
    }

    fn handle_resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        let scale_factor = self.scale_factor();
        let (Some(surface), Some(device), Some(config)) = (
            self.surface.as_ref(),
            self.device.as_ref(),
            self.surface_config.as_mut(),
        ) else {
            return;
        };

        config.width = new_size.width.max(1);
        config.height = new_size.height.max(1);
        surface.configure(device, config);
        debug!(
            width = config.width,
            height = config.height,
            "viewer surface resized",
        );

        if let Some(compositor) = self.compositor.as_mut() {
            let logical = new_size.to_logical::<f32>(scale_factor);
            compositor.resize((logical.width, logical.height), scale_factor);
        }

        self.request_redraw();
    }

    fn send_load(&self, req: LoadRequest) {
        if let Err(err) = self.links.to_loader.try_send(req) {
            warn!("failed to queue scene load: {err}");
        }
    }

    fn flush_host_events(&mut self) {
        let Some(compositor) = self.compositor.as_mut() else {
            return;
        };
        for event in compositor.take_host_events() {
            if let Err(err) = self.links.to_host.try_send(event) {
                warn!("failed to notify host: {err}");
            }
        }
    }

    fn apply_command(&mut self, cmd: ViewerCommand) {
        let scale_factor = self.scale_factor();
        let Some(compositor) = self.compositor.as_mut() else {
            return;
        };
        let mut load = None;
        match cmd {
            ViewerCommand::Load { image, depth_map } => {
                load = Some(compositor.load(image, depth_map));
            }
            ViewerCommand::Reload => match compositor.reload() {
                Some(req) => load = Some(req),
                None => debug!("reload requested before any scene was loaded"),
            },
            ViewerCommand::SetDisplayMode(mode) => compositor.set_display_mode(mode),
            ViewerCommand::SetFocus(focus) => compositor.set_focus(focus),
            ViewerCommand::SetPixelRatio(ratio) => compositor.set_pixel_ratio(ratio, scale_factor),
            ViewerCommand::SetMouseXOffset(offset) => compositor.set_mouse_x_offset(offset),
            ViewerCommand::SetExpandRadius(radius) => compositor.set_expand_radius(radius),
            ViewerCommand::SetMeshResolution(res) => compositor.set_mesh_resolution(res),
            ViewerCommand::SetIdleMovement(enabled) => compositor.set_idle_movement_enabled(enabled),
            ViewerCommand::SetIdleMovementAfter(after) => compositor.set_idle_movement_after(after),
            ViewerCommand::EnterImmersive => {
                // failures are reported to the host through the event queue
                let _ = compositor.enter_immersive();
            }
            ViewerCommand::ExitImmersive => {
                compositor.exit_immersive();
            }
            ViewerCommand::SetImmersiveDistance(d) => compositor.set_immersive_distance(d),
            ViewerCommand::AdjustImmersiveDistance(d) => compositor.adjust_immersive_distance(d),
        }
        if let Some(req) = load {
            self.send_load(req);
        }
        self.flush_host_events();
        self.request_redraw();
    }

    fn drain_channels(&mut self) {
        while let Ok(loaded) = self.links.from_loader.try_recv() {
            if let Some(compositor) = self.compositor.as_mut() {
                compositor.attach_scene(loaded);
            }
        }
        while let Ok(cmd) = self.links.control.try_recv() {
            self.apply_command(cmd);
        }
    }

    fn toggle_fullscreen(&self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.fullscreen().is_some() {
            info!("leaving fullscreen");
            window.set_fullscreen(None);
        } else {
            info!("entering fullscreen");
            window.set_fullscreen(Some(Fullscreen::Borderless(window.current_monitor())));
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        let pressed = event.state == ElementState::Pressed;

        if let Key::Named(named) = &event.logical_key {
            let axis = match named {
                NamedKey::ArrowUp => Some((true, 1.0)),
                NamedKey::ArrowDown => Some((true, -1.0)),
                NamedKey::ArrowRight => Some((false, 1.0)),
                NamedKey::ArrowLeft => Some((false, -1.0)),
                _ => None,
            };
            if let (Some((vertical, value)), Some(sim)) = (axis, self.simulated.as_mut()) {
                let value = if pressed { value } else { 0.0 };
                if vertical {
                    sim.left_y = value;
                } else {
                    sim.right_x = value;
                }
                sim.push_axes();
                return;
            }
        }

        if !pressed || event.repeat {
            return;
        }
        match &event.logical_key {
            Key::Named(NamedKey::Escape) => {
                info!("escape pressed; closing viewer");
                event_loop.exit();
            }
            Key::Character(c) => match c.as_str() {
                "f" | "F" => self.toggle_fullscreen(),
                "v" | "V" => {
                    let active = self
                        .compositor
                        .as_ref()
                        .is_some_and(|c| c.is_immersive_active());
                    self.apply_command(if active {
                        ViewerCommand::ExitImmersive
                    } else {
                        ViewerCommand::EnterImmersive
                    });
                }
                "m" | "M" => {
                    if let Some(mode) = self.compositor.as_ref().map(|c| c.display_mode().next()) {
                        self.apply_command(ViewerCommand::SetDisplayMode(mode));
                    }
                }
                "+" | "=" => {
                    if let Some(focus) = self.compositor.as_ref().map(|c| c.focus()) {
                        self.apply_command(ViewerCommand::SetFocus(focus + FOCUS_STEP));
                    }
                }
                "-" => {
                    if let Some(focus) = self.compositor.as_ref().map(|c| c.focus()) {
                        self.apply_command(ViewerCommand::SetFocus(focus - FOCUS_STEP));
                    }
                }
                "1" | "2" | "3" | "4" => {
                    let Some(sim) = self.simulated.as_ref() else {
                        return;
                    };
                    let session_event = match c.as_str() {
                        "1" => SessionEvent::SelectStart(Handedness::Left),
                        "2" => SessionEvent::SqueezeStart(Handedness::Left),
                        "3" => SessionEvent::SelectStart(Handedness::Right),
                        _ => SessionEvent::SqueezeStart(Handedness::Right),
                    };
                    if sim.platform.emit(session_event) == 0 {
                        debug!("controller input ignored outside an immersive session");
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn logical_point(&self, position: PhysicalPosition<f64>) -> (f32, f32) {
        let p = position.to_logical::<f32>(self.scale_factor());
        (p.x, p.y)
    }

    fn sync_cursor(&mut self) {
        let Some(visible) = self.compositor.as_ref().map(|c| c.cursor_visible()) else {
            return;
        };
        if visible != self.cursor_visible {
            self.cursor_visible = visible;
            if let Some(window) = self.window.as_ref() {
                window.set_cursor_visible(visible);
            }
        }
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = self.window.clone() else {
            return;
        };

        if let Some(compositor) = self.compositor.as_mut() {
            compositor.tick(Instant::now());
        }
        self.flush_host_events();
        self.sync_cursor();

        let (
            Some(surface),
            Some(device),
            Some(queue),
            Some(parallax),
            Some(blit),
            Some(canvas),
            Some(compositor),
        ) = (
            self.surface.as_ref(),
            self.device.as_ref(),
            self.queue.as_ref(),
            self.parallax.as_ref(),
            self.blit.as_ref(),
            self.canvas.as_mut(),
            self.compositor.as_mut(),
        )
        else {
            return;
        };

        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Outdated) | Err(SurfaceError::Lost) => {
                info!("viewer surface lost; reconfiguring");
                let size = window.inner_size();
                self.handle_resize(size);
                return;
            }
            Err(SurfaceError::OutOfMemory) => {
                error!("viewer surface out of memory; exiting event loop");
                event_loop.exit();
                return;
            }
            Err(SurfaceError::Timeout) => {
                warn!("viewer surface acquisition timed out");
                return;
            }
            Err(SurfaceError::Other) => {
                warn!("viewer surface reported an unknown error; retrying");
                let size = window.inner_size();
                self.handle_resize(size);
                return;
            }
        };

        let (lw, lh) = compositor.logical_size();
        let max_dim = device.limits().max_texture_dimension_2d;
        let (cw, ch) = canvas_extent(lw, lh, compositor.pixel_ratio(), max_dim);
        if canvas.ensure_size(device, cw, ch) || self.blit_bind.is_none() {
            self.blit_bind = Some(blit.bind(device, canvas));
        }

        let target = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("viewer-encoder"),
        });

        compositor.render(device, queue, parallax, &mut encoder, canvas);
        if let Some(bind) = self.blit_bind.as_ref() {
            blit.draw(&mut encoder, &target, bind);
        }

        queue.submit(std::iter::once(encoder.finish()));
        window.pre_present_notify();
        frame.present();
    }

    fn request_redraw(&self) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

impl ApplicationHandler<ViewerEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }

        let Some(window) = self.ensure_window(event_loop) else {
            event_loop.exit();
            return;
        };

        if self.device.is_none() {
            if let Err(err) = self.init_gpu(window) {
                error!(error = ?err, "failed to initialize GPU state");
                event_loop.exit();
                return;
            }
        }

        self.request_redraw();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("viewer window close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                self.handle_resize(new_size);
            }
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                let size = window.inner_size();
                let _ = inner_size_writer.request_inner_size(size);
                self.handle_resize(size);
            }
            WindowEvent::CursorMoved { position, .. } => {
                let (x, y) = self.logical_point(position);
                self.cursor = (x, y);
                if let Some(compositor) = self.compositor.as_mut() {
                    compositor.on_pointer_move(x, y, Instant::now());
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let (x, y) = self.cursor;
                if let Some(compositor) = self.compositor.as_mut() {
                    match state {
                        ElementState::Pressed => compositor.on_pointer_down(x, y, Instant::now()),
                        ElementState::Released => compositor.on_pointer_up(),
                    }
                }
            }
            WindowEvent::Touch(touch) => {
                let (x, y) = self.logical_point(touch.location);
                if let Some(compositor) = self.compositor.as_mut() {
                    let now = Instant::now();
                    match touch.phase {
                        TouchPhase::Started => compositor.on_touch_start(x, y, now),
                        TouchPhase::Moved => compositor.on_touch_move(x, y, now),
                        TouchPhase::Ended | TouchPhase::Cancelled => compositor.on_touch_end(),
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                self.handle_key(event_loop, &event);
            }
            WindowEvent::RedrawRequested => {
                self.draw(event_loop);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.drain_channels();
        // views ease toward their targets every frame
        self.request_redraw();
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::Cancelled => {
                info!("viewer received cancellation event");
                if let Some(compositor) = self.compositor.as_mut() {
                    compositor.exit_immersive();
                }
                event_loop.exit();
            }
        }
    }
}

pub fn run_windowed(
    cfg: Configuration,
    links: ViewerLinks,
    initial_scene: Option<SceneSource>,
    simulate_immersive: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .context("failed to build viewer event loop")?;
    let proxy = event_loop.create_proxy();

    let cancel_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = proxy.send_event(ViewerEvent::Cancelled);
        })
    };

    let mut app = ViewerApp::new(cfg, cancel, links, initial_scene, simulate_immersive);
    let run_result = event_loop.run_app(&mut app);
    cancel_task.abort();

    run_result.context("viewer event loop failed")
}
