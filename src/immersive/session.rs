use std::fmt;
use std::time::Instant;

use glam::{Mat4, Vec3};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use super::controllers::{ControllerAction, ControllerRegistry, GestureMapper};
use super::platform::{
    ImmersivePlatform, ImmersiveSession, ListenerId, ReferenceSpace, SessionEvent, ViewerPose,
};
use crate::config::ImmersiveOptions;
use crate::error::Error;
use crate::events::HostEvent;
use crate::parallax::view::{FAR_PLANE, NEAR_PLANE};

/// Field of view used until the runtime reports a pose.
const FALLBACK_FOV_DEG: f32 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Requesting,
    Active,
    Ending,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Active => "active",
            Self::Ending => "ending",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives an immersive session from negotiation to teardown and owns the
/// image placement inside it.
pub struct ImmersiveSessionManager {
    platform: Box<dyn ImmersivePlatform>,
    options: ImmersiveOptions,
    phase: SessionPhase,
    session: Option<Box<dyn ImmersiveSession>>,
    listener: Option<ListenerId>,
    events: Option<UnboundedReceiver<SessionEvent>>,
    renderer_attached: bool,
    frame_loop_running: bool,
    registry: ControllerRegistry,
    mapper: GestureMapper,
    distance: f32,
    x_offset: f32,
    y_offset: f32,
    pose: Option<ViewerPose>,
    outbox: Vec<HostEvent>,
}

impl ImmersiveSessionManager {
    pub fn new(platform: Box<dyn ImmersivePlatform>, options: ImmersiveOptions) -> Self {
        Self {
            platform,
            mapper: GestureMapper::new(&options),
            distance: options
                .image_distance
                .clamp(ImmersiveOptions::MIN_DISTANCE, ImmersiveOptions::MAX_DISTANCE),
            options,
            phase: SessionPhase::Idle,
            session: None,
            listener: None,
            events: None,
            renderer_attached: false,
            frame_loop_running: false,
            registry: ControllerRegistry::default(),
            x_offset: 0.0,
            y_offset: 0.0,
            pose: None,
            outbox: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn is_available(&self) -> bool {
        self.platform.is_session_supported()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    /// Notifications for the host accumulated since the last call.
    pub fn take_host_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Negotiates a session and takes over rendering.
    ///
    /// Entering while already active is a no-op. A failure after the session
    /// was granted tears down what was set up and returns to idle without a
    /// host notification.
    pub fn enter(&mut self) -> Result<(), Error> {
        match self.phase {
            SessionPhase::Active => return Ok(()),
            SessionPhase::Requesting | SessionPhase::Ending => {
                return Err(Error::EnterFailed(format!(
                    "session is {}",
                    self.phase.as_str()
                )));
            }
            SessionPhase::Idle => {}
        }
        if !self.platform.is_session_supported() {
            return Err(Error::SessionUnavailable);
        }

        self.phase = SessionPhase::Requesting;
        info!("requesting immersive session");
        let session = match pollster::block_on(self.platform.request_session()) {
            Ok(session) => session,
            Err(err) => {
                self.phase = SessionPhase::Idle;
                warn!(error = %err, "immersive session request rejected");
                return Err(Error::EnterFailed(err.to_string()));
            }
        };
        self.session = Some(session);

        if let Err(err) = self.setup_session() {
            warn!(error = %err, "immersive session setup failed; rolling back");
            self.teardown();
            self.phase = SessionPhase::Idle;
            return Err(Error::EnterFailed(err.to_string()));
        }

        self.phase = SessionPhase::Active;
        info!(
            distance = self.distance,
            controllers = self.registry.controllers().len(),
            "immersive session active"
        );
        self.outbox.push(HostEvent::ImmersiveEntered);
        Ok(())
    }

    fn setup_session(&mut self) -> Result<(), super::platform::PlatformError> {
        let Some(session) = self.session.as_mut() else {
            return Err(super::platform::PlatformError::new("session vanished"));
        };

        pollster::block_on(session.request_reference_space(ReferenceSpace::Local))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.listener = Some(session.add_listener(tx)?);
        self.events = Some(rx);

        session.attach_renderer()?;
        self.renderer_attached = true;

        session.start_frame_loop()?;
        self.frame_loop_running = true;

        for source in session.input_sources() {
            self.registry.connect(&source);
        }
        self.pose = None;
        Ok(())
    }

    /// Leaves the session. Returns false when there was none to leave.
    pub fn exit(&mut self) -> bool {
        if self.session.is_none() {
            debug!("exit requested without an immersive session");
            return false;
        }
        info!("exiting immersive session");
        self.phase = SessionPhase::Ending;
        self.teardown();
        self.phase = SessionPhase::Idle;
        self.outbox.push(HostEvent::ImmersiveExitComplete);
        info!("immersive session exit complete");
        true
    }

    /// Releases controllers, listener, frame loop, renderer and session, in
    /// that order. A failing step is logged and the rest still run.
    fn teardown(&mut self) {
        self.registry.clear();

        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Some(id) = self.listener.take() {
            if let Err(err) = session.remove_listener(id) {
                warn!(error = %err, "failed to remove session listener");
            }
        }
        self.events = None;

        if self.frame_loop_running {
            self.frame_loop_running = false;
            if let Err(err) = session.stop_frame_loop() {
                warn!(error = %err, "failed to stop immersive frame loop");
            }
        }

        if self.renderer_attached {
            self.renderer_attached = false;
            if let Err(err) = session.detach_renderer() {
                warn!(error = %err, "failed to detach renderer from session");
            }
        }

        if let Err(err) = session.end() {
            warn!(error = %err, "failed to end immersive session");
        }
        self.pose = None;
    }

    /// One immersive frame: session events, pose and controller polling.
    pub fn on_frame(&mut self, now: Instant) {
        if self.phase != SessionPhase::Active {
            return;
        }

        let mut pending = Vec::new();
        if let Some(rx) = self.events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                pending.push(event);
            }
        }
        for event in pending {
            if self.phase != SessionPhase::Active {
                break;
            }
            self.handle_event(event, now);
        }
        if self.phase != SessionPhase::Active {
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(frame) = session.frame() {
            if let Some(pose) = frame.viewer_pose {
                self.pose = Some(pose);
            }
        }
        let sources = session.input_sources();
        let actions = self.registry.poll(&sources, &mut self.mapper, now);
        for action in actions {
            if self.phase != SessionPhase::Active {
                break;
            }
            self.apply(action);
        }
    }

    fn handle_event(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::End => {
                info!("immersive session ended by platform");
                self.exit();
            }
            SessionEvent::SelectStart(hand) => {
                if let Some(action) = self.mapper.on_select_start(hand) {
                    self.apply(action);
                }
            }
            SessionEvent::SqueezeStart(hand) => {
                if let Some(action) = self.mapper.on_squeeze_start(hand, now) {
                    self.apply(action);
                }
            }
            SessionEvent::SelectEnd(hand) => debug!(hand = hand.as_str(), "trigger released"),
            SessionEvent::SqueezeEnd(hand) => debug!(hand = hand.as_str(), "grip released"),
            SessionEvent::InputSourcesChanged { added, removed } => {
                for source in &added {
                    self.registry.connect(source);
                }
                for id in removed {
                    self.registry.disconnect(id);
                }
            }
        }
    }

    fn apply(&mut self, action: ControllerAction) {
        match action {
            ControllerAction::AdjustDistance(delta) => self.adjust_distance(delta),
            ControllerAction::AdjustX(delta) => {
                self.x_offset = (self.x_offset + delta)
                    .clamp(-ImmersiveOptions::MAX_X_OFFSET, ImmersiveOptions::MAX_X_OFFSET);
                debug!(x = self.x_offset, "image x offset adjusted");
            }
            ControllerAction::AdjustY(delta) => {
                self.y_offset = (self.y_offset + delta)
                    .clamp(-ImmersiveOptions::MAX_Y_OFFSET, ImmersiveOptions::MAX_Y_OFFSET);
                debug!(y = self.y_offset, "image y offset adjusted");
            }
            ControllerAction::ChangeExample(direction) => {
                info!(%direction, "example change requested from controller");
                self.outbox.push(HostEvent::ExampleChange(direction));
            }
            ControllerAction::RequestExit => {
                self.exit();
            }
        }
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Sets the image distance, clamped, whether or not a session is active.
    pub fn set_distance(&mut self, distance: f32) {
        self.distance =
            distance.clamp(ImmersiveOptions::MIN_DISTANCE, ImmersiveOptions::MAX_DISTANCE);
        debug!(distance = self.distance, "image distance set");
    }

    /// Moves the image by `delta` meters; ignored outside an active session.
    pub fn adjust_distance(&mut self, delta: f32) {
        if !self.is_active() {
            return;
        }
        self.set_distance(self.distance + delta);
    }

    pub fn x_offset(&self) -> f32 {
        self.x_offset
    }

    pub fn y_offset(&self) -> f32 {
        self.y_offset
    }

    /// Multiplier applied to the parallax sensitivity of the driven view.
    pub fn sensitivity_scale(&self) -> f32 {
        if self.is_active() {
            self.options.sensitivity_scale
        } else {
            1.0
        }
    }

    /// Places the image plane in front of the viewer.
    pub fn model(&self) -> Mat4 {
        let s = self.options.image_scale;
        Mat4::from_translation(Vec3::new(self.x_offset, self.y_offset, -self.distance))
            * Mat4::from_scale(Vec3::new(s, s, 1.0))
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        match self.pose {
            Some(pose) => pose.view_proj(),
            None => Mat4::perspective_rh(
                FALLBACK_FOV_DEG.to_radians(),
                aspect.max(f32::EPSILON),
                NEAR_PLANE,
                FAR_PLANE,
            ),
        }
    }

    pub fn pose(&self) -> Option<&ViewerPose> {
        self.pose.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::immersive::stub::{SessionCall, SimulatedPlatform, UnavailablePlatform};

    fn manager(platform: &SimulatedPlatform) -> ImmersiveSessionManager {
        ImmersiveSessionManager::new(Box::new(platform.clone()), ImmersiveOptions::default())
    }

    #[test]
    fn unavailable_platform_rejects_enter() {
        let mut m =
            ImmersiveSessionManager::new(Box::new(UnavailablePlatform), ImmersiveOptions::default());
        assert!(!m.is_available());
        assert!(matches!(m.enter(), Err(Error::SessionUnavailable)));
        assert_eq!(m.phase(), SessionPhase::Idle);
    }

    #[test]
    fn enter_sets_up_in_order() {
        let platform = SimulatedPlatform::new();
        let mut m = manager(&platform);
        m.enter().unwrap();
        assert_eq!(m.phase(), SessionPhase::Active);
        assert_eq!(
            platform.calls(),
            vec![
                SessionCall::RequestReferenceSpace,
                SessionCall::AddListener,
                SessionCall::AttachRenderer,
                SessionCall::StartFrameLoop,
            ]
        );
        assert_eq!(m.take_host_events(), vec![HostEvent::ImmersiveEntered]);
        assert!(m.enter().is_ok());
        assert_eq!(platform.sessions_requested(), 1);
    }

    #[test]
    fn exit_tears_down_in_order_once() {
        let platform = SimulatedPlatform::new();
        let mut m = manager(&platform);
        m.enter().unwrap();
        platform.clear_calls();
        m.take_host_events();

        assert!(m.exit());
        assert!(!m.exit());
        assert_eq!(
            platform.calls(),
            vec![
                SessionCall::RemoveListener,
                SessionCall::StopFrameLoop,
                SessionCall::DetachRenderer,
                SessionCall::End,
            ]
        );
        assert_eq!(m.take_host_events(), vec![HostEvent::ImmersiveExitComplete]);
        assert_eq!(m.phase(), SessionPhase::Idle);
        assert!(!m.has_session());
    }

    #[test]
    fn failing_teardown_step_does_not_stop_exit() {
        let platform = SimulatedPlatform::new();
        let mut m = manager(&platform);
        m.enter().unwrap();
        platform.fail_step(SessionCall::StopFrameLoop);
        platform.clear_calls();
        assert!(m.exit());
        assert!(platform.calls().contains(&SessionCall::End));
        assert_eq!(m.phase(), SessionPhase::Idle);
    }

    #[test]
    fn setup_failure_rolls_back_silently() {
        let platform = SimulatedPlatform::new();
        platform.fail_step(SessionCall::AttachRenderer);
        let mut m = manager(&platform);
        assert!(matches!(m.enter(), Err(Error::EnterFailed(_))));
        assert_eq!(m.phase(), SessionPhase::Idle);
        assert!(!m.has_session());
        let calls = platform.calls();
        assert!(calls.contains(&SessionCall::RemoveListener));
        assert!(calls.contains(&SessionCall::End));
        assert!(!calls.contains(&SessionCall::StopFrameLoop));
        assert!(m.take_host_events().is_empty());
    }

    #[test]
    fn rejected_request_returns_to_idle() {
        let platform = SimulatedPlatform::new();
        platform.fail_session_request(true);
        let mut m = manager(&platform);
        assert!(matches!(m.enter(), Err(Error::EnterFailed(_))));
        assert_eq!(m.phase(), SessionPhase::Idle);
    }

    #[test]
    fn distance_is_clamped_and_adjust_needs_session() {
        let platform = SimulatedPlatform::new();
        let mut m = manager(&platform);
        assert_eq!(m.distance(), 3.0);
        m.adjust_distance(1.0);
        assert_eq!(m.distance(), 3.0);
        m.set_distance(42.0);
        assert_eq!(m.distance(), 10.0);
        m.set_distance(0.0);
        assert_eq!(m.distance(), 0.5);
        m.enter().unwrap();
        m.adjust_distance(1.0);
        assert_eq!(m.distance(), 1.5);
    }

    #[test]
    fn sensitivity_scale_only_while_active() {
        let platform = SimulatedPlatform::new();
        let mut m = manager(&platform);
        assert_eq!(m.sensitivity_scale(), 1.0);
        m.enter().unwrap();
        assert!((m.sensitivity_scale() - 0.3).abs() < 1e-6);
        m.exit();
        assert_eq!(m.sensitivity_scale(), 1.0);
    }

    #[test]
    fn model_places_plane_in_front() {
        let platform = SimulatedPlatform::new();
        let m = manager(&platform);
        let p = m.model().transform_point3(Vec3::new(0.5, 0.5, 0.0));
        assert!((p - Vec3::new(1.0, 1.0, -3.0)).length() < 1e-6);
    }
}
