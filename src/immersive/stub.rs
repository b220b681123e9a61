//! Platforms without a real head-mounted display runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{self, BoxFuture, FutureExt};
use glam::Mat4;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use super::platform::{
    ControllerId, Gamepad, ImmersivePlatform, ImmersiveSession, InputSource, ListenerId,
    PlatformError, ReferenceSpace, SessionEvent, ViewerPose, XrFrame,
};

/// Reports no immersive capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePlatform;

impl ImmersivePlatform for UnavailablePlatform {
    fn is_session_supported(&self) -> bool {
        false
    }

    fn request_session(&self) -> BoxFuture<'static, Result<Box<dyn ImmersiveSession>, PlatformError>> {
        future::ready(Err(PlatformError::new("no immersive runtime present"))).boxed()
    }
}

/// Session operations recorded by [`SimulatedPlatform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionCall {
    RequestReferenceSpace,
    AddListener,
    RemoveListener,
    AttachRenderer,
    DetachRenderer,
    StartFrameLoop,
    StopFrameLoop,
    End,
}

#[derive(Debug)]
struct SimState {
    supported: bool,
    fail_request: bool,
    failing: Vec<SessionCall>,
    calls: Vec<SessionCall>,
    sessions_requested: u32,
    listeners: HashMap<u64, UnboundedSender<SessionEvent>>,
    next_listener: u64,
    input_sources: Vec<InputSource>,
    pose: ViewerPose,
    frame_loop: bool,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            supported: true,
            fail_request: false,
            failing: Vec::new(),
            calls: Vec::new(),
            sessions_requested: 0,
            listeners: HashMap::new(),
            next_listener: 0,
            input_sources: Vec::new(),
            pose: ViewerPose {
                transform: Mat4::IDENTITY,
                projection: Mat4::perspective_rh(90f32.to_radians(), 1.0, 0.1, 1000.0),
            },
            frame_loop: false,
        }
    }
}

/// Headless stand-in for a head-mounted display. Clones share state, so a
/// handle kept by the window (or a test) can inject controller input and
/// session events into the session the manager holds.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlatform {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_supported(&self, supported: bool) {
        self.lock().supported = supported;
    }

    pub fn fail_session_request(&self, fail: bool) {
        self.lock().fail_request = fail;
    }

    /// Makes every later call of `call` report an error.
    pub fn fail_step(&self, call: SessionCall) {
        self.lock().failing.push(call);
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn sessions_requested(&self) -> u32 {
        self.lock().sessions_requested
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_frame_loop_running(&self) -> bool {
        self.lock().frame_loop
    }

    /// Delivers `event` to every listener; returns how many received it.
    pub fn emit(&self, event: SessionEvent) -> usize {
        let state = self.lock();
        state
            .listeners
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn connect_controller(&self, source: InputSource) {
        {
            let mut state = self.lock();
            state.input_sources.retain(|s| s.id != source.id);
            state.input_sources.push(source.clone());
        }
        self.emit(SessionEvent::InputSourcesChanged {
            added: vec![source],
            removed: Vec::new(),
        });
    }

    pub fn disconnect_controller(&self, id: ControllerId) {
        self.lock().input_sources.retain(|s| s.id != id);
        self.emit(SessionEvent::InputSourcesChanged {
            added: Vec::new(),
            removed: vec![id],
        });
    }

    /// Overwrites a controller's axes; unknown ids are ignored.
    pub fn set_axes(&self, id: ControllerId, axes: [f32; 4]) {
        let mut state = self.lock();
        if let Some(source) = state.input_sources.iter_mut().find(|s| s.id == id) {
            source.gamepad = Some(Gamepad {
                axes: axes.to_vec(),
            });
        }
    }

    pub fn set_head_transform(&self, transform: Mat4) {
        self.lock().pose.transform = transform;
    }
}

impl ImmersivePlatform for SimulatedPlatform {
    fn is_session_supported(&self) -> bool {
        self.lock().supported
    }

    fn request_session(&self) -> BoxFuture<'static, Result<Box<dyn ImmersiveSession>, PlatformError>> {
        let result = {
            let mut state = self.lock();
            state.sessions_requested += 1;
            if state.fail_request {
                Err(PlatformError::new("simulated session request refused"))
            } else {
                info!("simulated immersive session granted");
                Ok(Box::new(SimulatedSession {
                    state: self.state.clone(),
                }) as Box<dyn ImmersiveSession>)
            }
        };
        future::ready(result).boxed()
    }
}

struct SimulatedSession {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSession {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: SessionCall) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.failing.contains(&call) {
            return Err(PlatformError::new(format!("simulated failure in {call:?}")));
        }
        Ok(())
    }
}

impl ImmersiveSession for SimulatedSession {
    fn request_reference_space(
        &mut self,
        space: ReferenceSpace,
    ) -> BoxFuture<'static, Result<(), PlatformError>> {
        debug!(?space, "reference space requested");
        future::ready(self.record(SessionCall::RequestReferenceSpace)).boxed()
    }

    fn add_listener(
        &mut self,
        sink: UnboundedSender<SessionEvent>,
    ) -> Result<ListenerId, PlatformError> {
        self.record(SessionCall::AddListener)?;
        let mut state = self.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.insert(id, sink);
        Ok(ListenerId(id))
    }

    fn remove_listener(&mut self, id: ListenerId) -> Result<(), PlatformError> {
        self.record(SessionCall::RemoveListener)?;
        self.lock().listeners.remove(&id.0);
        Ok(())
    }

    fn attach_renderer(&mut self) -> Result<(), PlatformError> {
        self.record(SessionCall::AttachRenderer)
    }

    fn detach_renderer(&mut self) -> Result<(), PlatformError> {
        self.record(SessionCall::DetachRenderer)
    }

    fn start_frame_loop(&mut self) -> Result<(), PlatformError> {
        self.record(SessionCall::StartFrameLoop)?;
        self.lock().frame_loop = true;
        Ok(())
    }

    fn stop_frame_loop(&mut self) -> Result<(), PlatformError> {
        self.record(SessionCall::StopFrameLoop)?;
        self.lock().frame_loop = false;
        Ok(())
    }

    fn frame(&mut self) -> Option<XrFrame> {
        let state = self.lock();
        state.frame_loop.then_some(XrFrame {
            viewer_pose: Some(state.pose),
        })
    }

    fn input_sources(&self) -> Vec<InputSource> {
        self.lock().input_sources.clone()
    }

    fn end(&mut self) -> Result<(), PlatformError> {
        self.record(SessionCall::End)?;
        let mut state = self.lock();
        state.listeners.clear();
        state.frame_loop = false;
        Ok(())
    }
}
