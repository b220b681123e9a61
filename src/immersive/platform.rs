//! Abstraction over a head-mounted display runtime.

use futures::future::BoxFuture;
use glam::Mat4;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Failure reported by the immersive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type ControllerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handedness {
    Left,
    Right,
    Unknown,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Unknown => "unknown",
        }
    }
}

/// Snapshot of a controller's analog state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gamepad {
    /// Standard mapping: [touchpad x, touchpad y, thumbstick x, thumbstick y].
    pub axes: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputSource {
    pub id: ControllerId,
    pub handedness: Handedness,
    pub gamepad: Option<Gamepad>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerPose {
    /// Head transform in the reference space.
    pub transform: Mat4,
    pub projection: Mat4,
}

impl ViewerPose {
    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.transform.inverse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrFrame {
    pub viewer_pose: Option<ViewerPose>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    End,
    SelectStart(Handedness),
    SelectEnd(Handedness),
    SqueezeStart(Handedness),
    SqueezeEnd(Handedness),
    InputSourcesChanged {
        added: Vec<InputSource>,
        removed: Vec<ControllerId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSpace {
    Local,
}

/// A negotiated immersive session.
pub trait ImmersiveSession: Send {
    fn request_reference_space(
        &mut self,
        space: ReferenceSpace,
    ) -> BoxFuture<'static, Result<(), PlatformError>>;

    /// Subscribes to session events; they are delivered on `sink`.
    fn add_listener(&mut self, sink: UnboundedSender<SessionEvent>)
    -> Result<ListenerId, PlatformError>;
    fn remove_listener(&mut self, id: ListenerId) -> Result<(), PlatformError>;

    fn attach_renderer(&mut self) -> Result<(), PlatformError>;
    fn detach_renderer(&mut self) -> Result<(), PlatformError>;

    fn start_frame_loop(&mut self) -> Result<(), PlatformError>;
    fn stop_frame_loop(&mut self) -> Result<(), PlatformError>;

    /// The current frame, if the frame loop is running.
    fn frame(&mut self) -> Option<XrFrame>;
    fn input_sources(&self) -> Vec<InputSource>;

    fn end(&mut self) -> Result<(), PlatformError>;
}

/// Entry point to the runtime.
pub trait ImmersivePlatform: Send {
    fn is_session_supported(&self) -> bool;
    fn request_session(&self) -> BoxFuture<'static, Result<Box<dyn ImmersiveSession>, PlatformError>>;
}
