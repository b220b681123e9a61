use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::DisplayMode;
use crate::processing::mesh::DisplacementMesh;

/// Identifies one load cycle; replies for older ids are stale.
pub type LoadId = u64;

/// Ask the loader to decode an image/depth pair and build its mesh.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub id: LoadId,
    pub image: PathBuf,
    pub depth_map: PathBuf,
    pub expand_radius: u32,
    pub mesh_resolution: u32,
    pub mesh_depth: f32,
    /// Largest texture edge the GPU accepts; the colour raster is scaled
    /// down to fit.
    pub max_texture_dim: u32,
}

/// Decoded colour raster ready for upload.
#[derive(Debug, Clone)]
pub struct PreparedImageCpu {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Everything a view needs to render a loaded scene.
#[derive(Debug)]
pub struct PreparedScene {
    pub image: PreparedImageCpu,
    pub depth_path: PathBuf,
    pub mesh: Arc<DisplacementMesh>,
}

#[derive(Debug, Clone)]
pub struct SceneLoaded {
    pub id: LoadId,
    pub scene: Arc<PreparedScene>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExampleDirection {
    Next,
    Previous,
}

impl ExampleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Previous => "previous",
        }
    }
}

impl fmt::Display for ExampleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications from the viewer to its host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ExampleChange(ExampleDirection),
    ImmersiveEntered,
    ImmersiveEnterFailed(String),
    ImmersiveExitComplete,
    LoadFailed { id: LoadId, message: String },
}

/// Control surface exposed to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    Load { image: PathBuf, depth_map: PathBuf },
    Reload,
    SetDisplayMode(DisplayMode),
    SetFocus(f32),
    SetPixelRatio(Option<f32>),
    SetMouseXOffset(f32),
    SetExpandRadius(u32),
    SetMeshResolution(u32),
    SetIdleMovement(bool),
    SetIdleMovementAfter(std::time::Duration),
    EnterImmersive,
    ExitImmersive,
    SetImmersiveDistance(f32),
    AdjustImmersiveDistance(f32),
}
