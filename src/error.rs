use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which of the two input rasters an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterKind {
    Image,
    DepthMap,
}

impl fmt::Display for RasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::DepthMap => f.write_str("depth map"),
        }
    }
}

/// Library error type for parallax viewer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The image or depth raster could not be read or decoded.
    #[error("failed to load {kind} from {}", path.display())]
    LoadFailure {
        kind: RasterKind,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The colour raster could not be scaled down to the texture limit.
    #[error("failed to downscale {kind} at {}: {reason}", path.display())]
    Downscale {
        kind: RasterKind,
        path: PathBuf,
        reason: String,
    },

    /// The raster decoded but has no pixels.
    #[error("{kind} at {} has zero size", path.display())]
    EmptyRaster { kind: RasterKind, path: PathBuf },

    /// The platform reports no immersive-session capability.
    #[error("immersive sessions are not available on this platform")]
    SessionUnavailable,

    /// The platform rejected session negotiation or setup.
    #[error("failed to enter immersive session: {0}")]
    EnterFailed(String),
}
