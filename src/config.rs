use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde::de::Deserializer;
use tracing::warn;

/// How the one or two parallax views are composed on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Single mono view.
    #[default]
    Full,
    /// Half side-by-side: both eyes squeezed horizontally into one screen.
    HalfSideBySide,
    /// Full side-by-side: both eyes scaled by half in both axes.
    FullSideBySide,
    /// Red/cyan overlay of both eyes.
    Anaglyph,
}

impl DisplayMode {
    pub const ALL: &'static [Self] = &[
        Self::Full,
        Self::HalfSideBySide,
        Self::FullSideBySide,
        Self::Anaglyph,
    ];
    pub const NAMES: &'static [&'static str] = &["full", "hsbs", "fsbs", "anaglyph"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::HalfSideBySide => "hsbs",
            Self::FullSideBySide => "fsbs",
            Self::Anaglyph => "anaglyph",
        }
    }

    /// Number of views the mode composes.
    pub fn view_count(&self) -> usize {
        match self {
            Self::Full => 1,
            _ => 2,
        }
    }

    /// Both eyes share the screen side by side.
    pub fn is_side_by_side(&self) -> bool {
        matches!(self, Self::HalfSideBySide | Self::FullSideBySide)
    }

    /// Parses a mode name, falling back to `full` for anything unrecognized.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.parse() {
            Ok(mode) => mode,
            Err(_) => {
                warn!(mode = raw, "unknown display mode; falling back to full");
                Self::Full
            }
        }
    }

    /// The mode after this one, wrapping around.
    pub fn next(&self) -> Self {
        let idx = Self::ALL.iter().position(|m| m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        for mode in Self::ALL {
            if raw.eq_ignore_ascii_case(mode.as_str()) {
                return Ok(*mode);
            }
        }
        Err(anyhow::anyhow!(
            "unknown display mode '{}', expected one of: {}",
            raw,
            Self::NAMES.join(", ")
        ))
    }
}

impl<'de> Deserialize<'de> for DisplayMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}

/// One image / depth-map pair the host can cycle through.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SceneSource {
    pub image: PathBuf,
    pub depth_map: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ImmersiveOptions {
    /// Initial distance of the image plane from the viewer, in meters.
    pub image_distance: f32,
    /// Uniform scale applied to the mesh while immersive.
    pub image_scale: f32,
    /// Multiplier applied to the parallax sensitivity while immersive.
    pub sensitivity_scale: f32,
    /// Distance moved per trigger/grip press, in meters.
    pub discrete_step: f32,
    /// Meters per frame per unit of thumbstick deflection.
    pub thumbstick_sensitivity: f32,
    pub thumbstick_deadzone: f32,
    /// Deflection the right thumbstick must exceed to change example.
    pub example_deadzone: f32,
    #[serde(with = "humantime_serde")]
    pub example_cooldown: Duration,
    /// Two right-grip presses inside this window request exit.
    #[serde(with = "humantime_serde")]
    pub exit_double_tap: Duration,
}

impl ImmersiveOptions {
    pub const MIN_DISTANCE: f32 = 0.5;
    pub const MAX_DISTANCE: f32 = 10.0;
    pub const MAX_X_OFFSET: f32 = 5.0;
    pub const MAX_Y_OFFSET: f32 = 3.0;

    fn validate(&self) -> Result<()> {
        ensure!(
            (Self::MIN_DISTANCE..=Self::MAX_DISTANCE).contains(&self.image_distance),
            "immersive.image-distance must be within [{}, {}]",
            Self::MIN_DISTANCE,
            Self::MAX_DISTANCE
        );
        ensure!(self.image_scale > 0.0, "immersive.image-scale must be positive");
        ensure!(
            self.sensitivity_scale >= 0.0,
            "immersive.sensitivity-scale must not be negative"
        );
        ensure!(
            self.discrete_step > 0.0,
            "immersive.discrete-step must be positive"
        );
        ensure!(
            (0.0..1.0).contains(&self.thumbstick_deadzone),
            "immersive.thumbstick-deadzone must be within [0, 1)"
        );
        ensure!(
            (0.0..1.0).contains(&self.example_deadzone),
            "immersive.example-deadzone must be within [0, 1)"
        );
        Ok(())
    }
}

impl Default for ImmersiveOptions {
    fn default() -> Self {
        Self {
            image_distance: 3.0,
            image_scale: 2.0,
            sensitivity_scale: 0.3,
            discrete_step: 0.5,
            thumbstick_sensitivity: 0.1,
            thumbstick_deadzone: 0.1,
            example_deadzone: 0.5,
            example_cooldown: Duration::from_millis(1000),
            exit_double_tap: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Stereo composition of the views.
    pub display_mode: DisplayMode,
    /// Depth that stays still while the pointer moves (0 = far, 1 = no parallax).
    pub focus: f32,
    /// Render resolution relative to logical pixels. `None` follows the
    /// window scale factor, capped at 2.
    pub device_pixel_ratio: Option<f32>,
    /// Dilation passes applied to the depth map before meshing.
    pub expand_depthmap_radius: u32,
    /// Upper bound on mesh vertices per axis.
    pub mesh_resolution: u32,
    /// Z extent of the displaced mesh for depth value 255.
    pub mesh_depth: f32,
    pub mouse_sensitivity: f32,
    /// Horizontal pointer bias of the secondary stereo view.
    pub mouse_x_offset: f32,
    pub idle_movement_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub idle_movement_after: Duration,
    pub immersive: ImmersiveOptions,
    /// Image / depth-map pairs for next/previous navigation.
    pub scenes: Vec<SceneSource>,
}

impl Configuration {
    pub const MAX_MOUSE_X_OFFSET: f32 = 0.4;
    pub const MAX_AUTO_PIXEL_RATIO: f32 = 2.0;

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&self.focus),
            "focus must be within [0, 1]"
        );
        if let Some(ratio) = self.device_pixel_ratio {
            ensure!(
                ratio.is_finite() && ratio > 0.0,
                "device-pixel-ratio must be positive"
            );
        }
        ensure!(
            self.mesh_resolution >= 2,
            "mesh-resolution must be at least 2"
        );
        ensure!(
            self.mesh_depth.is_finite() && self.mesh_depth >= 0.0,
            "mesh-depth must not be negative"
        );
        ensure!(
            self.mouse_sensitivity.is_finite() && self.mouse_sensitivity >= 0.0,
            "mouse-sensitivity must not be negative"
        );
        ensure!(
            (0.0..=Self::MAX_MOUSE_X_OFFSET).contains(&self.mouse_x_offset),
            "mouse-x-offset must be within [0, {}]",
            Self::MAX_MOUSE_X_OFFSET
        );
        self.immersive.validate()?;
        Ok(self)
    }

    /// Pixel ratio to render with given the window's scale factor.
    pub fn effective_pixel_ratio(&self, scale_factor: f64) -> f32 {
        match self.device_pixel_ratio {
            Some(ratio) => ratio,
            None => {
                let platform = scale_factor as f32;
                if platform.is_finite() && platform > 0.0 {
                    platform.min(Self::MAX_AUTO_PIXEL_RATIO)
                } else {
                    1.0
                }
            }
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Full,
            focus: 0.25,
            device_pixel_ratio: None,
            expand_depthmap_radius: 7,
            mesh_resolution: 1024,
            mesh_depth: 1.0,
            mouse_sensitivity: 0.5,
            mouse_x_offset: 0.2,
            idle_movement_enabled: true,
            idle_movement_after: Duration::from_millis(3000),
            immersive: ImmersiveOptions::default(),
            scenes: Vec::new(),
        }
    }
}
