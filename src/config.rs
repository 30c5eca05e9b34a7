use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::camera::CameraConfig;
use crate::capture::ScreenshotRequest;
use crate::light::LightConfig;

/// Frame cap used when neither the config nor the monitor provide one.
pub const FALLBACK_FPS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "meshview".to_string(),
            width: 1024,
            height: 768,
        }
    }
}

/// How the mesh is shaded and rasterised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Interpolated vertex normals instead of per-face normals.
    pub smooth: bool,
    /// Overlay the triangle edges.
    pub wireframe: bool,
    /// Draw the filled surface.
    pub fill: bool,
    pub cull_back_faces: bool,
    pub clear_color: [f32; 3],
    pub wireframe_color: [f32; 3],
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            smooth: true,
            wireframe: false,
            fill: true,
            cull_back_faces: false,
            clear_color: [252.0 / 255.0, 224.0 / 255.0, 239.0 / 255.0],
            wireframe_color: [1.0, 0.0, 0.0],
        }
    }
}

/// Viewer settings, read from an optional TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub window: WindowConfig,
    pub camera: CameraConfig,
    pub light: LightConfig,
    pub display: DisplayConfig,
    /// Frame cap; the monitor refresh rate when absent.
    pub target_fps: Option<u32>,
    /// Fit loaded meshes into a unit box around the origin.
    pub normalize_mesh: bool,
    pub screenshots: ScreenshotRequest,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            camera: CameraConfig::default(),
            light: LightConfig::default(),
            display: DisplayConfig::default(),
            target_fps: None,
            normalize_mesh: true,
            screenshots: ScreenshotRequest::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        let config: Self = toml::from_str(data).context("invalid viewer configuration")?;
        config
            .camera
            .validate()
            .context("invalid viewer configuration")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("in {}", path.display()))
    }

    /// Frame cap to use given the monitor's refresh rate in millihertz.
    ///
    /// An explicit `target_fps` wins, zero meaning unthrottled.
    pub fn resolve_fps(&self, refresh_millihertz: Option<u32>) -> u32 {
        self.target_fps.unwrap_or_else(|| {
            refresh_millihertz
                .map(|mhz| (mhz + 500) / 1000)
                .filter(|&fps| fps > 0)
                .unwrap_or(FALLBACK_FPS)
        })
    }
}
