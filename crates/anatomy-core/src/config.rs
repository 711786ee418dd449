//! Viewer configuration loading and defaults

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub controls: ControlsConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub editor: EditorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Vertical field of view in degrees
    #[serde(default = "default_fov")]
    pub fov_degrees: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    /// Fixed point the camera looks at when a model is mounted
    #[serde(default)]
    pub look_at: Vec3,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: default_fov(),
            near: default_near(),
            far: default_far(),
            look_at: Vec3::ZERO,
        }
    }
}

fn default_fov() -> f32 {
    45.0
}

fn default_near() -> f32 {
    0.1
}

fn default_far() -> f32 {
    1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlsConfig {
    /// Exponential smoothing factor for zoom and focus
    #[serde(default = "default_damping")]
    pub damping: f32,
    /// Radians per pixel of drag
    #[serde(default = "default_rotate_sensitivity")]
    pub rotate_sensitivity: f32,
    /// Fraction of the distance per wheel step
    #[serde(default = "default_zoom_speed")]
    pub zoom_speed: f32,
    /// Fraction of the distance per pixel of pan
    #[serde(default = "default_pan_speed")]
    pub pan_speed: f32,
    #[serde(default = "default_min_distance")]
    pub min_distance: f32,
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    #[serde(default = "default_true")]
    pub auto_rotate: bool,
    /// Radians per second
    #[serde(default = "default_auto_rotate_speed")]
    pub auto_rotate_speed: f32,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            rotate_sensitivity: default_rotate_sensitivity(),
            zoom_speed: default_zoom_speed(),
            pan_speed: default_pan_speed(),
            min_distance: default_min_distance(),
            max_distance: default_max_distance(),
            auto_rotate: true,
            auto_rotate_speed: default_auto_rotate_speed(),
        }
    }
}

fn default_damping() -> f32 {
    0.15
}

fn default_rotate_sensitivity() -> f32 {
    0.005
}

fn default_zoom_speed() -> f32 {
    0.1
}

fn default_pan_speed() -> f32 {
    0.002
}

fn default_min_distance() -> f32 {
    1.5
}

fn default_max_distance() -> f32 {
    20.0
}

fn default_auto_rotate_speed() -> f32 {
    0.2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_true")]
    pub show: bool,
    /// Number of cells from the center to the edge
    #[serde(default = "default_grid_extent")]
    pub half_extent: u32,
    #[serde(default = "default_grid_spacing")]
    pub spacing: f32,
    #[serde(default = "default_grid_alpha")]
    pub alpha: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            show: true,
            half_extent: default_grid_extent(),
            spacing: default_grid_spacing(),
            alpha: default_grid_alpha(),
        }
    }
}

fn default_grid_extent() -> u32 {
    10
}

fn default_grid_spacing() -> f32 {
    0.5
}

fn default_grid_alpha() -> f32 {
    0.4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Prefix for relative part sources
    #[serde(default = "default_assets_path")]
    pub base_path: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            base_path: default_assets_path(),
        }
    }
}

fn default_assets_path() -> String {
    "models".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// HTTP(S) base URL of the annotation service; empty means same origin
    #[serde(default)]
    pub http_url: String,
    /// JSON data file used by the native offline backend
    #[serde(default)]
    pub data_file: Option<String>,
}

/// Retry policy for background persistence (layer visibility writes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl PersistenceConfig {
    /// Delay before attempt number `attempt` (1-based) is retried
    pub fn backoff(&self, attempt: u32) -> f64 {
        self.initial_backoff_secs * self.backoff_factor.powi(attempt.saturating_sub(1) as i32)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> f64 {
    1.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Camera distance after flying to a pin
    #[serde(default = "default_fly_distance")]
    pub fly_distance: f32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            fly_distance: default_fly_distance(),
        }
    }
}

fn default_fly_distance() -> f32 {
    3.0
}

impl ViewerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controls;
        if !(c.min_distance > 0.0 && c.min_distance <= c.max_distance) {
            return Err(ConfigError::Invalid(format!(
                "controls.min_distance ({}) must be positive and <= max_distance ({})",
                c.min_distance, c.max_distance
            )));
        }
        let cam = &self.camera;
        if !(cam.near > 0.0 && cam.near < cam.far) {
            return Err(ConfigError::Invalid(format!(
                "camera.near ({}) must be positive and < camera.far ({})",
                cam.near, cam.far
            )));
        }
        if !(cam.fov_degrees > 0.0 && cam.fov_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera.fov_degrees ({}) must be within (0, 180)",
                cam.fov_degrees
            )));
        }
        Ok(())
    }

    /// Resolve a part source against the configured asset base path
    pub fn resolve_asset_path(&self, source: &str) -> String {
        if source.starts_with("http://") || source.starts_with("https://") {
            return source.to_string();
        }
        let source = source.trim_start_matches('/');
        let base = self.assets.base_path.trim_end_matches('/');
        if base.is_empty() || source.starts_with(&format!("{}/", base)) {
            source.to_string()
        } else {
            format!("{}/{}", base, source)
        }
    }
}

/// Load configuration from file, falling back to defaults when it is absent
pub fn load_config(path: &Path) -> Result<ViewerConfig, ConfigError> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: ViewerConfig = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        ViewerConfig::default()
    };
    config.validate()?;
    Ok(config)
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(&ViewerConfig::default())?;
    std::fs::write(path, content)?;
    Ok(())
}
