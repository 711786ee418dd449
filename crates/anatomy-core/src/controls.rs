//! Damped orbit camera controls

use glam::{Vec2, Vec3};

use crate::config::ControlsConfig;

/// Orbit controller state.
///
/// Distance and focus are smoothed toward their targets every update;
/// azimuth/elevation respond directly to input.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitControls {
    pub distance: f32,
    pub target_distance: f32,
    pub azimuth: f32,
    pub elevation: f32,
    /// Current look-at point
    pub target: Vec3,
    /// Point the look-at is easing toward
    pub target_focus: Vec3,
    pub sensitivity: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub smooth_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub auto_rotate: bool,
    /// Radians per second
    pub auto_rotate_speed: f32,
    disposed: bool,
}

const MAX_ELEVATION: f32 = 1.5;

impl OrbitControls {
    /// Build controls that reproduce a camera at `position` looking at `target`
    pub fn new(position: Vec3, target: Vec3, config: &ControlsConfig) -> Self {
        let offset = position - target;
        let distance = offset
            .length()
            .clamp(config.min_distance, config.max_distance);
        let azimuth = offset.x.atan2(offset.z);
        let elevation = if offset.length_squared() > 0.0 {
            (offset.y / offset.length()).asin().clamp(-MAX_ELEVATION, MAX_ELEVATION)
        } else {
            0.0
        };

        Self {
            distance,
            target_distance: distance,
            azimuth,
            elevation,
            target,
            target_focus: target,
            sensitivity: config.rotate_sensitivity,
            zoom_speed: config.zoom_speed,
            pan_speed: config.pan_speed,
            smooth_factor: config.damping,
            min_distance: config.min_distance,
            max_distance: config.max_distance,
            auto_rotate: config.auto_rotate,
            auto_rotate_speed: config.auto_rotate_speed,
            disposed: false,
        }
    }

    /// Orbit by a pointer drag delta in pixels
    pub fn rotate(&mut self, delta: Vec2) {
        self.azimuth -= delta.x * self.sensitivity;
        self.elevation =
            (self.elevation + delta.y * self.sensitivity).clamp(-MAX_ELEVATION, MAX_ELEVATION);
    }

    /// Pan the focus in the camera's screen plane by a drag delta in pixels
    pub fn pan(&mut self, delta: Vec2) {
        let forward = (self.target - self.position()).normalize_or_zero();
        let right = forward.cross(Vec3::Y).normalize_or_zero();
        let up = right.cross(forward).normalize_or_zero();
        let scale = self.distance * self.pan_speed;
        self.target_focus += (-right * delta.x + up * delta.y) * scale;
    }

    /// Zoom by wheel steps; positive zooms in
    pub fn zoom(&mut self, steps: f32) {
        let factor = 1.0 - steps * self.zoom_speed;
        self.target_distance =
            (self.target_distance * factor.max(0.05)).clamp(self.min_distance, self.max_distance);
    }

    /// Multiply the distance directly (pinch gestures)
    pub fn zoom_by_factor(&mut self, factor: f32) {
        if factor.is_finite() && factor > 0.0 {
            self.target_distance =
                (self.target_distance * factor).clamp(self.min_distance, self.max_distance);
        }
    }

    /// Ease the camera toward `focus`, ending `distance` away from it
    pub fn fly_to(&mut self, focus: Vec3, distance: f32) {
        self.target_focus = focus;
        self.target_distance = distance.clamp(self.min_distance, self.max_distance);
    }

    /// Advance damping and auto-rotation by `dt` seconds.
    ///
    /// Returns false once the controls have been disposed.
    pub fn update(&mut self, dt: f32) -> bool {
        if self.disposed {
            return false;
        }
        if self.auto_rotate {
            self.azimuth += self.auto_rotate_speed * dt;
        }
        let lerp_factor = 1.0 - (-self.smooth_factor * 60.0 * dt).exp();
        self.distance += (self.target_distance - self.distance) * lerp_factor;
        self.target += (self.target_focus - self.target) * lerp_factor;
        true
    }

    /// Camera position implied by the current spherical coordinates (Y up)
    pub fn position(&self) -> Vec3 {
        let horizontal = self.distance * self.elevation.cos();
        self.target
            + Vec3::new(
                horizontal * self.azimuth.sin(),
                self.distance * self.elevation.sin(),
                horizontal * self.azimuth.cos(),
            )
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
        self.auto_rotate = false;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controls() -> OrbitControls {
        let config = ControlsConfig {
            auto_rotate: false,
            ..ControlsConfig::default()
        };
        OrbitControls::new(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO, &config)
    }

    #[test]
    fn test_new_reproduces_initial_position() {
        let c = controls();
        let p = c.position();
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-4);
        assert_relative_eq!(p.z, 6.0, epsilon = 1e-4);
    }

    #[test]
    fn test_zoom_is_bounded() {
        let mut c = controls();
        for _ in 0..200 {
            c.zoom(1.0);
        }
        assert_eq!(c.target_distance, c.min_distance);
        for _ in 0..200 {
            c.zoom(-1.0);
        }
        assert_eq!(c.target_distance, c.max_distance);
    }

    #[test]
    fn test_damping_converges() {
        let mut c = controls();
        c.fly_to(Vec3::new(1.0, 0.0, 0.0), 3.0);
        for _ in 0..240 {
            c.update(1.0 / 60.0);
        }
        assert_relative_eq!(c.distance, 3.0, epsilon = 1e-3);
        assert_relative_eq!(c.target.x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_auto_rotate_is_constant_speed() {
        let mut c = controls();
        c.auto_rotate = true;
        c.auto_rotate_speed = 0.5;
        let start = c.azimuth;
        c.update(2.0);
        assert_relative_eq!(c.azimuth - start, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_elevation_clamped() {
        let mut c = controls();
        c.rotate(Vec2::new(0.0, 1.0e6));
        assert_eq!(c.elevation, MAX_ELEVATION);
    }

    #[test]
    fn test_disposed_controls_stop_updating() {
        let mut c = controls();
        c.dispose();
        assert!(!c.update(0.016));
    }
}
