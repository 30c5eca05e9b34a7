use anyhow::{bail, Result};
use glam::{Mat4, Vec2, Vec3};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::arcball::ArcBall;

/// Camera position after a view reset.
pub const DEFAULT_POSITION: Vec3 = Vec3::new(0.0, 0.0, -2.0);

/// Distance covered by one keyboard step.
pub const KEY_STEP: f32 = 0.5;

const WHEEL_SPEED: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 60.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl CameraConfig {
    /// Rejects clip planes and fields of view that cannot form a projection.
    pub fn validate(&self) -> Result<()> {
        if !(self.fov > 0.0 && self.fov < 180.0) {
            bail!("camera fov must be between 0 and 180 degrees, got {}", self.fov);
        }
        if !(self.near > 0.0) {
            bail!("camera near plane must be positive, got {}", self.near);
        }
        if !(self.far > self.near) || !self.far.is_finite() {
            bail!(
                "camera far plane ({}) must lie beyond the near plane ({})",
                self.far,
                self.near
            );
        }
        Ok(())
    }
}

/// Orbit camera: a translated, arcball-rotated view plus a perspective
/// projection. Every mutator leaves `view` and `projection` current.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    rotation: Mat4,
    config: CameraConfig,
    aspect: f32,
    arcball: ArcBall,
    view: Mat4,
    projection: Mat4,
}

impl Camera {
    /// An invalid `config` is replaced by the defaults.
    pub fn new(config: CameraConfig, width: u32, height: u32) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(err) => {
                warn!("{err}; using the default camera");
                CameraConfig::default()
            }
        };
        let mut camera = Self {
            position: DEFAULT_POSITION,
            rotation: Mat4::IDENTITY,
            config,
            aspect: 1.0,
            arcball: ArcBall::new(width, height),
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        camera.resize(width, height);
        camera.update_view();
        camera
    }

    /// Composes the rotation for a drag step onto the accumulated rotation.
    pub fn apply_drag(&mut self, current: Vec2, last: Vec2) {
        self.rotation = self.arcball.rotation_between(current, last) * self.rotation;
        self.update_view();
    }

    /// Moves in the view plane; the step grows with the distance to the origin.
    pub fn apply_pan(&mut self, delta: Vec2) {
        let step = self.position.z / self.depth_range();
        self.position.x -= delta.x * step;
        self.position.y += delta.y * step;
        self.update_view();
    }

    /// Moves along the view axis. `delta` is in wheel units, 120 per notch.
    pub fn apply_zoom(&mut self, delta: f32) {
        let step = delta * WHEEL_SPEED * (self.position.z / self.depth_range());
        self.position.z -= step;
        self.clamp_depth();
        self.update_view();
    }

    /// Keyboard translation along x and z.
    pub fn nudge(&mut self, dx: f32, dz: f32) {
        self.position.x += dx;
        self.position.z += dz;
        self.clamp_depth();
        self.update_view();
    }

    pub fn reset_view(&mut self) {
        self.position = DEFAULT_POSITION;
        self.rotation = Mat4::IDENTITY;
        self.update_view();
    }

    pub fn set_rotation(&mut self, rotation: Mat4) {
        self.rotation = rotation;
        self.update_view();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.arcball.resize(width, height);
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
        self.update_projection();
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Mat4 {
        self.rotation
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    /// Inverse-transpose of the view matrix, used to bring normals into view space.
    pub fn view_inverse(&self) -> Mat4 {
        self.view.transpose().inverse()
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn arcball(&self) -> &ArcBall {
        &self.arcball
    }

    fn depth_range(&self) -> f32 {
        self.config.far - self.config.near
    }

    fn clamp_depth(&mut self) {
        self.position.z = self.position.z.clamp(-self.config.far, -self.config.near);
    }

    fn update_view(&mut self) {
        self.view = Mat4::from_translation(self.position) * self.rotation;
    }

    fn update_projection(&mut self) {
        self.projection = Mat4::perspective_rh(
            self.config.fov.to_radians(),
            self.aspect,
            self.config.near,
            self.config.far,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::new(CameraConfig::default(), 800, 600)
    }

    #[test]
    fn defaults_look_down_the_axis() {
        let camera = camera();
        assert_eq!(camera.position(), DEFAULT_POSITION);
        assert_eq!(camera.view(), Mat4::from_translation(DEFAULT_POSITION));
        assert!((camera.aspect() - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn drag_accumulates_and_reset_clears() {
        let mut camera = camera();
        camera.apply_drag(Vec2::new(420.0, 300.0), Vec2::new(400.0, 300.0));
        let once = camera.rotation();
        camera.apply_drag(Vec2::new(440.0, 300.0), Vec2::new(420.0, 300.0));
        assert_ne!(camera.rotation(), once);
        assert_eq!(camera.view(), Mat4::from_translation(DEFAULT_POSITION) * camera.rotation());

        camera.reset_view();
        assert_eq!(camera.rotation(), Mat4::IDENTITY);
        assert_eq!(camera.position(), DEFAULT_POSITION);
    }

    #[test]
    fn pan_scales_with_depth() {
        let mut camera = camera();
        camera.apply_pan(Vec2::new(10.0, 5.0));
        let step = -2.0 / (1000.0 - 0.1);
        assert!((camera.position().x - (-10.0 * step)).abs() < 1e-6);
        assert!((camera.position().y - (5.0 * step)).abs() < 1e-6);
    }

    #[test]
    fn wheel_forward_moves_closer() {
        let mut camera = camera();
        camera.apply_zoom(120.0);
        let z = camera.position().z;
        assert!(z > -2.0 && z < -0.1, "{z}");
    }

    #[test]
    fn zoom_is_clamped_to_clip_range() {
        let mut camera = camera();
        for _ in 0..500 {
            camera.apply_zoom(-12_000.0);
        }
        assert_eq!(camera.position().z, -1000.0);
        for _ in 0..500 {
            camera.nudge(0.0, KEY_STEP * 10.0);
        }
        assert!((camera.position().z + 0.1).abs() < 1e-6);
    }

    #[test]
    fn view_inverse_is_inverse_transpose() {
        let mut camera = camera();
        camera.apply_drag(Vec2::new(300.0, 200.0), Vec2::new(400.0, 300.0));
        let expected = camera.view().inverse().transpose();
        assert!(camera.view_inverse().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn inverted_clip_planes_are_rejected() {
        let inverted = CameraConfig {
            near: 10.0,
            far: 1.0,
            ..CameraConfig::default()
        };
        assert!(inverted.validate().is_err());
        let flat = CameraConfig {
            near: 5.0,
            far: 5.0,
            ..CameraConfig::default()
        };
        assert!(flat.validate().is_err());
        assert!(CameraConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_config_falls_back_and_stays_finite() {
        let mut camera = Camera::new(
            CameraConfig {
                near: 5.0,
                far: 5.0,
                ..CameraConfig::default()
            },
            800,
            600,
        );
        assert_eq!(*camera.config(), CameraConfig::default());
        camera.apply_zoom(120.0);
        camera.apply_pan(Vec2::new(5.0, 5.0));
        camera.nudge(0.0, KEY_STEP);
        assert!(camera.position().is_finite());
    }

    #[test]
    fn resize_updates_aspect_and_projection() {
        let mut camera = camera();
        let before = camera.projection();
        camera.resize(400, 400);
        assert_eq!(camera.aspect(), 1.0);
        assert_ne!(camera.projection(), before);
        assert_eq!(camera.arcball().size(), (400, 400));
    }
}
