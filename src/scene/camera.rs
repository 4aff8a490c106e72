//! Camera system

use crate::config::CameraConfig;
use glam::{Mat4, Vec3};

/// Pitch stays this far short of straight up/down so the basis never degenerates
pub const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 1e-3;

/// Yaw/pitch camera with all derived matrices cached after `update`
#[derive(Debug, Clone)]
pub struct CameraState {
    pub position: Vec3,
    /// Radians, zero looks down -Z, positive turns towards +X
    pub yaw: f32,
    /// Radians, positive looks up
    pub pitch: f32,
    /// Carried for completeness; not part of the basis
    pub roll: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub near: f32,
    pub far: f32,

    forward: Vec3,
    right: Vec3,
    up: Vec3,
    view: Mat4,
    projection: Mat4,
    inverse_projection: Mat4,
    view_projection: Mat4,
    skybox_view_projection: Mat4,
}

impl Default for CameraState {
    fn default() -> Self {
        Self::new(&CameraConfig::default())
    }
}

impl CameraState {
    pub fn new(config: &CameraConfig) -> Self {
        let mut camera = Self {
            position: config.position,
            yaw: config.yaw,
            pitch: config.pitch,
            roll: 0.0,
            fov: config.fov_degrees,
            near: config.near,
            far: config.far,
            forward: -Vec3::Z,
            right: Vec3::X,
            up: Vec3::Y,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            inverse_projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            skybox_view_projection: Mat4::IDENTITY,
        };
        camera.update(16.0 / 9.0);
        camera
    }

    /// Recompute the basis and every matrix for the given viewport aspect ratio
    pub fn update(&mut self, aspect: f32) {
        self.pitch = self.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);

        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.forward = Vec3::new(cos_pitch * sin_yaw, sin_pitch, -cos_pitch * cos_yaw);
        self.right = Vec3::new(cos_yaw, 0.0, sin_yaw);
        self.up = self.right.cross(self.forward);

        self.projection = self.projection_with_range(aspect, self.near, self.far);
        self.inverse_projection = self.projection.inverse();
        self.view = Mat4::look_at_rh(self.position, self.position + self.forward, self.up);
        self.view_projection = self.projection * self.view;

        // Translation dropped: the sky stays at infinity
        let rotation_only = Mat4::look_at_rh(Vec3::ZERO, self.forward, self.up);
        self.skybox_view_projection = self.projection * rotation_only;
    }

    /// Perspective projection with this camera's field of view and a custom depth range.
    /// Cascade fitting uses it as scratch space for each sub-frustum.
    pub fn projection_with_range(&self, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), aspect.max(1e-4), near, far)
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn right(&self) -> Vec3 {
        self.right
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn inverse_projection(&self) -> Mat4 {
        self.inverse_projection
    }

    pub fn view_projection(&self) -> Mat4 {
        self.view_projection
    }

    /// Projection times the rotation-only view, for the skybox
    pub fn skybox_view_projection(&self) -> Mat4 {
        self.skybox_view_projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_orthonormal(camera: &CameraState) {
        let (f, r, u) = (camera.forward(), camera.right(), camera.up());
        assert!(f.dot(r).abs() < 1e-5, "forward.right = {}", f.dot(r));
        assert!(f.dot(u).abs() < 1e-5, "forward.up = {}", f.dot(u));
        assert!(r.dot(u).abs() < 1e-5, "right.up = {}", r.dot(u));
        assert!((f.length() - 1.0).abs() < 1e-5);
        assert!((r.length() - 1.0).abs() < 1e-5);
        assert!((u.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = CameraState::default();
        assert!(camera.forward().abs_diff_eq(-Vec3::Z, 1e-6));
        assert!(camera.right().abs_diff_eq(Vec3::X, 1e-6));
        assert!(camera.up().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn test_basis_orthonormal_over_range() {
        let mut camera = CameraState::default();
        for yaw_step in 0..24 {
            for pitch_step in -10..=10 {
                camera.yaw = yaw_step as f32 * std::f32::consts::TAU / 24.0;
                camera.pitch = pitch_step as f32 * PITCH_LIMIT / 10.0;
                camera.update(1.5);
                assert_orthonormal(&camera);
            }
        }
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = CameraState::default();
        camera.pitch = 10.0;
        camera.update(1.0);
        assert_eq!(camera.pitch, PITCH_LIMIT);
        assert_orthonormal(&camera);
    }

    #[test]
    fn test_skybox_ignores_translation() {
        let mut camera = CameraState::default();
        camera.update(1.0);
        let before = camera.skybox_view_projection();
        camera.position = Vec3::new(5.0, -3.0, 12.0);
        camera.update(1.0);
        assert!(camera.skybox_view_projection().abs_diff_eq(before, 1e-6));
        assert!(!camera.view_projection().abs_diff_eq(before, 1e-3));
    }

    #[test]
    fn test_point_ahead_projects_inside_clip() {
        let mut camera = CameraState::default();
        camera.update(1.0);
        let clip = camera.view_projection() * Vec3::new(0.0, 0.0, -10.0).extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
