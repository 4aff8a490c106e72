//! Cascaded shadow frustum fitting and frustum plane tests

use crate::config::CascadeConfig;
use crate::scene::CameraState;
use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Canonical clip-space corners for a 0..1 depth range
const CLIP_CORNERS: [Vec4; 8] = [
    Vec4::new(-1.0, -1.0, 0.0, 1.0),
    Vec4::new(1.0, -1.0, 0.0, 1.0),
    Vec4::new(-1.0, 1.0, 0.0, 1.0),
    Vec4::new(1.0, 1.0, 0.0, 1.0),
    Vec4::new(-1.0, -1.0, 1.0, 1.0),
    Vec4::new(1.0, -1.0, 1.0, 1.0),
    Vec4::new(-1.0, 1.0, 1.0, 1.0),
    Vec4::new(1.0, 1.0, 1.0, 1.0),
];

/// One fitted shadow cascade, recomputed every frame
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeTransform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// Tight light-space bounds of the sub-frustum, before depth padding
    pub min: Vec3,
    pub max: Vec3,
    /// World-space corners of the camera sub-frustum
    pub corners: [Vec3; 8],
    pub bias: f32,
    pub normal_bias: f32,
    pub sample_count: u32,
    pub blocker_sample_count: u32,
    pub near: f32,
    pub far: f32,
}

/// Push the light-space depth range outwards.
///
/// Negative minimum is multiplied, positive minimum divided; the maximum takes the
/// inverse rule. Both ends therefore only ever move away from the box.
pub fn pad_depth_range(min_z: f32, max_z: f32, multiplier: f32) -> (f32, f32) {
    let min = if min_z < 0.0 {
        min_z * multiplier
    } else {
        min_z / multiplier
    };
    let max = if max_z < 0.0 {
        max_z / multiplier
    } else {
        max_z * multiplier
    };
    (min, max)
}

/// World-space corners of the frustum described by `projection * view`
pub fn frustum_corners(view_projection: Mat4) -> [Vec3; 8] {
    let inverse = view_projection.inverse();
    CLIP_CORNERS.map(|corner| {
        let world = inverse * corner;
        world.xyz() / world.w
    })
}

/// Normalised direction towards the sun, falling back to straight up when
/// the configured vector is too short to normalise
pub fn sun_direction(direction: Vec3) -> Vec3 {
    if direction.length_squared() < 1e-12 {
        log::warn!("sun direction {:?} is degenerate, using +Y", direction);
        Vec3::Y
    } else {
        direction.normalize()
    }
}

/// Fit one cascade around the camera sub-frustum `config.near..config.far`
pub fn fit_cascade(
    camera: &CameraState,
    aspect: f32,
    config: &CascadeConfig,
    sun: Vec3,
    depth_padding: f32,
) -> CascadeTransform {
    let scratch = camera.projection_with_range(aspect, config.near, config.far);
    let corners = frustum_corners(scratch * camera.view());

    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
    let direction = sun_direction(sun);
    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let view = Mat4::look_at_rh(center + direction, center, up);

    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for corner in &corners {
        let light_space = view.transform_point3(*corner);
        min = min.min(light_space);
        max = max.max(light_space);
    }

    let (min_z, max_z) = pad_depth_range(min.z, max.z, depth_padding);
    // View space looks down -Z: the nearest plane is the largest z
    let projection = Mat4::orthographic_rh(min.x, max.x, min.y, max.y, -max_z, -min_z);

    CascadeTransform {
        view,
        projection,
        view_projection: projection * view,
        min,
        max,
        corners,
        bias: config.bias,
        normal_bias: config.normal_bias,
        sample_count: config.sample_count,
        blocker_sample_count: config.blocker_sample_count,
        near: config.near,
        far: config.far,
    }
}

/// Fit every cascade in configured near-to-far order
pub fn fit_cascades(
    camera: &CameraState,
    aspect: f32,
    cascades: &[CascadeConfig],
    sun: Vec3,
    depth_padding: f32,
) -> Vec<CascadeTransform> {
    cascades
        .iter()
        .map(|config| fit_cascade(camera, aspect, config, sun, depth_padding))
        .collect()
}

/// Six normalised clip planes, `xyz` pointing inwards
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Plane that accepts every point
    pub const OPEN_PLANE: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

    /// Extract planes from a 0..1 depth clip matrix.
    ///
    /// Shadow contexts pass `near_plane = false`: casters between the light and
    /// the cascade box must still land in the map.
    pub fn from_matrix(m: Mat4, near_plane: bool) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);

        let raw = [
            r3 + r0,
            r3 - r0,
            r3 + r1,
            r3 - r1,
            if near_plane { r2 } else { Self::OPEN_PLANE },
            r3 - r2,
        ];

        Self {
            planes: raw.map(|p| {
                let length = p.xyz().length();
                if length > 0.0 {
                    p / length
                } else {
                    Self::OPEN_PLANE
                }
            }),
        }
    }

    /// Sphere overlaps the frustum
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.xyz().dot(center) + plane.w >= -radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;

    #[test]
    fn test_depth_padding_branch_table() {
        assert_eq!(pad_depth_range(-2.0, 3.0, 10.0), (-20.0, 30.0));
        assert_eq!(pad_depth_range(2.0, 3.0, 10.0), (0.2, 30.0));
        assert_eq!(pad_depth_range(-2.0, -1.0, 10.0), (-20.0, -0.1));
        assert_eq!(pad_depth_range(4.0, -1.0, 10.0), (0.4, -0.1));
    }

    #[test]
    fn test_padding_never_shrinks() {
        for &(min, max) in &[(-5.0f32, -1.0f32), (-5.0, 2.0), (0.5, 4.0)] {
            let (padded_min, padded_max) = pad_depth_range(min, max, 10.0);
            assert!(padded_min <= min && padded_max >= max);
        }
    }

    #[test]
    fn test_cascade_bounds_contain_corners() {
        let config = RendererConfig::default();
        let mut camera = CameraState::new(&config.camera);
        camera.position = Vec3::new(-6.0, 3.0, 4.5);
        camera.yaw = 0.7;
        camera.pitch = -0.3;
        camera.update(16.0 / 9.0);

        let cascades = fit_cascades(
            &camera,
            16.0 / 9.0,
            &config.cascades,
            config.lighting.sun_direction,
            config.depth_padding,
        );
        assert_eq!(cascades.len(), config.cascades.len());

        for cascade in &cascades {
            for corner in &cascade.corners {
                let p = cascade.view.transform_point3(*corner);
                assert!(p.cmpge(cascade.min - 1e-3).all() && p.cmple(cascade.max + 1e-3).all());

                let clip = cascade.view_projection * corner.extend(1.0);
                assert!(clip.x.abs() <= 1.0 + 1e-3 && clip.y.abs() <= 1.0 + 1e-3);
                assert!(clip.z >= -1e-4 && clip.z <= 1.0 + 1e-4, "depth {}", clip.z);
            }
        }
    }

    #[test]
    fn test_cascade_copies_static_parameters() {
        let camera = CameraState::default();
        let config = CascadeConfig::new(1.0, 5.0, 0.01, 0.2);
        let cascade = fit_cascade(&camera, 1.0, &config, Vec3::Y, 10.0);
        assert_eq!(cascade.near, 1.0);
        assert_eq!(cascade.far, 5.0);
        assert_eq!(cascade.bias, 0.01);
        assert_eq!(cascade.sample_count, 16);
        assert!(cascade.view.is_finite());
        assert!(cascade.projection.is_finite());
    }

    #[test]
    fn test_zero_sun_direction_falls_back() {
        let camera = CameraState::default();
        let config = CascadeConfig::new(0.1, 8.0, 0.0, 0.0);
        let cascade = fit_cascade(&camera, 1.0, &config, Vec3::ZERO, 10.0);
        assert!(cascade.view_projection.is_finite());
    }

    #[test]
    fn test_frustum_sphere_test() {
        let camera = CameraState::default();
        let frustum = Frustum::from_matrix(camera.view_projection(), true);
        assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, -5.0), 0.5));
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 5.0), 0.5));
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, -500.0), 0.5));
        // Straddling the near plane still counts
        assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, 0.2), 0.5));
    }

    #[test]
    fn test_open_near_plane_keeps_casters_behind() {
        let projection = Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 1.0, 10.0);
        let with_near = Frustum::from_matrix(projection, true);
        let without_near = Frustum::from_matrix(projection, false);
        let behind = Vec3::new(0.0, 0.0, 5.0);
        assert!(!with_near.intersects_sphere(behind, 0.1));
        assert!(without_near.intersects_sphere(behind, 0.1));
    }
}
