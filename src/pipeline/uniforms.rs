//! Uniform blocks shared between the host and the WGSL sources

use crate::config::{
    BloomConfig, GradingConfig, MAX_BLUR_TAPS, MAX_CASCADES, MAX_SSAO_KERNEL,
};
use crate::scene::{CameraState, CascadeTransform, Frustum};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec2, Vec4};

/// Main camera plus every cascade
pub const MAX_VIEWS: usize = MAX_CASCADES + 1;

/// One render context's view. Padded to 512 bytes so each slot of the shared
/// views buffer starts on a uniform offset boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewUniform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inverse_projection: Mat4,
    /// Inverse of the rotation-only view-projection, for sky directions
    pub sky_inverse: Mat4,
    pub position: Vec4,
    /// Inward-facing frustum planes
    pub planes: [Vec4; 6],
    /// x = near, y = far, z = width, w = height
    pub params: Vec4,
    pub _pad: [Vec4; 4],
}

impl ViewUniform {
    pub const SIZE: u64 = std::mem::size_of::<ViewUniform>() as u64;

    pub fn camera(camera: &CameraState, width: u32, height: u32) -> Self {
        let frustum = Frustum::from_matrix(camera.view_projection(), true);
        Self {
            view: camera.view(),
            projection: camera.projection(),
            view_projection: camera.view_projection(),
            inverse_projection: camera.inverse_projection(),
            sky_inverse: camera.skybox_view_projection().inverse(),
            position: camera.position.extend(1.0),
            planes: frustum.planes,
            params: Vec4::new(camera.near, camera.far, width as f32, height as f32),
            _pad: [Vec4::ZERO; 4],
        }
    }

    pub fn cascade(cascade: &CascadeTransform, map_size: u32) -> Self {
        let frustum = Frustum::from_matrix(cascade.view_projection, false);
        Self {
            view: cascade.view,
            projection: cascade.projection,
            view_projection: cascade.view_projection,
            inverse_projection: cascade.projection.inverse(),
            sky_inverse: Mat4::IDENTITY,
            position: cascade.view.inverse().w_axis,
            planes: frustum.planes,
            params: Vec4::new(cascade.near, cascade.far, map_size as f32, map_size as f32),
            _pad: [Vec4::ZERO; 4],
        }
    }

    pub fn frustum(&self) -> Frustum {
        Frustum {
            planes: self.planes,
        }
    }
}

/// Cascade matrices and filtering parameters for the shading pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowUniform {
    pub view_projection: [Mat4; MAX_CASCADES],
    /// x = bias, y = normal bias, z = PCF samples, w = blocker samples
    pub params: [Vec4; MAX_CASCADES],
    /// x = near, y = far, z = light-space texel size
    pub ranges: [Vec4; MAX_CASCADES],
    /// x = cascade count, y = map size
    pub info: UVec4,
}

impl ShadowUniform {
    pub fn new(cascades: &[CascadeTransform], map_size: u32) -> Self {
        let mut uniform = Self::zeroed();
        let count = cascades.len().min(MAX_CASCADES);
        for (i, cascade) in cascades.iter().take(count).enumerate() {
            let extent = (cascade.max - cascade.min).truncate().max_element();
            uniform.view_projection[i] = cascade.view_projection;
            uniform.params[i] = Vec4::new(
                cascade.bias,
                cascade.normal_bias,
                cascade.sample_count as f32,
                cascade.blocker_sample_count as f32,
            );
            uniform.ranges[i] = Vec4::new(
                cascade.near,
                cascade.far,
                extent / map_size.max(1) as f32,
                0.0,
            );
        }
        uniform.info = UVec4::new(count as u32, map_size, 0, 0);
        uniform
    }
}

/// Points of the shadow Poisson disk, two per vector
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PoissonUniform {
    pub points: [Vec4; 16],
}

impl PoissonUniform {
    pub const CAPACITY: usize = 32;

    pub fn new(points: &[Vec2]) -> Self {
        let mut uniform = Self::zeroed();
        for (i, pair) in points.chunks(2).take(16).enumerate() {
            let second = pair.get(1).copied().unwrap_or(Vec2::ZERO);
            uniform.points[i] = Vec4::new(pair[0].x, pair[0].y, second.x, second.y);
        }
        uniform
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SsaoUniform {
    pub kernel: [Vec4; MAX_SSAO_KERNEL],
    /// x = radius, y = bias, z = kernel size
    pub params: Vec4,
}

impl SsaoUniform {
    pub fn new(kernel: &[Vec4], radius: f32, bias: f32) -> Self {
        let mut uniform = Self::zeroed();
        let count = kernel.len().min(MAX_SSAO_KERNEL);
        uniform.kernel[..count].copy_from_slice(&kernel[..count]);
        uniform.params = Vec4::new(radius, bias, count as f32, 0.0);
        uniform
    }
}

/// One separable blur direction with its compressed taps
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlurUniform {
    /// x = texel offset, y = weight; mirrored on both sides of the centre
    pub taps: [Vec4; MAX_BLUR_TAPS],
    /// xy = direction, z = side taps, w = centre weight
    pub params: Vec4,
}

impl BlurUniform {
    /// `kernel[0]` is the centre tap, the rest are side taps
    pub fn new(kernel: &[Vec2], direction: Vec2) -> Self {
        let mut uniform = Self::zeroed();
        let center = kernel.first().map_or(1.0, |t| t.y);
        let sides = &kernel[1.min(kernel.len())..];
        let count = sides.len().min(MAX_BLUR_TAPS);
        for (slot, tap) in uniform.taps.iter_mut().zip(&sides[..count]) {
            *slot = Vec4::new(tap.x, tap.y, 0.0, 0.0);
        }
        uniform.params = Vec4::new(direction.x, direction.y, count as f32, center);
        uniform
    }
}

/// Per-level bloom parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BloomUniform {
    /// x = threshold, y = knee, z = radius, w = intensity
    pub params: Vec4,
    /// x = prefilter, y = border padding, z = level
    pub flags: UVec4,
}

impl BloomUniform {
    pub fn new(config: &BloomConfig, level: u32, prefilter: bool) -> Self {
        Self {
            params: Vec4::new(config.threshold, config.knee, config.radius, config.intensity),
            flags: UVec4::new(prefilter as u32, config.padding, level, 0),
        }
    }
}

/// Grading and composite parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GradingUniform {
    /// x = exposure, y = temperature, z = tint, w = contrast
    pub color: Vec4,
    /// x = brightness, y = gamma, z = vignette start, w = vignette end
    pub tone: Vec4,
    /// x = vignette intensity, y = bloom intensity, z = bloom padding
    pub composite: Vec4,
}

impl GradingUniform {
    pub fn new(grading: &GradingConfig, bloom: &BloomConfig) -> Self {
        Self {
            color: Vec4::new(grading.exposure, grading.temperature, grading.tint, grading.contrast),
            tone: Vec4::new(
                grading.brightness,
                grading.gamma,
                grading.vignette_start,
                grading.vignette_end,
            ),
            composite: Vec4::new(grading.vignette_intensity, bloom.intensity, bloom.padding as f32, 0.0),
        }
    }
}

/// Parameters of one IBL generation dispatch
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct IblParams {
    /// x = roughness, y = face size, z = sample count, w = source face size
    pub params: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(ViewUniform::SIZE, 512);
        assert_eq!(std::mem::size_of::<ShadowUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<PoissonUniform>(), 256);
        assert_eq!(std::mem::size_of::<SsaoUniform>(), 64 * 16 + 16);
        assert_eq!(std::mem::size_of::<BlurUniform>(), MAX_BLUR_TAPS * 16 + 16);
        assert_eq!(std::mem::size_of::<GradingUniform>(), 48);
    }

    #[test]
    fn test_blur_uniform_splits_centre() {
        let kernel = [Vec2::new(0.0, 0.4), Vec2::new(1.3, 0.2), Vec2::new(3.2, 0.1)];
        let uniform = BlurUniform::new(&kernel, Vec2::X);
        assert_eq!(uniform.params, Vec4::new(1.0, 0.0, 2.0, 0.4));
        assert_eq!(uniform.taps[1].x, 3.2);
    }

    #[test]
    fn test_poisson_packs_pairs() {
        let points = [Vec2::new(0.1, 0.2), Vec2::new(0.3, 0.4), Vec2::new(0.5, 0.6)];
        let uniform = PoissonUniform::new(&points);
        assert_eq!(uniform.points[0], Vec4::new(0.1, 0.2, 0.3, 0.4));
        assert_eq!(uniform.points[1], Vec4::new(0.5, 0.6, 0.0, 0.0));
    }
}
