//! Light types for the scene

use crate::config::{LightingConfig, MAX_POINT_LIGHTS};
use crate::scene::cascade::sun_direction;
use bytemuck::{Pod, Zeroable};
use glam::{UVec4, Vec3, Vec4};

/// Directional sun light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunLight {
    /// Towards the sun
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl SunLight {
    pub fn from_config(config: &LightingConfig) -> Self {
        Self {
            direction: config.sun_direction,
            color: config.sun_color,
            intensity: config.sun_intensity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            radius,
        }
    }

    /// Convert to GPU data format
    pub fn to_gpu_data(&self) -> GpuPointLight {
        GpuPointLight {
            position: self.position.extend(self.radius),
            color_intensity: self.color.extend(self.intensity),
        }
    }
}

/// Point light as laid out in the lighting uniform block
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct GpuPointLight {
    /// xyz = position, w = radius
    pub position: Vec4,
    /// rgb = color, a = intensity
    pub color_intensity: Vec4,
}

/// Sun and point lights for the shading pass
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightingUniform {
    /// xyz = normalised direction towards the sun
    pub sun_direction: Vec4,
    /// rgb = color, a = intensity
    pub sun_color: Vec4,
    pub point_lights: [GpuPointLight; MAX_POINT_LIGHTS],
    /// x = active point lights
    pub counts: UVec4,
}

impl LightingUniform {
    /// Pack the sun and at most `MAX_POINT_LIGHTS` point lights; extra lights are dropped
    pub fn new(sun: &SunLight, point_lights: &[PointLight]) -> Self {
        if point_lights.len() > MAX_POINT_LIGHTS {
            log::warn!(
                "{} point lights requested, only the first {} are shaded",
                point_lights.len(),
                MAX_POINT_LIGHTS
            );
        }

        let mut packed = [GpuPointLight::default(); MAX_POINT_LIGHTS];
        let count = point_lights.len().min(MAX_POINT_LIGHTS);
        for (slot, light) in packed.iter_mut().zip(point_lights) {
            *slot = light.to_gpu_data();
        }

        Self {
            sun_direction: sun_direction(sun.direction).extend(0.0),
            sun_color: sun.color.extend(sun.intensity),
            point_lights: packed,
            counts: UVec4::new(count as u32, 0, 0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<LightingUniform>(), 32 + 32 * MAX_POINT_LIGHTS + 16);
    }

    #[test]
    fn test_extra_point_lights_dropped() {
        let sun = SunLight::from_config(&LightingConfig::default());
        let lights = vec![PointLight::default(); MAX_POINT_LIGHTS + 2];
        let uniform = LightingUniform::new(&sun, &lights);
        assert_eq!(uniform.counts.x as usize, MAX_POINT_LIGHTS);
        assert!((uniform.sun_direction.truncate().length() - 1.0).abs() < 1e-6);
    }
}
