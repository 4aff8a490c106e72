//! Renderer configuration
//!
//! Everything here has a `Default` matching the tuned values of the demo scene.

use crate::error::{RendererError, RendererResult};
use glam::Vec3;

/// Upper bound on shadow cascades; uniform arrays are sized for this many
pub const MAX_CASCADES: usize = 4;
/// Point lights in the lighting uniform block
pub const MAX_POINT_LIGHTS: usize = 4;
/// SSAO kernel storage in the SSAO uniform block
pub const MAX_SSAO_KERNEL: usize = 64;
/// Half-width limit of the compressed blur kernel
pub const MAX_BLUR_TAPS: usize = 16;

/// Camera projection and start pose
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    /// Radians; zero looks down -Z
    pub yaw: f32,
    pub pitch: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 85.0,
            near: 0.1,
            far: 100.0,
            position: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

/// Fly-camera movement model
#[derive(Debug, Clone)]
pub struct MovementConfig {
    pub max_velocity: f32,
    pub acceleration: f32,
    pub mouse_sensitivity: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_velocity: 1.0,
            acceleration: 0.01,
            mouse_sensitivity: 2.0,
        }
    }
}

/// Static per-cascade configuration, copied into every fitted cascade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeConfig {
    pub near: f32,
    pub far: f32,
    pub bias: f32,
    pub normal_bias: f32,
    pub sample_count: u32,
    pub blocker_sample_count: u32,
}

impl CascadeConfig {
    pub const fn new(near: f32, far: f32, bias: f32, normal_bias: f32) -> Self {
        Self {
            near,
            far,
            bias,
            normal_bias,
            sample_count: 16,
            blocker_sample_count: 8,
        }
    }
}

/// Whether static collections take part in culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaticCullPolicy {
    /// Every live static instance is drawn in every context
    #[default]
    AlwaysVisible,
    /// Static collections are culled again only when they or the view matrices changed
    CullOnChange,
}

/// Where the frustum test runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullingPath {
    /// Compute shader with atomic compaction
    #[default]
    Gpu,
    /// Same test on the CPU, results uploaded with queue writes
    Host,
}

/// Instance registry sizing and culling behaviour
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// First allocation of every collection; rounded up to a multiple of 64
    pub default_capacity: u32,
    pub static_policy: StaticCullPolicy,
    pub culling_path: CullingPath,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            default_capacity: 64,
            static_policy: StaticCullPolicy::AlwaysVisible,
            culling_path: CullingPath::Gpu,
        }
    }
}

/// Resolutions of the generated image-based lighting maps
#[derive(Debug, Clone)]
pub struct IblConfig {
    pub skybox_size: u32,
    pub irradiance_size: u32,
    pub prefilter_size: u32,
    pub prefilter_mips: u32,
    pub brdf_lut_size: u32,
    /// Clamp applied to decoded HDR components before half conversion
    pub max_radiance: f32,
}

impl Default for IblConfig {
    fn default() -> Self {
        Self {
            skybox_size: 1024,
            irradiance_size: 64,
            prefilter_size: 256,
            prefilter_mips: 5,
            brdf_lut_size: 512,
            max_radiance: 65000.0,
        }
    }
}

/// Sun and IBL setup
#[derive(Debug, Clone)]
pub struct LightingConfig {
    /// Direction towards the sun; normalised on use
    pub sun_direction: Vec3,
    pub sun_color: Vec3,
    pub sun_intensity: f32,
    pub ibl: IblConfig,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            sun_direction: Vec3::new(20.0, 50.0, 17.0),
            sun_color: Vec3::new(1.0, 240.0 / 255.0, 214.0 / 255.0),
            sun_intensity: 0.8,
            ibl: IblConfig::default(),
        }
    }
}

/// Constants baked into the shading pipeline as WGSL `override`s.
/// Changing one requires rebuilding the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadingConstants {
    pub ambient_intensity: f32,
    pub cascade_debug: bool,
    pub shadow_fade_distance: f32,
    pub fog_start: f32,
    pub fog_end: f32,
    pub fog_mip_level: f32,
}

impl Default for ShadingConstants {
    fn default() -> Self {
        Self {
            ambient_intensity: 1.0,
            cascade_debug: false,
            shadow_fade_distance: 90.0,
            fog_start: 60.0,
            fog_end: 100.0,
            fog_mip_level: 3.0,
        }
    }
}

impl ShadingConstants {
    /// Pipeline override table, keyed by the WGSL override names
    pub fn overrides(&self) -> Vec<(String, f64)> {
        vec![
            ("AMBIENT_INTENSITY".to_string(), self.ambient_intensity as f64),
            (
                "CASCADE_DEBUG".to_string(),
                if self.cascade_debug { 1.0 } else { 0.0 },
            ),
            ("SHADOW_FADE_DISTANCE".to_string(), self.shadow_fade_distance as f64),
            ("FOG_START".to_string(), self.fog_start as f64),
            ("FOG_END".to_string(), self.fog_end as f64),
            ("FOG_MIP_LEVEL".to_string(), self.fog_mip_level as f64),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SsaoConfig {
    pub kernel_size: usize,
    pub radius: f32,
    pub bias: f32,
    /// Taps on each side of the centre before compression
    pub blur_kernel_size: usize,
    pub blur_sigma: f32,
}

impl Default for SsaoConfig {
    fn default() -> Self {
        Self {
            kernel_size: 32,
            radius: 0.5,
            bias: 0.025,
            blur_kernel_size: 8,
            blur_sigma: 4.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BloomConfig {
    /// Downsample steps; the chain holds `levels + 1` resolutions
    pub levels: u32,
    pub threshold: f32,
    pub knee: f32,
    /// Upsample tent filter radius in texels
    pub radius: f32,
    pub intensity: f32,
    /// Border carried through the chain and cropped at composite
    pub padding: u32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            levels: 5,
            threshold: 1.0,
            knee: 0.5,
            radius: 1.0,
            intensity: 0.04,
            padding: 16,
        }
    }
}

/// Colour grading applied by the composite pass
#[derive(Debug, Clone)]
pub struct GradingConfig {
    pub exposure: f32,
    pub temperature: f32,
    pub tint: f32,
    pub contrast: f32,
    pub brightness: f32,
    pub gamma: f32,
    pub vignette_start: f32,
    pub vignette_end: f32,
    pub vignette_intensity: f32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            temperature: 0.0,
            tint: 0.0,
            contrast: 1.0,
            brightness: 0.0,
            gamma: 1.0,
            vignette_start: 0.45,
            vignette_end: 1.2,
            vignette_intensity: 0.35,
        }
    }
}

/// Configuration for the renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub camera: CameraConfig,
    pub movement: MovementConfig,
    /// Ordered near to far
    pub cascades: Vec<CascadeConfig>,
    pub shadow_map_size: u32,
    pub depth_bias_constant: i32,
    pub depth_bias_slope: f32,
    /// Light-space depth padding multiplier for cascade fitting
    pub depth_padding: f32,
    pub instances: InstanceConfig,
    pub lighting: LightingConfig,
    pub shading: ShadingConstants,
    pub ssao: SsaoConfig,
    pub bloom: BloomConfig,
    pub grading: GradingConfig,
    /// 1 or 4
    pub msaa_samples: u32,
    pub clear_color: [f32; 4],
    /// Measure GPU frame time when the adapter supports timestamps
    pub timestamps: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            movement: MovementConfig::default(),
            cascades: vec![
                CascadeConfig::new(0.1, 8.0, 0.0005, 0.02),
                CascadeConfig::new(8.0, 30.0, 0.001, 0.04),
                CascadeConfig::new(30.0, 100.0, 0.002, 0.08),
            ],
            shadow_map_size: 2048,
            depth_bias_constant: 2,
            depth_bias_slope: 2.0,
            depth_padding: 10.0,
            instances: InstanceConfig::default(),
            lighting: LightingConfig::default(),
            shading: ShadingConstants::default(),
            ssao: SsaoConfig::default(),
            bloom: BloomConfig::default(),
            grading: GradingConfig::default(),
            msaa_samples: 4,
            clear_color: [0.0, 0.0, 0.15, 1.0],
            timestamps: true,
        }
    }
}

impl RendererConfig {
    /// Number of render contexts: the main camera plus one per cascade
    pub fn context_count(&self) -> usize {
        1 + self.cascades.len()
    }

    pub fn validate(&self) -> RendererResult<()> {
        let invalid = |msg: String| Err(RendererError::InvalidConfig(msg));

        if self.cascades.is_empty() || self.cascades.len() > MAX_CASCADES {
            return invalid(format!(
                "{} cascades configured, expected 1..={}",
                self.cascades.len(),
                MAX_CASCADES
            ));
        }
        for (i, cascade) in self.cascades.iter().enumerate() {
            if !(cascade.near > 0.0 && cascade.far > cascade.near) {
                return invalid(format!("cascade {} has an empty depth range", i));
            }
        }
        if self.msaa_samples != 1 && self.msaa_samples != 4 {
            return invalid(format!("msaa_samples must be 1 or 4, got {}", self.msaa_samples));
        }
        if self.ssao.kernel_size == 0 || self.ssao.kernel_size > MAX_SSAO_KERNEL {
            return invalid(format!("ssao kernel size {} out of range", self.ssao.kernel_size));
        }
        if self.ssao.blur_kernel_size == 0 || self.ssao.blur_kernel_size > 2 * MAX_BLUR_TAPS {
            return invalid(format!(
                "blur kernel size {} out of range",
                self.ssao.blur_kernel_size
            ));
        }
        if self.bloom.levels == 0 || self.bloom.levels > 8 {
            return invalid(format!("bloom levels {} out of range 1..=8", self.bloom.levels));
        }
        if self.lighting.ibl.prefilter_mips == 0 {
            return invalid("prefilter mip count must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context_count(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_msaa() {
        let config = RendererConfig {
            msaa_samples: 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RendererError::InvalidConfig(_))));
    }

    #[test]
    fn test_cascade_debug_override() {
        let mut shading = ShadingConstants::default();
        shading.cascade_debug = true;
        let overrides = shading.overrides();
        assert!(overrides.contains(&("CASCADE_DEBUG".to_string(), 1.0)));
        assert_eq!(overrides.len(), 6);
    }
}
