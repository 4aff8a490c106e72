//! Image based lighting maps
//!
//! An equirectangular HDR image is projected onto the skybox cube, which is
//! then convolved into the diffuse irradiance cube and the GGX prefiltered
//! specular cube (one roughness per mip). The split-sum BRDF lookup table
//! only depends on `n.v` and roughness. Everything runs as compute work
//! recorded once, submitted with the next frame.

use crate::backend::*;
use crate::config::IblConfig;
use crate::pipeline::uniforms::IblParams;
use crate::pipeline::HDR_FORMAT;
use crate::resources::HdrImage;
use glam::Vec4;
use half::f16;

const CUBE_WORKGROUP: u32 = 8;
const IRRADIANCE_WORKGROUP: u32 = 4;
const PREFILTER_SAMPLES: u32 = 1024;
const BRDF_SAMPLES: u32 = 1024;

/// Radiance of the stand-in environment used before a real one is loaded
const PLACEHOLDER_RADIANCE: f32 = 0.03;

/// Skybox, irradiance, prefiltered specular and BRDF lookup views
#[derive(Debug, Clone)]
pub struct EnvironmentMaps {
    /// Textures and parameter buffers owned by these maps
    textures: Vec<TextureHandle>,
    buffers: Vec<BufferHandle>,
    pub skybox: TextureViewHandle,
    pub irradiance: TextureViewHandle,
    pub prefilter: TextureViewHandle,
    pub brdf_lut: TextureViewHandle,
}

impl EnvironmentMaps {
    /// Flat dim environment so shading has something to sample before the
    /// real maps exist
    pub fn placeholder<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        let usage = TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST;
        let cube = backend.create_texture(&TextureDescriptor::new_cube(
            "placeholder environment",
            1,
            1,
            HDR_FORMAT,
            usage,
        ))?;
        let radiance = f16::from_f32(PLACEHOLDER_RADIANCE);
        let texel = [radiance, radiance, radiance, f16::ONE];
        let faces: Vec<f16> = texel.iter().copied().cycle().take(4 * 6).collect();
        backend.write_texture(
            cube,
            &TextureWrite {
                depth_or_array_layers: 6,
                ..TextureWrite::whole_2d(1, 1, HDR_FORMAT)
            },
            bytemuck::cast_slice(&faces),
        );
        let cube_view = backend.create_texture_view_with(
            cube,
            &TextureViewDescriptor::with_dimension(TextureViewDimension::Cube),
        )?;

        // Full reflectance scale, no bias
        let lut = backend.create_texture(&TextureDescriptor::new_2d(
            "placeholder brdf lut",
            1,
            1,
            HDR_FORMAT,
            usage,
        ))?;
        let lut_texel = [f16::ONE, f16::ZERO, f16::ZERO, f16::ONE];
        backend.write_texture(
            lut,
            &TextureWrite::whole_2d(1, 1, HDR_FORMAT),
            bytemuck::cast_slice(&lut_texel),
        );
        let lut_view = backend.create_texture_view(lut)?;

        Ok(Self {
            textures: vec![cube, lut],
            buffers: Vec::new(),
            skybox: cube_view,
            irradiance: cube_view,
            prefilter: cube_view,
            brdf_lut: lut_view,
        })
    }

    pub fn destroy<B: GraphicsBackend>(&self, backend: &mut B) {
        for texture in &self.textures {
            backend.destroy_texture(*texture);
        }
        for buffer in &self.buffers {
            backend.destroy_buffer(*buffer);
        }
    }
}

/// Compute pipelines that bake [`EnvironmentMaps`]
pub struct IblGenerator {
    equirect_layout: BindGroupLayoutHandle,
    convolve_layout: BindGroupLayoutHandle,
    brdf_layout: BindGroupLayoutHandle,
    equirect: ComputePipelineHandle,
    irradiance: ComputePipelineHandle,
    prefilter: ComputePipelineHandle,
    brdf: ComputePipelineHandle,
    sampler: SamplerHandle,
}

impl IblGenerator {
    pub fn new<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        use BindingType as T;
        use ShaderStageFlags as S;

        let cube_out = T::StorageTexture {
            format: HDR_FORMAT,
            view_dimension: TextureViewDimension::D2Array,
        };
        let sampler = T::Sampler { comparison: false };

        let equirect_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::COMPUTE, T::float_texture(TextureViewDimension::D2)),
            BindGroupLayoutEntry::new(1, S::COMPUTE, sampler.clone()),
            BindGroupLayoutEntry::new(2, S::COMPUTE, T::UniformBuffer),
            BindGroupLayoutEntry::new(3, S::COMPUTE, cube_out.clone()),
        ])?;
        let convolve_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::COMPUTE, T::float_texture(TextureViewDimension::Cube)),
            BindGroupLayoutEntry::new(1, S::COMPUTE, sampler),
            BindGroupLayoutEntry::new(2, S::COMPUTE, T::UniformBuffer),
            BindGroupLayoutEntry::new(3, S::COMPUTE, cube_out),
        ])?;
        let brdf_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::COMPUTE, T::UniformBuffer),
            BindGroupLayoutEntry::new(1, S::COMPUTE, T::storage_2d(HDR_FORMAT)),
        ])?;

        let equirect = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
            "ibl_equirect",
            &equirect_shader(),
            "cs_main",
            vec![equirect_layout],
        ))?;
        let irradiance = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
            "ibl_irradiance",
            &irradiance_shader(),
            "cs_main",
            vec![convolve_layout],
        ))?;
        let prefilter = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
            "ibl_prefilter",
            &prefilter_shader(),
            "cs_main",
            vec![convolve_layout],
        ))?;
        let brdf = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
            "ibl_brdf",
            &brdf_shader(),
            "cs_main",
            vec![brdf_layout],
        ))?;

        let sampler = backend.create_sampler(&SamplerDescriptor::linear_clamp("ibl"))?;

        Ok(Self {
            equirect_layout,
            convolve_layout,
            brdf_layout,
            equirect,
            irradiance,
            prefilter,
            brdf,
            sampler,
        })
    }

    /// Record the generation of every map from `image`
    pub fn generate<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        image: &HdrImage,
        config: &IblConfig,
    ) -> BackendResult<EnvironmentMaps> {
        log::info!(
            "Generating IBL maps from a {}x{} environment",
            image.width,
            image.height
        );
        let mut textures = Vec::new();
        let mut buffers = Vec::new();
        let storage = TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING;

        let source = backend.create_texture(&TextureDescriptor::new_2d(
            "environment source",
            image.width,
            image.height,
            HDR_FORMAT,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        ))?;
        textures.push(source);
        backend.write_texture(
            source,
            &TextureWrite::whole_2d(image.width, image.height, HDR_FORMAT),
            image.as_bytes(),
        );
        let source_view = backend.create_texture_view(source)?;

        // Equirectangular to cube
        let skybox = backend.create_texture(&TextureDescriptor::new_cube(
            "skybox",
            config.skybox_size,
            1,
            HDR_FORMAT,
            storage,
        ))?;
        textures.push(skybox);
        let skybox_cube = backend.create_texture_view_with(
            skybox,
            &TextureViewDescriptor::with_dimension(TextureViewDimension::Cube),
        )?;
        let skybox_faces = backend.create_texture_view_with(skybox, &TextureViewDescriptor::mip_array(0))?;
        let params = params_buffer(
            backend,
            &mut buffers,
            "ibl equirect",
            Vec4::new(0.0, config.skybox_size as f32, 0.0, image.width as f32),
        )?;
        let equirect_group = backend.create_bind_group(
            self.equirect_layout,
            &[
                (0, BindGroupEntry::Texture(source_view)),
                (1, BindGroupEntry::Sampler(self.sampler)),
                (2, BindGroupEntry::buffer(params)),
                (3, BindGroupEntry::StorageTexture(skybox_faces)),
            ],
        )?;

        // Diffuse irradiance
        let irradiance = backend.create_texture(&TextureDescriptor::new_cube(
            "irradiance",
            config.irradiance_size,
            1,
            HDR_FORMAT,
            storage,
        ))?;
        textures.push(irradiance);
        let irradiance_cube = backend.create_texture_view_with(
            irradiance,
            &TextureViewDescriptor::with_dimension(TextureViewDimension::Cube),
        )?;
        let irradiance_faces =
            backend.create_texture_view_with(irradiance, &TextureViewDescriptor::mip_array(0))?;
        let params = params_buffer(
            backend,
            &mut buffers,
            "ibl irradiance",
            Vec4::new(0.0, config.irradiance_size as f32, 0.0, config.skybox_size as f32),
        )?;
        let irradiance_group = backend.create_bind_group(
            self.convolve_layout,
            &[
                (0, BindGroupEntry::Texture(skybox_cube)),
                (1, BindGroupEntry::Sampler(self.sampler)),
                (2, BindGroupEntry::buffer(params)),
                (3, BindGroupEntry::StorageTexture(irradiance_faces)),
            ],
        )?;

        // Specular prefilter, roughness grows with the mip
        let mips = config.prefilter_mips.max(1);
        let prefilter = backend.create_texture(&TextureDescriptor::new_cube(
            "prefilter",
            config.prefilter_size,
            mips,
            HDR_FORMAT,
            storage,
        ))?;
        textures.push(prefilter);
        let prefilter_cube = backend.create_texture_view_with(
            prefilter,
            &TextureViewDescriptor::with_dimension(TextureViewDimension::Cube),
        )?;
        let mut prefilter_groups = Vec::with_capacity(mips as usize);
        for mip in 0..mips {
            let face_size = mip_size(config.prefilter_size, mip);
            let faces = backend.create_texture_view_with(prefilter, &TextureViewDescriptor::mip_array(mip))?;
            let params = params_buffer(
                backend,
                &mut buffers,
                &format!("ibl prefilter {}", mip),
                Vec4::new(
                    mip_roughness(mip, mips),
                    face_size as f32,
                    PREFILTER_SAMPLES as f32,
                    config.skybox_size as f32,
                ),
            )?;
            let group = backend.create_bind_group(
                self.convolve_layout,
                &[
                    (0, BindGroupEntry::Texture(skybox_cube)),
                    (1, BindGroupEntry::Sampler(self.sampler)),
                    (2, BindGroupEntry::buffer(params)),
                    (3, BindGroupEntry::StorageTexture(faces)),
                ],
            )?;
            prefilter_groups.push((face_size, group));
        }

        // Split-sum lookup table
        let brdf_lut = backend.create_texture(&TextureDescriptor::new_2d(
            "brdf lut",
            config.brdf_lut_size,
            config.brdf_lut_size,
            HDR_FORMAT,
            storage,
        ))?;
        textures.push(brdf_lut);
        let brdf_view = backend.create_texture_view(brdf_lut)?;
        let params = params_buffer(
            backend,
            &mut buffers,
            "ibl brdf",
            Vec4::new(0.0, config.brdf_lut_size as f32, BRDF_SAMPLES as f32, 0.0),
        )?;
        let brdf_group = backend.create_bind_group(
            self.brdf_layout,
            &[
                (0, BindGroupEntry::buffer(params)),
                (1, BindGroupEntry::StorageTexture(brdf_view)),
            ],
        )?;

        backend.begin_compute_pass(&ComputePassDescriptor::labeled("ibl_equirect"));
        backend.set_compute_pipeline(self.equirect);
        backend.set_bind_group(0, equirect_group);
        let groups = config.skybox_size.div_ceil(CUBE_WORKGROUP);
        backend.dispatch_compute(groups, groups, 6);
        backend.end_compute_pass();

        backend.begin_compute_pass(&ComputePassDescriptor::labeled("ibl_irradiance"));
        backend.set_compute_pipeline(self.irradiance);
        backend.set_bind_group(0, irradiance_group);
        let groups = config.irradiance_size.div_ceil(IRRADIANCE_WORKGROUP);
        backend.dispatch_compute(groups, groups, 6);
        backend.end_compute_pass();

        backend.begin_compute_pass(&ComputePassDescriptor::labeled("ibl_prefilter"));
        backend.set_compute_pipeline(self.prefilter);
        for (face_size, group) in prefilter_groups {
            backend.set_bind_group(0, group);
            let groups = face_size.div_ceil(CUBE_WORKGROUP);
            backend.dispatch_compute(groups, groups, 6);
        }
        backend.end_compute_pass();

        backend.begin_compute_pass(&ComputePassDescriptor::labeled("ibl_brdf"));
        backend.set_compute_pipeline(self.brdf);
        backend.set_bind_group(0, brdf_group);
        let groups = config.brdf_lut_size.div_ceil(CUBE_WORKGROUP);
        backend.dispatch_compute(groups, groups, 1);
        backend.end_compute_pass();

        Ok(EnvironmentMaps {
            textures,
            buffers,
            skybox: skybox_cube,
            irradiance: irradiance_cube,
            prefilter: prefilter_cube,
            brdf_lut: brdf_view,
        })
    }
}

fn params_buffer<B: GraphicsBackend>(
    backend: &mut B,
    buffers: &mut Vec<BufferHandle>,
    label: &str,
    params: Vec4,
) -> BackendResult<BufferHandle> {
    let buffer = backend.create_buffer_init(
        &BufferDescriptor::new(label, 0, BufferUsage::UNIFORM),
        bytemuck::bytes_of(&IblParams { params }),
    )?;
    buffers.push(buffer);
    Ok(buffer)
}

/// Edge of `mip`, never below one texel
pub fn mip_size(size: u32, mip: u32) -> u32 {
    (size >> mip).max(1)
}

/// Roughness baked into prefilter `mip`: `mip / (mips - 1)`
pub fn mip_roughness(mip: u32, mips: u32) -> f32 {
    if mips <= 1 {
        0.0
    } else {
        mip as f32 / (mips - 1) as f32
    }
}

pub fn equirect_shader() -> String {
    [IBL_COMMON_WGSL, EQUIRECT_SHADER].concat()
}

pub fn irradiance_shader() -> String {
    [IBL_COMMON_WGSL, IRRADIANCE_SHADER].concat()
}

pub fn prefilter_shader() -> String {
    [IBL_COMMON_WGSL, SAMPLING_WGSL, PREFILTER_SHADER].concat()
}

pub fn brdf_shader() -> String {
    [IBL_COMMON_WGSL, SAMPLING_WGSL, BRDF_SHADER].concat()
}

const IBL_COMMON_WGSL: &str = r#"
const PI: f32 = 3.14159265359;

struct IblParams {
    // roughness, face size, sample count, source size
    values: vec4<f32>,
}

// Faces in +X, -X, +Y, -Y, +Z, -Z order; uv in -1..1
fn cube_direction(face: u32, uv: vec2<f32>) -> vec3<f32> {
    var dir: vec3<f32>;
    switch face {
        case 0u: { dir = vec3<f32>(1.0, -uv.y, -uv.x); }
        case 1u: { dir = vec3<f32>(-1.0, -uv.y, uv.x); }
        case 2u: { dir = vec3<f32>(uv.x, 1.0, uv.y); }
        case 3u: { dir = vec3<f32>(uv.x, -1.0, -uv.y); }
        case 4u: { dir = vec3<f32>(uv.x, -uv.y, 1.0); }
        default: { dir = vec3<f32>(-uv.x, -uv.y, -1.0); }
    }
    return normalize(dir);
}

fn texel_uv(id: vec2<u32>, size: u32) -> vec2<f32> {
    return (vec2<f32>(id) + 0.5) / f32(size) * 2.0 - 1.0;
}
"#;

const SAMPLING_WGSL: &str = r#"
fn hammersley(i: u32, count: u32) -> vec2<f32> {
    return vec2<f32>(f32(i) / f32(count), f32(reverseBits(i)) * 2.3283064365386963e-10);
}

fn importance_sample_ggx(xi: vec2<f32>, n: vec3<f32>, roughness: f32) -> vec3<f32> {
    let a = roughness * roughness;
    let phi = 2.0 * PI * xi.x;
    let cos_theta = sqrt((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y));
    let sin_theta = sqrt(1.0 - cos_theta * cos_theta);
    let h = vec3<f32>(cos(phi) * sin_theta, sin(phi) * sin_theta, cos_theta);

    var up = vec3<f32>(1.0, 0.0, 0.0);
    if abs(n.z) < 0.999 {
        up = vec3<f32>(0.0, 0.0, 1.0);
    }
    let tangent = normalize(cross(up, n));
    let bitangent = cross(n, tangent);
    return normalize(tangent * h.x + bitangent * h.y + n * h.z);
}
"#;

const EQUIRECT_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> params: IblParams;
@group(0) @binding(3) var faces: texture_storage_2d_array<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = u32(params.values.y);
    if id.x >= size || id.y >= size {
        return;
    }
    let dir = cube_direction(id.z, texel_uv(id.xy, size));
    let uv = vec2<f32>(
        atan2(dir.z, dir.x) * 0.5 / PI + 0.5,
        0.5 - asin(clamp(dir.y, -1.0, 1.0)) / PI,
    );
    let color = textureSampleLevel(source, source_sampler, uv, 0.0).rgb;
    textureStore(faces, id.xy, id.z, vec4<f32>(color, 1.0));
}
"#;

const IRRADIANCE_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_cube<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> params: IblParams;
@group(0) @binding(3) var faces: texture_storage_2d_array<rgba16float, write>;

const SAMPLE_DELTA: f32 = 0.05;

@compute @workgroup_size(4, 4, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = u32(params.values.y);
    if id.x >= size || id.y >= size {
        return;
    }
    let n = cube_direction(id.z, texel_uv(id.xy, size));
    var up = vec3<f32>(0.0, 1.0, 0.0);
    if abs(n.y) >= 0.999 {
        up = vec3<f32>(1.0, 0.0, 0.0);
    }
    let right = normalize(cross(n, up));
    up = cross(n, right);

    var irradiance = vec3<f32>(0.0);
    var samples = 0.0;
    for (var phi = 0.0; phi < 2.0 * PI; phi = phi + SAMPLE_DELTA) {
        for (var theta = 0.0; theta < 0.5 * PI; theta = theta + SAMPLE_DELTA) {
            let t = vec3<f32>(sin(theta) * cos(phi), sin(theta) * sin(phi), cos(theta));
            let dir = t.x * right + t.y * up + t.z * n;
            irradiance = irradiance
                + textureSampleLevel(source, source_sampler, dir, 0.0).rgb * cos(theta) * sin(theta);
            samples = samples + 1.0;
        }
    }
    textureStore(faces, id.xy, id.z, vec4<f32>(PI * irradiance / samples, 1.0));
}
"#;

const PREFILTER_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_cube<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> params: IblParams;
@group(0) @binding(3) var faces: texture_storage_2d_array<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = u32(params.values.y);
    if id.x >= size || id.y >= size {
        return;
    }
    let roughness = params.values.x;
    let n = cube_direction(id.z, texel_uv(id.xy, size));

    if roughness <= 0.0 {
        let color = textureSampleLevel(source, source_sampler, n, 0.0).rgb;
        textureStore(faces, id.xy, id.z, vec4<f32>(color, 1.0));
        return;
    }

    let count = u32(params.values.z);
    var color = vec3<f32>(0.0);
    var weight = 0.0;
    for (var i = 0u; i < count; i = i + 1u) {
        let h = importance_sample_ggx(hammersley(i, count), n, roughness);
        let l = normalize(2.0 * dot(n, h) * h - n);
        let n_dot_l = dot(n, l);
        if n_dot_l > 0.0 {
            color = color + textureSampleLevel(source, source_sampler, l, 0.0).rgb * n_dot_l;
            weight = weight + n_dot_l;
        }
    }
    textureStore(faces, id.xy, id.z, vec4<f32>(color / max(weight, 0.001), 1.0));
}
"#;

const BRDF_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> params: IblParams;
@group(0) @binding(1) var lut: texture_storage_2d<rgba16float, write>;

fn geometry_schlick_ggx(n_dot: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    return n_dot / (n_dot * (1.0 - k) + k);
}

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = u32(params.values.y);
    if id.x >= size || id.y >= size {
        return;
    }
    let n_dot_v = max((f32(id.x) + 0.5) / f32(size), 1e-3);
    let roughness = (f32(id.y) + 0.5) / f32(size);
    let v = vec3<f32>(sqrt(1.0 - n_dot_v * n_dot_v), 0.0, n_dot_v);
    let n = vec3<f32>(0.0, 0.0, 1.0);

    let count = u32(params.values.z);
    var scale = 0.0;
    var bias = 0.0;
    for (var i = 0u; i < count; i = i + 1u) {
        let h = importance_sample_ggx(hammersley(i, count), n, roughness);
        let l = normalize(2.0 * dot(v, h) * h - v);
        let n_dot_l = max(l.z, 0.0);
        let n_dot_h = max(h.z, 0.0);
        let v_dot_h = max(dot(v, h), 0.0);
        if n_dot_l > 0.0 {
            let g = geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness);
            let g_vis = g * v_dot_h / max(n_dot_h * n_dot_v, 1e-4);
            let fc = pow(1.0 - v_dot_h, 5.0);
            scale = scale + (1.0 - fc) * g_vis;
            bias = bias + fc * g_vis;
        }
    }
    textureStore(lut, id.xy, vec4<f32>(scale / f32(count), bias / f32(count), 0.0, 1.0));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_roughness_spans_unit_range() {
        assert_eq!(mip_roughness(0, 5), 0.0);
        assert_eq!(mip_roughness(4, 5), 1.0);
        assert_eq!(mip_roughness(2, 5), 0.5);
        assert_eq!(mip_roughness(0, 1), 0.0);
    }

    #[test]
    fn test_mip_size_never_zero() {
        assert_eq!(mip_size(256, 0), 256);
        assert_eq!(mip_size(256, 4), 16);
        assert_eq!(mip_size(4, 5), 1);
    }
}
