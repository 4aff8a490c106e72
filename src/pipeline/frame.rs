//! Resolution-independent GPU state of the frame
//!
//! Layouts, pipelines and the shared uniform buffers are created once when the
//! renderer starts. Graph textures and the bind groups that reference them are
//! owned by the passes and rebuilt with the graph.

use crate::backend::*;
use crate::config::RendererConfig;
use crate::pipeline::postprocess::{bloom, ssao, tonemapping};
use crate::pipeline::uniforms::*;
use crate::pipeline::{culling, depth_prepass, pbr, shadow, RenderContext};
use crate::scene::LightingUniform;
use glam::Vec2;

/// Edge of the shadow rotation noise volume
pub const NOISE_SIZE: u32 = 16;

const POISSON_SEED: u64 = 0x5eed_0001;
const NOISE_SEED: u64 = 0x5eed_0002;
const SSAO_SEED: u64 = 0x5eed_0003;

/// Bind group layouts shared by the frame pipelines
#[derive(Debug, Clone, Copy)]
pub struct FrameLayouts {
    /// One context's `View`
    pub view: BindGroupLayoutHandle,
    /// Instance records plus one context's visible list
    pub draw: BindGroupLayoutHandle,
    /// Packed vertex words and mesh parameters
    pub mesh: BindGroupLayoutHandle,
    pub cull: BindGroupLayoutHandle,
    /// Lights, shadows, SSAO and IBL for the shading pass
    pub shading: BindGroupLayoutHandle,
    pub skybox: BindGroupLayoutHandle,
    pub ssao: BindGroupLayoutHandle,
    /// Source texture, sampler, parameters, storage output
    pub filter: BindGroupLayoutHandle,
    /// Source texture, sampler, storage output
    pub resample: BindGroupLayoutHandle,
    pub bloom_up: BindGroupLayoutHandle,
    pub composite: BindGroupLayoutHandle,
}

impl FrameLayouts {
    pub fn new<B: GraphicsBackend>(backend: &mut B, msaa_samples: u32) -> BackendResult<Self> {
        use BindingType as T;
        use ShaderStageFlags as S;

        let multisampled = msaa_samples > 1;
        let storage_ro = T::StorageBuffer { read_only: true };
        let storage_rw = T::StorageBuffer { read_only: false };
        let hdr_out = T::storage_2d(TextureFormat::Rgba16Float);
        let sampler = T::Sampler { comparison: false };

        let view = backend.create_bind_group_layout(&[BindGroupLayoutEntry::new(
            0,
            S::ALL,
            T::UniformBuffer,
        )])?;

        let draw = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::VERTEX, storage_ro.clone()),
            BindGroupLayoutEntry::new(1, S::VERTEX, storage_ro.clone()),
        ])?;

        let mesh = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::VERTEX, storage_ro.clone()),
            BindGroupLayoutEntry::new(1, S::VERTEX, T::UniformBuffer),
        ])?;

        let cull = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::COMPUTE, T::UniformBuffer),
            BindGroupLayoutEntry::new(1, S::COMPUTE, storage_ro.clone()),
            BindGroupLayoutEntry::new(2, S::COMPUTE, storage_rw.clone()),
            BindGroupLayoutEntry::new(3, S::COMPUTE, storage_rw),
            BindGroupLayoutEntry::new(4, S::COMPUTE, T::UniformBuffer),
        ])?;

        let shading = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::FRAGMENT, T::UniformBuffer),
            BindGroupLayoutEntry::new(1, S::FRAGMENT, T::UniformBuffer),
            BindGroupLayoutEntry::new(
                2,
                S::FRAGMENT,
                T::depth_texture(TextureViewDimension::D2Array, false),
            ),
            BindGroupLayoutEntry::new(3, S::FRAGMENT, T::Sampler { comparison: true }),
            BindGroupLayoutEntry::new(4, S::FRAGMENT, T::UniformBuffer),
            BindGroupLayoutEntry::new(5, S::FRAGMENT, T::float_texture(TextureViewDimension::D3)),
            BindGroupLayoutEntry::new(6, S::FRAGMENT, T::float_texture(TextureViewDimension::D2)),
            BindGroupLayoutEntry::new(7, S::FRAGMENT, sampler.clone()),
            BindGroupLayoutEntry::new(8, S::FRAGMENT, sampler.clone()),
            BindGroupLayoutEntry::new(9, S::FRAGMENT, T::float_texture(TextureViewDimension::Cube)),
            BindGroupLayoutEntry::new(10, S::FRAGMENT, T::float_texture(TextureViewDimension::Cube)),
            BindGroupLayoutEntry::new(11, S::FRAGMENT, T::float_texture(TextureViewDimension::D2)),
        ])?;

        let skybox = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::FRAGMENT, T::float_texture(TextureViewDimension::Cube)),
            BindGroupLayoutEntry::new(1, S::FRAGMENT, sampler.clone()),
        ])?;

        let ssao = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(
                0,
                S::COMPUTE,
                T::depth_texture(TextureViewDimension::D2, multisampled),
            ),
            BindGroupLayoutEntry::new(
                1,
                S::COMPUTE,
                T::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D2,
                    multisampled,
                },
            ),
            BindGroupLayoutEntry::new(
                2,
                S::COMPUTE,
                T::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D3,
                    multisampled: false,
                },
            ),
            BindGroupLayoutEntry::new(3, S::COMPUTE, T::UniformBuffer),
            BindGroupLayoutEntry::new(4, S::COMPUTE, hdr_out.clone()),
        ])?;

        let filter = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::COMPUTE, T::float_texture(TextureViewDimension::D2)),
            BindGroupLayoutEntry::new(1, S::COMPUTE, sampler.clone()),
            BindGroupLayoutEntry::new(2, S::COMPUTE, T::UniformBuffer),
            BindGroupLayoutEntry::new(3, S::COMPUTE, hdr_out.clone()),
        ])?;

        let resample = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::COMPUTE, T::float_texture(TextureViewDimension::D2)),
            BindGroupLayoutEntry::new(1, S::COMPUTE, sampler.clone()),
            BindGroupLayoutEntry::new(2, S::COMPUTE, hdr_out.clone()),
        ])?;

        let bloom_up = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::COMPUTE, T::float_texture(TextureViewDimension::D2)),
            BindGroupLayoutEntry::new(1, S::COMPUTE, T::float_texture(TextureViewDimension::D2)),
            BindGroupLayoutEntry::new(2, S::COMPUTE, sampler.clone()),
            BindGroupLayoutEntry::new(3, S::COMPUTE, T::UniformBuffer),
            BindGroupLayoutEntry::new(4, S::COMPUTE, hdr_out),
        ])?;

        let composite = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, S::FRAGMENT, T::float_texture(TextureViewDimension::D2)),
            BindGroupLayoutEntry::new(1, S::FRAGMENT, T::float_texture(TextureViewDimension::D2)),
            BindGroupLayoutEntry::new(2, S::FRAGMENT, sampler),
            BindGroupLayoutEntry::new(3, S::FRAGMENT, T::UniformBuffer),
        ])?;

        Ok(Self {
            view,
            draw,
            mesh,
            cull,
            shading,
            skybox,
            ssao,
            filter,
            resample,
            bloom_up,
            composite,
        })
    }
}

/// Every pipeline of the frame graph
#[derive(Debug, Clone, Copy)]
pub struct FramePipelines {
    pub cull: ComputePipelineHandle,
    pub shadow: RenderPipelineHandle,
    pub depth_prepass: RenderPipelineHandle,
    pub pbr: RenderPipelineHandle,
    pub skybox: RenderPipelineHandle,
    pub ssao: ComputePipelineHandle,
    pub blur: ComputePipelineHandle,
    pub upscale: ComputePipelineHandle,
    pub bloom_down: ComputePipelineHandle,
    pub bloom_up: ComputePipelineHandle,
    pub tonemap: RenderPipelineHandle,
}

impl FramePipelines {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        layouts: &FrameLayouts,
        context: &RenderContext,
        config: &RendererConfig,
    ) -> BackendResult<Self> {
        let samples = context.msaa_samples;
        let bias = DepthBias {
            constant: config.depth_bias_constant,
            slope_scale: config.depth_bias_slope,
            clamp: 0.0,
        };
        let (ssao, blur, upscale) = ssao::create_pipelines(backend, layouts, samples)?;
        let (bloom_down, bloom_up) = bloom::create_pipelines(backend, layouts)?;

        Ok(Self {
            cull: culling::create_pipeline(backend, layouts)?,
            shadow: shadow::create_pipeline(backend, layouts, bias)?,
            depth_prepass: depth_prepass::create_pipeline(backend, layouts, samples)?,
            pbr: pbr::create_pipeline(backend, layouts, samples, &config.shading)?,
            skybox: pbr::create_skybox_pipeline(backend, layouts, samples)?,
            ssao,
            blur,
            upscale,
            bloom_down,
            bloom_up,
            tonemap: tonemapping::create_pipeline(backend, layouts, context.surface_format)?,
        })
    }
}

/// Shared samplers
#[derive(Debug, Clone, Copy)]
pub struct FrameSamplers {
    pub linear: SamplerHandle,
    pub nearest_repeat: SamplerHandle,
    pub shadow: SamplerHandle,
}

/// Buffers and small textures that live as long as the renderer
#[derive(Debug, Clone)]
pub struct FrameResources {
    /// `MAX_VIEWS` consecutive [`ViewUniform`] slots, camera first
    pub views_buffer: BufferHandle,
    /// One bind group per view slot
    pub view_bind_groups: Vec<BindGroupHandle>,
    pub shadow_buffer: BufferHandle,
    pub lighting_buffer: BufferHandle,
    pub poisson_buffer: BufferHandle,
    pub noise_texture: TextureHandle,
    pub noise_view: TextureViewHandle,
    pub ssao_kernel_buffer: BufferHandle,
    /// Horizontal then vertical
    pub blur_buffers: [BufferHandle; 2],
    /// Downsample levels `0..=L` followed by upsample levels `0..L`
    pub bloom_buffers: Vec<BufferHandle>,
    pub grading_buffer: BufferHandle,
    pub samplers: FrameSamplers,
}

impl FrameResources {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        layouts: &FrameLayouts,
        config: &RendererConfig,
    ) -> BackendResult<Self> {
        let uniform = BufferUsage::UNIFORM | BufferUsage::COPY_DST;

        let views_buffer = backend.create_buffer(&BufferDescriptor::new(
            "views",
            ViewUniform::SIZE * MAX_VIEWS as u64,
            uniform,
        ))?;
        let view_bind_groups = (0..MAX_VIEWS as u64)
            .map(|slot| {
                backend.create_bind_group(
                    layouts.view,
                    &[(
                        0,
                        BindGroupEntry::buffer_range(
                            views_buffer,
                            slot * ViewUniform::SIZE,
                            ViewUniform::SIZE,
                        ),
                    )],
                )
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let shadow_buffer = backend.create_buffer(&BufferDescriptor::new(
            "shadow cascades",
            std::mem::size_of::<ShadowUniform>() as u64,
            uniform,
        ))?;
        let lighting_buffer = backend.create_buffer(&BufferDescriptor::new(
            "lighting",
            std::mem::size_of::<LightingUniform>() as u64,
            uniform,
        ))?;

        let points = shadow::poisson_disk(PoissonUniform::CAPACITY, POISSON_SEED);
        let poisson_buffer = backend.create_buffer_init(
            &BufferDescriptor::new("shadow poisson disk", 0, uniform),
            bytemuck::bytes_of(&PoissonUniform::new(&points)),
        )?;

        let noise_texture = backend.create_texture(&TextureDescriptor {
            label: Some("shadow rotation noise".to_string()),
            width: NOISE_SIZE,
            height: NOISE_SIZE,
            depth_or_array_layers: NOISE_SIZE,
            dimension: TextureDimension::D3,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        backend.write_texture(
            noise_texture,
            &TextureWrite {
                mip_level: 0,
                width: NOISE_SIZE,
                height: NOISE_SIZE,
                depth_or_array_layers: NOISE_SIZE,
                bytes_per_pixel: 4,
            },
            &shadow::rotation_noise(NOISE_SIZE, NOISE_SEED),
        );
        let noise_view = backend.create_texture_view(noise_texture)?;

        let kernel = ssao::ssao_kernel(config.ssao.kernel_size, SSAO_SEED);
        let ssao_kernel_buffer = backend.create_buffer_init(
            &BufferDescriptor::new("ssao kernel", 0, uniform),
            bytemuck::bytes_of(&SsaoUniform::new(&kernel, config.ssao.radius, config.ssao.bias)),
        )?;

        let taps = ssao::compressed_gaussian(config.ssao.blur_kernel_size, config.ssao.blur_sigma);
        let blur_h = backend.create_buffer_init(
            &BufferDescriptor::new("ssao blur h", 0, uniform),
            bytemuck::bytes_of(&BlurUniform::new(&taps, Vec2::X)),
        )?;
        let blur_v = backend.create_buffer_init(
            &BufferDescriptor::new("ssao blur v", 0, uniform),
            bytemuck::bytes_of(&BlurUniform::new(&taps, Vec2::Y)),
        )?;
        let blur_buffers = [blur_h, blur_v];

        let levels = config.bloom.levels;
        let mut bloom_buffers = Vec::with_capacity(2 * levels as usize + 1);
        for level in 0..=levels {
            let params = BloomUniform::new(&config.bloom, level, level == 0);
            bloom_buffers.push(backend.create_buffer_init(
                &BufferDescriptor::new(&format!("bloom down {}", level), 0, uniform),
                bytemuck::bytes_of(&params),
            )?);
        }
        for level in 0..levels {
            let params = BloomUniform::new(&config.bloom, level, false);
            bloom_buffers.push(backend.create_buffer_init(
                &BufferDescriptor::new(&format!("bloom up {}", level), 0, uniform),
                bytemuck::bytes_of(&params),
            )?);
        }

        let grading_buffer = backend.create_buffer_init(
            &BufferDescriptor::new("grading", 0, uniform),
            bytemuck::bytes_of(&GradingUniform::new(&config.grading, &config.bloom)),
        )?;

        let samplers = FrameSamplers {
            linear: backend.create_sampler(&SamplerDescriptor::linear_clamp("linear clamp"))?,
            nearest_repeat: backend
                .create_sampler(&SamplerDescriptor::nearest_repeat("nearest repeat"))?,
            shadow: backend.create_sampler(&SamplerDescriptor::comparison(
                "shadow comparison",
                CompareFunction::LessEqual,
            ))?,
        };

        Ok(Self {
            views_buffer,
            view_bind_groups,
            shadow_buffer,
            lighting_buffer,
            poisson_buffer,
            noise_texture,
            noise_view,
            ssao_kernel_buffer,
            blur_buffers,
            bloom_buffers,
            grading_buffer,
            samplers,
        })
    }

    /// Upsample parameters of `level`
    pub fn bloom_up_buffer(&self, levels: u32, level: u32) -> Option<BufferHandle> {
        self.bloom_buffers.get((levels + 1 + level) as usize).copied()
    }

    pub fn write_views(&self, backend: &mut impl GraphicsBackend, views: &[ViewUniform]) {
        backend.write_buffer(self.views_buffer, 0, bytemuck::cast_slice(views));
    }

    pub fn destroy<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_buffer(self.views_buffer);
        backend.destroy_buffer(self.shadow_buffer);
        backend.destroy_buffer(self.lighting_buffer);
        backend.destroy_buffer(self.poisson_buffer);
        backend.destroy_buffer(self.ssao_kernel_buffer);
        for buffer in self.blur_buffers.iter().chain(&self.bloom_buffers) {
            backend.destroy_buffer(*buffer);
        }
        backend.destroy_buffer(self.grading_buffer);
        backend.destroy_texture(self.noise_texture);
    }
}
