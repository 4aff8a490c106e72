//! Screen-space ambient occlusion
//!
//! Occlusion is estimated at half resolution from the prepass depth and
//! view-space normals with a hemisphere kernel, blurred separably with a
//! Gaussian whose taps are paired up to use bilinear filtering, then
//! upscaled to the full-resolution texture the shading pass samples.

use crate::backend::*;
use crate::pipeline::{FrameLayouts, FrameResources, VIEW_WGSL};
use crate::render_graph::*;
use glam::{Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

const WORKGROUP: u32 = 8;

/// SSAO, blur and upscale pipelines
pub fn create_pipelines<B: GraphicsBackend>(
    backend: &mut B,
    layouts: &FrameLayouts,
    sample_count: u32,
) -> BackendResult<(ComputePipelineHandle, ComputePipelineHandle, ComputePipelineHandle)> {
    let ssao = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
        "ssao",
        &ssao_shader(sample_count > 1),
        "cs_main",
        vec![layouts.view, layouts.ssao],
    ))?;
    let blur = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
        "ssao_blur",
        BLUR_SHADER,
        "cs_main",
        vec![layouts.filter],
    ))?;
    let upscale = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
        "ssao_upscale",
        UPSCALE_SHADER,
        "cs_main",
        vec![layouts.resample],
    ))?;
    Ok((ssao, blur, upscale))
}

/// Full SSAO source for single or multisampled prepass targets
pub fn ssao_shader(multisampled: bool) -> String {
    let inputs = if multisampled {
        SSAO_MSAA_INPUTS
    } else {
        SSAO_INPUTS
    };
    [VIEW_WGSL, inputs, SSAO_SHADER].concat()
}

/// Hemisphere kernel around +Z, denser towards the origin
pub fn ssao_kernel(count: usize, seed: u64) -> Vec<Vec4> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let direction = Vec3::new(
                rng.random_range(-1.0f32..1.0),
                rng.random_range(-1.0f32..1.0),
                rng.random_range(0.0f32..1.0),
            )
            .try_normalize()
            .unwrap_or(Vec3::Z);
            let t = i as f32 / count as f32;
            let scale = 0.1 + 0.9 * t * t;
            (direction * rng.random_range(0.0f32..1.0) * scale).extend(0.0)
        })
        .collect()
}

/// Gaussian with `side_taps` texels on each side, pairs of neighbouring taps
/// merged into one bilinear fetch.
///
/// Element 0 is `(0, centre weight)`; the rest are `(offset, weight)` applied
/// on both sides. Weights sum to one over the full kernel.
pub fn compressed_gaussian(side_taps: usize, sigma: f32) -> Vec<Vec2> {
    let sigma = sigma.max(1e-3);
    let raw: Vec<f32> = (0..=side_taps)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total = raw[0] + 2.0 * raw[1..].iter().sum::<f32>();
    let weights: Vec<f32> = raw.iter().map(|w| w / total).collect();

    let mut taps = vec![Vec2::new(0.0, weights[0])];
    let mut i = 1;
    while i <= side_taps {
        if i < side_taps {
            let (a, b) = (weights[i], weights[i + 1]);
            let sum = a + b;
            taps.push(Vec2::new((i as f32 * a + (i + 1) as f32 * b) / sum, sum));
        } else {
            taps.push(Vec2::new(i as f32, weights[i]));
        }
        i += 2;
    }
    taps
}

/// Half-resolution occlusion
pub struct SsaoPass {
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
    view_bind_group: BindGroupHandle,
    kernel_buffer: BufferHandle,
    noise_view: TextureViewHandle,
    depth: ResourceId,
    normals: ResourceId,
    output: ResourceId,
    size: (u32, u32),
    bind_group: Option<BindGroupHandle>,
}

impl SsaoPass {
    pub fn new(
        pipeline: ComputePipelineHandle,
        layout: BindGroupLayoutHandle,
        resources: &FrameResources,
        depth: ResourceId,
        normals: ResourceId,
        output: ResourceId,
    ) -> Self {
        Self {
            pipeline,
            layout,
            view_bind_group: resources.view_bind_groups[0],
            kernel_buffer: resources.ssao_kernel_buffer,
            noise_view: resources.noise_view,
            depth,
            normals,
            output,
            size: (1, 1),
            bind_group: None,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for SsaoPass {
    fn name(&self) -> &str {
        "ssao"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let (width, height) = ctx.screen_size();
        self.size = TextureSize::half().resolve(width, height);
        ctx.read(self.depth, ResourceUsage::TextureRead);
        ctx.read(self.normals, ResourceUsage::TextureRead);
        ctx.write(self.output, ResourceUsage::StorageWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        let depth = ctx.view(self.depth)?;
        let normals = ctx.view(self.normals)?;
        let output = ctx.view(self.output)?;
        self.bind_group = Some(ctx.backend.create_bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::Texture(depth)),
                (1, BindGroupEntry::Texture(normals)),
                (2, BindGroupEntry::Texture(self.noise_view)),
                (3, BindGroupEntry::buffer(self.kernel_buffer)),
                (4, BindGroupEntry::StorageTexture(output)),
            ],
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let Some(bind_group) = self.bind_group else {
            return;
        };
        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_compute_pass(&ComputePassDescriptor {
            label: Some("ssao".to_string()),
            timestamp_writes,
        });
        backend.set_compute_pipeline(self.pipeline);
        backend.set_bind_group(0, self.view_bind_group);
        backend.set_bind_group(1, bind_group);
        backend.dispatch_compute(
            self.size.0.div_ceil(WORKGROUP),
            self.size.1.div_ceil(WORKGROUP),
            1,
        );
        backend.end_compute_pass();
    }
}

/// One direction of the separable blur
pub struct SsaoBlurPass {
    name: String,
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
    params: BufferHandle,
    sampler: SamplerHandle,
    source: ResourceId,
    destination: ResourceId,
    size: (u32, u32),
    bind_group: Option<BindGroupHandle>,
}

impl SsaoBlurPass {
    pub fn new(
        name: &str,
        pipeline: ComputePipelineHandle,
        layout: BindGroupLayoutHandle,
        params: BufferHandle,
        sampler: SamplerHandle,
        source: ResourceId,
        destination: ResourceId,
    ) -> Self {
        Self {
            name: name.to_string(),
            pipeline,
            layout,
            params,
            sampler,
            source,
            destination,
            size: (1, 1),
            bind_group: None,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for SsaoBlurPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let (width, height) = ctx.screen_size();
        self.size = TextureSize::half().resolve(width, height);
        ctx.read(self.source, ResourceUsage::TextureRead);
        ctx.write(self.destination, ResourceUsage::StorageWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        let source = ctx.view(self.source)?;
        let destination = ctx.view(self.destination)?;
        self.bind_group = Some(ctx.backend.create_bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::Texture(source)),
                (1, BindGroupEntry::Sampler(self.sampler)),
                (2, BindGroupEntry::buffer(self.params)),
                (3, BindGroupEntry::StorageTexture(destination)),
            ],
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let Some(bind_group) = self.bind_group else {
            return;
        };
        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_compute_pass(&ComputePassDescriptor {
            label: Some(self.name.clone()),
            timestamp_writes,
        });
        backend.set_compute_pipeline(self.pipeline);
        backend.set_bind_group(0, bind_group);
        backend.dispatch_compute(
            self.size.0.div_ceil(WORKGROUP),
            self.size.1.div_ceil(WORKGROUP),
            1,
        );
        backend.end_compute_pass();
    }
}

/// Bilinear upscale of the blurred occlusion to full resolution
pub struct SsaoUpscalePass {
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
    sampler: SamplerHandle,
    source: ResourceId,
    destination: ResourceId,
    size: (u32, u32),
    bind_group: Option<BindGroupHandle>,
}

impl SsaoUpscalePass {
    pub fn new(
        pipeline: ComputePipelineHandle,
        layout: BindGroupLayoutHandle,
        sampler: SamplerHandle,
        source: ResourceId,
        destination: ResourceId,
    ) -> Self {
        Self {
            pipeline,
            layout,
            sampler,
            source,
            destination,
            size: (1, 1),
            bind_group: None,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for SsaoUpscalePass {
    fn name(&self) -> &str {
        "ssao_upscale"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        self.size = ctx.screen_size();
        ctx.read(self.source, ResourceUsage::TextureRead);
        ctx.write(self.destination, ResourceUsage::StorageWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        let source = ctx.view(self.source)?;
        let destination = ctx.view(self.destination)?;
        self.bind_group = Some(ctx.backend.create_bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::Texture(source)),
                (1, BindGroupEntry::Sampler(self.sampler)),
                (2, BindGroupEntry::StorageTexture(destination)),
            ],
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let Some(bind_group) = self.bind_group else {
            return;
        };
        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_compute_pass(&ComputePassDescriptor {
            label: Some("ssao_upscale".to_string()),
            timestamp_writes,
        });
        backend.set_compute_pipeline(self.pipeline);
        backend.set_bind_group(0, bind_group);
        backend.dispatch_compute(
            self.size.0.div_ceil(WORKGROUP),
            self.size.1.div_ceil(WORKGROUP),
            1,
        );
        backend.end_compute_pass();
    }
}

const SSAO_INPUTS: &str = r#"
@group(1) @binding(0) var depth_texture: texture_depth_2d;
@group(1) @binding(1) var normal_texture: texture_2d<f32>;

fn load_depth(p: vec2<i32>) -> f32 {
    return textureLoad(depth_texture, p, 0);
}

fn load_normal(p: vec2<i32>) -> vec3<f32> {
    return textureLoad(normal_texture, p, 0).xyz;
}
"#;

// Sample 0 stands in for the pixel
const SSAO_MSAA_INPUTS: &str = r#"
@group(1) @binding(0) var depth_texture: texture_depth_multisampled_2d;
@group(1) @binding(1) var normal_texture: texture_multisampled_2d<f32>;

fn load_depth(p: vec2<i32>) -> f32 {
    return textureLoad(depth_texture, p, 0);
}

fn load_normal(p: vec2<i32>) -> vec3<f32> {
    return textureLoad(normal_texture, p, 0).xyz;
}
"#;

const SSAO_SHADER: &str = r#"
struct SsaoParams {
    kernel: array<vec4<f32>, 64>,
    // radius, bias, kernel size
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> view: View;
@group(1) @binding(2) var noise_texture: texture_3d<f32>;
@group(1) @binding(3) var<uniform> ssao: SsaoParams;
@group(1) @binding(4) var ao_output: texture_storage_2d<rgba16float, write>;

fn view_position(p: vec2<i32>, full_size: vec2<f32>) -> vec3<f32> {
    let uv = (vec2<f32>(p) + 0.5) / full_size;
    let ndc = vec2<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let position = view.inverse_projection * vec4<f32>(ndc, load_depth(p), 1.0);
    return position.xyz / position.w;
}

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let out_size = textureDimensions(ao_output);
    if id.x >= out_size.x || id.y >= out_size.y {
        return;
    }
    let full = textureDimensions(depth_texture);
    let full_size = vec2<f32>(full);
    let max_pixel = vec2<i32>(full) - 1;
    let p = min(vec2<i32>(id.xy * 2u), max_pixel);

    if load_depth(p) >= 1.0 {
        textureStore(ao_output, id.xy, vec4<f32>(1.0));
        return;
    }

    let origin = view_position(p, full_size);
    let normal = normalize(load_normal(p));
    let noise = textureLoad(noise_texture, vec3<i32>(p % 16, 0), 0).xy * 2.0 - 1.0;
    let jitter = vec3<f32>(noise, 0.0);
    let tangent = normalize(jitter - normal * dot(jitter, normal) + vec3<f32>(1e-4, 0.0, 0.0));
    let bitangent = cross(normal, tangent);
    let tbn = mat3x3<f32>(tangent, bitangent, normal);

    let radius = ssao.params.x;
    let bias = ssao.params.y;
    let count = min(u32(ssao.params.z), 64u);
    var occlusion = 0.0;
    for (var i = 0u; i < count; i = i + 1u) {
        let sample_position = origin + tbn * ssao.kernel[i].xyz * radius;
        let clip = view.projection * vec4<f32>(sample_position, 1.0);
        let uv = clip.xy / clip.w * vec2<f32>(0.5, -0.5) + 0.5;
        if any(uv < vec2<f32>(0.0)) || any(uv >= vec2<f32>(1.0)) {
            continue;
        }
        let q = min(vec2<i32>(uv * full_size), max_pixel);
        let scene_z = view_position(q, full_size).z;
        let falloff = smoothstep(0.0, 1.0, radius / max(abs(origin.z - scene_z), 1e-4));
        if scene_z >= sample_position.z + bias {
            occlusion = occlusion + falloff;
        }
    }

    let ao = 1.0 - occlusion / f32(max(count, 1u));
    textureStore(ao_output, id.xy, vec4<f32>(ao, ao, ao, 1.0));
}
"#;

/// Separable blur with paired taps
pub const BLUR_SHADER: &str = r#"
struct BlurParams {
    // offset, weight
    taps: array<vec4<f32>, 16>,
    // direction, side taps, centre weight
    params: vec4<f32>,
}

@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> blur: BlurParams;
@group(0) @binding(3) var destination: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(destination);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let texel = 1.0 / vec2<f32>(size);
    let uv = (vec2<f32>(id.xy) + 0.5) * texel;
    let direction = blur.params.xy * texel;

    var color = textureSampleLevel(source, source_sampler, uv, 0.0) * blur.params.w;
    let count = min(u32(blur.params.z), 16u);
    for (var i = 0u; i < count; i = i + 1u) {
        let offset = direction * blur.taps[i].x;
        let weight = blur.taps[i].y;
        color = color + textureSampleLevel(source, source_sampler, uv + offset, 0.0) * weight;
        color = color + textureSampleLevel(source, source_sampler, uv - offset, 0.0) * weight;
    }
    textureStore(destination, id.xy, color);
}
"#;

/// Bilinear resample into a differently sized target
pub const UPSCALE_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var destination: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(destination);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(size);
    textureStore(destination, id.xy, textureSampleLevel(source, source_sampler, uv, 0.0));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_in_upper_hemisphere() {
        let kernel = ssao_kernel(32, 11);
        assert_eq!(kernel.len(), 32);
        for sample in &kernel {
            assert!(sample.z >= 0.0);
            assert!(sample.truncate().length() <= 1.0 + 1e-5);
        }
        assert_eq!(kernel, ssao_kernel(32, 11));
    }

    #[test]
    fn test_compressed_gaussian_normalized() {
        let taps = compressed_gaussian(8, 3.0);
        // Centre plus four merged pairs
        assert_eq!(taps.len(), 5);
        assert_eq!(taps[0].x, 0.0);
        let total = taps[0].y + 2.0 * taps[1..].iter().map(|t| t.y).sum::<f32>();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_compressed_gaussian_offsets_between_merged_texels() {
        let taps = compressed_gaussian(5, 2.0);
        assert_eq!(taps.len(), 4);
        assert!(taps[1].x > 1.0 && taps[1].x < 2.0);
        assert!(taps[2].x > 3.0 && taps[2].x < 4.0);
        // Odd tap count leaves the last texel unpaired
        assert_eq!(taps[3].x, 5.0);
    }
}
