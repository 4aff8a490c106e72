//! Bloom
//!
//! The scene is copied into a padded level 0 with a soft-knee threshold, then
//! halved level by level with a 13-tap filter. The upsample walks back up with
//! a 3x3 tent, adding each coarser result onto the matching downsample level.
//! The padding keeps the wide filters from clamping at the screen edge; the
//! composite crops it away.

use crate::backend::*;
use crate::config::BloomConfig;
use crate::pipeline::{FrameLayouts, FrameResources};
use crate::render_graph::*;

const WORKGROUP: u32 = 8;

/// Downsample and upsample pipelines
pub fn create_pipelines<B: GraphicsBackend>(
    backend: &mut B,
    layouts: &FrameLayouts,
) -> BackendResult<(ComputePipelineHandle, ComputePipelineHandle)> {
    let down = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
        "bloom_downsample",
        &downsample_shader(),
        "cs_main",
        vec![layouts.filter],
    ))?;
    let up = backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
        "bloom_upsample",
        &upsample_shader(),
        "cs_main",
        vec![layouts.bloom_up],
    ))?;
    Ok((down, up))
}

pub fn downsample_shader() -> String {
    [BLOOM_PARAMS_WGSL, DOWNSAMPLE_SHADER].concat()
}

pub fn upsample_shader() -> String {
    [BLOOM_PARAMS_WGSL, UPSAMPLE_SHADER].concat()
}

/// Sizes of downsample levels `0..=levels`, each half the previous (rounded up)
pub fn bloom_chain_sizes(width: u32, height: u32, levels: u32) -> Vec<(u32, u32)> {
    let mut sizes = Vec::with_capacity(levels as usize + 1);
    let mut size = (width.max(1), height.max(1));
    sizes.push(size);
    for _ in 0..levels {
        size = (size.0.div_ceil(2), size.1.div_ceil(2));
        sizes.push(size);
    }
    sizes
}

fn dispatch_level<B: GraphicsBackend>(backend: &mut B, size: (u32, u32)) {
    backend.dispatch_compute(size.0.div_ceil(WORKGROUP), size.1.div_ceil(WORKGROUP), 1);
}

/// Prefilter plus downsample chain
pub struct BloomDownsamplePass {
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
    sampler: SamplerHandle,
    params: Vec<BufferHandle>,
    padding: u32,
    scene: ResourceId,
    levels: Vec<ResourceId>,
    sizes: Vec<(u32, u32)>,
    bind_groups: Vec<BindGroupHandle>,
}

impl BloomDownsamplePass {
    pub fn new(
        pipeline: ComputePipelineHandle,
        layout: BindGroupLayoutHandle,
        resources: &FrameResources,
        config: &BloomConfig,
        scene: ResourceId,
        levels: Vec<ResourceId>,
    ) -> Self {
        let count = config.levels as usize + 1;
        Self {
            pipeline,
            layout,
            sampler: resources.samplers.linear,
            params: resources.bloom_buffers.iter().take(count).copied().collect(),
            padding: config.padding,
            scene,
            levels,
            sizes: Vec::new(),
            bind_groups: Vec::new(),
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for BloomDownsamplePass {
    fn name(&self) -> &str {
        "bloom_downsample"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let (width, height) = ctx.screen_size();
        let chain_levels = self.levels.len().saturating_sub(1) as u32;
        self.sizes = bloom_chain_sizes(width + 2 * self.padding, height + 2 * self.padding, chain_levels);

        ctx.read(self.scene, ResourceUsage::TextureRead);
        for (i, &level) in self.levels.iter().enumerate() {
            ctx.write(level, ResourceUsage::StorageWrite);
            if i + 1 < self.levels.len() {
                ctx.read(level, ResourceUsage::TextureRead);
            }
        }
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        self.bind_groups.clear();
        let mut source = ctx.view(self.scene)?;
        for (&level, &params) in self.levels.iter().zip(&self.params) {
            let destination = ctx.view(level)?;
            let group = ctx.backend.create_bind_group(
                self.layout,
                &[
                    (0, BindGroupEntry::Texture(source)),
                    (1, BindGroupEntry::Sampler(self.sampler)),
                    (2, BindGroupEntry::buffer(params)),
                    (3, BindGroupEntry::StorageTexture(destination)),
                ],
            )?;
            self.bind_groups.push(group);
            source = destination;
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        if self.bind_groups.is_empty() {
            return;
        }
        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_compute_pass(&ComputePassDescriptor {
            label: Some("bloom_downsample".to_string()),
            timestamp_writes,
        });
        backend.set_compute_pipeline(self.pipeline);
        for (&group, &size) in self.bind_groups.iter().zip(&self.sizes) {
            backend.set_bind_group(0, group);
            dispatch_level(backend, size);
        }
        backend.end_compute_pass();
    }
}

/// Tent upsample back to level 0
pub struct BloomUpsamplePass {
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
    sampler: SamplerHandle,
    params: Vec<BufferHandle>,
    padding: u32,
    down: Vec<ResourceId>,
    up: Vec<ResourceId>,
    sizes: Vec<(u32, u32)>,
    /// Coarsest level first
    bind_groups: Vec<(BindGroupHandle, (u32, u32))>,
}

impl BloomUpsamplePass {
    pub fn new(
        pipeline: ComputePipelineHandle,
        layout: BindGroupLayoutHandle,
        resources: &FrameResources,
        config: &BloomConfig,
        down: Vec<ResourceId>,
        up: Vec<ResourceId>,
    ) -> Self {
        let params = (0..config.levels)
            .filter_map(|level| resources.bloom_up_buffer(config.levels, level))
            .collect();
        Self {
            pipeline,
            layout,
            sampler: resources.samplers.linear,
            params,
            padding: config.padding,
            down,
            up,
            sizes: Vec::new(),
            bind_groups: Vec::new(),
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for BloomUpsamplePass {
    fn name(&self) -> &str {
        "bloom_upsample"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let (width, height) = ctx.screen_size();
        self.sizes = bloom_chain_sizes(
            width + 2 * self.padding,
            height + 2 * self.padding,
            self.up.len() as u32,
        );

        for &level in &self.down {
            ctx.read(level, ResourceUsage::TextureRead);
        }
        for (i, &level) in self.up.iter().enumerate() {
            ctx.write(level, ResourceUsage::StorageWrite);
            if i > 0 {
                ctx.read(level, ResourceUsage::TextureRead);
            }
        }
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        self.bind_groups.clear();
        let levels = self.up.len();
        if levels == 0 || self.down.len() <= levels || self.params.len() < levels {
            return Ok(());
        }
        for level in (0..levels).rev() {
            let coarse = if level + 1 == levels {
                self.down[levels]
            } else {
                self.up[level + 1]
            };
            let coarse = ctx.view(coarse)?;
            let fine = ctx.view(self.down[level])?;
            let destination = ctx.view(self.up[level])?;
            let group = ctx.backend.create_bind_group(
                self.layout,
                &[
                    (0, BindGroupEntry::Texture(coarse)),
                    (1, BindGroupEntry::Texture(fine)),
                    (2, BindGroupEntry::Sampler(self.sampler)),
                    (3, BindGroupEntry::buffer(self.params[level])),
                    (4, BindGroupEntry::StorageTexture(destination)),
                ],
            )?;
            self.bind_groups.push((group, self.sizes[level]));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        if self.bind_groups.is_empty() {
            return;
        }
        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_compute_pass(&ComputePassDescriptor {
            label: Some("bloom_upsample".to_string()),
            timestamp_writes,
        });
        backend.set_compute_pipeline(self.pipeline);
        for &(group, size) in &self.bind_groups {
            backend.set_bind_group(0, group);
            dispatch_level(backend, size);
        }
        backend.end_compute_pass();
    }
}

const BLOOM_PARAMS_WGSL: &str = r#"
struct BloomParams {
    // threshold, knee, radius, intensity
    params: vec4<f32>,
    // prefilter, padding, level
    flags: vec4<u32>,
}
"#;

/// 13-tap downsample with the level 0 prefilter
pub const DOWNSAMPLE_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> bloom: BloomParams;
@group(0) @binding(3) var destination: texture_storage_2d<rgba16float, write>;

fn tap(uv: vec2<f32>, texel: vec2<f32>, x: f32, y: f32) -> vec3<f32> {
    return textureSampleLevel(source, source_sampler, uv + vec2<f32>(x, y) * texel, 0.0).rgb;
}

fn downsample13(uv: vec2<f32>, texel: vec2<f32>) -> vec3<f32> {
    let a = tap(uv, texel, -2.0, 2.0);
    let b = tap(uv, texel, 0.0, 2.0);
    let c = tap(uv, texel, 2.0, 2.0);
    let d = tap(uv, texel, -2.0, 0.0);
    let e = tap(uv, texel, 0.0, 0.0);
    let f = tap(uv, texel, 2.0, 0.0);
    let g = tap(uv, texel, -2.0, -2.0);
    let h = tap(uv, texel, 0.0, -2.0);
    let i = tap(uv, texel, 2.0, -2.0);
    let j = tap(uv, texel, -1.0, 1.0);
    let k = tap(uv, texel, 1.0, 1.0);
    let l = tap(uv, texel, -1.0, -1.0);
    let m = tap(uv, texel, 1.0, -1.0);
    return e * 0.125
        + (a + c + g + i) * 0.03125
        + (b + d + f + h) * 0.0625
        + (j + k + l + m) * 0.125;
}

// Soft-knee threshold
fn prefilter(color: vec3<f32>) -> vec3<f32> {
    let threshold = bloom.params.x;
    let knee = threshold * bloom.params.y;
    let brightness = max(color.r, max(color.g, color.b));
    var soft = clamp(brightness - threshold + knee, 0.0, 2.0 * knee);
    soft = soft * soft / (4.0 * knee + 1e-5);
    let contribution = max(soft, brightness - threshold) / max(brightness, 1e-5);
    return color * contribution;
}

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(destination);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let source_size = vec2<f32>(textureDimensions(source));
    let texel = 1.0 / source_size;

    if bloom.flags.x != 0u {
        // Level 0 maps padded texels back onto the scene; the border stays black
        let pixel = vec2<f32>(id.xy) + 0.5 - f32(bloom.flags.y);
        if any(pixel < vec2<f32>(0.0)) || any(pixel > source_size) {
            textureStore(destination, id.xy, vec4<f32>(0.0, 0.0, 0.0, 1.0));
            return;
        }
        let color = prefilter(downsample13(pixel / source_size, texel));
        textureStore(destination, id.xy, vec4<f32>(color, 1.0));
        return;
    }

    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(size);
    textureStore(destination, id.xy, vec4<f32>(downsample13(uv, texel), 1.0));
}
"#;

/// Tent upsample added onto the finer level
pub const UPSAMPLE_SHADER: &str = r#"
@group(0) @binding(0) var coarse: texture_2d<f32>;
@group(0) @binding(1) var fine: texture_2d<f32>;
@group(0) @binding(2) var coarse_sampler: sampler;
@group(0) @binding(3) var<uniform> bloom: BloomParams;
@group(0) @binding(4) var destination: texture_storage_2d<rgba16float, write>;

fn tap(uv: vec2<f32>, texel: vec2<f32>, x: f32, y: f32) -> vec3<f32> {
    return textureSampleLevel(coarse, coarse_sampler, uv + vec2<f32>(x, y) * texel, 0.0).rgb;
}

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(destination);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(size);
    let texel = bloom.params.z / vec2<f32>(textureDimensions(coarse));

    var upsampled = tap(uv, texel, 0.0, 0.0) * 4.0;
    upsampled = upsampled + (tap(uv, texel, -1.0, 0.0) + tap(uv, texel, 1.0, 0.0)
        + tap(uv, texel, 0.0, -1.0) + tap(uv, texel, 0.0, 1.0)) * 2.0;
    upsampled = upsampled + tap(uv, texel, -1.0, -1.0) + tap(uv, texel, 1.0, -1.0)
        + tap(uv, texel, -1.0, 1.0) + tap(uv, texel, 1.0, 1.0);
    upsampled = upsampled / 16.0;

    let base = textureLoad(fine, vec2<i32>(id.xy), 0).rgb;
    textureStore(destination, id.xy, vec4<f32>(base + upsampled, 1.0));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_halves_rounding_up() {
        assert_eq!(
            bloom_chain_sizes(100, 50, 3),
            vec![(100, 50), (50, 25), (25, 13), (13, 7)]
        );
    }

    #[test]
    fn test_chain_never_reaches_zero() {
        let sizes = bloom_chain_sizes(3, 1, 4);
        assert_eq!(sizes.len(), 5);
        assert_eq!(*sizes.last().unwrap(), (1, 1));
    }
}
