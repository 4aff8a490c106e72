//! Grading and composite into the swapchain

use crate::backend::*;
use crate::pipeline::postprocess::FULLSCREEN_VERTEX_SHADER;
use crate::pipeline::{FrameLayouts, FrameResources};
use crate::render_graph::*;

pub fn create_pipeline<B: GraphicsBackend>(
    backend: &mut B,
    layouts: &FrameLayouts,
    surface_format: TextureFormat,
) -> BackendResult<RenderPipelineHandle> {
    let mut desc = RenderPipelineDescriptor::new(
        "tonemap",
        &tonemap_shader(),
        vec![layouts.composite],
    );
    desc.color_targets = vec![ColorTargetState::replace(surface_format)];
    backend.create_render_pipeline(&desc)
}

pub fn tonemap_shader() -> String {
    [FULLSCREEN_VERTEX_SHADER, TONEMAPPING_SHADER].concat()
}

/// Final pass of the frame
pub struct TonemappingPass {
    pipeline: RenderPipelineHandle,
    layout: BindGroupLayoutHandle,
    grading: BufferHandle,
    sampler: SamplerHandle,
    scene: ResourceId,
    bloom: ResourceId,
    swapchain: ResourceId,
    bind_group: Option<BindGroupHandle>,
}

impl TonemappingPass {
    pub fn new(
        pipeline: RenderPipelineHandle,
        layout: BindGroupLayoutHandle,
        resources: &FrameResources,
        scene: ResourceId,
        bloom: ResourceId,
        swapchain: ResourceId,
    ) -> Self {
        Self {
            pipeline,
            layout,
            grading: resources.grading_buffer,
            sampler: resources.samplers.linear,
            scene,
            bloom,
            swapchain,
            bind_group: None,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for TonemappingPass {
    fn name(&self) -> &str {
        "tonemap"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.scene, ResourceUsage::TextureRead);
        ctx.read(self.bloom, ResourceUsage::TextureRead);
        ctx.write(self.swapchain, ResourceUsage::RenderTarget);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        let scene = ctx.view(self.scene)?;
        let bloom = ctx.view(self.bloom)?;
        self.bind_group = Some(ctx.backend.create_bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::Texture(scene)),
                (1, BindGroupEntry::Texture(bloom)),
                (2, BindGroupEntry::Sampler(self.sampler)),
                (3, BindGroupEntry::buffer(self.grading)),
            ],
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let Some(bind_group) = self.bind_group else {
            return;
        };
        let output_view = ctx.frame.swapchain_view;

        let timestamp_writes = ctx.timestamp_writes(true);
        let backend = &mut *ctx.backend;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("tonemap".into()),
            color_attachments: vec![ColorAttachment {
                view: output_view,
                resolve_target: None,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
            timestamp_writes,
        });
        backend.set_render_pipeline(self.pipeline);
        backend.set_bind_group(0, bind_group);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
    }
}

pub const TONEMAPPING_SHADER: &str = r#"
struct Grading {
    // exposure, temperature, tint, contrast
    color: vec4<f32>,
    // brightness, gamma, vignette start, vignette end
    tone: vec4<f32>,
    // vignette intensity, bloom intensity, bloom padding
    composite: vec4<f32>,
}

@group(0) @binding(0) var scene_texture: texture_2d<f32>;
@group(0) @binding(1) var bloom_texture: texture_2d<f32>;
@group(0) @binding(2) var linear_sampler: sampler;
@group(0) @binding(3) var<uniform> grading: Grading;

fn aces_tonemap(color: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return saturate((color * (a * color + b)) / (color * (c * color + d) + e));
}

fn white_balance(color: vec3<f32>, temperature: f32, tint: f32) -> vec3<f32> {
    let t = temperature * 0.2;
    let g = tint * 0.2;
    return color * vec3<f32>(1.0 + t, 1.0 + g, 1.0 - t);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let scene = textureSampleLevel(scene_texture, linear_sampler, input.uv, 0.0).rgb;

    // Crop the bloom border back to the scene rectangle
    let padded = vec2<f32>(textureDimensions(bloom_texture));
    let padding = grading.composite.z;
    let bloom_uv = (input.uv * (padded - 2.0 * padding) + padding) / padded;
    let bloom = textureSampleLevel(bloom_texture, linear_sampler, bloom_uv, 0.0).rgb;

    var color = mix(scene, bloom, grading.composite.y);
    color = white_balance(color * grading.color.x, grading.color.y, grading.color.z);
    color = aces_tonemap(max(color, vec3<f32>(0.0)));
    color = (color - 0.5) * grading.color.w + 0.5 + grading.tone.x;
    color = pow(max(color, vec3<f32>(0.0)), vec3<f32>(1.0 / max(grading.tone.y, 1e-3)));

    let radial = length((input.uv - 0.5) * 2.0);
    let vignette = smoothstep(grading.tone.z, grading.tone.w, radial);
    color = color * (1.0 - vignette * grading.composite.x);

    return vec4<f32>(saturate(color), 1.0);
}
"#;
