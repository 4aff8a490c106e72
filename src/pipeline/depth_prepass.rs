//! Depth prepass
//!
//! Lays down the nearest depth for every pixel plus view-space normals for
//! SSAO. The shading pass then runs at `Equal` depth and shades each sample once.

use crate::backend::*;
use crate::pipeline::{geometry_shader, record_draws, FrameLayouts, HDR_FORMAT};
use crate::render_graph::*;

pub fn create_pipeline<B: GraphicsBackend>(
    backend: &mut B,
    layouts: &FrameLayouts,
    sample_count: u32,
) -> BackendResult<RenderPipelineHandle> {
    let mut desc = RenderPipelineDescriptor::new(
        "depth_prepass",
        &geometry_shader(DEPTH_PREPASS_SHADER),
        vec![layouts.view, layouts.draw, layouts.mesh],
    );
    desc.depth_stencil = Some(DepthStencilState::depth32(true, CompareFunction::Less));
    desc.color_targets = vec![ColorTargetState::replace(HDR_FORMAT)];
    desc.sample_count = sample_count;
    backend.create_render_pipeline(&desc)
}

/// Depth pre-pass
pub struct DepthPrepass {
    pipeline: RenderPipelineHandle,
    view_bind_group: BindGroupHandle,
    depth: ResourceId,
    normals: ResourceId,
    indirect: ResourceId,
}

impl DepthPrepass {
    pub fn new(
        pipeline: RenderPipelineHandle,
        view_bind_group: BindGroupHandle,
        depth: ResourceId,
        normals: ResourceId,
        indirect: ResourceId,
    ) -> Self {
        Self {
            pipeline,
            view_bind_group,
            depth,
            normals,
            indirect,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for DepthPrepass {
    fn name(&self) -> &str {
        "depth_prepass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.indirect, ResourceUsage::IndirectRead);
        ctx.write(self.depth, ResourceUsage::DepthStencilWrite);
        ctx.write(self.normals, ResourceUsage::RenderTarget);
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let (Some(depth_view), Some(normal_view)) =
            (ctx.get_texture(self.depth), ctx.get_texture(self.normals))
        else {
            return;
        };
        let frame = ctx.frame;
        let batches = frame.registry.draw_batches(frame.models, 0);

        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("depth_prepass".into()),
            color_attachments: vec![ColorAttachment {
                view: normal_view,
                resolve_target: None,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
            timestamp_writes,
        });
        if !batches.is_empty() {
            backend.set_render_pipeline(self.pipeline);
            backend.set_bind_group(0, self.view_bind_group);
            record_draws(backend, &batches);
        }
        backend.end_render_pass();
    }
}

/// Depth prepass shader
pub const DEPTH_PREPASS_SHADER: &str = r#"
struct PrepassOutput {
    @builtin(position) @invariant position: vec4<f32>,
    @location(0) view_normal: vec3<f32>,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> PrepassOutput {
    let instance = instances[visible[instance_index]];
    let local = fetch_vertex(vertex_index, instance.offset_scale);

    var out: PrepassOutput;
    out.position = clip_position(instance, local);
    let world_normal = (instance.normal * vec4<f32>(local.normal, 0.0)).xyz;
    out.view_normal = (view.view * vec4<f32>(world_normal, 0.0)).xyz;
    return out;
}

@fragment
fn fs_main(in: PrepassOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(normalize(in.view_normal), 1.0);
}
"#;
