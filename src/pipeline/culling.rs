//! GPU frustum culling
//!
//! One dispatch per selected collection. Every live slot is tested against the
//! frustum of each render context; survivors are appended to that context's
//! visible list and counted into its indirect record with an atomic add.

use crate::backend::*;
use crate::config::CullingPath;
use crate::instances::CAPACITY_GRANULE;
use crate::pipeline::{FrameLayouts, INSTANCE_WGSL, VIEW_WGSL};
use crate::render_graph::*;

/// Invocations per culling workgroup
pub const CULL_WORKGROUP_SIZE: u32 = 64;

const _: () = assert!(CAPACITY_GRANULE % CULL_WORKGROUP_SIZE == 0);

pub fn create_pipeline<B: GraphicsBackend>(
    backend: &mut B,
    layouts: &FrameLayouts,
) -> BackendResult<ComputePipelineHandle> {
    backend.create_compute_pipeline(&ComputePipelineDescriptor::new(
        "cull",
        &cull_shader(),
        "cs_main",
        vec![layouts.cull],
    ))
}

pub fn cull_shader() -> String {
    [VIEW_WGSL, INSTANCE_WGSL, CULL_SHADER].concat()
}

/// Culling pass
pub struct CullPass {
    pipeline: ComputePipelineHandle,
    indirect: ResourceId,
    path: CullingPath,
}

impl CullPass {
    pub fn new(pipeline: ComputePipelineHandle, indirect: ResourceId, path: CullingPath) -> Self {
        Self {
            pipeline,
            indirect,
            path,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for CullPass {
    fn name(&self) -> &str {
        "cull"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.indirect, ResourceUsage::StorageBufferWrite);
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let frame = ctx.frame;

        if self.path == CullingPath::Host {
            frame.registry.cull_on_host(ctx.backend, frame.frustums);
            return;
        }

        let selected: Vec<_> = frame
            .registry
            .collections()
            .iter()
            .filter(|c| c.culled_this_frame() && c.high_water() > 0)
            .collect();
        if selected.is_empty() {
            log::trace!("cull: no collections selected");
            return;
        }

        // Counts restart from zero; index count and offsets stay as uploaded
        let contexts = frame.registry.context_count();
        for collection in &selected {
            for context in 0..contexts {
                ctx.backend.clear_buffer(
                    collection.indirect_buffer(),
                    collection.indirect_offset(context)
                        + DrawIndexedIndirectArgs::INSTANCE_COUNT_WORD * 4,
                    Some(4),
                );
            }
        }

        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_compute_pass(&ComputePassDescriptor {
            label: Some("cull".to_string()),
            timestamp_writes,
        });
        backend.set_compute_pipeline(self.pipeline);
        for collection in selected {
            backend.set_bind_group(0, collection.cull_bind_group());
            backend.dispatch_compute(
                collection.high_water().div_ceil(CULL_WORKGROUP_SIZE),
                1,
                1,
            );
        }
        backend.end_compute_pass();
    }
}

/// Culling compute shader
pub const CULL_SHADER: &str = r#"
struct CullParams {
    // slots to test, visible list stride, render contexts
    counts: vec4<u32>,
}

@group(0) @binding(0) var<uniform> views: array<View, 5>;
@group(0) @binding(1) var<storage, read> instances: array<Instance>;
@group(0) @binding(2) var<storage, read_write> visible: array<u32>;
@group(0) @binding(3) var<storage, read_write> indirect: array<atomic<u32>>;
@group(0) @binding(4) var<uniform> params: CullParams;

fn inside_frustum(context: u32, center: vec3<f32>, radius: f32) -> bool {
    for (var p = 0u; p < 6u; p = p + 1u) {
        let plane = views[context].planes[p];
        if dot(plane.xyz, center) + plane.w < -radius {
            return false;
        }
    }
    return true;
}

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let slot = id.x;
    if slot >= params.counts.x {
        return;
    }

    let instance = instances[slot];
    let flags = instance.flags.x;
    if (flags & INSTANCE_LIVE) == 0u {
        return;
    }

    let center = instance.bounds.xyz;
    let radius = instance.bounds.w;
    let capacity = params.counts.y;

    for (var context = 0u; context < params.counts.z; context = context + 1u) {
        // Cascades only draw casters
        if context > 0u && (flags & INSTANCE_CASTS_SHADOWS) == 0u {
            continue;
        }
        if inside_frustum(context, center, radius) {
            let index = atomicAdd(&indirect[context * 5u + 1u], 1u);
            visible[context * capacity + index] = slot;
        }
    }
}
"#;
