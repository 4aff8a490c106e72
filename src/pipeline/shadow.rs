//! Cascaded shadow maps
//!
//! One graph pass per cascade renders the culled casters depth-only into its
//! layer of the cascade array. The shading pass filters the result with a
//! Poisson disk rotated per pixel by a tiling noise volume.

use crate::backend::*;
use crate::pipeline::{geometry_shader, record_draws, FrameLayouts};
use crate::render_graph::*;
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::f32::consts::TAU;

pub fn create_pipeline<B: GraphicsBackend>(
    backend: &mut B,
    layouts: &FrameLayouts,
    bias: DepthBias,
) -> BackendResult<RenderPipelineHandle> {
    let mut desc = RenderPipelineDescriptor::new(
        "shadow",
        &geometry_shader(SHADOW_SHADER),
        vec![layouts.view, layouts.draw, layouts.mesh],
    );
    desc.fragment_entry = None;
    desc.depth_stencil = Some(DepthStencilState {
        bias,
        ..DepthStencilState::depth32(true, CompareFunction::LessEqual)
    });
    backend.create_render_pipeline(&desc)
}

/// Depth-only pass for one cascade
pub struct ShadowPass {
    name: String,
    cascade: usize,
    pipeline: RenderPipelineHandle,
    view_bind_group: BindGroupHandle,
    shadow_map: ResourceId,
    indirect: ResourceId,
    layer_view: Option<TextureViewHandle>,
}

impl ShadowPass {
    pub fn new(
        cascade: usize,
        pipeline: RenderPipelineHandle,
        view_bind_group: BindGroupHandle,
        shadow_map: ResourceId,
        indirect: ResourceId,
    ) -> Self {
        Self {
            name: format!("shadow_cascade_{}", cascade),
            cascade,
            pipeline,
            view_bind_group,
            shadow_map,
            indirect,
            layer_view: None,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for ShadowPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.indirect, ResourceUsage::IndirectRead);
        ctx.write(self.shadow_map, ResourceUsage::DepthStencilWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        let view = ctx.view_with(self.shadow_map, &TextureViewDescriptor::layer(self.cascade as u32))?;
        self.layer_view = Some(view);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let Some(layer_view) = self.layer_view else {
            return;
        };
        let frame = ctx.frame;
        // Render context 0 is the camera
        let batches = frame.registry.draw_batches(frame.models, self.cascade + 1);

        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        // The layer is cleared even when nothing casts into it
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(self.name.clone()),
            color_attachments: vec![],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: layer_view,
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

/// `count` points inside the unit disk, spread by dart throwing with a
/// shrinking minimum distance
pub fn poisson_disk(count: usize, seed: u64) -> Vec<Vec2> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points: Vec<Vec2> = Vec::with_capacity(count);
    let mut min_distance = 1.5 / (count.max(1) as f32).sqrt();

    while points.len() < count {
        let mut placed = false;
        for _ in 0..32 {
            let angle = rng.random_range(0.0..TAU);
            let radius = rng.random_range(0.0f32..1.0).sqrt();
            let candidate = Vec2::new(angle.cos(), angle.sin()) * radius;
            if points.iter().all(|p| p.distance(candidate) >= min_distance) {
                points.push(candidate);
                placed = true;
                break;
            }
        }
        if !placed {
            min_distance *= 0.9;
        }
    }
    points
}

/// RGBA8 volume of random rotations, `(cos, sin)` remapped to `0..1` in RG
pub fn rotation_noise(size: u32, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let texels = (size * size * size) as usize;
    let mut data = Vec::with_capacity(texels * 4);
    for _ in 0..texels {
        let angle = rng.random_range(0.0..TAU);
        data.push(((angle.cos() * 0.5 + 0.5) * 255.0).round() as u8);
        data.push(((angle.sin() * 0.5 + 0.5) * 255.0).round() as u8);
        data.push(0);
        data.push(255);
    }
    data
}

/// Shadow depth shader
pub const SHADOW_SHADER: &str = r#"
@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> @builtin(position) vec4<f32> {
    let instance = instances[visible[instance_index]];
    let local = fetch_vertex(vertex_index, instance.offset_scale);
    return clip_position(instance, local);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poisson_disk_in_unit_disk() {
        let points = poisson_disk(32, 7);
        assert_eq!(points.len(), 32);
        for (i, a) in points.iter().enumerate() {
            assert!(a.length() <= 1.0 + 1e-6);
            for b in &points[i + 1..] {
                assert!(a.distance(*b) > 0.0);
            }
        }
        assert_eq!(points, poisson_disk(32, 7));
    }

    #[test]
    fn test_rotation_noise_encodes_unit_vectors() {
        let data = rotation_noise(4, 3);
        assert_eq!(data.len(), 4 * 4 * 4 * 4);
        for texel in data.chunks(4) {
            let c = texel[0] as f32 / 255.0 * 2.0 - 1.0;
            let s = texel[1] as f32 / 255.0 * 2.0 - 1.0;
            assert!(((c * c + s * s).sqrt() - 1.0).abs() < 0.02);
            assert_eq!(texel[3], 255);
        }
    }
}
