//! Render graph executor

use crate::backend::traits::*;
use crate::pipeline::FrameState;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::HashMap;

/// Query slots bracketing the frame
#[derive(Debug, Clone, Copy)]
pub struct FrameTimestamps {
    pub query_set: QuerySetHandle,
    pub begin: u32,
    pub end: u32,
}

/// Executor for running the compiled render graph
pub struct RenderGraphExecutor {
    /// Allocated textures mapped by resource ID
    allocated_textures: HashMap<ResourceId, TextureHandle>,
    allocated_texture_views: HashMap<ResourceId, TextureViewHandle>,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            allocated_textures: HashMap::new(),
            allocated_texture_views: HashMap::new(),
        }
    }

    /// Allocate graph textures, then let every pass build its bind groups
    pub fn allocate_resources<B: GraphicsBackend>(
        &mut self,
        graph: &mut RenderGraph<B>,
        backend: &mut B,
    ) -> BackendResult<()> {
        for resource in graph.resources() {
            if let VirtualResource::Texture(tex) = resource {
                if !self.allocated_textures.contains_key(&tex.id) {
                    let handle = backend.create_texture(&tex.desc)?;
                    let view = backend.create_texture_view(handle)?;
                    self.allocated_textures.insert(tex.id, handle);
                    self.allocated_texture_views.insert(tex.id, view);
                }
            }
        }

        let mut ctx = PassPrepareContext {
            backend,
            textures: &self.allocated_textures,
            views: &self.allocated_texture_views,
        };
        for pass in graph.passes_mut() {
            pass.prepare(&mut ctx)?;
        }

        Ok(())
    }

    /// Execute the render graph in compiled order
    pub fn execute<B: GraphicsBackend>(
        &self,
        graph: &RenderGraph<B>,
        compiled: &CompiledGraph,
        backend: &mut B,
        frame: &FrameState,
        timestamps: Option<FrameTimestamps>,
    ) {
        let mut begin_timestamp = timestamps.map(|t| (t.query_set, t.begin));
        let last = compiled.pass_order.len().saturating_sub(1);

        for (step, &pass_id) in compiled.pass_order.iter().enumerate() {
            if log::log_enabled!(log::Level::Trace) {
                for barrier in compiled.barriers_before(pass_id) {
                    log::trace!(
                        "barrier {:?}: {} {:?} -> {:?}",
                        pass_id,
                        graph.resource_name(barrier.resource).unwrap_or("?"),
                        barrier.from,
                        barrier.to
                    );
                }
            }

            let Some(pass) = graph.get_pass(pass_id) else {
                continue;
            };

            let mut ctx = PassExecuteContext {
                backend: &mut *backend,
                frame,
                views: &self.allocated_texture_views,
                begin_timestamp: &mut begin_timestamp,
                end_timestamp: if step == last {
                    timestamps.map(|t| (t.query_set, t.end))
                } else {
                    None
                },
            };

            pass.execute(&mut ctx);
        }
    }

    /// Texture allocated for a graph resource
    pub fn texture(&self, resource: ResourceId) -> Option<TextureHandle> {
        self.allocated_textures.get(&resource).copied()
    }

    /// Clean up allocated resources
    pub fn cleanup<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (_, handle) in self.allocated_textures.drain() {
            backend.destroy_texture(handle);
        }
        self.allocated_texture_views.clear();
    }
}

impl Default for RenderGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}
