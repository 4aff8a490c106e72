//! Render pass definitions for the render graph

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::FrameState;
use crate::render_graph::resource::*;
use std::collections::HashMap;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Context for setting up pass resources
pub struct PassSetupContext<'a> {
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
    pub(crate) screen_width: u32,
    pub(crate) screen_height: u32,
}

impl<'a> PassSetupContext<'a> {
    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess { resource, usage });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess { resource, usage });
    }

    /// Get screen dimensions
    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }
}

/// Context handed to passes once graph textures exist, for building bind groups
pub struct PassPrepareContext<'a, B: GraphicsBackend> {
    pub backend: &'a mut B,
    pub(crate) textures: &'a HashMap<ResourceId, TextureHandle>,
    pub(crate) views: &'a HashMap<ResourceId, TextureViewHandle>,
}

impl<'a, B: GraphicsBackend> PassPrepareContext<'a, B> {
    /// Default view of a graph texture
    pub fn view(&self, resource: ResourceId) -> BackendResult<TextureViewHandle> {
        self.views
            .get(&resource)
            .copied()
            .ok_or(BackendError::UnknownHandle("graph texture view"))
    }

    /// Additional view (layer, mip) of a graph texture
    pub fn view_with(
        &mut self,
        resource: ResourceId,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let texture = self
            .textures
            .get(&resource)
            .copied()
            .ok_or(BackendError::UnknownHandle("graph texture"))?;
        self.backend.create_texture_view_with(texture, desc)
    }
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a, B: GraphicsBackend> {
    pub backend: &'a mut B,
    pub frame: &'a FrameState<'a>,
    pub(crate) views: &'a HashMap<ResourceId, TextureViewHandle>,
    pub(crate) begin_timestamp: &'a mut Option<(QuerySetHandle, u32)>,
    pub(crate) end_timestamp: Option<(QuerySetHandle, u32)>,
}

impl<'a, B: GraphicsBackend> PassExecuteContext<'a, B> {
    /// Get a texture view handle for a resource
    pub fn get_texture(&self, resource: ResourceId) -> Option<TextureViewHandle> {
        self.views.get(&resource).copied()
    }

    /// Timestamp writes for the next GPU pass this graph pass opens.
    ///
    /// The first GPU pass of the frame records the start query; the final GPU
    /// pass of the last graph pass records the end query.
    pub fn timestamp_writes(&mut self, final_gpu_pass: bool) -> Option<TimestampWrites> {
        let begin = self.begin_timestamp.take();
        let end = if final_gpu_pass {
            self.end_timestamp.take()
        } else {
            None
        };
        let query_set = begin.or(end)?.0;
        Some(TimestampWrites {
            query_set,
            beginning_of_pass: begin.map(|(_, i)| i),
            end_of_pass: end.map(|(_, i)| i),
        })
    }
}

/// Trait for render passes
pub trait RenderPass<B: GraphicsBackend> {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Setup phase - declare resources and dependencies
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Create views and bind groups once graph textures are allocated
    fn prepare(&mut self, _ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        Ok(())
    }

    /// Execute phase - record commands
    fn execute(&self, ctx: &mut PassExecuteContext<B>);
}

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    /// Graphics render pass
    Graphics,
    /// Compute pass
    Compute,
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub pass_type: PassType,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.inputs.iter().any(|a| a.resource == resource)
    }

    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.outputs.iter().any(|a| a.resource == resource)
    }
}
