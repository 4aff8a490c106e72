//! Headless backend that keeps buffer contents in memory and records every command
//!
//! Used by the integration tests and by tooling that needs to inspect the frame
//! structure without a GPU. Transfers (`write_buffer`, `clear_buffer`,
//! `copy_buffer_to_buffer`) are applied immediately so buffer contents can be
//! read back right after a frame.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;

/// One recorded backend command
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame,
    EndFrame,
    BeginRenderPass {
        label: Option<String>,
        color_attachments: usize,
        has_depth: bool,
        timestamps: bool,
    },
    EndRenderPass,
    BeginComputePass {
        label: Option<String>,
        timestamps: bool,
    },
    EndComputePass,
    SetRenderPipeline(RenderPipelineHandle),
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetIndexBuffer { buffer: BufferHandle, format: IndexFormat },
    Draw { vertices: std::ops::Range<u32>, instances: std::ops::Range<u32> },
    DrawIndexedIndirect { buffer: BufferHandle, offset: u64 },
    Dispatch { x: u32, y: u32, z: u32 },
    ClearBuffer { buffer: BufferHandle, offset: u64, size: Option<u64> },
    CopyBuffer { source: BufferHandle, destination: BufferHandle, size: u64 },
    ResolveQuerySet { query_set: QuerySetHandle, destination: BufferHandle },
    WriteTexture { texture: TextureHandle, mip_level: u32 },
}

#[derive(Debug, Clone)]
struct RecordedBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

/// In-memory implementation of [`GraphicsBackend`]
pub struct RecordingBackend {
    width: u32,
    height: u32,
    format: TextureFormat,
    timestamps: bool,
    /// Ticks between the two timestamps written by a resolve
    fake_frame_ticks: u64,

    buffers: HashMap<u64, RecordedBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    texture_views: HashMap<u64, (TextureHandle, TextureViewDescriptor)>,
    render_pipelines: HashMap<u64, RenderPipelineDescriptor>,
    compute_pipelines: HashMap<u64, ComputePipelineDescriptor>,
    readbacks: HashMap<u64, u32>,

    next_id: u64,
    in_render_pass: bool,
    in_compute_pass: bool,
    frames_submitted: u64,
    commands: Vec<RecordedCommand>,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            format: TextureFormat::Bgra8UnormSrgb,
            timestamps: false,
            fake_frame_ticks: 1_000_000,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            readbacks: HashMap::new(),
            next_id: 1,
            in_render_pass: false,
            in_compute_pass: false,
            frames_submitted: 0,
            commands: Vec::new(),
        }
    }

    /// Report timestamp support; resolves write `ticks` apart
    pub fn with_timestamps(mut self, ticks: u64) -> Self {
        self.timestamps = true;
        self.fake_frame_ticks = ticks;
        self
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: RecordedCommand) {
        self.commands.push(command);
    }

    /// Everything recorded since construction or the last `clear_commands`
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Labels of render and compute passes in recording order
    pub fn pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { label, .. }
                | RecordedCommand::BeginComputePass { label, .. } => {
                    Some(label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Raw bytes of a buffer
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    /// Buffer contents reinterpreted as `T`, ignoring a trailing partial element
    pub fn read_buffer<T: bytemuck::Pod>(&self, buffer: BufferHandle) -> Vec<T> {
        let Some(data) = self.buffer_data(buffer) else {
            return Vec::new();
        };
        data.chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer.0).map(|b| &b.desc)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn render_pipeline_descriptor(
        &self,
        pipeline: RenderPipelineHandle,
    ) -> Option<&RenderPipelineDescriptor> {
        self.render_pipelines.get(&pipeline.0)
    }

    pub fn compute_pipeline_descriptor(
        &self,
        pipeline: ComputePipelineHandle,
    ) -> Option<&ComputePipelineDescriptor> {
        self.compute_pipelines.get(&pipeline.0)
    }

    /// Render pipelines whose label matches, in creation order
    pub fn render_pipelines_labeled(&self, label: &str) -> Vec<&RenderPipelineDescriptor> {
        let mut found: Vec<(&u64, &RenderPipelineDescriptor)> = self
            .render_pipelines
            .iter()
            .filter(|(_, d)| d.label.as_deref() == Some(label))
            .collect();
        found.sort_by_key(|(id, _)| **id);
        found.into_iter().map(|(_, d)| d).collect()
    }
}

impl GraphicsBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let view = self.next_handle();
        self.record(RecordedCommand::BeginFrame);
        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view),
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.frames_submitted += 1;
        self.record(RecordedCommand::EndFrame);
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn supports_timestamps(&self) -> bool {
        self.timestamps
    }

    fn timestamp_period(&self) -> f32 {
        1.0
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let id = self.next_handle();
        self.buffers.insert(
            id,
            RecordedBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let id = self.next_handle();
        let mut desc = desc.clone();
        desc.size = data.len() as u64;
        self.buffers.insert(
            id,
            RecordedBuffer {
                desc,
                data: data.to_vec(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get_mut(&buffer.0) {
            let start = offset as usize;
            let end = start + data.len();
            if end <= buf.data.len() {
                buf.data[start..end].copy_from_slice(data);
            } else {
                log::warn!("write_buffer out of bounds ({} > {})", end, buf.data.len());
            }
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "zero-sized texture {:?}",
                desc.label
            )));
        }
        let id = self.next_handle();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view_with(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::UnknownHandle("texture"));
        }
        let id = self.next_handle();
        self.texture_views.insert(id, (texture, desc.clone()));
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, region: &TextureWrite, _data: &[u8]) {
        self.record(RecordedCommand::WriteTexture {
            texture,
            mip_level: region.mip_level,
        });
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        Ok(SamplerHandle(self.next_handle()))
    }

    fn create_query_set(&mut self, _count: u32) -> BackendResult<QuerySetHandle> {
        if !self.timestamps {
            return Err(BackendError::MissingFeature("timestamp queries".into()));
        }
        Ok(QuerySetHandle(self.next_handle()))
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        Ok(BindGroupLayoutHandle(self.next_handle()))
    }

    fn create_bind_group(
        &mut self,
        _layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        for (_, entry) in entries {
            match entry {
                BindGroupEntry::Buffer { buffer, .. } if !self.buffers.contains_key(&buffer.0) => {
                    return Err(BackendError::UnknownHandle("buffer"));
                }
                BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view)
                    if !self.texture_views.contains_key(&view.0) =>
                {
                    return Err(BackendError::UnknownHandle("texture view"));
                }
                _ => {}
            }
        }
        Ok(BindGroupHandle(self.next_handle()))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let id = self.next_handle();
        self.render_pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let id = self.next_handle();
        self.compute_pipelines.insert(id, desc.clone());
        Ok(ComputePipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.in_render_pass = true;
        self.record(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_attachments: desc.color_attachments.len(),
            has_depth: desc.depth_stencil_attachment.is_some(),
            timestamps: desc.timestamp_writes.is_some(),
        });
    }

    fn end_render_pass(&mut self) {
        if self.in_render_pass {
            self.in_render_pass = false;
            self.record(RecordedCommand::EndRenderPass);
        }
    }

    fn begin_compute_pass(&mut self, desc: &ComputePassDescriptor) {
        self.in_compute_pass = true;
        self.record(RecordedCommand::BeginComputePass {
            label: desc.label.clone(),
            timestamps: desc.timestamp_writes.is_some(),
        });
    }

    fn end_compute_pass(&mut self) {
        if self.in_compute_pass {
            self.in_compute_pass = false;
            self.record(RecordedCommand::EndComputePass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(RecordedCommand::SetRenderPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.record(RecordedCommand::SetComputePipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer { buffer, format });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.record(RecordedCommand::Draw { vertices, instances });
    }

    fn draw_indexed_indirect(&mut self, buffer: BufferHandle, offset: u64) {
        self.record(RecordedCommand::DrawIndexedIndirect { buffer, offset });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record(RecordedCommand::Dispatch { x, y, z });
    }

    fn clear_buffer(&mut self, buffer: BufferHandle, offset: u64, size: Option<u64>) {
        if let Some(buf) = self.buffers.get_mut(&buffer.0) {
            let start = (offset as usize).min(buf.data.len());
            let end = size
                .map(|s| start + s as usize)
                .unwrap_or(buf.data.len())
                .min(buf.data.len());
            buf.data[start..end].fill(0);
        }
        self.record(RecordedCommand::ClearBuffer {
            buffer,
            offset,
            size,
        });
    }

    fn copy_buffer_to_buffer(
        &mut self,
        source: BufferHandle,
        source_offset: u64,
        destination: BufferHandle,
        destination_offset: u64,
        size: u64,
    ) {
        let bytes = self.buffers.get(&source.0).and_then(|b| {
            let start = source_offset as usize;
            b.data.get(start..start + size as usize).map(|s| s.to_vec())
        });
        if let Some(bytes) = bytes {
            self.write_buffer(destination, destination_offset, &bytes);
        }
        self.record(RecordedCommand::CopyBuffer {
            source,
            destination,
            size,
        });
    }

    fn resolve_query_set(
        &mut self,
        query_set: QuerySetHandle,
        queries: std::ops::Range<u32>,
        destination: BufferHandle,
        destination_offset: u64,
    ) {
        let ticks: Vec<u64> = queries
            .clone()
            .map(|q| (q - queries.start) as u64 * self.fake_frame_ticks)
            .collect();
        self.write_buffer(destination, destination_offset, bytemuck::cast_slice(&ticks));
        self.record(RecordedCommand::ResolveQuerySet {
            query_set,
            destination,
        });
    }

    fn request_readback(&mut self, buffer: BufferHandle) -> bool {
        if self.readbacks.contains_key(&buffer.0) || !self.buffers.contains_key(&buffer.0) {
            return false;
        }
        // Completes on the second poll, so callers see one pending frame
        self.readbacks.insert(buffer.0, 1);
        true
    }

    fn poll_readback(&mut self, buffer: BufferHandle) -> Option<Vec<u8>> {
        let remaining = self.readbacks.get_mut(&buffer.0)?;
        if *remaining > 0 {
            *remaining -= 1;
            return None;
        }
        self.readbacks.remove(&buffer.0);
        self.buffer_data(buffer).map(|d| d.to_vec())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.readbacks.remove(&buffer.0);
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.texture_views.retain(|_, (owner, _)| *owner != texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfers_apply_immediately() {
        let mut backend = RecordingBackend::new(64, 64);
        let desc = BufferDescriptor::new("a", 16, BufferUsage::STORAGE | BufferUsage::COPY_SRC);
        let a = backend
            .create_buffer_init(&desc, bytemuck::cast_slice(&[1u32, 2, 3, 4]))
            .unwrap();
        let b = backend
            .create_buffer(&BufferDescriptor::new("b", 16, BufferUsage::COPY_DST))
            .unwrap();

        backend.copy_buffer_to_buffer(a, 4, b, 0, 8);
        assert_eq!(backend.read_buffer::<u32>(b), vec![2, 3, 0, 0]);

        backend.clear_buffer(a, 4, Some(4));
        assert_eq!(backend.read_buffer::<u32>(a), vec![1, 0, 3, 4]);
    }

    #[test]
    fn test_readback_pending_for_one_poll() {
        let mut backend = RecordingBackend::new(8, 8);
        let buf = backend
            .create_buffer(&BufferDescriptor::new("r", 8, BufferUsage::MAP_READ))
            .unwrap();
        assert!(backend.request_readback(buf));
        assert!(!backend.request_readback(buf));
        assert!(backend.poll_readback(buf).is_none());
        assert_eq!(backend.poll_readback(buf).map(|d| d.len()), Some(8));
        assert!(backend.poll_readback(buf).is_none());
    }

    #[test]
    fn test_pass_labels_in_order() {
        let mut backend = RecordingBackend::new(8, 8);
        backend.begin_compute_pass(&ComputePassDescriptor::labeled("first"));
        backend.end_compute_pass();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("second".into()),
            color_attachments: vec![],
            depth_stencil_attachment: None,
            timestamp_writes: None,
        });
        backend.end_render_pass();
        assert_eq!(backend.pass_labels(), vec!["first", "second"]);
    }
}
