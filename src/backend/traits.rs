//! Core backend abstraction traits
//!
//! These traits define the interface that the renderer drives. The wgpu backend
//! talks to a real device; the recording backend keeps everything in memory.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Missing required device feature: {0}")]
    MissingFeature(String),
    #[error("Unknown {0} handle")]
    UnknownHandle(&'static str),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPipelineHandle(pub(crate) u64);

/// Handle to a compute pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineHandle(pub(crate) u64);

/// Handle to a bind group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupHandle(pub(crate) u64);

/// Handle to a bind group layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutHandle(pub(crate) u64);

/// Handle to a timestamp query set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuerySetHandle(pub(crate) u64);

/// Bind group entry for creating bind groups
#[derive(Debug, Clone)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
    StorageTexture(TextureViewHandle),
}

impl BindGroupEntry {
    /// Whole-buffer binding
    pub fn buffer(buffer: BufferHandle) -> Self {
        BindGroupEntry::Buffer {
            buffer,
            offset: 0,
            size: None,
        }
    }

    /// Sub-range binding, used for per-context slices of shared buffers
    pub fn buffer_range(buffer: BufferHandle, offset: u64, size: u64) -> Self {
        BindGroupEntry::Buffer {
            buffer,
            offset,
            size: Some(size),
        }
    }
}

/// Bind group layout entry
#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

impl BindGroupLayoutEntry {
    pub fn new(binding: u32, visibility: ShaderStageFlags, ty: BindingType) -> Self {
        Self {
            binding,
            visibility,
            ty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const COMPUTE: Self = Self(1 << 2);
    pub const ALL: Self = Self((1 << 0) | (1 << 1) | (1 << 2));

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Binding type
#[derive(Debug, Clone)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer {
        read_only: bool,
    },
    Texture {
        sample_type: TextureSampleType,
        view_dimension: TextureViewDimension,
        multisampled: bool,
    },
    StorageTexture {
        format: TextureFormat,
        view_dimension: TextureViewDimension,
    },
    Sampler {
        comparison: bool,
    },
}

impl BindingType {
    /// Filterable float texture of the given view dimension
    pub fn float_texture(view_dimension: TextureViewDimension) -> Self {
        BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        }
    }

    pub fn depth_texture(view_dimension: TextureViewDimension, multisampled: bool) -> Self {
        BindingType::Texture {
            sample_type: TextureSampleType::Depth,
            view_dimension,
            multisampled,
        }
    }

    /// Write-only 2D storage texture
    pub fn storage_2d(format: TextureFormat) -> Self {
        BindingType::StorageTexture {
            format,
            view_dimension: TextureViewDimension::D2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Depth,
    Uint,
}

/// Render pipeline descriptor
///
/// Both stages come from the same WGSL module. `constants` feeds the module's
/// `override` declarations at pipeline creation.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub vertex_entry: String,
    pub fragment_entry: Option<String>,
    pub constants: Vec<(String, f64)>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub primitive_topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
    pub sample_count: u32,
}

impl RenderPipelineDescriptor {
    /// Triangle-list pipeline with `vs_main`/`fs_main` entry points and no targets yet
    pub fn new(label: &str, shader: &str, bind_group_layouts: Vec<BindGroupLayoutHandle>) -> Self {
        Self {
            label: Some(label.to_string()),
            shader: shader.to_string(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: Some("fs_main".to_string()),
            constants: Vec::new(),
            bind_group_layouts,
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: Vec::new(),
            sample_count: 1,
        }
    }
}

/// Constant and slope-scaled depth bias
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepthBias {
    pub constant: i32,
    pub slope_scale: f32,
    pub clamp: f32,
}

#[derive(Debug, Clone)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    pub bias: DepthBias,
}

impl DepthStencilState {
    pub fn depth32(depth_write_enabled: bool, depth_compare: CompareFunction) -> Self {
        Self {
            format: TextureFormat::Depth32Float,
            depth_write_enabled,
            depth_compare,
            bias: DepthBias::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColorTargetState {
    pub format: TextureFormat,
}

impl ColorTargetState {
    pub fn replace(format: TextureFormat) -> Self {
        Self { format }
    }
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub entry_point: String,
    pub constants: Vec<(String, f64)>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
}

impl ComputePipelineDescriptor {
    pub fn new(
        label: &str,
        shader: &str,
        entry_point: &str,
        bind_group_layouts: Vec<BindGroupLayoutHandle>,
    ) -> Self {
        Self {
            label: Some(label.to_string()),
            shader: shader.to_string(),
            entry_point: entry_point.to_string(),
            constants: Vec::new(),
            bind_group_layouts,
        }
    }
}

/// Color attachment for render pass
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub resolve_target: Option<TextureViewHandle>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// Depth stencil attachment for render pass
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

/// Timestamp query slots written at the start and end of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWrites {
    pub query_set: QuerySetHandle,
    pub beginning_of_pass: Option<u32>,
    pub end_of_pass: Option<u32>,
}

/// Render pass descriptor
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
    pub timestamp_writes: Option<TimestampWrites>,
}

/// Compute pass descriptor
#[derive(Debug, Clone, Default)]
pub struct ComputePassDescriptor {
    pub label: Option<String>,
    pub timestamp_writes: Option<TimestampWrites>,
}

impl ComputePassDescriptor {
    pub fn labeled(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            timestamp_writes: None,
        }
    }
}

/// Frame context returned when beginning a frame
pub struct FrameContext {
    pub swapchain_view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// Main graphics backend trait
pub trait GraphicsBackend: Sized {
    /// Resize the swapchain
    fn resize(&mut self, width: u32, height: u32);

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<FrameContext>;

    /// Submit recorded work and present the frame
    fn end_frame(&mut self) -> BackendResult<()>;

    /// Get the swapchain format
    fn swapchain_format(&self) -> TextureFormat;

    /// Whether timestamp queries can be written from passes
    fn supports_timestamps(&self) -> bool;

    /// Nanoseconds per timestamp tick
    fn timestamp_period(&self) -> f32;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Write data to a buffer through the queue
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Create a default view covering the whole texture
    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        self.create_texture_view_with(texture, &TextureViewDescriptor::default())
    }

    /// Create a view selecting dimension, mips and layers
    fn create_texture_view_with(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle>;

    /// Write tightly packed texel data into one mip of a texture
    fn write_texture(&mut self, texture: TextureHandle, region: &TextureWrite, data: &[u8]);

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    /// Create a timestamp query set
    fn create_query_set(&mut self, count: u32) -> BackendResult<QuerySetHandle>;

    // Pipeline creation

    /// Create a bind group layout
    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    /// Create a bind group
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    /// Create a render pipeline
    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    /// Create a compute pipeline
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle>;

    // Command recording and execution

    /// Begin a render pass
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    /// End the current render pass
    fn end_render_pass(&mut self);

    /// Begin a compute pass
    fn begin_compute_pass(&mut self, desc: &ComputePassDescriptor);

    /// End the current compute pass
    fn end_compute_pass(&mut self);

    /// Set the render pipeline
    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    /// Set the compute pipeline
    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);

    /// Set a bind group
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    /// Set index buffer
    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    /// Draw primitives
    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    /// Draw indexed primitives with arguments read from `buffer` at `offset`
    fn draw_indexed_indirect(&mut self, buffer: BufferHandle, offset: u64);

    /// Dispatch compute work
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);

    // Encoder-level transfers, recorded outside passes

    /// Zero a buffer range; `None` clears to the end
    fn clear_buffer(&mut self, buffer: BufferHandle, offset: u64, size: Option<u64>);

    /// Copy between buffers
    fn copy_buffer_to_buffer(
        &mut self,
        source: BufferHandle,
        source_offset: u64,
        destination: BufferHandle,
        destination_offset: u64,
        size: u64,
    );

    /// Resolve queries into a `QUERY_RESOLVE` buffer
    fn resolve_query_set(
        &mut self,
        query_set: QuerySetHandle,
        queries: std::ops::Range<u32>,
        destination: BufferHandle,
        destination_offset: u64,
    );

    /// Start mapping a `MAP_READ` buffer after the work writing it was submitted.
    /// Returns false when the buffer is unknown or already being mapped.
    fn request_readback(&mut self, buffer: BufferHandle) -> bool;

    /// Contents of a previously requested readback once the map completed
    fn poll_readback(&mut self, buffer: BufferHandle) -> Option<Vec<u8>>;

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}
