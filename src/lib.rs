//! Scene Renderer - a GPU-driven forward renderer built on a render graph
//!
//! Rendering goes through the handle-based [`backend::GraphicsBackend`] trait:
//! - **wgpu**: the windowed backend
//! - **Recording**: headless, stores buffer contents and records commands
//!
//! # Features
//! - Render graph with explicit resource reads/writes, barriers and lifetimes
//! - GPU frustum culling into indirect draws, per camera and per shadow cascade
//! - Cascaded shadow maps, depth prepass and forward PBR with image-based lighting
//! - SSAO, bloom and a graded tonemapping composite
//! - Streaming mesh and Radiance HDR decoding on worker threads

pub mod backend;
pub mod config;
pub mod error;
pub mod instances;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod resources;
pub mod scene;

pub use backend::{GraphicsBackend, RecordingBackend, WgpuBackend};
pub use config::RendererConfig;
pub use error::{AssetError, GraphError, RendererError, RendererResult};
pub use instances::{ObjectHandle, SceneObject, Usage};
pub use renderer::Renderer;
pub use resources::ModelId;
pub use scene::{FrameInput, Key, Transform};
