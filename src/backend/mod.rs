//! Backend abstraction layer
//!
//! Provides the handle-based `GraphicsBackend` trait with a wgpu implementation
//! and a headless recording implementation.

pub mod recording;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use recording::{RecordedCommand, RecordingBackend};
pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuBackend;
