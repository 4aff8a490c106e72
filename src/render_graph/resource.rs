//! Virtual resources for the render graph

use crate::backend::types::*;

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Virtual texture resource in the render graph
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub desc: TextureDescriptor,
    pub name: String,
}

/// Resource type enumeration
#[derive(Debug, Clone)]
pub enum VirtualResource {
    /// Allocated by the executor, rebuilt with the graph
    Texture(VirtualTexture),
    /// Owned outside the graph (swapchain, instance buffers, environment maps).
    /// Declared so passes can be ordered and barriers derived.
    External { id: ResourceId, name: String },
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Texture(t) => t.id,
            VirtualResource::External { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Texture(t) => &t.name,
            VirtualResource::External { name, .. } => name,
        }
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Read as a texture (sampled)
    TextureRead,
    /// Write as a render target
    RenderTarget,
    /// Write as storage texture
    StorageWrite,
    /// Depth/stencil attachment
    DepthStencilRead,
    DepthStencilWrite,
    /// Read as uniform buffer
    UniformBuffer,
    /// Read/write as storage buffer
    StorageBufferRead,
    StorageBufferWrite,
    /// Indirect draw arguments
    IndirectRead,
    /// Handed to the presentation engine
    Present,
}

impl ResourceUsage {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ResourceUsage::RenderTarget
                | ResourceUsage::StorageWrite
                | ResourceUsage::DepthStencilWrite
                | ResourceUsage::StorageBufferWrite
                | ResourceUsage::Present
        )
    }
}

/// Resource access declaration for a pass
#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

impl ResourceAccess {
    pub fn is_write(&self) -> bool {
        self.usage.is_write()
    }
}

/// Describes texture dimensions that can be relative to screen size
#[derive(Debug, Clone, Copy)]
pub enum TextureSize {
    /// Absolute size in pixels
    Absolute { width: u32, height: u32 },
    /// Relative to screen size (1.0 = full screen), rounded up
    Relative { width_scale: f32, height_scale: f32 },
}

impl Default for TextureSize {
    fn default() -> Self {
        TextureSize::Relative {
            width_scale: 1.0,
            height_scale: 1.0,
        }
    }
}

impl TextureSize {
    pub fn half() -> Self {
        TextureSize::Relative {
            width_scale: 0.5,
            height_scale: 0.5,
        }
    }

    pub fn resolve(&self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        match self {
            TextureSize::Absolute { width, height } => (*width, *height),
            TextureSize::Relative {
                width_scale,
                height_scale,
            } => (
                (((screen_width as f32) * width_scale).ceil() as u32).max(1),
                (((screen_height as f32) * height_scale).ceil() as u32).max(1),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_size_rounds_up() {
        assert_eq!(TextureSize::half().resolve(801, 601), (401, 301));
        assert_eq!(TextureSize::default().resolve(640, 480), (640, 480));
        assert_eq!(
            TextureSize::Absolute {
                width: 2048,
                height: 2048
            }
            .resolve(1, 1),
            (2048, 2048)
        );
    }

    #[test]
    fn test_usage_direction() {
        assert!(ResourceUsage::DepthStencilWrite.is_write());
        assert!(!ResourceUsage::DepthStencilRead.is_write());
        assert!(!ResourceUsage::IndirectRead.is_write());
    }
}
