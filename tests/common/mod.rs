//! Shared fixtures for the headless renderer tests

#![allow(dead_code)]

use glam::Vec3;
use scene_renderer::backend::{DrawIndexedIndirectArgs, RecordingBackend};
use scene_renderer::config::{CullingPath, IblConfig};
use scene_renderer::resources::MeshData;
use scene_renderer::{ModelId, ObjectHandle, Renderer, RendererConfig, SceneObject, Transform};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Camera at the origin looking down -Z, host culling so counts are observable
pub fn test_config(msaa_samples: u32) -> RendererConfig {
    let mut config = RendererConfig {
        msaa_samples,
        shadow_map_size: 256,
        ..Default::default()
    };
    config.camera.position = Vec3::ZERO;
    config.camera.yaw = 0.0;
    config.camera.pitch = 0.0;
    config.instances.culling_path = CullingPath::Host;
    config.lighting.ibl = IblConfig {
        skybox_size: 16,
        irradiance_size: 8,
        prefilter_size: 16,
        prefilter_mips: 3,
        brdf_lut_size: 16,
        max_radiance: 65000.0,
    };
    config
}

pub struct TestScene {
    pub renderer: Renderer<RecordingBackend>,
    pub cube: ModelId,
}

impl TestScene {
    pub fn new(config: RendererConfig) -> Self {
        Self::with_backend(RecordingBackend::new(WIDTH, HEIGHT), config)
    }

    pub fn with_backend(backend: RecordingBackend, config: RendererConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut renderer = Renderer::new(backend, config).expect("renderer");
        let cube = renderer.load_model_data("cube", MeshData::cube());
        Self { renderer, cube }
    }

    /// Draw one frame with no input
    pub fn frame(&mut self) {
        let input = scene_renderer::FrameInput::new();
        self.renderer.draw(&input, 16.0).expect("frame");
    }

    pub fn add(&mut self, usage: scene_renderer::Usage, position: Vec3) -> ObjectHandle {
        let object = SceneObject::new(Transform::from_position(position));
        self.renderer
            .add_object(self.cube, usage, object)
            .expect("add object")
    }

    /// Draw arguments of every context for the collection holding `handle`
    pub fn draw_args(&self, handle: ObjectHandle) -> Vec<DrawIndexedIndirectArgs> {
        let collection = self
            .renderer
            .registry()
            .collection(handle.collection)
            .expect("collection");
        self.renderer
            .backend()
            .read_buffer(collection.indirect_buffer())
    }
}
