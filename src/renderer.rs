//! Renderer facade
//!
//! Owns the backend, the scene state and the frame graph, and drives one
//! frame per `draw` call: poll loads, move the camera, fit cascades, upload
//! uniforms and instances, then run the compiled graph.

use crate::backend::*;
use crate::config::{RendererConfig, MAX_CASCADES, MAX_POINT_LIGHTS};
use crate::error::RendererResult;
use crate::instances::{InstanceRegistry, ObjectHandle, RegistryBindings, SceneObject, Usage};
use crate::pipeline::{
    build_frame_graph, pbr, EnvironmentMaps, FrameGraphDesc, FrameLayouts, FramePipelines,
    FrameResources, FrameState, FrameTargets, IblGenerator, RenderContext, ShadowUniform,
    ViewUniform,
};
use crate::render_graph::{CompiledGraph, FrameTimestamps, RenderGraph, RenderGraphExecutor};
use crate::resources::{
    decode_hdr, read_mesh, spawn_load, AssetSlot, HdrImage, MeshData, ModelId, ModelStore,
};
use crate::scene::{
    fit_cascades, CameraState, CascadeTransform, FlyController, FrameInput, Frustum, Key,
    LightingUniform, PointLight, SunLight,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Bytes handed to the mesh parser per read
const MESH_CHUNK_SIZE: usize = 64 * 1024;

/// Frame-bracketing timestamp queries and their readback
struct FrameTiming {
    query_set: QuerySetHandle,
    resolve: BufferHandle,
    readback: BufferHandle,
    /// The readback buffer is mapped or waiting to be
    pending: bool,
}

impl FrameTiming {
    const BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

    fn new<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        let query_set = backend.create_query_set(2)?;
        let resolve = backend.create_buffer(&BufferDescriptor::new(
            "timestamp resolve",
            Self::BYTES,
            BufferUsage::QUERY_RESOLVE | BufferUsage::COPY_SRC,
        ))?;
        let readback = backend.create_buffer(&BufferDescriptor::new(
            "timestamp readback",
            Self::BYTES,
            BufferUsage::MAP_READ | BufferUsage::COPY_DST,
        ))?;
        Ok(Self {
            query_set,
            resolve,
            readback,
            pending: false,
        })
    }
}

/// Frame graph and everything allocated for its current resolution
struct FrameGraphState<B: GraphicsBackend> {
    graph: RenderGraph<B>,
    compiled: CompiledGraph,
    executor: RenderGraphExecutor,
    targets: FrameTargets,
}

/// GPU-driven scene renderer
pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    config: RendererConfig,
    context: RenderContext,

    camera: CameraState,
    controller: FlyController,
    sun: SunLight,
    point_lights: Vec<PointLight>,
    cascades: Vec<CascadeTransform>,

    models: ModelStore,
    registry: InstanceRegistry,

    layouts: FrameLayouts,
    pipelines: FramePipelines,
    resources: FrameResources,

    ibl: IblGenerator,
    placeholder: EnvironmentMaps,
    environment: Option<EnvironmentMaps>,
    environment_source: Option<AssetSlot<HdrImage>>,

    frame_graph: Option<FrameGraphState<B>>,
    last_views: Vec<ViewUniform>,

    timing: Option<FrameTiming>,
    gpu_frame_time: Option<f32>,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Create every pipeline and persistent buffer, then build the frame graph
    /// for the backend's current surface size
    pub fn new(mut backend: B, config: RendererConfig) -> RendererResult<Self> {
        config.validate()?;

        let (width, height) = backend.surface_size();
        let context = RenderContext {
            width: width.max(1),
            height: height.max(1),
            msaa_samples: config.msaa_samples,
            surface_format: backend.swapchain_format(),
        };
        log::info!(
            "Creating renderer: {}x{}, {}x MSAA, {} cascades",
            context.width,
            context.height,
            context.msaa_samples,
            config.cascades.len()
        );

        let layouts = FrameLayouts::new(&mut backend, context.msaa_samples)?;
        let pipelines = FramePipelines::new(&mut backend, &layouts, &context, &config)?;
        let resources = FrameResources::new(&mut backend, &layouts, &config)?;

        let registry = InstanceRegistry::new(
            &config.instances,
            config.context_count(),
            RegistryBindings {
                cull_layout: layouts.cull,
                draw_layout: layouts.draw,
                views_buffer: resources.views_buffer,
            },
        );

        let ibl = IblGenerator::new(&mut backend)?;
        let placeholder = EnvironmentMaps::placeholder(&mut backend)?;

        let timing = if !config.timestamps {
            None
        } else if backend.supports_timestamps() {
            Some(FrameTiming::new(&mut backend)?)
        } else {
            log::warn!("Timestamp queries unsupported, GPU frame time unavailable");
            None
        };

        let mut camera = CameraState::new(&config.camera);
        camera.update(context.aspect());

        let mut renderer = Self {
            controller: FlyController::new(&config.movement),
            sun: SunLight::from_config(&config.lighting),
            point_lights: Vec::new(),
            cascades: Vec::new(),
            camera,
            models: ModelStore::new(),
            registry,
            layouts,
            pipelines,
            resources,
            ibl,
            placeholder,
            environment: None,
            environment_source: None,
            frame_graph: None,
            last_views: Vec::new(),
            timing,
            gpu_frame_time: None,
            backend,
            config,
            context,
        };
        renderer.rebuild_graph()?;
        Ok(renderer)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut CameraState {
        &mut self.camera
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Cascades fitted during the last `draw`
    pub fn cascades(&self) -> &[CascadeTransform] {
        &self.cascades
    }

    /// Graph textures of the current resolution
    pub fn targets(&self) -> Option<&FrameTargets> {
        self.frame_graph.as_ref().map(|f| &f.targets)
    }

    /// Pass names in execution order
    pub fn pass_order(&self) -> Vec<String> {
        let Some(frame_graph) = &self.frame_graph else {
            return Vec::new();
        };
        frame_graph
            .compiled
            .pass_order
            .iter()
            .filter_map(|&id| frame_graph.graph.get_pass(id))
            .map(|pass| pass.name().to_string())
            .collect()
    }

    /// GPU duration of the last measured frame in milliseconds
    pub fn gpu_frame_time(&self) -> Option<f32> {
        self.gpu_frame_time
    }

    /// An environment finished generating and replaced the placeholder
    pub fn has_environment(&self) -> bool {
        self.environment.is_some()
    }

    /// An environment image is still being decoded
    pub fn environment_pending(&self) -> bool {
        self.environment_source.is_some()
    }

    pub fn sun_mut(&mut self) -> &mut SunLight {
        &mut self.sun
    }

    /// Replace the point lights. Lights beyond the uniform's capacity are dropped.
    pub fn set_point_lights(&mut self, lights: &[PointLight]) {
        if lights.len() > MAX_POINT_LIGHTS {
            log::warn!(
                "{} point lights given, only the first {} are used",
                lights.len(),
                MAX_POINT_LIGHTS
            );
        }
        self.point_lights = lights.iter().take(MAX_POINT_LIGHTS).copied().collect();
    }

    /// Decode a mesh stream file on a worker thread
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> ModelId {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        let slot = spawn_load(&name, move || {
            let file = File::open(&path)?;
            read_mesh(BufReader::new(file), MESH_CHUNK_SIZE)
        });
        self.models.register(&name, slot)
    }

    /// Register already-decoded mesh data; uploaded on the next `draw`
    pub fn load_model_data(&mut self, name: &str, mesh: MeshData) -> ModelId {
        self.models.register(name, AssetSlot::from_value(mesh))
    }

    /// Decode a Radiance HDR file on a worker thread. The image-based lighting
    /// maps are generated on the render thread once it is decoded.
    pub fn load_environment(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let max_value = self.config.lighting.ibl.max_radiance;
        let slot = spawn_load(&path.display().to_string(), move || {
            let bytes = std::fs::read(&path)?;
            decode_hdr(&bytes, max_value)
        });
        self.environment_source = Some(slot);
    }

    /// Use an already-decoded environment image
    pub fn load_environment_image(&mut self, image: HdrImage) {
        self.environment_source = Some(AssetSlot::from_value(image));
    }

    /// Place an object. It is drawn once its model finished loading.
    pub fn add_object(
        &mut self,
        model: ModelId,
        usage: Usage,
        object: SceneObject,
    ) -> RendererResult<ObjectHandle> {
        Ok(self
            .registry
            .add_object(&mut self.backend, &self.models, model, usage, object)?)
    }

    /// Returns false if the handle was already removed
    pub fn remove_object(&mut self, handle: ObjectHandle) -> bool {
        self.registry.remove_object(&mut self.backend, handle)
    }

    pub fn object(&self, handle: ObjectHandle) -> Option<&SceneObject> {
        self.registry.object(handle)
    }

    /// Mutable access; the object's collection is re-uploaded on the next frame
    pub fn object_mut(&mut self, handle: ObjectHandle) -> Option<&mut SceneObject> {
        self.registry.object_mut(handle)
    }

    /// Rebuild every resolution-dependent texture and bind group.
    /// Must not be called while a frame is being recorded.
    pub fn on_resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        self.backend.resize(width.max(1), height.max(1));
        let (width, height) = self.backend.surface_size();
        if (width, height) == (self.context.width, self.context.height) {
            return Ok(());
        }
        self.context = self.context.with_size(width, height);
        log::info!("Resized to {}x{}", self.context.width, self.context.height);
        self.rebuild_graph()
    }

    /// Record and submit one frame. `dt` is in milliseconds.
    pub fn draw(&mut self, input: &FrameInput, dt: f32) -> RendererResult<()> {
        self.poll_timing();
        self.poll_models()?;
        self.poll_environment()?;

        if input.was_pressed(Key::ToggleCascadeDebug) {
            self.toggle_cascade_debug()?;
        }

        self.controller.update(&mut self.camera, input, dt);
        self.camera.update(self.context.aspect());
        self.cascades = fit_cascades(
            &self.camera,
            self.context.aspect(),
            &self.config.cascades,
            self.sun.direction,
            self.config.depth_padding,
        );

        let views = self.frame_views();
        let views_changed = views != self.last_views;
        self.resources.write_views(&mut self.backend, &views);
        self.write_scene_uniforms();

        self.registry
            .update_instance_data(&mut self.backend, &self.models, Usage::Dynamic);
        if self.registry.needs_update(Usage::Static) {
            self.registry
                .update_instance_data(&mut self.backend, &self.models, Usage::Static);
        }
        self.registry.prepare_culling(views_changed);

        let frustums: Vec<Frustum> = views.iter().map(ViewUniform::frustum).collect();
        self.last_views = views;
        self.record_frame(&frustums)
    }

    fn frame_views(&self) -> Vec<ViewUniform> {
        let camera = ViewUniform::camera(&self.camera, self.context.width, self.context.height);
        std::iter::once(camera)
            .chain(
                self.cascades
                    .iter()
                    .take(MAX_CASCADES)
                    .map(|c| ViewUniform::cascade(c, self.config.shadow_map_size)),
            )
            .collect()
    }

    fn write_scene_uniforms(&mut self) {
        let shadow = ShadowUniform::new(&self.cascades, self.config.shadow_map_size);
        self.backend
            .write_buffer(self.resources.shadow_buffer, 0, bytemuck::bytes_of(&shadow));
        let lighting = LightingUniform::new(&self.sun, &self.point_lights);
        self.backend
            .write_buffer(self.resources.lighting_buffer, 0, bytemuck::bytes_of(&lighting));
    }

    fn record_frame(&mut self, frustums: &[Frustum]) -> RendererResult<()> {
        let Some(frame_graph) = &self.frame_graph else {
            return Ok(());
        };

        let frame = self.backend.begin_frame()?;
        let timestamps = self
            .timing
            .as_ref()
            .filter(|t| !t.pending)
            .map(|t| FrameTimestamps {
                query_set: t.query_set,
                begin: 0,
                end: 1,
            });

        let state = FrameState {
            registry: &self.registry,
            models: &self.models,
            frustums,
            swapchain_view: frame.swapchain_view,
        };
        frame_graph.executor.execute(
            &frame_graph.graph,
            &frame_graph.compiled,
            &mut self.backend,
            &state,
            timestamps,
        );

        if let (Some(timing), Some(_)) = (self.timing.as_ref(), timestamps) {
            self.backend
                .resolve_query_set(timing.query_set, 0..2, timing.resolve, 0);
            self.backend.copy_buffer_to_buffer(
                timing.resolve,
                0,
                timing.readback,
                0,
                FrameTiming::BYTES,
            );
        }

        self.backend.end_frame()?;

        if timestamps.is_some() {
            if let Some(timing) = self.timing.as_mut() {
                timing.pending = self.backend.request_readback(timing.readback);
            }
        }
        Ok(())
    }

    fn poll_timing(&mut self) {
        let Some(timing) = self.timing.as_mut() else {
            return;
        };
        if !timing.pending {
            return;
        }
        let Some(bytes) = self.backend.poll_readback(timing.readback) else {
            return;
        };
        timing.pending = false;

        let ticks: Vec<u64> = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        if let [begin, end] = ticks.as_slice() {
            let nanos = end.saturating_sub(*begin) as f64 * self.backend.timestamp_period() as f64;
            self.gpu_frame_time = Some((nanos / 1.0e6) as f32);
        }
    }

    fn poll_models(&mut self) -> RendererResult<()> {
        let ready = self.models.poll(&mut self.backend, self.layouts.mesh)?;
        for model in ready {
            self.registry.mark_model_dirty(model);
        }
        Ok(())
    }

    fn poll_environment(&mut self) -> RendererResult<()> {
        let Some(source) = &self.environment_source else {
            return Ok(());
        };
        match source.take_finished() {
            None => Ok(()),
            Some(Err(err)) => {
                log::error!("Environment failed to load: {}", err);
                self.environment_source = None;
                Ok(())
            }
            Some(Ok(image)) => {
                self.environment_source = None;
                let maps = self
                    .ibl
                    .generate(&mut self.backend, &image, &self.config.lighting.ibl)?;
                if let Some(previous) = self.environment.replace(maps) {
                    previous.destroy(&mut self.backend);
                }
                log::info!("Environment ready");
                self.rebuild_graph()
            }
        }
    }

    fn toggle_cascade_debug(&mut self) -> RendererResult<()> {
        self.config.shading.cascade_debug = !self.config.shading.cascade_debug;
        log::info!("Cascade debug {}", if self.config.shading.cascade_debug { "on" } else { "off" });
        self.pipelines.pbr = pbr::create_pipeline(
            &mut self.backend,
            &self.layouts,
            self.context.msaa_samples,
            &self.config.shading,
        )?;
        self.rebuild_graph()
    }

    /// Declare, compile and allocate the frame graph for the current context
    fn rebuild_graph(&mut self) -> RendererResult<()> {
        if let Some(mut previous) = self.frame_graph.take() {
            previous.executor.cleanup(&mut self.backend);
        }

        let environment = self.environment.as_ref().unwrap_or(&self.placeholder);
        let (mut graph, targets) = build_frame_graph(&FrameGraphDesc {
            context: &self.context,
            config: &self.config,
            layouts: &self.layouts,
            pipelines: &self.pipelines,
            resources: &self.resources,
            environment,
            skybox: self.environment.is_some(),
        })?;
        let compiled = graph.compile()?;
        log::debug!(
            "Frame graph compiled: {} passes, {} resources",
            compiled.pass_order.len(),
            graph.resources().len()
        );

        let mut executor = RenderGraphExecutor::new();
        executor.allocate_resources(&mut graph, &mut self.backend)?;

        self.frame_graph = Some(FrameGraphState {
            graph,
            compiled,
            executor,
            targets,
        });
        Ok(())
    }

    /// Release every GPU object the renderer created
    pub fn destroy(mut self) {
        if let Some(mut frame_graph) = self.frame_graph.take() {
            frame_graph.executor.cleanup(&mut self.backend);
        }
        self.registry.destroy(&mut self.backend);
        self.models.destroy(&mut self.backend);
        if let Some(environment) = self.environment.take() {
            environment.destroy(&mut self.backend);
        }
        self.placeholder.destroy(&mut self.backend);
        self.resources.destroy(&mut self.backend);
        if let Some(timing) = self.timing.take() {
            self.backend.destroy_buffer(timing.resolve);
            self.backend.destroy_buffer(timing.readback);
        }
    }
}
