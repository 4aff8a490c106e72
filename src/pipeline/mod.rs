//! GPU-driven forward pipeline
//!
//! The frame graph runs, in declaration order:
//! 1. Culling - per-collection compute pass filling visible lists and indirect counts
//! 2. Shadow cascades - depth-only draws into one layer of the cascade array each
//! 3. Depth prepass - depth plus view-space normals for SSAO
//! 4. SSAO - half-resolution occlusion, separable blur, upscale
//! 5. PBR - forward shading at `Equal` depth, then the skybox
//! 6. Bloom - prefiltered downsample chain and tent upsample
//! 7. Tonemap - grading and composite into the swapchain

pub mod culling;
pub mod depth_prepass;
pub mod frame;
pub mod ibl;
pub mod pbr;
pub mod postprocess;
pub mod shadow;
pub mod uniforms;

pub use culling::CullPass;
pub use depth_prepass::DepthPrepass;
pub use frame::{FrameLayouts, FramePipelines, FrameResources, FrameSamplers};
pub use ibl::{EnvironmentMaps, IblGenerator};
pub use pbr::{PbrPass, SkyboxPass};
pub use postprocess::{BloomDownsamplePass, BloomUpsamplePass, SsaoBlurPass, SsaoPass, SsaoUpscalePass, TonemappingPass};
pub use shadow::ShadowPass;
pub use uniforms::*;

use crate::backend::*;
use crate::config::RendererConfig;
use crate::error::GraphError;
use crate::instances::{DrawBatch, InstanceRegistry};
use crate::render_graph::{PassType, RenderGraph, ResourceId, TextureSize};
use crate::resources::ModelStore;
use crate::scene::Frustum;

/// Format of every HDR intermediate
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Surface description every resolution-dependent object is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext {
    pub width: u32,
    pub height: u32,
    pub msaa_samples: u32,
    pub surface_format: TextureFormat,
}

impl RenderContext {
    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }

    pub fn with_size(self, width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            ..self
        }
    }
}

/// Scene state the passes read while recording one frame
pub struct FrameState<'a> {
    pub registry: &'a InstanceRegistry,
    pub models: &'a ModelStore,
    /// One frustum per render context, camera first
    pub frustums: &'a [Frustum],
    pub swapchain_view: TextureViewHandle,
}

/// Record indirect draws; groups 1 and 2 carry the instances and the mesh
pub(crate) fn record_draws<B: GraphicsBackend>(backend: &mut B, batches: &[DrawBatch]) {
    for batch in batches {
        backend.set_bind_group(1, batch.draw_bind_group);
        backend.set_bind_group(2, batch.mesh_bind_group);
        backend.set_index_buffer(batch.index_buffer, 0, batch.index_format);
        backend.draw_indexed_indirect(batch.indirect_buffer, batch.indirect_offset);
    }
}

/// Graph textures and externals, by role
#[derive(Debug, Clone)]
pub struct FrameTargets {
    pub indirect: ResourceId,
    pub swapchain: ResourceId,
    pub shadow_map: ResourceId,
    pub depth: ResourceId,
    pub normals: ResourceId,
    pub ssao_half: [ResourceId; 2],
    pub ssao: ResourceId,
    /// Multisampled colour target, `None` without MSAA
    pub scene_msaa: Option<ResourceId>,
    /// Single-sample HDR scene colour
    pub scene: ResourceId,
    pub bloom_down: Vec<ResourceId>,
    pub bloom_up: Vec<ResourceId>,
}

/// Everything the frame graph is assembled from
pub struct FrameGraphDesc<'a> {
    pub context: &'a RenderContext,
    pub config: &'a RendererConfig,
    pub layouts: &'a FrameLayouts,
    pub pipelines: &'a FramePipelines,
    pub resources: &'a FrameResources,
    pub environment: &'a EnvironmentMaps,
    /// Draw the skybox; off while only the placeholder environment exists
    pub skybox: bool,
}

/// Declare the frame's textures and passes
pub fn build_frame_graph<B: GraphicsBackend>(
    desc: &FrameGraphDesc,
) -> Result<(RenderGraph<B>, FrameTargets), GraphError> {
    let context = desc.context;
    let config = desc.config;
    let (width, height) = (context.width, context.height);
    let samples = context.msaa_samples;
    let mut graph = RenderGraph::new(width, height);

    let indirect = graph.register_external("indirect");
    let swapchain = graph.register_external("swapchain");

    let attachment = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;
    let storage = TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING;

    let shadow_map = graph.create_texture(
        "shadow_map",
        TextureDescriptor {
            label: Some("shadow_map".to_string()),
            width: config.shadow_map_size,
            height: config.shadow_map_size,
            depth_or_array_layers: config.cascades.len() as u32,
            format: TextureFormat::Depth32Float,
            usage: attachment,
            ..Default::default()
        },
    );
    let depth = graph.create_texture(
        "depth",
        TextureDescriptor {
            sample_count: samples,
            ..TextureDescriptor::new_2d("depth", width, height, TextureFormat::Depth32Float, attachment)
        },
    );
    let normals = graph.create_texture(
        "normals",
        TextureDescriptor {
            sample_count: samples,
            ..TextureDescriptor::new_2d("normals", width, height, HDR_FORMAT, attachment)
        },
    );

    let (half_width, half_height) = TextureSize::half().resolve(width, height);
    let ssao_half = [
        graph.create_texture(
            "ssao_half_a",
            TextureDescriptor::new_2d("ssao_half_a", half_width, half_height, HDR_FORMAT, storage),
        ),
        graph.create_texture(
            "ssao_half_b",
            TextureDescriptor::new_2d("ssao_half_b", half_width, half_height, HDR_FORMAT, storage),
        ),
    ];
    let ssao = graph.create_texture(
        "ssao",
        TextureDescriptor::new_2d("ssao", width, height, HDR_FORMAT, storage),
    );

    let scene_msaa = (samples > 1).then(|| {
        graph.create_texture(
            "scene_msaa",
            TextureDescriptor {
                sample_count: samples,
                ..TextureDescriptor::new_2d(
                    "scene_msaa",
                    width,
                    height,
                    HDR_FORMAT,
                    TextureUsage::RENDER_ATTACHMENT,
                )
            },
        )
    });
    let scene = graph.create_texture(
        "scene",
        TextureDescriptor::new_2d("scene", width, height, HDR_FORMAT, attachment),
    );

    let padding = config.bloom.padding;
    let chain = postprocess::bloom::bloom_chain_sizes(
        width + 2 * padding,
        height + 2 * padding,
        config.bloom.levels,
    );
    let bloom_down: Vec<ResourceId> = chain
        .iter()
        .enumerate()
        .map(|(level, &(w, h))| {
            let name = format!("bloom_down_{}", level);
            graph.create_texture(&name, TextureDescriptor::new_2d(&name, w, h, HDR_FORMAT, storage))
        })
        .collect();
    let bloom_up: Vec<ResourceId> = chain[..chain.len() - 1]
        .iter()
        .enumerate()
        .map(|(level, &(w, h))| {
            let name = format!("bloom_up_{}", level);
            graph.create_texture(&name, TextureDescriptor::new_2d(&name, w, h, HDR_FORMAT, storage))
        })
        .collect();

    let targets = FrameTargets {
        indirect,
        swapchain,
        shadow_map,
        depth,
        normals,
        ssao_half,
        ssao,
        scene_msaa,
        scene,
        bloom_down,
        bloom_up,
    };

    let pipelines = desc.pipelines;
    let resources = desc.resources;
    let layouts = desc.layouts;

    graph.add_pass(
        CullPass::new(pipelines.cull, indirect, config.instances.culling_path),
        PassType::Compute,
    )?;

    for cascade in 0..config.cascades.len() {
        graph.add_pass(
            ShadowPass::new(
                cascade,
                pipelines.shadow,
                resources.view_bind_groups[cascade + 1],
                shadow_map,
                indirect,
            ),
            PassType::Graphics,
        )?;
    }

    graph.add_pass(
        DepthPrepass::new(
            pipelines.depth_prepass,
            resources.view_bind_groups[0],
            depth,
            normals,
            indirect,
        ),
        PassType::Graphics,
    )?;

    graph.add_pass(
        SsaoPass::new(
            pipelines.ssao,
            layouts.ssao,
            resources,
            depth,
            normals,
            ssao_half[0],
        ),
        PassType::Compute,
    )?;
    graph.add_pass(
        SsaoBlurPass::new(
            "ssao_blur_h",
            pipelines.blur,
            layouts.filter,
            resources.blur_buffers[0],
            resources.samplers.linear,
            ssao_half[0],
            ssao_half[1],
        ),
        PassType::Compute,
    )?;
    graph.add_pass(
        SsaoBlurPass::new(
            "ssao_blur_v",
            pipelines.blur,
            layouts.filter,
            resources.blur_buffers[1],
            resources.samplers.linear,
            ssao_half[1],
            ssao_half[0],
        ),
        PassType::Compute,
    )?;
    graph.add_pass(
        SsaoUpscalePass::new(
            pipelines.upscale,
            layouts.resample,
            resources.samplers.linear,
            ssao_half[0],
            ssao,
        ),
        PassType::Compute,
    )?;

    graph.add_pass(
        PbrPass::new(
            pipelines.pbr,
            layouts.shading,
            resources,
            desc.environment,
            &targets,
            config.clear_color,
        ),
        PassType::Graphics,
    )?;
    graph.add_pass(
        SkyboxPass::new(
            pipelines.skybox,
            layouts.skybox,
            resources,
            desc.skybox.then_some(desc.environment.skybox),
            &targets,
        ),
        PassType::Graphics,
    )?;

    graph.add_pass(
        BloomDownsamplePass::new(
            pipelines.bloom_down,
            layouts.filter,
            resources,
            &config.bloom,
            scene,
            targets.bloom_down.clone(),
        ),
        PassType::Compute,
    )?;
    graph.add_pass(
        BloomUpsamplePass::new(
            pipelines.bloom_up,
            layouts.bloom_up,
            resources,
            &config.bloom,
            targets.bloom_down.clone(),
            targets.bloom_up.clone(),
        ),
        PassType::Compute,
    )?;

    let bloom_result = targets.bloom_up.first().copied().unwrap_or(targets.bloom_down[0]);
    graph.add_pass(
        TonemappingPass::new(
            pipelines.tonemap,
            layouts.composite,
            resources,
            scene,
            bloom_result,
            swapchain,
        ),
        PassType::Graphics,
    )?;

    Ok((graph, targets))
}

/// Members of the `View` uniform
pub const VIEW_WGSL: &str = r#"
struct View {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    sky_inverse: mat4x4<f32>,
    position: vec4<f32>,
    planes: array<vec4<f32>, 6>,
    // near, far, width, height
    params: vec4<f32>,
    pad: array<vec4<f32>, 4>,
}
"#;

/// One instance record
pub const INSTANCE_WGSL: &str = r#"
struct Instance {
    world: mat4x4<f32>,
    normal: mat4x4<f32>,
    offset_scale: vec4<f32>,
    bounds: vec4<f32>,
    material: vec4<f32>,
    flags: vec4<u32>,
}

const INSTANCE_LIVE: u32 = 1u;
const INSTANCE_CASTS_SHADOWS: u32 = 2u;
"#;

/// Bindings and vertex pulling shared by every geometry pass
pub const GEOMETRY_WGSL: &str = r#"
struct MeshParams {
    // words per vertex, component mask
    vertex_format: vec4<u32>,
}

struct MeshVertex {
    position: vec3<f32>,
    normal: vec3<f32>,
    color: vec3<f32>,
    uv: vec2<f32>,
}

const COMPONENT_UV: u32 = 1u;
const COMPONENT_NORMAL: u32 = 2u;
const COMPONENT_COLOR: u32 = 4u;

@group(0) @binding(0) var<uniform> view: View;
@group(1) @binding(0) var<storage, read> instances: array<Instance>;
@group(1) @binding(1) var<storage, read> visible: array<u32>;
@group(2) @binding(0) var<storage, read> vertex_words: array<u32>;
@group(2) @binding(1) var<uniform> mesh: MeshParams;

fn fetch_vertex(vertex_index: u32, offset_scale: vec4<f32>) -> MeshVertex {
    let components = mesh.vertex_format.y;
    let base = vertex_index * mesh.vertex_format.x;
    let w0 = vertex_words[base];
    let w1 = vertex_words[base + 1u];

    var fetched: MeshVertex;
    let quantized = vec3<f32>(f32(w0 >> 16u), f32(w0 & 0xFFFFu), f32(w1 >> 16u));
    fetched.position = (quantized / 65535.0 - 0.5) / offset_scale.w + offset_scale.xyz;

    fetched.color = vec3<f32>(1.0);
    if (components & COMPONENT_COLOR) != 0u {
        let rgb = w1 & 0xFFFFu;
        fetched.color = vec3<f32>(
            f32((rgb >> 11u) & 31u) / 31.0,
            f32((rgb >> 5u) & 63u) / 63.0,
            f32(rgb & 31u) / 31.0,
        );
    }

    var next = base + 2u;
    fetched.normal = vec3<f32>(0.0, 1.0, 0.0);
    if (components & COMPONENT_NORMAL) != 0u {
        let n = vertex_words[next];
        let packed = vec3<f32>(f32((n >> 22u) & 1023u), f32((n >> 12u) & 1023u), f32((n >> 2u) & 1023u));
        fetched.normal = packed / 1023.0 * 2.0 - 1.0;
        next = next + 1u;
    }

    fetched.uv = vec2<f32>(0.0);
    if (components & COMPONENT_UV) != 0u {
        let t = vertex_words[next];
        fetched.uv = vec2<f32>(f32(t >> 16u), f32(t & 0xFFFFu)) / 65535.0;
    }
    return fetched;
}

// Identical in every pass that depth-tests against the prepass
fn clip_position(instance: Instance, local: MeshVertex) -> vec4<f32> {
    return view.view_projection * (instance.world * vec4<f32>(local.position, 1.0));
}
"#;

/// Full source of a geometry pass
pub fn geometry_shader(body: &str) -> String {
    [VIEW_WGSL, INSTANCE_WGSL, GEOMETRY_WGSL, body].concat()
}
