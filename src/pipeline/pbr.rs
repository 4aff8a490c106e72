//! Forward PBR shading and the skybox
//!
//! The shading pass redraws the camera's visible list at `Equal` depth against
//! the prepass, so each covered sample is shaded exactly once. Direct light
//! comes from the sun (shadowed by the cascades) and the point lights; indirect
//! light from the irradiance and prefiltered environment maps.

use crate::backend::*;
use crate::config::ShadingConstants;
use crate::pipeline::{
    geometry_shader, record_draws, EnvironmentMaps, FrameLayouts, FrameResources, FrameTargets,
    HDR_FORMAT, VIEW_WGSL,
};
use crate::render_graph::*;

pub fn create_pipeline<B: GraphicsBackend>(
    backend: &mut B,
    layouts: &FrameLayouts,
    sample_count: u32,
    shading: &ShadingConstants,
) -> BackendResult<RenderPipelineHandle> {
    let mut desc = RenderPipelineDescriptor::new(
        "pbr",
        &geometry_shader(PBR_SHADER),
        vec![layouts.view, layouts.draw, layouts.mesh, layouts.shading],
    );
    desc.constants = shading.overrides();
    desc.depth_stencil = Some(DepthStencilState::depth32(false, CompareFunction::Equal));
    desc.color_targets = vec![ColorTargetState::replace(HDR_FORMAT)];
    desc.sample_count = sample_count;
    backend.create_render_pipeline(&desc)
}

pub fn create_skybox_pipeline<B: GraphicsBackend>(
    backend: &mut B,
    layouts: &FrameLayouts,
    sample_count: u32,
) -> BackendResult<RenderPipelineHandle> {
    let mut desc = RenderPipelineDescriptor::new(
        "skybox",
        &skybox_shader(),
        vec![layouts.view, layouts.skybox],
    );
    desc.depth_stencil = Some(DepthStencilState::depth32(false, CompareFunction::LessEqual));
    desc.color_targets = vec![ColorTargetState::replace(HDR_FORMAT)];
    desc.sample_count = sample_count;
    backend.create_render_pipeline(&desc)
}

pub fn skybox_shader() -> String {
    [VIEW_WGSL, SKYBOX_SHADER].concat()
}

/// Colour attachment of the scene: the multisampled target resolving into
/// the scene texture, or the scene texture itself
fn scene_attachment<B: GraphicsBackend>(
    ctx: &PassExecuteContext<B>,
    scene_msaa: Option<ResourceId>,
    scene: ResourceId,
    load_op: LoadOp,
) -> Option<ColorAttachment> {
    let scene_view = ctx.get_texture(scene)?;
    Some(match scene_msaa {
        Some(msaa) => ColorAttachment {
            view: ctx.get_texture(msaa)?,
            resolve_target: Some(scene_view),
            load_op,
            store_op: StoreOp::Store,
        },
        None => ColorAttachment {
            view: scene_view,
            resolve_target: None,
            load_op,
            store_op: StoreOp::Store,
        },
    })
}

/// Forward shading pass
pub struct PbrPass {
    pipeline: RenderPipelineHandle,
    layout: BindGroupLayoutHandle,
    view_bind_group: BindGroupHandle,
    shadow_buffer: BufferHandle,
    lighting_buffer: BufferHandle,
    poisson_buffer: BufferHandle,
    noise_view: TextureViewHandle,
    linear_sampler: SamplerHandle,
    nearest_sampler: SamplerHandle,
    shadow_sampler: SamplerHandle,
    irradiance: TextureViewHandle,
    prefilter: TextureViewHandle,
    brdf_lut: TextureViewHandle,
    indirect: ResourceId,
    shadow_map: ResourceId,
    depth: ResourceId,
    ssao: ResourceId,
    scene_msaa: Option<ResourceId>,
    scene: ResourceId,
    clear_color: [f32; 4],
    shading_bind_group: Option<BindGroupHandle>,
}

impl PbrPass {
    pub fn new(
        pipeline: RenderPipelineHandle,
        layout: BindGroupLayoutHandle,
        resources: &FrameResources,
        environment: &EnvironmentMaps,
        targets: &FrameTargets,
        clear_color: [f32; 4],
    ) -> Self {
        Self {
            pipeline,
            layout,
            view_bind_group: resources.view_bind_groups[0],
            shadow_buffer: resources.shadow_buffer,
            lighting_buffer: resources.lighting_buffer,
            poisson_buffer: resources.poisson_buffer,
            noise_view: resources.noise_view,
            linear_sampler: resources.samplers.linear,
            nearest_sampler: resources.samplers.nearest_repeat,
            shadow_sampler: resources.samplers.shadow,
            irradiance: environment.irradiance,
            prefilter: environment.prefilter,
            brdf_lut: environment.brdf_lut,
            indirect: targets.indirect,
            shadow_map: targets.shadow_map,
            depth: targets.depth,
            ssao: targets.ssao,
            scene_msaa: targets.scene_msaa,
            scene: targets.scene,
            clear_color,
            shading_bind_group: None,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for PbrPass {
    fn name(&self) -> &str {
        "pbr"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.indirect, ResourceUsage::IndirectRead);
        ctx.read(self.depth, ResourceUsage::DepthStencilRead);
        ctx.read(self.shadow_map, ResourceUsage::TextureRead);
        ctx.read(self.ssao, ResourceUsage::TextureRead);
        if let Some(msaa) = self.scene_msaa {
            ctx.write(msaa, ResourceUsage::RenderTarget);
        }
        ctx.write(self.scene, ResourceUsage::RenderTarget);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        // Explicit array view; a single cascade would otherwise default to 2D
        let cascades = ctx.view_with(
            self.shadow_map,
            &TextureViewDescriptor::with_dimension(TextureViewDimension::D2Array),
        )?;
        let ssao = ctx.view(self.ssao)?;

        let bind_group = ctx.backend.create_bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::buffer(self.shadow_buffer)),
                (1, BindGroupEntry::buffer(self.lighting_buffer)),
                (2, BindGroupEntry::Texture(cascades)),
                (3, BindGroupEntry::Sampler(self.shadow_sampler)),
                (4, BindGroupEntry::buffer(self.poisson_buffer)),
                (5, BindGroupEntry::Texture(self.noise_view)),
                (6, BindGroupEntry::Texture(ssao)),
                (7, BindGroupEntry::Sampler(self.linear_sampler)),
                (8, BindGroupEntry::Sampler(self.nearest_sampler)),
                (9, BindGroupEntry::Texture(self.irradiance)),
                (10, BindGroupEntry::Texture(self.prefilter)),
                (11, BindGroupEntry::Texture(self.brdf_lut)),
            ],
        )?;
        self.shading_bind_group = Some(bind_group);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let Some(shading) = self.shading_bind_group else {
            return;
        };
        let color = scene_attachment(ctx, self.scene_msaa, self.scene, LoadOp::Clear(self.clear_color));
        let (Some(color), Some(depth_view)) = (color, ctx.get_texture(self.depth)) else {
            return;
        };
        let frame = ctx.frame;
        let batches = frame.registry.draw_batches(frame.models, 0);

        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("pbr".into()),
            color_attachments: vec![color],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Load,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
            timestamp_writes,
        });
        if !batches.is_empty() {
            backend.set_render_pipeline(self.pipeline);
            backend.set_bind_group(0, self.view_bind_group);
            backend.set_bind_group(3, shading);
            record_draws(backend, &batches);
        }
        backend.end_render_pass();
    }
}

/// Environment cube behind everything the prepass left at the far plane
pub struct SkyboxPass {
    pipeline: RenderPipelineHandle,
    layout: BindGroupLayoutHandle,
    view_bind_group: BindGroupHandle,
    sampler: SamplerHandle,
    cube: Option<TextureViewHandle>,
    depth: ResourceId,
    scene_msaa: Option<ResourceId>,
    scene: ResourceId,
    bind_group: Option<BindGroupHandle>,
}

impl SkyboxPass {
    /// Without a cube the pass records nothing and the clear colour shows
    pub fn new(
        pipeline: RenderPipelineHandle,
        layout: BindGroupLayoutHandle,
        resources: &FrameResources,
        cube: Option<TextureViewHandle>,
        targets: &FrameTargets,
    ) -> Self {
        Self {
            pipeline,
            layout,
            view_bind_group: resources.view_bind_groups[0],
            sampler: resources.samplers.linear,
            cube,
            depth: targets.depth,
            scene_msaa: targets.scene_msaa,
            scene: targets.scene,
            bind_group: None,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for SkyboxPass {
    fn name(&self) -> &str {
        "skybox"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.depth, ResourceUsage::DepthStencilRead);
        if let Some(msaa) = self.scene_msaa {
            ctx.write(msaa, ResourceUsage::RenderTarget);
        }
        ctx.write(self.scene, ResourceUsage::RenderTarget);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext<B>) -> BackendResult<()> {
        let Some(cube) = self.cube else {
            return Ok(());
        };
        self.bind_group = Some(ctx.backend.create_bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::Texture(cube)),
                (1, BindGroupEntry::Sampler(self.sampler)),
            ],
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext<B>) {
        let Some(bind_group) = self.bind_group else {
            log::trace!("skybox: no environment loaded");
            return;
        };
        let color = scene_attachment(ctx, self.scene_msaa, self.scene, LoadOp::Load);
        let (Some(color), Some(depth_view)) = (color, ctx.get_texture(self.depth)) else {
            return;
        };

        let timestamp_writes = ctx.timestamp_writes(false);
        let backend = &mut *ctx.backend;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("skybox".into()),
            color_attachments: vec![color],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Load,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
            timestamp_writes,
        });
        backend.set_render_pipeline(self.pipeline);
        backend.set_bind_group(0, self.view_bind_group);
        backend.set_bind_group(1, bind_group);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
    }
}

/// PBR shader, appended to the geometry prelude
pub const PBR_SHADER: &str = r#"
override AMBIENT_INTENSITY: f32 = 1.0;
override CASCADE_DEBUG: bool = false;
override SHADOW_FADE_DISTANCE: f32 = 90.0;
override FOG_START: f32 = 60.0;
override FOG_END: f32 = 100.0;
override FOG_MIP_LEVEL: f32 = 3.0;

const PI: f32 = 3.14159265359;
const NOISE_SIZE: f32 = 16.0;
const BLOCKER_SEARCH_TEXELS: f32 = 6.0;
const MIN_FILTER_TEXELS: f32 = 1.0;
const MAX_FILTER_TEXELS: f32 = 5.0;

struct Cascades {
    view_projection: array<mat4x4<f32>, 4>,
    // bias, normal bias, PCF samples, blocker samples
    params: array<vec4<f32>, 4>,
    // near, far, texel size
    ranges: array<vec4<f32>, 4>,
    // count, map size
    info: vec4<u32>,
}

struct PointLightData {
    position: vec4<f32>,
    color_intensity: vec4<f32>,
}

struct Lighting {
    sun_direction: vec4<f32>,
    sun_color: vec4<f32>,
    point_lights: array<PointLightData, 4>,
    counts: vec4<u32>,
}

struct Poisson {
    points: array<vec4<f32>, 16>,
}

@group(3) @binding(0) var<uniform> cascades: Cascades;
@group(3) @binding(1) var<uniform> lighting: Lighting;
@group(3) @binding(2) var shadow_map: texture_depth_2d_array;
@group(3) @binding(3) var shadow_sampler: sampler_comparison;
@group(3) @binding(4) var<uniform> poisson: Poisson;
@group(3) @binding(5) var rotation_noise: texture_3d<f32>;
@group(3) @binding(6) var ssao_texture: texture_2d<f32>;
@group(3) @binding(7) var linear_sampler: sampler;
@group(3) @binding(8) var nearest_sampler: sampler;
@group(3) @binding(9) var irradiance_map: texture_cube<f32>;
@group(3) @binding(10) var prefilter_map: texture_cube<f32>;
@group(3) @binding(11) var brdf_lut: texture_2d<f32>;

struct ShadingVaryings {
    @builtin(position) @invariant position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) color: vec3<f32>,
    @location(3) @interpolate(flat) material: vec4<f32>,
    @location(4) view_depth: f32,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> ShadingVaryings {
    let instance = instances[visible[instance_index]];
    let local = fetch_vertex(vertex_index, instance.offset_scale);
    let world = instance.world * vec4<f32>(local.position, 1.0);

    var out: ShadingVaryings;
    out.position = clip_position(instance, local);
    out.world_position = world.xyz;
    out.world_normal = (instance.normal * vec4<f32>(local.normal, 0.0)).xyz;
    out.color = local.color;
    out.material = instance.material;
    out.view_depth = -(view.view * world).z;
    return out;
}

fn poisson_point(i: u32) -> vec2<f32> {
    let pair = poisson.points[i / 2u];
    if (i & 1u) == 0u {
        return pair.xy;
    }
    return pair.zw;
}

fn cascade_index(view_depth: f32) -> u32 {
    let count = cascades.info.x;
    for (var i = 0u; i < count; i = i + 1u) {
        if view_depth < cascades.ranges[i].y {
            return i;
        }
    }
    return count;
}

fn rotate(p: vec2<f32>, rotation: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(rotation.x * p.x - rotation.y * p.y, rotation.y * p.x + rotation.x * p.y);
}

fn sample_shadow(cascade: u32, world_position: vec3<f32>, normal: vec3<f32>, frag_xy: vec2<f32>) -> f32 {
    let params = cascades.params[cascade];
    let texel_world = cascades.ranges[cascade].z;
    let map_size = f32(cascades.info.y);
    let texel = 1.0 / map_size;

    let offset_position = world_position + normal * params.y * texel_world;
    let light_clip = cascades.view_projection[cascade] * vec4<f32>(offset_position, 1.0);
    let ndc = light_clip.xyz / light_clip.w;
    let uv = ndc.xy * vec2<f32>(0.5, -0.5) + 0.5;
    let receiver = ndc.z - params.x;
    if any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || ndc.z > 1.0 {
        return 1.0;
    }

    let noise = textureSampleLevel(
        rotation_noise,
        nearest_sampler,
        vec3<f32>(frag_xy, f32(cascade)) / NOISE_SIZE,
        0.0,
    ).rg * 2.0 - 1.0;
    let rotation = normalize(noise + vec2<f32>(1e-4, 0.0));

    // Blocker search sizes the filter
    let blocker_samples = min(u32(params.w), 32u);
    var blocker_sum = 0.0;
    var blockers = 0u;
    for (var i = 0u; i < blocker_samples; i = i + 1u) {
        let offset = rotate(poisson_point(i), rotation) * BLOCKER_SEARCH_TEXELS * texel;
        let coords = clamp(
            vec2<i32>((uv + offset) * map_size),
            vec2<i32>(0),
            vec2<i32>(i32(map_size) - 1),
        );
        let depth = textureLoad(shadow_map, coords, i32(cascade), 0);
        if depth < receiver {
            blocker_sum = blocker_sum + depth;
            blockers = blockers + 1u;
        }
    }
    if blocker_samples > 0u && blockers == 0u {
        return 1.0;
    }

    var radius = MIN_FILTER_TEXELS;
    if blockers > 0u {
        let average = blocker_sum / f32(blockers);
        let penumbra = clamp((receiver - average) / max(average, 1e-4), 0.0, 1.0);
        radius = mix(MIN_FILTER_TEXELS, MAX_FILTER_TEXELS, penumbra);
    }

    let samples = clamp(u32(params.z), 1u, 32u);
    var lit = 0.0;
    for (var i = 0u; i < samples; i = i + 1u) {
        let offset = rotate(poisson_point(i), rotation) * radius * texel;
        lit = lit + textureSampleCompareLevel(shadow_map, shadow_sampler, uv + offset, i32(cascade), receiver);
    }
    return lit / f32(samples);
}

fn shadow_factor(view_depth: f32, world_position: vec3<f32>, normal: vec3<f32>, frag_xy: vec2<f32>) -> f32 {
    let count = cascades.info.x;
    let cascade = cascade_index(view_depth);
    if count == 0u || cascade >= count {
        return 1.0;
    }
    let shadow = sample_shadow(cascade, world_position, normal, frag_xy);

    let last_far = cascades.ranges[count - 1u].y;
    let fade = clamp(
        (view_depth - SHADOW_FADE_DISTANCE) / max(last_far - SHADOW_FADE_DISTANCE, 1e-3),
        0.0,
        1.0,
    );
    return mix(shadow, 1.0, fade);
}

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * d * d, 1e-6);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    let gv = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let gl = n_dot_l / (n_dot_l * (1.0 - k) + k);
    return gv * gl;
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (1.0 - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn fresnel_schlick_roughness(cos_theta: f32, f0: vec3<f32>, roughness: f32) -> vec3<f32> {
    return f0 + (max(vec3<f32>(1.0 - roughness), f0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn direct_light(
    n: vec3<f32>,
    v: vec3<f32>,
    l: vec3<f32>,
    radiance: vec3<f32>,
    albedo: vec3<f32>,
    metallic: f32,
    roughness: f32,
    f0: vec3<f32>,
) -> vec3<f32> {
    let h = normalize(v + l);
    let n_dot_l = max(dot(n, l), 0.0);
    let n_dot_v = max(dot(n, v), 1e-4);
    let f = fresnel_schlick(max(dot(h, v), 0.0), f0);
    let specular = distribution_ggx(max(dot(n, h), 0.0), roughness)
        * geometry_smith(n_dot_v, n_dot_l, roughness) * f
        / max(4.0 * n_dot_v * n_dot_l, 1e-4);
    let k_d = (vec3<f32>(1.0) - f) * (1.0 - metallic);
    return (k_d * albedo / PI + specular) * radiance * n_dot_l;
}

const CASCADE_TINTS = array<vec3<f32>, 4>(
    vec3<f32>(1.0, 0.3, 0.3),
    vec3<f32>(0.3, 1.0, 0.3),
    vec3<f32>(0.3, 0.3, 1.0),
    vec3<f32>(1.0, 1.0, 0.3),
);

@fragment
fn fs_main(in: ShadingVaryings) -> @location(0) vec4<f32> {
    let albedo = in.color;
    let metallic = clamp(in.material.x, 0.0, 1.0);
    let roughness = clamp(in.material.y, 0.04, 1.0);
    let material_ao = in.material.z;

    let n = normalize(in.world_normal);
    let to_camera = view.position.xyz - in.world_position;
    let camera_distance = length(to_camera);
    let v = to_camera / max(camera_distance, 1e-4);
    let f0 = mix(vec3<f32>(0.04), albedo, metallic);

    // Sun
    let sun_dir = normalize(lighting.sun_direction.xyz);
    let sun_radiance = lighting.sun_color.rgb * lighting.sun_color.a;
    let shadow = shadow_factor(in.view_depth, in.world_position, n, in.position.xy);
    var color = direct_light(n, v, sun_dir, sun_radiance, albedo, metallic, roughness, f0) * shadow;

    // Point lights with a windowed inverse-square falloff
    let point_count = min(lighting.counts.x, 4u);
    for (var i = 0u; i < point_count; i = i + 1u) {
        let light = lighting.point_lights[i];
        let to_light = light.position.xyz - in.world_position;
        let d = length(to_light);
        let window = clamp(1.0 - pow(d / max(light.position.w, 1e-4), 4.0), 0.0, 1.0);
        let attenuation = window * window / (d * d + 1.0);
        let radiance = light.color_intensity.rgb * light.color_intensity.a * attenuation;
        color = color + direct_light(n, v, to_light / max(d, 1e-4), radiance, albedo, metallic, roughness, f0);
    }

    // Image based ambient
    let n_dot_v = max(dot(n, v), 1e-4);
    let f = fresnel_schlick_roughness(n_dot_v, f0, roughness);
    let k_d = (vec3<f32>(1.0) - f) * (1.0 - metallic);
    let irradiance = textureSampleLevel(irradiance_map, linear_sampler, n, 0.0).rgb;
    let r = reflect(-v, n);
    let max_mip = f32(textureNumLevels(prefilter_map) - 1u);
    let prefiltered = textureSampleLevel(prefilter_map, linear_sampler, r, roughness * max_mip).rgb;
    let brdf = textureSampleLevel(brdf_lut, linear_sampler, vec2<f32>(n_dot_v, roughness), 0.0).rg;
    let specular = prefiltered * (f * brdf.x + brdf.y);

    let screen_uv = in.position.xy / view.params.zw;
    let occlusion = textureSampleLevel(ssao_texture, linear_sampler, screen_uv, 0.0).r;
    color = color + (k_d * irradiance * albedo + specular) * material_ao * occlusion * AMBIENT_INTENSITY;

    // Distance fog takes the blurred environment colour
    let fog = clamp((camera_distance - FOG_START) / max(FOG_END - FOG_START, 1e-3), 0.0, 1.0);
    let fog_color = textureSampleLevel(prefilter_map, linear_sampler, -v, FOG_MIP_LEVEL).rgb;
    color = mix(color, fog_color, fog);

    if CASCADE_DEBUG {
        let cascade = cascade_index(in.view_depth);
        var tints = CASCADE_TINTS;
        if cascade < cascades.info.x {
            color = color * tints[cascade];
        }
    }

    return vec4<f32>(color, 1.0);
}
"#;

/// Skybox shader: one triangle at the far plane
pub const SKYBOX_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> view: View;
@group(1) @binding(0) var sky_texture: texture_cube<f32>;
@group(1) @binding(1) var sky_sampler: sampler;

struct SkyVaryings {
    @builtin(position) position: vec4<f32>,
    @location(0) ndc: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> SkyVaryings {
    let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));
    let ndc = uv * 2.0 - 1.0;

    var out: SkyVaryings;
    out.position = vec4<f32>(ndc, 1.0, 1.0);
    out.ndc = ndc;
    return out;
}

@fragment
fn fs_main(in: SkyVaryings) -> @location(0) vec4<f32> {
    let world = view.sky_inverse * vec4<f32>(in.ndc, 1.0, 1.0);
    let direction = normalize(world.xyz / world.w);
    return vec4<f32>(textureSampleLevel(sky_texture, sky_sampler, direction, 0.0).rgb, 1.0);
}
"#;
