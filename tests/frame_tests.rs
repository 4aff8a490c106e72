//! Headless frame tests.
//!
//! Every test drives a full `Renderer` over the recording backend, which keeps
//! buffer contents in memory, so indirect counts, instance records and the
//! recorded pass sequence can be checked without a GPU.

mod common;

use common::{test_config, TestScene, HEIGHT, WIDTH};
use glam::Vec3;
use half::f16;
use rstest::rstest;
use scene_renderer::backend::{DrawIndexedIndirectArgs, RecordedCommand, RecordingBackend};
use scene_renderer::config::{CullingPath, StaticCullPolicy};
use scene_renderer::instances::{InstanceRecord, CAPACITY_GRANULE};
use scene_renderer::pipeline::postprocess::bloom::bloom_chain_sizes;
use scene_renderer::resources::HdrImage;
use scene_renderer::{FrameInput, Key, Renderer, RendererConfig, RendererError, Usage};

fn expected_pass_order(cascades: usize) -> Vec<String> {
    let mut order = vec!["cull".to_string()];
    order.extend((0..cascades).map(|i| format!("shadow_cascade_{}", i)));
    order.extend(
        [
            "depth_prepass",
            "ssao",
            "ssao_blur_h",
            "ssao_blur_v",
            "ssao_upscale",
            "pbr",
            "skybox",
            "bloom_downsample",
            "bloom_upsample",
            "tonemap",
        ]
        .map(String::from),
    );
    order
}

// ============================================================================
// Culling
// ============================================================================

#[rstest]
#[case::msaa(4)]
#[case::single_sample(1)]
fn test_static_drawn_dynamic_culled(#[case] msaa: u32) {
    let mut scene = TestScene::new(test_config(msaa));
    let fixed = scene.add(Usage::Static, Vec3::new(0.0, 0.0, -5.0));
    let moving = scene.add(Usage::Dynamic, Vec3::new(0.0, 0.0, -5.0));

    // Move the dynamic cube behind the camera
    scene.renderer.object_mut(moving).unwrap().transform.position = Vec3::new(0.0, 0.0, 50.0);
    scene.frame();

    let fixed_args = scene.draw_args(fixed);
    let moving_args = scene.draw_args(moving);
    assert_eq!(fixed_args[0].instance_count, 1);
    assert_eq!(fixed_args[0].index_count, 36);
    assert_eq!(moving_args[0].instance_count, 0);
    assert_eq!(moving_args[0].index_count, 36);
}

#[test]
fn test_dynamic_visible_in_front_of_camera() {
    let mut scene = TestScene::new(test_config(1));
    let moving = scene.add(Usage::Dynamic, Vec3::new(0.0, 0.0, -5.0));
    scene.frame();
    assert_eq!(scene.draw_args(moving)[0].instance_count, 1);

    scene.renderer.object_mut(moving).unwrap().transform.position = Vec3::new(0.0, 0.0, 50.0);
    scene.frame();
    assert_eq!(scene.draw_args(moving)[0].instance_count, 0);
}

#[test]
fn test_static_counts_follow_removal() {
    let mut scene = TestScene::new(test_config(1));
    let first = scene.add(Usage::Static, Vec3::new(-1.0, 0.0, -5.0));
    scene.add(Usage::Static, Vec3::new(1.0, 0.0, -5.0));
    scene.frame();
    assert_eq!(scene.draw_args(first)[0].instance_count, 2);

    assert!(scene.renderer.remove_object(first));
    assert!(!scene.renderer.remove_object(first));
    scene.frame();
    assert_eq!(scene.draw_args(first)[0].instance_count, 1);
    assert_eq!(scene.renderer.registry().object_count(), 1);
}

#[test]
fn test_objects_wait_for_their_model() {
    let mut scene = TestScene::new(test_config(1));
    let handle = scene.add(Usage::Dynamic, Vec3::new(0.0, 0.0, -5.0));

    // The cube is uploaded during the first frame and drawn in the same frame
    let collection = scene.renderer.registry().collection(handle.collection).unwrap();
    assert!(!collection.is_ready());
    scene.frame();
    let collection = scene.renderer.registry().collection(handle.collection).unwrap();
    assert!(collection.is_ready());

    let draws = scene
        .renderer
        .backend()
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::DrawIndexedIndirect { .. }))
        .count();
    // Cascades, the prepass and the shading pass all draw the ready collection
    assert!(draws >= 2);
}

#[rstest]
#[case::static_always_visible(StaticCullPolicy::AlwaysVisible, false)]
#[case::static_cull_on_change(StaticCullPolicy::CullOnChange, true)]
fn test_gpu_culling_records_dispatches(
    #[case] policy: StaticCullPolicy,
    #[case] static_culled: bool,
) {
    let mut config = test_config(1);
    config.instances.culling_path = CullingPath::Gpu;
    config.instances.static_policy = policy;
    let mut scene = TestScene::new(config);

    let fixed = scene.add(Usage::Static, Vec3::new(0.0, 0.0, -5.0));
    let moving = scene.add(Usage::Dynamic, Vec3::new(0.0, 0.0, -5.0));
    for i in 1..70 {
        scene.add(Usage::Dynamic, Vec3::new(i as f32, 0.0, -10.0));
    }
    scene.renderer.backend_mut().clear_commands();
    scene.frame();

    let registry = scene.renderer.registry();
    let contexts = registry.context_count() as u64;
    let fixed_buffer = registry.collection(fixed.collection).unwrap().indirect_buffer();
    let moving_buffer = registry.collection(moving.collection).unwrap().indirect_buffer();
    let commands = scene.renderer.backend().commands();

    // Only the instance-count word of each context record is cleared
    let cleared = |buffer| {
        commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::ClearBuffer { buffer: b, offset, size } if *b == buffer => {
                    assert_eq!(*size, Some(4));
                    Some(*offset)
                }
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    let expected: Vec<u64> = (0..contexts)
        .map(|c| c * DrawIndexedIndirectArgs::SIZE + DrawIndexedIndirectArgs::INSTANCE_COUNT_WORD * 4)
        .collect();
    assert_eq!(cleared(moving_buffer), expected);
    if static_culled {
        assert_eq!(cleared(fixed_buffer), expected);
    } else {
        assert!(cleared(fixed_buffer).is_empty());
    }

    let start = commands
        .iter()
        .position(|c| {
            matches!(c, RecordedCommand::BeginComputePass { label: Some(l), .. } if l == "cull")
        })
        .unwrap();
    let end = start
        + commands[start..]
            .iter()
            .position(|c| matches!(c, RecordedCommand::EndComputePass))
            .unwrap();
    let mut dispatches: Vec<u32> = commands[start..end]
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::Dispatch { x, y: 1, z: 1 } => Some(*x),
            _ => None,
        })
        .collect();
    dispatches.sort_unstable();
    // 70 dynamic slots need two workgroups of 64, the single static slot one
    let expected_dispatches = if static_culled { vec![1, 2] } else { vec![2] };
    assert_eq!(dispatches, expected_dispatches);

    if !static_culled {
        // Static counts are written on upload and never touched by culling
        let fixed_args = scene.draw_args(fixed);
        assert!(fixed_args
            .iter()
            .take(contexts as usize)
            .all(|a| a.instance_count == 1));
    }
}

// ============================================================================
// Instance buffer growth
// ============================================================================

#[rstest]
#[case::exact_fit(CAPACITY_GRANULE, 1, 64)]
#[case::one_over(CAPACITY_GRANULE + 1, 2, 128)]
#[case::two_doublings(2 * CAPACITY_GRANULE + 1, 3, 256)]
fn test_growth_preserves_records(
    #[case] count: u32,
    #[case] allocations: u32,
    #[case] capacity: u32,
) {
    let mut scene = TestScene::new(test_config(1));
    scene.frame();

    let first = scene.add(Usage::Dynamic, Vec3::new(3.0, 2.0, -7.0));
    let before = *scene
        .renderer
        .registry()
        .collection(first.collection)
        .unwrap()
        .record(first.slot)
        .unwrap();
    for i in 1..count {
        scene.add(Usage::Dynamic, Vec3::new(i as f32, 0.0, -10.0));
    }

    let collection = scene.renderer.registry().collection(first.collection).unwrap();
    assert_eq!(collection.allocations(), allocations);
    assert_eq!(collection.capacity(), capacity);
    assert_eq!(collection.live_count(), count);

    let uploaded: Vec<InstanceRecord> = scene
        .renderer
        .backend()
        .read_buffer(collection.instance_buffer());
    assert_eq!(uploaded.len(), capacity as usize);
    assert_eq!(uploaded[first.slot as usize], before);
    assert_eq!(
        scene.renderer.object(first).unwrap().transform.position,
        Vec3::new(3.0, 2.0, -7.0)
    );
}

// ============================================================================
// Frame structure
// ============================================================================

#[rstest]
#[case::msaa(4)]
#[case::single_sample(1)]
fn test_pass_order(#[case] msaa: u32) {
    let scene = TestScene::new(test_config(msaa));
    let cascades = scene.renderer.config().cascades.len();
    assert_eq!(scene.renderer.pass_order(), expected_pass_order(cascades));
    assert_eq!(scene.renderer.targets().unwrap().scene_msaa.is_some(), msaa > 1);
}

#[test]
fn test_recorded_gpu_passes() {
    let mut scene = TestScene::new(test_config(4));
    scene.add(Usage::Static, Vec3::new(0.0, 0.0, -5.0));
    scene.renderer.backend_mut().clear_commands();
    scene.frame();

    // Host culling records no GPU pass; the skybox waits for an environment
    let expected: Vec<String> = expected_pass_order(3)
        .into_iter()
        .filter(|p| p != "cull" && p != "skybox")
        .collect();
    assert_eq!(scene.renderer.backend().pass_labels(), expected);
    assert_eq!(scene.renderer.backend().frames_submitted(), 1);
}

#[test]
fn test_bloom_targets_follow_chain() {
    let scene = TestScene::new(test_config(1));
    let config = scene.renderer.config();
    let padding = config.bloom.padding;
    let chain = bloom_chain_sizes(WIDTH + 2 * padding, HEIGHT + 2 * padding, config.bloom.levels);

    let targets = scene.renderer.targets().unwrap();
    assert_eq!(chain.len(), config.bloom.levels as usize + 1);
    assert_eq!(targets.bloom_down.len(), chain.len());
    assert_eq!(targets.bloom_up.len(), chain.len() - 1);
    for pair in chain.windows(2) {
        assert_eq!(pair[1].0, pair[0].0.div_ceil(2));
        assert_eq!(pair[1].1, pair[0].1.div_ceil(2));
    }
}

#[test]
fn test_resize_rebuilds_textures() {
    let mut scene = TestScene::new(test_config(4));
    scene.frame();
    let textures = scene.renderer.backend().live_texture_count();

    scene.renderer.on_resize(32, 16).unwrap();
    assert_eq!((scene.renderer.context().width, scene.renderer.context().height), (32, 16));
    assert_eq!(scene.renderer.backend().live_texture_count(), textures);
    scene.frame();
}

// ============================================================================
// Timing
// ============================================================================

#[test]
fn test_timestamps_bracket_frame() {
    let backend = RecordingBackend::new(WIDTH, HEIGHT).with_timestamps(2_000_000);
    let mut scene = TestScene::with_backend(backend, test_config(1));
    scene.frame();

    let stamped: Vec<String> = scene
        .renderer
        .backend()
        .commands()
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginRenderPass {
                label,
                timestamps: true,
                ..
            }
            | RecordedCommand::BeginComputePass {
                label,
                timestamps: true,
            } => label.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(stamped, vec!["shadow_cascade_0".to_string(), "tonemap".to_string()]);
    assert_eq!(scene.renderer.gpu_frame_time(), None);

    // The readback completes on the second poll; the pending frame is not stamped
    scene.frame();
    scene.frame();
    assert_eq!(scene.renderer.gpu_frame_time(), Some(2.0));

    let resolves = scene
        .renderer
        .backend()
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::ResolveQuerySet { .. }))
        .count();
    assert_eq!(resolves, 2);
}

#[test]
fn test_timing_disabled_without_support() {
    let mut scene = TestScene::new(test_config(1));
    scene.frame();
    scene.frame();
    assert_eq!(scene.renderer.gpu_frame_time(), None);
}

// ============================================================================
// Environment and shading constants
// ============================================================================

#[test]
fn test_environment_enables_skybox() {
    let mut scene = TestScene::new(test_config(1));
    scene.frame();
    assert!(!scene.renderer.has_environment());

    scene.renderer.load_environment_image(HdrImage {
        width: 8,
        height: 4,
        data: vec![f16::ONE; 8 * 4 * 4],
    });
    scene.renderer.backend_mut().clear_commands();
    scene.frame();

    assert!(scene.renderer.has_environment());
    let labels = scene.renderer.backend().pass_labels();
    for generated in ["ibl_equirect", "ibl_irradiance", "ibl_prefilter", "ibl_brdf"] {
        assert!(labels.iter().any(|l| l == generated), "missing {}", generated);
    }
    assert!(labels.iter().any(|l| l == "skybox"));
}

#[test]
fn test_cascade_debug_toggle_rebuilds_shading() {
    let mut scene = TestScene::new(test_config(1));
    let mut input = FrameInput::new();
    input.set_held(Key::ToggleCascadeDebug, true);
    scene.renderer.draw(&input, 16.0).unwrap();
    assert!(scene.renderer.config().shading.cascade_debug);

    // Still held: no second toggle
    input.end_frame();
    input.set_held(Key::ToggleCascadeDebug, true);
    scene.renderer.draw(&input, 16.0).unwrap();
    assert!(scene.renderer.config().shading.cascade_debug);

    let pipelines = scene.renderer.backend().render_pipelines_labeled("pbr");
    assert_eq!(pipelines.len(), 2);
    let debug = pipelines[1]
        .constants
        .iter()
        .find(|(name, _)| name == "CASCADE_DEBUG")
        .map(|(_, value)| *value);
    assert_eq!(debug, Some(1.0));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_invalid_config_rejected() {
    let config = RendererConfig {
        msaa_samples: 2,
        ..Default::default()
    };
    let result = Renderer::new(RecordingBackend::new(WIDTH, HEIGHT), config);
    assert!(matches!(result, Err(RendererError::InvalidConfig(_))));
}

#[test]
fn test_failed_model_load_is_isolated() {
    let mut scene = TestScene::new(test_config(1));
    let visible = scene.add(Usage::Static, Vec3::new(0.0, 0.0, -5.0));
    let missing = scene.renderer.load_model("does/not/exist.mesh");

    for _ in 0..200 {
        scene.frame();
        if scene.renderer.models().error(missing).is_some() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    assert!(scene.renderer.models().error(missing).is_some());
    assert!(scene.renderer.models().get(missing).is_none());
    assert_eq!(scene.draw_args(visible)[0].instance_count, 1);
}

#[test]
fn test_oversized_environment_is_rejected() {
    let path = std::env::temp_dir().join(format!("oversized-{}.hdr", std::process::id()));
    std::fs::write(
        &path,
        b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 4000000000 +X 4000000000\n\x01\x02\x03\x04",
    )
    .unwrap();

    let mut scene = TestScene::new(test_config(1));
    let visible = scene.add(Usage::Static, Vec3::new(0.0, 0.0, -5.0));
    scene.renderer.load_environment(&path);
    for _ in 0..200 {
        scene.frame();
        if !scene.renderer.environment_pending() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    std::fs::remove_file(&path).unwrap();

    assert!(!scene.renderer.environment_pending());
    assert!(!scene.renderer.has_environment());
    assert_eq!(scene.draw_args(visible)[0].instance_count, 1);
}
