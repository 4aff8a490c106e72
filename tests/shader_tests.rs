//! Every WGSL source the renderer builds must parse and validate

use naga::valid::{Capabilities, ValidationFlags, Validator};
use rstest::rstest;
use scene_renderer::pipeline::postprocess::{bloom, ssao, tonemapping};
use scene_renderer::pipeline::{culling, depth_prepass, geometry_shader, ibl, pbr, shadow};

fn validate(name: &str, source: &str) {
    let module = match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(err) => panic!("{} failed to parse:\n{}", name, err.emit_to_string(source)),
    };
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    if let Err(err) = validator.validate(&module) {
        panic!("{} failed to validate:\n{}", name, err.emit_to_string(source));
    }
}

#[rstest]
#[case::cull("cull", culling::cull_shader())]
#[case::shadow("shadow", geometry_shader(shadow::SHADOW_SHADER))]
#[case::depth_prepass("depth_prepass", geometry_shader(depth_prepass::DEPTH_PREPASS_SHADER))]
#[case::pbr("pbr", geometry_shader(pbr::PBR_SHADER))]
#[case::skybox("skybox", pbr::skybox_shader())]
#[case::ssao("ssao", ssao::ssao_shader(false))]
#[case::ssao_msaa("ssao msaa", ssao::ssao_shader(true))]
#[case::ssao_blur("ssao blur", ssao::BLUR_SHADER.to_string())]
#[case::ssao_upscale("ssao upscale", ssao::UPSCALE_SHADER.to_string())]
#[case::bloom_downsample("bloom downsample", bloom::downsample_shader())]
#[case::bloom_upsample("bloom upsample", bloom::upsample_shader())]
#[case::tonemap("tonemap", tonemapping::tonemap_shader())]
#[case::ibl_equirect("ibl equirect", ibl::equirect_shader())]
#[case::ibl_irradiance("ibl irradiance", ibl::irradiance_shader())]
#[case::ibl_prefilter("ibl prefilter", ibl::prefilter_shader())]
#[case::ibl_brdf("ibl brdf", ibl::brdf_shader())]
fn test_shader_validates(#[case] name: &str, #[case] source: String) {
    validate(name, &source);
}

#[test]
fn test_pbr_overrides_are_declared() {
    let source = geometry_shader(pbr::PBR_SHADER);
    let module = naga::front::wgsl::parse_str(&source).expect("parse");
    let declared: Vec<String> = module
        .overrides
        .iter()
        .filter_map(|(_, o)| o.name.clone())
        .collect();

    let constants = scene_renderer::config::ShadingConstants::default().overrides();
    for (name, _) in &constants {
        assert!(declared.contains(name), "{} is not declared", name);
    }
}
