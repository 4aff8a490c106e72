//! Post-processing: SSAO, bloom and the final composite

pub mod bloom;
pub mod ssao;
pub mod tonemapping;

pub use bloom::{BloomDownsamplePass, BloomUpsamplePass};
pub use ssao::{SsaoBlurPass, SsaoPass, SsaoUpscalePass};
pub use tonemapping::TonemappingPass;

/// Fullscreen triangle; `uv` has its origin at the top left
pub const FULLSCREEN_VERTEX_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;

    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);

    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);

    return output;
}
"#;
