//! Scene state: camera, shadow cascades, movement and lights

mod camera;
mod camera_controller;
pub mod cascade;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use cascade::{fit_cascades, CascadeTransform, Frustum};
pub use light::*;
pub use transform::*;
