//! Resource management
//!
//! Decoding of the mesh stream and HDR environments, load states shared with
//! loader threads, and GPU upload of models.

pub mod hdr;
pub mod loading;
pub mod mesh_stream;
mod model;

pub use hdr::{decode_hdr, HdrImage};
pub use loading::{spawn_load, AssetSlot, LoadState};
pub use mesh_stream::{parse_mesh, read_mesh, MeshData, MeshStreamParser};
pub use model::*;
