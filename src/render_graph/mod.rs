//! Render Graph System
//!
//! Passes declare named resource reads and writes; compilation derives the
//! execution order, resource lifetimes and the usage transitions between passes.

pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;

pub use executor::*;
pub use graph::*;
pub use pass::*;
pub use resource::*;
