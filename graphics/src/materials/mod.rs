//! Materials.
//!
//! A [`Material`] names a shader and carries the parameters the pipeline
//! sets on it: shader keywords, float and color properties, and textures
//! bound by slot name.

mod material;

pub use material::{Material, MaterialDescriptor};
