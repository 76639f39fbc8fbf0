//! CPU-side mesh types.
//!
//! - [`VertexLayout`] - Describes vertex attributes and their byte offsets
//! - [`MeshDescriptor`] - Descriptor for creating GPU meshes
//! - [`VertexRepacker`] - Compacts a shared vertex pool down to the vertices
//!   one index buffer references
//!
//! These types are re-exported by `meshweave-graphics` for convenience.

mod data;
mod layout;
mod repack;

pub use data::{IndexFormat, MeshDescriptor};
pub use layout::{VertexAttribute, VertexAttributeFormat, VertexAttributeSemantic, VertexLayout};
pub use repack::{RepackError, VertexIndex, VertexRange, VertexRepacker};
