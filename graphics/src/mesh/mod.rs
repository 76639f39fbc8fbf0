//! GPU meshes.
//!
//! The CPU-side description ([`MeshDescriptor`], [`VertexLayout`]) lives in
//! `meshweave-core`; this module adds the device-owned [`Mesh`] with its
//! vertex and index buffers, bounds, bind poses and blend shapes.

mod data;

pub use data::{BlendShape, Mesh};
pub use meshweave_core::mesh::{
    IndexFormat, MeshDescriptor, VertexAttribute, VertexAttributeFormat, VertexAttributeSemantic,
    VertexLayout,
};
