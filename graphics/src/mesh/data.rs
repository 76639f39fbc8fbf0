//! Mesh definition with vertex/index buffers.
//!
//! A [`Mesh`] owns one interleaved vertex buffer, an optional index buffer
//! and the skinning metadata a renderer needs: bind poses and named blend
//! shapes.

use std::sync::{Arc, Weak};

use glam::{Mat4, Vec3};
use parking_lot::RwLock;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::types::Aabb;

use super::{MeshDescriptor, VertexLayout};

/// A named per-vertex delta set blended onto the neutral pose.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlendShape {
    /// Blend shape name.
    pub name: String,
    /// Position deltas, one per vertex.
    pub positions: Vec<Vec3>,
    /// Normal deltas, empty or one per vertex.
    pub normals: Vec<Vec3>,
    /// Tangent deltas, empty or one per vertex.
    pub tangents: Vec<Vec3>,
}

#[derive(Default)]
struct MeshState {
    bounds: Aabb,
    bind_poses: Vec<Mat4>,
    blend_shapes: Vec<BlendShape>,
}

/// A GPU mesh with an interleaved vertex buffer and optional index buffer.
///
/// # Example
///
/// ```ignore
/// let mesh = device.create_mesh(&MeshDescriptor::new(layout)
///     .with_vertex_count(vertex_count)
///     .with_indices(IndexFormat::Uint16, index_count)
///     .with_label("Mesh42"))?;
/// mesh.upload_vertices(&interleaved)?;
/// mesh.upload_indices(bytemuck::cast_slice(&indices))?;
/// ```
pub struct Mesh {
    device: Weak<GraphicsDevice>,
    descriptor: MeshDescriptor,
    vertex_buffer: Arc<Buffer>,
    index_buffer: Option<Arc<Buffer>>,
    state: RwLock<MeshState>,
}

impl Mesh {
    pub(crate) fn new(
        device: Weak<GraphicsDevice>,
        descriptor: MeshDescriptor,
        vertex_buffer: Arc<Buffer>,
        index_buffer: Option<Arc<Buffer>>,
    ) -> Self {
        Self {
            device,
            descriptor,
            vertex_buffer,
            index_buffer,
            state: RwLock::new(MeshState::default()),
        }
    }

    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    pub fn descriptor(&self) -> &MeshDescriptor {
        &self.descriptor
    }

    pub fn layout(&self) -> &Arc<VertexLayout> {
        &self.descriptor.layout
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> u32 {
        self.descriptor.vertex_count
    }

    /// Number of indices.
    pub fn index_count(&self) -> u32 {
        self.descriptor.index_count
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// The interleaved vertex buffer.
    pub fn vertex_buffer(&self) -> &Arc<Buffer> {
        &self.vertex_buffer
    }

    /// The index buffer, if the mesh is indexed.
    pub fn index_buffer(&self) -> Option<&Arc<Buffer>> {
        self.index_buffer.as_ref()
    }

    /// Upload the whole interleaved vertex buffer.
    pub fn upload_vertices(&self, bytes: &[u8]) -> Result<(), GraphicsError> {
        if bytes.len() as u64 != self.vertex_buffer.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "vertex data is {} bytes, buffer is {}",
                bytes.len(),
                self.vertex_buffer.size()
            )));
        }
        self.vertex_buffer.write(0, bytes)
    }

    /// Upload the whole index buffer.
    pub fn upload_indices(&self, bytes: &[u8]) -> Result<(), GraphicsError> {
        let Some(index_buffer) = &self.index_buffer else {
            return Err(GraphicsError::InvalidParameter(
                "mesh has no index buffer".to_string(),
            ));
        };
        if bytes.len() as u64 != index_buffer.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "index data is {} bytes, buffer is {}",
                bytes.len(),
                index_buffer.size()
            )));
        }
        index_buffer.write(0, bytes)
    }

    /// Set the local bounds.
    pub fn set_bounds(&self, bounds: Aabb) {
        self.state.write().bounds = bounds;
    }

    /// Local bounds.
    pub fn bounds(&self) -> Aabb {
        self.state.read().bounds
    }

    /// Set the inverse bind matrices.
    pub fn set_bind_poses(&self, bind_poses: Vec<Mat4>) {
        self.state.write().bind_poses = bind_poses;
    }

    /// Inverse bind matrices.
    pub fn bind_poses(&self) -> Vec<Mat4> {
        self.state.read().bind_poses.clone()
    }

    /// Append a blend shape.
    pub fn add_blend_shape(&self, shape: BlendShape) -> Result<(), GraphicsError> {
        let count = self.vertex_count() as usize;
        let mismatched = |deltas: &[Vec3]| !deltas.is_empty() && deltas.len() != count;
        if shape.positions.len() != count
            || mismatched(&shape.normals)
            || mismatched(&shape.tangents)
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "blend shape '{}' does not match vertex count {count}",
                shape.name
            )));
        }
        self.state.write().blend_shapes.push(shape);
        Ok(())
    }

    /// Number of blend shapes.
    pub fn blend_shape_count(&self) -> usize {
        self.state.read().blend_shapes.len()
    }

    /// Blend shape names in insertion order.
    pub fn blend_shape_names(&self) -> Vec<String> {
        self.state
            .read()
            .blend_shapes
            .iter()
            .map(|shape| shape.name.clone())
            .collect()
    }

    /// Clone of a blend shape by index.
    pub fn blend_shape(&self, index: usize) -> Option<BlendShape> {
        self.state.read().blend_shapes.get(index).cloned()
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("vertex_count", &self.descriptor.vertex_count)
            .field("index_count", &self.descriptor.index_count)
            .field("stride", &self.descriptor.layout.stride())
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Mesh: Send, Sync);
