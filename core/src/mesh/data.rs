//! Mesh creation parameters.

use std::sync::Arc;

use super::layout::VertexLayout;

/// Width of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    #[default]
    Uint16,
    Uint32,
}

impl IndexFormat {
    /// Bytes per index.
    pub fn size(&self) -> usize {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }

    /// Narrowest format that can address `vertex_count` vertices.
    pub fn for_vertex_count(vertex_count: u32) -> Self {
        if vertex_count <= u16::MAX as u32 + 1 {
            Self::Uint16
        } else {
            Self::Uint32
        }
    }
}

/// Parameters of a triangle-list mesh with one interleaved vertex buffer.
///
/// ```ignore
/// let desc = MeshDescriptor::new(format.layout().into_shared())
///     .with_vertex_count(vertex_count)
///     .with_indices(IndexFormat::Uint32, triangles.len() as u32)
///     .with_label("Mesh42");
/// ```
#[derive(Debug, Clone)]
pub struct MeshDescriptor {
    pub layout: Arc<VertexLayout>,
    pub vertex_count: u32,
    /// `None` for meshes drawn without an index buffer.
    pub index_format: Option<IndexFormat>,
    pub index_count: u32,
    pub label: Option<String>,
}

impl MeshDescriptor {
    pub fn new(layout: Arc<VertexLayout>) -> Self {
        Self {
            layout,
            vertex_count: 0,
            index_format: None,
            index_count: 0,
            label: None,
        }
    }

    pub fn with_vertex_count(mut self, count: u32) -> Self {
        self.vertex_count = count;
        self
    }

    pub fn with_indices(mut self, format: IndexFormat, count: u32) -> Self {
        self.index_format = Some(format);
        self.index_count = count;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns true when an index buffer is needed.
    pub fn is_indexed(&self) -> bool {
        self.index_format.is_some() && self.index_count > 0
    }

    /// Bytes in the interleaved vertex buffer.
    pub fn vertex_buffer_size(&self) -> u64 {
        self.vertex_count as u64 * self.layout.stride() as u64
    }

    /// Bytes in the index buffer, 0 when not indexed.
    pub fn index_buffer_size(&self) -> u64 {
        self.index_format
            .map_or(0, |format| self.index_count as u64 * format.size() as u64)
    }
}
