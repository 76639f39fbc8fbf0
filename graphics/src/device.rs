//! The device that owns every buffer, texture, mesh and material.
//!
//! Resources may only be created on the thread that created the device.
//! Background work fills plain memory and the owning thread uploads it.

use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::materials::{Material, MaterialDescriptor};
use crate::mesh::{Mesh, MeshDescriptor};
use crate::resources::{Buffer, Texture};
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Largest width, height or layer count.
    pub max_texture_dimension: u32,
    pub max_buffer_size: u64,
    /// Whether a write to part of a buffer keeps the bytes outside it.
    pub partial_writes_preserve_contents: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension: 16384,
            max_buffer_size: 1 << 30, // 1 GB
            partial_writes_preserve_contents: true,
        }
    }
}

impl DeviceCapabilities {
    pub fn with_max_texture_dimension(mut self, dimension: u32) -> Self {
        self.max_texture_dimension = dimension;
        self
    }

    pub fn with_partial_writes_preserved(mut self, preserved: bool) -> Self {
        self.partial_writes_preserve_contents = preserved;
        self
    }
}

/// Shared freely across threads; creation calls from any thread but the owner
/// fail with [`GraphicsError::WrongThread`].
pub struct GraphicsDevice {
    name: String,
    capabilities: DeviceCapabilities,
    owner: ThreadId,
    buffers: Tracked<Buffer>,
    textures: Tracked<Texture>,
    meshes: Tracked<Mesh>,
    materials: Tracked<Material>,
}

/// Weak list of resources a device created, for leak accounting.
struct Tracked<T>(Mutex<Vec<Weak<T>>>);

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Self(Mutex::new(Vec::new()))
    }
}

impl<T> Tracked<T> {
    fn track(&self, resource: &Arc<T>) {
        self.0.lock().push(Arc::downgrade(resource));
    }

    fn live(&self) -> usize {
        self.0.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    fn purge(&self) {
        self.0.lock().retain(|w| w.strong_count() > 0);
    }
}

impl GraphicsDevice {
    /// Creates a device owned by the calling thread.
    pub fn new(name: impl Into<String>, capabilities: DeviceCapabilities) -> Arc<Self> {
        let device = Arc::new(Self {
            name: name.into(),
            capabilities,
            owner: std::thread::current().id(),
            buffers: Tracked::default(),
            textures: Tracked::default(),
            meshes: Tracked::default(),
            materials: Tracked::default(),
        });
        log::debug!("{}: device up, {:?}", device.name, device.capabilities);
        device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    fn ensure_owner_thread(&self, what: &str) -> Result<(), GraphicsError> {
        match self.is_owner_thread() {
            true => Ok(()),
            false => Err(GraphicsError::WrongThread(what.to_string())),
        }
    }

    /// Allocates a zeroed buffer.
    ///
    /// Raw buffers must be a whole number of 32-bit words.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        self.ensure_owner_thread("buffer")?;

        let size = descriptor.size;
        let max = self.capabilities.max_buffer_size;
        if size == 0 || size > max {
            return Err(invalid(format!("buffer size {size} outside 1..={max}")));
        }
        if descriptor.is_raw() && size % 4 != 0 {
            return Err(invalid(format!("raw buffer size {size} is not word aligned")));
        }

        let buffer = Arc::new(Buffer::new(
            Arc::downgrade(self),
            descriptor.clone(),
            self.capabilities.partial_writes_preserve_contents,
        ));
        self.buffers.track(&buffer);
        log::trace!("{}: buffer {:?} ({size} bytes)", self.name, descriptor.label);
        Ok(buffer)
    }

    /// Allocates a zeroed 2D texture array.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, GraphicsError> {
        self.ensure_owner_thread("texture")?;

        let size = descriptor.size;
        let max = self.capabilities.max_texture_dimension;
        let dims = [size.width, size.height, size.depth];
        if dims.iter().any(|&d| d == 0 || d > max) {
            return Err(invalid(format!(
                "texture extent {}x{}x{} outside 1..={max}",
                size.width, size.height, size.depth
            )));
        }

        let texture = Arc::new(Texture::new(Arc::clone(self), descriptor.clone()));
        self.textures.track(&texture);
        log::trace!(
            "{}: texture {:?} ({}x{}x{} {:?})",
            self.name,
            descriptor.label,
            size.width,
            size.height,
            size.depth,
            descriptor.format
        );
        Ok(texture)
    }

    /// Allocates the vertex buffer and, for indexed meshes, the index buffer.
    pub fn create_mesh(
        self: &Arc<Self>,
        descriptor: &MeshDescriptor,
    ) -> Result<Arc<Mesh>, GraphicsError> {
        self.ensure_owner_thread("mesh")?;
        descriptor.layout.validate().map_err(invalid)?;

        let label = descriptor.label.as_deref().unwrap_or("mesh");
        let vertex_buffer = self.create_buffer(
            &BufferDescriptor::new(
                descriptor.vertex_buffer_size(),
                BufferUsage::VERTEX | BufferUsage::COPY_DST,
            )
            .with_label(format!("{label}.vertices")),
        )?;
        let index_buffer = match descriptor.is_indexed() {
            true => Some(
                self.create_buffer(
                    &BufferDescriptor::new(
                        descriptor.index_buffer_size(),
                        BufferUsage::INDEX | BufferUsage::COPY_DST,
                    )
                    .with_label(format!("{label}.indices")),
                )?,
            ),
            false => None,
        };

        let mesh = Arc::new(Mesh::new(
            Arc::downgrade(self),
            descriptor.clone(),
            vertex_buffer,
            index_buffer,
        ));
        self.meshes.track(&mesh);
        log::trace!(
            "{}: mesh {label} ({} vertices, {} indices)",
            self.name,
            descriptor.vertex_count,
            descriptor.index_count
        );
        Ok(mesh)
    }

    pub fn create_material(
        self: &Arc<Self>,
        descriptor: &MaterialDescriptor,
    ) -> Result<Arc<Material>, GraphicsError> {
        self.ensure_owner_thread("material")?;
        if descriptor.shader.is_empty() {
            return Err(invalid("material without a shader"));
        }

        let material = Arc::new(Material::new(Arc::downgrade(self), descriptor.clone()));
        self.materials.track(&material);
        log::trace!(
            "{}: material {:?} using {}",
            self.name,
            descriptor.label,
            descriptor.shader
        );
        Ok(material)
    }

    /// Buffers created here and still alive, mesh buffers included.
    pub fn buffer_count(&self) -> usize {
        self.buffers.live()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.live()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.live()
    }

    pub fn material_count(&self) -> usize {
        self.materials.live()
    }

    /// Drops bookkeeping for released resources.
    pub fn cleanup_dead_resources(&self) {
        self.buffers.purge();
        self.textures.purge();
        self.meshes.purge();
        self.materials.purge();
    }
}

fn invalid(message: impl Into<String>) -> GraphicsError {
    GraphicsError::InvalidParameter(message.into())
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("owner", &self.owner)
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{IndexFormat, VertexAttributeFormat, VertexAttributeSemantic, VertexLayout};
    use crate::types::{TextureFormat, TextureUsage};

    fn device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new("test", DeviceCapabilities::default())
    }

    #[test]
    fn buffers_are_validated_and_counted() {
        let device = device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))
            .unwrap();
        assert_eq!(buffer.size(), 1024);
        assert_eq!(device.buffer_count(), 1);

        let empty = device.create_buffer(&BufferDescriptor::new(0, BufferUsage::VERTEX));
        assert!(empty.is_err());
        let unaligned = device.create_buffer(&BufferDescriptor::new(10, BufferUsage::RAW));
        assert!(matches!(unaligned, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn texture_extent_respects_capabilities() {
        let device = GraphicsDevice::new(
            "small",
            DeviceCapabilities::default().with_max_texture_dimension(256),
        );
        let fits = TextureDescriptor::new_2d_array(
            256,
            16,
            4,
            TextureFormat::Rgba16Float,
            TextureUsage::TEXTURE_BINDING,
        );
        let texture = device.create_texture(&fits).unwrap();
        assert_eq!(texture.width(), 256);
        assert_eq!(device.texture_count(), 1);

        let wide =
            TextureDescriptor::new_2d(512, 16, TextureFormat::Rgba8Unorm, TextureUsage::empty());
        assert!(device.create_texture(&wide).is_err());
    }

    #[test]
    fn mesh_owns_vertex_and_index_buffers() {
        let device = device();
        let layout = VertexLayout::interleaved(&[
            (VertexAttributeSemantic::Position, VertexAttributeFormat::Float3),
            (VertexAttributeSemantic::Color, VertexAttributeFormat::Unorm8x4),
        ])
        .into_shared();
        let mesh = device
            .create_mesh(
                &MeshDescriptor::new(layout)
                    .with_vertex_count(10)
                    .with_indices(IndexFormat::Uint32, 6),
            )
            .unwrap();
        assert_eq!(mesh.vertex_buffer().size(), 160);
        assert_eq!(mesh.index_buffer().map(|b| b.size()), Some(24));
        assert_eq!((device.mesh_count(), device.buffer_count()), (1, 2));
    }

    #[test]
    fn material_needs_a_shader() {
        let device = device();
        let material = device
            .create_material(&MaterialDescriptor::new("Avatar/Lit").with_label("skin"))
            .unwrap();
        assert_eq!(material.label(), Some("skin"));
        assert_eq!(device.material_count(), 1);
        assert!(device.create_material(&MaterialDescriptor::new("")).is_err());
    }

    #[test]
    fn creation_is_limited_to_owner_thread() {
        let device = device();
        assert!(device.is_owner_thread());
        let remote = Arc::clone(&device);
        let result = std::thread::spawn(move || {
            remote
                .create_buffer(&BufferDescriptor::new(16, BufferUsage::RAW))
                .map(|_| ())
        })
        .join()
        .unwrap();
        assert_eq!(result, Err(GraphicsError::WrongThread("buffer".to_string())));
    }

    #[test]
    fn dropped_resources_stop_counting() {
        let device = device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::STORAGE))
            .unwrap();
        drop(buffer);
        assert_eq!(device.buffer_count(), 0);
        device.cleanup_dead_resources();
        assert_eq!(device.buffer_count(), 0);
    }
}
