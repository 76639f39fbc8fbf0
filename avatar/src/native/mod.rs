//! Native asset layer.
//!
//! The pipeline never owns source data. Everything it consumes comes from an
//! [`AssetSource`]: counts, per-vertex pools, morph target deltas, joints,
//! sub-meshes and material/image descriptors. Every call reports either a
//! value or a [`NativeError`], and callers decide per channel whether
//! [`NativeError::DataNotAvailable`] is an error.
//!
//! Sources are shared with background work units, so implementations must
//! be `Send + Sync`.

mod memory;

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3, Vec4};

pub use memory::{Gate, MemoryAssetSource, MemoryImage, MemoryMorphTarget, MemoryPrimitive};

/// Identifier of an object in the native asset layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssetId(pub u64);

impl AssetId {
    /// The null id.
    pub const INVALID: Self = Self(0);

    /// Returns true for any id except [`AssetId::INVALID`].
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classified result code of a failed native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum NativeError {
    /// The requested channel does not exist in the asset.
    #[error("DataNotAvailable")]
    DataNotAvailable,
    /// The requested object does not exist.
    #[error("NotFound")]
    NotFound,
    /// Hard failure with the native result code.
    #[error("Failure({code})")]
    Failure {
        /// Native result code.
        code: i32,
    },
}

/// Result of a native call.
pub type NativeResult<T> = Result<T, NativeError>;

/// Optional channels treat a missing channel as empty data.
pub(crate) fn optional<T: Default>(call: &str, result: NativeResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(NativeError::DataNotAvailable) => T::default(),
        Err(err) => {
            log::error!("{call} {err}");
            T::default()
        }
    }
}

/// Description of one mesh primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimitiveData {
    /// Primitive id.
    pub id: AssetId,
    /// Vertex pool the primitive's indices point into.
    pub vertex_buffer_id: AssetId,
    /// Morph target buffer, if the primitive has morph targets.
    pub morph_target_buffer_id: Option<AssetId>,
    /// Number of joints skinning this primitive.
    pub joint_count: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Number of material textures.
    pub texture_count: u32,
}

bitflags! {
    /// Sub-mesh categories a primitive may include.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SubMeshInclusionFlags: u32 {
        const BODY = 1 << 0;
        const HEAD = 1 << 1;
        const HAIR = 1 << 2;
        const EYEBROW = 1 << 3;
        const EYELASH = 1 << 4;
        const BEARD = 1 << 5;
        const OUTFIT = 1 << 6;
        const EYES = 1 << 7;
        const MOUTH = 1 << 8;
        const LOWER_TEETH = 1 << 9;
        const UPPER_TEETH = 1 << 10;
        const ALL = (1 << 11) - 1;
    }
}

impl SubMeshInclusionFlags {
    /// No sub-mesh category.
    pub const NONE: Self = Self::empty();
}

bitflags! {
    /// Level-of-detail bits. A primitive may belong to several.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LodFlags: u32 {
        const LOD_0 = 1 << 0;
        const LOD_1 = 1 << 1;
        const LOD_2 = 1 << 2;
        const LOD_3 = 1 << 3;
        const LOD_4 = 1 << 4;
    }
}

impl LodFlags {
    /// Index of the lowest set LOD bit, if any.
    pub fn lowest_index(&self) -> Option<u32> {
        if self.is_empty() {
            None
        } else {
            Some(self.bits().trailing_zeros())
        }
    }
}

bitflags! {
    /// Views a primitive is rendered in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ViewFlags: u32 {
        const FIRST_PERSON = 1 << 0;
        const THIRD_PERSON = 1 << 1;
    }
}

bitflags! {
    /// Manifestations a primitive belongs to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ManifestationFlags: u32 {
        const FULL = 1 << 0;
        const HALF = 1 << 1;
        const HEAD = 1 << 2;
        const HANDS = 1 << 3;
    }
}

bitflags! {
    /// Optional high-quality material features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HighQualityFlags: u32 {
        const NORMAL_MAPS = 1 << 0;
        const PROPERTY_HAIR_MAP = 1 << 1;
    }
}

/// Per-primitive flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimitiveFlags {
    pub lod: LodFlags,
    pub view: ViewFlags,
    pub manifestation: ManifestationFlags,
    pub sub_mesh_inclusion: SubMeshInclusionFlags,
    pub high_quality: HighQualityFlags,
}

/// A run of indices belonging to one sub-mesh category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubMesh {
    /// First index of the run.
    pub index_start: u32,
    /// Number of indices in the run.
    pub index_count: u32,
    /// Category of the run.
    pub inclusion: SubMeshInclusionFlags,
}

/// One joint influencing a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointInfo {
    /// Index into the skeleton.
    pub joint_index: i32,
    /// Inverse bind matrix.
    pub inverse_bind: Mat4,
}

/// Role of a material texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialTextureType {
    #[default]
    BaseColor,
    Normal,
    Emissive,
    Occlusion,
    MetallicRoughness,
    UsedInExtension,
}

/// A texture referenced by a primitive's material.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaterialTexture {
    /// How the material uses the texture.
    pub kind: MaterialTextureType,
    /// Image holding the texels.
    pub image_id: AssetId,
    /// Scalar factors: base color, or metallic in `x` and roughness in `y`.
    pub factor: Vec4,
}

/// Pixel format of a native image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    #[default]
    Invalid,
    Rgba32,
    R8,
}

/// Description of a native image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageInfo {
    pub id: AssetId,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub data_size: u32,
}

/// Lifecycle notification for a native resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetStatus {
    Loaded,
    Unloaded,
    LoadFailed,
    Updated,
}

/// Read access to native asset data.
pub trait AssetSource: Send + Sync {
    /// Number of mesh primitives in a resource.
    fn primitive_count(&self, resource: AssetId) -> NativeResult<u32>;
    /// Primitive description by index within a resource.
    fn primitive_by_index(&self, resource: AssetId, index: u32) -> NativeResult<PrimitiveData>;
    /// Display name of a primitive.
    fn primitive_name(&self, primitive: AssetId) -> NativeResult<String>;
    /// Flag set of a primitive.
    fn primitive_flags(&self, primitive: AssetId) -> NativeResult<PrimitiveFlags>;

    /// Size of a vertex pool.
    fn vertex_count(&self, vertex_buffer: AssetId) -> NativeResult<u32>;
    /// Number of morph targets in a morph target buffer.
    fn morph_target_count(&self, morph_buffer: AssetId) -> NativeResult<u32>;
    /// Triangle list indices into the primitive's vertex pool.
    fn index_data(&self, primitive: AssetId) -> NativeResult<Vec<u32>>;

    fn vertex_positions(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec3>>;
    fn vertex_normals(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec3>>;
    fn vertex_tangents(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec4>>;
    fn vertex_colors(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec4>>;
    fn vertex_colors_ormt(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec4>>;
    fn vertex_tex_coords(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec2>>;
    fn sub_mesh_types(&self, vertex_buffer: AssetId) -> NativeResult<Vec<f32>>;
    fn joint_indices(&self, vertex_buffer: AssetId) -> NativeResult<Vec<[u16; 4]>>;
    fn joint_weights(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec4>>;

    fn morph_positions(&self, morph_buffer: AssetId, index: u32) -> NativeResult<Vec<Vec3>>;
    fn morph_normals(&self, morph_buffer: AssetId, index: u32) -> NativeResult<Vec<Vec3>>;
    fn morph_tangents(&self, morph_buffer: AssetId, index: u32) -> NativeResult<Vec<Vec3>>;
    fn morph_target_name(&self, morph_buffer: AssetId, index: u32) -> NativeResult<String>;

    /// Joints skinning a primitive.
    fn joint_info(&self, primitive: AssetId) -> NativeResult<Vec<JointInfo>>;
    /// Position bounds, either for the bind pose or the skinned pose.
    fn min_max_position(&self, primitive: AssetId, skinned: bool) -> NativeResult<(Vec3, Vec3)>;
    /// Sub-mesh index runs.
    fn sub_meshes(&self, primitive: AssetId) -> NativeResult<Vec<SubMesh>>;

    fn material_texture(&self, primitive: AssetId, index: u32) -> NativeResult<MaterialTexture>;
    fn image_count(&self, primitive: AssetId) -> NativeResult<u32>;
    fn image_by_index(&self, primitive: AssetId, index: u32) -> NativeResult<ImageInfo>;
    /// Top mip pixels of an image, tightly packed.
    fn image_data(&self, primitive: AssetId, index: u32) -> NativeResult<Vec<u8>>;

    /// Lets the native layer free its copy of a resource.
    fn release_resource(&self, resource: AssetId);
    /// Reports that every primitive of a resource can render.
    fn resource_ready_to_render(&self, resource: AssetId);
}

static_assertions::assert_obj_safe!(AssetSource);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_lod_bit_wins() {
        assert_eq!((LodFlags::LOD_2 | LodFlags::LOD_4).lowest_index(), Some(2));
        assert_eq!(LodFlags::LOD_0.lowest_index(), Some(0));
        assert_eq!(LodFlags::empty().lowest_index(), None);
    }

    #[test]
    fn optional_channels_swallow_missing_data() {
        let missing: NativeResult<Vec<u32>> = Err(NativeError::DataNotAvailable);
        assert!(optional("vertex_normals", missing).is_empty());

        let failed: NativeResult<Vec<u32>> = Err(NativeError::Failure { code: -3 });
        assert!(optional("vertex_normals", failed).is_empty());

        assert_eq!(optional("vertex_normals", Ok(vec![1u32])), vec![1]);
    }

    #[test]
    fn native_errors_display_their_code() {
        assert_eq!(NativeError::Failure { code: -7 }.to_string(), "Failure(-7)");
        assert_eq!(NativeError::DataNotAvailable.to_string(), "DataNotAvailable");
    }
}
