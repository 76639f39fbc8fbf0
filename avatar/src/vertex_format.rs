//! Interleaved vertex buffer assembly.
//!
//! The renderer binds attributes in a fixed order: position, normal,
//! tangent, color, uv0, ORMT color, bone weights, bone indices. A primitive
//! only carries the attributes it has data for, so the stride and every
//! attribute offset are derived from the set of present attributes.

use bitflags::bitflags;
use glam::{Vec3, Vec4};

use meshweave_core::mesh::{VertexAttributeFormat, VertexAttributeSemantic, VertexLayout};

use crate::error::{AvatarError, AvatarResult};
use crate::mesh_info::{BoneWeight, MeshInfo};
use crate::native::{SubMesh, SubMeshInclusionFlags};

bitflags! {
    /// Attributes present in a primitive's vertex buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VertexFormat: u32 {
        const POSITION = 1 << 0;
        const NORMAL = 1 << 1;
        const TANGENT = 1 << 2;
        const COLOR = 1 << 3;
        const TEXCOORD0 = 1 << 4;
        const COLOR_ORMT = 1 << 5;
        const BONE_WEIGHTS = 1 << 6;
        const BONE_INDICES = 1 << 7;
    }
}

const ATTRIBUTE_ORDER: [(VertexFormat, VertexAttributeSemantic, VertexAttributeFormat); 8] = [
    (
        VertexFormat::POSITION,
        VertexAttributeSemantic::Position,
        VertexAttributeFormat::Float3,
    ),
    (
        VertexFormat::NORMAL,
        VertexAttributeSemantic::Normal,
        VertexAttributeFormat::Float3,
    ),
    (
        VertexFormat::TANGENT,
        VertexAttributeSemantic::Tangent,
        VertexAttributeFormat::Float4,
    ),
    (
        VertexFormat::COLOR,
        VertexAttributeSemantic::Color,
        VertexAttributeFormat::Unorm8x4,
    ),
    (
        VertexFormat::TEXCOORD0,
        VertexAttributeSemantic::TexCoord0,
        VertexAttributeFormat::Float2,
    ),
    (
        VertexFormat::COLOR_ORMT,
        VertexAttributeSemantic::TexCoord1,
        VertexAttributeFormat::Float4,
    ),
    (
        VertexFormat::BONE_WEIGHTS,
        VertexAttributeSemantic::Weights,
        VertexAttributeFormat::Float4,
    ),
    (
        VertexFormat::BONE_INDICES,
        VertexAttributeSemantic::Joints,
        VertexAttributeFormat::Uint8x4,
    ),
];

/// Color of vertices without color data.
pub const DEFAULT_VERTEX_COLOR: [u8; 4] = [255, 255, 255, 0];

impl VertexFormat {
    /// Attributes a primitive's vertex buffer carries.
    ///
    /// Normals, tangents and joints are only stored for engine skinning;
    /// GPU skinning reads them from its own resources.
    pub fn for_mesh(info: &MeshInfo, engine_skinning: bool, joint_count: u32) -> Self {
        let mut format = Self::POSITION;
        format.set(Self::NORMAL, engine_skinning && !info.normals().is_empty());
        format.set(Self::TANGENT, engine_skinning && info.has_tangents());
        format.set(
            Self::COLOR,
            !info.colors.is_empty() || !info.sub_mesh_types.is_empty(),
        );
        format.set(Self::TEXCOORD0, !info.tex_coords.is_empty());
        format.set(Self::COLOR_ORMT, !info.colors_ormt.is_empty());
        let skinned = engine_skinning && joint_count > 0;
        format.set(Self::BONE_WEIGHTS | Self::BONE_INDICES, skinned);
        format
    }

    /// Bytes per vertex.
    pub fn stride(&self) -> u32 {
        self.attributes()
            .map(|(_, format)| format.size() as u32)
            .sum()
    }

    /// Present attributes in binding order.
    pub fn attributes(
        &self,
    ) -> impl Iterator<Item = (VertexAttributeSemantic, VertexAttributeFormat)> + '_ {
        ATTRIBUTE_ORDER
            .iter()
            .filter(|(flag, _, _)| self.contains(*flag))
            .map(|&(_, semantic, format)| (semantic, format))
    }

    /// Interleaved single-buffer layout.
    pub fn layout(&self) -> VertexLayout {
        let attributes: Vec<_> = self.attributes().collect();
        VertexLayout::interleaved(&attributes).with_label(format!("{self:?}"))
    }
}

/// Vertex color with the sub-mesh type packed into alpha.
pub fn vertex_color(colors: &[Vec4], sub_mesh_types: &[f32], index: usize) -> [u8; 4] {
    let mut color = DEFAULT_VERTEX_COLOR;
    if let Some(c) = colors.get(index) {
        let rgb = (c.truncate() * 255.0).clamp(Vec3::ZERO, Vec3::splat(255.0));
        color[0] = rgb.x as u8;
        color[1] = rgb.y as u8;
        color[2] = rgb.z as u8;
    }
    if let Some(&kind) = sub_mesh_types.get(index) {
        color[3] = kind.clamp(0.0, 255.0) as u8;
    }
    color
}

/// Write every vertex of `info` into one interleaved buffer.
pub fn write_interleaved(
    format: VertexFormat,
    info: &MeshInfo,
    vertex_count: u32,
) -> AvatarResult<Vec<u8>> {
    meshweave_core::profile_function!();

    let layout = format.layout();
    let stride = layout.stride() as usize;
    let len = stride * vertex_count as usize;
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| AvatarError::Allocation {
            what: "vertex buffer",
            bytes: len,
        })?;
    out.resize(len, 0);

    let offsets: Vec<(VertexAttributeSemantic, usize)> = layout
        .attributes
        .iter()
        .map(|attr| (attr.semantic, attr.offset as usize))
        .collect();
    let weights: &[BoneWeight] = info.bone_weights();

    for vertex in 0..vertex_count as usize {
        let base = vertex * stride;
        for &(semantic, offset) in &offsets {
            let at = base + offset;
            match semantic {
                VertexAttributeSemantic::Position => {
                    put(&mut out, at, &info.verts().get(vertex).copied().unwrap_or_default())
                }
                VertexAttributeSemantic::Normal => {
                    put(&mut out, at, &info.normals().get(vertex).copied().unwrap_or_default())
                }
                VertexAttributeSemantic::Tangent => {
                    put(&mut out, at, &info.tangents().get(vertex).copied().unwrap_or_default())
                }
                VertexAttributeSemantic::Color => {
                    let color = vertex_color(&info.colors, &info.sub_mesh_types, vertex);
                    put_bytes(&mut out, at, &color);
                }
                VertexAttributeSemantic::TexCoord0 => {
                    put(&mut out, at, &info.tex_coords.get(vertex).copied().unwrap_or_default())
                }
                VertexAttributeSemantic::TexCoord1 => {
                    put(&mut out, at, &info.colors_ormt.get(vertex).copied().unwrap_or_default())
                }
                VertexAttributeSemantic::Weights => {
                    let w = weights.get(vertex).map(|w| w.weights).unwrap_or_default();
                    put_bytes(&mut out, at, bytemuck::cast_slice(&w));
                }
                VertexAttributeSemantic::Joints => {
                    let j = weights.get(vertex).map(|w| w.indices).unwrap_or_default();
                    put_bytes(&mut out, at, &j.map(|index| index.min(255) as u8));
                }
            }
        }
    }
    Ok(out)
}

fn put<T: bytemuck::Pod>(out: &mut [u8], at: usize, value: &T) {
    put_bytes(out, at, bytemuck::bytes_of(value));
}

fn put_bytes(out: &mut [u8], at: usize, bytes: &[u8]) {
    debug_assert!(
        at + bytes.len() <= out.len(),
        "vertex write at {at} of {} bytes overruns buffer of {}",
        bytes.len(),
        out.len()
    );
    out[at..at + bytes.len()].copy_from_slice(bytes);
}

/// Turn triangles of excluded sub-meshes into degenerate zero triangles.
///
/// Returns the number of zeroed indices. The index count never changes.
pub fn strip_excluded_sub_meshes(
    triangles: &mut [u32],
    sub_meshes: &[SubMesh],
    included: SubMeshInclusionFlags,
) -> usize {
    if included.contains(SubMeshInclusionFlags::ALL) {
        return 0;
    }
    let mut zeroed = 0;
    for sub_mesh in sub_meshes {
        if sub_mesh.inclusion == SubMeshInclusionFlags::NONE
            || sub_mesh.inclusion.intersects(included)
        {
            continue;
        }
        let start = (sub_mesh.index_start as usize).min(triangles.len());
        let end = (start + sub_mesh.index_count as usize).min(triangles.len());
        triangles[start..end].fill(0);
        zeroed += end - start;
    }
    zeroed
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn info_with(vertex_count: usize) -> MeshInfo {
        let mut info = MeshInfo::new();
        info.set_verts(vec![Vec3::new(1.0, 2.0, 3.0); vertex_count]);
        info
    }

    #[test]
    fn position_only_for_gpu_skinning() {
        let mut info = info_with(3);
        info.set_normals(vec![Vec3::Y; 3]);
        info.set_tangents(vec![Vec4::X; 3]);

        let format = VertexFormat::for_mesh(&info, false, 4);
        assert_eq!(format, VertexFormat::POSITION);
        assert_eq!(format.stride(), 12);
    }

    #[test]
    fn engine_skinning_keeps_everything_in_order() {
        let mut info = info_with(2);
        info.set_normals(vec![Vec3::Y; 2]);
        info.set_tangents(vec![Vec4::X; 2]);
        info.colors = vec![Vec4::ONE; 2];
        info.tex_coords = vec![Vec2::ZERO; 2];
        info.colors_ormt = vec![Vec4::ZERO; 2];

        let format = VertexFormat::for_mesh(&info, true, 2);
        assert_eq!(format, VertexFormat::all());
        assert_eq!(format.stride(), 12 + 12 + 16 + 4 + 8 + 16 + 16 + 4);

        let layout = format.layout();
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 40, 44, 52, 68, 84]);
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn sub_mesh_types_alone_enable_color() {
        let mut info = info_with(1);
        info.sub_mesh_types = vec![3.0];
        let format = VertexFormat::for_mesh(&info, false, 0);
        assert_eq!(format, VertexFormat::POSITION | VertexFormat::COLOR);
    }

    #[test]
    fn colors_pack_sub_mesh_type_into_alpha() {
        let colors = [Vec4::new(1.0, 0.5, 0.0, 0.25)];
        assert_eq!(vertex_color(&colors, &[7.0], 0), [255, 127, 0, 7]);
        assert_eq!(vertex_color(&colors, &[], 0), [255, 127, 0, 0]);
        assert_eq!(vertex_color(&[], &[2.0], 0), [255, 255, 255, 2]);
        assert_eq!(vertex_color(&colors, &[7.0], 1), DEFAULT_VERTEX_COLOR);
    }

    #[test]
    fn interleaves_at_attribute_offsets() {
        let mut info = info_with(2);
        info.tex_coords = vec![Vec2::new(0.25, 0.75); 2];
        info.set_bone_weights(vec![
            BoneWeight {
                indices: [1, 2, 300, 0],
                weights: [0.5, 0.5, 0.0, 0.0],
            };
            2
        ]);

        let format = VertexFormat::for_mesh(&info, true, 3);
        assert_eq!(
            format,
            VertexFormat::POSITION
                | VertexFormat::TEXCOORD0
                | VertexFormat::BONE_WEIGHTS
                | VertexFormat::BONE_INDICES
        );
        let bytes = write_interleaved(format, &info, 2).unwrap();
        let stride = format.stride() as usize;
        assert_eq!(bytes.len(), stride * 2);

        let second = &bytes[stride..];
        let position: [f32; 3] = bytemuck::pod_read_unaligned(&second[0..12]);
        assert_eq!(position, [1.0, 2.0, 3.0]);
        let uv: [f32; 2] = bytemuck::pod_read_unaligned(&second[12..20]);
        assert_eq!(uv, [0.25, 0.75]);
        let weights: [f32; 4] = bytemuck::pod_read_unaligned(&second[20..36]);
        assert_eq!(weights, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(&second[36..40], &[1, 2, 255, 0]);
    }

    #[test]
    fn excluded_sub_meshes_become_degenerate() {
        let mut triangles: Vec<u32> = (1..=12).collect();
        let sub_meshes = [
            SubMesh {
                index_start: 0,
                index_count: 6,
                inclusion: SubMeshInclusionFlags::BODY,
            },
            SubMesh {
                index_start: 6,
                index_count: 6,
                inclusion: SubMeshInclusionFlags::HAIR,
            },
        ];

        let zeroed =
            strip_excluded_sub_meshes(&mut triangles, &sub_meshes, SubMeshInclusionFlags::BODY);
        assert_eq!(zeroed, 6);
        assert_eq!(triangles.len(), 12);
        assert_eq!(&triangles[..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&triangles[6..], &[0; 6]);
    }

    #[test]
    fn all_inclusion_leaves_indices_alone() {
        let mut triangles = vec![1u32, 2, 3];
        let sub_meshes = [SubMesh {
            index_start: 0,
            index_count: 3,
            inclusion: SubMeshInclusionFlags::HAIR,
        }];
        assert_eq!(
            strip_excluded_sub_meshes(&mut triangles, &sub_meshes, SubMeshInclusionFlags::ALL),
            0
        );
        assert_eq!(triangles, vec![1, 2, 3]);
    }
}
