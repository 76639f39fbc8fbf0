//! Morph target analysis and vertex reordering.

use glam::Vec3;

use crate::error::{AvatarError, AvatarResult};
use crate::mesh_info::BoneWeight;

/// Repacked deltas of one morph target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MorphTargetInfo {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// Empty when the target has no normal deltas.
    pub normals: Vec<Vec3>,
    /// Empty when the target has no tangent deltas.
    pub tangents: Vec<Vec3>,
}

impl MorphTargetInfo {
    fn delta(channel: &[Vec3], vertex: usize) -> Vec3 {
        channel.get(vertex).copied().unwrap_or(Vec3::ZERO)
    }
}

/// Which vertices any morph target moves, and by how much at most.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MorphAnalysis {
    /// Affected vertices in ascending order.
    pub affected: Vec<u32>,
    /// For every vertex its slot in `affected`, or -1.
    pub vertex_to_affected: Vec<i32>,
    /// Largest absolute position delta per component.
    pub position_range: Vec3,
    pub normal_range: Vec3,
    pub tangent_range: Vec3,
    pub has_normals: bool,
    pub has_tangents: bool,
}

impl MorphAnalysis {
    pub fn new(targets: &[MorphTargetInfo], vertex_count: u32) -> Self {
        let mut analysis = Self {
            vertex_to_affected: vec![-1; vertex_count as usize],
            has_normals: targets.iter().any(|t| !t.normals.is_empty()),
            has_tangents: targets.iter().any(|t| !t.tangents.is_empty()),
            ..Self::default()
        };

        for vertex in 0..vertex_count as usize {
            let mut moved = false;
            for target in targets {
                let p = MorphTargetInfo::delta(&target.positions, vertex);
                let n = MorphTargetInfo::delta(&target.normals, vertex);
                let t = MorphTargetInfo::delta(&target.tangents, vertex);
                if p == Vec3::ZERO && n == Vec3::ZERO && t == Vec3::ZERO {
                    continue;
                }
                moved = true;
                analysis.position_range = analysis.position_range.max(p.abs());
                analysis.normal_range = analysis.normal_range.max(n.abs());
                analysis.tangent_range = analysis.tangent_range.max(t.abs());
            }
            if moved {
                analysis.vertex_to_affected[vertex] = analysis.affected.len() as i32;
                analysis.affected.push(vertex as u32);
            }
        }
        analysis
    }

    pub fn num_affected(&self) -> u32 {
        self.affected.len() as u32
    }

    pub fn is_affected(&self, vertex: u32) -> bool {
        self.vertex_to_affected
            .get(vertex as usize)
            .is_some_and(|slot| *slot >= 0)
    }
}

/// Vertex order used by the compute skinner.
///
/// Morphed vertices come first, then vertices that are only skinned, then
/// static vertices, each group in ascending original order. The skinner
/// processes slot `i` and writes its result to vertex `output_indices[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexReorder {
    /// Original vertex per slot, padded to an even length.
    pub output_indices: Vec<u16>,
    pub num_morphed: u32,
    pub num_skinned_only: u32,
    pub num_static: u32,
}

/// Largest vertex count addressable by the 16-bit reorder table.
pub const MAX_REORDER_VERTICES: u32 = u16::MAX as u32 + 1;

impl VertexReorder {
    pub fn new(
        vertex_count: u32,
        morphs: &MorphAnalysis,
        bone_weights: &[BoneWeight],
    ) -> AvatarResult<Self> {
        if vertex_count > MAX_REORDER_VERTICES {
            return Err(AvatarError::TooManyVertices {
                count: vertex_count,
                max: MAX_REORDER_VERTICES,
            });
        }

        let skinned = |vertex: u32| {
            bone_weights
                .get(vertex as usize)
                .is_some_and(|w| w.weights.iter().any(|&weight| weight != 0.0))
        };

        let mut morphed = Vec::new();
        let mut skinned_only = Vec::new();
        let mut rest = Vec::new();
        for vertex in 0..vertex_count {
            if morphs.is_affected(vertex) {
                morphed.push(vertex as u16);
            } else if skinned(vertex) {
                skinned_only.push(vertex as u16);
            } else {
                rest.push(vertex as u16);
            }
        }

        let reorder = Self {
            num_morphed: morphed.len() as u32,
            num_skinned_only: skinned_only.len() as u32,
            num_static: rest.len() as u32,
            output_indices: {
                let mut indices = morphed;
                indices.extend(skinned_only);
                indices.extend(rest);
                if indices.len() % 2 == 1 {
                    indices.push(0);
                }
                indices
            },
        };
        Ok(reorder)
    }

    /// Slot order as original vertex indices, without padding.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        let len = (self.num_morphed + self.num_skinned_only + self.num_static) as usize;
        self.output_indices[..len].iter().map(|&v| v as usize)
    }

    pub fn vertex_count(&self) -> u32 {
        self.num_morphed + self.num_skinned_only + self.num_static
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(positions: Vec<Vec3>) -> MorphTargetInfo {
        MorphTargetInfo {
            name: "t".into(),
            positions,
            ..MorphTargetInfo::default()
        }
    }

    #[test]
    fn zero_deltas_affect_nothing() {
        let targets = vec![target(vec![Vec3::ZERO; 4]); 3];
        let analysis = MorphAnalysis::new(&targets, 4);
        assert_eq!(analysis.num_affected(), 0);
        assert_eq!(analysis.vertex_to_affected, vec![-1; 4]);
        assert_eq!(analysis.position_range, Vec3::ZERO);
    }

    #[test]
    fn ranges_cover_largest_delta() {
        let targets = vec![
            target(vec![Vec3::ZERO, Vec3::new(0.5, -2.0, 0.0), Vec3::ZERO]),
            MorphTargetInfo {
                normals: vec![Vec3::ZERO, Vec3::ZERO, Vec3::new(0.0, 0.0, -0.25)],
                ..target(vec![Vec3::ZERO, Vec3::new(-1.0, 0.0, 0.0), Vec3::ZERO])
            },
        ];
        let analysis = MorphAnalysis::new(&targets, 3);
        assert_eq!(analysis.affected, vec![1, 2]);
        assert_eq!(analysis.vertex_to_affected, vec![-1, 0, 1]);
        assert_eq!(analysis.position_range, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(analysis.normal_range, Vec3::new(0.0, 0.0, 0.25));
        assert!(analysis.has_normals);
        assert!(!analysis.has_tangents);
    }

    #[test]
    fn reorder_groups_morphed_then_skinned_then_static() {
        let targets = vec![target(vec![
            Vec3::ZERO,
            Vec3::ZERO,
            Vec3::X,
            Vec3::ZERO,
            Vec3::ZERO,
        ])];
        let analysis = MorphAnalysis::new(&targets, 5);
        let mut weights = vec![BoneWeight::default(); 5];
        weights[0].weights = [1.0, 0.0, 0.0, 0.0];
        weights[3].weights = [0.5, 0.5, 0.0, 0.0];

        let reorder = VertexReorder::new(5, &analysis, &weights).unwrap();
        assert_eq!(reorder.num_morphed, 1);
        assert_eq!(reorder.num_skinned_only, 2);
        assert_eq!(reorder.num_static, 2);
        assert_eq!(reorder.output_indices, vec![2, 0, 3, 1, 4, 0]);
        assert_eq!(reorder.slots().collect::<Vec<_>>(), vec![2, 0, 3, 1, 4]);
    }

    #[test]
    fn reorder_rejects_oversized_meshes() {
        let err = VertexReorder::new(
            MAX_REORDER_VERTICES + 1,
            &MorphAnalysis::default(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, AvatarError::TooManyVertices { .. }));
    }
}
