//! Per-primitive staging data.
//!
//! [`MeshInfo`] holds the CPU copies of a primitive's vertex attributes while
//! the mesh upload and the GPU skinning builders read them. Positions,
//! normals, tangents and bone weights have several readers each; every
//! reader owns a slot in [`Consumers`] and an array is released only after
//! the last slot that reads it has cleared.
//!
//! | Array        | Readers                                                   |
//! |--------------|-----------------------------------------------------------|
//! | positions    | mesh copy, both builders, both neutral pose encodes       |
//! | normals      | mesh copy, both builders, both neutral pose encodes       |
//! | tangents     | mesh copy, both builders, both neutral pose encodes       |
//! | bone weights | mesh copy, both builders                                  |

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::native::SubMesh;

bitflags! {
    /// Readers that still need staged arrays.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Consumers: u16 {
        const MESH_VERTS = 1 << 0;
        const MESH_NORMALS = 1 << 1;
        const MESH_TANGENTS = 1 << 2;
        const MESH_BONE_WEIGHTS = 1 << 3;
        const GPU_PRIMITIVE = 1 << 4;
        const NEUTRAL_POSE_TEX = 1 << 5;
        const COMPUTE_PRIMITIVE = 1 << 6;
        const NEUTRAL_POSE_BUFFERS = 1 << 7;

        const PRIMITIVES = Self::GPU_PRIMITIVE.bits() | Self::COMPUTE_PRIMITIVE.bits();
        const NEUTRAL_POSES = Self::NEUTRAL_POSE_TEX.bits() | Self::NEUTRAL_POSE_BUFFERS.bits();
    }
}

/// Up to four joint influences of one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BoneWeight {
    pub indices: [u16; 4],
    pub weights: [f32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<BoneWeight>(), 24);

/// Staged vertex data of one primitive.
#[derive(Debug, Default)]
pub struct MeshInfo {
    verts: Option<Vec<Vec3>>,
    normals: Option<Vec<Vec3>>,
    tangents: Option<Vec<Vec4>>,
    bone_weights: Option<Vec<BoneWeight>>,
    pending: Consumers,
    vertex_count: u32,
    has_tangents: bool,

    /// Triangle list into the packed vertices.
    pub triangles: Vec<u32>,
    pub colors: Vec<Vec4>,
    pub colors_ormt: Vec<Vec4>,
    pub tex_coords: Vec<Vec2>,
    pub sub_mesh_types: Vec<f32>,
    pub sub_meshes: Vec<SubMesh>,
    pub bind_poses: Vec<Mat4>,
    pub joints: Vec<i32>,
}

impl MeshInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verts(&mut self, verts: Vec<Vec3>) {
        self.vertex_count = verts.len() as u32;
        self.verts = Some(verts);
        self.pending |= Consumers::MESH_VERTS;
    }

    pub fn set_normals(&mut self, normals: Vec<Vec3>) {
        self.normals = Some(normals);
        self.pending |= Consumers::MESH_NORMALS;
    }

    pub fn set_tangents(&mut self, tangents: Vec<Vec4>) {
        self.has_tangents = !tangents.is_empty();
        self.tangents = Some(tangents);
        self.pending |= Consumers::MESH_TANGENTS;
    }

    pub fn set_bone_weights(&mut self, bone_weights: Vec<BoneWeight>) {
        self.bone_weights = Some(bone_weights);
        self.pending |= Consumers::MESH_BONE_WEIGHTS;
    }

    /// Released or never-set arrays read as empty.
    pub fn verts(&self) -> &[Vec3] {
        self.verts.as_deref().unwrap_or_default()
    }

    pub fn normals(&self) -> &[Vec3] {
        self.normals.as_deref().unwrap_or_default()
    }

    pub fn tangents(&self) -> &[Vec4] {
        self.tangents.as_deref().unwrap_or_default()
    }

    pub fn bone_weights(&self) -> &[BoneWeight] {
        self.bone_weights.as_deref().unwrap_or_default()
    }

    pub fn has_verts(&self) -> bool {
        self.verts.is_some()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn has_tangent_array(&self) -> bool {
        self.tangents.is_some()
    }

    pub fn has_bone_weights(&self) -> bool {
        self.bone_weights.is_some()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn has_tangents(&self) -> bool {
        self.has_tangents
    }

    pub fn pending(&self) -> Consumers {
        self.pending
    }

    pub fn can_reset_verts(&self) -> bool {
        !self
            .pending
            .intersects(Consumers::PRIMITIVES | Consumers::NEUTRAL_POSES | Consumers::MESH_VERTS)
    }

    pub fn can_reset_normals(&self) -> bool {
        !self.pending.intersects(
            Consumers::PRIMITIVES | Consumers::NEUTRAL_POSES | Consumers::MESH_NORMALS,
        )
    }

    pub fn can_reset_tangents(&self) -> bool {
        !self.pending.intersects(
            Consumers::PRIMITIVES | Consumers::NEUTRAL_POSES | Consumers::MESH_TANGENTS,
        )
    }

    pub fn can_reset_bone_weights(&self) -> bool {
        !self
            .pending
            .intersects(Consumers::PRIMITIVES | Consumers::MESH_BONE_WEIGHTS)
    }

    /// Register the texture builder and its neutral pose encode.
    pub fn will_build_gpu_primitive(&mut self) {
        self.pending |= Consumers::GPU_PRIMITIVE;
        self.pending
            .set(Consumers::NEUTRAL_POSE_TEX, self.vertex_count > 0);
    }

    /// Register the compute builder and its neutral pose encode.
    pub fn will_build_compute_primitive(&mut self) {
        self.pending |= Consumers::COMPUTE_PRIMITIVE;
        self.pending
            .set(Consumers::NEUTRAL_POSE_BUFFERS, self.vertex_count > 0);
    }

    pub fn did_build_gpu_primitive(&mut self) {
        self.pending.remove(Consumers::GPU_PRIMITIVE);
        self.release_all();
    }

    pub fn did_build_compute_primitive(&mut self) {
        self.pending.remove(Consumers::COMPUTE_PRIMITIVE);
        self.release_all();
    }

    pub fn neutral_pose_tex_complete(&mut self) {
        self.pending.remove(Consumers::NEUTRAL_POSE_TEX);
        self.release_neutral_pose();
    }

    pub fn neutral_pose_buffers_complete(&mut self) {
        self.pending.remove(Consumers::NEUTRAL_POSE_BUFFERS);
        self.release_neutral_pose();
    }

    /// Every builder stopped early.
    pub fn cancelled_build_primitives(&mut self) {
        self.did_build_gpu_primitive();
        self.neutral_pose_tex_complete();
        self.did_build_compute_primitive();
        self.neutral_pose_buffers_complete();
    }

    pub fn mesh_verts_complete(&mut self) {
        self.pending.remove(Consumers::MESH_VERTS);
        self.release_verts();
    }

    pub fn mesh_normals_complete(&mut self) {
        self.pending.remove(Consumers::MESH_NORMALS);
        self.release_normals();
    }

    pub fn mesh_tangents_complete(&mut self) {
        self.pending.remove(Consumers::MESH_TANGENTS);
        self.release_tangents();
    }

    pub fn mesh_bone_weights_complete(&mut self) {
        self.pending.remove(Consumers::MESH_BONE_WEIGHTS);
        self.release_bone_weights();
    }

    /// Drop the arrays only the mesh upload reads.
    pub fn clear_mesh_data(&mut self) {
        self.triangles = Vec::new();
        self.colors = Vec::new();
        self.colors_ormt = Vec::new();
        self.tex_coords = Vec::new();
        self.sub_mesh_types = Vec::new();
        self.sub_meshes = Vec::new();
        self.bind_poses = Vec::new();
        self.joints = Vec::new();
    }

    fn release_neutral_pose(&mut self) {
        self.release_verts();
        self.release_normals();
        self.release_tangents();
    }

    fn release_all(&mut self) {
        self.release_neutral_pose();
        self.release_bone_weights();
    }

    fn release_verts(&mut self) {
        if self.can_reset_verts() && self.verts.take().is_some() {
            log::trace!("MeshInfo: released positions");
        }
    }

    fn release_normals(&mut self) {
        if self.can_reset_normals() {
            self.normals = None;
        }
    }

    fn release_tangents(&mut self) {
        if self.can_reset_tangents() {
            self.tangents = None;
        }
    }

    fn release_bone_weights(&mut self) {
        if self.can_reset_bone_weights() {
            self.bone_weights = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Completion = fn(&mut MeshInfo);

    fn staged() -> MeshInfo {
        let mut info = MeshInfo::new();
        info.set_verts(vec![Vec3::ONE; 4]);
        info.set_normals(vec![Vec3::Y; 4]);
        info.set_tangents(vec![Vec4::X; 4]);
        info.set_bone_weights(vec![BoneWeight::default(); 4]);
        info
    }

    fn permutations(items: &[(&'static str, Completion)]) -> Vec<Vec<(&'static str, Completion)>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let first = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn positions_survive_until_last_reader_clears() {
        let completions: [(&str, Completion); 5] = [
            ("gpu", MeshInfo::did_build_gpu_primitive),
            ("neutral_tex", MeshInfo::neutral_pose_tex_complete),
            ("compute", MeshInfo::did_build_compute_primitive),
            ("neutral_buffers", MeshInfo::neutral_pose_buffers_complete),
            ("mesh", MeshInfo::mesh_verts_complete),
        ];

        for order in permutations(&completions) {
            let mut info = staged();
            info.will_build_gpu_primitive();
            info.will_build_compute_primitive();

            let (last, steps) = order.split_last().unwrap();
            for (name, complete) in steps {
                complete(&mut info);
                assert!(info.has_verts(), "released after {name}");
            }
            (last.1)(&mut info);
            assert!(!info.has_verts(), "kept after {}", last.0);
        }
    }

    #[test]
    fn bone_weights_ignore_neutral_pose_readers() {
        let mut info = staged();
        info.will_build_gpu_primitive();
        info.mesh_bone_weights_complete();
        assert!(info.has_bone_weights());

        info.did_build_gpu_primitive();
        assert!(!info.has_bone_weights());
        assert!(info.has_verts());

        info.neutral_pose_tex_complete();
        assert!(info.has_verts());
        info.mesh_verts_complete();
        assert!(!info.has_verts());
    }

    #[test]
    fn empty_mesh_skips_neutral_pose_slot() {
        let mut info = MeshInfo::new();
        info.will_build_gpu_primitive();
        assert_eq!(info.pending(), Consumers::GPU_PRIMITIVE);
    }

    #[test]
    fn cancelled_builds_release_everything_the_mesh_copied() {
        let mut info = staged();
        info.will_build_gpu_primitive();
        info.will_build_compute_primitive();
        info.mesh_verts_complete();
        info.mesh_normals_complete();
        info.mesh_tangents_complete();
        info.mesh_bone_weights_complete();
        assert!(info.has_verts() && info.has_normals() && info.has_bone_weights());

        info.cancelled_build_primitives();
        assert!(info.pending().is_empty());
        assert!(!info.has_verts());
        assert!(!info.has_normals());
        assert!(!info.has_tangent_array());
        assert!(!info.has_bone_weights());
        assert!(info.has_tangents());
    }
}
