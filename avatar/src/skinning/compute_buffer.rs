//! Packed raw buffer for compute skinning.
//!
//! One GPU raw buffer holds everything the compute skinner reads:
//!
//! ```text
//! header | positions | normals | tangents? | morph deltas? | joint weights? | joint indices? | output indices
//! ```
//!
//! The buffer is addressed as 32-bit words, so every block length is
//! rounded up to a multiple of four before the next offset is derived from
//! it. All per-vertex blocks are stored in [`VertexReorder`] slot order.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use meshweave_graphics::{Buffer, GraphicsError};

use crate::config::TexturePrecision;
use crate::mesh_info::BoneWeight;

use super::morph::{MorphAnalysis, MorphTargetInfo, VertexReorder};
use super::precision::{encode_texel, encode_vec3, normalize};

/// Fixed header at offset 0 of the compute buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct StaticMeshHeader {
    /// Positions, normals, tangents and joint weights offsets.
    pub attributes_and_joint_weights_offset: [u32; 4],
    /// Morph deltas offset, morph target count, morphed vertex count and
    /// joint indices offset.
    pub morph_info_and_joint_indices_offset: [u32; 4],
    /// Output index table offset in `x`.
    pub output_index_offset: [u32; 4],
    pub input_position_bias: [f32; 4],
    pub input_position_scale: [f32; 4],
    pub output_position_bias: [f32; 4],
    pub output_position_scale: [f32; 4],
    pub morph_position_range: [f32; 4],
    pub morph_normal_range: [f32; 4],
    pub morph_tangent_range: [f32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<StaticMeshHeader>(), 160);

/// Size of [`StaticMeshHeader`] in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<StaticMeshHeader>();

/// Round a byte length up to whole 32-bit words.
pub fn uint_aligned_len(len: usize) -> usize {
    (len + 3) & !3
}

fn pad_to_uint(mut block: Vec<u8>) -> Vec<u8> {
    block.resize(uint_aligned_len(block.len()), 0);
    block
}

/// Encoded data blocks, each already padded to whole words.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComputeBlocks {
    pub positions: Vec<u8>,
    pub normals: Vec<u8>,
    pub tangents: Vec<u8>,
    pub morphs: Vec<u8>,
    pub joint_weights: Vec<u8>,
    pub joint_indices: Vec<u8>,
    pub output_indices: Vec<u8>,
}

/// Byte offset of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockOffsets {
    pub positions: u32,
    pub normals: u32,
    pub tangents: u32,
    pub morphs: u32,
    pub joint_weights: u32,
    pub joint_indices: u32,
    pub output_indices: u32,
}

impl BlockOffsets {
    pub fn all(&self) -> [u32; 7] {
        [
            self.positions,
            self.normals,
            self.tangents,
            self.morphs,
            self.joint_weights,
            self.joint_indices,
            self.output_indices,
        ]
    }
}

/// Morph block summary stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MorphBlockInfo {
    pub num_morph_targets: u32,
    pub num_morphed_verts: u32,
    pub position_range: Vec3,
    pub normal_range: Vec3,
    pub tangent_range: Vec3,
}

/// Header plus offsets and total size of one compute buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BufferLayout {
    pub header: StaticMeshHeader,
    pub offsets: BlockOffsets,
    pub total_size: u32,
}

/// Output position scale and bias for the skinner's output precision.
pub fn output_scale_bias(output: TexturePrecision) -> (Vec3, Vec3) {
    match output {
        TexturePrecision::Unorm16 => (Vec3::splat(8.0), Vec3::splat(-0.75)),
        _ => (Vec3::ONE, Vec3::ZERO),
    }
}

/// Derive every offset from the aligned lengths of the preceding blocks.
pub fn compute_layout(
    blocks: &ComputeBlocks,
    morphs: &MorphBlockInfo,
    output: TexturePrecision,
) -> BufferLayout {
    let mut cursor = uint_aligned_len(HEADER_SIZE);
    let mut next = |len: usize| {
        let offset = cursor as u32;
        cursor += uint_aligned_len(len);
        offset
    };
    let offsets = BlockOffsets {
        positions: next(blocks.positions.len()),
        normals: next(blocks.normals.len()),
        tangents: next(blocks.tangents.len()),
        morphs: next(blocks.morphs.len()),
        joint_weights: next(blocks.joint_weights.len()),
        joint_indices: next(blocks.joint_indices.len()),
        output_indices: next(blocks.output_indices.len()),
    };
    let total_size = cursor as u32;

    let (scale, bias) = output_scale_bias(output);
    let header = StaticMeshHeader {
        attributes_and_joint_weights_offset: [
            offsets.positions,
            offsets.normals,
            offsets.tangents,
            offsets.joint_weights,
        ],
        morph_info_and_joint_indices_offset: [
            offsets.morphs,
            morphs.num_morph_targets,
            morphs.num_morphed_verts,
            offsets.joint_indices,
        ],
        output_index_offset: [offsets.output_indices, 0, 0, 0],
        input_position_bias: [0.0; 4],
        input_position_scale: [1.0; 4],
        output_position_bias: bias.extend(0.0).to_array(),
        output_position_scale: scale.extend(0.0).to_array(),
        morph_position_range: morphs.position_range.extend(0.0).to_array(),
        morph_normal_range: morphs.normal_range.extend(0.0).to_array(),
        morph_tangent_range: morphs.tangent_range.extend(0.0).to_array(),
    };

    BufferLayout {
        header,
        offsets,
        total_size,
    }
}

/// Neutral positions as tight float3.
pub fn encode_positions(verts: &[Vec3], reorder: &VertexReorder) -> Vec<u8> {
    let mut out = Vec::with_capacity(reorder.vertex_count() as usize * 12);
    for vertex in reorder.slots() {
        encode_vec3(
            TexturePrecision::Float,
            verts.get(vertex).copied().unwrap_or_default(),
            &mut out,
        );
    }
    pad_to_uint(out)
}

/// Neutral normals as packed Snorm10.
pub fn encode_normals(normals: &[Vec3], reorder: &VertexReorder) -> Vec<u8> {
    if normals.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(reorder.vertex_count() as usize * 4);
    for vertex in reorder.slots() {
        let normal = normals.get(vertex).copied().unwrap_or_default();
        encode_texel(TexturePrecision::Snorm10, normal.extend(0.0), &mut out);
    }
    pad_to_uint(out)
}

/// Neutral tangents as packed Snorm10 with handedness in `w`.
pub fn encode_tangents(tangents: &[Vec4], reorder: &VertexReorder) -> Vec<u8> {
    if tangents.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(reorder.vertex_count() as usize * 4);
    for vertex in reorder.slots() {
        let tangent = tangents.get(vertex).copied().unwrap_or_default();
        encode_texel(TexturePrecision::Snorm10, tangent, &mut out);
    }
    pad_to_uint(out)
}

/// Morph deltas of the morphed slots, target-major.
///
/// Each morphed vertex stores its position delta, then its normal and
/// tangent deltas when any target has them.
pub fn encode_morphs(
    targets: &[MorphTargetInfo],
    analysis: &MorphAnalysis,
    reorder: &VertexReorder,
    precision: TexturePrecision,
) -> (Vec<u8>, MorphBlockInfo) {
    let info = MorphBlockInfo {
        num_morph_targets: targets.len() as u32,
        num_morphed_verts: reorder.num_morphed,
        position_range: analysis.position_range,
        normal_range: analysis.normal_range,
        tangent_range: analysis.tangent_range,
    };
    if reorder.num_morphed == 0 {
        return (Vec::new(), info);
    }

    let scale = |delta: Vec3, range: Vec3| {
        if precision.is_normalized() {
            normalize(delta, range)
        } else {
            delta
        }
    };
    let morphed: Vec<usize> = reorder.slots().take(reorder.num_morphed as usize).collect();
    let mut out = Vec::new();
    for target in targets {
        for &vertex in &morphed {
            let delta = |channel: &[Vec3]| channel.get(vertex).copied().unwrap_or_default();
            encode_vec3(precision, scale(delta(&target.positions), info.position_range), &mut out);
            if analysis.has_normals {
                encode_vec3(precision, scale(delta(&target.normals), info.normal_range), &mut out);
            }
            if analysis.has_tangents {
                encode_vec3(precision, scale(delta(&target.tangents), info.tangent_range), &mut out);
            }
        }
    }
    (pad_to_uint(out), info)
}

/// Joint weights as float4.
pub fn encode_joint_weights(bone_weights: &[BoneWeight], reorder: &VertexReorder) -> Vec<u8> {
    if bone_weights.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(reorder.vertex_count() as usize * 16);
    for vertex in reorder.slots() {
        let weights = bone_weights.get(vertex).map(|w| w.weights).unwrap_or_default();
        out.extend_from_slice(bytemuck::cast_slice(&weights));
    }
    pad_to_uint(out)
}

/// Joint indices as uint8x4.
pub fn encode_joint_indices(bone_weights: &[BoneWeight], reorder: &VertexReorder) -> Vec<u8> {
    if bone_weights.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(reorder.vertex_count() as usize * 4);
    for vertex in reorder.slots() {
        let indices = bone_weights.get(vertex).map(|w| w.indices).unwrap_or_default();
        out.extend_from_slice(&indices.map(|index| index.min(255) as u8));
    }
    pad_to_uint(out)
}

/// Output index table, already padded to an even count.
pub fn encode_output_indices(reorder: &VertexReorder) -> Vec<u8> {
    pad_to_uint(bytemuck::cast_slice(&reorder.output_indices).to_vec())
}

/// Assemble the whole buffer on the CPU and upload it in one write.
pub fn fill_single_shot(
    buffer: &Buffer,
    layout: &BufferLayout,
    blocks: &ComputeBlocks,
) -> Result<(), GraphicsError> {
    let mut scratch = vec![0u8; layout.total_size as usize];
    let mut place = |offset: u32, bytes: &[u8]| {
        let start = offset as usize;
        scratch[start..start + bytes.len()].copy_from_slice(bytes);
    };
    place(0, bytemuck::bytes_of(&layout.header));
    for (offset, block) in block_writes(layout, blocks) {
        place(offset, block);
    }
    buffer.write(0, &scratch)
}

/// Write the header and each block separately.
///
/// Only correct on devices whose partial writes keep the rest of the buffer.
pub fn fill_partial(
    buffer: &Buffer,
    layout: &BufferLayout,
    blocks: &ComputeBlocks,
) -> Result<(), GraphicsError> {
    buffer.write_pod(0, std::slice::from_ref(&layout.header))?;
    for (offset, block) in block_writes(layout, blocks) {
        buffer.write(u64::from(offset), block)?;
    }
    Ok(())
}

fn block_writes<'a>(
    layout: &BufferLayout,
    blocks: &'a ComputeBlocks,
) -> Vec<(u32, &'a [u8])> {
    let offsets = &layout.offsets;
    let mut writes = vec![
        (offsets.positions, blocks.positions.as_slice()),
        (offsets.normals, blocks.normals.as_slice()),
    ];
    if !blocks.tangents.is_empty() {
        writes.push((offsets.tangents, blocks.tangents.as_slice()));
    }
    if !blocks.morphs.is_empty() {
        writes.push((offsets.morphs, blocks.morphs.as_slice()));
    }
    if !blocks.joint_indices.is_empty() {
        writes.push((offsets.joint_weights, blocks.joint_weights.as_slice()));
        writes.push((offsets.joint_indices, blocks.joint_indices.as_slice()));
    }
    writes.push((offsets.output_indices, blocks.output_indices.as_slice()));
    writes.retain(|(_, block)| !block.is_empty());
    writes
}

/// Static description of a built compute buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticMetaData {
    pub vertex_count: u32,
    pub num_morph_targets: u32,
    pub num_morphed_verts: u32,
    pub num_verts_no_joints_or_morphs: u32,
    pub position_output_scale: Vec3,
    pub position_output_bias: Vec3,
    pub joint_index_precision: TexturePrecision,
    pub input_position_precision: TexturePrecision,
    pub morph_delta_precision: TexturePrecision,
    pub output_precision: TexturePrecision,
    pub buffer_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use meshweave_graphics::{BufferDescriptor, BufferUsage, DeviceCapabilities, GraphicsDevice};

    fn identity(count: u32) -> VertexReorder {
        VertexReorder::new(count, &MorphAnalysis::default(), &[]).unwrap()
    }

    #[test]
    fn aligned_lengths_round_up_to_words() {
        assert_eq!(uint_aligned_len(0), 0);
        assert_eq!(uint_aligned_len(1), 4);
        assert_eq!(uint_aligned_len(4), 4);
        assert_eq!(uint_aligned_len(6), 8);
    }

    #[test]
    fn unpadded_blocks_still_get_aligned_offsets() {
        let blocks = ComputeBlocks {
            positions: vec![0; 36],
            normals: vec![0; 3],
            morphs: vec![0; 7],
            joint_weights: vec![0; 5],
            joint_indices: vec![0; 1],
            output_indices: vec![0; 6],
            ..ComputeBlocks::default()
        };
        let layout = compute_layout(&blocks, &MorphBlockInfo::default(), TexturePrecision::Float);

        assert_eq!(layout.offsets.positions as usize, HEADER_SIZE);
        assert_eq!(layout.offsets.normals, 160 + 36);
        assert_eq!(layout.offsets.tangents, 160 + 36 + 4);
        assert_eq!(layout.offsets.morphs, layout.offsets.tangents);
        assert_eq!(layout.offsets.joint_weights, layout.offsets.morphs + 8);
        for offset in layout.offsets.all() {
            assert_eq!(offset % 4, 0);
        }
        assert_eq!(layout.total_size % 4, 0);
        assert_eq!(layout.total_size, layout.offsets.output_indices + 8);
    }

    #[test]
    fn header_records_offsets_and_output_scale() {
        let reorder = identity(3);
        let blocks = ComputeBlocks {
            positions: encode_positions(&[Vec3::X; 3], &reorder),
            normals: encode_normals(&[Vec3::Y; 3], &reorder),
            output_indices: encode_output_indices(&reorder),
            ..ComputeBlocks::default()
        };
        let morphs = MorphBlockInfo {
            num_morph_targets: 2,
            ..MorphBlockInfo::default()
        };
        let layout = compute_layout(&blocks, &morphs, TexturePrecision::Unorm16);

        assert_eq!(layout.header.attributes_and_joint_weights_offset[0], 160);
        assert_eq!(layout.header.attributes_and_joint_weights_offset[1], 160 + 36);
        assert_eq!(layout.header.morph_info_and_joint_indices_offset[1], 2);
        assert_eq!(layout.header.output_position_scale, [8.0, 8.0, 8.0, 0.0]);
        assert_eq!(layout.header.output_position_bias, [-0.75, -0.75, -0.75, 0.0]);
        assert_eq!(layout.header.output_index_offset[0], 160 + 36 + 12);
        assert_eq!(layout.total_size, 160 + 36 + 12 + 8);
    }

    #[test]
    fn output_indices_pad_to_words() {
        let reorder = identity(3);
        assert_eq!(reorder.output_indices.len(), 4);
        assert_eq!(encode_output_indices(&reorder).len(), 8);
    }

    #[test]
    fn morph_block_is_empty_without_morphed_vertices() {
        let targets = vec![MorphTargetInfo {
            name: "blink".into(),
            positions: vec![Vec3::ZERO; 2],
            ..MorphTargetInfo::default()
        }];
        let analysis = MorphAnalysis::new(&targets, 2);
        let reorder = VertexReorder::new(2, &analysis, &[]).unwrap();
        let (block, info) = encode_morphs(&targets, &analysis, &reorder, TexturePrecision::Float);
        assert!(block.is_empty());
        assert_eq!(info.num_morph_targets, 1);
        assert_eq!(info.num_morphed_verts, 0);
    }

    #[test]
    fn morph_block_covers_each_target_and_channel() {
        let targets = vec![
            MorphTargetInfo {
                name: "a".into(),
                positions: vec![Vec3::ZERO, Vec3::X],
                normals: vec![Vec3::ZERO, Vec3::Y],
                ..MorphTargetInfo::default()
            },
            MorphTargetInfo {
                name: "b".into(),
                positions: vec![Vec3::ZERO, Vec3::Z],
                ..MorphTargetInfo::default()
            },
        ];
        let analysis = MorphAnalysis::new(&targets, 2);
        let reorder = VertexReorder::new(2, &analysis, &[]).unwrap();
        let (block, info) = encode_morphs(&targets, &analysis, &reorder, TexturePrecision::Half);

        assert_eq!(info.num_morphed_verts, 1);
        // two targets x one vertex x (position + normal) x 8 bytes
        assert_eq!(block.len(), 2 * 2 * 8);
    }

    fn device(preserve: bool) -> Arc<GraphicsDevice> {
        GraphicsDevice::new(
            "compute-buffer-tests",
            DeviceCapabilities::default().with_partial_writes_preserved(preserve),
        )
    }

    fn sample() -> (BufferLayout, ComputeBlocks) {
        let reorder = identity(5);
        let weights = vec![
            BoneWeight {
                indices: [0, 1, 0, 0],
                weights: [0.75, 0.25, 0.0, 0.0],
            };
            5
        ];
        let blocks = ComputeBlocks {
            positions: encode_positions(&[Vec3::ONE; 5], &reorder),
            normals: encode_normals(&[Vec3::Z; 5], &reorder),
            tangents: encode_tangents(&[Vec4::X; 5], &reorder),
            joint_weights: encode_joint_weights(&weights, &reorder),
            joint_indices: encode_joint_indices(&weights, &reorder),
            output_indices: encode_output_indices(&reorder),
            ..ComputeBlocks::default()
        };
        let layout = compute_layout(&blocks, &MorphBlockInfo::default(), TexturePrecision::Float);
        (layout, blocks)
    }

    #[test]
    fn both_strategies_produce_identical_buffers() {
        let (layout, blocks) = sample();
        let device = device(true);
        let usage = BufferUsage::RAW | BufferUsage::STORAGE | BufferUsage::COPY_DST;
        let single = device
            .create_buffer(&BufferDescriptor::new(layout.total_size as u64, usage))
            .unwrap();
        let partial = device
            .create_buffer(&BufferDescriptor::new(layout.total_size as u64, usage))
            .unwrap();

        fill_single_shot(&single, &layout, &blocks).unwrap();
        fill_partial(&partial, &layout, &blocks).unwrap();

        assert_eq!(single.write_count(), 1);
        assert!(partial.write_count() > 1);
        assert_eq!(single.contents(), partial.contents());
        let header: StaticMeshHeader = bytemuck::pod_read_unaligned(&single.contents()[..HEADER_SIZE]);
        assert_eq!(header, layout.header);
    }

    #[test]
    fn partial_writes_lose_data_on_defective_devices() {
        let (layout, blocks) = sample();
        let device = device(false);
        let buffer = device
            .create_buffer(&BufferDescriptor::new(
                layout.total_size as u64,
                BufferUsage::RAW | BufferUsage::STORAGE,
            ))
            .unwrap();

        fill_partial(&buffer, &layout, &blocks).unwrap();
        let header: StaticMeshHeader =
            bytemuck::pod_read_unaligned(&buffer.contents()[..HEADER_SIZE]);
        assert_eq!(header, StaticMeshHeader::zeroed());

        fill_single_shot(&buffer, &layout, &blocks).unwrap();
        let header: StaticMeshHeader =
            bytemuck::pod_read_unaligned(&buffer.contents()[..HEADER_SIZE]);
        assert_eq!(header, layout.header);
    }
}
