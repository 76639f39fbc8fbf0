//! Source textures for the texture skinning variant.
//!
//! Vertex data is laid out in bands: element `i` lives in column
//! `i % width` of band `i / width`, and each band is `rows` texels tall
//! with one row per attribute.

use std::sync::Arc;

use glam::{Vec3, Vec4};

use meshweave_graphics::{
    ExpandableTextureArray, GraphicsDevice, GraphicsError, Texture, TextureDescriptor,
    TextureLayout, TextureRegion, TextureUsage,
};

use crate::config::TexturePrecision;
use crate::mesh_info::BoneWeight;

use super::morph::{MorphAnalysis, MorphTargetInfo};
use super::precision::{encode_texel, normalize};

/// Width and height of a texture holding `count` elements of `rows` texels.
///
/// The width starts at `count` and is halved until it fits `max_dimension`.
/// Odd counts get one extra column unless that would overflow the maximum.
pub fn optimal_texture_dimensions(count: u32, rows: u32, max_dimension: u32) -> (u32, u32) {
    let mut width = count;
    if count > max_dimension {
        let odd = count % 2 == 1;
        while width > max_dimension {
            width >>= 1;
        }
        if width == max_dimension && odd {
            width >>= 1;
        }
        width += u32::from(odd);
    }
    let width = width.max(1);
    (width, count.div_ceil(width) * rows)
}

/// Pixels of one band-laid texture, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBlock {
    pub width: u32,
    pub height: u32,
    pub precision: TexturePrecision,
    pub pixels: Vec<u8>,
}

impl TextureBlock {
    fn new(width: u32, height: u32, precision: TexturePrecision) -> Self {
        let len = width as usize * height as usize * precision.texel_size();
        Self {
            width,
            height,
            precision,
            pixels: vec![0; len],
        }
    }

    fn put(&mut self, x: u32, y: u32, value: Vec4) {
        let size = self.precision.texel_size();
        let start = (y as usize * self.width as usize + x as usize) * size;
        let mut texel = Vec::with_capacity(size);
        encode_texel(self.precision, value, &mut texel);
        self.pixels[start..start + size].copy_from_slice(&texel);
    }

    /// Write `value` as attribute `row` of element `index`.
    fn put_element(&mut self, index: u32, rows: u32, row: u32, value: Vec4) {
        let x = index % self.width;
        let y = (index / self.width) * rows + row;
        self.put(x, y, value);
    }
}

/// Texture formats the neutral pose and joints textures accept.
pub fn float_precision(requested: TexturePrecision, what: &str) -> TexturePrecision {
    match requested {
        TexturePrecision::Float | TexturePrecision::Half => requested,
        other => {
            log::warn!("{what} texture precision {other:?} is unsupported, using Float");
            TexturePrecision::Float
        }
    }
}

/// Neutral positions, normals and optionally tangents, one row each.
pub fn encode_neutral_pose(
    verts: &[Vec3],
    normals: &[Vec3],
    tangents: &[Vec4],
    has_tangents: bool,
    precision: TexturePrecision,
    max_dimension: u32,
) -> TextureBlock {
    let count = verts.len() as u32;
    let rows = if has_tangents { 3 } else { 2 };
    let (width, height) = optimal_texture_dimensions(count, rows, max_dimension);
    let mut block = TextureBlock::new(width, height, precision);
    for index in 0..count {
        let i = index as usize;
        block.put_element(index, rows, 0, verts[i].extend(1.0));
        let normal = normals.get(i).copied().unwrap_or_default();
        block.put_element(index, rows, 1, normal.extend(0.0));
        if has_tangents {
            block.put_element(index, rows, 2, tangents.get(i).copied().unwrap_or_default());
        }
    }
    block
}

/// Number of attribute rows per morph target.
pub fn morph_channels(analysis: &MorphAnalysis) -> u32 {
    1 + u32::from(analysis.has_normals) + u32::from(analysis.has_tangents)
}

/// Deltas of the affected vertices, one band row per target and channel.
///
/// Returns `None` when no vertex is affected. The extra last row keeps a
/// zero texel for unaffected vertices to sample.
pub fn encode_morph_targets(
    targets: &[MorphTargetInfo],
    analysis: &MorphAnalysis,
    precision: TexturePrecision,
    max_dimension: u32,
) -> Option<TextureBlock> {
    let affected = analysis.num_affected();
    if affected == 0 || targets.is_empty() {
        return None;
    }

    let channels = morph_channels(analysis);
    let rows = targets.len() as u32 * channels;
    let (width, height) = optimal_texture_dimensions(affected, rows, max_dimension);
    let mut block = TextureBlock::new(width, height + 1, precision);

    let scale = |delta: Vec3, range: Vec3| {
        if precision.is_normalized() {
            normalize(delta, range)
        } else {
            delta
        }
    };
    for (slot, &vertex) in analysis.affected.iter().enumerate() {
        let vertex = vertex as usize;
        let slot = slot as u32;
        for (t, target) in targets.iter().enumerate() {
            let delta = |channel: &[Vec3]| channel.get(vertex).copied().unwrap_or_default();
            let mut row = t as u32 * channels;
            let position = scale(delta(&target.positions), analysis.position_range);
            block.put_element(slot, rows, row, position.extend(0.0));
            if analysis.has_normals {
                row += 1;
                let normal = scale(delta(&target.normals), analysis.normal_range);
                block.put_element(slot, rows, row, normal.extend(0.0));
            }
            if analysis.has_tangents {
                row += 1;
                let tangent = scale(delta(&target.tangents), analysis.tangent_range);
                block.put_element(slot, rows, row, tangent.extend(0.0));
            }
        }
    }
    Some(block)
}

/// Joint indices as floats in the first row, weights in the second.
pub fn encode_joints(
    bone_weights: &[BoneWeight],
    precision: TexturePrecision,
    max_dimension: u32,
) -> Option<TextureBlock> {
    if bone_weights.is_empty() {
        return None;
    }
    let count = bone_weights.len() as u32;
    let (width, height) = optimal_texture_dimensions(count, 2, max_dimension);
    let mut block = TextureBlock::new(width, height, precision);
    for (index, weight) in bone_weights.iter().enumerate() {
        let indices = Vec4::from_array(weight.indices.map(f32::from));
        block.put_element(index as u32, 2, 0, indices);
        block.put_element(index as u32, 2, 1, Vec4::from_array(weight.weights));
    }
    Some(block)
}

/// Upload `block` into a fresh single-purpose array named `name`.
///
/// The pixels go through a staging texture which is then copied into a
/// block of the array.
pub fn upload_block(
    device: &Arc<GraphicsDevice>,
    name: &str,
    block: &TextureBlock,
) -> Result<(ExpandableTextureArray, TextureLayout), GraphicsError> {
    let format = block.precision.texture_format();
    let staging: Arc<Texture> = device.create_texture(
        &TextureDescriptor::new_2d(
            block.width,
            block.height,
            format,
            TextureUsage::COPY_SRC | TextureUsage::COPY_DST,
        )
        .with_label(format!("{name} staging")),
    )?;
    staging.write_region(
        TextureRegion::new(0, 0, 0, block.width, block.height),
        &block.pixels,
    )?;

    let array = ExpandableTextureArray::new(device, name, block.width, block.height, format)?;
    let handle = array.add_empty_block(block.width, block.height)?;
    let layout = array.layout(handle);
    array.copy_from(layout, &staging)?;
    Ok((array, layout))
}

/// Layout and encoding of every source texture of one primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTextureMetaData {
    pub vertex_count: u32,
    pub has_tangents: bool,
    pub layout_in_neutral_pose_tex: TextureLayout,
    pub layout_in_morph_targets_tex: TextureLayout,
    pub layout_in_joints_tex: TextureLayout,
    pub num_morph_targets: u32,
    pub num_morph_target_affected_verts: u32,
    /// For every vertex its slot in the morph texture, or -1.
    pub mesh_vertex_to_affected_index: Vec<i32>,
    pub position_range: Vec3,
    pub normal_range: Vec3,
    pub tangent_range: Vec3,
    pub neutral_pose_precision: TexturePrecision,
    pub morph_precision: TexturePrecision,
    pub joints_precision: TexturePrecision,
}

impl Default for SourceTextureMetaData {
    fn default() -> Self {
        Self {
            vertex_count: 0,
            has_tangents: false,
            layout_in_neutral_pose_tex: TextureLayout::INVALID,
            layout_in_morph_targets_tex: TextureLayout::INVALID,
            layout_in_joints_tex: TextureLayout::INVALID,
            num_morph_targets: 0,
            num_morph_target_affected_verts: 0,
            mesh_vertex_to_affected_index: Vec::new(),
            position_range: Vec3::ZERO,
            normal_range: Vec3::ZERO,
            tangent_range: Vec3::ZERO,
            neutral_pose_precision: TexturePrecision::Float,
            morph_precision: TexturePrecision::Float,
            joints_precision: TexturePrecision::Float,
        }
    }
}
