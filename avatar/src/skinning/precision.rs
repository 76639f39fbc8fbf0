//! Vector encodings shared by both skinning builders.
//!
//! Normalized precisions (`Unorm16`, `Snorm10`, `Byte`) take inputs in
//! `[-1, 1]`; callers divide by a per-attribute range first and store that
//! range in the metadata so the shader can undo it.

use glam::{Vec3, Vec4};
use half::f16;

use meshweave_graphics::TextureFormat;

use crate::config::TexturePrecision;

impl TexturePrecision {
    /// Texture format storing one 4-component texel of this precision.
    pub fn texture_format(&self) -> TextureFormat {
        match self {
            Self::Float => TextureFormat::Rgba32Float,
            Self::Half => TextureFormat::Rgba16Float,
            Self::Unorm16 => TextureFormat::Rgba16Unorm,
            Self::Snorm10 => TextureFormat::Rgb10a2Unorm,
            Self::Byte => TextureFormat::Rgba8Unorm,
        }
    }

    /// Bytes per 4-component texel.
    pub fn texel_size(&self) -> usize {
        self.texture_format().block_size() as usize
    }

    /// Whether values must be scaled into `[-1, 1]` before encoding.
    pub fn is_normalized(&self) -> bool {
        matches!(self, Self::Unorm16 | Self::Snorm10 | Self::Byte)
    }
}

/// Append one 4-component texel.
pub fn encode_texel(precision: TexturePrecision, value: Vec4, out: &mut Vec<u8>) {
    match precision {
        TexturePrecision::Float => out.extend_from_slice(bytemuck::bytes_of(&value)),
        TexturePrecision::Half => {
            let texel = value.to_array().map(f16::from_f32);
            out.extend_from_slice(bytemuck::cast_slice(&texel));
        }
        TexturePrecision::Unorm16 => {
            let texel = value.to_array().map(|c| to_unorm(c, 65535.0) as u16);
            out.extend_from_slice(bytemuck::cast_slice(&texel));
        }
        TexturePrecision::Snorm10 => {
            out.extend_from_slice(&pack_snorm10(value).to_le_bytes());
        }
        TexturePrecision::Byte => {
            out.extend_from_slice(&value.to_array().map(|c| to_unorm(c, 255.0) as u8));
        }
    }
}

/// Append one 3-component vector. `Float` is stored tightly in 12 bytes,
/// every other precision as a full texel with `w = 0`.
pub fn encode_vec3(precision: TexturePrecision, value: Vec3, out: &mut Vec<u8>) {
    match precision {
        TexturePrecision::Float => out.extend_from_slice(bytemuck::bytes_of(&value)),
        other => encode_texel(other, value.extend(0.0), out),
    }
}

/// Bytes written by [`encode_vec3`].
pub fn vec3_size(precision: TexturePrecision) -> usize {
    match precision {
        TexturePrecision::Float => 12,
        other => other.texel_size(),
    }
}

/// Per-component division that maps zero ranges to zero.
pub fn normalize(value: Vec3, range: Vec3) -> Vec3 {
    let scale = Vec3::select(range.cmpgt(Vec3::ZERO), range.recip(), Vec3::ZERO);
    value * scale
}

fn to_unorm(signed: f32, max: f32) -> f32 {
    ((signed.clamp(-1.0, 1.0) * 0.5 + 0.5) * max).round()
}

/// Pack xyz into signed 10-bit fields and w into a signed 2-bit field.
pub fn pack_snorm10(value: Vec4) -> u32 {
    let field = |c: f32, max: f32, mask: i32| ((c.clamp(-1.0, 1.0) * max).round() as i32 & mask) as u32;
    field(value.x, 511.0, 0x3FF)
        | field(value.y, 511.0, 0x3FF) << 10
        | field(value.z, 511.0, 0x3FF) << 20
        | field(value.w, 1.0, 0x3) << 30
}

/// Inverse of [`pack_snorm10`].
pub fn unpack_snorm10(bits: u32) -> Vec4 {
    let field = |shift: u32, width: u32, max: f32| {
        let raw = ((bits >> shift) & ((1 << width) - 1)) as i32;
        let signed = (raw << (32 - width)) >> (32 - width);
        (signed as f32 / max).max(-1.0)
    };
    Vec4::new(
        field(0, 10, 511.0),
        field(10, 10, 511.0),
        field(20, 10, 511.0),
        field(30, 2, 1.0),
    )
}
