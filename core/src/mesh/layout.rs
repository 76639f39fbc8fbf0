//! Interleaved vertex layouts.
//!
//! Avatar meshes carry a single vertex stream whose attribute order is fixed
//! by the renderer. [`VertexLayout::interleaved`] packs the attributes back
//! to back in the order given:
//!
//! ```ignore
//! let layout = VertexLayout::interleaved(&[
//!     (VertexAttributeSemantic::Position, VertexAttributeFormat::Float3),
//!     (VertexAttributeSemantic::Color, VertexAttributeFormat::Unorm8x4),
//!     (VertexAttributeSemantic::TexCoord0, VertexAttributeFormat::Float2),
//! ]);
//! assert_eq!(layout.stride(), 24);
//! ```

use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttributeSemantic {
    Position,
    Normal,
    /// w holds the bitangent sign.
    Tangent,
    /// RGB plus the sub-mesh type in alpha.
    Color,
    TexCoord0,
    /// Occlusion, roughness, metallic and thickness.
    TexCoord1,
    Weights,
    Joints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttributeFormat {
    Float2,
    Float3,
    Float4,
    Unorm8x4,
    Uint8x4,
}

impl VertexAttributeFormat {
    /// Bytes occupied inside a vertex.
    pub fn size(&self) -> usize {
        match self {
            Self::Unorm8x4 | Self::Uint8x4 => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }
}

/// One attribute of an interleaved vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub semantic: VertexAttributeSemantic,
    pub format: VertexAttributeFormat,
    /// Byte offset from the start of the vertex.
    pub offset: u32,
}

impl VertexAttribute {
    pub fn bytes(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.format.size()
    }
}

/// Attributes of one interleaved vertex stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayout {
    pub attributes: Vec<VertexAttribute>,
    /// Bytes between consecutive vertices.
    pub stride: u32,
    pub label: Option<String>,
}

impl VertexLayout {
    /// Packs `attributes` without padding; the stride is the sum of sizes.
    pub fn interleaved(attributes: &[(VertexAttributeSemantic, VertexAttributeFormat)]) -> Self {
        let mut layout = Self::default();
        for &(semantic, format) in attributes {
            layout.attributes.push(VertexAttribute {
                semantic,
                format,
                offset: layout.stride,
            });
            layout.stride += format.size() as u32;
        }
        layout
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn attribute(&self, semantic: VertexAttributeSemantic) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|attr| attr.semantic == semantic)
    }

    pub fn has_semantic(&self, semantic: VertexAttributeSemantic) -> bool {
        self.attribute(semantic).is_some()
    }

    pub fn semantics(&self) -> impl Iterator<Item = VertexAttributeSemantic> + '_ {
        self.attributes.iter().map(|attr| attr.semantic)
    }

    /// Checks that the layout is non-empty, every attribute fits in the
    /// stride and no two attributes share bytes or a semantic.
    pub fn validate(&self) -> Result<(), String> {
        if self.attributes.is_empty() || self.stride == 0 {
            return Err("vertex layout has no attributes".to_string());
        }
        for (i, attr) in self.attributes.iter().enumerate() {
            let bytes = attr.bytes();
            if bytes.end > self.stride as usize {
                return Err(format!(
                    "{:?} ends at byte {} past stride {}",
                    attr.semantic, bytes.end, self.stride
                ));
            }
            for other in &self.attributes[i + 1..] {
                let theirs = other.bytes();
                if other.semantic == attr.semantic {
                    return Err(format!("{:?} appears twice", attr.semantic));
                }
                if bytes.start < theirs.end && theirs.start < bytes.end {
                    return Err(format!(
                        "{:?} and {:?} overlap",
                        attr.semantic, other.semantic
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use VertexAttributeFormat as F;
    use VertexAttributeSemantic as S;

    #[test]
    fn interleaved_packs_in_order() {
        let layout = VertexLayout::interleaved(&[
            (S::Position, F::Float3),
            (S::Normal, F::Float3),
            (S::Color, F::Unorm8x4),
            (S::TexCoord0, F::Float2),
        ]);

        assert_eq!(layout.stride(), 36);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 28]);
        assert_eq!(layout.attribute(S::Color).map(|a| a.bytes()), Some(24..28));
        assert!(!layout.has_semantic(S::Tangent));
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn skinning_channels_follow_position() {
        let layout = VertexLayout::interleaved(&[
            (S::Position, F::Float3),
            (S::Weights, F::Float4),
            (S::Joints, F::Uint8x4),
        ]);
        let semantics: Vec<_> = layout.semantics().collect();
        assert_eq!(semantics, vec![S::Position, S::Weights, S::Joints]);
        assert_eq!(layout.stride(), 32);
    }

    #[test]
    fn validation_rejects_broken_layouts() {
        assert!(VertexLayout::default().validate().is_err());

        let mut past_stride = VertexLayout::interleaved(&[(S::Normal, F::Float3)]);
        past_stride.attributes[0].offset = 8;
        assert!(past_stride.validate().is_err());

        let mut overlapping =
            VertexLayout::interleaved(&[(S::Position, F::Float3), (S::Normal, F::Float3)]);
        overlapping.attributes[1].offset = 8;
        assert!(overlapping.validate().is_err());

        let twice = VertexLayout::interleaved(&[(S::Position, F::Float3), (S::Position, F::Float3)]);
        assert!(twice.validate().is_err());
    }
}
