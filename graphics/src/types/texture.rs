use bitflags::bitflags;

use super::Extent3d;

/// Texel formats used by images and skinning source textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// Single-channel masks.
    R8Unorm,
    #[default]
    Rgba8Unorm,
    /// Color images.
    Rgba8UnormSrgb,
    /// Packed normals and tangents.
    Rgb10a2Unorm,
    Rgba16Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl TextureFormat {
    /// Bytes per texel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Rgb10a2Unorm => 4,
            Self::Rgba16Unorm | Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
    }
}

/// A 2D texture array; single textures have one layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    /// `depth` is the layer count.
    pub size: Extent3d,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self::new_2d_array(width, height, 1, format, usage)
    }

    pub fn new_2d_array(
        width: u32,
        height: u32,
        layers: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            label: None,
            size: Extent3d::new_3d(width, height, layers),
            format,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Bytes in one layer.
    pub fn layer_size(&self) -> u64 {
        self.size.width as u64 * self.size.height as u64 * self.format.block_size() as u64
    }

    /// Bytes across all layers.
    pub fn byte_size(&self) -> u64 {
        self.layer_size() * self.size.depth as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes_match_skinning_precisions() {
        assert_eq!(TextureFormat::R8Unorm.block_size(), 1);
        assert_eq!(TextureFormat::Rgb10a2Unorm.block_size(), 4);
        assert_eq!(TextureFormat::Rgba16Unorm.block_size(), 8);
        assert_eq!(TextureFormat::Rgba32Float.block_size(), 16);
    }

    #[test]
    fn array_sizes_count_every_layer() {
        let desc = TextureDescriptor::new_2d_array(
            16,
            8,
            3,
            TextureFormat::Rgba16Float,
            TextureUsage::TEXTURE_BINDING,
        )
        .with_label("morphs");
        assert_eq!(desc.layer_size(), 16 * 8 * 8);
        assert_eq!(desc.byte_size(), 16 * 8 * 8 * 3);
        let single = TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::empty());
        assert_eq!(single.size.depth, 1);
    }
}
