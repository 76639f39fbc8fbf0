//! GPU texture resource.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{Extent3d, TextureDescriptor, TextureFormat};

/// Rectangle inside one layer of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureRegion {
    /// Array layer.
    pub layer: u32,
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl TextureRegion {
    /// Create a region.
    pub fn new(layer: u32, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            layer,
            x,
            y,
            width,
            height,
        }
    }

    /// Number of pixels covered.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A GPU texture resource.
///
/// Textures are created by [`GraphicsDevice::create_texture`] and are reference-counted.
/// They hold a strong reference to their parent device, keeping it alive.
/// A texture with `depth > 1` is a 2D array with one layer per depth slice.
///
/// # Example
///
/// ```ignore
/// let texture = device.create_texture(&TextureDescriptor::new_2d_array(
///     512, 512, 2,
///     TextureFormat::Rgba32Float,
///     TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
/// ))?;
/// texture.write_region(TextureRegion::new(1, 0, 0, 4, 1), &pixels)?;
/// ```
pub struct Texture {
    device: Arc<GraphicsDevice>,
    descriptor: TextureDescriptor,
    data: RwLock<Vec<u8>>,
}

impl Texture {
    pub(crate) fn new(device: Arc<GraphicsDevice>, descriptor: TextureDescriptor) -> Self {
        let data = vec![0u8; descriptor.byte_size() as usize];
        Self {
            device,
            descriptor,
            data: RwLock::new(data),
        }
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn size(&self) -> Extent3d {
        self.descriptor.size
    }

    pub fn width(&self) -> u32 {
        self.descriptor.size.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.size.height
    }

    pub fn layers(&self) -> u32 {
        self.descriptor.size.depth
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Write tightly packed pixels into `region`.
    pub fn write_region(&self, region: TextureRegion, pixels: &[u8]) -> Result<(), GraphicsError> {
        self.check_region(&region)?;
        let bpp = self.format().block_size() as usize;
        let row_bytes = region.width as usize * bpp;
        let expected = row_bytes * region.height as usize;
        if pixels.len() != expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "region of {}x{} expects {expected} bytes, got {}",
                region.width,
                region.height,
                pixels.len()
            )));
        }

        let mut data = self.data.write();
        for row in 0..region.height as usize {
            let dst = self.pixel_offset(region.layer, region.x, region.y + row as u32);
            data[dst..dst + row_bytes].copy_from_slice(&pixels[row * row_bytes..][..row_bytes]);
        }
        Ok(())
    }

    /// Write plain texel values into `region`.
    pub fn write_texels<T: bytemuck::Pod>(
        &self,
        region: TextureRegion,
        texels: &[T],
    ) -> Result<(), GraphicsError> {
        self.write_region(region, bytemuck::cast_slice(texels))
    }

    /// Read the pixels of `region`, tightly packed.
    pub fn read_region(&self, region: TextureRegion) -> Result<Vec<u8>, GraphicsError> {
        self.check_region(&region)?;
        let row_bytes = region.width as usize * self.format().block_size() as usize;
        let data = self.data.read();
        let mut pixels = Vec::with_capacity(row_bytes * region.height as usize);
        for row in 0..region.height {
            let src = self.pixel_offset(region.layer, region.x, region.y + row);
            pixels.extend_from_slice(&data[src..src + row_bytes]);
        }
        Ok(pixels)
    }

    /// Copy layer 0 of `source` into this texture at `(x, y)` of `layer`.
    pub fn copy_from(
        &self,
        source: &Texture,
        layer: u32,
        x: u32,
        y: u32,
    ) -> Result<(), GraphicsError> {
        if source.format() != self.format() {
            return Err(GraphicsError::InvalidParameter(format!(
                "cannot copy {:?} texture into {:?} texture",
                source.format(),
                self.format()
            )));
        }
        let pixels = source.read_region(TextureRegion::new(
            0,
            0,
            0,
            source.width(),
            source.height(),
        ))?;
        self.write_region(
            TextureRegion::new(layer, x, y, source.width(), source.height()),
            &pixels,
        )
    }

    /// Copy every layer of `source` into the same layers of this texture.
    ///
    /// Both textures must share width, height and format, and `source` may
    /// not have more layers than this texture.
    pub fn copy_layers_from(&self, source: &Texture) -> Result<(), GraphicsError> {
        if source.width() != self.width()
            || source.height() != self.height()
            || source.format() != self.format()
        {
            return Err(GraphicsError::InvalidParameter(
                "layer copy requires matching width, height and format".to_string(),
            ));
        }
        if source.layers() > self.layers() {
            return Err(GraphicsError::InvalidParameter(format!(
                "cannot copy {} layers into a texture with {}",
                source.layers(),
                self.layers()
            )));
        }
        let src = source.data.read();
        let mut dst = self.data.write();
        dst[..src.len()].copy_from_slice(&src);
        Ok(())
    }

    fn pixel_offset(&self, layer: u32, x: u32, y: u32) -> usize {
        let bpp = self.format().block_size() as usize;
        let layer_size = self.descriptor.layer_size() as usize;
        layer as usize * layer_size + (y as usize * self.width() as usize + x as usize) * bpp
    }

    fn check_region(&self, region: &TextureRegion) -> Result<(), GraphicsError> {
        let fits_x = region.x.checked_add(region.width).is_some_and(|r| r <= self.width());
        let fits_y = region
            .y
            .checked_add(region.height)
            .is_some_and(|b| b <= self.height());
        if region.layer >= self.layers() || !fits_x || !fits_y {
            return Err(GraphicsError::InvalidParameter(format!(
                "region {region:?} outside texture of {}x{}x{}",
                self.width(),
                self.height(),
                self.layers()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
