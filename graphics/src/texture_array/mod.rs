//! Expandable texture arrays.
//!
//! An [`ExpandableTextureArray`] is a 2D texture array of fixed width, height
//! and format that grows by whole layers as blocks are packed into it. Since
//! a texture cannot be resized in place, growth creates a larger array,
//! copies the existing layers over and notifies every resize listener with
//! the new texture.
//!
//! ```ignore
//! let array = ExpandableTextureArray::new(&device, "Neutral", 512, 512, TextureFormat::Rgba32Float)?;
//! let handle = array.add_empty_block(64, 8)?;
//! let layout = array.layout(handle);
//! array.copy_from(layout, &staging)?;
//! ```

mod atlas;

pub use atlas::AtlasPacker;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Texture;
use crate::types::{TextureDescriptor, TextureFormat, TextureUsage};

/// Handle to a block packed into an [`ExpandableTextureArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHandle(pub(crate) u32);

impl BlockHandle {
    /// The invalid handle.
    pub const INVALID: Self = Self(0);

    /// Returns true for handles returned by a successful add.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Placement of a block inside a texture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureLayout {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
    /// Array layer.
    pub slice: u32,
}

impl TextureLayout {
    /// Layout of a block that was never placed.
    pub const INVALID: Self = Self {
        x: 0,
        y: 0,
        w: 0,
        h: 0,
        slice: u32::MAX,
    };

    /// Returns true for layouts of placed blocks.
    pub fn is_valid(&self) -> bool {
        self.slice != u32::MAX && self.w > 0 && self.h > 0
    }
}

impl Default for TextureLayout {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Identifier returned by [`ExpandableTextureArray::on_resized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ResizeListener = Box<dyn Fn(&Arc<Texture>) + Send + Sync>;

struct ArrayState {
    texture: Option<Arc<Texture>>,
    packer: AtlasPacker,
}

/// A texture array that grows by whole layers.
pub struct ExpandableTextureArray {
    device: Arc<GraphicsDevice>,
    name: String,
    format: TextureFormat,
    state: Mutex<ArrayState>,
    listeners: Mutex<Vec<(ListenerId, ResizeListener)>>,
    next_listener: Mutex<u64>,
}

impl ExpandableTextureArray {
    /// Create an array with a single layer.
    ///
    /// # Errors
    ///
    /// Fails if the dimensions exceed the device limits or the caller is not
    /// the device's owning thread.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self, GraphicsError> {
        let name = name.into();
        let texture = create_array(device, &name, width, height, 1, format)?;
        log::debug!("ExpandableTextureArray: created '{name}' {width}x{height} {format:?}");
        Ok(Self {
            device: Arc::clone(device),
            name,
            format,
            state: Mutex::new(ArrayState {
                texture: Some(texture),
                packer: AtlasPacker::new(width, height),
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(1),
        })
    }

    /// Array name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layer width.
    pub fn width(&self) -> u32 {
        self.state.lock().packer.width()
    }

    /// Layer height.
    pub fn height(&self) -> u32 {
        self.state.lock().packer.height()
    }

    /// Texel format.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Whether the array still owns a texture.
    pub fn has_texture(&self) -> bool {
        self.state.lock().texture.is_some()
    }

    /// Current texture, if not destroyed.
    pub fn texture(&self) -> Option<Arc<Texture>> {
        self.state.lock().texture.clone()
    }

    /// Current number of layers.
    pub fn layer_count(&self) -> u32 {
        self.state.lock().texture.as_ref().map_or(0, |t| t.layers())
    }

    /// Whether a block of this size fits in one layer.
    pub fn check_fit(&self, width: u32, height: u32) -> bool {
        self.state.lock().packer.fits(width, height)
    }

    /// Register a listener called with the new texture whenever the array
    /// grows. If the array currently has a texture, the listener is called
    /// with it immediately.
    ///
    /// Listeners must not register or remove listeners from inside the call.
    pub fn on_resized(
        &self,
        listener: impl Fn(&Arc<Texture>) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = {
            let mut next = self.next_listener.lock();
            let id = ListenerId(*next);
            *next += 1;
            id
        };
        if let Some(texture) = self.texture() {
            listener(&texture);
        }
        self.listeners.lock().push((id, Box::new(listener)));
        id
    }

    /// Remove a resize listener.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    /// Reserve a block, growing the array if the packer opens a new layer.
    ///
    /// Returns [`BlockHandle::INVALID`] if the array was destroyed or the
    /// block is larger than a layer.
    pub fn add_empty_block(&self, width: u32, height: u32) -> Result<BlockHandle, GraphicsError> {
        let (handle, texture) = {
            let mut state = self.state.lock();
            let Some(texture) = state.texture.clone() else {
                return Ok(BlockHandle::INVALID);
            };
            let Some((handle, layout)) = state.packer.add_block(width, height) else {
                return Ok(BlockHandle::INVALID);
            };
            if layout.slice < texture.layers() {
                return Ok(handle);
            }

            match self.grow(&texture, layout.slice + 1) {
                Ok(grown) => {
                    state.texture = Some(Arc::clone(&grown));
                    (handle, grown)
                }
                Err(err) => {
                    state.packer.remove_block(handle);
                    return Err(err);
                }
            }
        };

        for (_, listener) in self.listeners.lock().iter() {
            listener(&texture);
        }
        Ok(handle)
    }

    /// Layout of a block.
    pub fn layout(&self, handle: BlockHandle) -> TextureLayout {
        self.state.lock().packer.layout(handle)
    }

    /// Copy `source` (layer 0) into the block described by `layout`.
    pub fn copy_from(&self, layout: TextureLayout, source: &Texture) -> Result<(), GraphicsError> {
        if !layout.is_valid() {
            return Err(GraphicsError::InvalidParameter(
                "cannot copy into an invalid layout".to_string(),
            ));
        }
        if source.width() != layout.w || source.height() != layout.h {
            return Err(GraphicsError::InvalidParameter(format!(
                "source is {}x{}, block is {}x{}",
                source.width(),
                source.height(),
                layout.w,
                layout.h
            )));
        }
        let Some(texture) = self.texture() else {
            return Err(GraphicsError::Internal(format!(
                "texture array '{}' was destroyed",
                self.name
            )));
        };
        texture.copy_from(source, layout.slice, layout.x, layout.y)
    }

    /// Free a block. The array never shrinks.
    pub fn remove_block(&self, handle: BlockHandle) {
        self.state.lock().packer.remove_block(handle);
    }

    /// Release the texture. Later adds return invalid handles.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        if state.texture.take().is_some() {
            log::debug!("ExpandableTextureArray: destroyed '{}'", self.name);
        }
    }

    fn grow(&self, old: &Arc<Texture>, layers: u32) -> Result<Arc<Texture>, GraphicsError> {
        let grown = create_array(
            &self.device,
            &self.name,
            old.width(),
            old.height(),
            layers,
            self.format,
        )?;
        grown.copy_layers_from(old)?;
        log::debug!(
            "ExpandableTextureArray: '{}' grew from {} to {} layers",
            self.name,
            old.layers(),
            layers
        );
        Ok(grown)
    }
}

fn create_array(
    device: &Arc<GraphicsDevice>,
    name: &str,
    width: u32,
    height: u32,
    layers: u32,
    format: TextureFormat,
) -> Result<Arc<Texture>, GraphicsError> {
    device.create_texture(
        &TextureDescriptor::new_2d_array(
            width,
            height,
            layers,
            format,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
        )
        .with_label(name),
    )
}

impl std::fmt::Debug for ExpandableTextureArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExpandableTextureArray")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("blocks", &state.packer.block_count())
            .field("layers", &state.texture.as_ref().map(|t| t.layers()))
            .finish()
    }
}

static_assertions::assert_impl_all!(ExpandableTextureArray: Send, Sync);
