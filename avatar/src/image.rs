//! Image assets shared by primitive materials.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use meshweave_core::compute::{
    CancellationToken, Cancelled, SliceContext, SliceHandle, SliceResult, WorkError,
};
use meshweave_graphics::{Texture, TextureDescriptor, TextureFormat, TextureRegion, TextureUsage};

use crate::context::PipelineContext;
use crate::error::AvatarError;
use crate::native::{AssetId, ImageFormat, ImageInfo};

/// Load progress of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageState {
    Loading,
    Loaded,
    Failed,
    Cancelled,
}

impl ImageState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Loading)
    }
}

struct ImageInner {
    info: ImageInfo,
    name: String,
    token: CancellationToken,
    slice: RefCell<SliceHandle>,
    texture: RefCell<Option<Arc<Texture>>>,
    state: Cell<ImageState>,
    copied: Cell<bool>,
}

/// A texture loaded from a native image.
///
/// Pixels are fetched on a worker thread, then the texture is created on
/// the owning thread. Clones share the same image.
#[derive(Clone)]
pub struct AvatarImage {
    inner: Rc<ImageInner>,
}

impl AvatarImage {
    /// Start loading image `index` of `primitive`.
    pub fn load(ctx: &PipelineContext, primitive: AssetId, index: u32, info: ImageInfo) -> Self {
        let name = format!("{}:{}-{:?}", info.id, index, info.format);
        let inner = Rc::new(ImageInner {
            info,
            name: name.clone(),
            token: CancellationToken::new(),
            slice: RefCell::new(SliceHandle::invalid()),
            texture: RefCell::new(None),
            state: Cell::new(ImageState::Loading),
            copied: Cell::new(false),
        });
        let task = Rc::clone(&inner);
        let ctx_clone = ctx.clone();
        let handle = ctx.slicer.slice(format!("LoadImage({name})"), move |slice| {
            load_image(ctx_clone, task, primitive, index, slice)
        });
        *inner.slice.borrow_mut() = handle;
        Self { inner }
    }

    pub fn id(&self) -> AssetId {
        self.inner.info.id
    }

    pub fn info(&self) -> &ImageInfo {
        &self.inner.info
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ImageState {
        self.inner.state.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ImageState::Loaded
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Returns true once the native pixels are no longer needed.
    pub fn has_copied_data(&self) -> bool {
        self.inner.copied.get() || self.is_finished()
    }

    pub fn texture(&self) -> Option<Arc<Texture>> {
        self.inner.texture.borrow().clone()
    }

    /// Stop loading. A loaded image keeps its texture.
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        self.inner.token.cancel();
        let mut slice = self.inner.slice.take();
        slice.cancel();
        self.inner.state.set(ImageState::Cancelled);
        log::debug!("Image {}: load cancelled", self.inner.name);
    }

    /// Cancel and release the texture.
    pub fn dispose(&self) {
        self.cancel();
        self.inner.texture.take();
    }
}

impl std::fmt::Debug for AvatarImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarImage")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

fn texture_format(format: ImageFormat) -> Option<TextureFormat> {
    match format {
        ImageFormat::Rgba32 => Some(TextureFormat::Rgba8UnormSrgb),
        ImageFormat::R8 => Some(TextureFormat::R8Unorm),
        ImageFormat::Invalid => None,
    }
}

async fn load_image(
    ctx: PipelineContext,
    image: Rc<ImageInner>,
    primitive: AssetId,
    index: u32,
    slice: SliceContext,
) -> SliceResult {
    let name = image.name.clone();
    let Some(format) = texture_format(image.info.format) else {
        log::error!("Image {name}: invalid image format");
        image.state.set(ImageState::Failed);
        return Ok(());
    };

    let source = Arc::clone(&ctx.source);
    let expected = image.info.width as usize * image.info.height as usize
        * format.block_size() as usize;
    let work = ctx.pool.spawn(format!("image {name}"), &image.token, move |token| {
        token.check()?;
        let mut pixels = source
            .image_data(primitive, index)
            .map_err(|err| AvatarError::native("image_data", err))?;
        if pixels.len() < expected {
            return Err(WorkError::Failed(format!(
                "image data holds {} bytes, expected {expected}",
                pixels.len()
            )));
        }
        pixels.truncate(expected);
        Ok(pixels)
    });

    while !work.is_finished() {
        slice.delay().await;
    }
    image.copied.set(true);
    let pixels = match work.take() {
        Some(Ok(pixels)) => pixels,
        Some(Err(WorkError::Cancelled)) => {
            image.state.set(ImageState::Cancelled);
            return Err(Cancelled);
        }
        other => {
            let err = other
                .and_then(Result::err)
                .unwrap_or_else(|| WorkError::Failed("result already taken".into()));
            log::error!("Image {name}: failed to load pixels: {err}");
            image.state.set(ImageState::Failed);
            return Ok(());
        }
    };

    slice.stall().await;
    let info = image.info;
    let created = ctx
        .device
        .create_texture(
            &TextureDescriptor::new_2d(
                info.width,
                info.height,
                format,
                TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            )
            .with_label(name.clone()),
        )
        .and_then(|texture| {
            texture.write_region(TextureRegion::new(0, 0, 0, info.width, info.height), &pixels)?;
            Ok(texture)
        });
    match created {
        Ok(texture) => {
            *image.texture.borrow_mut() = Some(texture);
            image.state.set(ImageState::Loaded);
            log::trace!("Image {name}: loaded {}x{}", info.width, info.height);
        }
        Err(err) => {
            log::error!("Image {name}: failed to create texture: {err}");
            image.state.set(ImageState::Failed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_formats_map_to_textures() {
        assert_eq!(texture_format(ImageFormat::Rgba32), Some(TextureFormat::Rgba8UnormSrgb));
        assert_eq!(texture_format(ImageFormat::R8), Some(TextureFormat::R8Unorm));
        assert_eq!(texture_format(ImageFormat::Invalid), None);
    }

    #[test]
    fn only_loading_is_unfinished() {
        assert!(!ImageState::Loading.is_finished());
        assert!(ImageState::Failed.is_finished());
        assert!(ImageState::Cancelled.is_finished());
    }
}
