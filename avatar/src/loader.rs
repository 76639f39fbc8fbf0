//! Per-resource loading and the native status callback.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use meshweave_core::compute::{SliceContext, SliceHandle, SliceResult};

use crate::context::PipelineContext;
use crate::error::{AvatarError, AvatarResult};
use crate::image::AvatarImage;
use crate::native::{AssetId, AssetStatus, PrimitiveData, SubMeshInclusionFlags};
use crate::primitive::AvatarPrimitive;

/// Progress of a [`ResourceLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderState {
    Created,
    Loading,
    /// Every primitive and image has copied its data; the native side was
    /// told to release it.
    ResourceDataReleased,
    Loaded,
    Cancelled,
    /// The primitive list could not be read; nothing was loaded.
    Failed,
}

struct LoaderInner {
    ctx: PipelineContext,
    resource: AssetId,
    included: SubMeshInclusionFlags,
    state: Cell<LoaderState>,
    released: Cell<bool>,
    disposed: Cell<bool>,
    slice: RefCell<SliceHandle>,
    primitives: RefCell<Vec<AvatarPrimitive>>,
    images: RefCell<Vec<AvatarImage>>,
}

impl LoaderInner {
    fn release_native_resource(&self) {
        if self.released.replace(true) {
            return;
        }
        log::trace!("Releasing native resources for resource {}", self.resource);
        self.ctx.source.release_resource(self.resource);
    }

    /// Read the primitive list.
    fn enumerate_primitives(&self) -> AvatarResult<Vec<PrimitiveData>> {
        let source = &self.ctx.source;
        let count = source
            .primitive_count(self.resource)
            .map_err(|err| AvatarError::native("primitive_count", err))?;

        let mut primitives = Vec::with_capacity(count as usize);
        for index in 0..count {
            let data = source
                .primitive_by_index(self.resource, index)
                .map_err(|err| AvatarError::native("primitive_by_index", err))?;
            if self.ctx.assets.has_primitive(data.id) {
                log::warn!("Mesh primitive with id {} already exists.", data.id);
                continue;
            }
            primitives.push(data);
        }
        Ok(primitives)
    }

    fn primitive_count(&self) -> usize {
        self.primitives.borrow().len()
    }

    /// Returns true if primitive `index` no longer blocks the load.
    fn primitive_settled(&self, index: usize, done: impl Fn(&AvatarPrimitive) -> bool) -> bool {
        self.primitives.borrow().get(index).is_none_or(|primitive| {
            primitive.is_cancelled() || primitive.is_disposed() || done(primitive)
        })
    }

    /// Drop primitives that were cancelled or disposed by a fault.
    fn remove_failed_primitives(&self) {
        self.primitives.borrow_mut().retain(|primitive| {
            let failed = primitive.is_cancelled() || primitive.is_disposed();
            if failed {
                log::warn!(
                    "Resource {}: removing failed primitive {}",
                    self.resource,
                    primitive.name()
                );
            }
            !failed
        });
    }

    fn collect_images(&self) {
        let mut images: Vec<AvatarImage> = Vec::new();
        for primitive in self.primitives.borrow().iter() {
            for image in primitive.images() {
                if !images.iter().any(|known| known.id() == image.id()) {
                    images.push(image);
                }
            }
        }
        *self.images.borrow_mut() = images;
    }
}

/// Loads every primitive of one native resource.
///
/// Native data is released as soon as all primitives and images have copied
/// it out, before their graphics objects are built.
pub struct ResourceLoader {
    inner: Rc<LoaderInner>,
}

impl ResourceLoader {
    pub fn new(ctx: &PipelineContext, resource: AssetId, included: SubMeshInclusionFlags) -> Self {
        Self {
            inner: Rc::new(LoaderInner {
                ctx: ctx.clone(),
                resource,
                included,
                state: Cell::new(LoaderState::Created),
                released: Cell::new(false),
                disposed: Cell::new(false),
                slice: RefCell::new(SliceHandle::invalid()),
                primitives: RefCell::new(Vec::new()),
                images: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Queue the load slice. Does nothing unless the loader is new.
    pub fn start_load(&self) {
        if self.inner.state.get() != LoaderState::Created {
            log::warn!("Resource {}: load already started", self.inner.resource);
            return;
        }
        self.inner.state.set(LoaderState::Loading);
        let task = Rc::clone(&self.inner);
        let handle = self
            .inner
            .ctx
            .slicer
            .slice(format!("LoadResource({})", self.inner.resource), move |slice| {
                load_resource(task, slice)
            });
        *self.inner.slice.borrow_mut() = handle;
    }

    pub fn resource(&self) -> AssetId {
        self.inner.resource
    }

    pub fn state(&self) -> LoaderState {
        self.inner.state.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoaderState::Loaded
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == LoaderState::Cancelled
    }

    /// Returns true if the primitive list could not be read.
    pub fn is_failed(&self) -> bool {
        self.state() == LoaderState::Failed
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether the native side was told to release the resource data.
    pub fn has_released_native_resource(&self) -> bool {
        self.inner.released.get()
    }

    /// Returns false once the loader was cancelled, failed or disposed.
    pub fn can_load(&self) -> bool {
        !(self.is_cancelled() || self.is_failed() || self.is_disposed())
    }

    pub fn primitive_count(&self) -> usize {
        self.inner.primitive_count()
    }

    pub fn primitives(&self) -> std::cell::Ref<'_, [AvatarPrimitive]> {
        std::cell::Ref::map(self.inner.primitives.borrow(), Vec::as_slice)
    }

    pub fn images(&self) -> Vec<AvatarImage> {
        self.inner.images.borrow().clone()
    }

    /// Stop loading. Unreleased native data is released first.
    pub fn cancel(&self) {
        let inner = &self.inner;
        if matches!(inner.state.get(), LoaderState::Cancelled | LoaderState::Failed) {
            return;
        }
        inner.release_native_resource();

        let mut slice = inner.slice.take();
        if slice.is_valid() {
            log::trace!("Stopping load slice for resource {}", inner.resource);
            if !slice.cancel() {
                log::error!("Slice for resource {} failed to cancel", inner.resource);
            }
        }
        for primitive in inner.primitives.borrow().iter() {
            if !primitive.is_loaded() && !primitive.is_cancelled() {
                primitive.cancel();
            }
        }
        inner.state.set(LoaderState::Cancelled);
    }

    /// Cancel if needed and release every primitive and image.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.get() {
            return;
        }
        if inner.state.get() != LoaderState::Loaded {
            self.cancel();
        }
        inner.disposed.set(true);

        let primitives = inner.primitives.take();
        for primitive in &primitives {
            primitive.dispose();
        }
        drop(primitives);
        for image in inner.images.take() {
            inner.ctx.assets.remove_image(image.id());
            image.dispose();
        }
        log::debug!("Resource {}: disposed", inner.resource);
    }
}

impl Drop for ResourceLoader {
    fn drop(&mut self) {
        if !self.inner.disposed.get() {
            log::error!("Resource {} dropped without dispose", self.inner.resource);
            self.dispose();
        }
    }
}

impl std::fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("resource", &self.inner.resource)
            .field("state", &self.inner.state.get())
            .field("primitives", &self.inner.primitive_count())
            .finish()
    }
}

async fn load_resource(inner: Rc<LoaderInner>, slice: SliceContext) -> SliceResult {
    let resource = inner.resource;
    let primitives = match inner.enumerate_primitives() {
        Ok(primitives) => primitives,
        Err(err) => {
            log::error!("LoadResource Error: {err}");
            inner.release_native_resource();
            inner.slice.borrow_mut().clear();
            inner.state.set(LoaderState::Failed);
            return Ok(());
        }
    };
    for data in primitives {
        let primitive = AvatarPrimitive::load(&inner.ctx, data, inner.included);
        log::trace!("Mapped primitive id:{}", data.id);
        inner.primitives.borrow_mut().push(primitive);
        if slice.should_hold() {
            slice.hold().await;
        }
    }

    for index in 0..inner.primitive_count() {
        while !inner.primitive_settled(index, AvatarPrimitive::has_copied_all_resource_data) {
            slice.delay().await;
        }
    }
    inner.collect_images();
    let images = inner.images.borrow().clone();
    for image in &images {
        while !image.has_copied_data() {
            slice.delay().await;
        }
    }

    inner.release_native_resource();
    inner.state.set(LoaderState::ResourceDataReleased);
    if slice.should_hold() {
        slice.hold().await;
    }

    for index in 0..inner.primitive_count() {
        while !inner.primitive_settled(index, AvatarPrimitive::is_loaded) {
            slice.delay().await;
        }
    }
    for image in &images {
        while !image.is_finished() {
            slice.delay().await;
        }
    }

    inner.remove_failed_primitives();
    inner.slice.borrow_mut().clear();
    inner.ctx.source.resource_ready_to_render(resource);
    inner.state.set(LoaderState::Loaded);
    log::debug!(
        "Resource {resource}: loaded {} primitive(s), {} image(s)",
        inner.primitive_count(),
        images.len()
    );
    Ok(())
}

/// Keeps one [`ResourceLoader`] per native resource.
pub struct ResourceManager {
    ctx: PipelineContext,
    included: SubMeshInclusionFlags,
    loaders: HashMap<AssetId, ResourceLoader>,
    shutting_down: bool,
}

impl ResourceManager {
    /// `included` selects the sub-mesh categories every primitive keeps.
    pub fn new(ctx: &PipelineContext, included: SubMeshInclusionFlags) -> Self {
        Self {
            ctx: ctx.clone(),
            included,
            loaders: HashMap::new(),
            shutting_down: false,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// React to a native resource status notification.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::UnsupportedStatus`] for resource updates.
    pub fn handle_status(&mut self, resource: AssetId, status: AssetStatus) -> AvatarResult<()> {
        log::trace!("Received resource callback {resource} with status {status:?}");
        match status {
            AssetStatus::Loaded => {
                if self.loaders.contains_key(&resource) {
                    log::debug!("Resource id: {resource} already loaded");
                    return Ok(());
                }
                let loader = ResourceLoader::new(&self.ctx, resource, self.included);
                loader.start_load();
                self.loaders.insert(resource, loader);
                log::debug!("Mapped resource id:{resource}");
            }
            AssetStatus::Unloaded => match self.loaders.remove(&resource) {
                Some(loader) => loader.dispose(),
                None => log::warn!("Unable to unload resource id:{resource}, not found"),
            },
            AssetStatus::LoadFailed => {
                if self.shutting_down {
                    return Ok(());
                }
                log::error!("Failed to load resource {resource}");
                if let Some(loader) = self.loaders.remove(&resource) {
                    loader.dispose();
                }
            }
            AssetStatus::Updated => return Err(AvatarError::UnsupportedStatus(status)),
        }
        Ok(())
    }

    pub fn loader(&self, resource: AssetId) -> Option<&ResourceLoader> {
        self.loaders.get(&resource)
    }

    pub fn loader_count(&self) -> usize {
        self.loaders.len()
    }

    /// Returns true once the resource's loader reached [`LoaderState::Loaded`].
    pub fn is_loaded(&self, resource: AssetId) -> bool {
        self.loaders.get(&resource).is_some_and(ResourceLoader::is_loaded)
    }

    /// Dispose every loader and drop all queued slices.
    pub fn shutdown(&mut self) {
        self.shutting_down = true;
        for (_, loader) in self.loaders.drain() {
            loader.dispose();
        }
        self.ctx.slicer.cancel_all();
        log::debug!("ResourceManager: shut down");
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if !self.loaders.is_empty() {
            self.shutdown();
        }
    }
}

