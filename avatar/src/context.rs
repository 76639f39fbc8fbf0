//! Shared pipeline services.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use meshweave_core::compute::{Slicer, WorkPool};
use meshweave_graphics::GraphicsDevice;

use crate::config::SkinningConfig;
use crate::error::AvatarResult;
use crate::image::AvatarImage;
use crate::native::{AssetId, AssetSource};

/// Everything a pipeline object needs, passed down explicitly.
///
/// The context lives on the device's owning thread; cloning it is cheap and
/// every clone shares the same slicer, worker pool and asset registry.
#[derive(Clone)]
pub struct PipelineContext {
    pub device: Arc<GraphicsDevice>,
    pub slicer: Slicer,
    pub pool: Arc<WorkPool>,
    pub source: Arc<dyn AssetSource>,
    pub config: Arc<SkinningConfig>,
    pub assets: AssetRegistry,
}

impl PipelineContext {
    /// Create a context with its own slicer and worker pool.
    pub fn new(
        device: Arc<GraphicsDevice>,
        source: Arc<dyn AssetSource>,
        mut config: SkinningConfig,
    ) -> AvatarResult<Self> {
        config.validate();
        let pool = WorkPool::new(config.worker_threads)?;
        let slicer = Slicer::with_budget(config.frame_budget());
        log::debug!(
            "PipelineContext: mode={:?}, budget={:?}, workers={}",
            config.skinning_mode,
            slicer.budget(),
            pool.thread_count()
        );
        Ok(Self {
            device,
            slicer,
            pool: Arc::new(pool),
            source,
            config: Arc::new(config),
            assets: AssetRegistry::default(),
        })
    }

    /// Largest texture edge honoured by both the config and the device.
    pub fn max_texture_dimension(&self) -> u32 {
        self.config
            .max_texture_dimension
            .min(self.device.capabilities().max_texture_dimension)
    }

    /// Whether compute buffers may be written block by block.
    pub fn use_partial_buffer_writes(&self) -> bool {
        self.config.partial_buffer_updates
            && self.device.capabilities().partial_writes_preserve_contents
    }
}

/// Images and primitive ids currently held by loaders.
#[derive(Clone, Default)]
pub struct AssetRegistry {
    inner: Rc<RefCell<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    images: HashMap<AssetId, AvatarImage>,
    primitives: HashSet<AssetId>,
}

impl AssetRegistry {
    /// Image with this id, if some loader created it.
    pub fn image(&self, id: AssetId) -> Option<AvatarImage> {
        self.inner.borrow().images.get(&id).cloned()
    }

    pub fn insert_image(&self, image: AvatarImage) {
        self.inner.borrow_mut().images.insert(image.id(), image);
    }

    pub fn remove_image(&self, id: AssetId) -> Option<AvatarImage> {
        self.inner.borrow_mut().images.remove(&id)
    }

    pub fn image_count(&self) -> usize {
        self.inner.borrow().images.len()
    }

    /// Claim a primitive id. Returns false if it is already held.
    pub fn claim_primitive(&self, id: AssetId) -> bool {
        self.inner.borrow_mut().primitives.insert(id)
    }

    pub fn release_primitive(&self, id: AssetId) {
        self.inner.borrow_mut().primitives.remove(&id);
    }

    pub fn has_primitive(&self, id: AssetId) -> bool {
        self.inner.borrow().primitives.contains(&id)
    }
}
