//! Mesh and material loading for one native primitive.
//!
//! An [`AvatarPrimitive`] drives two slices in parallel: one loads the
//! geometry and starts the GPU skinning builders, the other builds the
//! material. Native data is fetched by background work units that share
//! one [`CancellationToken`]; everything touching the graphics device runs
//! inside the slices on the owning thread.
//!
//! ```text
//! LoadMesh     triangles -> attributes | morph targets | joints -> MeshInfo -> builders -> mesh
//! LoadMaterial textures + images -> image loads -> material
//! ```

mod material_load;
mod mesh_load;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use bitflags::bitflags;

use meshweave_core::compute::{
    CancellationToken, Cancelled, SliceContext, SliceHandle, WorkError, WorkHandle, WorkProbe,
};
use meshweave_graphics::{Buffer, Material, Mesh};

use crate::context::PipelineContext;
use crate::image::AvatarImage;
use crate::mesh_info::MeshInfo;
use crate::native::{AssetId, PrimitiveData, PrimitiveFlags, SubMeshInclusionFlags, optional};
use crate::skinning::{
    ComputeSkinnedPrimitive, GpuSkinnedPrimitive, SourceTextureMetaData, StaticMetaData,
};
use crate::vertex_format::VertexFormat;

bitflags! {
    /// Independent completion flags; a primitive is loaded when all are set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoadFlags: u8 {
        /// Name and flags were read.
        const BASE = 1 << 0;
        const MESH = 1 << 1;
        const MATERIAL = 1 << 2;
        /// Skinning builders finished, or none were needed.
        const GPU_SKINNING = 1 << 3;
    }
}

pub(crate) struct PrimitiveInner {
    ctx: PipelineContext,
    data: PrimitiveData,
    name: String,
    flags: PrimitiveFlags,
    included: SubMeshInclusionFlags,
    token: CancellationToken,
    probes: RefCell<Vec<WorkProbe>>,
    mesh_slice: RefCell<SliceHandle>,
    material_slice: RefCell<SliceHandle>,
    loaded: Cell<LoadFlags>,
    copied: Cell<LoadFlags>,
    cancelled: Cell<bool>,
    cancel_pending: Cell<bool>,
    disposed: Cell<bool>,
    mesh_info: Rc<RefCell<MeshInfo>>,
    mesh: RefCell<Option<Arc<Mesh>>>,
    material: RefCell<Option<Arc<Material>>>,
    vertex_format: Cell<VertexFormat>,
    morph_target_count: Cell<u32>,
    compute: RefCell<Option<ComputeSkinnedPrimitive>>,
    gpu: RefCell<Option<GpuSkinnedPrimitive>>,
    images: RefCell<Vec<AvatarImage>>,
}

impl PrimitiveInner {
    fn set_loaded(&self, flag: LoadFlags) {
        self.loaded.set(self.loaded.get() | flag);
    }

    fn set_copied(&self, flag: LoadFlags) {
        self.copied.set(self.copied.get() | flag);
    }

    fn needs_gpu_skinning(&self) -> bool {
        let mode = self.ctx.config.skinning_mode;
        !mode.is_engine()
            && (self.data.joint_count > 0 || self.data.morph_target_buffer_id.is_some())
    }

    /// Spawn a background unit tied to this primitive's token.
    fn spawn<T, F>(&self, label: &str, work: F) -> WorkHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> Result<T, WorkError> + Send + 'static,
    {
        let handle = self
            .ctx
            .pool
            .spawn(format!("{label}({})", self.name), &self.token, work);
        self.probes.borrow_mut().push(handle.probe());
        handle
    }

    fn all_tasks_finished(&self) -> bool {
        self.pending_task_count() == 0
    }

    /// Running units of this primitive and of its skinning builders.
    fn pending_task_count(&self) -> usize {
        let own = self
            .probes
            .borrow()
            .iter()
            .filter(|probe| !probe.status().is_finished())
            .count();
        let compute = self.compute.borrow().as_ref().map_or(0, |c| c.pending_task_count());
        let gpu = self.gpu.borrow().as_ref().map_or(0, |g| g.pending_task_count());
        own + compute + gpu
    }

    /// Delay until `work` finishes and take its value.
    ///
    /// A faulted unit disposes the primitive on the next pass and cancels
    /// the calling slice.
    async fn finish<T>(
        self: &Rc<Self>,
        slice: &SliceContext,
        work: WorkHandle<T>,
    ) -> Result<T, Cancelled> {
        while !work.is_finished() {
            slice.delay().await;
        }
        match work.take() {
            Some(Ok(value)) => Ok(value),
            Some(Err(WorkError::Cancelled)) | None => Err(Cancelled),
            Some(Err(err)) => {
                log::error!("{}: {} {err}", self.name, work.label());
                log::error!("Task fault detected! Disposing resource.");
                self.post_dispose();
                Err(Cancelled)
            }
        }
    }

    fn post_dispose(self: &Rc<Self>) {
        let inner = Rc::clone(self);
        let mut handle = self
            .ctx
            .slicer
            .slice(format!("DisposePrimitive({})", self.name), move |_| async move {
                inner.dispose();
                Ok(())
            });
        handle.clear();
    }

    fn cancel(self: &Rc<Self>) -> bool {
        if self.cancelled.get() {
            log::error!("Double cancelled primitive {}", self.name);
            return false;
        }
        self.cancelled.set(true);
        self.token.cancel();

        let mut mesh_slice = self.mesh_slice.take();
        let mut material_slice = self.material_slice.take();
        mesh_slice.cancel();
        material_slice.cancel();

        if self.all_tasks_finished() {
            self.finish_cancel();
        } else {
            self.cancel_pending.set(true);
            log::debug!(
                "{}: waiting for {} background unit(s) before cancelling",
                self.name,
                self.pending_task_count()
            );
            let inner = Rc::clone(self);
            let mut handle = self.ctx.slicer.slice(
                format!("FinishCancel({})", self.name),
                move |slice| async move {
                    while !inner.all_tasks_finished() {
                        slice.delay().await;
                    }
                    inner.finish_cancel();
                    Ok(())
                },
            );
            handle.clear();
        }
        true
    }

    fn finish_cancel(&self) {
        self.cancel_pending.set(false);
        self.dispose_skinning();
        {
            let mut info = self.mesh_info.borrow_mut();
            info.cancelled_build_primitives();
            info.mesh_verts_complete();
            info.mesh_normals_complete();
            info.mesh_tangents_complete();
            info.mesh_bone_weights_complete();
            info.clear_mesh_data();
        }
        self.probes.borrow_mut().clear();
        log::debug!("{}: load cancelled", self.name);
    }

    fn dispose_skinning(&self) {
        if let Some(compute) = self.compute.take() {
            compute.dispose();
        }
        if let Some(gpu) = self.gpu.take() {
            gpu.dispose();
        }
    }

    fn dispose(self: &Rc<Self>) {
        if self.disposed.get() {
            return;
        }
        if !self.cancelled.get() && !self.is_loaded() {
            self.cancel();
        }
        self.disposed.set(true);
        self.dispose_skinning();
        self.mesh.take();
        self.material.take();
        self.images.take();
        self.ctx.assets.release_primitive(self.data.id);
        log::trace!("{}: disposed", self.name);
    }

    fn is_loaded(&self) -> bool {
        self.loaded.get() == LoadFlags::all()
    }
}

/// A mesh primitive with its material and GPU skinning data.
///
/// Dropping the primitive disposes it.
pub struct AvatarPrimitive {
    inner: Rc<PrimitiveInner>,
}

impl AvatarPrimitive {
    /// Read the primitive's metadata and start loading it.
    ///
    /// `included` selects the sub-mesh categories whose triangles are kept.
    pub fn load(ctx: &PipelineContext, data: PrimitiveData, included: SubMeshInclusionFlags) -> Self {
        let source = &ctx.source;
        let name = optional("primitive_name", source.primitive_name(data.id));
        let name = if name.is_empty() {
            format!("Mesh{}", data.id)
        } else {
            name
        };
        let flags = optional("primitive_flags", source.primitive_flags(data.id));
        if !ctx.assets.claim_primitive(data.id) {
            log::warn!("{name}: primitive {} is already loading", data.id);
        }

        let inner = Rc::new(PrimitiveInner {
            ctx: ctx.clone(),
            data,
            name,
            flags,
            included,
            token: CancellationToken::new(),
            probes: RefCell::new(Vec::new()),
            mesh_slice: RefCell::new(SliceHandle::invalid()),
            material_slice: RefCell::new(SliceHandle::invalid()),
            loaded: Cell::new(LoadFlags::BASE),
            copied: Cell::new(LoadFlags::empty()),
            cancelled: Cell::new(false),
            cancel_pending: Cell::new(false),
            disposed: Cell::new(false),
            mesh_info: Rc::new(RefCell::new(MeshInfo::new())),
            mesh: RefCell::new(None),
            material: RefCell::new(None),
            vertex_format: Cell::new(VertexFormat::empty()),
            morph_target_count: Cell::new(0),
            compute: RefCell::new(None),
            gpu: RefCell::new(None),
            images: RefCell::new(Vec::new()),
        });
        if !inner.needs_gpu_skinning() {
            inner.set_loaded(LoadFlags::GPU_SKINNING);
        }

        let task = Rc::clone(&inner);
        let mesh = ctx.slicer.slice(format!("LoadMesh({})", inner.name), move |slice| {
            mesh_load::load_mesh(task, slice)
        });
        *inner.mesh_slice.borrow_mut() = mesh;

        let task = Rc::clone(&inner);
        let material = ctx
            .slicer
            .slice(format!("LoadMaterial({})", inner.name), move |slice| {
                material_load::load_material(task, slice)
            });
        *inner.material_slice.borrow_mut() = material;

        log::debug!(
            "{}: loading primitive {} (lod {:?}, mode {:?})",
            inner.name,
            data.id,
            flags.lod.lowest_index(),
            ctx.config.skinning_mode
        );
        Self { inner }
    }

    pub fn id(&self) -> AssetId {
        self.inner.data.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn data(&self) -> &PrimitiveData {
        &self.inner.data
    }

    pub fn flags(&self) -> PrimitiveFlags {
        self.inner.flags
    }

    /// Lowest level of detail the primitive belongs to.
    pub fn lod_index(&self) -> Option<u32> {
        self.inner.flags.lod.lowest_index()
    }

    pub fn load_flags(&self) -> LoadFlags {
        self.inner.loaded.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }

    /// Returns true once every native buffer has been copied out.
    pub fn has_copied_all_resource_data(&self) -> bool {
        self.inner
            .copied
            .get()
            .contains(LoadFlags::MESH | LoadFlags::MATERIAL)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Returns true while cancellation waits for background units.
    pub fn is_cancel_pending(&self) -> bool {
        self.inner.cancel_pending.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn pending_task_count(&self) -> usize {
        self.inner.pending_task_count()
    }

    /// Returns true while any staged vertex array is still held.
    pub fn has_staging_data(&self) -> bool {
        let info = self.inner.mesh_info.borrow();
        info.has_verts() || info.has_normals() || info.has_tangent_array() || info.has_bone_weights()
    }

    pub fn vertex_format(&self) -> VertexFormat {
        self.inner.vertex_format.get()
    }

    /// Morph targets the renderer should drive; 0 when none moves a vertex.
    pub fn morph_target_count(&self) -> u32 {
        self.inner.morph_target_count.get()
    }

    pub fn mesh(&self) -> Option<Arc<Mesh>> {
        self.inner.mesh.borrow().clone()
    }

    pub fn material(&self) -> Option<Arc<Material>> {
        self.inner.material.borrow().clone()
    }

    pub fn images(&self) -> Vec<AvatarImage> {
        self.inner.images.borrow().clone()
    }

    pub fn skinning_buffer(&self) -> Option<Arc<Buffer>> {
        self.inner.compute.borrow().as_ref().and_then(|c| c.buffer())
    }

    pub fn compute_meta_data(&self) -> Option<StaticMetaData> {
        self.inner.compute.borrow().as_ref().and_then(|c| c.meta_data())
    }

    pub fn source_texture_meta_data(&self) -> Option<SourceTextureMetaData> {
        self.inner.gpu.borrow().as_ref().and_then(|g| g.meta_data())
    }

    /// Stop loading.
    ///
    /// Returns false if the primitive was already cancelled; a second
    /// cancel is logged as an error and does nothing.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Cancel if still loading and release every resource. Safe to repeat.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Drop for AvatarPrimitive {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl std::fmt::Debug for AvatarPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarPrimitive")
            .field("name", &self.inner.name)
            .field("id", &self.inner.data.id)
            .field("loaded", &self.inner.loaded.get())
            .field("cancelled", &self.inner.cancelled.get())
            .finish()
    }
}
