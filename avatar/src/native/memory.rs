//! In-memory asset source.
//!
//! Holds fully decoded primitives and serves them through [`AssetSource`].
//! Individual calls can be made to fail with a chosen [`NativeError`], and a
//! [`Gate`] can block calls until a test releases them, which is how
//! cancellation while background units are still running is exercised.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Vec2, Vec3, Vec4};
use parking_lot::{Condvar, Mutex, RwLock};

use super::{
    AssetId, AssetSource, ImageInfo, JointInfo, MaterialTexture, NativeError, NativeResult,
    PrimitiveData, PrimitiveFlags, SubMesh,
};

const GATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocks named calls until opened.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: HashSet<String>,
    waiting: HashMap<String, usize>,
}

impl Gate {
    /// Block `call` until [`open`](Self::open) is called.
    pub fn close(&self, call: &str) {
        self.state.lock().closed.insert(call.to_string());
    }

    /// Release every caller blocked on `call`.
    pub fn open(&self, call: &str) {
        self.state.lock().closed.remove(call);
        self.changed.notify_all();
    }

    /// Number of callers currently blocked on `call`.
    pub fn waiting(&self, call: &str) -> usize {
        self.state.lock().waiting.get(call).copied().unwrap_or(0)
    }

    /// Waits while `call` is closed. Gives up with a failure after a timeout
    /// so a forgotten gate cannot hang a worker forever.
    fn pass(&self, call: &str) -> NativeResult<()> {
        let deadline = Instant::now() + GATE_TIMEOUT;
        let mut state = self.state.lock();
        if !state.closed.contains(call) {
            return Ok(());
        }
        *state.waiting.entry(call.to_string()).or_default() += 1;
        while state.closed.contains(call) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                log::warn!("MemoryAssetSource: gate '{call}' timed out");
                break;
            }
        }
        if let Some(count) = state.waiting.get_mut(call) {
            *count -= 1;
        }
        if state.closed.contains(call) {
            Err(NativeError::Failure { code: -1 })
        } else {
            Ok(())
        }
    }
}

/// One morph target.
#[derive(Debug, Clone, Default)]
pub struct MemoryMorphTarget {
    /// Name; `None` reports [`NativeError::NotFound`].
    pub name: Option<String>,
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub tangents: Option<Vec<Vec3>>,
}

impl MemoryMorphTarget {
    /// Target with position deltas only.
    pub fn new(name: impl Into<String>, positions: Vec<Vec3>) -> Self {
        Self {
            name: Some(name.into()),
            positions,
            normals: None,
            tangents: None,
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn with_tangents(mut self, tangents: Vec<Vec3>) -> Self {
        self.tangents = Some(tangents);
        self
    }
}

/// One image with its pixels.
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    pub info: ImageInfo,
    pub pixels: Vec<u8>,
}

/// A decoded primitive. Its id doubles as its vertex pool and morph buffer id.
#[derive(Debug, Clone, Default)]
pub struct MemoryPrimitive {
    pub id: AssetId,
    pub name: Option<String>,
    pub flags: PrimitiveFlags,
    pub indices: Vec<u32>,
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub tangents: Option<Vec<Vec4>>,
    pub colors: Option<Vec<Vec4>>,
    pub colors_ormt: Option<Vec<Vec4>>,
    pub tex_coords: Option<Vec<Vec2>>,
    pub sub_mesh_types: Option<Vec<f32>>,
    pub joint_indices: Option<Vec<[u16; 4]>>,
    pub joint_weights: Option<Vec<Vec4>>,
    pub joints: Vec<JointInfo>,
    pub morph_targets: Vec<MemoryMorphTarget>,
    pub sub_meshes: Vec<SubMesh>,
    pub textures: Vec<MaterialTexture>,
    pub images: Vec<MemoryImage>,
}

impl MemoryPrimitive {
    /// Primitive with a vertex pool and triangle list.
    pub fn new(id: AssetId, positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            id,
            positions,
            indices,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_flags(mut self, flags: PrimitiveFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn with_tangents(mut self, tangents: Vec<Vec4>) -> Self {
        self.tangents = Some(tangents);
        self
    }

    pub fn with_colors(mut self, colors: Vec<Vec4>) -> Self {
        self.colors = Some(colors);
        self
    }

    pub fn with_colors_ormt(mut self, colors: Vec<Vec4>) -> Self {
        self.colors_ormt = Some(colors);
        self
    }

    pub fn with_tex_coords(mut self, tex_coords: Vec<Vec2>) -> Self {
        self.tex_coords = Some(tex_coords);
        self
    }

    pub fn with_sub_mesh_types(mut self, types: Vec<f32>) -> Self {
        self.sub_mesh_types = Some(types);
        self
    }

    /// Skin the primitive with per-vertex joint indices and weights.
    pub fn with_skin(
        mut self,
        joints: Vec<JointInfo>,
        indices: Vec<[u16; 4]>,
        weights: Vec<Vec4>,
    ) -> Self {
        self.joints = joints;
        self.joint_indices = Some(indices);
        self.joint_weights = Some(weights);
        self
    }

    pub fn with_morph_target(mut self, target: MemoryMorphTarget) -> Self {
        self.morph_targets.push(target);
        self
    }

    pub fn with_sub_mesh(mut self, sub_mesh: SubMesh) -> Self {
        self.sub_meshes.push(sub_mesh);
        self
    }

    pub fn with_texture(mut self, texture: MaterialTexture) -> Self {
        self.textures.push(texture);
        self
    }

    pub fn with_image(mut self, image: MemoryImage) -> Self {
        self.images.push(image);
        self
    }

    /// Native description of this primitive.
    pub fn data(&self) -> PrimitiveData {
        PrimitiveData {
            id: self.id,
            vertex_buffer_id: self.id,
            morph_target_buffer_id: (!self.morph_targets.is_empty()).then_some(self.id),
            joint_count: self.joints.len() as u32,
            index_count: self.indices.len() as u32,
            texture_count: self.textures.len() as u32,
        }
    }

    fn bounds(&self) -> (Vec3, Vec3) {
        self.positions
            .iter()
            .fold(None, |acc: Option<(Vec3, Vec3)>, &p| match acc {
                Some((min, max)) => Some((min.min(p), max.max(p))),
                None => Some((p, p)),
            })
            .unwrap_or((Vec3::ZERO, Vec3::ZERO))
    }
}

/// [`AssetSource`] backed by decoded primitives held in memory.
#[derive(Default)]
pub struct MemoryAssetSource {
    resources: RwLock<HashMap<AssetId, Vec<AssetId>>>,
    primitives: RwLock<HashMap<AssetId, Arc<MemoryPrimitive>>>,
    failures: Mutex<HashMap<String, NativeError>>,
    gate: Gate,
    released: Mutex<Vec<AssetId>>,
    ready: Mutex<Vec<AssetId>>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a primitive to a resource, creating the resource if needed.
    pub fn add_primitive(&self, resource: AssetId, primitive: MemoryPrimitive) {
        let id = primitive.id;
        self.primitives.write().insert(id, Arc::new(primitive));
        self.resources.write().entry(resource).or_default().push(id);
    }

    /// Make every later `call` fail with `error`.
    pub fn fail(&self, call: &str, error: NativeError) {
        self.failures.lock().insert(call.to_string(), error);
    }

    /// Undo [`fail`](Self::fail).
    pub fn clear_failure(&self, call: &str) {
        self.failures.lock().remove(call);
    }

    /// Gate for blocking calls.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Resources released so far, in order.
    pub fn released(&self) -> Vec<AssetId> {
        self.released.lock().clone()
    }

    /// Resources reported ready to render, in order.
    pub fn ready(&self) -> Vec<AssetId> {
        self.ready.lock().clone()
    }

    fn enter(&self, call: &str) -> NativeResult<()> {
        self.gate.pass(call)?;
        match self.failures.lock().get(call) {
            Some(err) => Err(*err),
            None => Ok(()),
        }
    }

    fn primitive(&self, call: &str, id: AssetId) -> NativeResult<Arc<MemoryPrimitive>> {
        self.enter(call)?;
        self.primitives
            .read()
            .get(&id)
            .cloned()
            .ok_or(NativeError::NotFound)
    }

    fn channel<T: Clone>(
        &self,
        call: &str,
        id: AssetId,
        select: impl FnOnce(&MemoryPrimitive) -> Option<&Vec<T>>,
    ) -> NativeResult<Vec<T>> {
        let primitive = self.primitive(call, id)?;
        select(&primitive)
            .cloned()
            .ok_or(NativeError::DataNotAvailable)
    }

    fn morph<T>(
        &self,
        call: &str,
        id: AssetId,
        index: u32,
        select: impl FnOnce(&MemoryMorphTarget) -> NativeResult<T>,
    ) -> NativeResult<T> {
        let primitive = self.primitive(call, id)?;
        let target = primitive
            .morph_targets
            .get(index as usize)
            .ok_or(NativeError::NotFound)?;
        select(target)
    }
}

impl AssetSource for MemoryAssetSource {
    fn primitive_count(&self, resource: AssetId) -> NativeResult<u32> {
        self.enter("primitive_count")?;
        self.resources
            .read()
            .get(&resource)
            .map(|ids| ids.len() as u32)
            .ok_or(NativeError::NotFound)
    }

    fn primitive_by_index(&self, resource: AssetId, index: u32) -> NativeResult<PrimitiveData> {
        self.enter("primitive_by_index")?;
        let id = self
            .resources
            .read()
            .get(&resource)
            .and_then(|ids| ids.get(index as usize).copied())
            .ok_or(NativeError::NotFound)?;
        self.primitives
            .read()
            .get(&id)
            .map(|primitive| primitive.data())
            .ok_or(NativeError::NotFound)
    }

    fn primitive_name(&self, primitive: AssetId) -> NativeResult<String> {
        self.primitive("primitive_name", primitive)?
            .name
            .clone()
            .ok_or(NativeError::NotFound)
    }

    fn primitive_flags(&self, primitive: AssetId) -> NativeResult<PrimitiveFlags> {
        Ok(self.primitive("primitive_flags", primitive)?.flags)
    }

    fn vertex_count(&self, vertex_buffer: AssetId) -> NativeResult<u32> {
        Ok(self.primitive("vertex_count", vertex_buffer)?.positions.len() as u32)
    }

    fn morph_target_count(&self, morph_buffer: AssetId) -> NativeResult<u32> {
        Ok(self
            .primitive("morph_target_count", morph_buffer)?
            .morph_targets
            .len() as u32)
    }

    fn index_data(&self, primitive: AssetId) -> NativeResult<Vec<u32>> {
        Ok(self.primitive("index_data", primitive)?.indices.clone())
    }

    fn vertex_positions(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec3>> {
        Ok(self
            .primitive("vertex_positions", vertex_buffer)?
            .positions
            .clone())
    }

    fn vertex_normals(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec3>> {
        self.channel("vertex_normals", vertex_buffer, |p| p.normals.as_ref())
    }

    fn vertex_tangents(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec4>> {
        self.channel("vertex_tangents", vertex_buffer, |p| p.tangents.as_ref())
    }

    fn vertex_colors(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec4>> {
        self.channel("vertex_colors", vertex_buffer, |p| p.colors.as_ref())
    }

    fn vertex_colors_ormt(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec4>> {
        self.channel("vertex_colors_ormt", vertex_buffer, |p| {
            p.colors_ormt.as_ref()
        })
    }

    fn vertex_tex_coords(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec2>> {
        self.channel("vertex_tex_coords", vertex_buffer, |p| p.tex_coords.as_ref())
    }

    fn sub_mesh_types(&self, vertex_buffer: AssetId) -> NativeResult<Vec<f32>> {
        self.channel("sub_mesh_types", vertex_buffer, |p| {
            p.sub_mesh_types.as_ref()
        })
    }

    fn joint_indices(&self, vertex_buffer: AssetId) -> NativeResult<Vec<[u16; 4]>> {
        self.channel("joint_indices", vertex_buffer, |p| p.joint_indices.as_ref())
    }

    fn joint_weights(&self, vertex_buffer: AssetId) -> NativeResult<Vec<Vec4>> {
        self.channel("joint_weights", vertex_buffer, |p| p.joint_weights.as_ref())
    }

    fn morph_positions(&self, morph_buffer: AssetId, index: u32) -> NativeResult<Vec<Vec3>> {
        self.morph("morph_positions", morph_buffer, index, |t| {
            Ok(t.positions.clone())
        })
    }

    fn morph_normals(&self, morph_buffer: AssetId, index: u32) -> NativeResult<Vec<Vec3>> {
        self.morph("morph_normals", morph_buffer, index, |t| {
            t.normals.clone().ok_or(NativeError::DataNotAvailable)
        })
    }

    fn morph_tangents(&self, morph_buffer: AssetId, index: u32) -> NativeResult<Vec<Vec3>> {
        self.morph("morph_tangents", morph_buffer, index, |t| {
            t.tangents.clone().ok_or(NativeError::DataNotAvailable)
        })
    }

    fn morph_target_name(&self, morph_buffer: AssetId, index: u32) -> NativeResult<String> {
        self.morph("morph_target_name", morph_buffer, index, |t| {
            t.name.clone().ok_or(NativeError::NotFound)
        })
    }

    fn joint_info(&self, primitive: AssetId) -> NativeResult<Vec<JointInfo>> {
        Ok(self.primitive("joint_info", primitive)?.joints.clone())
    }

    fn min_max_position(&self, primitive: AssetId, skinned: bool) -> NativeResult<(Vec3, Vec3)> {
        let call = if skinned {
            "skinned_min_max_position"
        } else {
            "min_max_position"
        };
        Ok(self.primitive(call, primitive)?.bounds())
    }

    fn sub_meshes(&self, primitive: AssetId) -> NativeResult<Vec<SubMesh>> {
        Ok(self.primitive("sub_meshes", primitive)?.sub_meshes.clone())
    }

    fn material_texture(&self, primitive: AssetId, index: u32) -> NativeResult<MaterialTexture> {
        self.primitive("material_texture", primitive)?
            .textures
            .get(index as usize)
            .copied()
            .ok_or(NativeError::NotFound)
    }

    fn image_count(&self, primitive: AssetId) -> NativeResult<u32> {
        Ok(self.primitive("image_count", primitive)?.images.len() as u32)
    }

    fn image_by_index(&self, primitive: AssetId, index: u32) -> NativeResult<ImageInfo> {
        self.primitive("image_by_index", primitive)?
            .images
            .get(index as usize)
            .map(|image| image.info)
            .ok_or(NativeError::NotFound)
    }

    fn image_data(&self, primitive: AssetId, index: u32) -> NativeResult<Vec<u8>> {
        self.primitive("image_data", primitive)?
            .images
            .get(index as usize)
            .map(|image| image.pixels.clone())
            .ok_or(NativeError::NotFound)
    }

    fn release_resource(&self, resource: AssetId) {
        log::trace!("MemoryAssetSource: released resource {resource}");
        self.released.lock().push(resource);
    }

    fn resource_ready_to_render(&self, resource: AssetId) {
        self.ready.lock().push(resource);
    }
}

static_assertions::assert_impl_all!(MemoryAssetSource: Send, Sync);
