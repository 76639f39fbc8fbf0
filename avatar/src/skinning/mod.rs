//! GPU skinning source data.
//!
//! Two variants build the data a GPU skinner reads:
//!
//! - [`ComputeSkinnedPrimitive`]: one packed raw buffer, see [`compute_buffer`]
//! - [`GpuSkinnedPrimitive`]: neutral pose, morph and joint textures, see [`texture`]
//!
//! Both run their build as a slice. The slice snapshots the staged arrays,
//! hands every encode to a background work unit and delays until the unit
//! finishes; only the uploads touch the device. The neutral pose is reported
//! through a callback as soon as it has been encoded, completion through a
//! second callback.

pub mod compute_buffer;
mod compute_primitive;
mod gpu_primitive;
pub mod morph;
pub mod precision;
pub mod texture;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use glam::{Vec3, Vec4};

use meshweave_core::compute::{
    CancellationToken, Cancelled, SliceContext, WorkError, WorkHandle, WorkPool, WorkProbe,
};

use crate::mesh_info::{BoneWeight, MeshInfo};

pub use compute_buffer::{BufferLayout, StaticMeshHeader, StaticMetaData};
pub use compute_primitive::ComputeSkinnedPrimitive;
pub use gpu_primitive::GpuSkinnedPrimitive;
pub use morph::{MorphAnalysis, MorphTargetInfo, VertexReorder};
pub use texture::{SourceTextureMetaData, optimal_texture_dimensions};

/// Callback run on the owning thread when a build stage completes.
pub type BuildCallback = Box<dyn FnOnce()>;

/// Data shared between a primitive and its skinning builders.
#[derive(Clone)]
pub struct SkinningInput {
    pub mesh_info: Rc<RefCell<MeshInfo>>,
    pub morph_targets: Arc<[MorphTargetInfo]>,
    pub joint_count: u32,
    /// Token of the owning load; builder units stop when it is cancelled.
    pub token: CancellationToken,
}

impl SkinningInput {
    pub fn is_skinned(&self) -> bool {
        self.joint_count > 0 && self.mesh_info.borrow().has_bone_weights()
    }

    /// Copy the staged arrays out so background units can read them.
    fn stage(&self, skinned: bool) -> StagedArrays {
        let info = self.mesh_info.borrow();
        StagedArrays {
            vertex_count: info.vertex_count(),
            has_tangents: info.has_tangents(),
            verts: info.verts().into(),
            normals: info.normals().into(),
            tangents: info.tangents().into(),
            bone_weights: if skinned {
                info.bone_weights().into()
            } else {
                Arc::from(Vec::new())
            },
        }
    }
}

/// Owned snapshot of a primitive's staged vertex arrays.
#[derive(Clone)]
struct StagedArrays {
    vertex_count: u32,
    has_tangents: bool,
    verts: Arc<[Vec3]>,
    normals: Arc<[Vec3]>,
    tangents: Arc<[Vec4]>,
    bone_weights: Arc<[BoneWeight]>,
}

/// Background units spawned by one skinning build.
struct BuildUnits {
    name: String,
    pool: Arc<WorkPool>,
    token: CancellationToken,
    probes: RefCell<Vec<WorkProbe>>,
}

impl BuildUnits {
    fn new(name: &str, pool: &Arc<WorkPool>, token: &CancellationToken) -> Self {
        Self {
            name: name.to_string(),
            pool: Arc::clone(pool),
            token: token.clone(),
            probes: RefCell::new(Vec::new()),
        }
    }

    fn spawn<T, F>(&self, label: &str, work: F) -> WorkHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> Result<T, WorkError> + Send + 'static,
    {
        let handle = self
            .pool
            .spawn(format!("{label}({})", self.name), &self.token, work);
        self.probes.borrow_mut().push(handle.probe());
        handle
    }

    fn pending(&self) -> usize {
        self.probes
            .borrow()
            .iter()
            .filter(|probe| !probe.status().is_finished())
            .count()
    }

    fn cancel(&self) {
        self.token.cancel();
    }

    /// Delay until `work` finishes and take its value.
    ///
    /// A faulted unit is logged and yields `None`.
    async fn finish<T>(
        &self,
        slice: &SliceContext,
        work: WorkHandle<T>,
    ) -> Result<Option<T>, Cancelled> {
        while !work.is_finished() {
            slice.delay().await;
        }
        match work.take() {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(WorkError::Cancelled)) | None => Err(Cancelled),
            Some(Err(err)) => {
                log::error!("{}: {} {err}", self.name, work.label());
                Ok(None)
            }
        }
    }
}

/// The two completion callbacks of a build, each fired at most once.
struct BuildStages {
    neutral_pose_ready: Option<BuildCallback>,
    finished: Option<BuildCallback>,
}

impl BuildStages {
    fn new(neutral_pose_ready: BuildCallback, finished: BuildCallback) -> Self {
        Self {
            neutral_pose_ready: Some(neutral_pose_ready),
            finished: Some(finished),
        }
    }

    fn neutral_pose_ready(&mut self) {
        if let Some(callback) = self.neutral_pose_ready.take() {
            callback();
        }
    }

    /// Fires the neutral pose callback first if a failed build skipped it.
    fn finished(&mut self) {
        self.neutral_pose_ready();
        if let Some(callback) = self.finished.take() {
            callback();
        }
    }
}
