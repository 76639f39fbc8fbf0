use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use meshweave_core::compute::{SliceContext, SliceHandle, SliceResult};
use meshweave_graphics::{Buffer, BufferDescriptor, BufferUsage, GraphicsDevice, GraphicsError};

use crate::config::TexturePrecision;
use crate::context::PipelineContext;

use super::compute_buffer::{
    self, BufferLayout, ComputeBlocks, MorphBlockInfo, StaticMetaData, compute_layout,
    output_scale_bias,
};
use super::morph::{MorphAnalysis, VertexReorder};
use super::{BuildCallback, BuildStages, BuildUnits, SkinningInput};

struct ComputeState {
    name: String,
    units: BuildUnits,
    slice: RefCell<SliceHandle>,
    buffer: RefCell<Option<Arc<Buffer>>>,
    layout: Cell<Option<BufferLayout>>,
    meta: Cell<Option<StaticMetaData>>,
    disposed: Cell<bool>,
}

/// Compute-skinning source buffer of one primitive.
///
/// Loading starts on construction and finishes in a later scheduling pass.
/// Owners must call [`dispose`](Self::dispose) before dropping it.
pub struct ComputeSkinnedPrimitive {
    state: Rc<ComputeState>,
}

impl ComputeSkinnedPrimitive {
    pub fn new(
        ctx: &PipelineContext,
        name: impl Into<String>,
        input: SkinningInput,
        neutral_pose_ready: BuildCallback,
        finished: BuildCallback,
    ) -> Self {
        let name = name.into();
        let state = Rc::new(ComputeState {
            units: BuildUnits::new(&name, &ctx.pool, &input.token),
            name: name.clone(),
            slice: RefCell::new(SliceHandle::invalid()),
            buffer: RefCell::new(None),
            layout: Cell::new(None),
            meta: Cell::new(None),
            disposed: Cell::new(false),
        });
        let build = ComputeBuild {
            device: Arc::clone(&ctx.device),
            morph_precision: ctx.config.source_morph_format,
            output_precision: ctx.config.skinner_output_format,
            partial_writes: ctx.use_partial_buffer_writes(),
            state: Rc::clone(&state),
            input,
        };
        let handle = ctx.slicer.slice(format!("BuildComputeBuffers({name})"), move |slice| {
            build.run(slice, neutral_pose_ready, finished)
        });
        *state.slice.borrow_mut() = handle;
        Self { state }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Returns true while the build slice is still running.
    pub fn is_loading(&self) -> bool {
        self.state.slice.borrow().is_valid()
    }

    /// Background encode units that have not stopped yet.
    pub fn pending_task_count(&self) -> usize {
        self.state.units.pending()
    }

    pub fn buffer(&self) -> Option<Arc<Buffer>> {
        self.state.buffer.borrow().clone()
    }

    pub fn layout(&self) -> Option<BufferLayout> {
        self.state.layout.get()
    }

    pub fn meta_data(&self) -> Option<StaticMetaData> {
        self.state.meta.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.get()
    }

    /// Cancel a running build and its units, then release the buffer. Safe to repeat.
    pub fn dispose(&self) {
        let mut slice = self.state.slice.take();
        if slice.cancel() {
            self.state.units.cancel();
            log::debug!("{}: cancelled compute buffer build", self.state.name);
        }
        self.state.buffer.take();
        self.state.disposed.set(true);
    }
}

impl Drop for ComputeSkinnedPrimitive {
    fn drop(&mut self) {
        let mut slice = self.state.slice.take();
        if slice.is_valid() {
            log::error!("Build buffers slice still valid when finalized");
            slice.emergency_shutdown();
            self.state.units.cancel();
        }
    }
}

impl std::fmt::Debug for ComputeSkinnedPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeSkinnedPrimitive")
            .field("name", &self.state.name)
            .field("loading", &self.is_loading())
            .field("size", &self.layout().map(|l| l.total_size))
            .finish()
    }
}

struct ComputeBuild {
    device: Arc<GraphicsDevice>,
    morph_precision: TexturePrecision,
    output_precision: TexturePrecision,
    partial_writes: bool,
    state: Rc<ComputeState>,
    input: SkinningInput,
}

/// Output of the morph analysis unit.
struct MorphStage {
    reorder: Arc<VertexReorder>,
    num_affected: u32,
    morphs: Vec<u8>,
    morph_info: MorphBlockInfo,
}

impl ComputeBuild {
    async fn run(
        self,
        slice: SliceContext,
        neutral_pose_ready: BuildCallback,
        finished: BuildCallback,
    ) -> SliceResult {
        let mut stages = BuildStages::new(neutral_pose_ready, finished);
        self.build(&slice, &mut stages).await?;
        stages.finished();
        Ok(())
    }

    async fn build(&self, slice: &SliceContext, stages: &mut BuildStages) -> SliceResult {
        let name = &self.state.name;
        let units = &self.state.units;
        slice.stall().await;
        let skinned = self.input.is_skinned();
        let staged = self.input.stage(skinned);

        let work = {
            let staged = staged.clone();
            let targets = Arc::clone(&self.input.morph_targets);
            let precision = self.morph_precision;
            units.spawn("morph analysis", move |token| {
                meshweave_core::profile_scope!("compute_morph_analysis");
                let analysis = MorphAnalysis::new(&targets, staged.vertex_count);
                token.check()?;
                let reorder =
                    VertexReorder::new(staged.vertex_count, &analysis, &staged.bone_weights)?;
                token.check()?;
                let (morphs, morph_info) =
                    compute_buffer::encode_morphs(&targets, &analysis, &reorder, precision);
                Ok(MorphStage {
                    reorder: Arc::new(reorder),
                    num_affected: analysis.num_affected(),
                    morphs,
                    morph_info,
                })
            })
        };
        let Some(morph) = units.finish(slice, work).await? else {
            return Ok(());
        };
        if !self.input.morph_targets.is_empty() && morph.num_affected == 0 {
            log::debug!("Primitive ({name}) has morph targets, but no affected verts");
        }
        let reorder = Arc::clone(&morph.reorder);

        let work = {
            let staged = staged.clone();
            let reorder = Arc::clone(&reorder);
            units.spawn("neutral pose", move |token| {
                meshweave_core::profile_scope!("compute_neutral_pose");
                let positions = compute_buffer::encode_positions(&staged.verts, &reorder);
                token.check()?;
                let normals = compute_buffer::encode_normals(&staged.normals, &reorder);
                token.check()?;
                let tangents = if staged.has_tangents {
                    compute_buffer::encode_tangents(&staged.tangents, &reorder)
                } else {
                    Vec::new()
                };
                Ok((positions, normals, tangents))
            })
        };
        let Some((positions, normals, tangents)) = units.finish(slice, work).await? else {
            return Ok(());
        };
        stages.neutral_pose_ready();

        let work = units.spawn("joints", move |token| {
            let mut joints = (Vec::new(), Vec::new());
            if skinned {
                joints.0 = compute_buffer::encode_joint_weights(&staged.bone_weights, &reorder);
                token.check()?;
                joints.1 = compute_buffer::encode_joint_indices(&staged.bone_weights, &reorder);
            }
            Ok((joints, compute_buffer::encode_output_indices(&reorder)))
        });
        let Some(((joint_weights, joint_indices), output_indices)) =
            units.finish(slice, work).await?
        else {
            return Ok(());
        };

        let blocks = ComputeBlocks {
            positions,
            normals,
            tangents,
            morphs: morph.morphs,
            joint_weights,
            joint_indices,
            output_indices,
        };
        let morph_info = morph.morph_info;
        let layout = compute_layout(&blocks, &morph_info, self.output_precision);
        slice.stall().await;
        match self.create_buffer(&layout, &blocks) {
            Ok(buffer) => *self.state.buffer.borrow_mut() = Some(buffer),
            Err(err) => log::error!("{name}: failed to build compute buffer: {err}"),
        }

        let (scale, bias) = output_scale_bias(self.output_precision);
        self.state.layout.set(Some(layout));
        self.state.meta.set(Some(StaticMetaData {
            vertex_count: morph.reorder.vertex_count(),
            num_morph_targets: morph_info.num_morph_targets,
            num_morphed_verts: morph.num_affected,
            num_verts_no_joints_or_morphs: morph.reorder.num_static,
            position_output_scale: scale,
            position_output_bias: bias,
            joint_index_precision: TexturePrecision::Byte,
            input_position_precision: TexturePrecision::Float,
            morph_delta_precision: self.morph_precision,
            output_precision: self.output_precision,
            buffer_size: layout.total_size,
        }));
        log::trace!("{name}: compute buffer of {} bytes ready", layout.total_size);
        Ok(())
    }

    fn create_buffer(
        &self,
        layout: &BufferLayout,
        blocks: &ComputeBlocks,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        meshweave_core::profile_scope!("compute_buffer_upload");
        let buffer = self.device.create_buffer(
            &BufferDescriptor::new(
                u64::from(layout.total_size),
                BufferUsage::RAW | BufferUsage::STORAGE | BufferUsage::COPY_DST,
            )
            .with_label(format!("skinning({})", self.state.name)),
        )?;
        if self.partial_writes {
            compute_buffer::fill_partial(&buffer, layout, blocks)?;
        } else {
            compute_buffer::fill_single_shot(&buffer, layout, blocks)?;
        }
        Ok(buffer)
    }
}
