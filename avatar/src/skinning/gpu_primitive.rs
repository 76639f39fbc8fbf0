use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use meshweave_core::compute::{SliceContext, SliceHandle, SliceResult};
use meshweave_graphics::{ExpandableTextureArray, GraphicsDevice, TextureLayout};

use crate::config::TexturePrecision;
use crate::context::PipelineContext;

use super::morph::MorphAnalysis;
use super::texture::{self, SourceTextureMetaData, TextureBlock};
use super::{BuildCallback, BuildStages, BuildUnits, SkinningInput};

struct TextureState {
    name: String,
    units: BuildUnits,
    slice: RefCell<SliceHandle>,
    neutral_pose: RefCell<Option<ExpandableTextureArray>>,
    morph_targets: RefCell<Option<ExpandableTextureArray>>,
    joints: RefCell<Option<ExpandableTextureArray>>,
    meta: RefCell<Option<SourceTextureMetaData>>,
}

impl TextureState {
    fn destroy_arrays(&self) {
        for array in [&self.neutral_pose, &self.morph_targets, &self.joints] {
            if let Some(array) = array.take() {
                array.destroy();
            }
        }
    }
}

/// Texture-skinning source textures of one primitive.
///
/// Owners must call [`dispose`](Self::dispose) before dropping it.
pub struct GpuSkinnedPrimitive {
    state: Rc<TextureState>,
}

impl GpuSkinnedPrimitive {
    pub fn new(
        ctx: &PipelineContext,
        name: impl Into<String>,
        input: SkinningInput,
        neutral_pose_ready: BuildCallback,
        finished: BuildCallback,
    ) -> Self {
        let name = name.into();
        let state = Rc::new(TextureState {
            units: BuildUnits::new(&name, &ctx.pool, &input.token),
            name: name.clone(),
            slice: RefCell::new(SliceHandle::invalid()),
            neutral_pose: RefCell::new(None),
            morph_targets: RefCell::new(None),
            joints: RefCell::new(None),
            meta: RefCell::new(None),
        });
        let config = &ctx.config;
        let build = TextureBuild {
            device: Arc::clone(&ctx.device),
            max_dimension: ctx.max_texture_dimension(),
            neutral_precision: texture::float_precision(config.neutral_pose_format, "neutral pose"),
            morph_precision: config.source_morph_format,
            joints_precision: texture::float_precision(config.joints_format, "joints"),
            state: Rc::clone(&state),
            input,
        };
        let handle = ctx.slicer.slice(format!("BuildSourceTextures({name})"), move |slice| {
            build.run(slice, neutral_pose_ready, finished)
        });
        *state.slice.borrow_mut() = handle;
        Self { state }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn is_loading(&self) -> bool {
        self.state.slice.borrow().is_valid()
    }

    /// Background encode units that have not stopped yet.
    pub fn pending_task_count(&self) -> usize {
        self.state.units.pending()
    }

    pub fn meta_data(&self) -> Option<SourceTextureMetaData> {
        self.state.meta.borrow().clone()
    }

    pub fn neutral_pose_texture(&self) -> Option<Arc<meshweave_graphics::Texture>> {
        self.state.neutral_pose.borrow().as_ref().and_then(|a| a.texture())
    }

    pub fn morph_target_texture(&self) -> Option<Arc<meshweave_graphics::Texture>> {
        self.state.morph_targets.borrow().as_ref().and_then(|a| a.texture())
    }

    pub fn joints_texture(&self) -> Option<Arc<meshweave_graphics::Texture>> {
        self.state.joints.borrow().as_ref().and_then(|a| a.texture())
    }

    /// Cancel a running build and destroy the texture arrays. Safe to repeat.
    pub fn dispose(&self) {
        let mut slice = self.state.slice.take();
        if slice.cancel() {
            self.state.units.cancel();
            log::debug!("{}: cancelled source texture build", self.state.name);
        }
        self.state.destroy_arrays();
    }
}

impl Drop for GpuSkinnedPrimitive {
    fn drop(&mut self) {
        let mut slice = self.state.slice.take();
        if slice.is_valid() {
            log::error!("Build texture slice still valid when finalized");
            slice.emergency_shutdown();
            self.state.units.cancel();
        }
    }
}

impl std::fmt::Debug for GpuSkinnedPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuSkinnedPrimitive")
            .field("name", &self.state.name)
            .field("loading", &self.is_loading())
            .finish()
    }
}

struct TextureBuild {
    device: Arc<GraphicsDevice>,
    max_dimension: u32,
    neutral_precision: TexturePrecision,
    morph_precision: TexturePrecision,
    joints_precision: TexturePrecision,
    state: Rc<TextureState>,
    input: SkinningInput,
}

impl TextureBuild {
    async fn run(
        self,
        slice: SliceContext,
        neutral_pose_ready: BuildCallback,
        finished: BuildCallback,
    ) -> SliceResult {
        let mut stages = BuildStages::new(neutral_pose_ready, finished);
        let mut meta = SourceTextureMetaData {
            neutral_pose_precision: self.neutral_precision,
            morph_precision: self.morph_precision,
            joints_precision: self.joints_precision,
            ..SourceTextureMetaData::default()
        };
        self.build(&slice, &mut stages, &mut meta).await?;
        *self.state.meta.borrow_mut() = Some(meta);
        log::trace!("{}: source textures ready", self.state.name);
        stages.finished();
        Ok(())
    }

    async fn build(
        &self,
        slice: &SliceContext,
        stages: &mut BuildStages,
        meta: &mut SourceTextureMetaData,
    ) -> SliceResult {
        let name = &self.state.name;
        let units = &self.state.units;
        let max_dimension = self.max_dimension;

        slice.stall().await;
        let skinned = self.input.is_skinned();
        let staged = self.input.stage(skinned);
        meta.vertex_count = staged.vertex_count;
        meta.has_tangents = staged.has_tangents;

        let neutral = (staged.vertex_count > 0).then(|| {
            let staged = staged.clone();
            let precision = self.neutral_precision;
            units.spawn("neutral pose", move |_| {
                meshweave_core::profile_scope!("encode_neutral_pose");
                Ok(texture::encode_neutral_pose(
                    &staged.verts,
                    &staged.normals,
                    &staged.tangents,
                    staged.has_tangents,
                    precision,
                    max_dimension,
                ))
            })
        });
        let neutral = match neutral {
            Some(work) => units.finish(slice, work).await?,
            None => None,
        };
        stages.neutral_pose_ready();
        if let Some(block) = neutral {
            meta.layout_in_neutral_pose_tex =
                self.upload(&format!("neutral({name})"), &block, &self.state.neutral_pose);
        }

        let targets = &self.input.morph_targets;
        if !targets.is_empty() {
            let work = {
                let targets = Arc::clone(targets);
                let precision = self.morph_precision;
                let vertex_count = staged.vertex_count;
                units.spawn("morph targets", move |token| {
                    meshweave_core::profile_scope!("encode_morph_targets");
                    let analysis = MorphAnalysis::new(&targets, vertex_count);
                    token.check()?;
                    let block =
                        texture::encode_morph_targets(&targets, &analysis, precision, max_dimension);
                    Ok((analysis, block))
                })
            };
            let Some((analysis, block)) = units.finish(slice, work).await? else {
                return Ok(());
            };
            meta.num_morph_targets = targets.len() as u32;
            meta.position_range = analysis.position_range;
            meta.normal_range = analysis.normal_range;
            meta.tangent_range = analysis.tangent_range;
            match block {
                Some(block) => {
                    meta.layout_in_morph_targets_tex =
                        self.upload(&format!("morphSrc({name})"), &block, &self.state.morph_targets);
                    meta.num_morph_target_affected_verts = analysis.num_affected();
                    meta.mesh_vertex_to_affected_index = analysis.vertex_to_affected;
                }
                None => {
                    log::debug!("Primitive ({name}) has morph target, but no affected verts");
                }
            }
        }

        if skinned {
            let precision = self.joints_precision;
            let work = units.spawn("joints", move |_| {
                meshweave_core::profile_scope!("encode_joints");
                Ok(texture::encode_joints(&staged.bone_weights, precision, max_dimension))
            });
            if let Some(Some(block)) = units.finish(slice, work).await? {
                meta.layout_in_joints_tex =
                    self.upload(&format!("joints({name})"), &block, &self.state.joints);
            }
        }
        Ok(())
    }

    fn upload(
        &self,
        label: &str,
        block: &TextureBlock,
        slot: &RefCell<Option<ExpandableTextureArray>>,
    ) -> TextureLayout {
        match texture::upload_block(&self.device, label, block) {
            Ok((array, layout)) => {
                *slot.borrow_mut() = Some(array);
                layout
            }
            Err(err) => {
                log::error!("{label}: failed to upload texture: {err}");
                TextureLayout::INVALID
            }
        }
    }
}
