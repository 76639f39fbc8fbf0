use std::rc::Rc;
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};

use meshweave_core::compute::{
    CancellationToken, Cancelled, SliceContext, SliceResult, WorkError,
};
use meshweave_core::mesh::{IndexFormat, MeshDescriptor, VertexRepacker};
use meshweave_graphics::{Aabb, BlendShape, Mesh};

use crate::error::AvatarError;
use crate::mesh_info::{BoneWeight, MeshInfo};
use crate::native::{AssetId, AssetSource, NativeError, PrimitiveData, SubMesh, optional};
use crate::skinning::{
    BuildCallback, ComputeSkinnedPrimitive, GpuSkinnedPrimitive, MorphTargetInfo, SkinningInput,
};
use crate::vertex_format::{self, VertexFormat};

use super::{LoadFlags, PrimitiveInner};

struct Triangles {
    repacker: VertexRepacker,
    indices: Vec<u32>,
    sub_meshes: Vec<SubMesh>,
}

#[derive(Default)]
struct VertexAttributes {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    tangents: Vec<Vec4>,
    colors: Vec<Vec4>,
    colors_ormt: Vec<Vec4>,
    tex_coords: Vec<Vec2>,
    sub_mesh_types: Vec<f32>,
    bone_weights: Vec<BoneWeight>,
    bounds: Option<(Vec3, Vec3)>,
}

#[derive(Default)]
struct Skin {
    joints: Vec<i32>,
    bind_poses: Vec<Mat4>,
}

fn required<T>(call: &'static str, result: Result<T, NativeError>) -> Result<T, WorkError> {
    result.map_err(|err| AvatarError::native(call, err).into())
}

fn fetch_triangles(
    source: &dyn AssetSource,
    data: PrimitiveData,
    token: &CancellationToken,
) -> Result<Triangles, WorkError> {
    meshweave_core::profile_function!();
    let indices = required("index_data", source.index_data(data.id))?;
    token.check()?;
    let pool = required("vertex_count", source.vertex_count(data.vertex_buffer_id))?;
    let (repacker, indices) = VertexRepacker::create(indices, pool)
        .map_err(|err| WorkError::Failed(err.to_string()))?;
    let sub_meshes = optional("sub_meshes", source.sub_meshes(data.id));
    Ok(Triangles {
        repacker,
        indices,
        sub_meshes,
    })
}

fn fetch_attributes(
    source: &dyn AssetSource,
    data: PrimitiveData,
    repacker: &VertexRepacker,
    token: &CancellationToken,
) -> Result<VertexAttributes, WorkError> {
    meshweave_core::profile_function!();
    let vb = data.vertex_buffer_id;
    let positions = required("vertex_positions", source.vertex_positions(vb))?;
    let mut attributes = VertexAttributes {
        positions: repacker.repack_owned(positions),
        ..VertexAttributes::default()
    };
    token.check()?;
    attributes.normals = repacker.repack_owned(optional("vertex_normals", source.vertex_normals(vb)));
    attributes.tangents =
        repacker.repack_owned(optional("vertex_tangents", source.vertex_tangents(vb)));
    token.check()?;
    attributes.colors = repacker.repack_owned(optional("vertex_colors", source.vertex_colors(vb)));
    attributes.colors_ormt =
        repacker.repack_owned(optional("vertex_colors_ormt", source.vertex_colors_ormt(vb)));
    attributes.tex_coords =
        repacker.repack_owned(optional("vertex_tex_coords", source.vertex_tex_coords(vb)));
    attributes.sub_mesh_types =
        repacker.repack_owned(optional("sub_mesh_types", source.sub_mesh_types(vb)));
    token.check()?;

    let skinned = data.joint_count > 0;
    if skinned {
        let indices = repacker.repack_owned(optional("joint_indices", source.joint_indices(vb)));
        let weights = repacker.repack_owned(optional("joint_weights", source.joint_weights(vb)));
        if !indices.is_empty() && indices.len() == weights.len() {
            attributes.bone_weights = indices
                .into_iter()
                .zip(weights)
                .map(|(indices, weights)| BoneWeight {
                    indices,
                    weights: weights.to_array(),
                })
                .collect();
        }
    }

    attributes.bounds = match source.min_max_position(data.id, skinned) {
        Ok(bounds) => Some(bounds),
        Err(err) => {
            log::debug!("min_max_position {err}");
            None
        }
    };
    Ok(attributes)
}

fn fetch_morph_targets(
    source: &dyn AssetSource,
    morph_buffer: AssetId,
    repacker: &VertexRepacker,
    token: &CancellationToken,
) -> Result<Vec<MorphTargetInfo>, WorkError> {
    meshweave_core::profile_function!();
    let count = required("morph_target_count", source.morph_target_count(morph_buffer))?;
    let mut targets = Vec::with_capacity(count as usize);
    for index in 0..count {
        token.check()?;
        let positions = match source.morph_positions(morph_buffer, index) {
            Ok(positions) => positions,
            Err(err) => {
                log::error!("morph_positions {err}");
                continue;
            }
        };
        let name = source
            .morph_target_name(morph_buffer, index)
            .unwrap_or_else(|_| format!("morphTarget{index}"));
        targets.push(MorphTargetInfo {
            name,
            positions: repacker.repack_owned(positions),
            normals: repacker.repack_owned(optional(
                "morph_normals",
                source.morph_normals(morph_buffer, index),
            )),
            tangents: repacker.repack_owned(optional(
                "morph_tangents",
                source.morph_tangents(morph_buffer, index),
            )),
        });
    }
    Ok(targets)
}

fn fetch_skin(source: &dyn AssetSource, data: PrimitiveData) -> Skin {
    let joints = optional("joint_info", source.joint_info(data.id));
    Skin {
        joints: joints.iter().map(|joint| joint.joint_index).collect(),
        bind_poses: joints.iter().map(|joint| joint.inverse_bind).collect(),
    }
}

pub(super) async fn load_mesh(inner: Rc<PrimitiveInner>, slice: SliceContext) -> SliceResult {
    let data = inner.data;
    let source = Arc::clone(&inner.ctx.source);

    let work = {
        let source = Arc::clone(&source);
        inner.spawn("triangles", move |token| fetch_triangles(source.as_ref(), data, token))
    };
    let triangles = inner.finish(&slice, work).await?;
    let repacker = Arc::new(triangles.repacker);

    slice.hold().await;
    let attributes = {
        let source = Arc::clone(&source);
        let repacker = Arc::clone(&repacker);
        inner.spawn("attributes", move |token| {
            fetch_attributes(source.as_ref(), data, &repacker, token)
        })
    };
    let morphs = data.morph_target_buffer_id.map(|morph_buffer| {
        let source = Arc::clone(&source);
        let repacker = Arc::clone(&repacker);
        inner.spawn("morph targets", move |token| {
            fetch_morph_targets(source.as_ref(), morph_buffer, &repacker, token)
        })
    });
    let skin = (data.joint_count > 0).then(|| {
        let source = Arc::clone(&source);
        inner.spawn("joints", move |token| {
            token.check()?;
            Ok(fetch_skin(source.as_ref(), data))
        })
    });

    let attributes = inner.finish(&slice, attributes).await?;
    let targets = match morphs {
        Some(work) => inner.finish(&slice, work).await?,
        None => Vec::new(),
    };
    let skin = match skin {
        Some(work) => inner.finish(&slice, work).await?,
        None => Skin::default(),
    };
    inner.set_copied(LoadFlags::MESH);

    slice.hold().await;
    let bounds = attributes.bounds;
    stage_mesh_info(&inner, triangles.indices, triangles.sub_meshes, attributes, skin);
    let targets: Arc<[MorphTargetInfo]> = targets.into();
    start_skinning(&inner, &targets);

    slice.hold().await;
    let mesh = build_mesh(&inner, &targets, bounds);
    {
        let mut info = inner.mesh_info.borrow_mut();
        info.mesh_verts_complete();
        info.mesh_normals_complete();
        info.mesh_tangents_complete();
        info.mesh_bone_weights_complete();
        info.clear_mesh_data();
    }
    match mesh {
        Ok(mesh) => *inner.mesh.borrow_mut() = Some(mesh),
        Err(err) => {
            log::error!("{}: failed to create mesh: {err}", inner.name);
            inner.post_dispose();
            return Err(Cancelled);
        }
    }
    inner.set_loaded(LoadFlags::MESH);

    if inner.needs_gpu_skinning() {
        while skinning_in_progress(&inner) {
            slice.delay().await;
        }
        inner.morph_target_count.set(driven_morph_targets(&inner, targets.len() as u32));
        inner.set_loaded(LoadFlags::GPU_SKINNING);
    } else {
        inner.morph_target_count.set(targets.len() as u32);
    }

    log::debug!(
        "{}: mesh loaded, {} morph target(s)",
        inner.name,
        inner.morph_target_count.get()
    );
    Ok(())
}

fn stage_mesh_info(
    inner: &PrimitiveInner,
    indices: Vec<u32>,
    sub_meshes: Vec<SubMesh>,
    attributes: VertexAttributes,
    skin: Skin,
) {
    let mut info = inner.mesh_info.borrow_mut();
    info.set_verts(attributes.positions);
    if !attributes.normals.is_empty() {
        info.set_normals(attributes.normals);
    }
    if !attributes.tangents.is_empty() {
        info.set_tangents(attributes.tangents);
    }
    if !attributes.bone_weights.is_empty() {
        info.set_bone_weights(attributes.bone_weights);
    }
    info.colors = attributes.colors;
    info.colors_ormt = attributes.colors_ormt;
    info.tex_coords = attributes.tex_coords;
    info.sub_mesh_types = attributes.sub_mesh_types;
    info.joints = skin.joints;
    info.bind_poses = skin.bind_poses;
    info.triangles = indices;

    let zeroed = vertex_format::strip_excluded_sub_meshes(
        &mut info.triangles,
        &sub_meshes,
        inner.included,
    );
    if zeroed > 0 {
        log::trace!("{}: zeroed {zeroed} excluded indices", inner.name);
    }
    info.sub_meshes = sub_meshes;
}

fn start_skinning(inner: &Rc<PrimitiveInner>, targets: &Arc<[MorphTargetInfo]>) {
    if !inner.needs_gpu_skinning() {
        return;
    }
    let mode = inner.ctx.config.skinning_mode;
    let input = SkinningInput {
        mesh_info: Rc::clone(&inner.mesh_info),
        morph_targets: Arc::clone(targets),
        joint_count: inner.data.joint_count,
        token: inner.token.clone(),
    };
    let on_info = |complete: fn(&mut MeshInfo)| -> BuildCallback {
        let mesh_info = Rc::clone(&inner.mesh_info);
        Box::new(move || complete(&mut mesh_info.borrow_mut()))
    };

    if mode.builds_texture() {
        inner.mesh_info.borrow_mut().will_build_gpu_primitive();
        let gpu = GpuSkinnedPrimitive::new(
            &inner.ctx,
            inner.name.clone(),
            input.clone(),
            on_info(MeshInfo::neutral_pose_tex_complete),
            on_info(MeshInfo::did_build_gpu_primitive),
        );
        *inner.gpu.borrow_mut() = Some(gpu);
    }
    if mode.builds_compute() {
        inner.mesh_info.borrow_mut().will_build_compute_primitive();
        let compute = ComputeSkinnedPrimitive::new(
            &inner.ctx,
            inner.name.clone(),
            input,
            on_info(MeshInfo::neutral_pose_buffers_complete),
            on_info(MeshInfo::did_build_compute_primitive),
        );
        *inner.compute.borrow_mut() = Some(compute);
    }
}

fn skinning_in_progress(inner: &PrimitiveInner) -> bool {
    inner.gpu.borrow().as_ref().is_some_and(|gpu| gpu.is_loading())
        || inner
            .compute
            .borrow()
            .as_ref()
            .is_some_and(|compute| compute.is_loading())
}

/// Morph targets that move at least one vertex are driven by the skinner.
fn driven_morph_targets(inner: &PrimitiveInner, count: u32) -> u32 {
    let texture_affected = inner
        .gpu
        .borrow()
        .as_ref()
        .and_then(|gpu| gpu.meta_data())
        .map(|meta| meta.num_morph_target_affected_verts);
    let compute_affected = inner
        .compute
        .borrow()
        .as_ref()
        .and_then(|compute| compute.meta_data())
        .map(|meta| meta.num_morphed_verts);
    let affected = texture_affected.into_iter().chain(compute_affected).max().unwrap_or(0);
    if affected == 0 { 0 } else { count }
}

fn build_mesh(
    inner: &PrimitiveInner,
    targets: &[MorphTargetInfo],
    bounds: Option<(Vec3, Vec3)>,
) -> Result<Arc<Mesh>, AvatarError> {
    meshweave_core::profile_function!();
    let info = inner.mesh_info.borrow();
    let vertex_count = info.vertex_count();
    if vertex_count == 0 {
        return Err(AvatarError::EmptyMesh);
    }

    let engine = inner.ctx.config.skinning_mode.is_engine();
    let format = VertexFormat::for_mesh(&info, engine, inner.data.joint_count);
    inner.vertex_format.set(format);
    let vertices = vertex_format::write_interleaved(format, &info, vertex_count)?;

    let mut descriptor = MeshDescriptor::new(format.layout().into_shared())
        .with_vertex_count(vertex_count)
        .with_label(inner.name.clone());
    if !info.triangles.is_empty() {
        descriptor = descriptor.with_indices(IndexFormat::Uint32, info.triangles.len() as u32);
    }
    let mesh = inner.ctx.device.create_mesh(&descriptor)?;
    mesh.upload_vertices(&vertices)?;
    if !info.triangles.is_empty() {
        mesh.upload_indices(bytemuck::cast_slice(&info.triangles))?;
    }
    if let Some((min, max)) = bounds {
        mesh.set_bounds(Aabb::new(min, max));
    }
    if !info.bind_poses.is_empty() {
        mesh.set_bind_poses(info.bind_poses.clone());
    }

    if engine {
        for target in targets {
            let shape = BlendShape {
                name: target.name.clone(),
                positions: target.positions.clone(),
                normals: target.normals.clone(),
                tangents: target.tangents.clone(),
            };
            if let Err(err) = mesh.add_blend_shape(shape) {
                log::warn!("{}: skipped blend shape: {err}", inner.name);
            }
        }
    }
    Ok(mesh)
}
