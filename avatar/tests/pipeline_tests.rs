//! End-to-end tests driving primitives and loaders through the slicer.

mod common;

use glam::Vec3;
use rstest::rstest;

use common::*;
use meshweave_avatar::native::{
    AssetId, HighQualityFlags, NativeError, PrimitiveFlags, SubMesh, SubMeshInclusionFlags,
};
use meshweave_avatar::skinning::compute_buffer::{HEADER_SIZE, StaticMeshHeader};
use meshweave_avatar::{
    AssetStatus, AvatarError, AvatarPrimitive, LoadFlags, LoaderState, ResourceLoader,
    ResourceManager, SkinningMode, TexturePrecision, VertexFormat,
};
use meshweave_graphics::DeviceCapabilities;

fn load(
    ctx: &meshweave_avatar::PipelineContext,
    source: &meshweave_avatar::native::MemoryAssetSource,
    primitive: meshweave_avatar::native::MemoryPrimitive,
) -> AvatarPrimitive {
    let data = primitive.data();
    source.add_primitive(RESOURCE, primitive);
    AvatarPrimitive::load(ctx, data, SubMeshInclusionFlags::ALL)
}

fn load_to_completion(
    ctx: &meshweave_avatar::PipelineContext,
    source: &meshweave_avatar::native::MemoryAssetSource,
    primitive: meshweave_avatar::native::MemoryPrimitive,
) -> AvatarPrimitive {
    let primitive = load(ctx, source, primitive);
    pump_until(&ctx.slicer, 5_000, || primitive.is_loaded());
    primitive
}

fn indices_of(primitive: &AvatarPrimitive) -> Vec<u32> {
    let mesh = primitive.mesh().unwrap();
    mesh.index_buffer()
        .unwrap()
        .contents()
        .chunks_exact(4)
        .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

#[rstest]
#[case::engine_keeps_normals(SkinningMode::Engine, VertexFormat::POSITION | VertexFormat::NORMAL, 24)]
#[case::texture_skinning_drops_normals(SkinningMode::GpuTexture, VertexFormat::POSITION, 12)]
#[case::compute_skinning_drops_normals(SkinningMode::ComputeBuffer, VertexFormat::POSITION, 12)]
fn vertex_stride_follows_skinning_mode(
    #[case] mode: SkinningMode,
    #[case] expected: VertexFormat,
    #[case] stride: u32,
) {
    let (ctx, source) = context(config(mode));
    let primitive = load_to_completion(&ctx, &source, with_normals(quad(1)));

    assert_eq!(primitive.vertex_format(), expected);
    assert_eq!(primitive.vertex_format().stride(), stride);
    let mesh = primitive.mesh().unwrap();
    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.vertex_buffer().size(), 4 * stride as u64);
    assert_eq!(indices_of(&primitive), quad_indices());
    assert!(!primitive.has_staging_data());
}

#[test]
fn engine_skinning_interleaves_joints_and_blend_shapes() {
    let (ctx, source) = context(config(SkinningMode::Engine));
    let prim = with_tex_coords(with_skin(with_normals(quad(2))))
        .with_morph_target(single_vertex_morph("smile", 4, 2, Vec3::Y));
    let primitive = load_to_completion(&ctx, &source, prim);

    let format = primitive.vertex_format();
    assert!(format.contains(VertexFormat::BONE_WEIGHTS | VertexFormat::BONE_INDICES));
    assert_eq!(format.stride(), 12 + 12 + 8 + 16 + 4);

    let mesh = primitive.mesh().unwrap();
    assert_eq!(mesh.blend_shape_names(), vec!["smile".to_string()]);
    assert_eq!(mesh.bind_poses().len(), 2);
    assert_eq!(primitive.morph_target_count(), 1);
    assert!(primitive.skinning_buffer().is_none());
    assert!(primitive.source_texture_meta_data().is_none());
}

#[test]
fn zero_delta_morphs_are_not_driven_by_texture_skinning() {
    let (ctx, source) = context(config(SkinningMode::GpuTexture));
    let prim = with_tangents(with_normals(quad(3)))
        .with_morph_target(zero_morph("a", 4))
        .with_morph_target(zero_morph("b", 4))
        .with_morph_target(zero_morph("c", 4));
    let primitive = load_to_completion(&ctx, &source, prim);

    let meta = primitive.source_texture_meta_data().unwrap();
    assert!(meta.has_tangents);
    assert_eq!(meta.vertex_count, 4);
    assert_eq!(meta.num_morph_targets, 3);
    assert_eq!(meta.num_morph_target_affected_verts, 0);
    assert!(meta.layout_in_neutral_pose_tex.is_valid());
    assert!(!meta.layout_in_morph_targets_tex.is_valid());
    assert_eq!(primitive.morph_target_count(), 0);
    assert!(primitive.load_flags().contains(LoadFlags::GPU_SKINNING));
}

#[test]
fn texture_skinning_packs_only_affected_vertices() {
    let (ctx, source) = context(config(SkinningMode::GpuTexture));
    let prim = with_skin(with_normals(quad(4)))
        .with_morph_target(single_vertex_morph("blink", 4, 3, Vec3::new(0.0, 0.5, 0.0)));
    let primitive = load_to_completion(&ctx, &source, prim);

    let meta = primitive.source_texture_meta_data().unwrap();
    assert_eq!(meta.num_morph_target_affected_verts, 1);
    assert!(meta.layout_in_morph_targets_tex.is_valid());
    assert!(meta.layout_in_joints_tex.is_valid());
    assert_eq!(
        meta.mesh_vertex_to_affected_index
            .iter()
            .filter(|&&slot| slot >= 0)
            .count(),
        1
    );
    assert_eq!(primitive.morph_target_count(), 1);
    assert_eq!(primitive.vertex_format(), VertexFormat::POSITION);
}

#[rstest]
#[case::float_output(TexturePrecision::Float)]
#[case::unorm_output(TexturePrecision::Unorm16)]
fn compute_buffer_is_word_aligned(#[case] output: TexturePrecision) {
    let mut config = config(SkinningMode::ComputeBuffer);
    config.skinner_output_format = output;
    let (ctx, source) = context(config);
    let prim = with_skin(with_tangents(with_normals(quad(5))))
        .with_morph_target(single_vertex_morph("jaw", 4, 1, Vec3::X));
    let primitive = load_to_completion(&ctx, &source, prim);

    let buffer = primitive.skinning_buffer().unwrap();
    let meta = primitive.compute_meta_data().unwrap();
    assert_eq!(buffer.size(), meta.buffer_size as u64);
    assert_eq!(buffer.size() % 4, 0);
    assert_eq!(meta.num_morph_targets, 1);
    assert_eq!(meta.num_morphed_verts, 1);
    assert_eq!(meta.output_precision, output);

    let contents = buffer.contents();
    let header: StaticMeshHeader = bytemuck::pod_read_unaligned(&contents[..HEADER_SIZE]);
    let offsets = header
        .attributes_and_joint_weights_offset
        .iter()
        .chain(&header.morph_info_and_joint_indices_offset[..1])
        .chain(&header.morph_info_and_joint_indices_offset[3..])
        .chain(&header.output_index_offset[..1]);
    for &offset in offsets {
        assert_eq!(offset % 4, 0);
        assert!(offset as usize >= HEADER_SIZE);
        assert!(offset < meta.buffer_size);
    }
    assert_eq!(header.morph_info_and_joint_indices_offset[1], 1);
    assert_eq!(header.morph_info_and_joint_indices_offset[2], 1);
}

#[test]
fn partial_and_single_shot_buffers_match() {
    let build = |partial: bool| {
        let mut config = config(SkinningMode::ComputeBuffer);
        config.partial_buffer_updates = partial;
        let caps = DeviceCapabilities::default().with_partial_writes_preserved(true);
        let (ctx, source) = context_with_caps(config, caps);
        let prim = with_skin(with_normals(quad(6)))
            .with_morph_target(single_vertex_morph("brow", 4, 0, Vec3::Z));
        let primitive = load_to_completion(&ctx, &source, prim);
        let buffer = primitive.skinning_buffer().unwrap();
        (buffer.contents(), buffer.write_count())
    };

    let (single, single_writes) = build(false);
    let (partial, partial_writes) = build(true);
    assert_eq!(single, partial);
    assert_eq!(single_writes, 1);
    assert!(partial_writes > 1);
}

#[test]
fn defective_partial_writes_fall_back_to_single_shot() {
    let mut config = config(SkinningMode::ComputeBuffer);
    config.partial_buffer_updates = true;
    let caps = DeviceCapabilities::default().with_partial_writes_preserved(false);
    let (ctx, source) = context_with_caps(config, caps);
    let primitive = load_to_completion(&ctx, &source, with_skin(with_normals(quad(7))));

    let buffer = primitive.skinning_buffer().unwrap();
    assert_eq!(buffer.write_count(), 1);
    let contents = buffer.contents();
    let header: StaticMeshHeader = bytemuck::pod_read_unaligned(&contents[..HEADER_SIZE]);
    assert_ne!(header.attributes_and_joint_weights_offset[0], 0);
}

#[test]
fn excluded_sub_meshes_become_degenerate() {
    let (ctx, source) = context(config(SkinningMode::Engine));
    let prim = quad(8)
        .with_sub_mesh(SubMesh {
            index_start: 0,
            index_count: 3,
            inclusion: SubMeshInclusionFlags::HEAD,
        })
        .with_sub_mesh(SubMesh {
            index_start: 3,
            index_count: 3,
            inclusion: SubMeshInclusionFlags::OUTFIT,
        });
    let data = prim.data();
    source.add_primitive(RESOURCE, prim);
    let primitive = AvatarPrimitive::load(&ctx, data, SubMeshInclusionFlags::HEAD);
    pump_until(&ctx.slicer, 5_000, || primitive.is_loaded());

    assert_eq!(indices_of(&primitive), vec![0, 1, 2, 0, 0, 0]);
}

#[test]
fn cancel_waits_for_running_units() {
    let (ctx, source) = context(config(SkinningMode::GpuTexture));
    source.gate().close("vertex_positions");
    let primitive = load(&ctx, &source, with_skin(quad(9)));
    pump_until(&ctx.slicer, 5_000, || {
        source.gate().waiting("vertex_positions") == 1
    });

    primitive.cancel();
    assert!(primitive.is_cancelled());
    assert!(primitive.is_cancel_pending());
    assert!(primitive.pending_task_count() >= 1);

    source.gate().open("vertex_positions");
    pump_until(&ctx.slicer, 5_000, || !primitive.is_cancel_pending());
    assert_eq!(primitive.pending_task_count(), 0);
    assert!(!primitive.is_loaded());
    assert!(primitive.mesh().is_none());
    assert!(!primitive.has_staging_data());
    drain(&ctx.slicer);
}

#[rstest]
#[case::compute(SkinningMode::ComputeBuffer)]
#[case::texture(SkinningMode::GpuTexture)]
fn cancelling_skinning_build_stops_its_units(#[case] mode: SkinningMode) {
    let (ctx, source) = context(config(mode));
    let prim = with_skin(with_tangents(with_normals(quad(14))))
        .with_morph_target(single_vertex_morph("cheek", 4, 2, Vec3::X));
    let primitive = load(&ctx, &source, prim);
    pump_until(&ctx.slicer, 5_000, || {
        primitive.load_flags().contains(LoadFlags::MESH)
    });

    assert!(primitive.cancel());
    pump_until(&ctx.slicer, 5_000, || !primitive.is_cancel_pending());
    assert_eq!(primitive.pending_task_count(), 0);
    assert!(primitive.skinning_buffer().is_none());
    assert!(primitive.compute_meta_data().is_none());
    assert!(primitive.source_texture_meta_data().is_none());
    assert!(!primitive.has_staging_data());
    drain(&ctx.slicer);
}

#[test]
fn cancelling_twice_is_harmless() {
    let (ctx, source) = context(config(SkinningMode::Engine));
    let primitive = load(&ctx, &source, quad(10));

    assert!(primitive.cancel());
    assert!(!primitive.is_cancel_pending());
    assert!(!primitive.cancel());
    assert!(primitive.is_cancelled());

    drain(&ctx.slicer);
    assert!(!primitive.is_loaded());
    assert!(primitive.material().is_none());

    primitive.dispose();
    primitive.dispose();
    assert!(primitive.is_disposed());
    assert!(!ctx.assets.has_primitive(AssetId(10)));
}

#[test]
fn cancelling_loader_twice_releases_once() {
    let (ctx, source) = context(config(SkinningMode::Engine));
    source.add_primitive(RESOURCE, quad(15));
    source.gate().close("vertex_positions");

    let loader = ResourceLoader::new(&ctx, RESOURCE, SubMeshInclusionFlags::ALL);
    loader.start_load();
    pump_until(&ctx.slicer, 5_000, || {
        source.gate().waiting("vertex_positions") == 1
    });

    loader.cancel();
    loader.cancel();
    assert!(loader.is_cancelled());
    assert_eq!(source.released(), vec![RESOURCE]);
    assert_eq!(loader.primitive_count(), 1);
    assert!(loader.primitives()[0].is_cancelled());

    source.gate().open("vertex_positions");
    drain(&ctx.slicer);
    loader.dispose();
    assert_eq!(source.released(), vec![RESOURCE]);
    assert!(source.ready().is_empty());
    assert!(!ctx.assets.has_primitive(AssetId(15)));
}

#[rstest]
#[case::triangles("index_data")]
#[case::positions("vertex_positions")]
fn failing_required_call_disposes_primitive(#[case] call: &str) {
    let (ctx, source) = context(config(SkinningMode::Engine));
    source.fail(call, NativeError::Failure { code: -3 });
    let primitive = load(&ctx, &source, quad(11));

    pump_until(&ctx.slicer, 5_000, || primitive.is_disposed());
    assert!(!primitive.is_loaded());
    assert!(primitive.mesh().is_none());
    assert!(!ctx.assets.has_primitive(AssetId(11)));
}

#[test]
fn failed_mesh_creation_disposes_primitive() {
    let caps = DeviceCapabilities {
        max_buffer_size: 16,
        ..DeviceCapabilities::default()
    };
    let (ctx, source) = context_with_caps(config(SkinningMode::Engine), caps);
    let primitive = load(&ctx, &source, quad(16));

    pump_until(&ctx.slicer, 5_000, || primitive.is_disposed());
    assert!(!primitive.is_loaded());
    assert!(!primitive.load_flags().contains(LoadFlags::MESH));
    assert!(primitive.mesh().is_none());
    assert!(!ctx.assets.has_primitive(AssetId(16)));
    drain(&ctx.slicer);
}

#[test]
fn missing_optional_channels_still_load() {
    let (ctx, source) = context(config(SkinningMode::Engine));
    source.fail("vertex_tex_coords", NativeError::Failure { code: -9 });
    let primitive = load_to_completion(&ctx, &source, with_tex_coords(quad(12)));

    assert!(!primitive.vertex_format().contains(VertexFormat::TEXCOORD0));
    assert!(primitive.mesh().is_some());
}

#[rstest]
#[case::standard(HighQualityFlags::empty(), 0.0)]
#[case::normal_maps(HighQualityFlags::NORMAL_MAPS, 1.0)]
fn material_binds_textures_and_quality_features(
    #[case] quality: HighQualityFlags,
    #[case] normal_map: f32,
) {
    let (ctx, source) = context(config(SkinningMode::Engine));
    let flags = PrimitiveFlags {
        high_quality: quality,
        ..PrimitiveFlags::default()
    };
    let prim = with_base_color_image(with_tex_coords(quad(13)), 500).with_flags(flags);
    let primitive = load_to_completion(&ctx, &source, prim);

    let material = primitive.material().unwrap();
    assert_eq!(material.shader(), "avatar/textured");
    assert!(material.texture("_MainTex").is_some());
    assert!(material.texture("_BaseColorTex").is_some());
    assert_eq!(
        material.color("_BaseColorFactor"),
        Some(glam::Vec4::new(1.0, 0.5, 0.25, 1.0))
    );
    assert_eq!(material.float("HAS_NORMAL_MAP"), Some(normal_map));
    assert_eq!(material.is_keyword_enabled("HAS_NORMAL_MAP_ON"), normal_map > 0.0);
    assert_eq!(material.float("ENABLE_HAIR"), Some(0.0));

    let images = primitive.images();
    assert_eq!(images.len(), 1);
    assert!(images[0].is_loaded());
    assert_eq!(images[0].texture().unwrap().width(), 2);
}

#[test]
fn loader_releases_native_data_before_ready() {
    let (ctx, source) = context(config(SkinningMode::GpuTexture));
    source.add_primitive(RESOURCE, with_base_color_image(with_skin(quad(20)), 600));
    source.add_primitive(RESOURCE, with_base_color_image(quad(21), 600));

    let mut manager = ResourceManager::new(&ctx, SubMeshInclusionFlags::ALL);
    manager.handle_status(RESOURCE, AssetStatus::Loaded).unwrap();
    manager.handle_status(RESOURCE, AssetStatus::Loaded).unwrap();
    assert_eq!(manager.loader_count(), 1);

    pump_until(&ctx.slicer, 5_000, || manager.is_loaded(RESOURCE));
    assert_eq!(source.released(), vec![RESOURCE]);
    assert_eq!(source.ready(), vec![RESOURCE]);

    let loader = manager.loader(RESOURCE).unwrap();
    assert_eq!(loader.state(), LoaderState::Loaded);
    assert_eq!(loader.primitive_count(), 2);
    assert_eq!(loader.images().len(), 1);
    assert_eq!(ctx.assets.image_count(), 1);

    manager.handle_status(RESOURCE, AssetStatus::Unloaded).unwrap();
    assert!(manager.loader(RESOURCE).is_none());
    assert_eq!(ctx.assets.image_count(), 0);
    assert!(!ctx.assets.has_primitive(AssetId(20)));
}

#[test]
fn unloading_mid_load_cancels_and_releases() {
    let (ctx, source) = context(config(SkinningMode::Engine));
    source.add_primitive(RESOURCE, quad(30));
    source.gate().close("vertex_positions");

    let mut manager = ResourceManager::new(&ctx, SubMeshInclusionFlags::ALL);
    manager.handle_status(RESOURCE, AssetStatus::Loaded).unwrap();
    pump_until(&ctx.slicer, 5_000, || {
        source.gate().waiting("vertex_positions") == 1
    });

    manager.handle_status(RESOURCE, AssetStatus::Unloaded).unwrap();
    assert_eq!(source.released(), vec![RESOURCE]);
    assert!(source.ready().is_empty());

    source.gate().open("vertex_positions");
    drain(&ctx.slicer);
    assert!(!ctx.assets.has_primitive(AssetId(30)));
}

#[rstest]
#[case::count("primitive_count")]
#[case::enumeration("primitive_by_index")]
fn enumeration_failure_fails_the_loader(#[case] call: &str) {
    let (ctx, source) = context(config(SkinningMode::Engine));
    source.add_primitive(RESOURCE, quad(40));
    source.fail(call, NativeError::Failure { code: -2 });

    let mut manager = ResourceManager::new(&ctx, SubMeshInclusionFlags::ALL);
    manager.handle_status(RESOURCE, AssetStatus::Loaded).unwrap();
    pump_until(&ctx.slicer, 1_000, || {
        manager.loader(RESOURCE).unwrap().is_failed()
    });
    drain(&ctx.slicer);

    let loader = manager.loader(RESOURCE).unwrap();
    assert_eq!(loader.state(), LoaderState::Failed);
    assert!(!loader.can_load());
    assert_eq!(loader.primitive_count(), 0);
    assert!(!manager.is_loaded(RESOURCE));
    assert_eq!(source.released(), vec![RESOURCE]);
    assert!(source.ready().is_empty());

    manager.handle_status(RESOURCE, AssetStatus::Unloaded).unwrap();
    assert_eq!(source.released(), vec![RESOURCE]);
}

#[test]
fn resource_updates_are_rejected() {
    let (ctx, _source) = context(config(SkinningMode::Engine));
    let mut manager = ResourceManager::new(&ctx, SubMeshInclusionFlags::ALL);

    let err = manager
        .handle_status(RESOURCE, AssetStatus::Updated)
        .unwrap_err();
    assert!(matches!(err, AvatarError::UnsupportedStatus(AssetStatus::Updated)));

    manager.handle_status(RESOURCE, AssetStatus::Unloaded).unwrap();
    manager.handle_status(RESOURCE, AssetStatus::LoadFailed).unwrap();
    assert_eq!(manager.loader_count(), 0);
}
