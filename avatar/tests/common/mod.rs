//! Shared harness for avatar pipeline integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Mat4, Vec2, Vec3, Vec4};

use meshweave_avatar::native::{
    AssetId, ImageFormat, ImageInfo, JointInfo, MaterialTexture, MaterialTextureType,
    MemoryAssetSource, MemoryImage, MemoryMorphTarget, MemoryPrimitive,
};
use meshweave_avatar::{PipelineContext, SkinningConfig, SkinningMode};
use meshweave_core::compute::Slicer;
use meshweave_graphics::{DeviceCapabilities, GraphicsDevice};

pub const RESOURCE: AssetId = AssetId(100);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A device on the calling thread, a fresh in-memory source and a context.
pub fn context(config: SkinningConfig) -> (PipelineContext, Arc<MemoryAssetSource>) {
    context_with_caps(config, DeviceCapabilities::default())
}

pub fn context_with_caps(
    config: SkinningConfig,
    caps: DeviceCapabilities,
) -> (PipelineContext, Arc<MemoryAssetSource>) {
    init_logging();
    let device = GraphicsDevice::new("test", caps);
    let source = Arc::new(MemoryAssetSource::new());
    let config = SkinningConfig {
        worker_threads: 2,
        ..config
    };
    let ctx = PipelineContext::new(device, source.clone(), config).unwrap();
    (ctx, source)
}

pub fn config(mode: SkinningMode) -> SkinningConfig {
    SkinningConfig::default().with_mode(mode)
}

/// Run passes until `done` holds. Panics after `max_frames` passes or ten
/// seconds, whichever comes first.
pub fn pump_until(slicer: &Slicer, max_frames: usize, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    for _ in 0..max_frames {
        if done() {
            return;
        }
        assert!(Instant::now() < deadline, "pipeline did not settle in time");
        slicer.run_frame();
        std::thread::sleep(Duration::from_micros(200));
    }
    assert!(done(), "condition not met after {max_frames} frames");
}

/// Run passes until the slicer has nothing queued.
pub fn drain(slicer: &Slicer) {
    pump_until(slicer, 10_000, || !slicer.has_work());
}

/// Quad made of two triangles.
pub fn quad_positions() -> Vec<Vec3> {
    vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ]
}

pub fn quad_indices() -> Vec<u32> {
    vec![0, 1, 2, 0, 2, 3]
}

pub fn quad(id: u64) -> MemoryPrimitive {
    MemoryPrimitive::new(AssetId(id), quad_positions(), quad_indices())
        .with_name(format!("quad{id}"))
}

pub fn with_normals(primitive: MemoryPrimitive) -> MemoryPrimitive {
    let count = primitive.positions.len();
    primitive.with_normals(vec![Vec3::Z; count])
}

pub fn with_tangents(primitive: MemoryPrimitive) -> MemoryPrimitive {
    let count = primitive.positions.len();
    primitive.with_tangents(vec![Vec4::new(1.0, 0.0, 0.0, 1.0); count])
}

pub fn with_tex_coords(primitive: MemoryPrimitive) -> MemoryPrimitive {
    let uvs = primitive
        .positions
        .iter()
        .map(|p| Vec2::new(p.x, p.y))
        .collect();
    primitive.with_tex_coords(uvs)
}

/// Skin every vertex to joints 0 and 1 of a two-joint skeleton.
pub fn with_skin(primitive: MemoryPrimitive) -> MemoryPrimitive {
    let count = primitive.positions.len();
    let joints = vec![
        JointInfo {
            joint_index: 0,
            inverse_bind: Mat4::IDENTITY,
        },
        JointInfo {
            joint_index: 1,
            inverse_bind: Mat4::from_translation(Vec3::Y),
        },
    ];
    primitive.with_skin(
        joints,
        vec![[0, 1, 0, 0]; count],
        vec![Vec4::new(0.75, 0.25, 0.0, 0.0); count],
    )
}

/// Morph target that moves only vertex `moved` by `delta`.
pub fn single_vertex_morph(
    name: &str,
    count: usize,
    moved: usize,
    delta: Vec3,
) -> MemoryMorphTarget {
    let mut positions = vec![Vec3::ZERO; count];
    positions[moved] = delta;
    MemoryMorphTarget::new(name, positions)
}

pub fn zero_morph(name: &str, count: usize) -> MemoryMorphTarget {
    MemoryMorphTarget::new(name, vec![Vec3::ZERO; count])
}

/// A 2x2 RGBA image used as base color.
pub fn with_base_color_image(primitive: MemoryPrimitive, image: u64) -> MemoryPrimitive {
    let info = ImageInfo {
        id: AssetId(image),
        format: ImageFormat::Rgba32,
        width: 2,
        height: 2,
        mip_count: 1,
        data_size: 16,
    };
    primitive
        .with_texture(MaterialTexture {
            kind: MaterialTextureType::BaseColor,
            image_id: AssetId(image),
            factor: Vec4::new(1.0, 0.5, 0.25, 1.0),
        })
        .with_image(MemoryImage {
            info,
            pixels: (0..16).collect(),
        })
}
