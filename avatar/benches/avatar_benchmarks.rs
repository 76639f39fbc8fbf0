use criterion::{Criterion, black_box, criterion_group, criterion_main};
use glam::{Vec2, Vec3, Vec4};

use meshweave_avatar::config::TexturePrecision;
use meshweave_avatar::mesh_info::{BoneWeight, MeshInfo};
use meshweave_avatar::skinning::compute_buffer::{self, ComputeBlocks};
use meshweave_avatar::skinning::texture;
use meshweave_avatar::skinning::{MorphAnalysis, MorphTargetInfo, VertexReorder};
use meshweave_avatar::vertex_format::{self, VertexFormat};

const VERTICES: usize = 20_000;

fn positions() -> Vec<Vec3> {
    (0..VERTICES)
        .map(|i| Vec3::new(i as f32 * 0.001, (i % 97) as f32 * 0.01, 0.5))
        .collect()
}

fn bone_weights() -> Vec<BoneWeight> {
    (0..VERTICES)
        .map(|i| BoneWeight {
            indices: [(i % 64) as u16, ((i + 1) % 64) as u16, 0, 0],
            weights: [0.6, 0.4, 0.0, 0.0],
        })
        .collect()
}

/// Eight targets, each moving a different tenth of the vertices.
fn morph_targets() -> Vec<MorphTargetInfo> {
    (0..8)
        .map(|t| MorphTargetInfo {
            name: format!("target{t}"),
            positions: (0..VERTICES)
                .map(|i| {
                    if i % 10 == t {
                        Vec3::new(0.01, 0.02, -0.01)
                    } else {
                        Vec3::ZERO
                    }
                })
                .collect(),
            normals: vec![Vec3::ZERO; VERTICES],
            tangents: Vec::new(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Morph analysis
// ---------------------------------------------------------------------------

fn bench_morph_analysis(c: &mut Criterion) {
    let targets = morph_targets();
    c.bench_function("morph_analysis_8x20k", |b| {
        b.iter(|| black_box(MorphAnalysis::new(black_box(&targets), VERTICES as u32)));
    });
}

fn bench_vertex_reorder(c: &mut Criterion) {
    let targets = morph_targets();
    let analysis = MorphAnalysis::new(&targets, VERTICES as u32);
    let weights = bone_weights();
    c.bench_function("vertex_reorder_20k", |b| {
        b.iter(|| black_box(VertexReorder::new(VERTICES as u32, &analysis, black_box(&weights))));
    });
}

// ---------------------------------------------------------------------------
// Compute buffer
// ---------------------------------------------------------------------------

fn bench_compute_blocks(c: &mut Criterion) {
    let targets = morph_targets();
    let analysis = MorphAnalysis::new(&targets, VERTICES as u32);
    let weights = bone_weights();
    let Ok(reorder) = VertexReorder::new(VERTICES as u32, &analysis, &weights) else {
        return;
    };
    let verts = positions();
    let normals = vec![Vec3::Z; VERTICES];

    c.bench_function("compute_blocks_20k", |b| {
        b.iter(|| {
            let (morphs, morph_info) = compute_buffer::encode_morphs(
                &targets,
                &analysis,
                &reorder,
                TexturePrecision::Snorm10,
            );
            let blocks = ComputeBlocks {
                positions: compute_buffer::encode_positions(&verts, &reorder),
                normals: compute_buffer::encode_normals(&normals, &reorder),
                tangents: Vec::new(),
                morphs,
                joint_weights: compute_buffer::encode_joint_weights(&weights, &reorder),
                joint_indices: compute_buffer::encode_joint_indices(&weights, &reorder),
                output_indices: compute_buffer::encode_output_indices(&reorder),
            };
            black_box(compute_buffer::compute_layout(
                &blocks,
                &morph_info,
                TexturePrecision::Float,
            ))
        });
    });
}

// ---------------------------------------------------------------------------
// Source textures
// ---------------------------------------------------------------------------

fn bench_texture_encoding(c: &mut Criterion) {
    let verts = positions();
    let normals = vec![Vec3::Z; VERTICES];
    let tangents = vec![Vec4::X; VERTICES];
    let targets = morph_targets();
    let analysis = MorphAnalysis::new(&targets, VERTICES as u32);

    c.bench_function("neutral_pose_texture_20k", |b| {
        b.iter(|| {
            black_box(texture::encode_neutral_pose(
                &verts,
                &normals,
                &tangents,
                true,
                TexturePrecision::Float,
                1024,
            ))
        });
    });
    c.bench_function("morph_texture_8x20k_half", |b| {
        b.iter(|| {
            black_box(texture::encode_morph_targets(
                &targets,
                &analysis,
                TexturePrecision::Half,
                1024,
            ))
        });
    });
}

// ---------------------------------------------------------------------------
// Interleaved vertex buffer
// ---------------------------------------------------------------------------

fn bench_write_interleaved(c: &mut Criterion) {
    let mut info = MeshInfo::new();
    info.set_verts(positions());
    info.set_normals(vec![Vec3::Z; VERTICES]);
    info.set_bone_weights(bone_weights());
    info.tex_coords = vec![Vec2::new(0.5, 0.5); VERTICES];
    let format = VertexFormat::for_mesh(&info, true, 64);

    c.bench_function("write_interleaved_engine_20k", |b| {
        b.iter(|| black_box(vertex_format::write_interleaved(format, &info, VERTICES as u32)));
    });
}

criterion_group!(
    benches,
    bench_morph_analysis,
    bench_vertex_reorder,
    bench_compute_blocks,
    bench_texture_encoding,
    bench_write_interleaved,
);
criterion_main!(benches);
