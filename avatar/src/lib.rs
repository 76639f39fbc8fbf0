//! # meshweave avatar
//!
//! Turns native avatar assets into engine meshes, materials and GPU skinning
//! resources without stalling the frame.
//!
//! ## Overview
//!
//! - [`ResourceManager`] reacts to native resource notifications and keeps a
//!   [`ResourceLoader`] per resource.
//! - [`AvatarPrimitive`] loads one primitive's mesh and material in two
//!   slices, fetching native data on background work units.
//! - [`skinning`] builds the packed compute buffer or the source textures
//!   consumed by GPU skinning, depending on [`SkinningMode`].
//!
//! Everything here runs on the thread that owns the [`PipelineContext`]
//! and is advanced by calling `ctx.slicer.run_frame()` once per frame.
//!
//! ## Example
//!
//! ```ignore
//! let ctx = PipelineContext::new(device, source, SkinningConfig::load("skinning.toml")?)?;
//! let mut manager = ResourceManager::new(&ctx, SubMeshInclusionFlags::all());
//! manager.handle_status(resource, AssetStatus::Loaded)?;
//! while !manager.is_loaded(resource) {
//!     ctx.slicer.run_frame();
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod image;
pub mod loader;
pub mod mesh_info;
pub mod native;
pub mod primitive;
pub mod skinning;
pub mod vertex_format;

pub use config::{ShaderConfig, ShaderTable, SkinningConfig, SkinningMode, TexturePrecision};
pub use context::{AssetRegistry, PipelineContext};
pub use error::{AvatarError, AvatarResult};
pub use image::{AvatarImage, ImageState};
pub use loader::{LoaderState, ResourceLoader, ResourceManager};
pub use mesh_info::{BoneWeight, MeshInfo};
pub use native::{AssetId, AssetSource, AssetStatus, NativeError, SubMeshInclusionFlags};
pub use primitive::{AvatarPrimitive, LoadFlags};
pub use vertex_format::VertexFormat;

static_assertions::assert_impl_all!(SkinningConfig: Send, Sync);
