//! # Meshweave Graphics
//!
//! The owning-thread graphics device and the resources the avatar pipeline
//! produces.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsDevice`] - Creates buffers, textures, meshes and materials on its owning thread
//! - [`Buffer`] / [`Texture`] - Byte-addressable buffers and 2D texture arrays
//! - [`ExpandableTextureArray`] - A texture array that grows by whole layers as blocks are packed
//! - [`Mesh`] / [`Material`] - Renderable outputs of the pipeline
//!
//! ## Example
//!
//! ```ignore
//! use meshweave_graphics::{DeviceCapabilities, GraphicsDevice, BufferDescriptor, BufferUsage};
//!
//! let device = GraphicsDevice::new("avatar", DeviceCapabilities::default());
//! let buffer = device.create_buffer(&BufferDescriptor::new(256, BufferUsage::RAW))?;
//! buffer.write(0, &header_bytes)?;
//! ```

pub mod device;
pub mod error;
pub mod materials;
pub mod mesh;
pub mod resources;
pub mod texture_array;
pub mod types;

pub use device::{DeviceCapabilities, GraphicsDevice};
pub use error::GraphicsError;
pub use materials::{Material, MaterialDescriptor};
pub use mesh::{BlendShape, Mesh};
pub use resources::{Buffer, Texture, TextureRegion};
pub use texture_array::{BlockHandle, ExpandableTextureArray, ListenerId, TextureLayout};
pub use types::{
    Aabb, BufferDescriptor, BufferUsage, Extent3d, TextureDescriptor, TextureFormat, TextureUsage,
};
