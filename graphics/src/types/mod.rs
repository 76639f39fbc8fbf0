//! Descriptors, usage flags and formats of graphics resources.

mod buffer;
mod common;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::{Aabb, Extent3d};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};
