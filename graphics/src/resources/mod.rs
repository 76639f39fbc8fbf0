//! GPU resources.
//!
//! This module contains the GPU resource types that are created by [`GraphicsDevice`]:
//! - [`Buffer`] - byte-addressable GPU memory buffer
//! - [`Texture`] - 2D texture or 2D texture array
//!
//! Resources are reference-counted with [`Arc`] and can be shared across threads.
//! Contents are kept in host memory behind a lock so that writes issued by the
//! owning thread can be inspected from anywhere.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice
//! [`Arc`]: std::sync::Arc

mod buffer;
mod texture;

pub use buffer::Buffer;
pub use texture::{Texture, TextureRegion};
