//! Pipeline error types.

use std::path::PathBuf;

use meshweave_core::compute::WorkError;
use meshweave_graphics::GraphicsError;

use crate::native::{AssetStatus, NativeError};

/// Errors surfaced by the avatar pipeline.
///
/// Most load failures are logged and end with the affected primitive being
/// disposed; this type covers the calls that report failures to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    /// A configuration file could not be parsed.
    #[error("invalid skinning configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The graphics device refused to create or update a resource.
    #[error(transparent)]
    Graphics(#[from] GraphicsError),

    /// A required native call failed.
    #[error("{call} {error}")]
    Native {
        call: &'static str,
        #[source]
        error: NativeError,
    },

    /// A CPU staging allocation failed.
    #[error("failed to allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },

    /// A primitive has no vertices to build a mesh from.
    #[error("primitive has no vertices")]
    EmptyMesh,

    /// A primitive has more vertices than a 16-bit reorder table can address.
    #[error("{count} vertices exceed the reorder table limit of {max}")]
    TooManyVertices { count: u32, max: u32 },

    /// A background work unit failed.
    #[error(transparent)]
    Work(#[from] WorkError),

    /// A resource status notification the manager does not handle.
    #[error("unsupported resource status {0:?}")]
    UnsupportedStatus(AssetStatus),
}

impl AvatarError {
    /// Wrap a native failure with the name of the failing call.
    pub fn native(call: &'static str, error: NativeError) -> Self {
        Self::Native { call, error }
    }
}

impl From<AvatarError> for WorkError {
    fn from(err: AvatarError) -> Self {
        match err {
            AvatarError::Work(inner) => inner,
            other => WorkError::Failed(other.to_string()),
        }
    }
}

/// Result alias for pipeline calls.
pub type AvatarResult<T> = Result<T, AvatarError>;
