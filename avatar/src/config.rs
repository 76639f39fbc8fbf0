//! Skinning configuration.
//!
//! A [`SkinningConfig`] is built once (usually from TOML) and handed to the
//! pipeline through its [`PipelineContext`](crate::PipelineContext).
//!
//! ```toml
//! skinning_mode = "gpu_texture"
//! source_morph_format = "half"
//! max_texture_dimension = 1024
//! frame_budget_ms = 2.0
//!
//! [shaders.textured]
//! shader = "avatar/standard"
//! keywords = ["HAS_TEXTURES"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AvatarError, AvatarResult};

/// Who deforms the mesh at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkinningMode {
    /// The engine's skinned mesh renderer; joints live in the vertex buffer.
    #[default]
    Engine,
    /// Texture-based GPU skinning.
    GpuTexture,
    /// Raw-buffer compute skinning.
    ComputeBuffer,
    /// Both GPU skinning resources are built.
    GpuTextureAndCompute,
}

impl SkinningMode {
    /// Whether the vertex buffer carries normals, tangents and joints.
    pub fn is_engine(&self) -> bool {
        matches!(self, Self::Engine)
    }

    /// Whether a texture-variant skinning primitive is built.
    pub fn builds_texture(&self) -> bool {
        matches!(self, Self::GpuTexture | Self::GpuTextureAndCompute)
    }

    /// Whether a compute-variant skinning primitive is built.
    pub fn builds_compute(&self) -> bool {
        matches!(self, Self::ComputeBuffer | Self::GpuTextureAndCompute)
    }
}

/// Storage precision of encoded vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum TexturePrecision {
    #[default]
    Float = 0,
    Half = 1,
    Unorm16 = 2,
    Snorm10 = 3,
    Byte = 4,
}

/// Shader setup for one class of material.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Shader name passed to the device.
    pub shader: String,
    /// Keywords enabled on every material using this shader.
    pub keywords: Vec<String>,
    /// Float properties set on every material using this shader.
    pub float_constants: BTreeMap<String, f32>,
    pub main_texture: Option<String>,
    pub base_color_texture: Option<String>,
    pub base_color_factor: Option<String>,
    pub normal_texture: Option<String>,
    pub emissive_texture: Option<String>,
    pub occlusion_texture: Option<String>,
    pub metallic_roughness_texture: Option<String>,
    pub metallic_factor: Option<String>,
    pub roughness_factor: Option<String>,
}

impl ShaderConfig {
    fn new(shader: &str) -> Self {
        Self {
            shader: shader.to_string(),
            main_texture: Some("_MainTex".to_string()),
            base_color_texture: Some("_BaseColorTex".to_string()),
            base_color_factor: Some("_BaseColorFactor".to_string()),
            normal_texture: Some("_NormalTex".to_string()),
            emissive_texture: Some("_EmissiveTex".to_string()),
            occlusion_texture: Some("_OcclusionTex".to_string()),
            metallic_roughness_texture: Some("_MetallicRoughnessTex".to_string()),
            metallic_factor: Some("_MetallicFactor".to_string()),
            roughness_factor: Some("_RoughnessFactor".to_string()),
            ..Self::default()
        }
    }
}

/// Shader configs keyed by what a material provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderTable {
    /// No textures.
    pub solid: Option<ShaderConfig>,
    /// Textures without a metallic-roughness map.
    pub textured: Option<ShaderConfig>,
    /// Textures including a metallic-roughness map.
    pub textured_metallic: Option<ShaderConfig>,
}

impl Default for ShaderTable {
    fn default() -> Self {
        Self {
            solid: Some(ShaderConfig::new("avatar/solid")),
            textured: Some(ShaderConfig::new("avatar/textured")),
            textured_metallic: Some(ShaderConfig::new("avatar/textured_metallic")),
        }
    }
}

impl ShaderTable {
    /// Pick the config for a material.
    pub fn select(&self, has_metallic: bool, has_textures: bool) -> Option<&ShaderConfig> {
        match (has_textures, has_metallic) {
            (false, _) => self.solid.as_ref(),
            (true, false) => self.textured.as_ref(),
            (true, true) => self.textured_metallic.as_ref(),
        }
    }
}

/// Engine-wide skinning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinningConfig {
    pub skinning_mode: SkinningMode,
    /// Precision of morph target deltas in both skinning variants.
    pub source_morph_format: TexturePrecision,
    /// Precision of the skinner's output positions.
    pub skinner_output_format: TexturePrecision,
    /// Precision of the texture-variant neutral pose.
    pub neutral_pose_format: TexturePrecision,
    /// Precision of the texture-variant joints texture.
    pub joints_format: TexturePrecision,
    /// Largest texture edge the texture variant allocates.
    pub max_texture_dimension: u32,
    /// Write compute buffers block by block instead of in one upload.
    pub partial_buffer_updates: bool,
    /// Time budget of one scheduling pass; `None` is unlimited.
    pub frame_budget_ms: Option<f32>,
    /// Background worker threads; 0 picks a default.
    pub worker_threads: usize,
    pub shaders: ShaderTable,
}

impl Default for SkinningConfig {
    fn default() -> Self {
        Self {
            skinning_mode: SkinningMode::Engine,
            source_morph_format: TexturePrecision::Float,
            skinner_output_format: TexturePrecision::Float,
            neutral_pose_format: TexturePrecision::Float,
            joints_format: TexturePrecision::Float,
            max_texture_dimension: 512,
            partial_buffer_updates: false,
            frame_budget_ms: None,
            worker_threads: 0,
            shaders: ShaderTable::default(),
        }
    }
}

impl SkinningConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> AvatarResult<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.validate();
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> AvatarResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AvatarError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("SkinningConfig: loading {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Same config with a different skinning mode.
    pub fn with_mode(mut self, mode: SkinningMode) -> Self {
        self.skinning_mode = mode;
        self
    }

    /// Replace settings the encoders cannot honour.
    pub fn validate(&mut self) {
        if matches!(
            self.source_morph_format,
            TexturePrecision::Byte | TexturePrecision::Unorm16
        ) {
            log::error!(
                "SkinningConfig: morph precision {:?} is unsupported, using Snorm10",
                self.source_morph_format
            );
            self.source_morph_format = TexturePrecision::Snorm10;
        }
        if self.max_texture_dimension == 0 {
            log::warn!("SkinningConfig: max_texture_dimension of 0 replaced by 512");
            self.max_texture_dimension = 512;
        }
    }

    /// Scheduling pass budget.
    pub fn frame_budget(&self) -> Option<Duration> {
        self.frame_budget_ms
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| Duration::from_micros((ms * 1000.0) as u64))
    }
}
