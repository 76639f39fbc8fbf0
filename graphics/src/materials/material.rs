//! Material definition.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use glam::Vec4;
use parking_lot::RwLock;

use crate::device::GraphicsDevice;
use crate::resources::Texture;

/// Descriptor for creating a material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MaterialDescriptor {
    /// Shader name.
    pub shader: String,
    /// Keywords enabled at creation.
    pub keywords: Vec<String>,
    /// Debug label for the material.
    pub label: Option<String>,
}

impl MaterialDescriptor {
    /// Create a new material descriptor.
    pub fn new(shader: impl Into<String>) -> Self {
        Self {
            shader: shader.into(),
            keywords: Vec::new(),
            label: None,
        }
    }

    /// Enable a keyword at creation.
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Default)]
struct MaterialState {
    keywords: BTreeSet<String>,
    floats: HashMap<String, f32>,
    colors: HashMap<String, Vec4>,
    textures: HashMap<String, Arc<Texture>>,
}

/// A material: a shader plus its parameter values.
///
/// # Example
///
/// ```ignore
/// let material = device.create_material(&MaterialDescriptor::new("Avatar/Lit"))?;
/// material.set_texture("u_BaseColorSampler", texture);
/// material.set_color("u_BaseColorFactor", Vec4::ONE);
/// material.enable_keyword("HAS_NORMAL_MAP_ON");
/// ```
pub struct Material {
    device: Weak<GraphicsDevice>,
    descriptor: MaterialDescriptor,
    state: RwLock<MaterialState>,
}

impl Material {
    pub(crate) fn new(device: Weak<GraphicsDevice>, descriptor: MaterialDescriptor) -> Self {
        let state = MaterialState {
            keywords: descriptor.keywords.iter().cloned().collect(),
            ..Default::default()
        };
        Self {
            device,
            descriptor,
            state: RwLock::new(state),
        }
    }

    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Shader name.
    pub fn shader(&self) -> &str {
        &self.descriptor.shader
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Enable a shader keyword.
    pub fn enable_keyword(&self, keyword: impl Into<String>) {
        self.state.write().keywords.insert(keyword.into());
    }

    /// Disable a shader keyword.
    pub fn disable_keyword(&self, keyword: &str) {
        self.state.write().keywords.remove(keyword);
    }

    /// Whether a keyword is enabled.
    pub fn is_keyword_enabled(&self, keyword: &str) -> bool {
        self.state.read().keywords.contains(keyword)
    }

    /// Enabled keywords in sorted order.
    pub fn keywords(&self) -> Vec<String> {
        self.state.read().keywords.iter().cloned().collect()
    }

    /// Set a float property.
    pub fn set_float(&self, name: impl Into<String>, value: f32) {
        self.state.write().floats.insert(name.into(), value);
    }

    /// Get a float property.
    pub fn float(&self, name: &str) -> Option<f32> {
        self.state.read().floats.get(name).copied()
    }

    /// Set a color property.
    pub fn set_color(&self, name: impl Into<String>, value: Vec4) {
        self.state.write().colors.insert(name.into(), value);
    }

    /// Get a color property.
    pub fn color(&self, name: &str) -> Option<Vec4> {
        self.state.read().colors.get(name).copied()
    }

    /// Bind a texture to a slot.
    pub fn set_texture(&self, slot: impl Into<String>, texture: Arc<Texture>) {
        self.state.write().textures.insert(slot.into(), texture);
    }

    /// Texture bound to a slot.
    pub fn texture(&self, slot: &str) -> Option<Arc<Texture>> {
        self.state.read().textures.get(slot).cloned()
    }

    /// Number of bound textures.
    pub fn texture_count(&self) -> usize {
        self.state.read().textures.len()
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Material")
            .field("shader", &self.descriptor.shader)
            .field("keywords", &state.keywords)
            .field("textures", &state.textures.len())
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Material: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords() {
        let material = Material::new(
            Weak::new(),
            MaterialDescriptor::new("Lit").with_keyword("SKINNED"),
        );
        assert!(material.is_keyword_enabled("SKINNED"));
        material.enable_keyword("HAS_NORMAL_MAP_ON");
        material.disable_keyword("SKINNED");
        assert_eq!(material.keywords(), vec!["HAS_NORMAL_MAP_ON".to_string()]);
    }

    #[test]
    fn properties() {
        let material = Material::new(Weak::new(), MaterialDescriptor::new("Lit"));
        material.set_float("u_MetallicFactor", 0.5);
        material.set_color("u_BaseColorFactor", Vec4::new(1.0, 0.5, 0.25, 1.0));
        assert_eq!(material.float("u_MetallicFactor"), Some(0.5));
        assert_eq!(material.float("missing"), None);
        assert_eq!(
            material.color("u_BaseColorFactor"),
            Some(Vec4::new(1.0, 0.5, 0.25, 1.0))
        );
        assert_eq!(material.shader(), "Lit");
    }
}
