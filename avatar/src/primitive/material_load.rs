use std::rc::Rc;
use std::sync::Arc;

use meshweave_core::compute::{SliceContext, SliceResult};
use meshweave_graphics::{Material, MaterialDescriptor, Texture};

use crate::config::ShaderConfig;
use crate::image::AvatarImage;
use crate::native::{
    AssetSource, HighQualityFlags, ImageInfo, MaterialTexture, MaterialTextureType, PrimitiveData,
    optional,
};

use super::{LoadFlags, PrimitiveInner};

/// Texture and image descriptors of one primitive.
#[derive(Default)]
struct MaterialSources {
    textures: Vec<MaterialTexture>,
    images: Vec<ImageInfo>,
}

fn fetch_material_sources(source: &dyn AssetSource, data: PrimitiveData) -> MaterialSources {
    meshweave_core::profile_function!();
    let textures = (0..data.texture_count)
        .filter_map(|index| match source.material_texture(data.id, index) {
            Ok(texture) => Some(texture),
            Err(err) => {
                log::error!("material_texture {err}");
                None
            }
        })
        .collect();
    let image_count = optional("image_count", source.image_count(data.id));
    let images = (0..image_count)
        .map(|index| optional("image_by_index", source.image_by_index(data.id, index)))
        .collect();
    MaterialSources { textures, images }
}

pub(super) async fn load_material(inner: Rc<PrimitiveInner>, slice: SliceContext) -> SliceResult {
    let data = inner.data;
    let work = {
        let source = Arc::clone(&inner.ctx.source);
        inner.spawn("material", move |token| {
            token.check()?;
            Ok(fetch_material_sources(source.as_ref(), data))
        })
    };
    let sources = inner.finish(&slice, work).await?;

    slice.hold().await;
    let images: Vec<AvatarImage> = sources
        .images
        .iter()
        .enumerate()
        .filter(|(_, info)| info.id.is_valid())
        .map(|(index, info)| {
            let assets = &inner.ctx.assets;
            assets.image(info.id).unwrap_or_else(|| {
                let image = AvatarImage::load(&inner.ctx, data.id, index as u32, *info);
                assets.insert_image(image.clone());
                image
            })
        })
        .collect();
    *inner.images.borrow_mut() = images.clone();

    while !images.iter().all(AvatarImage::has_copied_data) {
        slice.delay().await;
    }
    inner.set_copied(LoadFlags::MATERIAL);
    while !images.iter().all(AvatarImage::is_finished) {
        slice.delay().await;
    }

    slice.hold().await;
    let has_textures = !sources.textures.is_empty();
    let has_metallic = sources
        .textures
        .iter()
        .any(|texture| texture.kind == MaterialTextureType::MetallicRoughness);
    match inner.ctx.config.shaders.select(has_metallic, has_textures) {
        Some(shader) => match build_material(&inner, shader, &sources.textures) {
            Ok(material) => *inner.material.borrow_mut() = Some(material),
            Err(err) => log::error!("{}: failed to create material: {err}", inner.name),
        },
        None => log::error!(
            "{}: no shader configured (metallic: {has_metallic}, textured: {has_textures})",
            inner.name
        ),
    }

    inner.set_loaded(LoadFlags::MATERIAL);
    log::debug!("{}: material loaded", inner.name);
    Ok(())
}

fn build_material(
    inner: &PrimitiveInner,
    shader: &ShaderConfig,
    textures: &[MaterialTexture],
) -> Result<Arc<Material>, meshweave_graphics::GraphicsError> {
    let material = inner.ctx.device.create_material(
        &MaterialDescriptor::new(shader.shader.clone()).with_label(inner.name.clone()),
    )?;

    for texture in textures {
        let image = inner.ctx.assets.image(texture.image_id);
        match image.and_then(|image| image.texture()) {
            Some(image) => apply_texture(&material, shader, texture, image),
            None => log::error!("{}: Could not find image {}", inner.name, texture.image_id),
        }
    }

    for keyword in &shader.keywords {
        material.enable_keyword(keyword.clone());
    }
    for (name, value) in &shader.float_constants {
        material.set_float(name.clone(), *value);
    }

    let quality = inner.flags.high_quality;
    set_feature(
        &material,
        "HAS_NORMAL_MAP",
        quality.contains(HighQualityFlags::NORMAL_MAPS),
    );
    set_feature(
        &material,
        "ENABLE_HAIR",
        quality.contains(HighQualityFlags::PROPERTY_HAIR_MAP),
    );
    Ok(material)
}

/// Toggle a shader feature as both a `_ON` keyword and a float property.
fn set_feature(material: &Material, name: &str, enabled: bool) {
    let keyword = format!("{name}_ON");
    if enabled {
        material.enable_keyword(keyword);
    } else {
        material.disable_keyword(&keyword);
    }
    material.set_float(name, if enabled { 1.0 } else { 0.0 });
}

fn apply_texture(
    material: &Material,
    shader: &ShaderConfig,
    texture: &MaterialTexture,
    image: Arc<Texture>,
) {
    let set = |slot: &Option<String>| {
        if let Some(slot) = slot {
            material.set_texture(slot.clone(), Arc::clone(&image));
        }
    };
    match texture.kind {
        MaterialTextureType::BaseColor => {
            set(&shader.main_texture);
            set(&shader.base_color_texture);
            if let Some(factor) = &shader.base_color_factor {
                material.set_color(factor.clone(), texture.factor);
            }
        }
        MaterialTextureType::Normal => set(&shader.normal_texture),
        MaterialTextureType::Emissive => set(&shader.emissive_texture),
        MaterialTextureType::Occlusion => set(&shader.occlusion_texture),
        MaterialTextureType::MetallicRoughness => {
            set(&shader.metallic_roughness_texture);
            if let Some(metallic) = &shader.metallic_factor {
                material.set_float(metallic.clone(), texture.factor.x);
            }
            if let Some(roughness) = &shader.roughness_factor {
                material.set_float(roughness.clone(), texture.factor.y);
            }
        }
        MaterialTextureType::UsedInExtension => {}
    }
}
