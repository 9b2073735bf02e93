//! Bloom pass: threshold the HDR image into a half-resolution mip chain, blur it down and back up,
//! then composite the glow over the HDR image into `bloom.output`.
//!
//! With bloom disabled only the composite runs, as a copy of the HDR image.

use beacon_rhi::{BlendMode, RenderTarget, TextureDimension, TextureFormat, TextureId};
use glam::Vec2;

use crate::error::Result;
use crate::graph::{color_targets, initialised, FrameContext, InitContext, RenderPass};
use crate::light_pass::HDR_TARGET;
use crate::material::{Material, MaterialHandle, UpdateFrequency};
use crate::registry::BLACK_TEXTURE;
use crate::resources::Texture;

pub const BLOOM_OUTPUT: &str = "bloom.output";

pub fn bloom_mip_name(index: usize) -> String {
    format!("bloom.mip{index}")
}

/// One full-screen draw of the chain.
struct BloomStep {
    material: MaterialHandle,
    target: RenderTarget,
    blend: BlendMode,
}

#[derive(Default)]
pub struct BloomPass {
    steps: Option<Vec<BloomStep>>,
}

impl BloomPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of full-screen draws per frame.
    pub fn step_count(&self) -> usize {
        self.steps.as_ref().map_or(0, Vec::len)
    }
}

/// Size of mip `index`: half the render resolution, halved again per level, never below 1.
pub fn mip_size(width: u32, height: u32, index: u32) -> (u32, u32) {
    ((width >> (index + 1)).max(1), (height >> (index + 1)).max(1))
}

struct StepBuilder<'c, 'a> {
    ctx: &'c mut InitContext<'a>,
    steps: Vec<BloomStep>,
}

impl StepBuilder<'_, '_> {
    /// Register a `shader` material named `name` that reads `source` and draws into `target`.
    fn push(
        &mut self,
        name: &str,
        shader: &str,
        source: &Texture,
        target: &Texture,
        blend: BlendMode,
    ) -> Result<MaterialHandle> {
        let mut material = Material::new(
            self.ctx.device,
            self.ctx.registry,
            name,
            shader,
            UpdateFrequency::Static,
        )?;
        color_targets(material.shader(), "Bloom", &[("bloom", target.target())])?;
        material.set_texture("source_map", source.id());
        material.set_vector2("source_texel", Vec2::from_array(source.texel_size()));
        material.set_vector2("target_texel", Vec2::from_array(target.texel_size()));
        let handle = material.into_handle();
        self.ctx.registry.insert_material(name, handle.clone())?;
        self.steps.push(BloomStep {
            material: handle.clone(),
            target: target.target(),
            blend,
        });
        Ok(handle)
    }
}

impl RenderPass for BloomPass {
    fn name(&self) -> &str {
        "Bloom"
    }

    fn initialise(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        let config = ctx.config;
        let (width, height) = (config.width, config.height);
        let hdr = ctx.registry.texture(HDR_TARGET)?.clone();
        let dirt_name = config.bloom_dirt_texture.as_deref().unwrap_or(BLACK_TEXTURE);
        let dirt: TextureId = ctx.registry.texture(dirt_name)?.id();
        let black = ctx.registry.texture(BLACK_TEXTURE)?.clone();

        let output = Texture::render_target(
            ctx.device,
            BLOOM_OUTPUT,
            (width, height),
            TextureFormat::Rgba16Float,
            TextureDimension::D2,
        )?;
        ctx.registry.insert_texture(output.clone())?;

        let mut builder = StepBuilder {
            ctx,
            steps: Vec::new(),
        };
        let composite = if config.bloom_enabled {
            let count = config.bloom_mips();
            let mut mips = Vec::with_capacity(count as usize);
            for index in 0..count {
                let mip = Texture::render_target(
                    builder.ctx.device,
                    &bloom_mip_name(index as usize),
                    mip_size(width, height, index),
                    TextureFormat::Rgba16Float,
                    TextureDimension::D2,
                )?;
                builder.ctx.registry.insert_texture(mip.clone())?;
                mips.push(mip);
            }

            let threshold = builder.push(
                "bloom.threshold",
                "bloom_threshold",
                &hdr,
                &mips[0],
                BlendMode::Opaque,
            )?;
            threshold
                .borrow_mut()
                .set_scalar("threshold", config.bloom_threshold);
            threshold.borrow_mut().set_scalar("knee", config.bloom_knee);
            for index in 1..mips.len() {
                builder.push(
                    &format!("bloom.down{index}"),
                    "bloom_downsample",
                    &mips[index - 1],
                    &mips[index],
                    BlendMode::Opaque,
                )?;
            }
            for index in (0..mips.len() - 1).rev() {
                builder.push(
                    &format!("bloom.up{index}"),
                    "bloom_upsample",
                    &mips[index + 1],
                    &mips[index],
                    BlendMode::Additive,
                )?;
            }
            let composite = builder.push(
                "bloom.composite",
                "bloom_composite",
                &mips[0],
                &output,
                BlendMode::Opaque,
            )?;
            composite
                .borrow_mut()
                .set_scalar("intensity", config.bloom_intensity);
            composite
                .borrow_mut()
                .set_scalar("dirt_intensity", config.bloom_dirt_intensity);
            composite
        } else {
            log::info!("bloom disabled; composite copies the HDR image");
            let composite = builder.push(
                "bloom.composite",
                "bloom_composite",
                &black,
                &output,
                BlendMode::Opaque,
            )?;
            composite.borrow_mut().set_scalar("intensity", 0.0);
            composite.borrow_mut().set_scalar("dirt_intensity", 0.0);
            composite
        };
        {
            let mut composite = composite.borrow_mut();
            composite.set_texture("base_map", hdr.id());
            composite.set_texture("dirt_map", dirt);
        }

        log::debug!("bloom: {} steps", builder.steps.len());
        self.steps = Some(builder.steps);
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let steps = initialised(&mut self.steps, "Bloom");
        for step in steps.iter() {
            ctx.device.set_render_targets(&[step.target], None)?;
            ctx.device.set_blend_mode(step.blend)?;
            ctx.draw_fullscreen(&step.material)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BeaconConfig;
    use crate::registry::Registry;
    use crate::shader::builtin_sources;
    use beacon_rhi::NullDevice;
    use rstest::rstest;

    fn initialise(config: BeaconConfig) -> (NullDevice, Registry, BloomPass) {
        let mut device = NullDevice::default();
        let mut registry = Registry::with_defaults(&mut device).unwrap();
        registry.load_shaders(&mut device, &builtin_sources()).unwrap();
        let hdr = Texture::render_target(
            &mut device,
            HDR_TARGET,
            (config.width, config.height),
            TextureFormat::Rgba16Float,
            TextureDimension::D2,
        )
        .unwrap();
        registry.insert_texture(hdr).unwrap();
        let mut pass = BloomPass::new();
        pass.initialise(&mut InitContext {
            device: &mut device,
            registry: &mut registry,
            config: &config,
        })
        .unwrap();
        (device, registry, pass)
    }

    #[rstest]
    #[case(1, 2)]
    #[case(3, 6)]
    #[case(5, 10)]
    fn chain_has_two_draws_per_mip(#[case] mips: u32, #[case] steps: usize) {
        let config = BeaconConfig {
            width: 256,
            height: 128,
            bloom_mip_count: mips,
            ..Default::default()
        };
        let (_, registry, pass) = initialise(config);
        assert_eq!(pass.step_count(), steps);
        assert!(registry.contains_texture(&bloom_mip_name(mips as usize - 1)));
        assert!(!registry.contains_texture(&bloom_mip_name(mips as usize)));
    }

    #[test]
    fn mips_halve_and_stop_at_one() {
        assert_eq!(mip_size(256, 128, 0), (128, 64));
        assert_eq!(mip_size(256, 128, 2), (32, 16));
        assert_eq!(mip_size(256, 128, 7), (1, 1));
    }

    #[test]
    fn disabled_bloom_only_composites() {
        let config = BeaconConfig {
            width: 64,
            height: 64,
            bloom_enabled: false,
            ..Default::default()
        };
        let (_, registry, pass) = initialise(config);
        assert_eq!(pass.step_count(), 1);
        assert!(!registry.contains_texture(&bloom_mip_name(0)));
        let composite = registry.material("bloom.composite").unwrap();
        let composite = composite.borrow();
        assert_eq!(composite.scalar("intensity"), 0.0);
        assert_eq!(
            composite.texture("source_map"),
            Some(registry.texture(BLACK_TEXTURE).unwrap().id())
        );
        assert_eq!(
            composite.texture("base_map"),
            Some(registry.texture(HDR_TARGET).unwrap().id())
        );
    }

    #[test]
    fn texel_sizes_follow_source_and_target() {
        let config = BeaconConfig {
            width: 256,
            height: 128,
            bloom_mip_count: 2,
            ..Default::default()
        };
        let (_, registry, _) = initialise(config);
        let down = registry.material("bloom.down1").unwrap();
        let down = down.borrow();
        assert_eq!(down.vector2("source_texel"), Vec2::new(1.0 / 128.0, 1.0 / 64.0));
        assert_eq!(down.vector2("target_texel"), Vec2::new(1.0 / 64.0, 1.0 / 32.0));
    }

    #[test]
    fn missing_dirt_texture_is_reported() {
        let mut device = NullDevice::default();
        let mut registry = Registry::with_defaults(&mut device).unwrap();
        registry.load_shaders(&mut device, &builtin_sources()).unwrap();
        let hdr = Texture::render_target(
            &mut device,
            HDR_TARGET,
            (8, 8),
            TextureFormat::Rgba16Float,
            TextureDimension::D2,
        )
        .unwrap();
        registry.insert_texture(hdr).unwrap();
        let config = BeaconConfig {
            bloom_dirt_texture: Some("lens_dirt".into()),
            ..Default::default()
        };
        let result = BloomPass::new().initialise(&mut InitContext {
            device: &mut device,
            registry: &mut registry,
            config: &config,
        });
        assert!(matches!(
            result,
            Err(crate::error::RenderError::ResourceNotFound { kind: "texture", .. })
        ));
    }
}
