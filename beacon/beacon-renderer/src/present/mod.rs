//! Composer pass: exposure and tone mapping of the final HDR image onto the backbuffer.

use beacon_rhi::{BlendMode, RenderTarget, TextureId};
use glam::Vec2;

use crate::bloom::BLOOM_OUTPUT;
use crate::error::Result;
use crate::graph::{color_targets, initialised, FrameContext, InitContext, RenderPass};
use crate::light_pass::HDR_TARGET;
use crate::material::{Material, MaterialHandle, UpdateFrequency};

pub const COMPOSER_MATERIAL: &str = "composer.material";

struct ComposerState {
    material: MaterialHandle,
    backbuffer_size: Option<(u32, u32)>,
}

#[derive(Default)]
pub struct ComposerPass {
    state: Option<ComposerState>,
}

impl ComposerPass {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Bloom output when the Bloom pass ran, otherwise the lit HDR image.
fn source_texture(ctx: &InitContext<'_>) -> Result<TextureId> {
    let name = if ctx.registry.contains_texture(BLOOM_OUTPUT) {
        BLOOM_OUTPUT
    } else {
        HDR_TARGET
    };
    Ok(ctx.registry.texture(name)?.id())
}

impl RenderPass for ComposerPass {
    fn name(&self) -> &str {
        "Composer"
    }

    fn initialise(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        let source = source_texture(ctx)?;
        let mut material = Material::new(
            ctx.device,
            ctx.registry,
            COMPOSER_MATERIAL,
            "composer",
            UpdateFrequency::Static,
        )?;
        let backbuffer = RenderTarget::new(ctx.device.backbuffer());
        color_targets(material.shader(), "Composer", &[("backbuffer", backbuffer)])?;
        material.set_texture("hdr_map", source);
        material.set_scalar("exposure", ctx.config.exposure);
        material.set_scalar("tone_mode", ctx.config.tone_mapping.shader_mode());
        let material = material.into_handle();
        ctx.registry.insert_material(COMPOSER_MATERIAL, material.clone())?;
        self.state = Some(ComposerState {
            material,
            backbuffer_size: None,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let state = initialised(&mut self.state, "Composer");
        let backbuffer = ctx.device.backbuffer();
        let size = ctx.device.texture_size(backbuffer)?;
        if state.backbuffer_size != Some(size) {
            log::debug!("composer: backbuffer {}x{}", size.0, size.1);
            let texel = Vec2::new(1.0 / size.0.max(1) as f32, 1.0 / size.1.max(1) as f32);
            state.material.borrow_mut().set_vector2("target_texel", texel);
            state.backbuffer_size = Some(size);
        }

        let target = RenderTarget::new(backbuffer);
        ctx.device.set_render_targets(&[target], None)?;
        ctx.device.clear_color(target, ctx.config.background_color)?;
        ctx.device.set_blend_mode(BlendMode::Alpha)?;
        ctx.draw_fullscreen(&state.material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::PipelineBinder;
    use crate::config::{BeaconConfig, ToneMapping};
    use crate::frame::FrameData;
    use crate::registry::Registry;
    use crate::resources::Texture;
    use crate::shader::builtin_sources;
    use beacon_rhi::{
        BufferDescriptor, Device, DeviceCall, NullDevice, TextureDimension, TextureFormat,
    };

    fn setup(config: &BeaconConfig, with_bloom: bool) -> (NullDevice, Registry, ComposerPass) {
        let mut device = NullDevice::new(320, 200);
        let mut registry = Registry::with_defaults(&mut device).unwrap();
        registry.load_shaders(&mut device, &builtin_sources()).unwrap();
        let mut names = vec![HDR_TARGET];
        if with_bloom {
            names.push(BLOOM_OUTPUT);
        }
        for name in names {
            let texture = Texture::render_target(
                &mut device,
                name,
                (64, 64),
                TextureFormat::Rgba16Float,
                TextureDimension::D2,
            )
            .unwrap();
            registry.insert_texture(texture).unwrap();
        }
        let mut pass = ComposerPass::new();
        pass.initialise(&mut InitContext {
            device: &mut device,
            registry: &mut registry,
            config,
        })
        .unwrap();
        (device, registry, pass)
    }

    #[test]
    fn reads_bloom_output_when_present() {
        let config = BeaconConfig::default();
        let (_, registry, _) = setup(&config, true);
        let material = registry.material(COMPOSER_MATERIAL).unwrap();
        assert_eq!(
            material.borrow().texture("hdr_map"),
            Some(registry.texture(BLOOM_OUTPUT).unwrap().id())
        );

        let (_, registry, _) = setup(&config, false);
        let material = registry.material(COMPOSER_MATERIAL).unwrap();
        assert_eq!(
            material.borrow().texture("hdr_map"),
            Some(registry.texture(HDR_TARGET).unwrap().id())
        );
    }

    #[test]
    fn draws_to_backbuffer_with_tone_settings() {
        let config = BeaconConfig {
            exposure: 2.0,
            tone_mapping: ToneMapping::None,
            background_color: [0.1, 0.2, 0.3, 1.0],
            ..Default::default()
        };
        let (mut device, registry, mut pass) = setup(&config, false);
        let frame_constants = device
            .create_buffer(
                &BufferDescriptor {
                    size: 192,
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        let frame = FrameData::default();
        let mut binder = PipelineBinder::new();
        device.take_calls();
        pass.render(&mut FrameContext {
            device: &mut device,
            binder: &mut binder,
            registry: &registry,
            config: &config,
            frame: &frame,
            frame_constants,
        })
        .unwrap();

        let backbuffer = RenderTarget::new(device.backbuffer());
        assert!(device.calls().contains(&DeviceCall::ClearColor {
            target: backbuffer,
            color: [0.1, 0.2, 0.3, 1.0],
        }));
        assert!(device
            .calls()
            .contains(&DeviceCall::SetBlendMode(BlendMode::Alpha)));
        assert_eq!(device.draw_count(), 1);

        let material = registry.material(COMPOSER_MATERIAL).unwrap();
        let material = material.borrow();
        assert_eq!(material.scalar("exposure"), 2.0);
        assert_eq!(material.scalar("tone_mode"), 1.0);
        assert_eq!(
            material.vector2("target_texel"),
            Vec2::new(1.0 / 320.0, 1.0 / 200.0)
        );
    }
}
