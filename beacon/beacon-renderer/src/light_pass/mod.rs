//! Lighting pass: one full-screen draw for the directional light (plus ambient) and one per point
//! light, accumulated additively into the HDR target from the G-buffer.

use beacon_rhi::{BlendMode, RenderTarget, TextureDimension, TextureFormat, TextureId};
use glam::{Mat4, Vec3};

use crate::error::Result;
use crate::gbuffer::{ALBEDO_TARGET, DEPTH_TARGET, NORMAL_TARGET, SPECULAR_TARGET};
use crate::graph::{color_targets, initialised, FrameContext, InitContext, RenderPass};
use crate::material::{Material, MaterialHandle, UpdateFrequency};
use crate::registry::Registry;
use crate::resources::Texture;
use crate::shadows::{directional_light_matrix, point_shadow_name, DIRECTIONAL_SHADOW};

pub const HDR_TARGET: &str = "lighting.hdr";
/// Depth 1.0 everywhere: comparisons always pass, so the light is unshadowed.
pub const NO_SHADOW: &str = "shadow.none";
pub const NO_SHADOW_CUBE: &str = "shadow.none_cube";

pub const DIRECTIONAL_MATERIAL: &str = "lighting.directional";
pub const POINT_MATERIAL: &str = "lighting.point";

const GBUFFER_INPUTS: [(&str, &str); 4] = [
    ("normal_map", NORMAL_TARGET),
    ("albedo_map", ALBEDO_TARGET),
    ("specular_map", SPECULAR_TARGET),
    ("depth_map", DEPTH_TARGET),
];

struct LightingState {
    hdr: RenderTarget,
    no_shadow: TextureId,
    no_shadow_cube: TextureId,
    directional: MaterialHandle,
    point: MaterialHandle,
    directional_map: Option<TextureId>,
    point_maps: Vec<TextureId>,
    fallbacks_cleared: bool,
}

#[derive(Default)]
pub struct LightingPass {
    state: Option<LightingState>,
}

impl LightingPass {
    pub fn new() -> Self {
        Self::default()
    }
}

fn fallback_shadow(
    ctx: &mut InitContext<'_>,
    name: &str,
    dimension: TextureDimension,
) -> Result<TextureId> {
    if let Ok(texture) = ctx.registry.texture(name) {
        return Ok(texture.id());
    }
    let texture =
        Texture::render_target(ctx.device, name, (1, 1), TextureFormat::Depth32Float, dimension)?;
    let id = texture.id();
    ctx.registry.insert_texture(texture)?;
    Ok(id)
}

/// Full-screen light material reading the G-buffer, registered under `name`.
fn light_material(
    ctx: &mut InitContext<'_>,
    name: &str,
    shader: &str,
    hdr: RenderTarget,
) -> Result<MaterialHandle> {
    let mut material =
        Material::new(ctx.device, ctx.registry, name, shader, UpdateFrequency::Frequent)?;
    color_targets(material.shader(), "Lighting", &[("hdr", hdr)])?;
    for (property, texture) in GBUFFER_INPUTS {
        material.set_texture(property, ctx.registry.texture(texture)?.id());
    }
    let handle = material.into_handle();
    ctx.registry.insert_material(name, handle.clone())?;
    Ok(handle)
}

fn shadow_maps(registry: &Registry, max_point_lights: u32) -> (Option<TextureId>, Vec<TextureId>) {
    let directional = registry.texture(DIRECTIONAL_SHADOW).ok().map(Texture::id);
    let points = (0..max_point_lights as usize)
        .map_while(|index| registry.texture(&point_shadow_name(index)).ok().map(Texture::id))
        .collect();
    (directional, points)
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "Lighting"
    }

    fn initialise(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        let hdr = Texture::render_target(
            ctx.device,
            HDR_TARGET,
            (ctx.config.width, ctx.config.height),
            TextureFormat::Rgba16Float,
            TextureDimension::D2,
        )?;
        let hdr_target = hdr.target();
        ctx.registry.insert_texture(hdr)?;

        let no_shadow = fallback_shadow(ctx, NO_SHADOW, TextureDimension::D2)?;
        let no_shadow_cube = fallback_shadow(ctx, NO_SHADOW_CUBE, TextureDimension::Cube)?;

        let directional =
            light_material(ctx, DIRECTIONAL_MATERIAL, "light_directional", hdr_target)?;
        directional.borrow_mut().set_texture("shadow_map", no_shadow);
        let point = light_material(ctx, POINT_MATERIAL, "light_point", hdr_target)?;
        point.borrow_mut().set_texture("shadow_cube", no_shadow_cube);

        let (directional_map, point_maps) =
            shadow_maps(ctx.registry, ctx.config.max_point_lights);
        log::debug!(
            "lighting: directional shadow {}, {} point shadow cubes",
            directional_map.is_some(),
            point_maps.len()
        );
        self.state = Some(LightingState {
            hdr: hdr_target,
            no_shadow,
            no_shadow_cube,
            directional,
            point,
            directional_map,
            point_maps,
            fallbacks_cleared: false,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let state = initialised(&mut self.state, "Lighting");
        let (frame, config) = (ctx.frame, ctx.config);

        if !state.fallbacks_cleared {
            ctx.device.clear_depth(RenderTarget::new(state.no_shadow), 1.0)?;
            for layer in 0..TextureDimension::Cube.layer_count() {
                ctx.device
                    .clear_depth(RenderTarget::new(state.no_shadow_cube).layer(layer), 1.0)?;
            }
            state.fallbacks_cleared = true;
        }

        ctx.device.set_render_targets(&[state.hdr], None)?;
        ctx.device.clear_color(state.hdr, [0.0; 4])?;
        ctx.device.set_blend_mode(BlendMode::Additive)?;

        {
            let mut material = state.directional.borrow_mut();
            material.set_scalar("shadow_bias", config.shadow_bias);
            match &frame.view.directional_light {
                Some(light) => {
                    let color = Vec3::from_array(light.color) * light.intensity;
                    material.set_vector3("color", color);
                    material.set_vector3("direction", Vec3::from_array(light.direction));
                    let shadow = state
                        .directional_map
                        .filter(|_| config.shadows_enabled && light.cast_shadows);
                    if let Some(map) = shadow {
                        let (matrix, _) =
                            directional_light_matrix(light, frame.camera_position(), config);
                        material.set_matrix("light_view_proj", matrix);
                        material.set_scalar("shadow_enabled", 1.0);
                        material.set_texture("shadow_map", map);
                    } else {
                        material.set_matrix("light_view_proj", Mat4::IDENTITY);
                        material.set_scalar("shadow_enabled", 0.0);
                        material.set_texture("shadow_map", state.no_shadow);
                    }
                }
                None => {
                    // Ambient only.
                    material.set_vector3("color", Vec3::ZERO);
                    material.set_scalar("shadow_enabled", 0.0);
                    material.set_texture("shadow_map", state.no_shadow);
                }
            }
        }
        ctx.draw_fullscreen(&state.directional)?;

        for (index, light) in frame.view.point_lights.iter().enumerate() {
            {
                let mut material = state.point.borrow_mut();
                material.set_vector3("position", Vec3::from_array(light.position));
                material.set_scalar("range", light.range);
                material.set_vector3("color", Vec3::from_array(light.color) * light.intensity);
                material.set_scalar("near", config.point_light_near);
                material.set_scalar("far", light.range);
                material.set_scalar("shadow_bias", config.shadow_bias);
                let cube = state
                    .point_maps
                    .get(index)
                    .copied()
                    .filter(|_| config.shadows_enabled && light.cast_shadows);
                material.set_scalar("shadow_enabled", if cube.is_some() { 1.0 } else { 0.0 });
                material.set_texture("shadow_cube", cube.unwrap_or(state.no_shadow_cube));
            }
            ctx.draw_fullscreen(&state.point)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::PipelineBinder;
    use crate::config::BeaconConfig;
    use crate::frame::FrameData;
    use crate::gbuffer::GeometryPass;
    use crate::shader::builtin_sources;
    use crate::shadows::ShadowPass;
    use beacon_rhi::{BufferAccess, BufferDescriptor, Device, DeviceCall, NullDevice, Stage};
    use render_api::{DirectionalLight, ExtractedView, PointLight};

    struct Fixture {
        device: NullDevice,
        registry: Registry,
        config: BeaconConfig,
        lighting: LightingPass,
    }

    impl Fixture {
        fn new(config: BeaconConfig) -> Self {
            let mut device = NullDevice::default();
            let mut registry = Registry::with_defaults(&mut device).unwrap();
            registry.load_shaders(&mut device, &builtin_sources()).unwrap();
            let mut lighting = LightingPass::new();
            let mut ctx = InitContext {
                device: &mut device,
                registry: &mut registry,
                config: &config,
            };
            ShadowPass::new().initialise(&mut ctx).unwrap();
            GeometryPass::new().initialise(&mut ctx).unwrap();
            lighting.initialise(&mut ctx).unwrap();
            Self {
                device,
                registry,
                config,
                lighting,
            }
        }

        fn render(&mut self, view: ExtractedView) {
            let frame_constants = self
                .device
                .create_buffer(
                    &BufferDescriptor {
                        size: 192,
                        access: BufferAccess::Dynamic,
                        ..Default::default()
                    },
                    None,
                )
                .unwrap();
            let frame = FrameData::new(view);
            let mut binder = PipelineBinder::new();
            let mut ctx = FrameContext {
                device: &mut self.device,
                binder: &mut binder,
                registry: &self.registry,
                config: &self.config,
                frame: &frame,
                frame_constants,
            };
            self.lighting.render(&mut ctx).unwrap();
        }

        fn texture(&self, name: &str) -> TextureId {
            self.registry.texture(name).unwrap().id()
        }
    }

    fn small_config(shadows_enabled: bool) -> BeaconConfig {
        BeaconConfig {
            width: 64,
            height: 32,
            shadows_enabled,
            shadow_map_size: 64,
            point_shadow_size: 16,
            max_point_lights: 1,
            ..Default::default()
        }
    }

    #[test]
    fn one_draw_per_light_plus_directional() {
        let mut fixture = Fixture::new(small_config(true));
        let view = ExtractedView {
            point_lights: vec![PointLight::default(), PointLight::default()],
            ..Default::default()
        };
        fixture.render(view);
        assert_eq!(fixture.device.draw_count(), 3);
        assert!(fixture
            .device
            .calls()
            .contains(&DeviceCall::SetBlendMode(BlendMode::Additive)));
        assert!(fixture.registry.contains_texture(&point_shadow_name(0)));
    }

    #[test]
    fn shadowed_light_samples_its_map() {
        let mut fixture = Fixture::new(small_config(true));
        let view = ExtractedView {
            directional_light: Some(DirectionalLight::default()),
            ..Default::default()
        };
        fixture.render(view);
        let material = fixture.registry.material(DIRECTIONAL_MATERIAL).unwrap();
        assert_eq!(material.borrow().scalar("shadow_enabled"), 1.0);
        assert_eq!(
            fixture.device.bound_texture(Stage::Pixel, 4),
            Some(fixture.texture(DIRECTIONAL_SHADOW))
        );
    }

    #[test]
    fn disabled_shadows_use_fallback_maps() {
        let mut fixture = Fixture::new(small_config(false));
        let view = ExtractedView {
            directional_light: Some(DirectionalLight::default()),
            point_lights: vec![PointLight {
                cast_shadows: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        fixture.render(view);
        assert!(!fixture.registry.contains_texture(DIRECTIONAL_SHADOW));
        let point = fixture.registry.material(POINT_MATERIAL).unwrap();
        assert_eq!(point.borrow().scalar("shadow_enabled"), 0.0);
        assert_eq!(
            point.borrow().texture("shadow_cube"),
            Some(fixture.texture(NO_SHADOW_CUBE))
        );
        // Fallback maps are cleared once: one 2D plus six cube layers.
        let depth_clears = fixture
            .device
            .count(|c| matches!(c, DeviceCall::ClearDepth { .. }));
        assert_eq!(depth_clears, 7);
    }

    #[test]
    fn light_color_is_scaled_by_intensity() {
        let mut fixture = Fixture::new(small_config(false));
        let view = ExtractedView {
            point_lights: vec![PointLight {
                color: [1.0, 0.5, 0.0],
                intensity: 4.0,
                ..Default::default()
            }],
            ..Default::default()
        };
        fixture.render(view);
        let point = fixture.registry.material(POINT_MATERIAL).unwrap();
        assert_eq!(point.borrow().vector3("color"), Vec3::new(4.0, 2.0, 0.0));
        let directional = fixture.registry.material(DIRECTIONAL_MATERIAL).unwrap();
        assert_eq!(directional.borrow().vector3("color"), Vec3::ZERO);
    }
}
