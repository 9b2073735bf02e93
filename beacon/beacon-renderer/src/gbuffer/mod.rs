//! Geometry pass: every submitted mesh with its own material into the G-buffer (normal, albedo,
//! specular) plus depth.

use beacon_rhi::{
    BlendMode, BufferAccess, BufferDescriptor, BufferId, BufferUsage, Device, RenderTarget, StageMask,
    TextureDimension, TextureFormat, UploadMode,
};

use crate::binder::OBJECT_SLOT;
use crate::error::Result;
use crate::frame::ObjectUniform;
use crate::graph::{
    check_vertex_layout, color_targets, initialised, FrameContext, InitContext, RenderPass,
};
use crate::resources::Texture;

pub const NORMAL_TARGET: &str = "gbuffer.normal";
pub const ALBEDO_TARGET: &str = "gbuffer.albedo";
pub const SPECULAR_TARGET: &str = "gbuffer.specular";
pub const DEPTH_TARGET: &str = "gbuffer.depth";

/// (shader target name, registry texture, format)
const COLOR_TARGETS: [(&str, &str, TextureFormat); 3] = [
    ("normal", NORMAL_TARGET, TextureFormat::Rgba16Float),
    ("albedo", ALBEDO_TARGET, TextureFormat::Rgba8Unorm),
    ("specular", SPECULAR_TARGET, TextureFormat::Rgba8Unorm),
];

struct GeometryState {
    colors: Vec<(&'static str, RenderTarget)>,
    depth: RenderTarget,
    object: BufferId,
}

#[derive(Default)]
pub struct GeometryPass {
    state: Option<GeometryState>,
}

impl GeometryPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for GeometryPass {
    fn name(&self) -> &str {
        "Geometry"
    }

    fn initialise(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        let size = (ctx.config.width, ctx.config.height);
        let mut colors = Vec::with_capacity(COLOR_TARGETS.len());
        for (target, name, format) in COLOR_TARGETS {
            let texture =
                Texture::render_target(ctx.device, name, size, format, TextureDimension::D2)?;
            colors.push((target, texture.target()));
            ctx.registry.insert_texture(texture)?;
        }
        let depth = Texture::render_target(
            ctx.device,
            DEPTH_TARGET,
            size,
            TextureFormat::Depth32Float,
            TextureDimension::D2,
        )?;
        let depth_target = depth.target();
        ctx.registry.insert_texture(depth)?;

        let object = ctx.device.create_buffer(
            &BufferDescriptor {
                label: Some("geometry object".into()),
                size: std::mem::size_of::<ObjectUniform>() as u64,
                usage: BufferUsage::CONSTANT,
                access: BufferAccess::Dynamic,
            },
            None,
        )?;
        log::debug!("g-buffer {}x{}", size.0, size.1);
        self.state = Some(GeometryState {
            colors,
            depth: depth_target,
            object,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let state = initialised(&mut self.state, "Geometry");
        for &(_, target) in &state.colors {
            ctx.device.clear_color(target, [0.0; 4])?;
        }
        ctx.device.clear_depth(state.depth, 1.0)?;
        ctx.device.set_blend_mode(BlendMode::Opaque)?;

        let frame = ctx.frame;
        for draw in &frame.draws {
            let shader = draw.material.borrow().shader().clone();
            check_vertex_layout(&shader, &draw.mesh)?;
            let colors = color_targets(&shader, "Geometry", &state.colors)?;
            ctx.device.set_render_targets(&colors, Some(state.depth))?;

            let stages = ctx.binder.bind_shader(ctx.device, &shader, StageMask::all())?;
            ctx.bind_frame_constants()?;
            let object = ObjectUniform::new(draw.transform);
            ctx.device
                .update_buffer(state.object, bytemuck::bytes_of(&object), UploadMode::Discard)?;
            ctx.binder
                .bind_constant_buffer(ctx.device, stages, OBJECT_SLOT, state.object)?;
            ctx.binder.bind_material(ctx.device, &draw.material)?;
            draw.mesh.draw(ctx.device)?;
            ctx.binder.clear(ctx.device)?;
        }
        Ok(())
    }

    fn release(&mut self, device: &mut dyn Device) {
        if let Some(state) = self.state.take() {
            device.destroy(state.object.raw());
        }
    }
}
