//! Shadow pass: depth-only rendering of every submitted mesh from each shadow-casting light.
//!
//! The directional light gets one orthographic map; each of the first `max_point_lights` point
//! lights gets a cube map rendered face by face.

use std::f32::consts::FRAC_PI_2;

use beacon_rhi::{
    BlendMode, BufferAccess, BufferDescriptor, BufferId, BufferUsage, Device, RenderTarget, StageMask,
    TextureDimension, TextureFormat, TextureId, UploadMode,
};
use glam::{Mat4, Vec3};
use render_api::DirectionalLight;

use crate::binder::{FRAME_SLOT, OBJECT_SLOT};
use crate::config::BeaconConfig;
use crate::error::Result;
use crate::frame::{FrameUniform, ObjectUniform};
use crate::graph::{check_vertex_layout, initialised, FrameContext, InitContext, RenderPass};
use crate::resources::Texture;

pub const DIRECTIONAL_SHADOW: &str = "shadow.directional";

pub fn point_shadow_name(index: usize) -> String {
    format!("shadow.point{index}")
}

/// (forward, up) per cube layer: +X, -X, +Y, -Y, +Z, -Z.
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Y),
    (Vec3::Y, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::Z),
    (Vec3::Z, Vec3::Y),
    (Vec3::NEG_Z, Vec3::Y),
];

/// Light-space `projection * view` for a directional light, centred on the camera.
///
/// Returns the matrix and the shadow eye position.
pub fn directional_light_matrix(
    light: &DirectionalLight,
    camera_position: Vec3,
    config: &BeaconConfig,
) -> (Mat4, Vec3) {
    let direction = Vec3::from_array(light.direction).normalize_or_zero();
    let direction = if direction == Vec3::ZERO {
        Vec3::NEG_Y
    } else {
        direction
    };
    let up = if direction.y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let eye = camera_position - direction * config.shadow_distance;
    let view = Mat4::look_to_rh(eye, direction, up);
    let extent = config.shadow_extent;
    let projection =
        Mat4::orthographic_rh(-extent, extent, -extent, extent, 0.0, config.shadow_distance * 2.0);
    (projection * view, eye)
}

/// `projection * view` of one cube face seen from `position`.
pub fn point_face_matrix(position: Vec3, face: usize, near: f32, far: f32) -> Mat4 {
    let (forward, up) = CUBE_FACES[face];
    Mat4::perspective_lh(FRAC_PI_2, 1.0, near, far) * Mat4::look_to_lh(position, forward, up)
}

struct ShadowState {
    directional: TextureId,
    points: Vec<TextureId>,
    camera: BufferId,
    object: BufferId,
}

#[derive(Default)]
pub struct ShadowPass {
    state: Option<ShadowState>,
    enabled: bool,
}

impl ShadowPass {
    pub fn new() -> Self {
        Self::default()
    }

    fn render_view(
        state: &ShadowState,
        ctx: &mut FrameContext<'_>,
        target: RenderTarget,
        camera: &FrameUniform,
    ) -> Result<()> {
        ctx.device.set_render_targets(&[], Some(target))?;
        ctx.device.clear_depth(target, 1.0)?;
        ctx.device
            .update_buffer(state.camera, bytemuck::bytes_of(camera), UploadMode::Discard)?;
        let frame = ctx.frame;
        for draw in &frame.draws {
            let shader = draw.material.borrow().shader().clone();
            check_vertex_layout(&shader, &draw.mesh)?;
            let stages = ctx.binder.bind_shader(
                ctx.device,
                &shader,
                StageMask::VERTEX | StageMask::TESSELLATION,
            )?;
            ctx.binder
                .bind_constant_buffer(ctx.device, stages, FRAME_SLOT, state.camera)?;
            let object = ObjectUniform::new(draw.transform);
            ctx.device
                .update_buffer(state.object, bytemuck::bytes_of(&object), UploadMode::Discard)?;
            ctx.binder
                .bind_constant_buffer(ctx.device, stages, OBJECT_SLOT, state.object)?;
            draw.mesh.draw(ctx.device)?;
            ctx.binder.clear(ctx.device)?;
        }
        Ok(())
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "Shadow"
    }

    fn initialise(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        self.enabled = ctx.config.shadows_enabled;
        if !self.enabled {
            log::info!("shadows disabled");
            return Ok(());
        }
        let size = ctx.config.shadow_map_size;
        let directional = Texture::render_target(
            ctx.device,
            DIRECTIONAL_SHADOW,
            (size, size),
            TextureFormat::Depth32Float,
            TextureDimension::D2,
        )?;
        let directional_id = directional.id();
        ctx.registry.insert_texture(directional)?;

        let cube_size = ctx.config.point_shadow_size;
        let mut points = Vec::new();
        for index in 0..ctx.config.max_point_lights as usize {
            let cube = Texture::render_target(
                ctx.device,
                &point_shadow_name(index),
                (cube_size, cube_size),
                TextureFormat::Depth32Float,
                TextureDimension::Cube,
            )?;
            points.push(cube.id());
            ctx.registry.insert_texture(cube)?;
        }

        let uniform_buffer = |label: &str, size: usize| BufferDescriptor {
            label: Some(label.to_string()),
            size: size as u64,
            usage: BufferUsage::CONSTANT,
            access: BufferAccess::Dynamic,
        };
        let camera = ctx.device.create_buffer(
            &uniform_buffer("shadow camera", std::mem::size_of::<FrameUniform>()),
            None,
        )?;
        let object = ctx.device.create_buffer(
            &uniform_buffer("shadow object", std::mem::size_of::<ObjectUniform>()),
            None,
        )?;
        log::debug!(
            "shadow maps: directional {}², {} point cubes {}²",
            size,
            points.len(),
            cube_size
        );
        self.state = Some(ShadowState {
            directional: directional_id,
            points,
            camera,
            object,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let state = initialised(&mut self.state, "Shadow");
        let (frame, config) = (ctx.frame, ctx.config);
        ctx.device.set_blend_mode(BlendMode::Opaque)?;

        if let Some(light) = frame.view.directional_light.filter(|l| l.cast_shadows) {
            let (view_proj, eye) = directional_light_matrix(&light, frame.camera_position(), config);
            let camera = FrameUniform::shadow_camera(
                view_proj,
                eye,
                0.0,
                config.shadow_distance * 2.0,
                config.shadow_map_size,
            );
            Self::render_view(state, ctx, RenderTarget::new(state.directional), &camera)?;
        }

        for (index, light) in frame.view.point_lights.iter().enumerate() {
            if !light.cast_shadows {
                continue;
            }
            let Some(&cube) = state.points.get(index) else {
                log::warn!(
                    "point light {} exceeds max_point_lights ({}); rendered without shadow",
                    index,
                    state.points.len()
                );
                continue;
            };
            let position = Vec3::from_array(light.position);
            let near = config.point_light_near;
            for face in 0..CUBE_FACES.len() {
                let view_proj = point_face_matrix(position, face, near, light.range);
                let camera = FrameUniform::shadow_camera(
                    view_proj,
                    position,
                    near,
                    light.range,
                    config.point_shadow_size,
                );
                let target = RenderTarget::new(cube).layer(face as u32);
                Self::render_view(state, ctx, target, &camera)?;
            }
        }
        Ok(())
    }

    fn release(&mut self, device: &mut dyn Device) {
        if let Some(state) = self.state.take() {
            device.destroy(state.camera.raw());
            device.destroy(state.object.raw());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4Swizzles;

    #[test]
    fn directional_matrix_centres_the_camera() {
        let light = DirectionalLight {
            direction: [0.0, -1.0, 0.0],
            ..Default::default()
        };
        let config = BeaconConfig::default();
        let camera = Vec3::new(3.0, 1.0, -2.0);
        let (matrix, eye) = directional_light_matrix(&light, camera, &config);
        assert!(eye.abs_diff_eq(Vec3::new(3.0, 51.0, -2.0), 1e-4));

        let ndc = matrix * camera.extend(1.0);
        assert!(ndc.xy().abs_diff_eq(glam::Vec2::ZERO, 1e-4));
        assert!((ndc.z - 0.5).abs() < 1e-4);
    }

    #[test]
    fn zero_direction_falls_back_to_down() {
        let light = DirectionalLight {
            direction: [0.0; 3],
            ..Default::default()
        };
        let (_, eye) = directional_light_matrix(&light, Vec3::ZERO, &BeaconConfig::default());
        assert!(eye.abs_diff_eq(Vec3::new(0.0, 50.0, 0.0), 1e-4));
    }

    #[test]
    fn cube_faces_store_the_major_axis_depth() {
        let (near, far) = (0.1, 10.0);
        let expected = |z: f32| far / (far - near) - far * near / ((far - near) * z);
        for (face, (forward, _)) in CUBE_FACES.iter().enumerate() {
            let matrix = point_face_matrix(Vec3::ZERO, face, near, far);
            let clip = matrix * (*forward * 4.0).extend(1.0);
            assert!((clip.z / clip.w - expected(4.0)).abs() < 1e-5, "face {face}");
            assert!(clip.xy().abs_diff_eq(glam::Vec2::ZERO, 1e-5));
        }
    }
}
