//! Per-frame data: the frame-global uniform, per-object constants and the resolved draw list.

use std::rc::Rc;

use glam::{Mat4, Vec3};
use render_api::{ExtractedDraws, ExtractedView};

use crate::config::BeaconConfig;
use crate::error::Result;
use crate::material::MaterialHandle;
use crate::registry::Registry;
use crate::resources::Mesh;

/// Frame-global constants at [`FRAME_SLOT`](crate::binder::FRAME_SLOT).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniform {
    pub view_proj: [f32; 16],
    pub inv_view_proj: [f32; 16],
    /// xyz = eye position.
    pub camera_position: [f32; 4],
    /// rgb = ambient color.
    pub ambient: [f32; 4],
    /// (width, height, 1/width, 1/height) of the render resolution.
    pub viewport: [f32; 4],
    pub near: f32,
    pub far: f32,
    pub time: f32,
    pub _pad: f32,
}

impl FrameUniform {
    pub fn from_view(view: &ExtractedView, config: &BeaconConfig) -> Self {
        let view_proj = view_proj(view);
        let [x, y, z] = view.camera_position;
        let [r, g, b] = view.ambient;
        Self {
            view_proj: view_proj.to_cols_array(),
            inv_view_proj: view_proj.inverse().to_cols_array(),
            camera_position: [x, y, z, 1.0],
            ambient: [r, g, b, 1.0],
            viewport: viewport(config.width, config.height),
            near: view.near,
            far: view.far,
            time: view.time,
            _pad: 0.0,
        }
    }

    /// Camera seen from a light, used while rendering a shadow map of edge `size`.
    pub fn shadow_camera(view_proj: Mat4, eye: Vec3, near: f32, far: f32, size: u32) -> Self {
        Self {
            view_proj: view_proj.to_cols_array(),
            inv_view_proj: view_proj.inverse().to_cols_array(),
            camera_position: eye.extend(1.0).to_array(),
            ambient: [0.0; 4],
            viewport: viewport(size, size),
            near,
            far,
            time: 0.0,
            _pad: 0.0,
        }
    }
}

fn viewport(width: u32, height: u32) -> [f32; 4] {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    [w, h, 1.0 / w, 1.0 / h]
}

/// `projection * view` of an extracted view.
pub fn view_proj(view: &ExtractedView) -> Mat4 {
    Mat4::from_cols_array(&view.projection) * Mat4::from_cols_array(&view.view)
}

/// Per-draw constants at [`OBJECT_SLOT`](crate::binder::OBJECT_SLOT).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectUniform {
    pub model: [f32; 16],
    /// Inverse transpose of `model`.
    pub normal_matrix: [f32; 16],
}

impl ObjectUniform {
    pub fn new(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array(),
            normal_matrix: model.inverse().transpose().to_cols_array(),
        }
    }
}

/// One mesh drawn with one material.
#[derive(Debug, Clone)]
pub struct DrawSubmission {
    pub transform: Mat4,
    pub mesh: Rc<Mesh>,
    pub material: MaterialHandle,
}

/// Everything the passes read for one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameData {
    pub view: ExtractedView,
    pub draws: Vec<DrawSubmission>,
}

impl FrameData {
    pub fn new(view: ExtractedView) -> Self {
        Self {
            view,
            draws: Vec::new(),
        }
    }

    pub fn push(&mut self, transform: Mat4, mesh: Rc<Mesh>, material: MaterialHandle) {
        self.draws.push(DrawSubmission {
            transform,
            mesh,
            material,
        });
    }

    /// Resolve extracted names against the registry, skipping invisible draws.
    pub fn resolve(registry: &Registry, extracted: &ExtractedDraws, view: &ExtractedView) -> Result<Self> {
        let mut frame = Self::new(view.clone());
        for draw in extracted.draws.iter().filter(|d| d.visible) {
            let mesh = registry.mesh(&draw.mesh)?;
            let material = registry.material(&draw.material)?;
            frame.push(Mat4::from_cols_array(&draw.transform), mesh, material);
        }
        log::trace!(
            "resolved {} of {} extracted draws",
            frame.draws.len(),
            extracted.draws.len()
        );
        Ok(frame)
    }

    pub fn camera_position(&self) -> Vec3 {
        Vec3::from_array(self.view.camera_position)
    }
}
