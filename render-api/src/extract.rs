//! Data types for extraction from the host engine into the render world.
//! Host fills these each frame; meshes and materials are referenced by registry name.

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

/// One draw submission extracted from the main world.
#[derive(Clone, Debug)]
pub struct ExtractedDraw {
    /// Host-defined entity or instance id.
    pub entity_id: u64,
    /// Registry name of the mesh.
    pub mesh: String,
    /// Registry name of the material (the material knows its shader).
    pub material: String,
    /// World transform: column-major 4x4 matrix (WGSL/wgpu convention).
    /// Index [col*4+row]; e.g. m[0..4] is the first column.
    pub transform: [f32; 16],
    /// Whether this instance is visible.
    pub visible: bool,
}

impl ExtractedDraw {
    pub fn new(entity_id: u64, mesh: impl Into<String>, material: impl Into<String>) -> Self {
        Self {
            entity_id,
            mesh: mesh.into(),
            material: material.into(),
            transform: IDENTITY,
            visible: true,
        }
    }

    pub fn with_transform(mut self, transform: [f32; 16]) -> Self {
        self.transform = transform;
        self
    }
}

/// All extracted draws for the current frame, in submission order.
#[derive(Default, Debug, Clone)]
pub struct ExtractedDraws {
    pub draws: Vec<ExtractedDraw>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels (unit vector).
    pub direction: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
    pub cast_shadows: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: [-0.4, -1.0, -0.3],
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            cast_shadows: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
    /// Distance at which the contribution reaches zero.
    pub range: f32,
    pub cast_shadows: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: [0.0, 2.0, 0.0],
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            range: 10.0,
            cast_shadows: false,
        }
    }
}

/// View/camera data for the current frame.
#[derive(Clone, Debug)]
pub struct ExtractedView {
    /// Column-major view matrix.
    pub view: [f32; 16],
    /// Column-major projection matrix (depth range 0..1).
    pub projection: [f32; 16],
    pub camera_position: [f32; 3],
    pub near: f32,
    pub far: f32,
    pub viewport_size: (u32, u32),
    pub ambient: [f32; 3],
    /// Seconds since start.
    pub time: f32,
    pub directional_light: Option<DirectionalLight>,
    /// Drawn in this order by the lighting pass.
    pub point_lights: Vec<PointLight>,
}

impl Default for ExtractedView {
    fn default() -> Self {
        Self {
            view: IDENTITY,
            projection: IDENTITY,
            camera_position: [0.0; 3],
            near: 0.1,
            far: 100.0,
            viewport_size: (800, 600),
            ambient: [0.03, 0.03, 0.03],
            time: 0.0,
            directional_light: None,
            point_lights: Vec::new(),
        }
    }
}
