//! Shared demo content for the debug binaries: procedural meshes in the standard vertex layout
//! and a small lit scene.

use beacon_renderer::{Renderer, Result, UpdateFrequency};
use beacon_rhi::VertexSemantic;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use render_api::{DirectionalLight, ExtractedDraw, ExtractedDraws, ExtractedView, PointLight};

/// Layout of the `standard` shader.
pub const STANDARD_LAYOUT: [VertexSemantic; 3] = [
    VertexSemantic::Position,
    VertexSemantic::Normal,
    VertexSemantic::Texcoord,
];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Square in the XZ plane facing +Y, `size` wide, centred on the origin.
pub fn plane(size: f32) -> MeshData {
    let h = size * 0.5;
    let corners = [[-h, -h], [h, -h], [h, h], [-h, h]];
    let vertices = corners
        .iter()
        .map(|&[x, z]| Vertex {
            position: [x, 0.0, z],
            normal: [0.0, 1.0, 0.0],
            uv: [x / size + 0.5, z / size + 0.5],
        })
        .collect();
    MeshData {
        vertices,
        indices: vec![0, 2, 1, 0, 3, 2],
    }
}

/// Unit cube with per-face normals, counter-clockwise from outside.
pub fn cube() -> MeshData {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, right, up) in faces {
        let base = vertices.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let p = normal * 0.5 + right * (u - 0.5) + up * (v - 0.5);
            vertices.push(Vertex {
                position: p.to_array(),
                normal: normal.to_array(),
                uv: [u, 1.0 - v],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    MeshData { vertices, indices }
}

/// Ground plane plus a ring of cubes, registered on `renderer`.
pub fn build_demo_scene(renderer: &mut Renderer, cubes: usize) -> Result<ExtractedDraws> {
    let ground = plane(20.0);
    renderer.create_mesh("ground", ground.vertex_bytes(), &STANDARD_LAYOUT, &ground.indices)?;
    let cube = cube();
    renderer.create_mesh("cube", cube.vertex_bytes(), &STANDARD_LAYOUT, &cube.indices)?;

    let floor = renderer.create_material("floor", "standard", UpdateFrequency::Static)?;
    {
        let mut floor = floor.borrow_mut();
        floor.set_vector4("base_color", Vec4::new(0.6, 0.6, 0.65, 1.0));
        floor.set_scalar("shininess", 8.0);
    }
    let painted = renderer.create_material("painted", "standard", UpdateFrequency::Static)?;
    {
        let mut painted = painted.borrow_mut();
        painted.set_vector4("base_color", Vec4::new(0.8, 0.3, 0.2, 1.0));
        painted.set_vector3("specular", Vec3::splat(0.8));
        painted.set_scalar("shininess", 64.0);
    }

    let mut draws = vec![ExtractedDraw::new(0, "ground", "floor")];
    for i in 0..cubes {
        let angle = i as f32 / cubes.max(1) as f32 * std::f32::consts::TAU;
        let transform = Mat4::from_translation(Vec3::new(angle.cos() * 4.0, 0.5, angle.sin() * 4.0))
            * Mat4::from_rotation_y(angle);
        draws.push(
            ExtractedDraw::new(i as u64 + 1, "cube", "painted")
                .with_transform(transform.to_cols_array()),
        );
    }
    log::debug!("demo scene: {} draws", draws.len());
    Ok(ExtractedDraws { draws })
}

/// Orbiting camera, a sun and two point lights.
pub fn demo_view(size: (u32, u32), time: f32) -> ExtractedView {
    let aspect = size.0 as f32 / size.1.max(1) as f32;
    let eye = Vec3::new((time * 0.2).cos() * 10.0, 5.0, (time * 0.2).sin() * 10.0);
    let (near, far) = (0.1, 100.0);
    ExtractedView {
        view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y).to_cols_array(),
        projection: Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, aspect, near, far)
            .to_cols_array(),
        camera_position: eye.to_array(),
        near,
        far,
        viewport_size: size,
        time,
        directional_light: Some(DirectionalLight {
            direction: [-0.4, -1.0, -0.3],
            intensity: 2.0,
            ..Default::default()
        }),
        point_lights: vec![
            PointLight {
                position: [0.0, 2.0, 0.0],
                color: [1.0, 0.6, 0.3],
                intensity: 6.0,
                range: 8.0,
                cast_shadows: true,
            },
            PointLight {
                position: [3.0, 1.0, -3.0],
                color: [0.3, 0.5, 1.0],
                intensity: 4.0,
                range: 6.0,
                cast_shadows: false,
            },
        ],
        ..Default::default()
    }
}
