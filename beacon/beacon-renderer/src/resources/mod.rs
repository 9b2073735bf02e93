//! GPU resources owned through the registry: named textures (assets, render targets, defaults)
//! and indexed meshes.

use beacon_rhi::{
    BufferDescriptor, BufferId, BufferUsage, Device, RenderTarget, TextureDescriptor,
    TextureDimension, TextureFormat, TextureId, TextureUsage, VertexSemantic,
};

use crate::error::{ConfigurationError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    name: String,
    id: TextureId,
    size: (u32, u32),
    format: TextureFormat,
    dimension: TextureDimension,
    mip_level_count: u32,
}

impl Texture {
    pub fn create(
        device: &mut dyn Device,
        name: &str,
        desc: &TextureDescriptor,
        contents: Option<&[u8]>,
    ) -> Result<Self> {
        let id = device.create_texture(desc, contents)?;
        Ok(Self {
            name: name.to_string(),
            id,
            size: desc.size,
            format: desc.format,
            dimension: desc.dimension,
            mip_level_count: desc.mip_level_count,
        })
    }

    /// 1x1 RGBA8 texture of one color.
    pub fn solid(device: &mut dyn Device, name: &str, rgba: [u8; 4]) -> Result<Self> {
        let desc = TextureDescriptor {
            label: Some(name.to_string()),
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        };
        Self::create(device, name, &desc, Some(&rgba))
    }

    /// Sampleable render target.
    pub fn render_target(
        device: &mut dyn Device,
        name: &str,
        size: (u32, u32),
        format: TextureFormat,
        dimension: TextureDimension,
    ) -> Result<Self> {
        let desc = TextureDescriptor {
            label: Some(name.to_string()),
            size: (size.0.max(1), size.1.max(1)),
            format,
            dimension,
            mip_level_count: 1,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
        };
        Self::create(device, name, &desc, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn dimension(&self) -> TextureDimension {
        self.dimension
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    /// Mip 0, layer 0 as a render target.
    pub fn target(&self) -> RenderTarget {
        RenderTarget::new(self.id)
    }

    /// One texel in UV units.
    pub fn texel_size(&self) -> [f32; 2] {
        [1.0 / self.size.0 as f32, 1.0 / self.size.1 as f32]
    }
}

/// Indexed triangle mesh with one interleaved vertex stream.
#[derive(Debug, PartialEq, Eq)]
pub struct Mesh {
    name: String,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    index_count: u32,
    layout: Vec<VertexSemantic>,
    stride: u32,
}

impl Mesh {
    /// `vertices` holds tightly packed vertices in `layout` order; indices are 32-bit.
    pub fn new(
        device: &mut dyn Device,
        name: &str,
        vertices: &[u8],
        layout: &[VertexSemantic],
        indices: &[u32],
    ) -> Result<Self> {
        let stride = VertexSemantic::stride(layout);
        if stride == 0 || vertices.is_empty() || vertices.len() % stride as usize != 0 {
            return Err(ConfigurationError::InvalidMesh {
                mesh: name.to_string(),
                reason: format!(
                    "{} vertex bytes do not divide into {stride}-byte vertices",
                    vertices.len()
                ),
            }
            .into());
        }
        if indices.is_empty() {
            return Err(ConfigurationError::InvalidMesh {
                mesh: name.to_string(),
                reason: "no indices".to_string(),
            }
            .into());
        }
        let vertex_buffer = device.create_buffer(
            &BufferDescriptor {
                label: Some(format!("{name} vertices")),
                size: vertices.len() as u64,
                usage: BufferUsage::VERTEX,
                ..Default::default()
            },
            Some(vertices),
        )?;
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let index_buffer = device.create_buffer(
            &BufferDescriptor {
                label: Some(format!("{name} indices")),
                size: index_bytes.len() as u64,
                usage: BufferUsage::INDEX,
                ..Default::default()
            },
            Some(index_bytes),
        )?;
        log::debug!(
            "mesh `{}`: {} vertices, {} indices",
            name,
            vertices.len() / stride as usize,
            indices.len()
        );
        Ok(Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            layout: layout.to_vec(),
            stride,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &[VertexSemantic] {
        &self.layout
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Attach vertex and index streams and draw every index.
    pub fn draw(&self, device: &mut dyn Device) -> Result<()> {
        device.set_vertex_buffer(Some(self.vertex_buffer), self.stride)?;
        device.set_index_buffer(Some(self.index_buffer))?;
        device.draw_indexed(self.index_count)?;
        Ok(())
    }

    pub fn release(&self, device: &mut dyn Device) {
        device.destroy(self.vertex_buffer.raw());
        device.destroy(self.index_buffer.raw());
    }
}
