//! Beacon RHI: immediate-mode rendering hardware interface.
//! Resources are created up front and attached to numbered slots per shader stage; draws read
//! whatever is currently attached. Backends: `beacon-bridge` (wgpu) and [`NullDevice`] (recording).

use std::any::Any;
use std::fmt::Debug;

mod error;
mod null;

pub use error::DeviceError;
pub use null::{DeviceCall, NullDevice};

/// Unique identifier for a GPU resource. Ids are never reused by one device.
pub type ResourceId = u64;

/// Number of slots per stage for each resource kind.
pub const MAX_SLOTS: usize = 16;
/// Maximum number of simultaneously bound color targets.
pub const MAX_COLOR_TARGETS: usize = 8;

macro_rules! resource_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub ResourceId);

            impl $name {
                pub fn raw(self) -> ResourceId {
                    self.0
                }
            }
        )*
    };
}

resource_handle!(
    /// Vertex, index or constant buffer.
    BufferId,
    /// 2D or cube texture (also used for render targets and the backbuffer).
    TextureId,
    SamplerId,
    /// Compiled shader program: one source with up to three stage entry points.
    ProgramId,
);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
    }
}

/// CPU access pattern. `Dynamic` buffers are rewritten often and prefer the discard upload path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferAccess {
    #[default]
    Default,
    Dynamic,
}

/// How [`Device::update_buffer`] replaces the contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadMode {
    /// Full buffer replace (update-subresource style).
    Replace,
    /// Map with discard, copy, unmap. Only valid on [`BufferAccess::Dynamic`] buffers.
    Discard,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub access: BufferAccess,
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: 0,
            usage: BufferUsage::CONSTANT,
            access: BufferAccess::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    /// Bytes per texel for tightly packed uploads.
    pub fn block_size(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// Texture dimension / type. Cube textures always have six layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    Cube,
}

impl TextureDimension {
    pub fn layer_count(self) -> u32 {
        match self {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_DST = 1 << 0;
        const TEXTURE_BINDING = 1 << 1;
        const RENDER_ATTACHMENT = 1 << 2;
    }
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    /// (width, height) of mip 0.
    pub size: (u32, u32),
    pub format: TextureFormat,
    pub dimension: TextureDimension,
    pub mip_level_count: u32,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Bytes of tightly packed mip 0 data for one layer.
    pub fn upload_size(&self) -> u64 {
        u64::from(self.size.0) * u64::from(self.size.1) * u64::from(self.format.block_size())
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: (1, 1),
            format: TextureFormat::Rgba8Unorm,
            dimension: TextureDimension::D2,
            mip_level_count: 1,
            usage: TextureUsage::TEXTURE_BINDING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Point,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Clamp,
    Mirror,
}

/// Combined filter kind, the way D3D-style samplers report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerFilter {
    Point,
    Linear,
    PointComparison,
    LinearComparison,
}

/// Same address mode on every axis. Comparison samplers compare with less-or-equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerDescriptor {
    pub filter: FilterMode,
    pub address: AddressMode,
    pub comparison: bool,
}

impl SamplerDescriptor {
    pub fn filter_kind(&self) -> SamplerFilter {
        match (self.filter, self.comparison) {
            (FilterMode::Point, false) => SamplerFilter::Point,
            (FilterMode::Linear, false) => SamplerFilter::Linear,
            (FilterMode::Point, true) => SamplerFilter::PointComparison,
            (FilterMode::Linear, true) => SamplerFilter::LinearComparison,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    /// Three control points per patch; requires a tessellation stage.
    PatchList3,
}

/// Programmable stage a slot table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Tessellation,
    Pixel,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Vertex, Stage::Tessellation, Stage::Pixel];

    pub fn index(self) -> usize {
        match self {
            Stage::Vertex => 0,
            Stage::Tessellation => 1,
            Stage::Pixel => 2,
        }
    }

    pub fn mask(self) -> StageMask {
        match self {
            Stage::Vertex => StageMask::VERTEX,
            Stage::Tessellation => StageMask::TESSELLATION,
            Stage::Pixel => StageMask::PIXEL,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StageMask: u32 {
        const VERTEX = 1 << 0;
        /// Hull and domain stages together.
        const TESSELLATION = 1 << 1;
        const PIXEL = 1 << 2;
    }
}

impl StageMask {
    /// Stages contained in this mask, in pipeline order.
    pub fn stages(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| self.contains(s.mask()))
    }
}

/// Per-vertex attribute tag; attributes are tightly packed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    Position,
    Normal,
    Texcoord,
    Tangent,
    Color,
}

impl VertexSemantic {
    pub fn byte_size(self) -> u32 {
        match self {
            VertexSemantic::Position | VertexSemantic::Normal => 12,
            VertexSemantic::Texcoord => 8,
            VertexSemantic::Tangent | VertexSemantic::Color => 16,
        }
    }

    pub fn stride(layout: &[VertexSemantic]) -> u32 {
        layout.iter().map(|s| s.byte_size()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgramDescriptor {
    pub label: String,
    pub source: String,
    pub vertex_entry: Option<String>,
    /// (hull, domain) entry points.
    pub tessellation_entries: Option<(String, String)>,
    pub pixel_entry: Option<String>,
    pub topology: PrimitiveTopology,
    pub vertex_layout: Vec<VertexSemantic>,
}

impl ProgramDescriptor {
    /// Stages this program can run.
    pub fn stages(&self) -> StageMask {
        let mut mask = StageMask::empty();
        mask.set(StageMask::VERTEX, self.vertex_entry.is_some());
        mask.set(StageMask::TESSELLATION, self.tessellation_entries.is_some());
        mask.set(StageMask::PIXEL, self.pixel_entry.is_some());
        mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    /// `dst + src` on color and alpha.
    Additive,
    /// Straight alpha "over".
    Alpha,
}

/// One attachment view: a single mip level of a single layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTarget {
    pub texture: TextureId,
    pub mip_level: u32,
    pub layer: u32,
}

impl RenderTarget {
    pub fn new(texture: TextureId) -> Self {
        Self {
            texture,
            mip_level: 0,
            layer: 0,
        }
    }

    pub fn mip(mut self, mip_level: u32) -> Self {
        self.mip_level = mip_level;
        self
    }

    pub fn layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }
}

/// Immediate-mode graphics device.
///
/// Slot bindings persist per stage until overwritten, including across program changes. A draw
/// uses the bound program, topology, render targets, blend mode, vertex/index buffers and every
/// slot the program's active stages read. Every call that can fail reports it immediately.
pub trait Device: Debug {
    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        contents: Option<&[u8]>,
    ) -> Result<BufferId, DeviceError>;
    /// Overwrite the buffer from offset 0. Completes before returning from the caller's view.
    fn update_buffer(
        &mut self,
        buffer: BufferId,
        data: &[u8],
        mode: UploadMode,
    ) -> Result<(), DeviceError>;
    /// `contents` fills mip 0 of layer 0, tightly packed.
    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        contents: Option<&[u8]>,
    ) -> Result<TextureId, DeviceError>;
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<SamplerId, DeviceError>;
    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramId, DeviceError>;
    /// Release any resource created by this device.
    fn destroy(&mut self, id: ResourceId);

    /// Texture presented at [`end_frame`](Self::end_frame).
    fn backbuffer(&self) -> TextureId;
    fn texture_size(&self, texture: TextureId) -> Result<(u32, u32), DeviceError>;

    fn begin_frame(&mut self) -> Result<(), DeviceError>;
    fn end_frame(&mut self) -> Result<(), DeviceError>;

    /// Bind `program` for the given stages (None unbinds every stage).
    fn set_program(
        &mut self,
        program: Option<ProgramId>,
        stages: StageMask,
    ) -> Result<(), DeviceError>;
    fn set_topology(&mut self, topology: Option<PrimitiveTopology>) -> Result<(), DeviceError>;
    fn bind_constant_buffer(
        &mut self,
        stage: Stage,
        slot: u32,
        buffer: Option<BufferId>,
    ) -> Result<(), DeviceError>;
    fn bind_texture(
        &mut self,
        stage: Stage,
        slot: u32,
        texture: Option<TextureId>,
    ) -> Result<(), DeviceError>;
    fn bind_sampler(
        &mut self,
        stage: Stage,
        slot: u32,
        sampler: Option<SamplerId>,
    ) -> Result<(), DeviceError>;
    fn set_render_targets(
        &mut self,
        colors: &[RenderTarget],
        depth: Option<RenderTarget>,
    ) -> Result<(), DeviceError>;
    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<(), DeviceError>;
    fn clear_color(&mut self, target: RenderTarget, color: [f32; 4]) -> Result<(), DeviceError>;
    fn clear_depth(&mut self, target: RenderTarget, depth: f32) -> Result<(), DeviceError>;
    /// Single interleaved vertex stream.
    fn set_vertex_buffer(&mut self, buffer: Option<BufferId>, stride: u32)
        -> Result<(), DeviceError>;
    /// 32-bit indices.
    fn set_index_buffer(&mut self, buffer: Option<BufferId>) -> Result<(), DeviceError>;
    fn draw(&mut self, vertex_count: u32) -> Result<(), DeviceError>;
    fn draw_indexed(&mut self, index_count: u32) -> Result<(), DeviceError>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
