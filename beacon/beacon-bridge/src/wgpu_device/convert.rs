//! Beacon RHI enums to wgpu types.

use beacon_rhi::{
    AddressMode, BlendMode, BufferUsage, FilterMode, PrimitiveTopology, SamplerDescriptor,
    StageMask, TextureFormat, TextureUsage, VertexSemantic,
};

pub fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

/// Inverse of [`texture_format`] for the formats a surface may report.
pub fn format_from_wgpu(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    Some(match format {
        wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
        wgpu::TextureFormat::R32Float => TextureFormat::R32Float,
        wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
        _ => return None,
    })
}

pub fn buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::COPY_DST;
    if usage.contains(BufferUsage::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::CONSTANT) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    out
}

pub fn texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    out
}

fn filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Point => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn address(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
    }
}

pub fn sampler_descriptor(desc: &SamplerDescriptor) -> wgpu::SamplerDescriptor<'static> {
    let address = address(desc.address);
    let filter = filter(desc.filter);
    wgpu::SamplerDescriptor {
        label: Some("beacon sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        compare: desc.comparison.then_some(wgpu::CompareFunction::LessEqual),
        ..Default::default()
    }
}

/// `None` for topologies wgpu cannot draw.
pub fn topology(topology: PrimitiveTopology) -> Option<wgpu::PrimitiveTopology> {
    match topology {
        PrimitiveTopology::TriangleList => Some(wgpu::PrimitiveTopology::TriangleList),
        PrimitiveTopology::TriangleStrip => Some(wgpu::PrimitiveTopology::TriangleStrip),
        PrimitiveTopology::PatchList3 => None,
    }
}

pub fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    match mode {
        BlendMode::Opaque => None,
        BlendMode::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            Some(wgpu::BlendState {
                color: add,
                alpha: add,
            })
        }
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
    }
}

pub fn vertex_format(semantic: VertexSemantic) -> wgpu::VertexFormat {
    match semantic {
        VertexSemantic::Position | VertexSemantic::Normal => wgpu::VertexFormat::Float32x3,
        VertexSemantic::Texcoord => wgpu::VertexFormat::Float32x2,
        VertexSemantic::Tangent | VertexSemantic::Color => wgpu::VertexFormat::Float32x4,
    }
}

/// Tightly packed attributes at shader locations 0, 1, 2, ... in layout order.
pub fn vertex_attributes(layout: &[VertexSemantic]) -> Vec<wgpu::VertexAttribute> {
    let mut offset = 0u64;
    layout
        .iter()
        .enumerate()
        .map(|(location, &semantic)| {
            let attribute = wgpu::VertexAttribute {
                format: vertex_format(semantic),
                offset,
                shader_location: location as u32,
            };
            offset += u64::from(semantic.byte_size());
            attribute
        })
        .collect()
}

pub fn shader_stages(stages: StageMask) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::empty();
    if stages.contains(StageMask::VERTEX) {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(StageMask::PIXEL) {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TextureFormat::Rgba8Unorm)]
    #[case(TextureFormat::Bgra8UnormSrgb)]
    #[case(TextureFormat::Rgba16Float)]
    #[case(TextureFormat::Depth32Float)]
    fn formats_map_back(#[case] format: TextureFormat) {
        assert_eq!(format_from_wgpu(texture_format(format)), Some(format));
    }

    #[test]
    fn attribute_offsets_are_packed() {
        let attributes = vertex_attributes(&[
            VertexSemantic::Position,
            VertexSemantic::Normal,
            VertexSemantic::Texcoord,
        ]);
        let offsets: Vec<u64> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(attributes[2].format, wgpu::VertexFormat::Float32x2);
    }

    #[test]
    fn comparison_samplers_compare_less_equal() {
        let desc = sampler_descriptor(&SamplerDescriptor {
            comparison: true,
            ..Default::default()
        });
        assert_eq!(desc.compare, Some(wgpu::CompareFunction::LessEqual));
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::Repeat);
    }

    #[test]
    fn opaque_blend_replaces() {
        assert_eq!(blend_state(BlendMode::Opaque), None);
        assert_eq!(topology(PrimitiveTopology::PatchList3), None);
    }
}
