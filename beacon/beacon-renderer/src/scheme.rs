//! Material schemes and the property layout engine.
//!
//! Constant properties are packed into 16-byte registers the way constant buffers are read by
//! the hardware: a property starts a new register only when it would straddle the current one.
//! Textures and samplers are not packed; they keep their declared slots.

use std::collections::{HashMap, HashSet};

use beacon_rhi::{SamplerDescriptor, MAX_SLOTS};

use crate::descriptor::PropertyDecl;
use crate::error::ConfigurationError;

/// Hardware register size in bytes.
pub const REGISTER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Float,
    Float2,
    Float3,
    Float4,
    Matrix,
}

impl PropertyType {
    pub const ALL: [PropertyType; 5] = [
        PropertyType::Float,
        PropertyType::Float2,
        PropertyType::Float3,
        PropertyType::Float4,
        PropertyType::Matrix,
    ];

    /// Size in bytes.
    pub fn size(self) -> usize {
        self.components() * 4
    }

    pub fn components(self) -> usize {
        match self {
            PropertyType::Float => 1,
            PropertyType::Float2 => 2,
            PropertyType::Float3 => 3,
            PropertyType::Float4 => 4,
            PropertyType::Matrix => 16,
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "float" => Some(PropertyType::Float),
            "float2" => Some(PropertyType::Float2),
            "float3" => Some(PropertyType::Float3),
            "float4" => Some(PropertyType::Float4),
            "matrix" => Some(PropertyType::Matrix),
            _ => None,
        }
    }

    /// Column-major identity, the only default a matrix property has.
    pub fn identity() -> [f32; 16] {
        let mut m = [0.0; 16];
        for i in 0..4 {
            m[i * 5] = 1.0;
        }
        m
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub ty: PropertyType,
    pub default: Vec<f32>,
}

/// Where a property lives in the material buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedProperty {
    pub ty: PropertyType,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedLayout {
    /// One entry per input property, same order.
    pub properties: Vec<PackedProperty>,
    /// Total buffer size, a multiple of [`REGISTER_SIZE`].
    pub size: usize,
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Assign byte offsets to `types` in order.
pub fn pack_properties(types: impl IntoIterator<Item = PropertyType>) -> PackedLayout {
    let mut cursor = 0;
    let mut properties = Vec::new();
    for ty in types {
        let size = ty.size();
        let in_register = cursor % REGISTER_SIZE;
        if in_register != 0 && in_register + size > REGISTER_SIZE {
            cursor = align_up(cursor, REGISTER_SIZE);
        }
        properties.push(PackedProperty { ty, offset: cursor });
        cursor += size;
    }
    PackedLayout {
        properties,
        size: align_up(cursor, REGISTER_SIZE),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub slot: u32,
    /// Registry texture used until the material sets its own.
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerSlot {
    pub name: String,
    pub slot: u32,
    pub desc: SamplerDescriptor,
}

/// Immutable, named layout shared by every material of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialScheme {
    name: String,
    properties: Vec<PropertyDescriptor>,
    offsets: HashMap<String, PackedProperty>,
    buffer_size: usize,
    defaults: Vec<u8>,
    textures: Vec<TextureSlot>,
    samplers: Vec<SamplerSlot>,
}

impl MaterialScheme {
    pub fn new(
        name: &str,
        properties: Vec<PropertyDescriptor>,
        textures: Vec<TextureSlot>,
        samplers: Vec<SamplerSlot>,
    ) -> Result<Self, ConfigurationError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let names = properties
            .iter()
            .map(|p| p.name.as_str())
            .chain(textures.iter().map(|t| t.name.as_str()))
            .chain(samplers.iter().map(|s| s.name.as_str()));
        for prop in names {
            if !seen.insert(prop) {
                return Err(ConfigurationError::Duplicate {
                    what: "material property",
                    name: format!("{name}.{prop}"),
                });
            }
        }
        check_slots(name, "texture", textures.iter().map(|t| (t.name.as_str(), t.slot)))?;
        check_slots(name, "sampler", samplers.iter().map(|s| (s.name.as_str(), s.slot)))?;

        let layout = pack_properties(properties.iter().map(|p| p.ty));
        let mut defaults = vec![0u8; layout.size];
        let mut offsets = HashMap::with_capacity(properties.len());
        for (prop, packed) in properties.iter().zip(&layout.properties) {
            if prop.default.len() != prop.ty.components() {
                return Err(ConfigurationError::InvalidProperty {
                    name: prop.name.clone(),
                    text: format!("{:?}", prop.default),
                    reason: format!("{:?} needs {} components", prop.ty, prop.ty.components()),
                });
            }
            let bytes: &[u8] = bytemuck::cast_slice(&prop.default);
            defaults[packed.offset..packed.offset + bytes.len()].copy_from_slice(bytes);
            offsets.insert(prop.name.clone(), *packed);
        }

        Ok(Self {
            name: name.to_string(),
            properties,
            offsets,
            buffer_size: layout.size,
            defaults,
            textures,
            samplers,
        })
    }

    /// Split parsed declarations by kind, keeping constant declaration order.
    pub fn from_decls(name: &str, decls: Vec<PropertyDecl>) -> Result<Self, ConfigurationError> {
        let mut properties = Vec::new();
        let mut textures = Vec::new();
        let mut samplers = Vec::new();
        for decl in decls {
            match decl {
                PropertyDecl::Value { name, ty, default } => {
                    properties.push(PropertyDescriptor { name, ty, default })
                }
                PropertyDecl::Texture {
                    name,
                    slot,
                    default,
                } => textures.push(TextureSlot {
                    name,
                    slot,
                    default,
                }),
                PropertyDecl::Sampler { name, slot, desc } => {
                    samplers.push(SamplerSlot { name, slot, desc })
                }
            }
        }
        Self::new(name, properties, textures, samplers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<PackedProperty> {
        self.offsets.get(name).copied()
    }

    pub fn offsets(&self) -> &HashMap<String, PackedProperty> {
        &self.offsets
    }

    /// Zero when the scheme has no constant properties.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Initial buffer contents with every default written at its offset.
    pub fn default_bytes(&self) -> &[u8] {
        &self.defaults
    }

    pub fn textures(&self) -> &[TextureSlot] {
        &self.textures
    }

    pub fn samplers(&self) -> &[SamplerSlot] {
        &self.samplers
    }
}

fn check_slots<'a>(
    scheme: &str,
    kind: &'static str,
    slots: impl Iterator<Item = (&'a str, u32)>,
) -> Result<(), ConfigurationError> {
    let mut used: HashMap<u32, &str> = HashMap::new();
    for (name, slot) in slots {
        if slot as usize >= MAX_SLOTS {
            return Err(ConfigurationError::SlotOutOfRange {
                name: name.to_string(),
                slot,
                limit: MAX_SLOTS,
            });
        }
        if let Some(first) = used.insert(slot, name) {
            return Err(ConfigurationError::DuplicateSlot {
                scheme: scheme.to_string(),
                kind,
                slot,
                first: first.to_string(),
                second: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn prop(name: &str, ty: PropertyType, default: &[f32]) -> PropertyDescriptor {
        PropertyDescriptor {
            name: name.into(),
            ty,
            default: default.to_vec(),
        }
    }

    #[test]
    fn float_float3_matrix_layout() {
        let scheme = MaterialScheme::new(
            "scenario",
            vec![
                prop("A", PropertyType::Float, &[1.0]),
                prop("B", PropertyType::Float3, &[0.0, 0.0, 0.0]),
                prop("M", PropertyType::Matrix, &PropertyType::identity()),
            ],
            vec![],
            vec![],
        )
        .unwrap();
        assert_eq!(scheme.property("A").unwrap().offset, 0);
        assert_eq!(scheme.property("B").unwrap().offset, 4);
        assert_eq!(scheme.property("M").unwrap().offset, 16);
        assert_eq!(scheme.buffer_size(), 80);

        let floats: &[f32] = bytemuck::cast_slice(scheme.default_bytes());
        assert_eq!(floats.len(), 20);
        assert_eq!(floats[0], 1.0);
        assert_eq!(&floats[4..8], &[1.0, 0.0, 0.0, 0.0]);
    }

    #[rstest]
    #[case(&[PropertyType::Float, PropertyType::Float4], &[0, 16], 32)]
    #[case(&[PropertyType::Float2, PropertyType::Float2, PropertyType::Float3], &[0, 8, 16], 32)]
    #[case(&[PropertyType::Float3, PropertyType::Float], &[0, 12], 16)]
    #[case(&[PropertyType::Float, PropertyType::Float, PropertyType::Float2], &[0, 4, 8], 16)]
    #[case(&[PropertyType::Float3, PropertyType::Float2], &[0, 16], 32)]
    #[case(&[], &[], 0)]
    fn packing_cases(
        #[case] types: &[PropertyType],
        #[case] offsets: &[usize],
        #[case] size: usize,
    ) {
        let layout = pack_properties(types.iter().copied());
        let got: Vec<usize> = layout.properties.iter().map(|p| p.offset).collect();
        assert_eq!(got, offsets);
        assert_eq!(layout.size, size);
    }

    /// Every sequence of up to four properties.
    fn all_sequences() -> Vec<Vec<PropertyType>> {
        let mut out = vec![vec![]];
        let mut frontier = vec![vec![]];
        for _ in 0..4 {
            let mut next = Vec::new();
            for seq in &frontier {
                for ty in PropertyType::ALL {
                    let mut longer: Vec<PropertyType> = seq.clone();
                    longer.push(ty);
                    next.push(longer);
                }
            }
            out.extend(next.iter().cloned());
            frontier = next;
        }
        out
    }

    #[test]
    fn packing_never_straddles_registers() {
        for types in all_sequences() {
            let layout = pack_properties(types.iter().copied());
            assert_eq!(layout.size % REGISTER_SIZE, 0, "{types:?}");
            let mut end = 0;
            for p in &layout.properties {
                let size = p.ty.size();
                assert!(p.offset >= end, "overlap in {types:?}");
                let start_register = p.offset / REGISTER_SIZE;
                let last_register = (p.offset + size - 1) / REGISTER_SIZE;
                if start_register != last_register {
                    assert_eq!(p.offset % REGISTER_SIZE, 0, "{types:?} straddles at {}", p.offset);
                }
                end = p.offset + size;
            }
            assert!(end <= layout.size);
        }
    }

    #[test]
    fn duplicate_texture_slot_is_rejected() {
        let textures = vec![
            TextureSlot {
                name: "a".into(),
                slot: 1,
                default: "white".into(),
            },
            TextureSlot {
                name: "b".into(),
                slot: 1,
                default: "black".into(),
            },
        ];
        let err = MaterialScheme::new("dup", vec![], textures, vec![]).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DuplicateSlot { kind: "texture", slot: 1, .. }
        ));
    }

    #[test]
    fn texture_and_sampler_may_share_a_slot_number() {
        let scheme = MaterialScheme::from_decls(
            "shared",
            vec![
                PropertyDecl::parse("map", "texture2d(0)").unwrap(),
                PropertyDecl::parse("smp", "sampler(0)").unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(scheme.buffer_size(), 0);
        assert!(scheme.default_bytes().is_empty());
    }

    #[test]
    fn duplicate_property_name_is_rejected() {
        let err = MaterialScheme::new(
            "dup",
            vec![
                prop("x", PropertyType::Float, &[0.0]),
                prop("x", PropertyType::Float2, &[0.0, 0.0]),
            ],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::Duplicate { .. }));
    }
}
