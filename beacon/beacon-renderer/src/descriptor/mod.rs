//! Descriptor compiler: finds tagged metadata blocks in shader source text and turns them into
//! typed shader descriptors and material schemes.
//!
//! A block starts at `@be-shader:` or `@be-material:<name>` and ends at the next `@be-end`. The
//! body between them is RON, so comments and trailing commas are accepted:
//!
//! ```text
//! @be-shader:
//! (
//!     topology: "triangle-list",
//!     vertex: "vs_main",
//!     vertexLayout: ["position", "normal", "texcoord"],
//!     pixel: "fs_main",
//!     targets: { "normal": 0, "albedo": 1 },
//!     material: "standard",
//! )
//! @be-end
//! ```

mod property;

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;

use beacon_rhi::{PrimitiveTopology, StageMask, VertexSemantic, MAX_COLOR_TARGETS};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ConfigurationError, ParseError, RenderError, Result};
use crate::scheme::MaterialScheme;

pub use property::{parse_sampler, sampler_text, PropertyDecl};

pub const SHADER_TAG: &str = "@be-shader:";
pub const MATERIAL_TAG: &str = "@be-material:";
pub const END_TAG: &str = "@be-end";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Shader,
    Material(String),
}

/// One located block. `body` is trimmed; `body_range` locates it in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedBlock<'a> {
    pub kind: BlockKind,
    pub body: &'a str,
    pub body_range: Range<usize>,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn next_tag(source: &str, from: usize) -> Option<(usize, &'static str)> {
    let rest = source.get(from..)?;
    let shader = rest.find(SHADER_TAG).map(|i| (from + i, SHADER_TAG));
    let material = rest.find(MATERIAL_TAG).map(|i| (from + i, MATERIAL_TAG));
    match (shader, material) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Locate every tagged block in `source`, in order of appearance.
pub fn find_blocks(source: &str) -> Result<Vec<TaggedBlock<'_>>, ParseError> {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    while let Some((start, tag)) = next_tag(source, cursor) {
        let after_tag = start + tag.len();
        let (kind, header_end) = if tag == SHADER_TAG {
            (BlockKind::Shader, after_tag)
        } else {
            let rest = &source[after_tag..];
            let len = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
            if len == 0 {
                return Err(ParseError::new(
                    "material block without a name",
                    source,
                    start..after_tag,
                ));
            }
            (
                BlockKind::Material(rest[..len].to_string()),
                after_tag + len,
            )
        };
        let end = source[header_end..]
            .find(END_TAG)
            .map(|i| header_end + i)
            .ok_or_else(|| {
                ParseError::new(
                    format!("unterminated block: missing {END_TAG}"),
                    source,
                    start..source.len(),
                )
            })?;
        if let Some((nested, _)) = next_tag(&source[..end], header_end) {
            return Err(ParseError::new(
                format!("block opened before the previous one reached {END_TAG}"),
                source,
                nested..end,
            ));
        }
        let raw = &source[header_end..end];
        let body = raw.trim();
        let body_start = header_end + (raw.len() - raw.trim_start().len());
        blocks.push(TaggedBlock {
            kind,
            body,
            body_range: body_start..body_start + body.len(),
        });
        cursor = end + END_TAG.len();
    }
    Ok(blocks)
}

fn ron_options() -> ron::Options {
    ron::Options::default().with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
}

/// Parse a block body with RON, mapping the error position back into `source`.
fn parse_body<'a, T: Deserialize<'a>>(
    source: &str,
    block: &TaggedBlock<'a>,
) -> Result<T, ParseError> {
    ron_options().from_str(block.body).map_err(|err| {
        let offset = line_col_offset(block.body, err.position.line, err.position.col);
        let line_start = block.body[..offset].rfind('\n').map_or(0, |i| i + 1);
        let line_end = block.body[offset..]
            .find('\n')
            .map_or(block.body.len(), |i| offset + i);
        let base = block.body_range.start;
        ParseError::new(err.code.to_string(), source, base + line_start..base + line_end)
    })
}

/// Byte offset of a 1-based (line, column) position, clamped to the text.
fn line_col_offset(text: &str, line: usize, col: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    let mut offset = (line_start + col.saturating_sub(1)).min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Ordered map entries that keep duplicates so validation can report them.
#[derive(Debug, Clone, PartialEq)]
struct OrderedEntries<V>(Vec<(String, V)>);

impl<V: Serialize> Serialize for OrderedEntries<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedEntries<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = OrderedEntries<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of names")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, V>()? {
                    entries.push(entry);
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTessellation {
    hull: String,
    domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawShaderBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topology: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vertex: Option<String>,
    #[serde(
        rename = "vertexLayout",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    vertex_layout: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tesselation: Option<RawTessellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pixel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    targets: Option<OrderedEntries<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    material: Option<String>,
}

pub fn parse_topology(token: &str) -> Result<PrimitiveTopology, ConfigurationError> {
    match token.trim() {
        "triangle-list" => Ok(PrimitiveTopology::TriangleList),
        "triangle-strip" => Ok(PrimitiveTopology::TriangleStrip),
        "patch-list-3" => Ok(PrimitiveTopology::PatchList3),
        other => Err(ConfigurationError::UnknownToken {
            context: "topology",
            token: other.to_string(),
            text: token.to_string(),
        }),
    }
}

pub fn topology_token(topology: PrimitiveTopology) -> &'static str {
    match topology {
        PrimitiveTopology::TriangleList => "triangle-list",
        PrimitiveTopology::TriangleStrip => "triangle-strip",
        PrimitiveTopology::PatchList3 => "patch-list-3",
    }
}

pub fn parse_semantic(token: &str) -> Result<VertexSemantic, ConfigurationError> {
    match token.trim() {
        "position" => Ok(VertexSemantic::Position),
        "normal" => Ok(VertexSemantic::Normal),
        "texcoord" => Ok(VertexSemantic::Texcoord),
        "tangent" => Ok(VertexSemantic::Tangent),
        "color" => Ok(VertexSemantic::Color),
        other => Err(ConfigurationError::UnknownToken {
            context: "vertex semantic",
            token: other.to_string(),
            text: token.to_string(),
        }),
    }
}

pub fn semantic_token(semantic: VertexSemantic) -> &'static str {
    match semantic {
        VertexSemantic::Position => "position",
        VertexSemantic::Normal => "normal",
        VertexSemantic::Texcoord => "texcoord",
        VertexSemantic::Tangent => "tangent",
        VertexSemantic::Color => "color",
    }
}

/// Render-target name ↔ slot map, bijective by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetMap {
    by_name: BTreeMap<String, u32>,
    by_slot: BTreeMap<u32, String>,
}

impl TargetMap {
    pub fn insert(&mut self, name: &str, slot: u32) -> Result<(), ConfigurationError> {
        if slot as usize >= MAX_COLOR_TARGETS {
            return Err(ConfigurationError::SlotOutOfRange {
                name: name.to_string(),
                slot,
                limit: MAX_COLOR_TARGETS,
            });
        }
        if let Some(&first) = self.by_name.get(name) {
            return Err(ConfigurationError::DuplicateTargetName {
                name: name.to_string(),
                first,
                second: slot,
            });
        }
        if let Some(first) = self.by_slot.get(&slot) {
            return Err(ConfigurationError::DuplicateTargetSlot {
                slot,
                first: first.clone(),
                second: name.to_string(),
            });
        }
        self.by_name.insert(name.to_string(), slot);
        self.by_slot.insert(slot, name.to_string());
        Ok(())
    }

    pub fn slot(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, slot: u32) -> Option<&str> {
        self.by_slot.get(&slot).map(String::as_str)
    }

    /// (slot, name) in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.by_slot.iter().map(|(slot, name)| (*slot, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TessellationEntries {
    pub hull: String,
    pub domain: String,
}

/// Typed, validated content of a `@be-shader:` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDescriptor {
    pub stages: StageMask,
    pub vertex_entry: Option<String>,
    pub tessellation: Option<TessellationEntries>,
    pub pixel_entry: Option<String>,
    pub topology: PrimitiveTopology,
    pub vertex_layout: Vec<VertexSemantic>,
    pub material: Option<String>,
    pub targets: TargetMap,
}

impl ShaderDescriptor {
    fn from_raw(raw: RawShaderBlock, block: &str) -> Result<Self, ConfigurationError> {
        let topology = raw
            .topology
            .as_deref()
            .ok_or_else(|| ConfigurationError::MissingField {
                block: block.to_string(),
                field: "topology",
            })
            .and_then(parse_topology)?;

        let vertex_layout = raw
            .vertex_layout
            .unwrap_or_default()
            .iter()
            .map(|s| parse_semantic(s))
            .collect::<Result<Vec<_>, _>>()?;

        let tessellation = raw.tesselation.map(|t| TessellationEntries {
            hull: t.hull,
            domain: t.domain,
        });
        if tessellation.is_some() != (topology == PrimitiveTopology::PatchList3) {
            return Err(ConfigurationError::TessellationTopology {
                topology: topology_token(topology).to_string(),
                tessellation: tessellation.is_some(),
            });
        }

        let mut targets = TargetMap::default();
        match (&raw.pixel, raw.targets) {
            (Some(_), None) => {
                return Err(ConfigurationError::MissingField {
                    block: block.to_string(),
                    field: "targets",
                })
            }
            (_, Some(entries)) => {
                for (name, slot) in &entries.0 {
                    targets.insert(name, *slot)?;
                }
            }
            (None, None) => {}
        }

        let mut stages = StageMask::empty();
        stages.set(StageMask::VERTEX, raw.vertex.is_some());
        stages.set(StageMask::TESSELLATION, tessellation.is_some());
        stages.set(StageMask::PIXEL, raw.pixel.is_some());

        Ok(Self {
            stages,
            vertex_entry: raw.vertex,
            tessellation,
            pixel_entry: raw.pixel,
            topology,
            vertex_layout,
            material: raw.material,
            targets,
        })
    }

    fn to_raw(&self) -> RawShaderBlock {
        RawShaderBlock {
            topology: Some(topology_token(self.topology).to_string()),
            vertex: self.vertex_entry.clone(),
            vertex_layout: (!self.vertex_layout.is_empty()).then(|| {
                self.vertex_layout
                    .iter()
                    .map(|s| semantic_token(*s).to_string())
                    .collect()
            }),
            tesselation: self.tessellation.as_ref().map(|t| RawTessellation {
                hull: t.hull.clone(),
                domain: t.domain.clone(),
            }),
            pixel: self.pixel_entry.clone(),
            // A pixel stage always carries its targets map, even an empty one.
            targets: (self.pixel_entry.is_some() || !self.targets.is_empty()).then(|| {
                OrderedEntries(
                    self.targets
                        .iter()
                        .map(|(slot, name)| (name.to_string(), slot))
                        .collect(),
                )
            }),
            material: self.material.clone(),
        }
    }

    /// Re-serialize as a complete tagged block that compiles back to `self`.
    pub fn to_block(&self) -> Result<String, ron::Error> {
        let body = ron::ser::to_string_pretty(&self.to_raw(), ron::ser::PrettyConfig::new())?;
        Ok(format!("{SHADER_TAG}\n{body}\n{END_TAG}"))
    }
}

/// Compile one located shader block. `name` is used in diagnostics only.
pub fn compile_shader_block(
    source: &str,
    block: &TaggedBlock<'_>,
    name: &str,
) -> Result<ShaderDescriptor> {
    let raw: RawShaderBlock = parse_body(source, block)?;
    Ok(ShaderDescriptor::from_raw(raw, &format!("shader `{name}`"))?)
}

/// The shader descriptor of a source, or None when it holds only material blocks.
pub fn compile_shader_source(name: &str, source: &str) -> Result<Option<ShaderDescriptor>> {
    let blocks = find_blocks(source)?;
    let mut shaders = blocks.iter().filter(|b| b.kind == BlockKind::Shader);
    let Some(block) = shaders.next() else {
        return Ok(None);
    };
    if shaders.next().is_some() {
        return Err(ConfigurationError::MultipleShaderBlocks {
            source_name: name.to_string(),
        }
        .into());
    }
    compile_shader_block(source, block, name).map(Some)
}

/// Compile one `@be-material:<name>` block body into a scheme.
pub fn compile_material_block(
    source: &str,
    block: &TaggedBlock<'_>,
    name: &str,
) -> Result<MaterialScheme> {
    let entries: OrderedEntries<String> = parse_body(source, block)?;
    let decls = entries
        .0
        .iter()
        .map(|(prop, spec)| PropertyDecl::parse(prop, spec))
        .collect::<Result<Vec<_>, _>>()?;
    MaterialScheme::from_decls(name, decls).map_err(RenderError::from)
}

/// Every material scheme declared anywhere in `source`.
pub fn compile_material_blocks(source: &str) -> Result<Vec<MaterialScheme>> {
    find_blocks(source)?
        .iter()
        .filter_map(|block| match &block.kind {
            BlockKind::Material(name) => Some(compile_material_block(source, block, name)),
            BlockKind::Shader => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::PropertyType;
    use rstest::rstest;

    const STANDARD: &str = r#"
/*
@be-shader:
(
    topology: "triangle-list",
    vertex: "vs_main",
    vertexLayout: ["position", "normal", "texcoord"],
    pixel: "fs_main", // trailing comments are fine
    targets: {
        "normal": 0,
        "albedo": 1,
    },
    material: "standard",
)
@be-end

@be-material:standard
{
    "base_color": "float4 = 1, 1, 1, 1",
    "albedo_map": "texture2d(0) = white",
    "surface": "sampler(0) = linear-wrap",
}
@be-end
*/
fn vs_main() {}
"#;

    fn compile(source: &str) -> Result<ShaderDescriptor> {
        compile_shader_source("test", source).map(|d| d.expect("shader block"))
    }

    fn shader_block(body: &str) -> String {
        format!("/* {SHADER_TAG}\n{body}\n{END_TAG} */")
    }

    #[test]
    fn finds_blocks_in_order() {
        let blocks = find_blocks(STANDARD).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::Shader);
        assert_eq!(blocks[1].kind, BlockKind::Material("standard".into()));
        assert!(blocks[0].body.starts_with('('));
        assert_eq!(&STANDARD[blocks[1].body_range.clone()], blocks[1].body);
    }

    #[test]
    fn compiles_standard_shader() {
        let desc = compile(STANDARD).unwrap();
        assert_eq!(desc.topology, PrimitiveTopology::TriangleList);
        assert_eq!(desc.stages, StageMask::VERTEX | StageMask::PIXEL);
        assert_eq!(desc.vertex_entry.as_deref(), Some("vs_main"));
        assert_eq!(
            desc.vertex_layout,
            vec![
                VertexSemantic::Position,
                VertexSemantic::Normal,
                VertexSemantic::Texcoord
            ]
        );
        assert_eq!(desc.targets.slot("albedo"), Some(1));
        assert_eq!(desc.targets.name(0), Some("normal"));
        assert_eq!(desc.material.as_deref(), Some("standard"));
    }

    #[test]
    fn compiles_material_blocks() {
        let schemes = compile_material_blocks(STANDARD).unwrap();
        assert_eq!(schemes.len(), 1);
        let scheme = &schemes[0];
        assert_eq!(scheme.name(), "standard");
        assert_eq!(
            scheme.property("base_color").map(|p| p.ty),
            Some(PropertyType::Float4)
        );
        assert_eq!(scheme.textures()[0].default, "white");
        assert_eq!(scheme.samplers()[0].slot, 0);
    }

    #[test]
    fn source_without_shader_block_is_none() {
        let source = "/* @be-material:x { \"a\": \"float\" } @be-end */";
        assert_eq!(compile_shader_source("lib", source).unwrap(), None);
    }

    #[test]
    fn round_trip_preserves_fields() {
        let first = compile(STANDARD).unwrap();
        let block = first.to_block().unwrap();
        let second = compile(&block).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn round_trip_with_tessellation() {
        let source = shader_block(
            r#"(topology: "patch-list-3", vertex: "vs", tesselation: (hull: "hs", domain: "ds"))"#,
        );
        let first = compile(&source).unwrap();
        assert!(first.stages.contains(StageMask::TESSELLATION));
        assert_eq!(compile(&first.to_block().unwrap()).unwrap(), first);
    }

    #[test]
    fn round_trip_keeps_empty_targets_of_pixel_stage() {
        let source =
            shader_block(r#"(topology: "triangle-list", vertex: "vs", pixel: "fs", targets: {})"#);
        let first = compile(&source).unwrap();
        assert!(first.targets.is_empty());
        let block = first.to_block().unwrap();
        assert_eq!(compile(&block).unwrap(), first);
    }

    #[rstest]
    #[case::missing_topology(r#"(vertex: "vs")"#)]
    #[case::pixel_without_targets(r#"(topology: "triangle-list", pixel: "fs")"#)]
    #[case::duplicate_slot(r#"(topology: "triangle-list", pixel: "fs", targets: {"a": 0, "b": 0})"#)]
    #[case::duplicate_name(r#"(topology: "triangle-list", pixel: "fs", targets: {"a": 0, "a": 1})"#)]
    #[case::unknown_topology(r#"(topology: "line-list")"#)]
    #[case::unknown_semantic(r#"(topology: "triangle-list", vertexLayout: ["bitangent"])"#)]
    #[case::tessellation_without_patches(
        r#"(topology: "triangle-list", tesselation: (hull: "h", domain: "d"))"#
    )]
    fn configuration_errors(#[case] body: &str) {
        let err = compile(&shader_block(body)).unwrap_err();
        assert!(
            matches!(err, RenderError::Configuration(_)),
            "expected configuration error, got {err:?}"
        );
    }

    #[test]
    fn duplicate_slot_names_both_targets() {
        let body = r#"(topology: "triangle-list", pixel: "fs", targets: {"a": 0, "b": 0})"#;
        match compile(&shader_block(body)) {
            Err(RenderError::Configuration(ConfigurationError::DuplicateTargetSlot {
                slot,
                first,
                second,
            })) => {
                assert_eq!((slot, first.as_str(), second.as_str()), (0, "a", "b"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_field_is_parse_error_with_range() {
        let source = shader_block("(\n    topology: \"triangle-list\",\n    colour: \"red\",\n)");
        match compile(&source) {
            Err(RenderError::Parse(err)) => {
                assert!(err.range.end <= source.len());
                assert!(err.range.start >= source.find('(').unwrap());
                assert!(!err.snippet.is_empty());
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_block_is_parse_error() {
        let err = find_blocks("/* @be-shader: (topology: \"triangle-list\") */").unwrap_err();
        assert_eq!(err.range.start, 3);
        assert!(err.message.contains(END_TAG));
    }

    #[test]
    fn two_shader_blocks_are_rejected() {
        let body = r#"(topology: "triangle-list")"#;
        let source = format!("{}\n{}", shader_block(body), shader_block(body));
        assert!(matches!(
            compile_shader_source("twice", &source),
            Err(RenderError::Configuration(
                ConfigurationError::MultipleShaderBlocks { .. }
            ))
        ));
    }

    #[test]
    fn line_col_maps_to_byte_offset() {
        let text = "ab\ncdef\ng";
        assert_eq!(line_col_offset(text, 1, 1), 0);
        assert_eq!(line_col_offset(text, 2, 3), 5);
        assert_eq!(line_col_offset(text, 9, 9), text.len());
    }
}
