//! Material property micro-syntax `name: type(slot) = default` and the sampler descriptor
//! micro-language `filter-address[-cmp]`.

use beacon_rhi::{AddressMode, FilterMode, SamplerDescriptor};

use crate::error::ConfigurationError;
use crate::scheme::PropertyType;

pub const DEFAULT_TEXTURE: &str = "white";
pub const DEFAULT_SAMPLER: &str = "linear-wrap";

/// One declaration from a `@be-material:` block.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDecl {
    /// Packed constant; `default` holds exactly `ty.components()` floats.
    Value {
        name: String,
        ty: PropertyType,
        default: Vec<f32>,
    },
    Texture {
        name: String,
        slot: u32,
        default: String,
    },
    Sampler {
        name: String,
        slot: u32,
        desc: SamplerDescriptor,
    },
}

impl PropertyDecl {
    pub fn name(&self) -> &str {
        match self {
            PropertyDecl::Value { name, .. }
            | PropertyDecl::Texture { name, .. }
            | PropertyDecl::Sampler { name, .. } => name,
        }
    }

    /// Parse a full line, `albedo_map: texture2d(0) = white`.
    pub fn parse_line(line: &str) -> Result<Self, ConfigurationError> {
        let (name, spec) = line
            .split_once(':')
            .ok_or_else(|| ConfigurationError::InvalidProperty {
                name: String::new(),
                text: line.to_string(),
                reason: "expected `name: type`".into(),
            })?;
        Self::parse(name, spec)
    }

    /// Parse the `type(slot) = default` part for property `name`.
    pub fn parse(name: &str, spec: &str) -> Result<Self, ConfigurationError> {
        let name = name.trim();
        let invalid = |reason: &str| ConfigurationError::InvalidProperty {
            name: name.to_string(),
            text: spec.to_string(),
            reason: reason.to_string(),
        };
        if name.is_empty() {
            return Err(invalid("empty property name"));
        }

        let (head, default) = match spec.split_once('=') {
            Some((head, default)) => (head.trim(), Some(unquote(default.trim()))),
            None => (spec.trim(), None),
        };
        let default = default.filter(|d| !d.is_empty());

        let (ty, slot) = match head.split_once('(') {
            Some((ty, rest)) => {
                let inner = rest
                    .trim_end()
                    .strip_suffix(')')
                    .ok_or_else(|| invalid("unclosed slot parenthesis"))?;
                let slot = inner
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| invalid("slot is not an unsigned integer"))?;
                (ty.trim(), Some(slot))
            }
            None => (head, None),
        };

        match ty {
            "texture2d" => Ok(PropertyDecl::Texture {
                name: name.to_string(),
                slot: slot.ok_or_else(|| invalid("texture needs a slot"))?,
                default: default.unwrap_or(DEFAULT_TEXTURE).to_string(),
            }),
            "sampler" => Ok(PropertyDecl::Sampler {
                name: name.to_string(),
                slot: slot.ok_or_else(|| invalid("sampler needs a slot"))?,
                desc: parse_sampler(default.unwrap_or(DEFAULT_SAMPLER))?,
            }),
            other => {
                let ty = PropertyType::parse(other).ok_or_else(|| {
                    ConfigurationError::UnknownToken {
                        context: "property type",
                        token: other.to_string(),
                        text: spec.to_string(),
                    }
                })?;
                if slot.is_some() {
                    return Err(invalid("constant properties take no slot"));
                }
                let default = match ty {
                    PropertyType::Matrix => PropertyType::identity().to_vec(),
                    _ => parse_components(default.unwrap_or(""), ty.components())
                        .ok_or_else(|| invalid("default does not match the type"))?,
                };
                Ok(PropertyDecl::Value {
                    name: name.to_string(),
                    ty,
                    default,
                })
            }
        }
    }
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

/// `1, 2, 3`, `(1, 2, 3)` or `[1, 2, 3]`; one value splats, none gives zeros.
fn parse_components(text: &str, count: usize) -> Option<Vec<f32>> {
    let text = text.trim();
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .or_else(|| text.strip_prefix('[').and_then(|t| t.strip_suffix(']')))
        .unwrap_or(text);
    let values = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>().ok())
        .collect::<Option<Vec<_>>>()?;
    match values.len() {
        0 => Some(vec![0.0; count]),
        1 => Some(vec![values[0]; count]),
        n if n == count => Some(values),
        _ => None,
    }
}

/// Parse `filter-address[-cmp]`, e.g. `point-clamp` or `linear-wrap-cmp`.
pub fn parse_sampler(text: &str) -> Result<SamplerDescriptor, ConfigurationError> {
    let text = text.trim();
    let unknown = |token: &str| ConfigurationError::UnknownToken {
        context: "sampler",
        token: token.to_string(),
        text: text.to_string(),
    };
    let mut tokens = text.split('-');
    let filter = match tokens.next().unwrap_or_default() {
        "point" => FilterMode::Point,
        "linear" => FilterMode::Linear,
        other => return Err(unknown(other)),
    };
    let address = match tokens.next().unwrap_or_default() {
        "wrap" => AddressMode::Wrap,
        "clamp" => AddressMode::Clamp,
        "mirror" => AddressMode::Mirror,
        other => return Err(unknown(other)),
    };
    let comparison = match tokens.next() {
        None => false,
        Some("cmp") => true,
        Some(other) => return Err(unknown(other)),
    };
    if let Some(extra) = tokens.next() {
        return Err(unknown(extra));
    }
    Ok(SamplerDescriptor {
        filter,
        address,
        comparison,
    })
}

/// Canonical micro-language text for a sampler.
pub fn sampler_text(desc: &SamplerDescriptor) -> String {
    let filter = match desc.filter {
        FilterMode::Point => "point",
        FilterMode::Linear => "linear",
    };
    let address = match desc.address {
        AddressMode::Wrap => "wrap",
        AddressMode::Clamp => "clamp",
        AddressMode::Mirror => "mirror",
    };
    if desc.comparison {
        format!("{filter}-{address}-cmp")
    } else {
        format!("{filter}-{address}")
    }
}
