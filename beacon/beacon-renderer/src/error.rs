//! Error taxonomy: malformed text, invalid configuration, missing registry entries and device
//! failures. Contract violations by internal callers are panics, not errors.

use std::ops::Range;
use std::path::PathBuf;

use beacon_rhi::DeviceError;

use crate::scheme::PropertyType;

/// Malformed metadata text. `range` is a byte range into the whole source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at bytes {}..{} near `{snippet}`", range.start, range.end)]
pub struct ParseError {
    pub message: String,
    pub range: Range<usize>,
    pub snippet: String,
}

impl ParseError {
    /// Error covering `range` of `source`; the snippet is the first line of that range.
    pub fn new(message: impl Into<String>, source: &str, range: Range<usize>) -> Self {
        let end = range.end.min(source.len());
        let start = range.start.min(end);
        let snippet = source
            .get(start..end)
            .unwrap_or_default()
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Self {
            message: message.into(),
            range: start..end,
            snippet,
        }
    }
}

/// Well-formed text describing an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{block}: missing required field `{field}`")]
    MissingField { block: String, field: &'static str },

    #[error("render target slot {slot} claimed by both `{first}` and `{second}`")]
    DuplicateTargetSlot {
        slot: u32,
        first: String,
        second: String,
    },

    #[error("render target `{name}` declared for slots {first} and {second}")]
    DuplicateTargetName { name: String, first: u32, second: u32 },

    #[error("scheme `{scheme}`: {kind} slot {slot} claimed by both `{first}` and `{second}`")]
    DuplicateSlot {
        scheme: String,
        kind: &'static str,
        slot: u32,
        first: String,
        second: String,
    },

    #[error("{what} `{name}` defined more than once")]
    Duplicate { what: &'static str, name: String },

    #[error("unknown {context} token `{token}` in `{text}`")]
    UnknownToken {
        context: &'static str,
        token: String,
        text: String,
    },

    #[error("property `{name}` (`{text}`): {reason}")]
    InvalidProperty {
        name: String,
        text: String,
        reason: String,
    },

    #[error("`{name}` uses slot {slot}, limit is {limit}")]
    SlotOutOfRange { name: String, slot: u32, limit: usize },

    #[error("topology `{topology}` does not match tessellation stage (present: {tessellation})")]
    TessellationTopology { topology: String, tessellation: bool },

    #[error("source `{source_name}` contains more than one @be-shader block")]
    MultipleShaderBlocks { source_name: String },

    #[error("source `{source_name}` has no @be-shader block")]
    MissingShaderBlock { source_name: String },

    #[error("shader `{shader}` declares no material scheme")]
    NoMaterialScheme { shader: String },

    #[error("shader `{shader}` writes target `{target}` that pass `{pass}` does not provide")]
    UnknownRenderTarget {
        shader: String,
        target: String,
        pass: String,
    },

    #[error("mesh `{mesh}` vertex layout does not match shader `{shader}`")]
    VertexLayoutMismatch { mesh: String, shader: String },

    #[error("mesh `{mesh}`: {reason}")]
    InvalidMesh { mesh: String, reason: String },
}

/// Rejection at the single property validation point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("material `{material}` has no property `{name}`")]
    Unknown { material: String, name: String },

    #[error("property `{name}` is {actual:?}, not {expected:?}")]
    TypeMismatch {
        name: String,
        expected: PropertyType,
        actual: PropertyType,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error("{kind} `{name}` not found in registry")]
    ResourceNotFound { kind: &'static str, name: String },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        RenderError::ResourceNotFound {
            kind,
            name: name.into(),
        }
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
