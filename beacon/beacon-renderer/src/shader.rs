//! Compiled shaders and shader source loading.

use std::path::Path;

use beacon_rhi::{Device, PrimitiveTopology, ProgramDescriptor, ProgramId, StageMask, VertexSemantic};

use crate::config::BeaconConfig;
use crate::descriptor::ShaderDescriptor;
use crate::error::{RenderError, Result};

/// Extension appended to shader names when loading from disk.
pub const SHADER_EXTENSION: &str = "wgsl";

/// Shader sources the default passes need.
pub const BUILTIN_SHADERS: [&str; 8] = [
    "standard",
    "light_directional",
    "light_point",
    "bloom_threshold",
    "bloom_downsample",
    "bloom_upsample",
    "bloom_composite",
    "composer",
];

/// Named shader source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub name: String,
    pub text: String,
}

impl ShaderSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Read `dir/<name>.wgsl`.
    pub fn from_file(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{name}.{SHADER_EXTENSION}"));
        let text = std::fs::read_to_string(&path).map_err(|source| RenderError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self::new(name, text))
    }
}

fn builtin_text(name: &str) -> Option<&'static str> {
    let text = match name {
        "standard" => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/standard.wgsl")),
        "light_directional" => {
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/light_directional.wgsl"))
        }
        "light_point" => {
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/light_point.wgsl"))
        }
        "bloom_threshold" => {
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/bloom_threshold.wgsl"))
        }
        "bloom_downsample" => {
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/bloom_downsample.wgsl"))
        }
        "bloom_upsample" => {
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/bloom_upsample.wgsl"))
        }
        "bloom_composite" => {
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/bloom_composite.wgsl"))
        }
        "composer" => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/composer.wgsl")),
        _ => return None,
    };
    Some(text)
}

/// The embedded WGSL set, in [`BUILTIN_SHADERS`] order.
pub fn builtin_sources() -> Vec<ShaderSource> {
    BUILTIN_SHADERS
        .iter()
        .filter_map(|name| builtin_text(name).map(|text| ShaderSource::new(*name, text)))
        .collect()
}

/// Built-in sources, or the same names read from `config.shader_dir` when it is set.
pub fn load_sources(config: &BeaconConfig) -> Result<Vec<ShaderSource>> {
    match &config.shader_dir {
        Some(dir) => BUILTIN_SHADERS
            .iter()
            .map(|name| ShaderSource::from_file(dir, name))
            .collect(),
        None => Ok(builtin_sources()),
    }
}

/// A shader descriptor together with its device program.
#[derive(Debug)]
pub struct Shader {
    name: String,
    descriptor: ShaderDescriptor,
    program: ProgramId,
}

impl Shader {
    pub fn create(
        device: &mut dyn Device,
        name: &str,
        source: &str,
        descriptor: ShaderDescriptor,
    ) -> Result<Self> {
        let program = device.create_program(&ProgramDescriptor {
            label: name.to_string(),
            source: source.to_string(),
            vertex_entry: descriptor.vertex_entry.clone(),
            tessellation_entries: descriptor
                .tessellation
                .as_ref()
                .map(|t| (t.hull.clone(), t.domain.clone())),
            pixel_entry: descriptor.pixel_entry.clone(),
            topology: descriptor.topology,
            vertex_layout: descriptor.vertex_layout.clone(),
        })?;
        log::debug!(
            "shader `{}`: stages {:?}, material {:?}",
            name,
            descriptor.stages,
            descriptor.material
        );
        Ok(Self {
            name: name.to_string(),
            descriptor,
            program,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &ShaderDescriptor {
        &self.descriptor
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn stages(&self) -> StageMask {
        self.descriptor.stages
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.descriptor.topology
    }

    pub fn vertex_layout(&self) -> &[VertexSemantic] {
        &self.descriptor.vertex_layout
    }

    /// Name of the material scheme this shader reads at the material slot.
    pub fn material_scheme(&self) -> Option<&str> {
        self.descriptor.material.as_deref()
    }
}
