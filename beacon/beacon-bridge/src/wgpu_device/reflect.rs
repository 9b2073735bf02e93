//! WGSL validation and binding reflection with naga.
//!
//! Bindings follow the slot convention of the Beacon shaders: group 0 holds constant buffers,
//! group 1 textures and group 2 samplers; the binding index is the slot.

use beacon_rhi::{DeviceError, Stage, StageMask, TextureDimension};
use naga::valid::{Capabilities, ValidationFlags, Validator};

pub const CONSTANT_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;
pub const SAMPLER_GROUP: u32 = 2;
pub const GROUP_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ConstantBuffer,
    Texture {
        dimension: TextureDimension,
        /// `texture_depth_*`: sampled as depth, usable with comparison samplers.
        depth: bool,
    },
    Sampler {
        comparison: bool,
    },
}

impl BindingKind {
    fn group(self) -> u32 {
        match self {
            BindingKind::ConstantBuffer => CONSTANT_GROUP,
            BindingKind::Texture { .. } => TEXTURE_GROUP,
            BindingKind::Sampler { .. } => SAMPLER_GROUP,
        }
    }
}

/// One resource binding statically used by at least one of the reflected entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReflectedBinding {
    pub group: u32,
    pub slot: u32,
    pub kind: BindingKind,
    /// Entry point stages that read the binding.
    pub stages: StageMask,
}

fn compile_error(label: &str, message: String) -> DeviceError {
    DeviceError::ShaderCompilation {
        label: label.to_string(),
        message,
    }
}

fn naga_stage(stage: Stage) -> Option<naga::ShaderStage> {
    match stage {
        Stage::Vertex => Some(naga::ShaderStage::Vertex),
        Stage::Pixel => Some(naga::ShaderStage::Fragment),
        Stage::Tessellation => None,
    }
}

fn classify(module: &naga::Module, global: &naga::GlobalVariable) -> Option<BindingKind> {
    if global.space == naga::AddressSpace::Uniform {
        return Some(BindingKind::ConstantBuffer);
    }
    match module.types[global.ty].inner {
        naga::TypeInner::Image { dim, class, .. } => {
            let dimension = match dim {
                naga::ImageDimension::Cube => TextureDimension::Cube,
                _ => TextureDimension::D2,
            };
            Some(BindingKind::Texture {
                dimension,
                depth: matches!(class, naga::ImageClass::Depth { .. }),
            })
        }
        naga::TypeInner::Sampler { comparison } => Some(BindingKind::Sampler { comparison }),
        _ => None,
    }
}

/// Parse and validate `source`, then collect the bindings each of `entries` uses.
/// Bindings are sorted by (group, slot).
pub fn reflect_program(
    label: &str,
    source: &str,
    entries: &[(Stage, &str)],
) -> Result<Vec<ReflectedBinding>, DeviceError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| compile_error(label, e.emit_to_string(source)))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| compile_error(label, e.emit_to_string(source)))?;

    let mut bindings: Vec<ReflectedBinding> = Vec::new();
    for &(stage, name) in entries {
        let wanted = naga_stage(stage).ok_or_else(|| {
            DeviceError::Unsupported(format!("`{label}`: {stage:?} entry points"))
        })?;
        let index = module
            .entry_points
            .iter()
            .position(|ep| ep.name == name && ep.stage == wanted)
            .ok_or_else(|| {
                compile_error(label, format!("no {stage:?} entry point named `{name}`"))
            })?;
        let function = info.get_entry_point(index);

        for (handle, global) in module.global_variables.iter() {
            let Some(binding) = &global.binding else {
                continue;
            };
            if function[handle].is_empty() {
                continue;
            }
            let kind = classify(&module, global).ok_or_else(|| {
                compile_error(
                    label,
                    format!("unsupported resource type at @group({}) @binding({})", binding.group, binding.binding),
                )
            })?;
            if kind.group() != binding.group {
                return Err(compile_error(
                    label,
                    format!(
                        "{:?} declared in group {}, expected group {}",
                        kind,
                        binding.group,
                        kind.group()
                    ),
                ));
            }
            match bindings
                .iter_mut()
                .find(|b| b.group == binding.group && b.slot == binding.binding)
            {
                Some(existing) => existing.stages |= stage.mask(),
                None => bindings.push(ReflectedBinding {
                    group: binding.group,
                    slot: binding.binding,
                    kind,
                    stages: stage.mask(),
                }),
            }
        }
    }
    bindings.sort_by_key(|b| (b.group, b.slot));
    log::trace!("reflected `{}`: {} bindings", label, bindings.len());
    Ok(bindings)
}
