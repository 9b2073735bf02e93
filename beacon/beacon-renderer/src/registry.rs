//! Named resource registry: one owned object, populated during load and initialise, read-only
//! while frames render.

use std::collections::HashMap;
use std::rc::Rc;

use beacon_rhi::{Device, SamplerDescriptor, SamplerId};

use crate::descriptor;
use crate::error::{ConfigurationError, RenderError, Result};
use crate::material::MaterialHandle;
use crate::resources::{Mesh, Texture};
use crate::scheme::MaterialScheme;
use crate::shader::{Shader, ShaderSource};

pub const WHITE_TEXTURE: &str = "white";
pub const BLACK_TEXTURE: &str = "black";
pub const FLAT_NORMAL_TEXTURE: &str = "flat_normal";

#[derive(Debug, Default)]
pub struct Registry {
    shaders: HashMap<String, Rc<Shader>>,
    schemes: HashMap<String, Rc<MaterialScheme>>,
    materials: HashMap<String, MaterialHandle>,
    textures: HashMap<String, Texture>,
    samplers: HashMap<SamplerDescriptor, SamplerId>,
    meshes: HashMap<String, Rc<Mesh>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry plus the 1x1 fallback textures material defaults refer to.
    pub fn with_defaults(device: &mut dyn Device) -> Result<Self> {
        let mut registry = Self::new();
        for (name, rgba) in [
            (WHITE_TEXTURE, [255, 255, 255, 255]),
            (BLACK_TEXTURE, [0, 0, 0, 255]),
            (FLAT_NORMAL_TEXTURE, [128, 128, 255, 255]),
        ] {
            let texture = Texture::solid(device, name, rgba)?;
            registry.insert_texture(texture)?;
        }
        Ok(registry)
    }

    /// Index every material block of every source, then compile each source's shader block.
    ///
    /// Schemes come first so a shader may reference a scheme declared in any other source.
    pub fn load_shaders(&mut self, device: &mut dyn Device, sources: &[ShaderSource]) -> Result<()> {
        let mut has_schemes = Vec::with_capacity(sources.len());
        for source in sources {
            let schemes = descriptor::compile_material_blocks(&source.text)?;
            has_schemes.push(!schemes.is_empty());
            for scheme in schemes {
                for sampler in scheme.samplers() {
                    self.sampler(device, &sampler.desc)?;
                }
                self.insert_scheme(scheme)?;
            }
        }
        for (source, has_schemes) in sources.iter().zip(has_schemes) {
            let Some(desc) = descriptor::compile_shader_source(&source.name, &source.text)? else {
                // A source with neither block kind contributes nothing.
                if !has_schemes {
                    return Err(ConfigurationError::MissingShaderBlock {
                        source_name: source.name.clone(),
                    }
                    .into());
                }
                log::debug!("source `{}` holds only material blocks", source.name);
                continue;
            };
            if let Some(scheme) = &desc.material {
                self.scheme(scheme)?;
            }
            let shader = Shader::create(device, &source.name, &source.text, desc)?;
            self.insert_shader(shader)?;
        }
        log::info!(
            "registry loaded {} shaders, {} material schemes",
            self.shaders.len(),
            self.schemes.len()
        );
        Ok(())
    }

    pub fn insert_shader(&mut self, shader: Shader) -> Result<Rc<Shader>> {
        let name = shader.name().to_string();
        if self.shaders.contains_key(&name) {
            return Err(duplicate("shader", name));
        }
        let shader = Rc::new(shader);
        self.shaders.insert(name, shader.clone());
        Ok(shader)
    }

    pub fn insert_scheme(&mut self, scheme: MaterialScheme) -> Result<Rc<MaterialScheme>> {
        let name = scheme.name().to_string();
        if self.schemes.contains_key(&name) {
            return Err(duplicate("material scheme", name));
        }
        log::debug!(
            "scheme `{}`: {} bytes, {} textures, {} samplers",
            name,
            scheme.buffer_size(),
            scheme.textures().len(),
            scheme.samplers().len()
        );
        let scheme = Rc::new(scheme);
        self.schemes.insert(name, scheme.clone());
        Ok(scheme)
    }

    pub fn insert_material(&mut self, name: &str, material: MaterialHandle) -> Result<()> {
        if self.materials.contains_key(name) {
            return Err(duplicate("material", name.to_string()));
        }
        self.materials.insert(name.to_string(), material);
        Ok(())
    }

    pub fn insert_texture(&mut self, texture: Texture) -> Result<()> {
        if self.textures.contains_key(texture.name()) {
            return Err(duplicate("texture", texture.name().to_string()));
        }
        self.textures.insert(texture.name().to_string(), texture);
        Ok(())
    }

    pub fn insert_mesh(&mut self, mesh: Mesh) -> Result<Rc<Mesh>> {
        if self.meshes.contains_key(mesh.name()) {
            return Err(duplicate("mesh", mesh.name().to_string()));
        }
        let mesh = Rc::new(mesh);
        self.meshes.insert(mesh.name().to_string(), mesh.clone());
        Ok(mesh)
    }

    /// Shared sampler for `desc`, created on first request.
    pub fn sampler(&mut self, device: &mut dyn Device, desc: &SamplerDescriptor) -> Result<SamplerId> {
        if let Some(&id) = self.samplers.get(desc) {
            return Ok(id);
        }
        let id = device.create_sampler(desc)?;
        self.samplers.insert(*desc, id);
        Ok(id)
    }

    /// Sampler created earlier by [`sampler`](Self::sampler) or [`load_shaders`](Self::load_shaders).
    pub fn cached_sampler(&self, desc: &SamplerDescriptor) -> Result<SamplerId> {
        self.samplers
            .get(desc)
            .copied()
            .ok_or_else(|| RenderError::not_found("sampler", descriptor::sampler_text(desc)))
    }

    pub fn shader(&self, name: &str) -> Result<Rc<Shader>> {
        self.shaders
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::not_found("shader", name))
    }

    pub fn scheme(&self, name: &str) -> Result<Rc<MaterialScheme>> {
        self.schemes
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::not_found("material scheme", name))
    }

    pub fn material(&self, name: &str) -> Result<MaterialHandle> {
        self.materials
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::not_found("material", name))
    }

    pub fn texture(&self, name: &str) -> Result<&Texture> {
        self.textures
            .get(name)
            .ok_or_else(|| RenderError::not_found("texture", name))
    }

    pub fn mesh(&self, name: &str) -> Result<Rc<Mesh>> {
        self.meshes
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::not_found("mesh", name))
    }

    pub fn contains_texture(&self, name: &str) -> bool {
        self.textures.contains_key(name)
    }

    /// Sorted shader names.
    pub fn shader_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.shaders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted scheme names.
    pub fn scheme_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Destroy every device resource the registry holds and empty it.
    pub fn release(&mut self, device: &mut dyn Device) {
        for (_, material) in self.materials.drain() {
            material.borrow_mut().release(device);
        }
        for (_, mesh) in self.meshes.drain() {
            mesh.release(device);
        }
        for (_, texture) in self.textures.drain() {
            device.destroy(texture.id().raw());
        }
        for (_, sampler) in self.samplers.drain() {
            device.destroy(sampler.raw());
        }
        for (_, shader) in self.shaders.drain() {
            device.destroy(shader.program().raw());
        }
        self.schemes.clear();
    }
}

fn duplicate(what: &'static str, name: String) -> RenderError {
    ConfigurationError::Duplicate { what, name }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_rhi::{DeviceCall, NullDevice};

    const LIB: &str = r#"/*
@be-material:shared
{
    "tint": "float4 = 1",
    "map": "texture2d(0) = black",
    "smp": "sampler(0) = point-clamp",
}
@be-end
*/"#;

    const USER: &str = r#"/*
@be-shader:
(
    topology: "triangle-list",
    vertex: "vs_main",
    pixel: "fs_main",
    targets: { "color": 0 },
    material: "shared",
)
@be-end
*/"#;

    #[test]
    fn scheme_in_another_source_resolves() {
        let mut device = NullDevice::default();
        let mut registry = Registry::with_defaults(&mut device).unwrap();
        registry
            .load_shaders(
                &mut device,
                &[ShaderSource::new("user", USER), ShaderSource::new("lib", LIB)],
            )
            .unwrap();
        let shader = registry.shader("user").unwrap();
        assert_eq!(shader.material_scheme(), Some("shared"));
        assert_eq!(registry.scheme("shared").unwrap().buffer_size(), 16);
        assert_eq!(registry.shader_names(), vec!["user"]);
        assert_eq!(
            device.count(|c| matches!(c, DeviceCall::CreateSampler { .. })),
            1
        );
    }

    #[test]
    fn missing_scheme_is_not_found() {
        let mut device = NullDevice::default();
        let mut registry = Registry::new();
        let err = registry
            .load_shaders(&mut device, &[ShaderSource::new("user", USER)])
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::ResourceNotFound { kind: "material scheme", .. }
        ));
    }

    #[test]
    fn duplicate_scheme_is_configuration_error() {
        let mut device = NullDevice::default();
        let mut registry = Registry::new();
        let err = registry
            .load_shaders(
                &mut device,
                &[ShaderSource::new("a", LIB), ShaderSource::new("b", LIB)],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Configuration(ConfigurationError::Duplicate { .. })
        ));
    }

    #[test]
    fn source_without_blocks_is_rejected() {
        let mut device = NullDevice::default();
        let mut registry = Registry::new();
        let err = registry
            .load_shaders(
                &mut device,
                &[
                    ShaderSource::new("lib", LIB),
                    ShaderSource::new("plain", "fn main() {}"),
                ],
            )
            .unwrap_err();
        match err {
            RenderError::Configuration(ConfigurationError::MissingShaderBlock { source_name }) => {
                assert_eq!(source_name, "plain");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn samplers_are_shared_by_descriptor() {
        let mut device = NullDevice::default();
        let mut registry = Registry::new();
        let desc = descriptor::parse_sampler("linear-clamp").unwrap();
        let a = registry.sampler(&mut device, &desc).unwrap();
        let b = registry.sampler(&mut device, &desc).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.cached_sampler(&desc).unwrap(), a);
        let other = descriptor::parse_sampler("point-wrap").unwrap();
        assert!(registry.cached_sampler(&other).is_err());
    }

    #[test]
    fn missing_lookups_name_the_key() {
        let registry = Registry::new();
        match registry.texture("albedo") {
            Err(RenderError::ResourceNotFound { kind, name }) => {
                assert_eq!((kind, name.as_str()), ("texture", "albedo"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(registry.mesh("cube").is_err());
        assert!(registry.material("m").is_err());
    }

    #[test]
    fn release_destroys_everything() {
        let mut device = NullDevice::default();
        let baseline = device.live_resource_count();
        let mut registry = Registry::with_defaults(&mut device).unwrap();
        registry
            .load_shaders(
                &mut device,
                &[ShaderSource::new("lib", LIB), ShaderSource::new("user", USER)],
            )
            .unwrap();
        assert!(device.live_resource_count() > baseline);
        registry.release(&mut device);
        assert_eq!(device.live_resource_count(), baseline);
        assert!(!registry.contains_texture(WHITE_TEXTURE));
    }
}
