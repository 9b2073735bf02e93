//! Material instances: a CPU mirror of the scheme's packed constant buffer, its GPU copy and the
//! texture/sampler bindings the shader reads.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::rc::Rc;

use beacon_rhi::{
    BufferAccess, BufferDescriptor, BufferId, BufferUsage, Device, DeviceError, SamplerId,
    TextureId, UploadMode,
};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::error::{ConfigurationError, PropertyError, Result};
use crate::registry::Registry;
use crate::scheme::{MaterialScheme, PackedProperty, PropertyType};
use crate::shader::Shader;

pub type MaterialHandle = Rc<RefCell<Material>>;

/// How often a material's constants change; picks the upload path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateFrequency {
    #[default]
    Static,
    /// Rewritten most frames (per-light parameters and the like).
    Frequent,
}

impl UpdateFrequency {
    pub fn upload_mode(self) -> UploadMode {
        match self {
            UpdateFrequency::Static => UploadMode::Replace,
            UpdateFrequency::Frequent => UploadMode::Discard,
        }
    }

    pub fn buffer_access(self) -> BufferAccess {
        match self {
            UpdateFrequency::Static => BufferAccess::Default,
            UpdateFrequency::Frequent => BufferAccess::Dynamic,
        }
    }
}

/// Rust types that map one-to-one onto a property type.
pub trait PropertyValue: bytemuck::Pod {
    const TYPE: PropertyType;
}

impl PropertyValue for f32 {
    const TYPE: PropertyType = PropertyType::Float;
}

impl PropertyValue for Vec2 {
    const TYPE: PropertyType = PropertyType::Float2;
}

impl PropertyValue for Vec3 {
    const TYPE: PropertyType = PropertyType::Float3;
}

impl PropertyValue for Vec4 {
    const TYPE: PropertyType = PropertyType::Float4;
}

impl PropertyValue for Mat4 {
    const TYPE: PropertyType = PropertyType::Matrix;
}

/// Validated access to one property. Valid for every material of the scheme it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyHandle<T> {
    offset: usize,
    _marker: PhantomData<T>,
}

impl<T> PropertyHandle<T> {
    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: TextureId,
    pub slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerBinding {
    pub sampler: SamplerId,
    pub slot: u32,
}

#[derive(Debug)]
pub struct Material {
    name: String,
    scheme: Rc<MaterialScheme>,
    shader: Rc<Shader>,
    data: Vec<u8>,
    offsets: HashMap<String, PackedProperty>,
    textures: BTreeMap<String, TextureBinding>,
    samplers: BTreeMap<String, SamplerBinding>,
    buffer: Option<BufferId>,
    dirty: bool,
    frequency: UpdateFrequency,
}

impl Material {
    /// Instance of the scheme `shader_name` declares, drawn with that shader.
    ///
    /// The GPU buffer starts with the scheme defaults, so a new material is clean.
    pub fn new(
        device: &mut dyn Device,
        registry: &Registry,
        name: &str,
        shader_name: &str,
        frequency: UpdateFrequency,
    ) -> Result<Self> {
        let shader = registry.shader(shader_name)?;
        let scheme_name = shader
            .material_scheme()
            .ok_or_else(|| ConfigurationError::NoMaterialScheme {
                shader: shader_name.to_string(),
            })?;
        let scheme = registry.scheme(scheme_name)?;

        let mut textures = BTreeMap::new();
        for slot in scheme.textures() {
            let texture = registry.texture(&slot.default)?;
            textures.insert(
                slot.name.clone(),
                TextureBinding {
                    texture: texture.id(),
                    slot: slot.slot,
                },
            );
        }
        let mut samplers = BTreeMap::new();
        for slot in scheme.samplers() {
            samplers.insert(
                slot.name.clone(),
                SamplerBinding {
                    sampler: registry.cached_sampler(&slot.desc)?,
                    slot: slot.slot,
                },
            );
        }

        let data = scheme.default_bytes().to_vec();
        let buffer = if data.is_empty() {
            None
        } else {
            Some(device.create_buffer(
                &BufferDescriptor {
                    label: Some(format!("material {name}")),
                    size: data.len() as u64,
                    usage: BufferUsage::CONSTANT,
                    access: frequency.buffer_access(),
                },
                Some(&data),
            )?)
        };
        log::debug!(
            "material `{}` ({}): {} bytes, {:?}",
            name,
            scheme.name(),
            data.len(),
            frequency
        );

        Ok(Self {
            name: name.to_string(),
            offsets: scheme.offsets().clone(),
            scheme,
            shader,
            data,
            textures,
            samplers,
            buffer,
            dirty: false,
            frequency,
        })
    }

    pub fn into_handle(self) -> MaterialHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheme(&self) -> &Rc<MaterialScheme> {
        &self.scheme
    }

    pub fn shader(&self) -> &Rc<Shader> {
        &self.shader
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn frequency(&self) -> UpdateFrequency {
        self.frequency
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// CPU copy of the constant buffer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Look up and type-check a property once.
    pub fn property<T: PropertyValue>(&self, name: &str) -> Result<PropertyHandle<T>, PropertyError> {
        let packed = self
            .offsets
            .get(name)
            .ok_or_else(|| PropertyError::Unknown {
                material: self.name.clone(),
                name: name.to_string(),
            })?;
        if packed.ty != T::TYPE {
            return Err(PropertyError::TypeMismatch {
                name: name.to_string(),
                expected: T::TYPE,
                actual: packed.ty,
            });
        }
        Ok(PropertyHandle {
            offset: packed.offset,
            _marker: PhantomData,
        })
    }

    pub fn set<T: PropertyValue>(&mut self, handle: PropertyHandle<T>, value: T) {
        let bytes = bytemuck::bytes_of(&value);
        self.data[handle.offset..handle.offset + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
    }

    pub fn get<T: PropertyValue>(&self, handle: PropertyHandle<T>) -> T {
        let size = std::mem::size_of::<T>();
        bytemuck::pod_read_unaligned(&self.data[handle.offset..handle.offset + size])
    }

    fn checked<T: PropertyValue>(&self, name: &str) -> PropertyHandle<T> {
        match self.property(name) {
            Ok(handle) => handle,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn set_scalar(&mut self, name: &str, value: f32) {
        self.set(self.checked(name), value);
    }

    pub fn set_vector2(&mut self, name: &str, value: Vec2) {
        self.set(self.checked(name), value);
    }

    pub fn set_vector3(&mut self, name: &str, value: Vec3) {
        self.set(self.checked(name), value);
    }

    pub fn set_vector4(&mut self, name: &str, value: Vec4) {
        self.set(self.checked(name), value);
    }

    pub fn set_matrix(&mut self, name: &str, value: Mat4) {
        self.set(self.checked(name), value);
    }

    pub fn scalar(&self, name: &str) -> f32 {
        self.get(self.checked(name))
    }

    pub fn vector2(&self, name: &str) -> Vec2 {
        self.get(self.checked(name))
    }

    pub fn vector3(&self, name: &str) -> Vec3 {
        self.get(self.checked(name))
    }

    pub fn vector4(&self, name: &str) -> Vec4 {
        self.get(self.checked(name))
    }

    pub fn matrix(&self, name: &str) -> Mat4 {
        self.get(self.checked(name))
    }

    /// Replace the texture in a declared texture slot.
    pub fn set_texture(&mut self, name: &str, texture: TextureId) {
        match self.textures.get_mut(name) {
            Some(binding) => binding.texture = texture,
            None => panic!("material `{}` has no texture `{}`", self.name, name),
        }
    }

    pub fn set_sampler(&mut self, name: &str, sampler: SamplerId) {
        match self.samplers.get_mut(name) {
            Some(binding) => binding.sampler = sampler,
            None => panic!("material `{}` has no sampler `{}`", self.name, name),
        }
    }

    pub fn texture(&self, name: &str) -> Option<TextureId> {
        self.textures.get(name).map(|b| b.texture)
    }

    pub fn texture_bindings(&self) -> impl Iterator<Item = (&str, TextureBinding)> {
        self.textures.iter().map(|(name, b)| (name.as_str(), *b))
    }

    pub fn sampler_bindings(&self) -> impl Iterator<Item = (&str, SamplerBinding)> {
        self.samplers.iter().map(|(name, b)| (name.as_str(), *b))
    }

    /// Flush pending constant changes. Returns whether an upload happened.
    pub fn update_gpu_buffers(&mut self, device: &mut dyn Device) -> Result<bool, DeviceError> {
        if !self.dirty {
            return Ok(false);
        }
        let uploaded = match self.buffer {
            Some(buffer) => {
                device.update_buffer(buffer, &self.data, self.frequency.upload_mode())?;
                log::trace!("material `{}`: uploaded {} bytes", self.name, self.data.len());
                true
            }
            None => false,
        };
        self.dirty = false;
        Ok(uploaded)
    }

    pub fn release(&mut self, device: &mut dyn Device) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy(buffer.raw());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderSource;
    use beacon_rhi::{DeviceCall, NullDevice};

    const SOURCE: &str = r#"/*
@be-shader:
(
    topology: "triangle-list",
    vertex: "vs_main",
    pixel: "fs_main",
    targets: { "color": 0 },
    material: "surface",
)
@be-end

@be-material:surface
{
    "roughness": "float = 0.5",
    "offset": "float3",
    "transform": "matrix",
    "albedo_map": "texture2d(0)",
    "normal_map": "texture2d(1) = flat_normal",
    "linear": "sampler(0)",
}
@be-end

@be-material:maps_only
{
    "map": "texture2d(0) = black",
}
@be-end
*/"#;

    const MAPS_ONLY: &str = r#"/*
@be-shader:
(topology: "triangle-list", vertex: "vs_main", pixel: "fs_main", targets: { "color": 0 }, material: "maps_only")
@be-end
*/"#;

    const NO_SCHEME: &str = r#"/*
@be-shader:
(topology: "triangle-list", vertex: "vs_main")
@be-end
*/"#;

    fn setup() -> (NullDevice, Registry) {
        let mut device = NullDevice::default();
        let mut registry = Registry::with_defaults(&mut device).unwrap();
        registry
            .load_shaders(
                &mut device,
                &[
                    ShaderSource::new("surface", SOURCE),
                    ShaderSource::new("maps", MAPS_ONLY),
                    ShaderSource::new("bare", NO_SCHEME),
                ],
            )
            .unwrap();
        (device, registry)
    }

    fn uploads(device: &NullDevice) -> usize {
        device.count(|c| matches!(c, DeviceCall::UpdateBuffer { .. }))
    }

    #[test]
    fn new_material_holds_defaults_and_is_clean() {
        let (mut device, registry) = setup();
        let material =
            Material::new(&mut device, &registry, "m", "surface", UpdateFrequency::Static).unwrap();
        assert!(!material.is_dirty());
        assert_eq!(material.scalar("roughness"), 0.5);
        assert_eq!(material.vector3("offset"), Vec3::ZERO);
        assert_eq!(material.matrix("transform"), Mat4::IDENTITY);
        assert!(!material.is_dirty());

        let buffer = material.buffer().unwrap();
        assert_eq!(device.buffer_contents(buffer).unwrap(), material.data());
        assert_eq!(
            material.texture("albedo_map"),
            Some(registry.texture("white").unwrap().id())
        );
        assert_eq!(
            material.texture("normal_map"),
            Some(registry.texture("flat_normal").unwrap().id())
        );
    }

    #[test]
    fn set_marks_dirty_and_uploads_once() {
        let (mut device, registry) = setup();
        let mut material =
            Material::new(&mut device, &registry, "m", "surface", UpdateFrequency::Static).unwrap();
        material.set_scalar("roughness", 0.25);
        assert!(material.is_dirty());
        assert_eq!(material.scalar("roughness"), 0.25);

        let before = uploads(&device);
        assert!(material.update_gpu_buffers(&mut device).unwrap());
        assert!(!material.update_gpu_buffers(&mut device).unwrap());
        assert_eq!(uploads(&device), before + 1);
        assert!(!material.is_dirty());

        let buffer = material.buffer().unwrap();
        let floats: &[f32] = bytemuck::cast_slice(device.buffer_contents(buffer).unwrap());
        assert_eq!(floats[0], 0.25);
    }

    #[test]
    fn frequent_materials_discard() {
        let (mut device, registry) = setup();
        let mut material =
            Material::new(&mut device, &registry, "m", "surface", UpdateFrequency::Frequent)
                .unwrap();
        material.set_vector3("offset", Vec3::new(1.0, 2.0, 3.0));
        material.update_gpu_buffers(&mut device).unwrap();
        assert!(device
            .calls()
            .iter()
            .any(|c| matches!(c, DeviceCall::UpdateBuffer { mode: UploadMode::Discard, .. })));
    }

    #[test]
    fn handles_are_validated_once() {
        let (mut device, registry) = setup();
        let mut material =
            Material::new(&mut device, &registry, "m", "surface", UpdateFrequency::Static).unwrap();
        let handle = material.property::<Mat4>("transform").unwrap();
        material.set(handle, Mat4::from_scale(Vec3::splat(2.0)));
        assert_eq!(material.get(handle).x_axis.x, 2.0);
        assert_eq!(handle.offset(), 16);

        assert!(matches!(
            material.property::<f32>("transform"),
            Err(PropertyError::TypeMismatch { .. })
        ));
        assert!(matches!(
            material.property::<f32>("metalness"),
            Err(PropertyError::Unknown { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "metalness")]
    fn unknown_name_is_a_contract_violation() {
        let (mut device, registry) = setup();
        let mut material =
            Material::new(&mut device, &registry, "m", "surface", UpdateFrequency::Static).unwrap();
        material.set_scalar("metalness", 1.0);
    }

    #[test]
    fn maps_only_material_has_no_buffer() {
        let (mut device, registry) = setup();
        let created = device.count(|c| matches!(c, DeviceCall::CreateBuffer { .. }));
        let mut material =
            Material::new(&mut device, &registry, "m", "maps", UpdateFrequency::Static).unwrap();
        assert_eq!(material.buffer(), None);
        assert_eq!(
            device.count(|c| matches!(c, DeviceCall::CreateBuffer { .. })),
            created
        );
        let white = registry.texture("white").unwrap().id();
        material.set_texture("map", white);
        assert_eq!(material.texture("map"), Some(white));
        assert!(!material.update_gpu_buffers(&mut device).unwrap());
    }

    #[test]
    fn shader_without_scheme_is_rejected() {
        let (mut device, registry) = setup();
        let err = Material::new(&mut device, &registry, "m", "bare", UpdateFrequency::Static)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::RenderError::Configuration(ConfigurationError::NoMaterialScheme { .. })
        ));
    }
}
