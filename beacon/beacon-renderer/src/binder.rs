//! Pipeline binder: shader before material, material buffer upload, and a per-stage rebind cache
//! that elides slot binds whose resource is already attached.
//!
//! The cache survives [`PipelineBinder::clear`]; only [`PipelineBinder::clear_cache`], called once
//! per frame by the renderer, forgets it.

use std::rc::Rc;

use beacon_rhi::{
    BufferId, Device, ResourceId, SamplerId, Stage, StageMask, TextureId, MAX_SLOTS,
};

use crate::error::Result;
use crate::material::MaterialHandle;
use crate::shader::Shader;

/// Constant-buffer slot holding [`FrameUniform`](crate::frame::FrameUniform).
pub const FRAME_SLOT: u32 = 0;
/// Constant-buffer slot holding [`ObjectUniform`](crate::frame::ObjectUniform).
pub const OBJECT_SLOT: u32 = 1;
/// Constant-buffer slot holding the bound material's properties.
pub const MATERIAL_SLOT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Idle,
    ShaderBound,
    MaterialBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ConstantBuffer,
    Texture,
    Sampler,
}

impl ResourceKind {
    fn index(self) -> usize {
        match self {
            ResourceKind::ConstantBuffer => 0,
            ResourceKind::Texture => 1,
            ResourceKind::Sampler => 2,
        }
    }
}

/// Last resource bound per (stage, kind, slot).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebindCache {
    slots: [[[Option<ResourceId>; MAX_SLOTS]; 3]; 3],
}

impl RebindCache {
    pub fn get(&self, stage: Stage, kind: ResourceKind, slot: u32) -> Option<ResourceId> {
        self.slots[stage.index()][kind.index()][slot as usize]
    }

    fn set(&mut self, stage: Stage, kind: ResourceKind, slot: u32, id: ResourceId) {
        self.slots[stage.index()][kind.index()][slot as usize] = Some(id);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Slot bind counters since the binder was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BindStats {
    pub issued: u64,
    pub elided: u64,
}

#[derive(Debug)]
pub struct PipelineBinder {
    shader: Option<Rc<Shader>>,
    stages: StageMask,
    material: Option<MaterialHandle>,
    cache: RebindCache,
    stats: BindStats,
}

impl Default for PipelineBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBinder {
    pub fn new() -> Self {
        Self {
            shader: None,
            stages: StageMask::empty(),
            material: None,
            cache: RebindCache::default(),
            stats: BindStats::default(),
        }
    }

    pub fn state(&self) -> BindingState {
        match (&self.shader, &self.material) {
            (None, _) => BindingState::Idle,
            (Some(_), None) => BindingState::ShaderBound,
            (Some(_), Some(_)) => BindingState::MaterialBound,
        }
    }

    pub fn bound_stages(&self) -> StageMask {
        self.stages
    }

    pub fn bound_shader(&self) -> Option<&Rc<Shader>> {
        self.shader.as_ref()
    }

    pub fn stats(&self) -> BindStats {
        self.stats
    }

    pub fn cache(&self) -> &RebindCache {
        &self.cache
    }

    /// Bind `shader` for `requested ∩ shader stages` and set its topology.
    ///
    /// Panics if a shader is already bound; call [`clear`](Self::clear) first.
    pub fn bind_shader(
        &mut self,
        device: &mut dyn Device,
        shader: &Rc<Shader>,
        requested: StageMask,
    ) -> Result<StageMask> {
        if let Some(bound) = &self.shader {
            panic!(
                "bind_shader(`{}`) while `{}` is still bound",
                shader.name(),
                bound.name()
            );
        }
        let stages = shader.stages() & requested;
        assert!(
            !stages.is_empty(),
            "shader `{}` has none of the requested stages {:?}",
            shader.name(),
            requested
        );
        device.set_program(Some(shader.program()), stages)?;
        device.set_topology(Some(shader.topology()))?;
        log::trace!("bind shader `{}` {:?}", shader.name(), stages);
        self.shader = Some(shader.clone());
        self.stages = stages;
        Ok(stages)
    }

    /// Upload the material's pending constants and attach its buffer, textures and samplers on
    /// every bound stage.
    ///
    /// Panics when no shader is bound or the shader reads a different scheme.
    pub fn bind_material(&mut self, device: &mut dyn Device, material: &MaterialHandle) -> Result<()> {
        let Some(shader) = &self.shader else {
            panic!(
                "bind_material(`{}`) with no shader bound",
                material.borrow().name()
            );
        };
        let mut guard = material.borrow_mut();
        assert_eq!(
            shader.material_scheme(),
            Some(guard.scheme().name()),
            "material `{}` is not compatible with shader `{}`",
            guard.name(),
            shader.name()
        );
        guard.update_gpu_buffers(device)?;
        let stages = self.stages;
        if let Some(buffer) = guard.buffer() {
            self.bind_constant_buffer(device, stages, MATERIAL_SLOT, buffer)?;
        }
        for (_, binding) in guard.texture_bindings() {
            self.bind_texture(device, stages, binding.slot, binding.texture)?;
        }
        for (_, binding) in guard.sampler_bindings() {
            self.bind_sampler(device, stages, binding.slot, binding.sampler)?;
        }
        drop(guard);
        self.material = Some(material.clone());
        Ok(())
    }

    pub fn bind_constant_buffer(
        &mut self,
        device: &mut dyn Device,
        stages: StageMask,
        slot: u32,
        buffer: BufferId,
    ) -> Result<()> {
        for stage in stages.stages() {
            if self.needs_bind(stage, ResourceKind::ConstantBuffer, slot, buffer.raw()) {
                device.bind_constant_buffer(stage, slot, Some(buffer))?;
                self.record(stage, ResourceKind::ConstantBuffer, slot, buffer.raw());
            }
        }
        Ok(())
    }

    pub fn bind_texture(
        &mut self,
        device: &mut dyn Device,
        stages: StageMask,
        slot: u32,
        texture: TextureId,
    ) -> Result<()> {
        for stage in stages.stages() {
            if self.needs_bind(stage, ResourceKind::Texture, slot, texture.raw()) {
                device.bind_texture(stage, slot, Some(texture))?;
                self.record(stage, ResourceKind::Texture, slot, texture.raw());
            }
        }
        Ok(())
    }

    pub fn bind_sampler(
        &mut self,
        device: &mut dyn Device,
        stages: StageMask,
        slot: u32,
        sampler: SamplerId,
    ) -> Result<()> {
        for stage in stages.stages() {
            if self.needs_bind(stage, ResourceKind::Sampler, slot, sampler.raw()) {
                device.bind_sampler(stage, slot, Some(sampler))?;
                self.record(stage, ResourceKind::Sampler, slot, sampler.raw());
            }
        }
        Ok(())
    }

    /// False when `id` is already attached there; the skip is counted.
    fn needs_bind(&mut self, stage: Stage, kind: ResourceKind, slot: u32, id: ResourceId) -> bool {
        assert!(
            (slot as usize) < MAX_SLOTS,
            "{kind:?} slot {slot} out of range"
        );
        if self.cache.get(stage, kind, slot) == Some(id) {
            self.stats.elided += 1;
            log::trace!("elide {kind:?} {id} at {stage:?}[{slot}]");
            return false;
        }
        true
    }

    /// Cache a bind the device accepted.
    fn record(&mut self, stage: Stage, kind: ResourceKind, slot: u32, id: ResourceId) {
        self.cache.set(stage, kind, slot, id);
        self.stats.issued += 1;
    }

    /// Unbind program and topology and forget the material. The rebind cache is kept.
    pub fn clear(&mut self, device: &mut dyn Device) -> Result<()> {
        if self.shader.is_none() {
            return Ok(());
        }
        device.set_program(None, StageMask::empty())?;
        device.set_topology(None)?;
        self.shader = None;
        self.material = None;
        self.stages = StageMask::empty();
        Ok(())
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Material, UpdateFrequency};
    use crate::registry::Registry;
    use crate::shader::ShaderSource;
    use beacon_rhi::{DeviceCall, NullDevice};

    const SOURCE: &str = r#"/*
@be-shader:
(
    topology: "triangle-list",
    vertex: "vs_main",
    pixel: "fs_main",
    targets: { "color": 0 },
    material: "tinted",
)
@be-end
@be-material:tinted
{
    "tint": "float4 = 1",
    "map": "texture2d(0)",
    "detail": "texture2d(3) = black",
    "smp": "sampler(0) = linear-clamp",
}
@be-end
@be-material:other
{
    "x": "float",
}
@be-end
*/"#;

    const OTHER: &str = r#"/*
@be-shader:
(topology: "triangle-strip", vertex: "vs_main", material: "other")
@be-end
*/"#;

    struct Fixture {
        device: NullDevice,
        registry: Registry,
        binder: PipelineBinder,
    }

    impl Fixture {
        fn new() -> Self {
            let mut device = NullDevice::default();
            let mut registry = Registry::with_defaults(&mut device).unwrap();
            registry
                .load_shaders(
                    &mut device,
                    &[ShaderSource::new("tinted", SOURCE), ShaderSource::new("other", OTHER)],
                )
                .unwrap();
            Self {
                device,
                registry,
                binder: PipelineBinder::new(),
            }
        }

        fn material(&mut self, shader: &str) -> MaterialHandle {
            Material::new(&mut self.device, &self.registry, "m", shader, UpdateFrequency::Static)
                .unwrap()
                .into_handle()
        }

        fn slot_binds(&self) -> usize {
            self.device.count(DeviceCall::is_slot_bind)
        }
    }

    #[test]
    fn bind_shader_intersects_stages_and_sets_topology() {
        let mut fx = Fixture::new();
        let shader = fx.registry.shader("tinted").unwrap();
        let stages = fx
            .binder
            .bind_shader(&mut fx.device, &shader, StageMask::VERTEX | StageMask::TESSELLATION)
            .unwrap();
        assert_eq!(stages, StageMask::VERTEX);
        assert_eq!(fx.binder.state(), BindingState::ShaderBound);
        assert_eq!(fx.device.bound_program(), Some(shader.program()));
        assert!(fx
            .device
            .calls()
            .contains(&DeviceCall::SetTopology(Some(shader.topology()))));
    }

    #[test]
    fn second_bind_material_is_elided() {
        let mut fx = Fixture::new();
        let shader = fx.registry.shader("tinted").unwrap();
        let material = fx.material("tinted");
        fx.binder
            .bind_shader(&mut fx.device, &shader, StageMask::all())
            .unwrap();
        fx.binder.bind_material(&mut fx.device, &material).unwrap();
        assert_eq!(fx.binder.state(), BindingState::MaterialBound);
        // buffer + 2 textures + 1 sampler, on vertex and pixel
        assert_eq!(fx.slot_binds(), 8);

        fx.binder.bind_material(&mut fx.device, &material).unwrap();
        assert_eq!(fx.slot_binds(), 8);
        assert_eq!(fx.binder.stats().elided, 8);
        assert_eq!(
            fx.device.bound_constant_buffer(Stage::Pixel, MATERIAL_SLOT),
            material.borrow().buffer()
        );
        assert_eq!(
            fx.device.bound_texture(Stage::Vertex, 3),
            Some(fx.registry.texture("black").unwrap().id())
        );
    }

    #[test]
    fn cache_survives_clear_but_not_clear_cache() {
        let mut fx = Fixture::new();
        let shader = fx.registry.shader("tinted").unwrap();
        let material = fx.material("tinted");
        for _ in 0..2 {
            fx.binder
                .bind_shader(&mut fx.device, &shader, StageMask::all())
                .unwrap();
            fx.binder.bind_material(&mut fx.device, &material).unwrap();
            fx.binder.clear(&mut fx.device).unwrap();
        }
        assert_eq!(fx.binder.state(), BindingState::Idle);
        assert_eq!(fx.slot_binds(), 8);

        fx.binder.clear_cache();
        fx.binder
            .bind_shader(&mut fx.device, &shader, StageMask::all())
            .unwrap();
        fx.binder.bind_material(&mut fx.device, &material).unwrap();
        assert_eq!(fx.slot_binds(), 16);
    }

    #[test]
    fn changed_texture_is_rebound() {
        let mut fx = Fixture::new();
        let shader = fx.registry.shader("tinted").unwrap();
        let material = fx.material("tinted");
        fx.binder
            .bind_shader(&mut fx.device, &shader, StageMask::PIXEL)
            .unwrap();
        fx.binder.bind_material(&mut fx.device, &material).unwrap();
        let before = fx.slot_binds();
        let black = fx.registry.texture("black").unwrap().id();
        material.borrow_mut().set_texture("map", black);
        fx.binder.bind_material(&mut fx.device, &material).unwrap();
        assert_eq!(fx.slot_binds(), before + 1);
        assert_eq!(fx.device.bound_texture(Stage::Pixel, 0), Some(black));
    }

    #[test]
    fn failed_bind_is_not_cached() {
        let mut fx = Fixture::new();
        let stale = TextureId(u64::MAX);
        assert!(fx
            .binder
            .bind_texture(&mut fx.device, StageMask::PIXEL, 0, stale)
            .is_err());
        assert_eq!(fx.binder.cache().get(Stage::Pixel, ResourceKind::Texture, 0), None);
        assert_eq!(fx.binder.stats(), BindStats::default());

        let white = fx.registry.texture("white").unwrap().id();
        fx.binder
            .bind_texture(&mut fx.device, StageMask::PIXEL, 0, white)
            .unwrap();
        assert_eq!(
            fx.binder.cache().get(Stage::Pixel, ResourceKind::Texture, 0),
            Some(white.raw())
        );
        assert_eq!(fx.binder.stats().issued, 1);
    }

    #[test]
    fn dirty_material_uploads_on_bind() {
        let mut fx = Fixture::new();
        let shader = fx.registry.shader("tinted").unwrap();
        let material = fx.material("tinted");
        material
            .borrow_mut()
            .set_vector4("tint", glam::Vec4::new(0.5, 0.5, 0.5, 1.0));
        fx.binder
            .bind_shader(&mut fx.device, &shader, StageMask::all())
            .unwrap();
        fx.binder.bind_material(&mut fx.device, &material).unwrap();
        fx.binder.bind_material(&mut fx.device, &material).unwrap();
        assert_eq!(
            fx.device
                .count(|c| matches!(c, DeviceCall::UpdateBuffer { .. })),
            1
        );
        assert!(!material.borrow().is_dirty());
    }

    #[test]
    #[should_panic(expected = "no shader bound")]
    fn material_before_shader_panics() {
        let mut fx = Fixture::new();
        let material = fx.material("tinted");
        let _ = fx.binder.bind_material(&mut fx.device, &material);
    }

    #[test]
    #[should_panic(expected = "still bound")]
    fn shader_rebind_without_clear_panics() {
        let mut fx = Fixture::new();
        let shader = fx.registry.shader("tinted").unwrap();
        fx.binder
            .bind_shader(&mut fx.device, &shader, StageMask::all())
            .unwrap();
        let _ = fx.binder.bind_shader(&mut fx.device, &shader, StageMask::all());
    }

    #[test]
    #[should_panic(expected = "not compatible")]
    fn incompatible_material_panics() {
        let mut fx = Fixture::new();
        let shader = fx.registry.shader("tinted").unwrap();
        let material = fx.material("other");
        fx.binder
            .bind_shader(&mut fx.device, &shader, StageMask::all())
            .unwrap();
        let _ = fx.binder.bind_material(&mut fx.device, &material);
    }

    #[test]
    fn clear_unbinds_program_and_topology() {
        let mut fx = Fixture::new();
        let shader = fx.registry.shader("other").unwrap();
        fx.binder
            .bind_shader(&mut fx.device, &shader, StageMask::all())
            .unwrap();
        fx.binder.clear(&mut fx.device).unwrap();
        assert_eq!(fx.device.bound_program(), None);
        assert_eq!(fx.binder.bound_stages(), StageMask::empty());
        let tail = &fx.device.calls()[fx.device.calls().len() - 2..];
        assert_eq!(
            tail,
            &[
                DeviceCall::SetProgram {
                    program: None,
                    stages: StageMask::empty()
                },
                DeviceCall::SetTopology(None),
            ]
        );
    }
}
