//! Beacon Renderer: shader/material metadata, material property layout, a pipeline binder with
//! rebind elision, and the deferred Shadow → Geometry → Lighting → Bloom → Composer sequence on
//! top of the `beacon-rhi` device interface.

pub mod binder;
pub mod bloom;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod gbuffer;
pub mod graph;
pub mod light_pass;
pub mod material;
pub mod present;
pub mod registry;
pub mod resources;
pub mod scheme;
pub mod shader;
pub mod shadows;

pub use binder::{BindingState, PipelineBinder, FRAME_SLOT, MATERIAL_SLOT, OBJECT_SLOT};
pub use bloom::BloomPass;
pub use config::{BeaconConfig, ToneMapping};
pub use error::{ConfigurationError, ParseError, PropertyError, RenderError, Result};
pub use frame::{DrawSubmission, FrameData, FrameUniform, ObjectUniform};
pub use gbuffer::GeometryPass;
pub use graph::{FrameContext, InitContext, PassGraph, RenderPass};
pub use light_pass::LightingPass;
pub use material::{Material, MaterialHandle, PropertyHandle, UpdateFrequency};
pub use present::ComposerPass;
pub use registry::Registry;
pub use resources::{Mesh, Texture};
pub use scheme::{MaterialScheme, PropertyType};
pub use shader::{Shader, ShaderSource};
pub use shadows::ShadowPass;

use std::rc::Rc;

use beacon_rhi::{
    BufferAccess, BufferDescriptor, BufferId, BufferUsage, Device, TextureDescriptor,
    TextureFormat, TextureUsage, UploadMode, VertexSemantic,
};
use render_api::{ExtractedDraws, ExtractedView};

/// Owns the device, the registry and the pass sequence, and drives one frame at a time.
pub struct Renderer {
    device: Box<dyn Device>,
    registry: Registry,
    binder: PipelineBinder,
    config: BeaconConfig,
    passes: PassGraph,
    frame_constants: BufferId,
    frame_index: u64,
}

impl Renderer {
    /// Renderer with no passes. Add them with [`add_pass`](Self::add_pass), then call
    /// [`initialise`](Self::initialise).
    pub fn new(mut device: Box<dyn Device>, registry: Registry, config: BeaconConfig) -> Result<Self> {
        let frame_constants = device.create_buffer(
            &BufferDescriptor {
                label: Some("frame constants".into()),
                size: std::mem::size_of::<FrameUniform>() as u64,
                usage: BufferUsage::CONSTANT,
                access: BufferAccess::Dynamic,
            },
            None,
        )?;
        Ok(Self {
            device,
            registry,
            binder: PipelineBinder::new(),
            config,
            passes: PassGraph::new(),
            frame_constants,
            frame_index: 0,
        })
    }

    /// Default textures, the configured shader set and the five standard passes, initialised.
    pub fn with_default_passes(mut device: Box<dyn Device>, config: BeaconConfig) -> Result<Self> {
        let mut registry = Registry::with_defaults(device.as_mut())?;
        let sources = shader::load_sources(&config)?;
        registry.load_shaders(device.as_mut(), &sources)?;
        log::info!(
            "beacon: {} shaders, {} material schemes, {}x{}",
            registry.shader_names().len(),
            registry.scheme_names().len(),
            config.width,
            config.height
        );

        let mut renderer = Self::new(device, registry, config)?;
        renderer.add_pass(Box::new(ShadowPass::new()));
        renderer.add_pass(Box::new(GeometryPass::new()));
        renderer.add_pass(Box::new(LightingPass::new()));
        renderer.add_pass(Box::new(BloomPass::new()));
        renderer.add_pass(Box::new(ComposerPass::new()));
        renderer.initialise()?;
        Ok(renderer)
    }

    pub fn add_pass(&mut self, pass: Box<dyn RenderPass>) {
        self.passes.add(pass);
    }

    /// Initialise every pass added since the last call.
    pub fn initialise(&mut self) -> Result<()> {
        self.passes.initialise_all(&mut InitContext {
            device: self.device.as_mut(),
            registry: &mut self.registry,
            config: &self.config,
        })
    }

    /// Render every pass once in order.
    ///
    /// Panics if a pass was added but not initialised.
    pub fn render_frame(&mut self, frame: &FrameData) -> Result<()> {
        assert!(
            self.passes.is_initialised(),
            "render_frame called before initialise"
        );
        self.device.begin_frame()?;
        let uniform = FrameUniform::from_view(&frame.view, &self.config);
        self.device.update_buffer(
            self.frame_constants,
            bytemuck::bytes_of(&uniform),
            UploadMode::Discard,
        )?;
        self.passes.render_all(&mut FrameContext {
            device: self.device.as_mut(),
            binder: &mut self.binder,
            registry: &self.registry,
            config: &self.config,
            frame,
            frame_constants: self.frame_constants,
        })?;
        // Slot state is not assumed to survive the frame boundary.
        self.binder.clear_cache();
        self.device.end_frame()?;
        log::trace!(
            "frame {}: {} draws, binds {:?}",
            self.frame_index,
            frame.draws.len(),
            self.binder.stats()
        );
        self.frame_index += 1;
        Ok(())
    }

    /// Resolve extracted names against the registry.
    pub fn resolve_frame(&self, draws: &ExtractedDraws, view: &ExtractedView) -> Result<FrameData> {
        FrameData::resolve(&self.registry, draws, view)
    }

    /// New material drawn with `shader`, registered under `name`.
    pub fn create_material(
        &mut self,
        name: &str,
        shader: &str,
        frequency: UpdateFrequency,
    ) -> Result<MaterialHandle> {
        let material =
            Material::new(self.device.as_mut(), &self.registry, name, shader, frequency)?;
        let handle = material.into_handle();
        self.registry.insert_material(name, handle.clone())?;
        Ok(handle)
    }

    pub fn create_mesh(
        &mut self,
        name: &str,
        vertices: &[u8],
        layout: &[VertexSemantic],
        indices: &[u32],
    ) -> Result<Rc<Mesh>> {
        let mesh = Mesh::new(self.device.as_mut(), name, vertices, layout, indices)?;
        self.registry.insert_mesh(mesh)
    }

    /// RGBA8 texture registered under `name`, usable as a material texture or bloom dirt.
    pub fn create_texture(&mut self, name: &str, size: (u32, u32), rgba: &[u8]) -> Result<()> {
        let desc = TextureDescriptor {
            label: Some(name.to_string()),
            size,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        };
        let texture = Texture::create(self.device.as_mut(), name, &desc, Some(rgba))?;
        self.registry.insert_texture(texture)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn Device {
        self.device.as_mut()
    }

    pub fn binder(&self) -> &PipelineBinder {
        &self.binder
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.names()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Destroy pass buffers, every registry resource and the frame constants.
    pub fn release(&mut self) {
        self.passes.release_all(self.device.as_mut());
        self.registry.release(self.device.as_mut());
        self.device.destroy(self.frame_constants.raw());
    }
}
