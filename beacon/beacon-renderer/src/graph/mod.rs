//! Render pass interface and the ordered pass list the renderer drives.

use beacon_rhi::{BufferId, Device, RenderTarget, StageMask};

use crate::binder::{BindingState, PipelineBinder, FRAME_SLOT};
use crate::config::BeaconConfig;
use crate::error::{ConfigurationError, Result};
use crate::frame::FrameData;
use crate::material::MaterialHandle;
use crate::registry::Registry;
use crate::resources::Mesh;
use crate::shader::Shader;

/// What a pass may touch while it initialises: it may register textures and materials.
pub struct InitContext<'a> {
    pub device: &'a mut dyn Device,
    pub registry: &'a mut Registry,
    pub config: &'a BeaconConfig,
}

/// What a pass may touch while it renders one frame.
pub struct FrameContext<'a> {
    pub device: &'a mut dyn Device,
    pub binder: &'a mut PipelineBinder,
    pub registry: &'a Registry,
    pub config: &'a BeaconConfig,
    pub frame: &'a FrameData,
    /// Buffer holding this frame's [`FrameUniform`](crate::frame::FrameUniform).
    pub frame_constants: BufferId,
}

impl FrameContext<'_> {
    /// Attach the frame constants on every stage the bound shader runs.
    pub fn bind_frame_constants(&mut self) -> Result<()> {
        let stages = self.binder.bound_stages();
        self.binder
            .bind_constant_buffer(self.device, stages, FRAME_SLOT, self.frame_constants)
    }

    /// One full-screen triangle with the material's shader, then back to idle.
    pub fn draw_fullscreen(&mut self, material: &MaterialHandle) -> Result<()> {
        let shader = material.borrow().shader().clone();
        self.binder
            .bind_shader(self.device, &shader, StageMask::all())?;
        self.bind_frame_constants()?;
        self.binder.bind_material(self.device, material)?;
        self.device.draw(3)?;
        self.binder.clear(self.device)?;
        Ok(())
    }
}

/// Mesh vertex streams must match what the shader's vertex stage declares.
pub fn check_vertex_layout(shader: &Shader, mesh: &Mesh) -> Result<()> {
    if shader.vertex_layout() != mesh.layout() {
        return Err(ConfigurationError::VertexLayoutMismatch {
            mesh: mesh.name().to_string(),
            shader: shader.name().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Color attachments in the shader's slot order, looked up by target name in `provided`.
pub fn color_targets(
    shader: &Shader,
    pass: &str,
    provided: &[(&str, RenderTarget)],
) -> Result<Vec<RenderTarget>> {
    let mut colors = Vec::with_capacity(shader.descriptor().targets.len());
    for (slot, name) in shader.descriptor().targets.iter() {
        let target = provided
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
            .filter(|_| slot as usize == colors.len())
            .ok_or_else(|| ConfigurationError::UnknownRenderTarget {
                shader: shader.name().to_string(),
                target: name.to_string(),
                pass: pass.to_string(),
            })?;
        colors.push(target);
    }
    Ok(colors)
}

/// State a pass built in `initialise`; rendering without it is a contract violation.
pub fn initialised<'s, T>(state: &'s mut Option<T>, pass: &str) -> &'s mut T {
    match state {
        Some(state) => state,
        None => panic!("pass `{pass}` rendered before initialise"),
    }
}

/// One stage of the frame. Passes run in registration order, each owning the device until it
/// returns, and must leave the binder idle.
pub trait RenderPass {
    fn name(&self) -> &str;

    /// Create targets, buffers and pass materials. Called exactly once.
    fn initialise(&mut self, ctx: &mut InitContext<'_>) -> Result<()>;

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<()>;

    /// Destroy device objects the pass owns outside the registry.
    fn release(&mut self, _device: &mut dyn Device) {}
}

struct PassSlot {
    pass: Box<dyn RenderPass>,
    initialised: bool,
}

/// Ordered pass list with per-pass lifecycle flags.
#[derive(Default)]
pub struct PassGraph {
    slots: Vec<PassSlot>,
}

impl std::fmt::Debug for PassGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl PassGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pass: Box<dyn RenderPass>) {
        log::debug!("pass graph: add `{}`", pass.name());
        self.slots.push(PassSlot {
            pass,
            initialised: false,
        });
    }

    /// Initialise every pass that has not been initialised yet, in order.
    pub fn initialise_all(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        for slot in self.slots.iter_mut().filter(|s| !s.initialised) {
            log::debug!("initialise pass `{}`", slot.pass.name());
            slot.pass.initialise(ctx)?;
            slot.initialised = true;
        }
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        self.slots.iter().all(|s| s.initialised)
    }

    /// Render every pass once, in registration order.
    pub fn render_all(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        for slot in &mut self.slots {
            assert!(
                slot.initialised,
                "pass `{}` rendered before initialise",
                slot.pass.name()
            );
            log::trace!("render pass `{}`", slot.pass.name());
            slot.pass.render(ctx)?;
            debug_assert_eq!(
                ctx.binder.state(),
                BindingState::Idle,
                "pass `{}` left the binder bound",
                slot.pass.name()
            );
        }
        Ok(())
    }

    pub fn release_all(&mut self, device: &mut dyn Device) {
        for slot in &mut self.slots {
            slot.pass.release(device);
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.pass.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_rhi::NullDevice;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Probe {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl RenderPass for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn initialise(&mut self, _ctx: &mut InitContext<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("init {}", self.name));
            Ok(())
        }

        fn render(&mut self, _ctx: &mut FrameContext<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("render {}", self.name));
            Ok(())
        }
    }

    fn graph(log: &Rc<RefCell<Vec<String>>>, names: &[&'static str]) -> PassGraph {
        let mut graph = PassGraph::new();
        for &name in names {
            graph.add(Box::new(Probe {
                name,
                log: log.clone(),
            }));
        }
        graph
    }

    #[test]
    fn initialise_runs_once_per_pass() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut graph = graph(&log, &["a", "b"]);
        let mut device = NullDevice::default();
        let mut registry = Registry::new();
        let config = BeaconConfig::default();
        let mut ctx = InitContext {
            device: &mut device,
            registry: &mut registry,
            config: &config,
        };
        graph.initialise_all(&mut ctx).unwrap();
        graph.initialise_all(&mut ctx).unwrap();
        assert!(graph.is_initialised());
        assert_eq!(*log.borrow(), vec!["init a", "init b"]);
        assert_eq!(graph.names(), vec!["a", "b"]);
    }

    #[test]
    #[should_panic(expected = "before initialise")]
    fn render_requires_initialise() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut graph = graph(&log, &["a"]);
        let mut device = NullDevice::default();
        let mut binder = PipelineBinder::new();
        let registry = Registry::new();
        let config = BeaconConfig::default();
        let frame = FrameData::default();
        let mut ctx = FrameContext {
            device: &mut device,
            binder: &mut binder,
            registry: &registry,
            config: &config,
            frame: &frame,
            frame_constants: BufferId(0),
        };
        let _ = graph.render_all(&mut ctx);
    }
}
