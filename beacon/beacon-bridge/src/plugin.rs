//! Beacon plugin: implements RenderBackend for the host on top of a wgpu-backed Renderer.

use beacon_renderer::{BeaconConfig, RenderError, Renderer};
use render_api::{ExtractedDraws, ExtractedView, RenderBackend};

use crate::wgpu_device::WgpuDevice;

/// Owns the Beacon renderer (and through it the wgpu device). Draws handed to
/// [`prepare`](RenderBackend::prepare) are resolved against the registry at render time.
pub struct BeaconPlugin {
    renderer: Renderer,
    draws: ExtractedDraws,
}

impl BeaconPlugin {
    /// Create with wgpu device and queue (default config).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, String> {
        Self::new_with_config(device, queue, BeaconConfig::default())
    }

    /// Create with config. The offscreen backbuffer takes the configured render size.
    pub fn new_with_config(
        device: wgpu::Device,
        queue: wgpu::Queue,
        config: BeaconConfig,
    ) -> Result<Self, String> {
        let device =
            WgpuDevice::new(device, queue, config.width, config.height).map_err(|e| e.to_string())?;
        Self::from_device(device, config).map_err(|e| e.to_string())
    }

    /// Standard five-pass renderer over an existing device.
    pub fn from_device(device: WgpuDevice, config: BeaconConfig) -> Result<Self, RenderError> {
        let renderer = Renderer::with_default_passes(Box::new(device), config)?;
        Ok(Self {
            renderer,
            draws: ExtractedDraws::default(),
        })
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Meshes, materials and textures are created through the renderer.
    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn wgpu_device(&self) -> &WgpuDevice {
        self.renderer
            .device()
            .as_any()
            .downcast_ref::<WgpuDevice>()
            .unwrap_or_else(|| unreachable!("BeaconPlugin always renders on a WgpuDevice"))
    }

    pub fn wgpu_device_mut(&mut self) -> &mut WgpuDevice {
        self.renderer
            .device_mut()
            .as_any_mut()
            .downcast_mut::<WgpuDevice>()
            .unwrap_or_else(|| unreachable!("BeaconPlugin always renders on a WgpuDevice"))
    }

    fn render(&mut self, view: &ExtractedView) -> Result<(), RenderError> {
        let frame = self.renderer.resolve_frame(&self.draws, view)?;
        self.renderer.render_frame(&frame)
    }
}

impl RenderBackend for BeaconPlugin {
    fn prepare(&mut self, extracted: &ExtractedDraws) {
        self.draws = extracted.clone();
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        self.render(view).map_err(|e| e.to_string())
    }
}

impl Drop for BeaconPlugin {
    fn drop(&mut self) {
        self.renderer.release();
    }
}
