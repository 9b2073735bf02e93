//! Window-capable backend: created from a window, implements RenderBackendWindow.

use beacon_renderer::BeaconConfig;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{ExtractedDraws, ExtractedView, RenderBackend, RenderBackendWindow};
use wgpu::SurfaceTargetUnsafe;

use crate::plugin::BeaconPlugin;
use crate::wgpu_device::WgpuDevice;

/// Backend that owns the wgpu Instance and a BeaconPlugin; can present to a window.
/// Created via `BeaconWindowBackend::from_window(window, config)`; each frame use
/// `render_frame_to_window(view, raw_window_handle, raw_display_handle)`.
/// The surface is recreated each frame, so the host only has to keep the window alive.
pub struct BeaconWindowBackend {
    instance: wgpu::Instance,
    plugin: BeaconPlugin,
    surface_format: wgpu::TextureFormat,
}

impl BeaconWindowBackend {
    /// Create a window-capable backend from a window (e.g. winit). The window is only used to get
    /// raw handles and to create an initial surface for adapter and format selection.
    pub fn from_window(
        window: &(impl HasWindowHandle + HasDisplayHandle),
        config: BeaconConfig,
    ) -> Result<Self, String> {
        let (raw_window, raw_display) = {
            let wh = window.window_handle().map_err(|e| e.to_string())?;
            let dh = window.display_handle().map_err(|e| e.to_string())?;
            (wh.as_raw(), dh.as_raw())
        };
        pollster::block_on(Self::from_raw_handles_async(raw_window, raw_display, config))
    }

    async fn from_raw_handles_async(
        raw_window_handle: raw_window_handle::RawWindowHandle,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        config: BeaconConfig,
    ) -> Result<Self, String> {
        let instance = wgpu::Instance::default();
        let target = SurfaceTargetUnsafe::RawHandle {
            raw_window_handle,
            raw_display_handle,
        };
        let surface = unsafe { instance.create_surface_unsafe(target).map_err(|e| e.to_string())? };
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or("No adapter")?;
        log::info!("wgpu adapter: {:?}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|e| e.to_string())?;
        let caps = surface.get_capabilities(&adapter);
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or("Surface reports no formats")?;
        log::debug!("surface format {:?}", surface_format);
        let device = WgpuDevice::new(device, queue, config.width, config.height)
            .map_err(|e| e.to_string())?;
        let plugin = BeaconPlugin::from_device(device, config).map_err(|e| e.to_string())?;
        drop(surface);
        Ok(Self {
            instance,
            plugin,
            surface_format,
        })
    }

    fn surface_config(
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> wgpu::SurfaceConfiguration {
        wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        }
    }

    pub fn plugin(&self) -> &BeaconPlugin {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut BeaconPlugin {
        &mut self.plugin
    }
}

impl RenderBackend for BeaconWindowBackend {
    fn prepare(&mut self, extracted: &ExtractedDraws) {
        self.plugin.prepare(extracted);
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        self.plugin.render_frame(view)
    }
}

impl RenderBackendWindow for BeaconWindowBackend {
    fn render_frame_to_window(
        &mut self,
        view: &ExtractedView,
        raw_window_handle: raw_window_handle::RawWindowHandle,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
    ) -> Result<(), String> {
        let target = SurfaceTargetUnsafe::RawHandle {
            raw_window_handle,
            raw_display_handle,
        };
        let surface = unsafe {
            self.instance
                .create_surface_unsafe(target)
                .map_err(|e| e.to_string())?
        };
        let (width, height) = view.viewport_size;
        let config = Self::surface_config(self.surface_format, width.max(1), height.max(1));
        let device = self.plugin.wgpu_device().wgpu_device();
        surface.configure(device, &config);

        let frame = match surface.get_current_texture() {
            Ok(f) => f,
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                surface.configure(device, &config);
                surface.get_current_texture().map_err(|e| e.to_string())?
            }
            Err(wgpu::SurfaceError::Timeout) => {
                return Err("Surface get_current_texture timeout".to_string())
            }
            Err(e) => return Err(e.to_string()),
        };

        self.plugin.wgpu_device_mut().attach_surface(frame);
        let rendered = self.plugin.render_frame(view);
        let frame = self.plugin.wgpu_device_mut().take_surface();
        rendered?;
        if let Some(frame) = frame {
            frame.present();
        }
        Ok(())
    }
}
