//! Windowed demo: the host only talks to render-api; BeaconWindowBackend owns wgpu.
//! Run: cargo run -p debug --bin deferred_window

use std::time::Instant;

use beacon_bridge::BeaconWindowBackend;
use beacon_renderer::BeaconConfig;
use debug::{build_demo_scene, demo_view};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{ExtractedDraws, RenderBackend, RenderBackendWindow};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowId;

struct App {
    window: Option<winit::window::Window>,
    backend: Option<BeaconWindowBackend>,
    draws: ExtractedDraws,
    size: (u32, u32),
    started: Instant,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            backend: None,
            draws: ExtractedDraws::default(),
            size: (1280, 720),
            started: Instant::now(),
        }
    }

    fn create_backend(window: &winit::window::Window) -> Result<(BeaconWindowBackend, ExtractedDraws), String> {
        let size = window.inner_size();
        let config = BeaconConfig {
            width: size.width.max(1),
            height: size.height.max(1),
            ..Default::default()
        };
        let mut backend = BeaconWindowBackend::from_window(window, config)?;
        let draws = build_demo_scene(backend.plugin_mut().renderer_mut(), 8).map_err(|e| e.to_string())?;
        Ok((backend, draws))
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::WindowAttributes::default()
            .with_title("Beacon deferred demo")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => {
                log::error!("create window: {e}");
                event_loop.exit();
                return;
            }
        };
        let phys = window.inner_size();
        self.size = (phys.width.max(1), phys.height.max(1));
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(physical) => {
                self.size = (physical.width.max(1), physical.height.max(1));
                if let Some(ref w) = self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(window) = &self.window else {
                    return;
                };
                if self.backend.is_none() {
                    match Self::create_backend(window) {
                        Ok((backend, draws)) => {
                            self.backend = Some(backend);
                            self.draws = draws;
                        }
                        Err(e) => {
                            log::error!("BeaconWindowBackend::from_window failed: {e}");
                            event_loop.exit();
                            return;
                        }
                    }
                }
                let (raw_window, raw_display) =
                    match (window.window_handle(), window.display_handle()) {
                        (Ok(wh), Ok(dh)) => (wh.as_raw(), dh.as_raw()),
                        _ => return,
                    };
                let view = demo_view(self.size, self.started.elapsed().as_secs_f32());
                let Some(backend) = &mut self.backend else {
                    return;
                };
                backend.prepare(&self.draws);
                if let Err(e) = backend.render_frame_to_window(&view, raw_window, raw_display) {
                    log::warn!("frame failed: {e}");
                }
                window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), String> {
    env_logger::init();
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let mut app = App::new();
    event_loop.run_app(&mut app).map_err(|e| e.to_string())?;
    Ok(())
}
