//! Beacon bridge: `WgpuDevice` implements `beacon_rhi::Device` on wgpu, and the plugin / window
//! backend implement render_api::RenderBackend on top of a Beacon `Renderer`.

mod plugin;
mod window_backend;
pub mod wgpu_device;

pub use plugin::BeaconPlugin;
pub use wgpu_device::WgpuDevice;
pub use window_backend::BeaconWindowBackend;
