//! Trait for render backends. Host uses this to call prepare/render_frame uniformly.

use crate::{ExtractedDraws, ExtractedView};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Render backend driven by the host once per frame. Backends live on the render thread.
pub trait RenderBackend {
    /// Prepare phase: take this frame's draw list (names are resolved at render time).
    fn prepare(&mut self, extracted: &ExtractedDraws);

    /// Render one frame. Submits work internally; caller does not need to submit command buffers.
    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String>;
}

/// Extension for backends that can present to a window. Host passes raw handles (e.g. from winit);
/// the backend owns the surface and performs get_current_texture + present internally.
pub trait RenderBackendWindow: RenderBackend {
    /// Render one frame and present to the window identified by the given raw handles.
    /// The backend configures the surface from `view.viewport_size`.
    fn render_frame_to_window(
        &mut self,
        view: &ExtractedView,
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
    ) -> Result<(), String>;
}
