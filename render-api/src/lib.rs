//! Shared render backend API for Beacon.
//! Defines the extraction types the scene-composition layer fills each frame and the
//! RenderBackend trait the host drives (prepare + render_frame).

mod extract;
mod backend;

pub use extract::{DirectionalLight, ExtractedDraw, ExtractedDraws, ExtractedView, PointLight};
pub use backend::{RenderBackend, RenderBackendWindow};
pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
