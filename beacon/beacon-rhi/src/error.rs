use crate::ResourceId;

/// Failure of a single device call. Callers treat every variant as fatal for the frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to create {kind}: {message}")]
    CreationFailed { kind: &'static str, message: String },

    #[error("shader program `{label}` failed to compile: {message}")]
    ShaderCompilation { label: String, message: String },

    #[error("unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: ResourceId },

    #[error("{kind} slot {slot} out of range (max {max})")]
    SlotOutOfRange {
        kind: &'static str,
        slot: u32,
        max: usize,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("binding failed: {0}")]
    Binding(String),

    #[error("draw failed: {0}")]
    Draw(String),

    #[error("surface error: {0}")]
    Surface(String),
}
