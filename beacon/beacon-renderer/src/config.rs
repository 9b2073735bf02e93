//! Beacon configuration: resolution, shadows, bloom, tone mapping, shader location.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tone mapping mode for the composer pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToneMapping {
    #[default]
    Reinhard,
    /// No tone mapping (clamp).
    None,
}

impl ToneMapping {
    /// Value the composer shader switches on.
    pub fn shader_mode(self) -> f32 {
        match self {
            ToneMapping::Reinhard => 0.0,
            ToneMapping::None => 1.0,
        }
    }
}

/// Renderer configuration. Every field has a default, so a RON file only lists overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Internal render resolution (G-buffer, HDR and bloom targets).
    pub width: u32,
    pub height: u32,

    pub shadows_enabled: bool,
    /// Directional shadow map edge length.
    pub shadow_map_size: u32,
    /// Point light shadow cube face edge length.
    pub point_shadow_size: u32,
    /// Point lights beyond this index never cast shadows.
    pub max_point_lights: u32,
    /// Half-extent of the directional shadow orthographic box.
    pub shadow_extent: f32,
    /// Distance from the camera to the directional shadow eye.
    pub shadow_distance: f32,
    pub shadow_bias: f32,
    pub point_light_near: f32,

    pub bloom_enabled: bool,
    /// Length of the downsample chain, clamped to 1..=8.
    pub bloom_mip_count: u32,
    pub bloom_threshold: f32,
    pub bloom_knee: f32,
    pub bloom_intensity: f32,
    /// Registry texture modulating bloom (lens dirt). None uses `black`.
    pub bloom_dirt_texture: Option<String>,
    pub bloom_dirt_intensity: f32,

    pub tone_mapping: ToneMapping,
    pub exposure: f32,
    /// Backbuffer clear color, visible where nothing was lit.
    pub background_color: [f32; 4],

    /// Load shader sources from this directory instead of the built-in set.
    pub shader_dir: Option<PathBuf>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            shadows_enabled: true,
            shadow_map_size: 2048,
            point_shadow_size: 512,
            max_point_lights: 4,
            shadow_extent: 20.0,
            shadow_distance: 50.0,
            shadow_bias: 0.002,
            point_light_near: 0.1,
            bloom_enabled: true,
            bloom_mip_count: 5,
            bloom_threshold: 1.0,
            bloom_knee: 0.5,
            bloom_intensity: 0.6,
            bloom_dirt_texture: None,
            bloom_dirt_intensity: 0.0,
            tone_mapping: ToneMapping::default(),
            exposure: 1.0,
            background_color: [0.05, 0.05, 0.08, 1.0],
            shader_dir: None,
        }
    }
}

impl BeaconConfig {
    /// Parse a RON document such as `(width: 640, bloom_enabled: false)`.
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(text)
    }

    pub fn bloom_mips(&self) -> u32 {
        self.bloom_mip_count.clamp(1, 8)
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ron_overrides_keep_other_defaults() {
        let config =
            BeaconConfig::from_ron("(width: 640, height: 480, tone_mapping: None)").unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.tone_mapping, ToneMapping::None);
        assert_eq!(config.bloom_mip_count, 5);
        assert!(config.shadows_enabled);
    }

    #[test]
    fn bloom_mips_are_clamped() {
        let config = BeaconConfig {
            bloom_mip_count: 0,
            ..Default::default()
        };
        assert_eq!(config.bloom_mips(), 1);
    }
}
