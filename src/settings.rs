//! Illustration rendering settings.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Configuration for the illustration (silhouette/halo) pipeline.
///
/// Settings are read once per frame when `end_frame` runs the illustration
/// passes; changing them mid-frame has no effect until the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IllustrationSettings {
    /// Number of smoothing iterations diffusing the edge/halo weights.
    /// Zero draws with the seeded weights only.
    pub smoothing_steps: u32,
    /// Edge weight smoothing in [0, 1]; the diffusion decay is `1 - edge_smoothing`.
    pub edge_smoothing: f32,
    /// Halo weight smoothing in [0, 1]; the diffusion decay is `1 - halo_smoothing`.
    pub halo_smoothing: f32,
    /// Color silhouette edges are pulled toward.
    pub edge_color: Vec3,
    /// Blend factor of the edge color at full edge weight, in [0, 1].
    pub edge_strength: f32,
    /// Opacity/darkening added around object boundaries, in [0, 1].
    pub halo_strength: f32,
}

impl Default for IllustrationSettings {
    fn default() -> Self {
        Self {
            smoothing_steps: 3,
            edge_smoothing: 0.4,
            halo_smoothing: 0.5,
            edge_color: Vec3::ZERO,
            edge_strength: 0.5,
            halo_strength: 0.4,
        }
    }
}

impl IllustrationSettings {
    /// Copy with all coefficients forced into their valid [0, 1] domain.
    /// Applied once per frame before the uniform upload.
    pub fn clamped(&self) -> Self {
        Self {
            smoothing_steps: self.smoothing_steps,
            edge_smoothing: self.edge_smoothing.clamp(0.0, 1.0),
            halo_smoothing: self.halo_smoothing.clamp(0.0, 1.0),
            edge_color: self.edge_color.clamp(Vec3::ZERO, Vec3::ONE),
            edge_strength: self.edge_strength.clamp(0.0, 1.0),
            halo_strength: self.halo_strength.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_domain() {
        let settings = IllustrationSettings::default();
        assert_eq!(settings, settings.clamped());
    }

    #[test]
    fn clamped_forces_coefficient_domain() {
        let settings = IllustrationSettings {
            smoothing_steps: 7,
            edge_smoothing: 1.5,
            halo_smoothing: -0.25,
            edge_color: Vec3::new(2.0, -1.0, 0.5),
            edge_strength: -3.0,
            halo_strength: 1.01,
        }
        .clamped();

        assert_eq!(settings.smoothing_steps, 7);
        assert_eq!(settings.edge_smoothing, 1.0);
        assert_eq!(settings.halo_smoothing, 0.0);
        assert_eq!(settings.edge_color, Vec3::new(1.0, 0.0, 0.5));
        assert_eq!(settings.edge_strength, 0.0);
        assert_eq!(settings.halo_strength, 1.0);
    }
}
