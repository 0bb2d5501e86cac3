//! Hardware capability detection.
//!
//! Capability queries are pure functions of a [`GpuProfile`] value, so the
//! renderer can be gated (and tested) without a live GPU context. Callers
//! build a profile once, either from a real adapter via
//! [`GpuProfile::from_adapter`] or by hand, and pass it into
//! [`FragmentListRenderer::new`](crate::rendering::FragmentListRenderer::new).

use std::collections::HashSet;

/// Extension providing the extended atomic counter operations the
/// illustration fill pass relies on at the 4.50 feature level.
pub const EXT_ATOMIC_COUNTER_OPS: &str = "shader_atomic_counter_ops";

/// Feature level required for the base fragment-list passes.
pub const FRAGMENT_LISTS_VERSION: u32 = 430;

/// Feature level at which illustration buffers work without extensions.
pub const ILLUSTRATION_VERSION: u32 = 460;

/// Feature level at which illustration buffers work when
/// [`EXT_ATOMIC_COUNTER_OPS`] is present.
pub const ILLUSTRATION_EXT_VERSION: u32 = 450;

/// Detected graphics feature level plus extension set.
///
/// `api_version` uses the hundreds form of the desktop GL version scale:
/// `430` means a 4.3-class feature level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuProfile {
    pub api_version: u32,
    pub extensions: HashSet<String>,
}

impl GpuProfile {
    pub fn new(api_version: u32) -> Self {
        Self {
            api_version,
            extensions: HashSet::new(),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extensions.insert(extension.to_string());
        self
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }

    /// True when the per-pixel linked-list capture and display passes can run.
    pub fn supports_fragment_lists(&self) -> bool {
        self.api_version >= FRAGMENT_LISTS_VERSION
    }

    /// True when the illustration (silhouette/halo) pipeline can run.
    pub fn supports_illustration(&self) -> bool {
        if self.api_version >= ILLUSTRATION_VERSION {
            true
        } else if self.api_version >= ILLUSTRATION_EXT_VERSION {
            self.has_extension(EXT_ATOMIC_COUNTER_OPS)
        } else {
            false
        }
    }

    /// Map a wgpu adapter onto the feature-level scale.
    ///
    /// A fully WebGPU-compliant adapter guarantees every shader feature the
    /// passes use (storage atomics, fragment-stage writable storage), which
    /// corresponds to the 4.6 feature level. Downlevel adapters that still
    /// expose compute plus fragment-writable storage land at 4.3; anything
    /// weaker cannot run fragment lists at all.
    pub fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let downlevel = adapter.get_downlevel_capabilities();
        let storage = wgpu::DownlevelFlags::COMPUTE_SHADERS
            | wgpu::DownlevelFlags::FRAGMENT_WRITABLE_STORAGE;

        let api_version = if downlevel.is_webgpu_compliant() {
            ILLUSTRATION_VERSION
        } else if downlevel.flags.contains(storage) {
            FRAGMENT_LISTS_VERSION
        } else {
            330
        };

        let mut profile = Self::new(api_version);
        if downlevel.flags.contains(storage) {
            profile
                .extensions
                .insert(EXT_ATOMIC_COUNTER_OPS.to_string());
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_lists_threshold() {
        assert!(!GpuProfile::new(420).supports_fragment_lists());
        assert!(GpuProfile::new(430).supports_fragment_lists());
        assert!(GpuProfile::new(460).supports_fragment_lists());
    }

    #[test]
    fn illustration_thresholds() {
        assert!(GpuProfile::new(460).supports_illustration());
        assert!(!GpuProfile::new(450).supports_illustration());
        assert!(GpuProfile::new(450)
            .with_extension(EXT_ATOMIC_COUNTER_OPS)
            .supports_illustration());
        // Below 4.50 the extension does not help.
        assert!(!GpuProfile::new(440)
            .with_extension(EXT_ATOMIC_COUNTER_OPS)
            .supports_illustration());
        assert!(!GpuProfile::new(430).supports_illustration());
    }

    #[test]
    fn illustration_is_monotonic_in_version() {
        // With a fixed extension set, a higher version never loses support.
        for extensions in [false, true] {
            let mut previous = false;
            for version in (400..=470).step_by(10) {
                let mut profile = GpuProfile::new(version);
                if extensions {
                    profile = profile.with_extension(EXT_ATOMIC_COUNTER_OPS);
                }
                let supported = profile.supports_illustration();
                assert!(
                    supported || !previous,
                    "support lost going up to version {version}"
                );
                previous = supported;
            }
        }
    }
}
