//! Engine configuration.

/// Default cap on concurrent background decode/mask tasks.
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 4;

/// Configuration for [`crate::engine::TextureEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of decode/mask-apply tasks in flight at once.
    pub max_concurrent_loads: usize,
    /// Ask decoders for separate YUV planes where supported.
    ///
    /// Applies only to unmasked `UploadToTexture` loads; planar results are
    /// uploaded one texture per plane.
    pub load_yuv_planes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
            load_yuv_planes: false,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrent load cap.
    pub fn with_max_concurrent_loads(mut self, max: usize) -> Self {
        self.max_concurrent_loads = max.max(1);
        self
    }

    /// Enable or disable planar YUV decoding.
    pub fn with_load_yuv_planes(mut self, enabled: bool) -> Self {
        self.load_yuv_planes = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_loads, DEFAULT_MAX_CONCURRENT_LOADS);
        assert!(!config.load_yuv_planes);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_max_concurrent_loads(8)
            .with_load_yuv_planes(true);
        assert_eq!(config.max_concurrent_loads, 8);
        assert!(config.load_yuv_planes);
    }

    #[test]
    fn test_config_clamps_zero_concurrency() {
        let config = EngineConfig::new().with_max_concurrent_loads(0);
        assert_eq!(config.max_concurrent_loads, 1);
    }
}
