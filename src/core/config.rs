//! Pipeline configuration.
//!
//! Configuration is read from a TOML file. Every section and every field has
//! a default, so an empty file (or no file at all) yields a runnable
//! 1920x1080 synthetic-source, headless-sink pipeline.
//!
//! ```toml
//! [engine]
//! width = 1280
//! height = 720
//! block_size = 16
//!
//! [source]
//! kind = "device"
//! path = "/dev/video0"
//! ```

use crate::core::error::ConfigError;
use crate::core::types::Resolution;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of buffering slots (double buffering).
pub const DEFAULT_SLOTS: usize = 2;

/// Default fence wait timeout.
pub const DEFAULT_FENCE_TIMEOUT_MS: u64 = 2_000;

/// Complete configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Compute engine settings
    pub engine: EngineConfig,
    /// GPU device selection
    pub device: DeviceConfig,
    /// Frame source settings
    pub source: SourceConfig,
    /// Presentation sink settings
    pub sink: SinkConfig,
    /// Main loop settings
    pub run: RunConfig,
}

/// Which processor executes the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// wgpu compute engine
    #[default]
    Gpu,
    /// CPU reference processor
    Cpu,
}

/// Compute engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Number of buffering slots in the ring
    pub slots: usize,
    /// Pixelation block size in pixels
    pub block_size: u32,
    /// Bounded wait for a slot's completion fence
    pub fence_timeout_ms: u64,
    /// Compiled kernel artifact (SPIR-V, or WGSL by extension). Built-in
    /// kernel when unset.
    pub kernel: Option<PathBuf>,
    /// Copy each OUTPUT image back to host memory
    pub readback: bool,
    /// Processor backend
    pub backend: Backend,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            slots: DEFAULT_SLOTS,
            block_size: 16,
            fence_timeout_ms: DEFAULT_FENCE_TIMEOUT_MS,
            kernel: None,
            readback: true,
            backend: Backend::Gpu,
        }
    }
}

impl EngineConfig {
    /// Engine resolution.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Fence wait timeout.
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

/// GPU device selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Accept CPU/software adapters (llvmpipe, WARP) when no GPU exists
    pub allow_software_adapter: bool,
    /// Debug label attached to the logical device
    pub label: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            allow_software_adapter: false,
            label: "obscura".to_string(),
        }
    }
}

/// Frame source variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generated test pattern
    #[default]
    Synthetic,
    /// YUYV capture device node or raw capture file
    Device,
}

/// Synthetic test pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// Normalized gradient across the frame
    #[default]
    Gradient,
    /// `(x mod 256, y mod 256, (x + y) mod 256, 255)`
    Modular,
}

/// Frame source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source variant
    pub kind: SourceKind,
    /// Pattern for the synthetic source
    pub pattern: Pattern,
    /// Declared source width; the engine width when unset
    pub width: Option<u32>,
    /// Declared source height; the engine height when unset
    pub height: Option<u32>,
    /// Device node or capture file for the device source
    pub path: PathBuf,
    /// Bounded wait for one captured frame
    pub capture_timeout_ms: u64,
    /// End the stream after this many frames (synthetic source)
    pub frame_limit: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            pattern: Pattern::Gradient,
            width: None,
            height: None,
            path: PathBuf::from("/dev/video0"),
            capture_timeout_ms: 1_000,
            frame_limit: None,
        }
    }
}

impl SourceConfig {
    /// Capture timeout.
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Resolution the source produces, given the engine's.
    pub fn declared_resolution(&self, engine: Resolution) -> Resolution {
        Resolution::new(
            self.width.unwrap_or(engine.width),
            self.height.unwrap_or(engine.height),
        )
    }
}

/// Presentation sink variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Discard frames, count them
    #[default]
    Headless,
    /// Write PNG files
    Png,
}

/// Presentation sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Sink variant
    pub kind: SinkKind,
    /// Output directory for the PNG sink
    pub dir: Option<PathBuf>,
    /// Write every Nth frame
    pub every: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Headless,
            dir: None,
            every: 30,
        }
    }
}

/// Main loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Frame budget; 0 runs until the source ends
    pub frames: u64,
    /// Report throughput every N presented frames
    pub fps_interval: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            frames: 300,
            fps_interval: 30,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no pipeline can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if !self.engine.resolution().is_valid() {
            return invalid(format!(
                "engine resolution must be non-zero, got {}",
                self.engine.resolution()
            ));
        }
        if self.engine.slots == 0 {
            return invalid("engine.slots must be at least 1".to_string());
        }
        if self.engine.block_size == 0 {
            return invalid("engine.block_size must be at least 1".to_string());
        }
        if self.engine.fence_timeout_ms == 0 {
            return invalid("engine.fence_timeout_ms must be positive".to_string());
        }
        if !self.source.declared_resolution(self.engine.resolution()).is_valid() {
            return invalid("source resolution must be non-zero".to_string());
        }
        if self.source.capture_timeout_ms == 0 {
            return invalid("source.capture_timeout_ms must be positive".to_string());
        }
        if self.sink.kind == SinkKind::Png && self.sink.dir.is_none() {
            return invalid("sink.dir is required for the png sink".to_string());
        }
        if self.sink.every == 0 {
            return invalid("sink.every must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.engine.slots, DEFAULT_SLOTS);
        assert_eq!(config.engine.resolution(), Resolution::new(1920, 1080));
    }

    #[test]
    fn test_partial_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [engine]
            width = 64
            height = 64
            backend = "cpu"

            [source]
            kind = "synthetic"
            pattern = "modular"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.resolution(), Resolution::new(64, 64));
        assert_eq!(config.engine.backend, Backend::Cpu);
        assert_eq!(config.engine.block_size, 16);
        assert_eq!(config.source.pattern, Pattern::Modular);
    }

    #[test]
    fn test_rejects_zero_resolution() {
        let err = PipelineConfig::from_toml_str("[engine]\nwidth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_slots_and_block() {
        assert!(PipelineConfig::from_toml_str("[engine]\nslots = 0").is_err());
        assert!(PipelineConfig::from_toml_str("[engine]\nblock_size = 0").is_err());
    }

    #[test]
    fn test_png_sink_requires_dir() {
        assert!(PipelineConfig::from_toml_str("[sink]\nkind = \"png\"").is_err());
        assert!(PipelineConfig::from_toml_str("[sink]\nkind = \"png\"\ndir = \"out\"").is_ok());
    }

    #[test]
    fn test_source_resolution_defaults_to_engine() {
        let config = PipelineConfig::from_toml_str("[engine]\nwidth = 64\nheight = 32").unwrap();
        let engine = config.engine.resolution();
        assert_eq!(config.source.declared_resolution(engine), engine);

        let config = PipelineConfig::from_toml_str("[source]\nwidth = 640").unwrap();
        assert_eq!(
            config.source.declared_resolution(config.engine.resolution()),
            Resolution::new(640, 1080)
        );
    }

    #[test]
    fn test_parse_error() {
        let err = PipelineConfig::from_toml_str("[engine\nwidth = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\nframes = 12").unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.run.frames, 12);
    }

    #[test]
    fn test_load_missing_file() {
        let err = PipelineConfig::load("/nonexistent/obscura.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
