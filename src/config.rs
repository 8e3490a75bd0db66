// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::renderer::MAX_FRAMES_IN_FLIGHT;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub device: DeviceConfig,
    pub debug: DebugConfig,
    pub assets: AssetConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Oko Sandbox".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Timeout for fence waits and image acquisition, in nanoseconds.
    /// `u64::MAX` waits forever.
    pub fence_timeout_ns: u64,
    pub max_object_count: u32,
    pub field_of_view_degrees: f32,
    pub near_clip: f32,
    pub far_clip: f32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.2, 1.0],
            max_frames_in_flight: 2,
            fence_timeout_ns: u64::MAX,
            max_object_count: 1024,
            field_of_view_degrees: 45.0,
            near_clip: 0.1,
            far_clip: 1000.0,
        }
    }
}

impl GraphicsConfig {
    /// Frames in flight, clamped to what the per-object descriptor state can track.
    pub fn frames_in_flight(&self) -> usize {
        self.max_frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}

/// Physical device requirements
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub require_discrete_gpu: bool,
    pub require_compute: bool,
    pub require_transfer: bool,
    pub require_sampler_anisotropy: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            require_discrete_gpu: false,
            require_compute: true,
            require_transfer: true,
            require_sampler_anisotropy: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "oko.log".to_string(),
            show_fps: true,
        }
    }
}

/// Asset locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub root: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
        }
    }
}

impl AssetConfig {
    pub fn shader_path(&self, name: &str, stage: &str) -> PathBuf {
        self.root.join("shaders").join(format!("{}.{}.spv", name, stage))
    }

    pub fn texture_dir(&self) -> PathBuf {
        self.root.join("textures")
    }

    pub fn texture_path(&self, name: &str) -> PathBuf {
        self.texture_dir().join(format!("{}.png", name))
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Parse the configured log level, defaulting to `Info`
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug
            .log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.fence_timeout_ns, u64::MAX);
        assert_eq!(config.graphics.max_object_count, 1024);
    }

    #[test]
    fn partial_file_keeps_defaults_for_other_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[graphics]\nmax_frames_in_flight = 3\nfence_timeout_ns = 1000000\n\n[device]\nrequire_discrete_gpu = true"
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert_eq!(config.graphics.fence_timeout_ns, 1_000_000);
        assert!(config.device.require_discrete_gpu);
        assert!(config.device.require_sampler_anisotropy);
        assert_eq!(config.window.title, "Oko Sandbox");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[graphics\nmax_frames_in_flight = ").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut graphics = GraphicsConfig::default();
        graphics.max_frames_in_flight = 0;
        assert_eq!(graphics.frames_in_flight(), 1);
        graphics.max_frames_in_flight = 8;
        assert_eq!(graphics.frames_in_flight(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn present_mode_names() {
        let mut config = Config::default();
        config.graphics.present_mode = "FIFO".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);
        config.graphics.present_mode = "bogus".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn asset_paths_follow_naming_convention() {
        let assets = AssetConfig::default();
        assert_eq!(
            assets.shader_path("Builtin.MaterialShader", "vert"),
            PathBuf::from("assets/shaders/Builtin.MaterialShader.vert.spv")
        );
        assert_eq!(
            assets.texture_path("paving"),
            PathBuf::from("assets/textures/paving.png")
        );
    }
}
