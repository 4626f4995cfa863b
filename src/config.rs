// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional. A missing file or a file that fails to parse
// falls back to the built-in defaults, which reproduce the classic demo:
// 640x360 window, FIFO presentation, cornflower-blue clear, two frame slots.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Square".to_string(),
            width: 640,
            height: 360,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Number of frame synchronization slots
    pub max_frames_in_flight: usize,
    /// Desired swapchain length, clamped to what the surface allows
    pub swapchain_images: u32,
    /// Radians added to the model rotation every frame
    pub rotation_step: f32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [100.0 / 255.0, 149.0 / 255.0, 237.0 / 255.0, 0.0],
            max_frames_in_flight: 2,
            swapchain_images: 3,
            rotation_step: 0.025,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults on any error.
    ///
    /// Runs before the logger exists, so the reason for a fallback is handed
    /// back for the caller to report.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
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

    /// Key that closes the window
    pub fn get_quit_key(&self) -> winit::keyboard::KeyCode {
        use winit::keyboard::KeyCode;

        match self.controls.quit_key.to_lowercase().as_str() {
            "escape" | "esc" => KeyCode::Escape,
            "q" => KeyCode::KeyQ,
            "space" => KeyCode::Space,
            "enter" | "return" => KeyCode::Enter,
            "backspace" => KeyCode::Backspace,
            "f10" => KeyCode::F10,
            "f12" => KeyCode::F12,
            _ => {
                log::warn!(
                    "Unknown quit key '{}', defaulting to Escape",
                    self.controls.quit_key
                );
                KeyCode::Escape
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn defaults_match_classic_demo() {
        let config = Config::default();
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 360);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "mailbox"
            max_frames_in_flight = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert_eq!(config.graphics.swapchain_images, 3);
        assert_eq!(config.window.title, "Vulkan Square");
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::parse("[graphics]\npresent_mode = \"vsync-ish\"\n").unwrap();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.controls.quit_key, "Escape");
    }

    #[test]
    fn broken_file_falls_back_and_reports_why() {
        let path = std::env::temp_dir().join(format!("vk-square-broken-{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 640);
        let error = error.expect("a parse failure is reported");
        assert!(format!("{:#}", error).contains("Failed to parse config file"));
    }

    #[test]
    fn absent_file_falls_back_silently() {
        let (config, error) = Config::load_or_default("definitely/not/here.toml");
        assert!(error.is_none());
        assert_eq!(config.graphics.present_mode, "fifo");
    }

    #[test]
    fn quit_key_parses_case_insensitively() {
        let config = Config::parse("[controls]\nquit_key = \"q\"\n").unwrap();
        assert_eq!(config.get_quit_key(), winit::keyboard::KeyCode::KeyQ);
    }
}
