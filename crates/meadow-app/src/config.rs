// SPDX-License-Identifier: CEPL-1.0
//! `meadow.toml`: every field is optional and falls back to the compiled-in default.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use meadow_core::logging::{DEFAULT_CONSOLE_FILTER, DEFAULT_LOG_DIR};
use meadow_platform::{WindowSpec, DEFAULT_HEIGHT, DEFAULT_TITLE, DEFAULT_WIDTH};
use meadow_render::{
    PresentPolicy, RenderSettings, DEFAULT_CLEAR_COLOR, DEFAULT_FRAMES_IN_FLIGHT,
};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "meadow.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub logging: LoggingCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: DEFAULT_TITLE.to_owned(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub vsync: bool,
    /// Unset means on in debug builds only.
    pub validation: Option<bool>,
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: DEFAULT_CLEAR_COLOR,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            vsync: false,
            validation: None,
            shader_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingCfg {
    pub dir: PathBuf,
    pub console_filter: String,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        LoggingCfg {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            console_filter: DEFAULT_CONSOLE_FILTER.to_owned(),
        }
    }
}

/// Where the loaded configuration came from. Logging is not up yet while the
/// file is read, so problems are reported back instead of logged.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File,
    Missing,
    Invalid(String),
}

impl AppConfig {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// A missing file means defaults; so does a malformed one.
    pub fn load(path: &Path) -> (Self, ConfigSource) {
        match fs::read_to_string(path) {
            Ok(text) => match Self::parse(&text) {
                Ok(cfg) => (cfg, ConfigSource::File),
                Err(e) => (
                    Self::default(),
                    ConfigSource::Invalid(format!("{}: {e}", path.display())),
                ),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => (Self::default(), ConfigSource::Missing),
            Err(e) => (
                Self::default(),
                ConfigSource::Invalid(format!("{}: {e}", path.display())),
            ),
        }
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        let defaults = RenderSettings::default();
        RenderSettings {
            clear_color: self.render.clear_color,
            frames_in_flight: self.render.frames_in_flight,
            present_policy: PresentPolicy::from_vsync(self.render.vsync),
            validation: self.render.validation.unwrap_or(defaults.validation),
            shader_dir: self.render.shader_dir.clone(),
        }
    }
}
