// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Loaded from JSON. An explicit path must exist; the default location under
//! the user config directory is optional and falls back to defaults.

use crate::backends::camera::virtual_camera::VirtualCameraConfig;
use crate::backends::camera::{CameraBackendType, PixelFormat, Resolution};
use crate::constants::{
    APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_BUFFER_COUNT, DEFAULT_GPU_DEVICE_INDEX,
};
use crate::errors::ConfigError;
use crate::lifecycle::CaptureSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use (V4L2 or the synthetic camera)
    pub backend: CameraBackendType,
    /// Pixel format of the output stream
    pub pixel_format: PixelFormat,
    /// Resolution override; the first sensor mode is used when unset
    pub resolution: Option<Resolution>,
    /// Request per-frame capture metadata
    pub metadata_enabled: bool,
    /// Index of the GPU that consumes frames
    pub gpu_device_index: usize,
    /// Driver buffers per output stream
    pub buffer_count: u32,
    pub virtual_camera: VirtualCameraConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            pixel_format: PixelFormat::default(),
            resolution: None,
            metadata_enabled: true,
            gpu_device_index: DEFAULT_GPU_DEVICE_INDEX,
            buffer_count: DEFAULT_BUFFER_COUNT,
            virtual_camera: VirtualCameraConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, or from the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Settings handed to the lifecycle coordinator
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            pixel_format: self.pixel_format,
            resolution: self.resolution,
            metadata_enabled: self.metadata_enabled,
            gpu_device_index: self.gpu_device_index,
        }
    }
}
