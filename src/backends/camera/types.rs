// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use super::endpoint::StreamEndpoint;
use crate::errors::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendType {
    /// Video4Linux2 capture devices (/dev/video*)
    #[default]
    V4l2,
    /// Synthetic test-pattern sensor, no hardware required
    Virtual,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::V4l2 => write!(f, "V4L2"),
            CameraBackendType::Virtual => write!(f, "virtual"),
        }
    }
}

/// Represents a camera device
///
/// Borrowed from the camera stack's catalog; valid for the process lifetime
/// once enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub name: String,
    pub path: String,           // Device node or synthetic identity
    pub driver: Option<String>, // Kernel driver name, when known
}

/// Capture resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Framerate as a fraction (numerator/denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    /// Get the framerate as a floating point value
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Duration of one frame; zero rates fall back to one second
    pub fn frame_interval(&self) -> std::time::Duration {
        if self.num == 0 {
            return std::time::Duration::from_secs(1);
        }
        std::time::Duration::from_nanos(1_000_000_000 * self.denom as u64 / self.num as u64)
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show decimal for non-integer framerates (NTSC)
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

/// One capture capability of a device, immutable once queried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorMode {
    pub resolution: Resolution,
    pub fourcc: String, // Native FourCC reported by the driver (e.g., "YUYV", "NV12")
    pub framerate: Option<Framerate>,
}

impl std::fmt::Display for SensorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.framerate {
            Some(fps) => write!(f, "{} {} @ {}fps", self.resolution, self.fourcc, fps),
            None => write!(f, "{} {}", self.resolution, self.fourcc),
        }
    }
}

/// Pixel format of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PixelFormat {
    /// NV12 - YCbCr 4:2:0 semi-planar (Y plane + interleaved CbCr plane)
    #[default]
    NV12,
    /// I420 - YCbCr 4:2:0 planar (separate Y, U, V planes)
    I420,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    YUYV,
    /// UYVY - Packed 4:2:2 (U Y0 V Y1 interleaved)
    UYVY,
    /// Gray8 - 8-bit grayscale (single channel)
    Gray8,
    /// RGB24 - 24-bit RGB (3 bytes per pixel, no alpha)
    RGB24,
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
}

impl PixelFormat {
    /// V4L2 FourCC code for this format
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::NV12 => *b"NV12",
            Self::I420 => *b"YU12",
            Self::YUYV => *b"YUYV",
            Self::UYVY => *b"UYVY",
            Self::Gray8 => *b"GREY",
            Self::RGB24 => *b"RGB3",
            Self::RGBA => *b"AB24",
        }
    }

    /// Parse a FourCC string as reported by V4L2 or the config file
    pub fn from_fourcc(fourcc: &str) -> Option<Self> {
        match fourcc.trim() {
            "NV12" => Some(Self::NV12),
            "YU12" | "I420" => Some(Self::I420),
            "YUYV" | "YUY2" => Some(Self::YUYV),
            "UYVY" => Some(Self::UYVY),
            "GREY" | "GRAY8" | "Y8" => Some(Self::Gray8),
            "RGB3" | "RGB" => Some(Self::RGB24),
            "AB24" | "RGBA" => Some(Self::RGBA),
            _ => None,
        }
    }

    /// Format code written into GPU frame headers
    pub fn gpu_format_code(&self) -> u32 {
        match self {
            Self::NV12 => 0,
            Self::I420 => 1,
            Self::YUYV => 2,
            Self::UYVY => 3,
            Self::Gray8 => 4,
            Self::RGB24 => 5,
            Self::RGBA => 6,
        }
    }

    /// Bytes per row of the first plane
    pub fn stride(&self, width: u32) -> u32 {
        match self {
            Self::NV12 | Self::I420 | Self::Gray8 => width,
            Self::YUYV | Self::UYVY => width * 2,
            Self::RGB24 => width * 3,
            Self::RGBA => width * 4,
        }
    }

    /// Size in bytes of one tightly packed frame
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        let pixels = resolution.pixel_count();
        match self {
            // 4:2:0 subsampling
            Self::NV12 | Self::I420 => pixels + pixels / 2,
            Self::YUYV | Self::UYVY => pixels * 2,
            Self::Gray8 => pixels,
            Self::RGB24 => pixels * 3,
            Self::RGBA => pixels * 4,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.fourcc()))
    }
}

/// Immutable configuration of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub pixel_format: PixelFormat,
    pub resolution: Resolution,
    pub metadata_enabled: bool,
}

/// A bound session between the process and one camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSessionHandle {
    pub id: u64,
    pub device: CameraDevice,
}

/// A configured frame-delivery channel created from a session
#[derive(Debug, Clone)]
pub struct OutputStreamHandle {
    pub id: u64,
    pub session_id: u64,
    pub settings: StreamSettings,
    /// Interop object consumers attach to
    pub endpoint: StreamEndpoint,
}

/// A capture request built on a session, listing the streams it fills
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHandle {
    pub id: u64,
    pub session_id: u64,
    enabled_streams: Vec<u64>,
}

impl RequestHandle {
    pub fn new(id: u64, session_id: u64) -> Self {
        Self {
            id,
            session_id,
            enabled_streams: Vec::new(),
        }
    }

    /// Route this request's captures into `stream`
    pub fn enable_output_stream(&mut self, stream: &OutputStreamHandle) -> BackendResult<()> {
        if stream.session_id != self.session_id {
            return Err(BackendError::InvalidHandle(format!(
                "stream {} belongs to session {}, request to session {}",
                stream.id, stream.session_id, self.session_id
            )));
        }
        if !self.enabled_streams.contains(&stream.id) {
            self.enabled_streams.push(stream.id);
        }
        Ok(())
    }

    pub fn enabled_streams(&self) -> &[u64] {
        &self.enabled_streams
    }
}

/// Per-frame metadata, only attached when the stream enables it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Driver frame sequence number
    pub sequence: u32,
    /// Driver timestamp in microseconds
    pub timestamp_us: Option<u64>,
    /// Bytes actually written by the producer
    pub bytes_used: usize,
}

/// A single frame delivered from an output stream
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row stride of the first plane in bytes
    pub stride: u32,
    pub data: Arc<[u8]>,
    /// Timestamp when frame was dequeued (for latency diagnostics)
    pub captured_at: Instant,
    pub metadata: Option<FrameMetadata>,
}
