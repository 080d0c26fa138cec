// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera bridge
//!
//! Native primitives report their own failures ([`BackendError`] for the camera
//! stack, [`GpuError`] for the GPU stack). The lifecycle coordinator maps those
//! into the bridge taxonomy ([`BridgeError`]) on the forward path and into
//! [`ReleaseWarning`] while unwinding.

use std::fmt;

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result type for camera stack operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type for GPU stack operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Fatal errors on the forward (acquisition) path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The camera stack reported no devices
    NoDeviceFound,
    /// The selected device reported no sensor modes
    NoModeFound(String),
    /// Capture session could not be created
    SessionCreate(String),
    /// Output stream could not be created or configured
    StreamCreate(String),
    /// GPU runtime or context retention failed
    GpuInit(String),
    /// GPU consumer could not be attached to the output stream
    ConsumerConnect(String),
    /// The repeating capture request was rejected
    RepeatStart(String),
    /// A native stack does not expose a required capability view
    MissingCapability(&'static str),
    /// `start` was called while resources are still live
    AlreadyStarted,
}

impl BridgeError {
    /// Short stable name of the taxonomy member
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::NoDeviceFound => "NoDeviceFound",
            BridgeError::NoModeFound(_) => "NoModeFound",
            BridgeError::SessionCreate(_) => "SessionCreateError",
            BridgeError::StreamCreate(_) => "StreamCreateError",
            BridgeError::GpuInit(_) => "GpuInitError",
            BridgeError::ConsumerConnect(_) => "ConsumerConnectError",
            BridgeError::RepeatStart(_) => "RepeatStartError",
            BridgeError::MissingCapability(_) => "MissingCapability",
            BridgeError::AlreadyStarted => "AlreadyStarted",
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::NoDeviceFound => write!(f, "No camera devices found"),
            BridgeError::NoModeFound(device) => {
                write!(f, "No sensor modes reported by camera {}", device)
            }
            BridgeError::SessionCreate(msg) => write!(f, "Failed to create capture session: {}", msg),
            BridgeError::StreamCreate(msg) => write!(f, "Failed to create output stream: {}", msg),
            BridgeError::GpuInit(msg) => write!(f, "GPU initialization failed: {}", msg),
            BridgeError::ConsumerConnect(msg) => {
                write!(f, "Failed to connect GPU consumer to stream: {}", msg)
            }
            BridgeError::RepeatStart(msg) => write!(f, "Failed to start repeating capture: {}", msg),
            BridgeError::MissingCapability(what) => {
                write!(f, "Camera stack does not provide {}", what)
            }
            BridgeError::AlreadyStarted => write!(f, "Capture pipeline is already running"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Resources tracked on the coordinator's ownership stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    CaptureSession,
    OutputStream,
    GpuContext,
    ConsumerConnection,
    RepeatingRequest,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::CaptureSession => write!(f, "capture session"),
            ResourceKind::OutputStream => write!(f, "output stream"),
            ResourceKind::GpuContext => write!(f, "GPU context"),
            ResourceKind::ConsumerConnection => write!(f, "consumer connection"),
            ResourceKind::RepeatingRequest => write!(f, "repeating request"),
        }
    }
}

/// Non-fatal failure of a single release step during unwind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseWarning {
    pub resource: ResourceKind,
    pub message: String,
}

impl ReleaseWarning {
    pub fn new(resource: ResourceKind, message: impl Into<String>) -> Self {
        Self {
            resource,
            message: message.into(),
        }
    }
}

impl fmt::Display for ReleaseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to release {}: {}", self.resource, self.message)
    }
}

impl std::error::Error for ReleaseWarning {}

/// Camera stack errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Camera device not found or could not be opened
    DeviceNotFound(String),
    /// Requested format was refused or substituted by the driver
    FormatNotSupported(String),
    /// Handle does not refer to a live object
    InvalidHandle(String),
    /// Handle was already released
    AlreadyReleased(String),
    /// Operation is not valid in the current state
    InvalidState(String),
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::InvalidHandle(msg) => write!(f, "Invalid handle: {}", msg),
            BackendError::AlreadyReleased(msg) => write!(f, "Already released: {}", msg),
            BackendError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}

/// GPU stack errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// GPU runtime could not be initialized
    RuntimeUnavailable(String),
    /// Requested device index does not exist
    NoSuchDevice(usize),
    /// Device or context creation failed
    ContextCreation(String),
    /// Context is not retained (double release or foreign context)
    NotRetained(usize),
    /// Current-context stack misuse (push while current, pop while empty)
    Activation(String),
    /// Stream endpoint refused the consumer
    Endpoint(String),
    /// Connection handle is unknown
    UnknownConnection(u64),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::RuntimeUnavailable(msg) => write!(f, "GPU runtime unavailable: {}", msg),
            GpuError::NoSuchDevice(index) => write!(f, "No GPU device with index {}", index),
            GpuError::ContextCreation(msg) => write!(f, "Failed to create GPU context: {}", msg),
            GpuError::NotRetained(index) => {
                write!(f, "GPU context for device {} is not retained", index)
            }
            GpuError::Activation(msg) => write!(f, "GPU context activation: {}", msg),
            GpuError::Endpoint(msg) => write!(f, "Stream endpoint: {}", msg),
            GpuError::UnknownConnection(id) => write!(f, "Unknown consumer connection {}", id),
        }
    }
}

impl std::error::Error for GpuError {}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Io(std::path::PathBuf, std::io::Error),
    /// Config file is not valid JSON for [`crate::config::Config`]
    Parse(std::path::PathBuf, serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Failed to read {}: {}", path.display(), e),
            ConfigError::Parse(path, e) => write!(f, "Invalid config {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(_, e) => Some(e),
        }
    }
}
