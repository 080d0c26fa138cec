// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! The camera-pipeline stack is reached through the [`CameraStack`] trait. The
//! components built on top of it each own one concern:
//!
//! ```text
//! ┌─────────────────────┐
//! │ LifecycleCoordinator│  ← Ordering, unwind
//! └──────────┬──────────┘
//!            │
//!   ┌────────┼─────────────────┐
//!   ▼        ▼                 ▼
//! Device   Capture          Request
//! Catalog  Pipeline         Controller
//!   │        │                 │
//!   └────────┼─────────────────┘
//!            ▼
//! ┌─────────────────────┐
//! │  CameraStack Trait  │  ← Native primitives
//! └──────────┬──────────┘
//!       ┌────┴─────┐
//!       ▼          ▼
//!    ┌──────┐  ┌─────────┐
//!    │ V4L2 │  │ Virtual │
//!    └──────┘  └─────────┘
//! ```

pub mod catalog;
pub mod endpoint;
pub mod pipeline;
pub mod request;
pub mod types;
pub mod v4l2;
pub mod virtual_camera;

pub use catalog::DeviceCatalog;
pub use endpoint::{EndpointError, FrameSink, StreamEndpoint};
pub use pipeline::CapturePipeline;
pub use request::RequestController;
pub use types::*;

use crate::config::Config;
use crate::errors::BackendResult;

/// Native camera-pipeline primitives
///
/// Implementations only report success or failure of their own step; ordering
/// between steps is the coordinator's responsibility.
pub trait CameraStack: Send {
    // ===== Enumeration =====

    /// Get the backend type identifier
    fn backend_type(&self) -> CameraBackendType;

    /// Enumerate camera devices in the order the stack reports them
    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDevice>>;

    /// Get the sensor modes of a device in reported order
    fn sensor_modes(&self, device: &CameraDevice) -> BackendResult<Vec<SensorMode>>;

    // ===== Session & stream =====

    /// Bind a capture session to `device`
    fn open_session(&mut self, device: &CameraDevice) -> BackendResult<CaptureSessionHandle>;

    /// Create an output stream on `session`; settings are fixed from here on
    fn create_output_stream(
        &mut self,
        session: &CaptureSessionHandle,
        settings: &StreamSettings,
    ) -> BackendResult<OutputStreamHandle>;

    /// Disconnect an output stream
    ///
    /// A second call for the same stream returns an error and has no effect.
    fn disconnect_stream(&mut self, stream: &OutputStreamHandle) -> BackendResult<()>;

    /// Destroy a capture session
    fn close_session(&mut self, session: &CaptureSessionHandle) -> BackendResult<()>;

    // ===== Capabilities =====

    /// Request-submission view of this stack, if supported
    fn request_control(&mut self) -> Option<&mut dyn RequestControl>;
}

/// Request-submission capability of a camera stack
pub trait RequestControl {
    /// Build an empty capture request on `session`
    fn create_request(&mut self, session: &CaptureSessionHandle) -> BackendResult<RequestHandle>;

    /// Submit `request` for continuous capture
    fn repeat(
        &mut self,
        session: &CaptureSessionHandle,
        request: &RequestHandle,
    ) -> BackendResult<()>;

    /// Stop submitting the repeating request; in-flight captures continue
    fn stop_repeat(&mut self, session: &CaptureSessionHandle) -> BackendResult<()>;

    /// Block until all in-flight captures have drained
    fn wait_for_idle(&mut self, session: &CaptureSessionHandle) -> BackendResult<()>;
}

/// Create the camera stack selected in the config
pub fn get_backend(config: &Config) -> Box<dyn CameraStack> {
    match config.backend {
        CameraBackendType::V4l2 => Box::new(v4l2::V4l2Backend::new(config.buffer_count)),
        CameraBackendType::Virtual => Box::new(virtual_camera::VirtualCamera::new(
            config.virtual_camera.clone(),
        )),
    }
}
