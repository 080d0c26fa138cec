// SPDX-License-Identifier: GPL-3.0-only

//! Lifecycle coordinator
//!
//! Sequences acquisition across the camera and GPU stacks and releases
//! everything in exact reverse order on every exit path:
//!
//! ```text
//! Uninitialized → DeviceSelected → SessionOpen → StreamOpen
//!               → GpuReady → ConsumerConnected → Capturing
//!               → [reverse] → TornDown
//! ```
//!
//! Each forward transition pushes exactly one entry on an [`OwnershipStack`].
//! A failing forward step unwinds the stack before the error is returned. A
//! failing release step is reported as a [`ReleaseWarning`] and the unwind
//! continues with the next entry.

pub mod unwind;

pub use unwind::{Acquired, OwnershipStack};

use crate::backends::camera::{
    CameraDevice, CameraStack, CapturePipeline, DeviceCatalog, OutputStreamHandle, PixelFormat,
    RequestController, Resolution, SensorMode, StreamEndpoint, StreamSettings,
};
use crate::errors::{BridgeError, BridgeResult, ReleaseWarning, ResourceKind};
use crate::gpu::{ConsumerConnection, GpuContextHandle, GpuStack, StreamConsumerBinding};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Coordinator state; strictly linear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    DeviceSelected,
    SessionOpen,
    StreamOpen,
    GpuReady,
    ConsumerConnected,
    Capturing,
    TornDown,
}

impl LifecycleState {
    /// State left behind once a resource of `kind` has been released
    fn below(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::RepeatingRequest => LifecycleState::ConsumerConnected,
            ResourceKind::ConsumerConnection => LifecycleState::GpuReady,
            ResourceKind::GpuContext => LifecycleState::StreamOpen,
            ResourceKind::OutputStream => LifecycleState::SessionOpen,
            ResourceKind::CaptureSession => LifecycleState::DeviceSelected,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Collaborator-supplied capture choices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub pixel_format: PixelFormat,
    /// Defaults to the first reported sensor mode
    pub resolution: Option<Resolution>,
    pub metadata_enabled: bool,
    pub gpu_device_index: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::NV12,
            resolution: None,
            metadata_enabled: true,
            gpu_device_index: crate::constants::DEFAULT_GPU_DEVICE_INDEX,
        }
    }
}

/// A live GPU-consumable stream, returned once capture is running
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub device: CameraDevice,
    pub mode: SensorMode,
    pub resolution: Resolution,
    pub settings: StreamSettings,
    pub stream: OutputStreamHandle,
    pub connection: ConsumerConnection,
}

impl ActiveStream {
    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.stream.endpoint
    }
}

/// First fatal setup error plus the warnings of the unwind it triggered
#[derive(Debug, Clone)]
pub struct SetupError {
    pub error: BridgeError,
    pub warnings: Vec<ReleaseWarning>,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.warnings.is_empty() {
            write!(f, " ({} release warnings during unwind)", self.warnings.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Outcome of a shutdown
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub warnings: Vec<ReleaseWarning>,
}

impl ShutdownReport {
    /// True when every release succeeded
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Owns both native stacks and the order resources move through them
pub struct LifecycleCoordinator {
    camera: Box<dyn CameraStack>,
    gpu: Box<dyn GpuStack>,
    settings: CaptureSettings,
    stack: OwnershipStack,
    state: LifecycleState,
    resolution: Option<Resolution>,
}

impl LifecycleCoordinator {
    pub fn new(
        camera: Box<dyn CameraStack>,
        gpu: Box<dyn GpuStack>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            camera,
            gpu,
            settings,
            stack: OwnershipStack::new(),
            state: LifecycleState::Uninitialized,
            resolution: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Kinds of the live resources, most recently acquired last
    pub fn unwind_kinds(&self) -> Vec<ResourceKind> {
        self.stack.kinds()
    }

    /// Resolution of the output stream, once a device has been selected
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Acquire everything up to `Capturing`
    ///
    /// On failure all acquired resources are released before returning.
    pub fn start(&mut self) -> Result<ActiveStream, SetupError> {
        let startable = matches!(
            self.state,
            LifecycleState::Uninitialized | LifecycleState::TornDown
        );
        if !startable || !self.stack.is_empty() {
            warn!(state = %self.state, "Start requested while pipeline is live");
            return Err(SetupError {
                error: BridgeError::AlreadyStarted,
                warnings: Vec::new(),
            });
        }

        self.state = LifecycleState::Uninitialized;
        self.resolution = None;

        match self.acquire_all() {
            Ok(active) => {
                info!(
                    device = %active.device.name,
                    resolution = %active.resolution,
                    format = %active.settings.pixel_format,
                    "Capture pipeline running"
                );
                Ok(active)
            }
            Err(error) => {
                error!(kind = error.kind(), error = %error, state = %self.state, "Setup failed, unwinding");
                let warnings = self.unwind();
                Err(SetupError { error, warnings })
            }
        }
    }

    /// Release everything in reverse acquisition order
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.stack.is_empty() {
            debug!("Shutdown requested with nothing live");
            return ShutdownReport::default();
        }
        info!(state = %self.state, resources = self.stack.len(), "Shutting down capture pipeline");
        let warnings = self.unwind();
        if warnings.is_empty() {
            info!("Shutdown complete");
        } else {
            warn!(warnings = warnings.len(), "Shutdown completed with release warnings");
        }
        ShutdownReport { warnings }
    }

    fn transition(&mut self, entry: Option<Acquired>, next: LifecycleState) {
        if let Some(entry) = entry {
            self.stack.push(entry);
        }
        debug!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
    }

    fn acquire_all(&mut self) -> BridgeResult<ActiveStream> {
        let (device, mode) = DeviceCatalog::new(self.camera.as_ref()).select_first()?;
        let resolution = self.settings.resolution.unwrap_or(mode.resolution);
        self.resolution = Some(resolution);
        self.transition(None, LifecycleState::DeviceSelected);

        let session = CapturePipeline::new(self.camera.as_mut()).create_session(&device)?;
        self.transition(
            Some(Acquired::Session(session.clone())),
            LifecycleState::SessionOpen,
        );

        let settings = StreamSettings {
            pixel_format: self.settings.pixel_format,
            resolution,
            metadata_enabled: self.settings.metadata_enabled,
        };
        let stream =
            CapturePipeline::new(self.camera.as_mut()).create_output_stream(&session, settings)?;
        self.transition(
            Some(Acquired::Stream(stream.clone())),
            LifecycleState::StreamOpen,
        );

        let context =
            GpuContextHandle::new(self.gpu.as_mut()).acquire(self.settings.gpu_device_index)?;
        self.transition(
            Some(Acquired::GpuContext(context.clone())),
            LifecycleState::GpuReady,
        );

        let connection = StreamConsumerBinding::new(self.gpu.as_mut()).connect(&context, &stream)?;
        self.transition(
            Some(Acquired::Consumer(connection.clone())),
            LifecycleState::ConsumerConnected,
        );

        let control = self
            .camera
            .request_control()
            .ok_or(BridgeError::MissingCapability("request control"))?;
        let mut controller = RequestController::new(control);
        let mut request = controller.build_request(&session)?;
        controller.enable_stream(&mut request, &stream)?;
        controller.start_repeat(&session, &request)?;
        self.transition(
            Some(Acquired::RepeatingRequest {
                session: session.clone(),
                request,
            }),
            LifecycleState::Capturing,
        );

        Ok(ActiveStream {
            device,
            mode,
            resolution,
            settings,
            stream,
            connection,
        })
    }

    fn unwind(&mut self) -> Vec<ReleaseWarning> {
        let camera = self.camera.as_mut();
        let gpu = self.gpu.as_mut();
        let state = &mut self.state;

        let warnings = self.stack.unwind(|entry| {
            let kind = entry.kind();
            let released = release(&mut *camera, &mut *gpu, entry);
            *state = LifecycleState::below(kind);
            match &released {
                Ok(()) => debug!(resource = %kind, "Released"),
                Err(warning) => warn!(resource = %kind, message = %warning.message, "Release failed, continuing unwind"),
            }
            released
        });

        self.state = LifecycleState::TornDown;
        warnings
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        if !self.stack.is_empty() {
            warn!(resources = self.stack.len(), "Coordinator dropped while live, unwinding");
            let warnings = self.unwind();
            for warning in &warnings {
                warn!("{}", warning);
            }
        }
    }
}

/// Release a single ownership stack entry
fn release(
    camera: &mut dyn CameraStack,
    gpu: &mut dyn GpuStack,
    entry: Acquired,
) -> Result<(), ReleaseWarning> {
    let kind = entry.kind();
    let result = match entry {
        Acquired::RepeatingRequest { session, request: _ } => match camera.request_control() {
            Some(control) => RequestController::new(control)
                .stop_and_drain(&session)
                .map_err(|e| e.to_string()),
            None => Err(BridgeError::MissingCapability("request control").to_string()),
        },
        Acquired::Consumer(connection) => StreamConsumerBinding::new(gpu)
            .disconnect(&connection)
            .map_err(|e| e.to_string()),
        Acquired::GpuContext(context) => GpuContextHandle::new(gpu)
            .release(&context)
            .map_err(|e| e.to_string()),
        Acquired::Stream(stream) => CapturePipeline::new(camera)
            .disconnect(&stream)
            .map_err(|e| e.to_string()),
        Acquired::Session(session) => CapturePipeline::new(camera)
            .destroy_session(&session)
            .map_err(|e| e.to_string()),
    };
    result.map_err(|message| ReleaseWarning::new(kind, message))
}
