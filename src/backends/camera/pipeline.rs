// SPDX-License-Identifier: GPL-3.0-only

//! Producer side: capture session and output stream

use super::CameraStack;
use super::types::{CameraDevice, CaptureSessionHandle, OutputStreamHandle, StreamSettings};
use crate::errors::{BackendResult, BridgeError, BridgeResult};
use tracing::{debug, info};

/// Session and stream operations over a camera stack
///
/// No ordering guards live here: disconnecting a stream that still has a
/// consumer or an active request is prevented by the coordinator.
pub struct CapturePipeline<'a> {
    stack: &'a mut dyn CameraStack,
}

impl<'a> CapturePipeline<'a> {
    pub fn new(stack: &'a mut dyn CameraStack) -> Self {
        Self { stack }
    }

    pub fn create_session(&mut self, device: &CameraDevice) -> BridgeResult<CaptureSessionHandle> {
        let session = self
            .stack
            .open_session(device)
            .map_err(|e| BridgeError::SessionCreate(e.to_string()))?;
        info!(session = session.id, device = %device.name, "Capture session created");
        Ok(session)
    }

    pub fn create_output_stream(
        &mut self,
        session: &CaptureSessionHandle,
        settings: StreamSettings,
    ) -> BridgeResult<OutputStreamHandle> {
        let stream = self
            .stack
            .create_output_stream(session, &settings)
            .map_err(|e| BridgeError::StreamCreate(e.to_string()))?;
        info!(
            session = session.id,
            stream = stream.id,
            format = %settings.pixel_format,
            resolution = %settings.resolution,
            metadata = settings.metadata_enabled,
            "Output stream created"
        );
        Ok(stream)
    }

    pub fn disconnect(&mut self, stream: &OutputStreamHandle) -> BackendResult<()> {
        debug!(stream = stream.id, "Disconnecting output stream");
        self.stack.disconnect_stream(stream)
    }

    pub fn destroy_session(&mut self, session: &CaptureSessionHandle) -> BackendResult<()> {
        debug!(session = session.id, "Destroying capture session");
        self.stack.close_session(session)
    }
}
