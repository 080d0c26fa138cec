// SPDX-License-Identifier: GPL-3.0-only

//! Repeating capture requests

use super::RequestControl;
use super::types::{CaptureSessionHandle, OutputStreamHandle, RequestHandle};
use crate::errors::{BackendResult, BridgeError, BridgeResult};
use tracing::{debug, info};

/// Builds the repeating request and starts/stops continuous capture
pub struct RequestController<'a> {
    control: &'a mut dyn RequestControl,
}

impl<'a> RequestController<'a> {
    pub fn new(control: &'a mut dyn RequestControl) -> Self {
        Self { control }
    }

    pub fn build_request(&mut self, session: &CaptureSessionHandle) -> BridgeResult<RequestHandle> {
        self.control
            .create_request(session)
            .map_err(|e| BridgeError::RepeatStart(format!("create request: {}", e)))
    }

    pub fn enable_stream(
        &mut self,
        request: &mut RequestHandle,
        stream: &OutputStreamHandle,
    ) -> BridgeResult<()> {
        request
            .enable_output_stream(stream)
            .map_err(|e| BridgeError::RepeatStart(format!("enable stream: {}", e)))
    }

    pub fn start_repeat(
        &mut self,
        session: &CaptureSessionHandle,
        request: &RequestHandle,
    ) -> BridgeResult<()> {
        if request.enabled_streams().is_empty() {
            return Err(BridgeError::RepeatStart(
                "request has no enabled output stream".to_string(),
            ));
        }
        self.control
            .repeat(session, request)
            .map_err(|e| BridgeError::RepeatStart(e.to_string()))?;
        info!(session = session.id, request = request.id, "Repeating capture started");
        Ok(())
    }

    /// Stop continuous capture and block until in-flight captures drain
    ///
    /// Both steps are always attempted; the first failure is returned.
    pub fn stop_and_drain(&mut self, session: &CaptureSessionHandle) -> BackendResult<()> {
        debug!(session = session.id, "Stopping repeating capture");
        let stopped = self.control.stop_repeat(session);
        let drained = self.control.wait_for_idle(session);
        debug!(session = session.id, "Capture session idle");
        stopped.and(drained)
    }
}
