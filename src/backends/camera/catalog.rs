// SPDX-License-Identifier: GPL-3.0-only

//! Read-only device and sensor mode queries
//!
//! Selection is first-wins: the first device and the first mode the stack
//! reports are used as-is, with no ranking.

use super::CameraStack;
use super::types::{CameraDevice, SensorMode};
use crate::errors::{BridgeError, BridgeResult};
use tracing::{debug, info};

/// Device and mode catalog over a camera stack
pub struct DeviceCatalog<'a> {
    stack: &'a dyn CameraStack,
}

impl<'a> DeviceCatalog<'a> {
    pub fn new(stack: &'a dyn CameraStack) -> Self {
        Self { stack }
    }

    /// List camera devices; an empty list is `NoDeviceFound`
    pub fn list_devices(&self) -> BridgeResult<Vec<CameraDevice>> {
        let devices = self.stack.enumerate_devices().map_err(|e| {
            debug!(error = %e, "Device enumeration failed");
            BridgeError::NoDeviceFound
        })?;
        if devices.is_empty() {
            return Err(BridgeError::NoDeviceFound);
        }
        debug!(count = devices.len(), backend = %self.stack.backend_type(), "Enumerated cameras");
        Ok(devices)
    }

    /// List sensor modes of `device`; an empty list is `NoModeFound`
    pub fn list_sensor_modes(&self, device: &CameraDevice) -> BridgeResult<Vec<SensorMode>> {
        let modes = self.stack.sensor_modes(device).map_err(|e| {
            debug!(device = %device.name, error = %e, "Sensor mode query failed");
            BridgeError::NoModeFound(device.name.clone())
        })?;
        if modes.is_empty() {
            return Err(BridgeError::NoModeFound(device.name.clone()));
        }
        Ok(modes)
    }

    /// Pick the first device and its first sensor mode
    pub fn select_first(&self) -> BridgeResult<(CameraDevice, SensorMode)> {
        let device = self
            .list_devices()?
            .into_iter()
            .next()
            .ok_or(BridgeError::NoDeviceFound)?;
        let mode = self
            .list_sensor_modes(&device)?
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::NoModeFound(device.name.clone()))?;

        info!(device = %device.name, path = %device.path, mode = %mode, "Selected camera");
        Ok((device, mode))
    }
}
