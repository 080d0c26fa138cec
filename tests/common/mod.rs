// SPDX-License-Identifier: GPL-3.0-only

//! Recording mock stacks for lifecycle tests
//!
//! Both mocks append to one shared call log. Successful calls are logged as
//! `"camera:<op>"` / `"gpu:<op>"`, failed ones with a `" failed"` suffix.
//! Any operation listed in the failure set returns an error.

#![allow(dead_code)]

use camera_bridge::backends::camera::{
    CameraBackendType, CameraDevice, CameraFrame, CameraStack, CaptureSessionHandle, FrameSink,
    OutputStreamHandle, RequestControl, RequestHandle, Resolution, SensorMode, StreamEndpoint,
    StreamSettings,
};
use camera_bridge::errors::{BackendError, BackendResult, GpuError, GpuResult};
use camera_bridge::gpu::{ConsumerConnection, GpuContext, GpuStack};
use camera_bridge::{CaptureSettings, LifecycleCoordinator};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Number of successful calls of `entry`
pub fn count(log: &CallLog, entry: &str) -> usize {
    log.lock().unwrap().iter().filter(|e| *e == entry).count()
}

/// Position of the first occurrence of `entry`
pub fn position(log: &CallLog, entry: &str) -> Option<usize> {
    log.lock().unwrap().iter().position(|e| e == entry)
}

fn record(log: &CallLog, entry: String) {
    log.lock().unwrap().push(entry);
}

pub struct MockCamera {
    log: CallLog,
    fail: HashSet<&'static str>,
    devices: Vec<CameraDevice>,
    modes: Vec<SensorMode>,
    next_id: u64,
    streams: HashMap<u64, StreamEndpoint>,
}

impl MockCamera {
    pub fn new(log: CallLog, fail: &[&'static str]) -> Self {
        Self {
            log,
            fail: fail.iter().copied().collect(),
            devices: vec![CameraDevice {
                name: "Mock Camera".to_string(),
                path: "mock:0".to_string(),
                driver: None,
            }],
            modes: vec![
                SensorMode {
                    resolution: Resolution::new(1280, 720),
                    fourcc: "NV12".to_string(),
                    framerate: None,
                },
                SensorMode {
                    resolution: Resolution::new(640, 480),
                    fourcc: "NV12".to_string(),
                    framerate: None,
                },
            ],
            next_id: 1,
            streams: HashMap::new(),
        }
    }

    pub fn without_devices(mut self) -> Self {
        self.devices.clear();
        self
    }

    pub fn without_modes(mut self) -> Self {
        self.modes.clear();
        self
    }

    fn step(&mut self, op: &'static str) -> BackendResult<()> {
        if self.fail.contains(op) {
            record(&self.log, format!("camera:{} failed", op));
            Err(BackendError::Other(format!("injected {} failure", op)))
        } else {
            record(&self.log, format!("camera:{}", op));
            Ok(())
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl CameraStack for MockCamera {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::Virtual
    }

    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        record(&self.log, "camera:enumerate_devices".to_string());
        Ok(self.devices.clone())
    }

    fn sensor_modes(&self, _device: &CameraDevice) -> BackendResult<Vec<SensorMode>> {
        record(&self.log, "camera:sensor_modes".to_string());
        Ok(self.modes.clone())
    }

    fn open_session(&mut self, device: &CameraDevice) -> BackendResult<CaptureSessionHandle> {
        self.step("open_session")?;
        Ok(CaptureSessionHandle {
            id: self.allocate_id(),
            device: device.clone(),
        })
    }

    fn create_output_stream(
        &mut self,
        session: &CaptureSessionHandle,
        settings: &StreamSettings,
    ) -> BackendResult<OutputStreamHandle> {
        self.step("create_output_stream")?;
        let id = self.allocate_id();
        let endpoint = StreamEndpoint::new(id);
        self.streams.insert(id, endpoint.clone());
        Ok(OutputStreamHandle {
            id,
            session_id: session.id,
            settings: *settings,
            endpoint,
        })
    }

    fn disconnect_stream(&mut self, stream: &OutputStreamHandle) -> BackendResult<()> {
        self.step("disconnect_stream")
            .map_err(|_| BackendError::AlreadyReleased(format!("stream {}", stream.id)))?;
        if let Some(endpoint) = self.streams.remove(&stream.id) {
            let _ = endpoint.close();
        }
        Ok(())
    }

    fn close_session(&mut self, _session: &CaptureSessionHandle) -> BackendResult<()> {
        self.step("close_session")
    }

    fn request_control(&mut self) -> Option<&mut dyn RequestControl> {
        if self.fail.contains("request_control") {
            record(&self.log, "camera:request_control failed".to_string());
            None
        } else {
            Some(self)
        }
    }
}

impl RequestControl for MockCamera {
    fn create_request(&mut self, session: &CaptureSessionHandle) -> BackendResult<RequestHandle> {
        self.step("create_request")?;
        Ok(RequestHandle::new(self.allocate_id(), session.id))
    }

    fn repeat(
        &mut self,
        _session: &CaptureSessionHandle,
        _request: &RequestHandle,
    ) -> BackendResult<()> {
        self.step("repeat")
    }

    fn stop_repeat(&mut self, _session: &CaptureSessionHandle) -> BackendResult<()> {
        self.step("stop_repeat")
    }

    fn wait_for_idle(&mut self, _session: &CaptureSessionHandle) -> BackendResult<()> {
        self.step("wait_for_idle")
    }
}

/// Sink that only counts frames
pub struct CountingSink(pub Arc<AtomicU64>);

impl FrameSink for CountingSink {
    fn consume(&mut self, _frame: &CameraFrame) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct MockGpu {
    log: CallLog,
    fail: HashSet<&'static str>,
    devices: usize,
    retained: usize,
    current: Option<usize>,
    next_id: u64,
    connections: HashMap<u64, StreamEndpoint>,
    pub consumed: Arc<AtomicU64>,
}

impl MockGpu {
    pub fn new(log: CallLog, fail: &[&'static str]) -> Self {
        Self {
            log,
            fail: fail.iter().copied().collect(),
            devices: 1,
            retained: 0,
            current: None,
            next_id: 1,
            connections: HashMap::new(),
            consumed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn without_devices(mut self) -> Self {
        self.devices = 0;
        self
    }

    fn step(&mut self, op: &'static str) -> GpuResult<()> {
        if self.fail.contains(op) {
            record(&self.log, format!("gpu:{} failed", op));
            Err(GpuError::ContextCreation(format!("injected {} failure", op)))
        } else {
            record(&self.log, format!("gpu:{}", op));
            Ok(())
        }
    }
}

impl GpuStack for MockGpu {
    fn init(&mut self) -> GpuResult<()> {
        self.step("init")
    }

    fn device_count(&self) -> GpuResult<usize> {
        Ok(self.devices)
    }

    fn retain_primary_context(&mut self, device_index: usize) -> GpuResult<GpuContext> {
        self.step("retain")?;
        self.retained += 1;
        Ok(GpuContext {
            device_index,
            adapter_name: "Mock GPU".to_string(),
        })
    }

    fn release_primary_context(&mut self, _context: &GpuContext) -> GpuResult<()> {
        self.step("release")?;
        self.retained -= 1;
        Ok(())
    }

    fn push_current(&mut self, context: &GpuContext) -> GpuResult<()> {
        if self.current.is_some() {
            record(&self.log, "gpu:push failed".to_string());
            return Err(GpuError::Activation("already current".to_string()));
        }
        self.step("push")?;
        self.current = Some(context.device_index);
        Ok(())
    }

    fn pop_current(&mut self) -> GpuResult<()> {
        if self.current.take().is_none() {
            record(&self.log, "gpu:pop failed".to_string());
            return Err(GpuError::Activation("nothing current".to_string()));
        }
        record(&self.log, "gpu:pop".to_string());
        Ok(())
    }

    fn connect_consumer(&mut self, endpoint: &StreamEndpoint) -> GpuResult<ConsumerConnection> {
        let Some(device_index) = self.current else {
            record(&self.log, "gpu:connect failed".to_string());
            return Err(GpuError::Activation("no current context".to_string()));
        };
        self.step("connect")?;
        endpoint
            .attach(Box::new(CountingSink(self.consumed.clone())))
            .map_err(|e| GpuError::Endpoint(e.to_string()))?;
        let id = self.next_id;
        self.next_id += 1;
        self.connections.insert(id, endpoint.clone());
        Ok(ConsumerConnection {
            id,
            stream_id: endpoint.stream_id(),
            device_index,
        })
    }

    fn disconnect_consumer(&mut self, connection: &ConsumerConnection) -> GpuResult<()> {
        self.step("disconnect")?;
        let endpoint = self
            .connections
            .remove(&connection.id)
            .ok_or(GpuError::UnknownConnection(connection.id))?;
        endpoint
            .detach()
            .map(drop)
            .map_err(|e| GpuError::Endpoint(e.to_string()))
    }
}

/// Coordinator over fresh mocks sharing `log`, failing the listed operations
pub fn coordinator(log: &CallLog, fail: &[&'static str]) -> LifecycleCoordinator {
    LifecycleCoordinator::new(
        Box::new(MockCamera::new(log.clone(), fail)),
        Box::new(MockGpu::new(log.clone(), fail)),
        CaptureSettings::default(),
    )
}

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}
