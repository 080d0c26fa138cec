// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera backend
//!
//! A synthetic sensor that needs no hardware. Each configured device reports
//! its modes in config order and, once a repeating request is running,
//! renders a moving test pattern into every enabled stream from a dedicated
//! capture thread.

use super::endpoint::StreamEndpoint;
use super::types::*;
use super::{CameraStack, RequestControl};
use crate::constants::DEFAULT_VIRTUAL_FRAMERATE;
use crate::errors::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Path prefix of synthetic devices
const VIRTUAL_PATH_PREFIX: &str = "virtual:";

/// One synthetic device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    pub name: String,
    /// Sensor modes in reported order
    pub modes: Vec<Resolution>,
}

/// Settings of the synthetic camera stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualCameraConfig {
    pub devices: Vec<VirtualDeviceConfig>,
    pub framerate: u32,
}

impl Default for VirtualCameraConfig {
    fn default() -> Self {
        Self {
            devices: vec![VirtualDeviceConfig {
                name: "Virtual Test Pattern".to_string(),
                modes: vec![
                    Resolution::new(1920, 1080),
                    Resolution::new(1280, 720),
                    Resolution::new(640, 480),
                ],
            }],
            framerate: DEFAULT_VIRTUAL_FRAMERATE,
        }
    }
}

struct VirtualStream {
    settings: StreamSettings,
    endpoint: StreamEndpoint,
    connected: bool,
}

/// Running capture thread of a session
struct CaptureWorker {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

struct VirtualSession {
    device_index: usize,
    streams: HashMap<u64, VirtualStream>,
    worker: Option<CaptureWorker>,
}

/// Synthetic camera stack
pub struct VirtualCamera {
    config: VirtualCameraConfig,
    next_id: u64,
    sessions: HashMap<u64, VirtualSession>,
    /// Closed session ids by device index, kept until the device is reopened
    closed_sessions: HashMap<u64, usize>,
}

impl VirtualCamera {
    pub fn new(config: VirtualCameraConfig) -> Self {
        info!(devices = config.devices.len(), fps = config.framerate, "Creating virtual camera stack");
        Self {
            config,
            next_id: 1,
            sessions: HashMap::new(),
            closed_sessions: HashMap::new(),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn device_index(&self, device: &CameraDevice) -> BackendResult<usize> {
        device
            .path
            .strip_prefix(VIRTUAL_PATH_PREFIX)
            .and_then(|index| index.parse::<usize>().ok())
            .filter(|index| *index < self.config.devices.len())
            .ok_or_else(|| BackendError::DeviceNotFound(device.path.clone()))
    }

    fn session_mut(&mut self, session: &CaptureSessionHandle) -> BackendResult<&mut VirtualSession> {
        if self.closed_sessions.contains_key(&session.id) {
            return Err(BackendError::AlreadyReleased(format!("session {}", session.id)));
        }
        self.sessions
            .get_mut(&session.id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("session {}", session.id)))
    }
}

impl CameraStack for VirtualCamera {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::Virtual
    }

    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        Ok(self
            .config
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| CameraDevice {
                name: device.name.clone(),
                path: format!("{}{}", VIRTUAL_PATH_PREFIX, index),
                driver: Some("virtual".to_string()),
            })
            .collect())
    }

    fn sensor_modes(&self, device: &CameraDevice) -> BackendResult<Vec<SensorMode>> {
        let index = self.device_index(device)?;
        let framerate = Framerate::from_int(self.config.framerate);
        Ok(self.config.devices[index]
            .modes
            .iter()
            .map(|resolution| SensorMode {
                resolution: *resolution,
                fourcc: PixelFormat::NV12.to_string(),
                framerate: Some(framerate),
            })
            .collect())
    }

    fn open_session(&mut self, device: &CameraDevice) -> BackendResult<CaptureSessionHandle> {
        let device_index = self.device_index(device)?;
        if self
            .sessions
            .values()
            .any(|session| session.device_index == device_index)
        {
            return Err(BackendError::InvalidState(format!(
                "{} already has an open session",
                device.name
            )));
        }

        self.closed_sessions.retain(|_, index| *index != device_index);
        let id = self.allocate_id();
        self.sessions.insert(
            id,
            VirtualSession {
                device_index,
                streams: HashMap::new(),
                worker: None,
            },
        );
        debug!(session = id, device = %device.name, "Virtual session opened");
        Ok(CaptureSessionHandle {
            id,
            device: device.clone(),
        })
    }

    fn create_output_stream(
        &mut self,
        session: &CaptureSessionHandle,
        settings: &StreamSettings,
    ) -> BackendResult<OutputStreamHandle> {
        let id = self.allocate_id();
        let device_index = self.session_mut(session)?.device_index;
        if !self.config.devices[device_index]
            .modes
            .contains(&settings.resolution)
        {
            return Err(BackendError::FormatNotSupported(format!(
                "{} is not a mode of {}",
                settings.resolution, session.device.name
            )));
        }

        let endpoint = StreamEndpoint::new(id);
        self.session_mut(session)?.streams.insert(
            id,
            VirtualStream {
                settings: *settings,
                endpoint: endpoint.clone(),
                connected: true,
            },
        );
        Ok(OutputStreamHandle {
            id,
            session_id: session.id,
            settings: *settings,
            endpoint,
        })
    }

    fn disconnect_stream(&mut self, stream: &OutputStreamHandle) -> BackendResult<()> {
        let session = self
            .sessions
            .get_mut(&stream.session_id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("session {}", stream.session_id)))?;
        let entry = session
            .streams
            .get_mut(&stream.id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("stream {}", stream.id)))?;
        if !entry.connected {
            return Err(BackendError::AlreadyReleased(format!("stream {}", stream.id)));
        }
        entry.connected = false;
        entry
            .endpoint
            .close()
            .map_err(|e| BackendError::InvalidState(e.to_string()))?;
        debug!(stream = stream.id, "Virtual stream disconnected");
        Ok(())
    }

    fn close_session(&mut self, session: &CaptureSessionHandle) -> BackendResult<()> {
        self.session_mut(session)?;
        let Some(mut state) = self.sessions.remove(&session.id) else {
            return Err(BackendError::InvalidHandle(format!("session {}", session.id)));
        };
        self.closed_sessions.insert(session.id, state.device_index);

        if let Some(worker) = state.worker.take() {
            warn!(session = session.id, "Closing session with capture still running");
            stop_worker(worker);
        }
        for stream in state.streams.values().filter(|s| s.connected) {
            warn!(stream = stream.endpoint.stream_id(), "Closing session with stream still connected");
            let _ = stream.endpoint.close();
        }
        debug!(session = session.id, "Virtual session closed");
        Ok(())
    }

    fn request_control(&mut self) -> Option<&mut dyn RequestControl> {
        Some(self)
    }
}

impl RequestControl for VirtualCamera {
    fn create_request(&mut self, session: &CaptureSessionHandle) -> BackendResult<RequestHandle> {
        self.session_mut(session)?;
        let id = self.allocate_id();
        Ok(RequestHandle::new(id, session.id))
    }

    fn repeat(
        &mut self,
        session: &CaptureSessionHandle,
        request: &RequestHandle,
    ) -> BackendResult<()> {
        let framerate = Framerate::from_int(self.config.framerate);
        let state = self.session_mut(session)?;
        if state.worker.is_some() {
            return Err(BackendError::InvalidState("session is already repeating".to_string()));
        }

        let mut targets = Vec::with_capacity(request.enabled_streams().len());
        for stream_id in request.enabled_streams() {
            let stream = state
                .streams
                .get(stream_id)
                .filter(|s| s.connected)
                .ok_or_else(|| BackendError::InvalidState(format!("stream {} not ready", stream_id)))?;
            targets.push((stream.settings, stream.endpoint.clone()));
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);
        let thread = thread::Builder::new()
            .name(format!("virtual-capture-{}", session.id))
            .spawn(move || run_pattern_loop(targets, framerate, thread_stop))
            .map_err(BackendError::from)?;

        state.worker = Some(CaptureWorker {
            stop_flag,
            thread: Some(thread),
        });
        Ok(())
    }

    fn stop_repeat(&mut self, session: &CaptureSessionHandle) -> BackendResult<()> {
        let state = self.session_mut(session)?;
        let worker = state
            .worker
            .as_ref()
            .ok_or_else(|| BackendError::InvalidState("session is not repeating".to_string()))?;
        worker.stop_flag.store(true, Ordering::Release);
        Ok(())
    }

    fn wait_for_idle(&mut self, session: &CaptureSessionHandle) -> BackendResult<()> {
        let state = self.session_mut(session)?;
        let Some(worker) = state.worker.as_ref() else {
            return Ok(());
        };
        if !worker.stop_flag.load(Ordering::Acquire) {
            return Err(BackendError::InvalidState(
                "repeating request still active".to_string(),
            ));
        }
        if let Some(worker) = state.worker.take() {
            stop_worker(worker);
        }
        Ok(())
    }
}

impl Drop for VirtualCamera {
    fn drop(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            if let Some(worker) = session.worker.take() {
                stop_worker(worker);
            }
        }
    }
}

/// Signal and join a capture thread
fn stop_worker(mut worker: CaptureWorker) {
    worker.stop_flag.store(true, Ordering::Release);
    if let Some(handle) = worker.thread.take() {
        match handle.join() {
            Ok(frames) => debug!(frames, "Virtual capture thread drained"),
            Err(_) => warn!("Virtual capture thread panicked"),
        }
    }
}

/// Render frames into every target endpoint until stopped
fn run_pattern_loop(
    targets: Vec<(StreamSettings, StreamEndpoint)>,
    framerate: Framerate,
    stop_flag: Arc<AtomicBool>,
) -> u64 {
    let interval = framerate.frame_interval();
    let start = Instant::now();
    let mut sequence = 0u32;

    while !stop_flag.load(Ordering::Acquire) {
        let frame_start = Instant::now();
        for (settings, endpoint) in &targets {
            let frame = render_test_pattern(settings, sequence, start);
            endpoint.deliver(&frame);
        }
        sequence = sequence.wrapping_add(1);

        if let Some(remaining) = interval.checked_sub(frame_start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    debug!(frames = sequence, "Virtual capture loop ended");
    sequence as u64
}

/// Diagonal luma gradient scrolling by one pixel per frame, neutral chroma
fn render_test_pattern(settings: &StreamSettings, sequence: u32, start: Instant) -> CameraFrame {
    let resolution = settings.resolution;
    let format = settings.pixel_format;
    let stride = format.stride(resolution.width);
    let size = format.frame_size(resolution);
    let first_plane = (stride as usize * resolution.height as usize).min(size);

    let mut data = vec![128u8; size];
    for (row, line) in data[..first_plane]
        .chunks_mut(stride.max(1) as usize)
        .enumerate()
    {
        for (col, byte) in line.iter_mut().enumerate() {
            *byte = (row + col + sequence as usize) as u8;
        }
    }

    let metadata = settings.metadata_enabled.then(|| FrameMetadata {
        sequence,
        timestamp_us: Some(start.elapsed().as_micros() as u64),
        bytes_used: size,
    });

    CameraFrame {
        width: resolution.width,
        height: resolution.height,
        format,
        stride,
        data: Arc::from(data.into_boxed_slice()),
        captured_at: Instant::now(),
        metadata,
    }
}
