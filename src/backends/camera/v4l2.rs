// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera backend
//!
//! Direct Video4Linux2 access through the `v4l` crate:
//! - Devices are capture-capable `/dev/video*` nodes
//! - A session is an exclusive open of the node
//! - An output stream is a fixed format plus memory-mapped buffers
//! - A repeating request is a capture thread dequeuing buffers into the
//!   stream endpoint until its stop flag is raised

use super::endpoint::StreamEndpoint;
use super::types::*;
use super::{CameraStack, RequestControl};
use crate::constants::FRAME_LOG_INTERVAL;
use crate::errors::{BackendError, BackendResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

type SharedStream = Arc<Mutex<Option<MmapStream<'static>>>>;

fn lock_stream(stream: &SharedStream) -> MutexGuard<'_, Option<MmapStream<'static>>> {
    stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct V4l2OutputStream {
    id: u64,
    settings: StreamSettings,
    endpoint: StreamEndpoint,
    stream: SharedStream,
    connected: bool,
}

struct CaptureWorker {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

struct V4l2Session {
    path: String,
    device: Device,
    output: Option<V4l2OutputStream>,
    worker: Option<CaptureWorker>,
}

/// V4L2 camera stack
pub struct V4l2Backend {
    buffer_count: u32,
    next_id: u64,
    sessions: HashMap<u64, V4l2Session>,
    /// Closed session ids by device path, kept until the device is reopened
    closed_sessions: HashMap<u64, String>,
}

impl V4l2Backend {
    pub fn new(buffer_count: u32) -> Self {
        Self {
            buffer_count: buffer_count.max(1),
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

    fn session_mut(&mut self, id: u64) -> BackendResult<&mut V4l2Session> {
        if self.closed_sessions.contains_key(&id) {
            return Err(BackendError::AlreadyReleased(format!("session {}", id)));
        }
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("session {}", id)))
    }
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_BUFFER_COUNT)
    }
}

impl CameraStack for V4l2Backend {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::V4l2
    }

    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(|node| node.index());

        let mut devices = Vec::new();
        for node in nodes {
            let path = node.path().to_string_lossy().to_string();
            let dev = match Device::with_path(node.path()) {
                Ok(dev) => dev,
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping unopenable V4L2 node");
                    continue;
                }
            };
            let caps = match dev.query_caps() {
                Ok(caps) => caps,
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping V4L2 node without capabilities");
                    continue;
                }
            };
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                trace!(path = %path, "Skipping non-capture V4L2 node");
                continue;
            }

            devices.push(CameraDevice {
                name: node.name().unwrap_or_else(|| caps.card.clone()),
                path,
                driver: Some(caps.driver.clone()),
            });
        }

        info!(count = devices.len(), "Enumerated V4L2 capture devices");
        Ok(devices)
    }

    fn sensor_modes(&self, device: &CameraDevice) -> BackendResult<Vec<SensorMode>> {
        let dev = Device::with_path(&device.path)
            .map_err(|e| BackendError::DeviceNotFound(format!("{}: {}", device.path, e)))?;

        let mut modes = Vec::new();
        for desc in dev.enum_formats()? {
            let fourcc = desc.fourcc.to_string();
            let sizes = match dev.enum_framesizes(desc.fourcc) {
                Ok(sizes) => sizes,
                Err(e) => {
                    debug!(fourcc = %fourcc, error = %e, "Failed to enumerate frame sizes");
                    continue;
                }
            };
            for size in sizes {
                let resolution = frame_size_resolution(&size.size);
                let framerate = dev
                    .enum_frameintervals(desc.fourcc, resolution.width, resolution.height)
                    .ok()
                    .and_then(|intervals| intervals.into_iter().next())
                    .and_then(|interval| match interval.interval {
                        v4l::frameinterval::FrameIntervalEnum::Discrete(frac)
                            if frac.numerator > 0 =>
                        {
                            Some(Framerate::new(frac.denominator, frac.numerator))
                        }
                        _ => None,
                    });

                modes.push(SensorMode {
                    resolution,
                    fourcc: fourcc.clone(),
                    framerate,
                });
            }
        }

        debug!(device = %device.name, count = modes.len(), "Enumerated sensor modes");
        Ok(modes)
    }

    fn open_session(&mut self, device: &CameraDevice) -> BackendResult<CaptureSessionHandle> {
        if self
            .sessions
            .values()
            .any(|session| session.path == device.path)
        {
            return Err(BackendError::InvalidState(format!(
                "{} already has an open session",
                device.path
            )));
        }

        let dev = Device::with_path(&device.path)
            .map_err(|e| BackendError::DeviceNotFound(format!("{}: {}", device.path, e)))?;
        self.closed_sessions.retain(|_, path| *path != device.path);
        let id = self.allocate_id();
        self.sessions.insert(
            id,
            V4l2Session {
                path: device.path.clone(),
                device: dev,
                output: None,
                worker: None,
            },
        );
        debug!(session = id, path = %device.path, "V4L2 session opened");
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
        let buffer_count = self.buffer_count;
        let state = self.session_mut(session.id)?;
        if state.output.is_some() {
            return Err(BackendError::InvalidState(
                "V4L2 session supports a single output stream".to_string(),
            ));
        }

        let requested = v4l::FourCC::new(&settings.pixel_format.fourcc());
        let mut format = state.device.format()?;
        format.width = settings.resolution.width;
        format.height = settings.resolution.height;
        format.fourcc = requested;

        let applied = state.device.set_format(&format)?;
        check_applied_format(settings, &applied)?;

        let stream = MmapStream::with_buffers(&mut state.device, Type::VideoCapture, buffer_count)?;
        let endpoint = StreamEndpoint::new(id);
        state.output = Some(V4l2OutputStream {
            id,
            settings: *settings,
            endpoint: endpoint.clone(),
            stream: Arc::new(Mutex::new(Some(stream))),
            connected: true,
        });

        debug!(stream = id, buffers = buffer_count, "V4L2 buffers mapped");
        Ok(OutputStreamHandle {
            id,
            session_id: session.id,
            settings: *settings,
            endpoint,
        })
    }

    fn disconnect_stream(&mut self, stream: &OutputStreamHandle) -> BackendResult<()> {
        let state = self
            .sessions
            .get_mut(&stream.session_id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("session {}", stream.session_id)))?;
        let output = state
            .output
            .as_mut()
            .filter(|output| output.id == stream.id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("stream {}", stream.id)))?;
        if !output.connected {
            return Err(BackendError::AlreadyReleased(format!("stream {}", stream.id)));
        }
        output.connected = false;

        if let Some(mut mapped) = lock_stream(&output.stream).take() {
            if let Err(e) = CaptureStream::stop(&mut mapped) {
                debug!(stream = stream.id, error = %e, "STREAMOFF failed");
            }
        }
        output
            .endpoint
            .close()
            .map_err(|e| BackendError::InvalidState(e.to_string()))?;
        debug!(stream = stream.id, "V4L2 stream disconnected");
        Ok(())
    }

    fn close_session(&mut self, session: &CaptureSessionHandle) -> BackendResult<()> {
        self.session_mut(session.id)?;
        let Some(mut state) = self.sessions.remove(&session.id) else {
            return Err(BackendError::InvalidHandle(format!("session {}", session.id)));
        };
        self.closed_sessions.insert(session.id, state.path.clone());

        if let Some(worker) = state.worker.take() {
            warn!(session = session.id, "Closing session with capture still running");
            stop_worker(worker);
        }
        if let Some(output) = state.output.take().filter(|output| output.connected) {
            warn!(stream = output.id, "Closing session with stream still connected");
            lock_stream(&output.stream).take();
            let _ = output.endpoint.close();
        }
        debug!(session = session.id, "V4L2 session closed");
        Ok(())
    }

    fn request_control(&mut self) -> Option<&mut dyn RequestControl> {
        Some(self)
    }
}

impl RequestControl for V4l2Backend {
    fn create_request(&mut self, session: &CaptureSessionHandle) -> BackendResult<RequestHandle> {
        self.session_mut(session.id)?;
        let id = self.allocate_id();
        Ok(RequestHandle::new(id, session.id))
    }

    fn repeat(
        &mut self,
        session: &CaptureSessionHandle,
        request: &RequestHandle,
    ) -> BackendResult<()> {
        let state = self.session_mut(session.id)?;
        if state.worker.is_some() {
            return Err(BackendError::InvalidState("session is already repeating".to_string()));
        }
        let output = state
            .output
            .as_ref()
            .filter(|output| output.connected && request.enabled_streams().contains(&output.id))
            .ok_or_else(|| BackendError::InvalidState("output stream not ready".to_string()))?;

        match lock_stream(&output.stream).as_mut() {
            Some(mapped) => CaptureStream::start(mapped)?,
            None => return Err(BackendError::InvalidState("stream buffers released".to_string())),
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);
        let shared = Arc::clone(&output.stream);
        let endpoint = output.endpoint.clone();
        let settings = output.settings;
        let thread = thread::Builder::new()
            .name(format!("v4l2-capture-{}", session.id))
            .spawn(move || run_capture_loop(shared, endpoint, settings, thread_stop))
            .map_err(BackendError::from)?;

        state.worker = Some(CaptureWorker {
            stop_flag,
            thread: Some(thread),
        });
        info!(session = session.id, "V4L2 streaming started");
        Ok(())
    }

    fn stop_repeat(&mut self, session: &CaptureSessionHandle) -> BackendResult<()> {
        let state = self.session_mut(session.id)?;
        let worker = state
            .worker
            .as_ref()
            .ok_or_else(|| BackendError::InvalidState("session is not repeating".to_string()))?;
        worker.stop_flag.store(true, Ordering::Release);
        Ok(())
    }

    fn wait_for_idle(&mut self, session: &CaptureSessionHandle) -> BackendResult<()> {
        let state = self.session_mut(session.id)?;
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

impl Drop for V4l2Backend {
    fn drop(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            if let Some(worker) = session.worker.take() {
                stop_worker(worker);
            }
        }
    }
}

/// Resolution a frame size entry contributes as a sensor mode
///
/// Stepwise ranges contribute their largest size.
fn frame_size_resolution(size: &v4l::framesize::FrameSizeEnum) -> Resolution {
    match size {
        v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
            Resolution::new(discrete.width, discrete.height)
        }
        v4l::framesize::FrameSizeEnum::Stepwise(step) => {
            Resolution::new(step.max_width, step.max_height)
        }
    }
}

/// Reject a format the driver substituted for the requested one
fn check_applied_format(settings: &StreamSettings, applied: &v4l::Format) -> BackendResult<()> {
    let requested = v4l::FourCC::new(&settings.pixel_format.fourcc());
    if applied.fourcc != requested
        || applied.width != settings.resolution.width
        || applied.height != settings.resolution.height
    {
        return Err(BackendError::FormatNotSupported(format!(
            "requested {} {}, driver applied {} {}x{}",
            settings.pixel_format,
            settings.resolution,
            applied.fourcc,
            applied.width,
            applied.height
        )));
    }
    Ok(())
}

/// Signal and join a capture thread
fn stop_worker(mut worker: CaptureWorker) {
    worker.stop_flag.store(true, Ordering::Release);
    if let Some(handle) = worker.thread.take() {
        match handle.join() {
            Ok(frames) => debug!(frames, "V4L2 capture thread drained"),
            Err(_) => warn!("V4L2 capture thread panicked"),
        }
    }
}

/// Dequeue buffers and deliver them to the endpoint until stopped
fn run_capture_loop(
    shared: SharedStream,
    endpoint: StreamEndpoint,
    settings: StreamSettings,
    stop_flag: Arc<AtomicBool>,
) -> u64 {
    let start = Instant::now();
    let stride = settings.pixel_format.stride(settings.resolution.width);
    let mut frame_count = 0u64;

    while !stop_flag.load(Ordering::Acquire) {
        let mut guard = lock_stream(&shared);
        let Some(mapped) = guard.as_mut() else {
            debug!("Stream buffers released, ending capture loop");
            break;
        };

        let frame_start = Instant::now();
        let dequeued = match CaptureStream::next(mapped) {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                let used = if used == 0 { buf.len() } else { used };
                let metadata = settings.metadata_enabled.then(|| FrameMetadata {
                    sequence: meta.sequence,
                    timestamp_us: Some(
                        meta.timestamp.sec as u64 * 1_000_000 + meta.timestamp.usec as u64,
                    ),
                    bytes_used: used,
                });
                Ok(CameraFrame {
                    width: settings.resolution.width,
                    height: settings.resolution.height,
                    format: settings.pixel_format,
                    stride,
                    data: Arc::from(&buf[..used]),
                    captured_at: frame_start,
                    metadata,
                })
            }
            Err(e) => Err(e),
        };
        drop(guard);

        let frame = match dequeued {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to dequeue V4L2 buffer");
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        endpoint.deliver(&frame);
        frame_count += 1;

        if frame_count.is_multiple_of(FRAME_LOG_INTERVAL) {
            let fps = frame_count as f64 / start.elapsed().as_secs_f64();
            trace!(frame_count, fps = format!("{:.1}", fps), "Frame captured");
        }
    }

    info!(
        frame_count,
        elapsed_secs = format!("{:.1}", start.elapsed().as_secs_f64()),
        "V4L2 capture loop ended"
    );
    frame_count
}
