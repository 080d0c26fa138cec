// SPDX-License-Identifier: GPL-3.0-only

//! wgpu implementation of the GPU stack
//!
//! The runtime is a single process-wide `wgpu::Instance`. Each adapter has at
//! most one device/queue pair (its primary context), shared by every caller
//! that retains it and destroyed when the last reference is released.
//!
//! Consumers upload each delivered frame into a storage buffer on the device
//! and hand the result to an optional [`FrameHandler`].

use super::{ConsumerConnection, GpuContext, GpuStack};
use crate::backends::camera::{CameraFrame, FrameSink, PixelFormat, StreamEndpoint};
use crate::errors::{GpuError, GpuResult};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, trace, warn};

static GPU_RUNTIME: OnceLock<wgpu::Instance> = OnceLock::new();
static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Device index of the context current on this thread, per stack
    static CURRENT_CONTEXT: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

fn runtime() -> &'static wgpu::Instance {
    GPU_RUNTIME.get_or_init(|| {
        info!("Initializing GPU runtime");
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    })
}

/// Callback invoked with every frame uploaded to the GPU
pub type FrameHandler = Arc<dyn Fn(&GpuFrame) + Send + Sync>;

/// Frame layout uniform, bound next to the frame buffer
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameHeader {
    width: u32,
    height: u32,
    /// Row stride of the first plane in bytes
    stride: u32,
    /// See [`PixelFormat::gpu_format_code`]
    format: u32,
}

/// A frame resident in GPU memory
#[derive(Debug, Clone)]
pub struct GpuFrame {
    pub buffer: Arc<wgpu::Buffer>,
    pub header: Arc<wgpu::Buffer>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: u32,
    /// Payload size in bytes, before alignment padding
    pub len: usize,
    pub sequence: Option<u32>,
}

/// One retained device/queue pair
struct PrimaryContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
    refcount: usize,
}

/// GPU stack backed by wgpu
pub struct WgpuStack {
    id: u64,
    initialized: bool,
    contexts: HashMap<usize, PrimaryContext>,
    connections: HashMap<u64, StreamEndpoint>,
    next_connection_id: u64,
    frame_handler: Option<FrameHandler>,
}

impl WgpuStack {
    pub fn new() -> Self {
        Self {
            id: NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed),
            initialized: false,
            contexts: HashMap::new(),
            connections: HashMap::new(),
            next_connection_id: 1,
            frame_handler: None,
        }
    }

    /// Receive every frame uploaded by consumers created after this call
    pub fn with_frame_handler(mut self, handler: FrameHandler) -> Self {
        self.frame_handler = Some(handler);
        self
    }

    fn adapters(&self) -> Vec<wgpu::Adapter> {
        runtime().enumerate_adapters(wgpu::Backends::all())
    }

    fn create_primary_context(&self, device_index: usize) -> GpuResult<PrimaryContext> {
        let adapter = self
            .adapters()
            .into_iter()
            .nth(device_index)
            .ok_or(GpuError::NoSuchDevice(device_index))?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            device = device_index,
            "Creating primary GPU context"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("camera-bridge consumer"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| GpuError::ContextCreation(e.to_string()))?;

        Ok(PrimaryContext {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name: adapter_info.name,
            refcount: 0,
        })
    }
}

impl Default for WgpuStack {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuStack for WgpuStack {
    fn init(&mut self) -> GpuResult<()> {
        if !self.initialized {
            runtime();
            self.initialized = true;
        }
        Ok(())
    }

    fn device_count(&self) -> GpuResult<usize> {
        if !self.initialized {
            return Err(GpuError::RuntimeUnavailable(
                "GPU runtime not initialized".to_string(),
            ));
        }
        Ok(self.adapters().len())
    }

    fn retain_primary_context(&mut self, device_index: usize) -> GpuResult<GpuContext> {
        if !self.contexts.contains_key(&device_index) {
            let context = self.create_primary_context(device_index)?;
            self.contexts.insert(device_index, context);
        }
        let primary = self
            .contexts
            .get_mut(&device_index)
            .ok_or(GpuError::NotRetained(device_index))?;
        primary.refcount += 1;
        debug!(device = device_index, refcount = primary.refcount, "Primary context retained");

        Ok(GpuContext {
            device_index,
            adapter_name: primary.adapter_name.clone(),
        })
    }

    fn release_primary_context(&mut self, context: &GpuContext) -> GpuResult<()> {
        let primary = self
            .contexts
            .get_mut(&context.device_index)
            .ok_or(GpuError::NotRetained(context.device_index))?;
        primary.refcount -= 1;
        debug!(
            device = context.device_index,
            refcount = primary.refcount,
            "Primary context released"
        );

        if primary.refcount == 0 {
            self.contexts.remove(&context.device_index);
            info!(device = context.device_index, "Primary GPU context destroyed");
        }
        Ok(())
    }

    fn push_current(&mut self, context: &GpuContext) -> GpuResult<()> {
        if !self.contexts.contains_key(&context.device_index) {
            return Err(GpuError::NotRetained(context.device_index));
        }
        CURRENT_CONTEXT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(active) = current.get(&self.id) {
                return Err(GpuError::Activation(format!(
                    "context for device {} is already current on this thread",
                    active
                )));
            }
            current.insert(self.id, context.device_index);
            trace!(device = context.device_index, "Context pushed");
            Ok(())
        })
    }

    fn pop_current(&mut self) -> GpuResult<()> {
        CURRENT_CONTEXT.with(|current| match current.borrow_mut().remove(&self.id) {
            Some(device_index) => {
                trace!(device = device_index, "Context popped");
                Ok(())
            }
            None => Err(GpuError::Activation(
                "no context is current on this thread".to_string(),
            )),
        })
    }

    fn connect_consumer(&mut self, endpoint: &StreamEndpoint) -> GpuResult<ConsumerConnection> {
        let device_index = CURRENT_CONTEXT
            .with(|current| current.borrow().get(&self.id).copied())
            .ok_or_else(|| {
                GpuError::Activation("no context is current on this thread".to_string())
            })?;
        let primary = self
            .contexts
            .get(&device_index)
            .ok_or(GpuError::NotRetained(device_index))?;

        let consumer = GpuFrameConsumer::new(
            Arc::clone(&primary.device),
            Arc::clone(&primary.queue),
            self.frame_handler.clone(),
        );
        endpoint
            .attach(Box::new(consumer))
            .map_err(|e| GpuError::Endpoint(e.to_string()))?;

        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.insert(id, endpoint.clone());

        Ok(ConsumerConnection {
            id,
            stream_id: endpoint.stream_id(),
            device_index,
        })
    }

    fn disconnect_consumer(&mut self, connection: &ConsumerConnection) -> GpuResult<()> {
        let endpoint = self
            .connections
            .remove(&connection.id)
            .ok_or(GpuError::UnknownConnection(connection.id))?;
        let consumer = endpoint
            .detach()
            .map_err(|e| GpuError::Endpoint(e.to_string()))?;
        drop(consumer);
        debug!(connection = connection.id, "Consumer detached");
        Ok(())
    }
}

/// Uploads delivered frames into device memory
struct GpuFrameConsumer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    frame_buffer: Option<Arc<wgpu::Buffer>>,
    header_buffer: Arc<wgpu::Buffer>,
    handler: Option<FrameHandler>,
    uploaded: u64,
}

impl GpuFrameConsumer {
    fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        handler: Option<FrameHandler>,
    ) -> Self {
        let header_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("camera-bridge frame header"),
            size: std::mem::size_of::<FrameHeader>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            device,
            queue,
            frame_buffer: None,
            header_buffer: Arc::new(header_buffer),
            handler,
            uploaded: 0,
        }
    }

    /// Frame buffer of at least `size` bytes, reallocated when the size changes
    fn frame_buffer(&mut self, size: u64) -> Arc<wgpu::Buffer> {
        match &self.frame_buffer {
            Some(buffer) if buffer.size() == size => Arc::clone(buffer),
            _ => {
                debug!(size, "Allocating GPU frame buffer");
                let buffer = Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("camera-bridge frame buffer"),
                    size,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                }));
                self.frame_buffer = Some(Arc::clone(&buffer));
                buffer
            }
        }
    }
}

impl FrameSink for GpuFrameConsumer {
    fn consume(&mut self, frame: &CameraFrame) {
        if frame.data.is_empty() {
            warn!("Skipping empty frame");
            return;
        }

        let len = frame.data.len();
        let size = wgpu::util::align_to(len as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.frame_buffer(size);

        if size as usize == len {
            self.queue.write_buffer(&buffer, 0, &frame.data);
        } else {
            let mut padded = Vec::with_capacity(size as usize);
            padded.extend_from_slice(&frame.data);
            padded.resize(size as usize, 0);
            self.queue.write_buffer(&buffer, 0, &padded);
        }

        let header = FrameHeader {
            width: frame.width,
            height: frame.height,
            stride: frame.stride,
            format: frame.format.gpu_format_code(),
        };
        self.queue
            .write_buffer(&self.header_buffer, 0, bytemuck::cast_slice(&[header]));
        self.queue.submit(std::iter::empty());
        self.uploaded += 1;

        if let Some(handler) = &self.handler {
            handler(&GpuFrame {
                buffer,
                header: Arc::clone(&self.header_buffer),
                width: frame.width,
                height: frame.height,
                format: frame.format,
                stride: frame.stride,
                len,
                sequence: frame.metadata.as_ref().map(|m| m.sequence),
            });
        }
    }
}

impl Drop for GpuFrameConsumer {
    fn drop(&mut self) {
        debug!(frames = self.uploaded, "GPU frame consumer dropped");
    }
}
