// SPDX-License-Identifier: GPL-3.0-only

//! GPU context management for frame consumers
//!
//! The GPU/compute stack is reached through the [`GpuStack`] trait. On top of
//! it, [`GpuContextHandle`] retains and releases a device's primary context and
//! [`StreamConsumerBinding`] attaches that context to a camera output stream.
//!
//! Making a context current is always scoped: [`ScopedActivation`] pushes the
//! context on creation and pops it when dropped, including on error paths.

pub mod binding;
pub mod wgpu_stack;

pub use binding::StreamConsumerBinding;
pub use wgpu_stack::{GpuFrame, WgpuStack};

use crate::backends::camera::StreamEndpoint;
use crate::errors::{BridgeError, BridgeResult, GpuResult};
use tracing::{debug, info, warn};

/// An execution context on one GPU device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuContext {
    pub device_index: usize,
    /// Name of the GPU adapter
    pub adapter_name: String,
}

/// A live binding of a GPU context to an output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConnection {
    pub id: u64,
    pub stream_id: u64,
    pub device_index: usize,
}

/// Native GPU/compute primitives
pub trait GpuStack: Send {
    /// Initialize the GPU runtime; process-wide, repeat calls are no-ops
    fn init(&mut self) -> GpuResult<()>;

    /// Number of GPU devices visible to the runtime
    fn device_count(&self) -> GpuResult<usize>;

    /// Retain the primary context of `device_index` (refcount +1)
    fn retain_primary_context(&mut self, device_index: usize) -> GpuResult<GpuContext>;

    /// Release one reference to a retained context
    fn release_primary_context(&mut self, context: &GpuContext) -> GpuResult<()>;

    /// Make `context` current on the calling thread; not reentrant
    fn push_current(&mut self, context: &GpuContext) -> GpuResult<()>;

    /// Restore the calling thread's previous (empty) context
    fn pop_current(&mut self) -> GpuResult<()>;

    /// Attach the current context as the consumer of `endpoint`
    fn connect_consumer(&mut self, endpoint: &StreamEndpoint) -> GpuResult<ConsumerConnection>;

    /// Detach a consumer; fails if its stream was already disconnected
    fn disconnect_consumer(&mut self, connection: &ConsumerConnection) -> GpuResult<()>;
}

/// Acquires and releases refcounted GPU contexts
pub struct GpuContextHandle<'a> {
    stack: &'a mut dyn GpuStack,
}

impl<'a> GpuContextHandle<'a> {
    pub fn new(stack: &'a mut dyn GpuStack) -> Self {
        Self { stack }
    }

    /// Initialize the runtime and retain the context of `device_index`
    pub fn acquire(&mut self, device_index: usize) -> BridgeResult<GpuContext> {
        self.stack
            .init()
            .map_err(|e| BridgeError::GpuInit(e.to_string()))?;

        let count = self
            .stack
            .device_count()
            .map_err(|e| BridgeError::GpuInit(e.to_string()))?;
        if device_index >= count {
            return Err(BridgeError::GpuInit(format!(
                "device index {} out of range ({} devices)",
                device_index, count
            )));
        }

        let context = self
            .stack
            .retain_primary_context(device_index)
            .map_err(|e| BridgeError::GpuInit(e.to_string()))?;
        info!(
            device = device_index,
            adapter = %context.adapter_name,
            "GPU context retained"
        );
        Ok(context)
    }

    /// Release the reference taken by [`Self::acquire`]
    pub fn release(&mut self, context: &GpuContext) -> GpuResult<()> {
        debug!(device = context.device_index, "Releasing GPU context");
        self.stack.release_primary_context(context)
    }
}

/// Context made current for the lifetime of this guard
pub struct ScopedActivation<'a> {
    stack: &'a mut dyn GpuStack,
}

impl<'a> ScopedActivation<'a> {
    pub fn push(stack: &'a mut dyn GpuStack, context: &GpuContext) -> GpuResult<Self> {
        stack.push_current(context)?;
        Ok(Self { stack })
    }

    /// The stack, with the context current
    pub fn stack(&mut self) -> &mut dyn GpuStack {
        &mut *self.stack
    }
}

impl Drop for ScopedActivation<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.stack.pop_current() {
            warn!(error = %e, "Failed to restore GPU context");
        }
    }
}
