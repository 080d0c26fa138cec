// SPDX-License-Identifier: GPL-3.0-only

//! Producer/consumer bridge between an output stream and a GPU context

use super::{ConsumerConnection, GpuContext, GpuStack, ScopedActivation};
use crate::backends::camera::OutputStreamHandle;
use crate::errors::{BridgeError, BridgeResult, GpuResult};
use tracing::{debug, info};

/// Connects GPU contexts to camera output streams
pub struct StreamConsumerBinding<'a> {
    stack: &'a mut dyn GpuStack,
}

impl<'a> StreamConsumerBinding<'a> {
    pub fn new(stack: &'a mut dyn GpuStack) -> Self {
        Self { stack }
    }

    /// Attach `context` as the consumer of `stream`
    ///
    /// The context is current only for the duration of this call.
    pub fn connect(
        &mut self,
        context: &GpuContext,
        stream: &OutputStreamHandle,
    ) -> BridgeResult<ConsumerConnection> {
        let connection = {
            let mut scope = ScopedActivation::push(&mut *self.stack, context)
                .map_err(|e| BridgeError::ConsumerConnect(e.to_string()))?;
            scope.stack().connect_consumer(&stream.endpoint)
        }
        .map_err(|e| BridgeError::ConsumerConnect(e.to_string()))?;

        info!(
            connection = connection.id,
            stream = stream.id,
            device = context.device_index,
            "GPU consumer connected"
        );
        Ok(connection)
    }

    pub fn disconnect(&mut self, connection: &ConsumerConnection) -> GpuResult<()> {
        debug!(connection = connection.id, stream = connection.stream_id, "Disconnecting GPU consumer");
        self.stack.disconnect_consumer(connection)
    }
}
