// SPDX-License-Identifier: GPL-3.0-only

//! Producer/consumer interop object for output streams
//!
//! A [`StreamEndpoint`] is created together with its output stream and shared
//! (by clone) between the camera stack's capture thread, which delivers frames
//! into it, and the GPU stack, which attaches a single [`FrameSink`].
//!
//! ```text
//! ┌──────────────────┐  deliver   ┌────────────────┐  consume  ┌──────────────┐
//! │  Capture thread  │ ─────────► │ StreamEndpoint │ ────────► │  FrameSink   │
//! │  (camera stack)  │            │  (one slot)    │           │ (GPU stack)  │
//! └──────────────────┘            └────────────────┘           └──────────────┘
//! ```

use super::types::CameraFrame;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Receives frames from an output stream
pub trait FrameSink: Send {
    fn consume(&mut self, frame: &CameraFrame);
}

/// Endpoint misuse reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointError {
    /// Stream was already disconnected
    Closed,
    /// Another consumer is attached
    Occupied,
    /// No consumer is attached
    NoConsumer,
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointError::Closed => write!(f, "stream is disconnected"),
            EndpointError::Occupied => write!(f, "stream already has a consumer"),
            EndpointError::NoConsumer => write!(f, "stream has no consumer"),
        }
    }
}

impl std::error::Error for EndpointError {}

struct EndpointState {
    open: bool,
    consumer: Option<Box<dyn FrameSink>>,
    delivered: u64,
    dropped: u64,
}

/// Shared frame-delivery slot of one output stream
#[derive(Clone)]
pub struct StreamEndpoint {
    stream_id: u64,
    state: Arc<Mutex<EndpointState>>,
}

impl StreamEndpoint {
    pub fn new(stream_id: u64) -> Self {
        Self {
            stream_id,
            state: Arc::new(Mutex::new(EndpointState {
                open: true,
                consumer: None,
                delivered: 0,
                dropped: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        // A panicking sink must not wedge teardown
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Attach the single consumer of this stream
    pub fn attach(&self, sink: Box<dyn FrameSink>) -> Result<(), EndpointError> {
        let mut state = self.lock();
        if !state.open {
            return Err(EndpointError::Closed);
        }
        if state.consumer.is_some() {
            return Err(EndpointError::Occupied);
        }
        state.consumer = Some(sink);
        debug!(stream = self.stream_id, "Consumer attached to stream endpoint");
        Ok(())
    }

    /// Detach and return the consumer
    pub fn detach(&self) -> Result<Box<dyn FrameSink>, EndpointError> {
        let mut state = self.lock();
        if !state.open {
            return Err(EndpointError::Closed);
        }
        let sink = state.consumer.take().ok_or(EndpointError::NoConsumer)?;
        debug!(stream = self.stream_id, "Consumer detached from stream endpoint");
        Ok(sink)
    }

    /// Hand a frame to the consumer; returns false if it was dropped
    pub fn deliver(&self, frame: &CameraFrame) -> bool {
        let mut state = self.lock();
        if !state.open {
            return false;
        }
        match state.consumer.as_mut() {
            Some(sink) => {
                sink.consume(frame);
                state.delivered += 1;
                true
            }
            None => {
                state.dropped += 1;
                if state.dropped == 1 || state.dropped.is_multiple_of(30) {
                    warn!(
                        stream = self.stream_id,
                        dropped = state.dropped,
                        "Frame produced with no consumer attached"
                    );
                }
                false
            }
        }
    }

    /// Close the endpoint; single-shot
    pub fn close(&self) -> Result<(), EndpointError> {
        let mut state = self.lock();
        if !state.open {
            return Err(EndpointError::Closed);
        }
        state.open = false;
        if state.consumer.take().is_some() {
            error!(
                stream = self.stream_id,
                "Stream endpoint closed while a consumer was still attached"
            );
        }
        debug!(
            stream = self.stream_id,
            delivered = state.delivered,
            dropped = state.dropped,
            "Stream endpoint closed"
        );
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn has_consumer(&self) -> bool {
        self.lock().consumer.is_some()
    }

    pub fn delivered_frames(&self) -> u64 {
        self.lock().delivered
    }

    pub fn dropped_frames(&self) -> u64 {
        self.lock().dropped
    }
}

impl std::fmt::Debug for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("StreamEndpoint")
            .field("stream_id", &self.stream_id)
            .field("open", &state.open)
            .field("has_consumer", &state.consumer.is_some())
            .field("delivered", &state.delivered)
            .field("dropped", &state.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::PixelFormat;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    struct CountingSink(Arc<AtomicU64>);

    impl FrameSink for CountingSink {
        fn consume(&mut self, _frame: &CameraFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame() -> CameraFrame {
        CameraFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Gray8,
            stride: 2,
            data: Arc::from(vec![0u8; 4].into_boxed_slice()),
            captured_at: Instant::now(),
            metadata: None,
        }
    }

    #[test]
    fn test_single_consumer() {
        let endpoint = StreamEndpoint::new(1);
        let count = Arc::new(AtomicU64::new(0));
        endpoint.attach(Box::new(CountingSink(count.clone()))).unwrap();
        assert_eq!(
            endpoint.attach(Box::new(CountingSink(count.clone()))).err(),
            Some(EndpointError::Occupied)
        );

        assert!(endpoint.deliver(&frame()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_frames_without_consumer_are_dropped() {
        let endpoint = StreamEndpoint::new(1);
        assert!(!endpoint.deliver(&frame()));
        assert_eq!(endpoint.dropped_frames(), 1);
        assert_eq!(endpoint.delivered_frames(), 0);
    }

    #[test]
    fn test_close_is_single_shot() {
        let endpoint = StreamEndpoint::new(3);
        let clone = endpoint.clone();
        endpoint.close().unwrap();
        assert_eq!(clone.close(), Err(EndpointError::Closed));
        assert!(!clone.is_open());
        assert_eq!(clone.detach().err(), Some(EndpointError::Closed));
        assert_eq!(
            clone
                .attach(Box::new(CountingSink(Arc::new(AtomicU64::new(0)))))
                .err(),
            Some(EndpointError::Closed)
        );
    }
}
