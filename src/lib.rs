// SPDX-License-Identifier: MPL-2.0

//! Camera Bridge - delivers camera frames to a GPU consumer
//!
//! This library wires a camera capture pipeline to a GPU-side frame consumer
//! and owns the order in which the resources of both stacks are acquired and
//! released.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera stack abstraction (V4L2 and a synthetic camera)
//! - [`gpu`]: GPU stack abstraction and the wgpu frame consumer
//! - [`lifecycle`]: Acquisition sequencing and reverse-order unwind
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let config = Config::load(None)?;
//! let mut coordinator = LifecycleCoordinator::new(
//!     backends::camera::get_backend(&config),
//!     Box::new(WgpuStack::new()),
//!     config.capture_settings(),
//! );
//! let active = coordinator.start()?;
//! println!("Camera resolution: {}", active.resolution);
//! let report = coordinator.shutdown();
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod lifecycle;

// Re-export commonly used types
pub use config::Config;
pub use errors::{BridgeError, ReleaseWarning, ResourceKind};
pub use gpu::WgpuStack;
pub use lifecycle::{
    ActiveStream, CaptureSettings, LifecycleCoordinator, LifecycleState, SetupError,
    ShutdownReport,
};
