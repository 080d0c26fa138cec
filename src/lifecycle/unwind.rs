// SPDX-License-Identifier: GPL-3.0-only

//! Ownership stack of acquired resources

use crate::backends::camera::{CaptureSessionHandle, OutputStreamHandle, RequestHandle};
use crate::errors::{ReleaseWarning, ResourceKind};
use crate::gpu::{ConsumerConnection, GpuContext};

/// A resource the coordinator has acquired and must release
#[derive(Debug, Clone)]
pub enum Acquired {
    Session(CaptureSessionHandle),
    Stream(OutputStreamHandle),
    GpuContext(GpuContext),
    Consumer(ConsumerConnection),
    /// Repeating request and the session it was submitted on
    RepeatingRequest {
        session: CaptureSessionHandle,
        request: RequestHandle,
    },
}

impl Acquired {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Acquired::Session(_) => ResourceKind::CaptureSession,
            Acquired::Stream(_) => ResourceKind::OutputStream,
            Acquired::GpuContext(_) => ResourceKind::GpuContext,
            Acquired::Consumer(_) => ResourceKind::ConsumerConnection,
            Acquired::RepeatingRequest { .. } => ResourceKind::RepeatingRequest,
        }
    }
}

/// Last-in-first-out record of live resources
#[derive(Debug, Default)]
pub struct OwnershipStack {
    entries: Vec<Acquired>,
}

impl OwnershipStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Acquired) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Kinds of the live entries, top of stack last
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.entries.iter().map(Acquired::kind).collect()
    }

    /// Pop and release every entry, most recent first
    ///
    /// A failing release is recorded and the remaining entries are still
    /// released. The stack is empty afterwards.
    pub fn unwind<F>(&mut self, mut release: F) -> Vec<ReleaseWarning>
    where
        F: FnMut(Acquired) -> Result<(), ReleaseWarning>,
    {
        let mut warnings = Vec::new();
        while let Some(entry) = self.entries.pop() {
            if let Err(warning) = release(entry) {
                warnings.push(warning);
            }
        }
        warnings
    }
}
