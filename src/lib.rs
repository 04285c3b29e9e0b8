// SPDX-License-Identifier: GPL-3.0-only

//! Camera-to-H.264 capture pipeline orchestrator.
//!
//! Drives a source, encoder and preview sink owned by an opaque media core
//! through an asynchronous command protocol: blocking event waits, a port
//! enable/buffer allocation handshake, tunneled data paths and a bounded
//! fill loop that drains the encoder into a [`pipeline::StreamSink`].
//!
//! The crate ships a software core, [`core::virtual_core::VirtualCore`],
//! that emulates the whole protocol so captures can run without hardware.

pub mod component;
pub mod core;
pub mod events;
pub mod flags;
pub mod pipeline;

pub use component::{Component, ComponentError};
pub use events::{EventKind, EventSet};
pub use flags::{EventFlags, WaitError};
pub use pipeline::{CaptureConfig, ComponentNames, PipelineError, RecordingStats};
