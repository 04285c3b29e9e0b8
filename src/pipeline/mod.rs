// SPDX-License-Identifier: GPL-3.0-only

//! Capture pipeline: configuration, stream sinks and the recorder that
//! drives source, encoder and preview sink through the core protocol.

pub mod config;
pub mod recorder;
pub mod sink;

pub use config::{CameraSettings, CaptureConfig, ConfigError, EncoderSettings};
pub use recorder::{ComponentNames, PipelineError, RecordingStats, record};
pub use sink::{FileSink, MemorySink, StreamSink};
