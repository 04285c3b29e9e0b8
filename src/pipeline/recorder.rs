// SPDX-License-Identifier: GPL-3.0-only

//! The capture orchestrator.
//!
//! Drives source, encoder and preview sink through the full protocol: driver
//! load, port configuration, tunneling, the Loaded/Idle/Executing ladder,
//! the bounded fill loop and the mirror-image teardown. Every step blocks on
//! the completion event of the command it issued; an asynchronous error in
//! place of a completion aborts the capture and dismantles whatever part of
//! the pipeline was already standing.

use crate::component::{Component, ComponentError};
use crate::core::{
    ColorFormat, CompressionFormat, Config, ConfigQuery, MediaCore, OutputBuffer, Parameter,
    WatchedParam, WhiteBalanceMode,
};
use crate::events::EventKind;
use crate::pipeline::config::{CameraSettings, CaptureConfig, ConfigError, EncoderSettings};
use crate::pipeline::sink::StreamSink;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Camera output tunneled to the preview sink; must stay connected while
/// capturing because exposure and white balance control run off it.
pub const CAMERA_PREVIEW_PORT: u32 = 70;
/// Camera output tunneled to the encoder input.
pub const CAMERA_VIDEO_PORT: u32 = 71;
pub const ENCODER_INPUT_PORT: u32 = 200;
/// Encoder output; the only non-tunneled port, drained through the fill loop.
pub const ENCODER_OUTPUT_PORT: u32 = 201;
pub const SINK_VIDEO_PORT: u32 = 240;

/// Core component names forming the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentNames {
    pub source: String,
    pub encoder: String,
    pub sink: String,
}

impl ComponentNames {
    pub fn new(source: &str, encoder: &str, sink: &str) -> Self {
        Self {
            source: source.to_string(),
            encoder: encoder.to_string(),
            sink: sink.to_string(),
        }
    }
}

impl Default for ComponentNames {
    fn default() -> Self {
        Self::new("camera", "video_encode", "null_sink")
    }
}

/// Failure of a capture run.
#[derive(Debug)]
pub enum PipelineError {
    /// A component operation failed; the pipeline was dismantled best-effort.
    Component {
        component: String,
        source: ComponentError,
    },
    Config(ConfigError),
    Sink(io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Component { component, source } => {
                write!(f, "component {}: {}", component, source)
            }
            PipelineError::Config(err) => err.fmt(f),
            PipelineError::Sink(err) => write!(f, "sink: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Component { source, .. } => Some(source),
            PipelineError::Config(err) => Some(err),
            PipelineError::Sink(err) => Some(err),
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Config(err)
    }
}

fn at<T>(component: &str, result: Result<T, ComponentError>) -> Result<T, PipelineError> {
    result.map_err(|source| PipelineError::Component {
        component: component.to_string(),
        source,
    })
}

/// Totals of one finished capture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingStats {
    /// Filled buffers written to the sink, codec setup data included
    pub payloads: u64,
    pub bytes: u64,
}

/// Run one capture: bring the pipeline up, drain the encoder into `sink`
/// until `duration` elapses or `stop` is raised, then tear everything down.
///
/// The fill loop always completes at least one round trip, so a zero
/// duration records a single payload. On error the pipeline is dismantled
/// from whatever stage it reached and the error is returned.
pub fn record(
    core: Arc<dyn MediaCore>,
    names: &ComponentNames,
    config: &CaptureConfig,
    sink: &mut dyn StreamSink,
    duration: Duration,
    stop: &AtomicBool,
) -> Result<RecordingStats, PipelineError> {
    config.validate()?;

    let mut pipeline = Pipeline::acquire(core, names)?;
    let outcome = match pipeline.capture(config, sink, duration, stop) {
        Ok(stats) => pipeline.wind_down(false).map(|()| stats),
        Err(err) => Err(err),
    };
    match outcome {
        Ok(stats) => {
            pipeline.release_all(false)?;
            sink.finish().map_err(PipelineError::Sink)?;
            info!(payloads = stats.payloads, bytes = stats.bytes, "capture finished");
            Ok(stats)
        }
        Err(err) => {
            warn!(error = %err, "capture failed, dismantling pipeline");
            // Finish dismantling whatever the graceful path left standing.
            let _ = pipeline.wind_down(true);
            if let Err(release) = pipeline.release_all(true) {
                warn!(error = %release, "handle release incomplete");
            }
            Err(err)
        }
    }
}

struct Pipeline {
    source: Component,
    encoder: Component,
    sink: Component,
    output_buffer: Option<Arc<OutputBuffer>>,
    ports_enabled: bool,
    executing: bool,
    capturing: bool,
}

impl Pipeline {
    /// Acquire the three components. Each acquisition leaves every port of
    /// the component disabled. Handles already taken are released if a later
    /// acquisition fails.
    fn acquire(core: Arc<dyn MediaCore>, names: &ComponentNames) -> Result<Self, PipelineError> {
        info!(
            source = %names.source,
            encoder = %names.encoder,
            sink = %names.sink,
            "acquiring components"
        );
        let source = at(&names.source, Component::acquire(Arc::clone(&core), &names.source))?;
        let encoder = match Component::acquire(Arc::clone(&core), &names.encoder) {
            Ok(encoder) => encoder,
            Err(source_err) => {
                let _ = source.release();
                return Err(PipelineError::Component {
                    component: names.encoder.clone(),
                    source: source_err,
                });
            }
        };
        let sink = match Component::acquire(core, &names.sink) {
            Ok(sink) => sink,
            Err(source_err) => {
                let _ = source.release();
                let _ = encoder.release();
                return Err(PipelineError::Component {
                    component: names.sink.clone(),
                    source: source_err,
                });
            }
        };
        Ok(Self {
            source,
            encoder,
            sink,
            output_buffer: None,
            ports_enabled: false,
            executing: false,
            capturing: false,
        })
    }

    fn capture(
        &mut self,
        config: &CaptureConfig,
        sink: &mut dyn StreamSink,
        duration: Duration,
        stop: &AtomicBool,
    ) -> Result<RecordingStats, PipelineError> {
        at(
            self.source.name(),
            load_camera_drivers(&self.source, config.camera.device_number),
        )?;
        at(
            self.source.name(),
            configure_source(&self.source, &config.camera),
        )?;
        at(
            self.encoder.name(),
            configure_encoder(&self.encoder, &config.camera, &config.encoder),
        )?;
        self.establish_tunnels()?;
        self.to_idle()?;
        let buffer = self.enable_ports()?;
        self.to_executing()?;
        self.start_capture()?;
        self.fill_loop(&buffer, sink, duration, stop)
    }

    fn establish_tunnels(&self) -> Result<(), PipelineError> {
        info!("establishing tunnels");
        at(
            self.source.name(),
            self.source
                .tunnel_to(CAMERA_VIDEO_PORT, &self.encoder, ENCODER_INPUT_PORT),
        )?;
        at(
            self.source.name(),
            self.source
                .tunnel_to(CAMERA_PREVIEW_PORT, &self.sink, SINK_VIDEO_PORT),
        )?;
        Ok(())
    }

    fn to_idle(&self) -> Result<(), PipelineError> {
        use crate::core::LifecycleState::Idle;
        at(self.source.name(), self.source.request_state(Idle))?;
        at(self.encoder.name(), self.encoder.request_state(Idle))?;
        at(self.sink.name(), self.sink.request_state(Idle))?;
        Ok(())
    }

    /// Enable the tunneled ports, then the encoder output. The output
    /// enable only completes once its buffer is allocated.
    fn enable_ports(&mut self) -> Result<Arc<OutputBuffer>, PipelineError> {
        at(self.source.name(), self.source.enable_port(CAMERA_VIDEO_PORT))?;
        at(
            self.source.name(),
            self.source.enable_port(CAMERA_PREVIEW_PORT),
        )?;
        at(self.sink.name(), self.sink.enable_port(SINK_VIDEO_PORT))?;
        at(
            self.encoder.name(),
            self.encoder.enable_port(ENCODER_INPUT_PORT),
        )?;

        at(
            self.encoder.name(),
            self.encoder.send_enable_port(ENCODER_OUTPUT_PORT),
        )?;
        let buffer = at(
            self.encoder.name(),
            self.encoder.allocate_output_buffer(ENCODER_OUTPUT_PORT),
        )?;
        // Keep the buffer reachable for teardown before blocking again.
        self.output_buffer = Some(Arc::clone(&buffer));
        at(
            self.encoder.name(),
            self.encoder
                .wait_for(EventKind::PortEnabled)
                .map_err(ComponentError::from)
                .map(|_| ()),
        )?;
        self.ports_enabled = true;
        Ok(buffer)
    }

    fn to_executing(&mut self) -> Result<(), PipelineError> {
        use crate::core::LifecycleState::Executing;
        at(self.source.name(), self.source.request_state(Executing))?;
        at(self.encoder.name(), self.encoder.request_state(Executing))?;
        // The encoder announces its negotiated output settings once running.
        at(
            self.encoder.name(),
            self.encoder
                .wait_for(EventKind::PortSettingsChanged)
                .map_err(ComponentError::from)
                .map(|_| ()),
        )?;
        at(self.sink.name(), self.sink.request_state(Executing))?;
        self.executing = true;
        info!("pipeline executing");
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), PipelineError> {
        at(
            self.source.name(),
            self.source.set_config(Config::Capturing {
                port: CAMERA_VIDEO_PORT,
                enabled: true,
            }),
        )?;
        self.capturing = true;
        info!(port = CAMERA_VIDEO_PORT, "capture started");
        Ok(())
    }

    fn fill_loop(
        &self,
        buffer: &Arc<OutputBuffer>,
        sink: &mut dyn StreamSink,
        duration: Duration,
        stop: &AtomicBool,
    ) -> Result<RecordingStats, PipelineError> {
        let deadline = Instant::now() + duration;
        let mut stats = RecordingStats::default();
        loop {
            at(
                self.encoder.name(),
                self.encoder.fill_buffer(Arc::clone(buffer)),
            )?;
            at(
                self.encoder.name(),
                self.encoder
                    .wait_for(EventKind::FillBufferDone)
                    .map_err(ComponentError::from)
                    .map(|_| ()),
            )?;

            let written = buffer.with_payload(|payload, meta| {
                sink.write(payload, meta).map(|()| payload.len())
            });
            let bytes = written.map_err(PipelineError::Sink)?;
            stats.payloads += 1;
            stats.bytes += bytes as u64;
            debug!(bytes, "payload written");

            if stop.load(Ordering::Relaxed) || Instant::now() >= deadline {
                break;
            }
        }
        Ok(stats)
    }

    /// Teardown mirror of the bring-up: stop capture, drop to Idle, disable
    /// ports, free the output buffer, drop to Loaded.
    ///
    /// With `best_effort` every failing step is logged and skipped so later
    /// steps still run; otherwise the first failure is returned.
    fn wind_down(&mut self, best_effort: bool) -> Result<(), PipelineError> {
        check(best_effort, self.stop_capture())?;
        check(best_effort, self.to_idle_down())?;
        check(best_effort, self.disable_ports())?;
        check(best_effort, self.to_loaded())?;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), PipelineError> {
        if !self.capturing {
            return Ok(());
        }
        self.capturing = false;
        at(
            self.source.name(),
            self.source.set_config(Config::Capturing {
                port: CAMERA_VIDEO_PORT,
                enabled: false,
            }),
        )?;
        info!(port = CAMERA_VIDEO_PORT, "capture stopped");
        Ok(())
    }

    fn to_idle_down(&mut self) -> Result<(), PipelineError> {
        use crate::core::LifecycleState::Idle;
        if !self.executing {
            return Ok(());
        }
        self.executing = false;
        at(self.source.name(), self.source.request_state(Idle))?;
        at(self.encoder.name(), self.encoder.request_state(Idle))?;
        at(self.sink.name(), self.sink.request_state(Idle))?;
        Ok(())
    }

    fn disable_ports(&mut self) -> Result<(), PipelineError> {
        if !self.ports_enabled && self.output_buffer.is_none() {
            return Ok(());
        }
        if self.ports_enabled {
            self.ports_enabled = false;
            at(
                self.source.name(),
                self.source.disable_port(CAMERA_VIDEO_PORT),
            )?;
            at(
                self.source.name(),
                self.source.disable_port(CAMERA_PREVIEW_PORT),
            )?;
            at(self.sink.name(), self.sink.disable_port(SINK_VIDEO_PORT))?;
            at(
                self.encoder.name(),
                self.encoder.disable_port(ENCODER_INPUT_PORT),
            )?;
        }
        // The output port only reports disabled once its buffer is freed.
        at(
            self.encoder.name(),
            self.encoder.send_disable_port(ENCODER_OUTPUT_PORT),
        )?;
        if let Some(buffer) = self.output_buffer.take() {
            at(
                self.encoder.name(),
                self.encoder.free_output_buffer(ENCODER_OUTPUT_PORT, buffer),
            )?;
        }
        at(
            self.encoder.name(),
            self.encoder
                .wait_for(EventKind::PortDisabled)
                .map_err(ComponentError::from)
                .map(|_| ()),
        )?;
        Ok(())
    }

    fn to_loaded(&mut self) -> Result<(), PipelineError> {
        use crate::core::LifecycleState::Loaded;
        at(self.source.name(), self.source.request_state(Loaded))?;
        at(self.encoder.name(), self.encoder.request_state(Loaded))?;
        at(self.sink.name(), self.sink.request_state(Loaded))?;
        Ok(())
    }

    fn release_all(self, best_effort: bool) -> Result<(), PipelineError> {
        let Pipeline {
            source,
            encoder,
            sink,
            ..
        } = self;
        for component in [source, encoder, sink] {
            let name = component.name().to_string();
            check(best_effort, at(&name, component.release()))?;
        }
        Ok(())
    }
}

fn check(best_effort: bool, result: Result<(), PipelineError>) -> Result<(), PipelineError> {
    match result {
        Err(err) if best_effort => {
            warn!(error = %err, "teardown step failed");
            Ok(())
        }
        other => other,
    }
}

/// Select the physical device and block until its drivers are loaded.
/// Completion arrives out-of-band through a param-changed event, so a watch
/// is installed first.
fn load_camera_drivers(source: &Component, device: u32) -> Result<(), ComponentError> {
    source.set_config(Config::RequestCallback {
        param: WatchedParam::CameraDeviceNumber,
        enabled: true,
    })?;
    source.set_parameter(Parameter::CameraDeviceNumber(device))?;
    source.wait_for(EventKind::ParamOrConfigChanged)?;
    info!(device, "camera drivers loaded");
    Ok(())
}

fn configure_source(source: &Component, settings: &CameraSettings) -> Result<(), ComponentError> {
    let mut definition = source.port_definition(CAMERA_VIDEO_PORT)?;
    definition.width = settings.width;
    definition.height = settings.height;
    definition.stride = settings.width;
    definition.framerate = settings.framerate;
    definition.compression = CompressionFormat::Unused;
    definition.color = ColorFormat::Yuv420PackedPlanar;
    source.set_port_definition(CAMERA_VIDEO_PORT, definition)?;

    // Preview and capture share the sensor mode; the preview port gets the
    // same geometry.
    let mut preview = source.port_definition(CAMERA_PREVIEW_PORT)?;
    preview.width = definition.width;
    preview.height = definition.height;
    preview.stride = definition.stride;
    preview.framerate = definition.framerate;
    source.set_port_definition(CAMERA_PREVIEW_PORT, preview)?;

    source.set_config(Config::Framerate {
        port: CAMERA_VIDEO_PORT,
        fps: settings.framerate,
    })?;
    source.set_config(Config::Framerate {
        port: CAMERA_PREVIEW_PORT,
        fps: settings.framerate,
    })?;

    source.set_config(Config::Sharpness(settings.sharpness))?;
    source.set_config(Config::Contrast(settings.contrast))?;
    source.set_config(Config::Brightness(settings.brightness))?;
    source.set_config(Config::Saturation(settings.saturation))?;
    source.set_config(Config::ExposureValue {
        metering: settings.metering,
        ev_compensation: settings.ev_compensation,
        shutter_speed_us: settings.shutter_speed_us,
        auto_shutter: settings.auto_shutter,
        iso: settings.iso,
        auto_iso: settings.auto_iso,
    })?;
    source.set_config(Config::ExposureControl(settings.exposure))?;
    source.set_config(Config::FrameStabilization(settings.stabilization))?;
    source.set_config(Config::WhiteBalance(settings.white_balance))?;
    if settings.white_balance == WhiteBalanceMode::Off {
        source.set_config(Config::WhiteBalanceGains {
            red: settings.white_balance_red_gain,
            blue: settings.white_balance_blue_gain,
        })?;
    }
    source.set_config(Config::ImageFilter(settings.filter))?;
    source.set_config(Config::Mirror {
        port: CAMERA_VIDEO_PORT,
        mode: settings.mirror,
    })?;
    source.set_config(Config::Rotation {
        port: CAMERA_VIDEO_PORT,
        degrees: settings.rotation,
    })?;
    source.set_config(Config::ColorEnhancement {
        enabled: settings.color_enhancement,
        u: settings.color_u,
        v: settings.color_v,
    })?;
    source.set_config(Config::Denoise(settings.denoise))?;
    info!(
        width = settings.width,
        height = settings.height,
        framerate = settings.framerate,
        "camera configured"
    );
    Ok(())
}

fn configure_encoder(
    encoder: &Component,
    camera: &CameraSettings,
    settings: &EncoderSettings,
) -> Result<(), ComponentError> {
    // The output geometry must match the capture mode up front, before the
    // tunnel exists.
    let mut definition = encoder.port_definition(ENCODER_OUTPUT_PORT)?;
    definition.width = camera.width;
    definition.height = camera.height;
    definition.stride = camera.width;
    definition.framerate = camera.framerate;
    definition.bitrate = settings.bitrate_bps;
    definition.compression = CompressionFormat::Avc;
    encoder.set_port_definition(ENCODER_OUTPUT_PORT, definition)?;
    encoder.set_parameter(Parameter::Bitrate {
        port: ENCODER_OUTPUT_PORT,
        control: settings.rate_control,
        target_bps: settings.bitrate_bps,
    })?;
    encoder.set_parameter(Parameter::PortFormat {
        port: ENCODER_OUTPUT_PORT,
        compression: CompressionFormat::Avc,
    })?;

    // Read-modify-write; the encoder keeps its own default when the period
    // already matches.
    let current = encoder.get_config(ConfigQuery::AvcIntraPeriod {
        port: ENCODER_OUTPUT_PORT,
    })?;
    let matches_current = matches!(
        current,
        Config::AvcIntraPeriod { idr_period, .. } if idr_period == settings.idr_period
    );
    if !matches_current {
        encoder.set_config(Config::AvcIntraPeriod {
            port: ENCODER_OUTPUT_PORT,
            idr_period: settings.idr_period,
        })?;
    }
    info!(
        bitrate = settings.bitrate_bps,
        idr_period = settings.idr_period,
        "encoder configured"
    );
    Ok(())
}
