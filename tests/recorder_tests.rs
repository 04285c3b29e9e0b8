// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end capture runs against the software core.

use omxcam::component::ComponentError;
use omxcam::core::virtual_core::{ComponentRole, VirtualCore};
use omxcam::core::{
    CoreError, CoreEvent, CoreNotifications, LifecycleState, MediaCore, OutputBuffer, buffer_flags,
};
use omxcam::flags::WaitError;
use omxcam::pipeline::{self, CaptureConfig, ComponentNames, MemorySink, PipelineError};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn names() -> ComponentNames {
    ComponentNames::new("source", "encoder", "sink")
}

fn build_core() -> Arc<VirtualCore> {
    Arc::new(
        VirtualCore::builder()
            .component("source", ComponentRole::Camera)
            .component("encoder", ComponentRole::Encoder)
            .component("sink", ComponentRole::Sink)
            .build(),
    )
}

#[test]
fn zero_duration_capture_completes_one_round_trip() {
    let core = build_core();
    let mut sink = MemorySink::new();
    let stop = AtomicBool::new(false);

    let stats = pipeline::record(
        Arc::clone(&core) as Arc<dyn MediaCore>,
        &names(),
        &CaptureConfig::default(),
        &mut sink,
        Duration::ZERO,
        &stop,
    )
    .unwrap();

    // The fill loop guarantees at least one round trip.
    assert_eq!(stats.payloads, 1);
    assert_eq!(stats.bytes, sink.bytes().len() as u64);
    assert!(!sink.bytes().is_empty());
    // The first payload is codec setup data, Annex-B framed.
    assert_eq!(&sink.bytes()[..4], &[0, 0, 0, 1]);
}

#[test]
fn capture_tears_the_pipeline_back_down() {
    let core = build_core();
    let mut sink = MemorySink::new();
    let stop = AtomicBool::new(false);

    pipeline::record(
        Arc::clone(&core) as Arc<dyn MediaCore>,
        &names(),
        &CaptureConfig::default(),
        &mut sink,
        Duration::ZERO,
        &stop,
    )
    .unwrap();

    for (component, ports) in [
        ("source", &[70u32, 71, 72, 73][..]),
        ("encoder", &[200, 201][..]),
        ("sink", &[240][..]),
    ] {
        for &port in ports {
            assert!(
                !core.is_port_enabled(component, port),
                "{} port {} still enabled after teardown",
                component,
                port
            );
        }
        assert_eq!(
            core.component_state(component),
            Some(LifecycleState::Loaded),
            "{} not back in loaded state",
            component
        );
    }
}

/// Discards all notifications; used to inspect port state after a run.
struct NullNotify;

impl CoreNotifications for NullNotify {
    fn event(&self, _event: CoreEvent) {}

    fn fill_buffer_done(&self, _buffer: &Arc<OutputBuffer>) {}
}

fn run_720p25(core: &Arc<VirtualCore>) {
    let mut sink = MemorySink::new();
    let stop = AtomicBool::new(false);

    let mut config = CaptureConfig::default();
    config.camera.width = 1280;
    config.camera.height = 720;
    config.camera.framerate = 25;

    pipeline::record(
        Arc::clone(core) as Arc<dyn MediaCore>,
        &names(),
        &config,
        &mut sink,
        Duration::ZERO,
        &stop,
    )
    .unwrap();
}

#[test]
fn encoder_output_adopts_the_capture_geometry() {
    let core = build_core();
    run_720p25(&core);

    // Read back what the run configured on port 201. The stride in
    // particular is only ever written by the orchestrator.
    let handle = core.acquire("encoder", Arc::new(NullNotify)).unwrap();
    let definition = core.port_definition(handle, 201).unwrap();
    assert_eq!(definition.width, 1280);
    assert_eq!(definition.height, 720);
    assert_eq!(definition.stride, 1280);
    assert_eq!(definition.framerate, 25);
    core.release(handle).unwrap();
}

#[test]
fn preview_port_follows_the_capture_mode() {
    let core = build_core();
    run_720p25(&core);

    let handle = core.acquire("source", Arc::new(NullNotify)).unwrap();
    let preview = core.port_definition(handle, 70).unwrap();
    assert_eq!(preview.width, 1280);
    assert_eq!(preview.height, 720);
    assert_eq!(preview.framerate, 25);
    core.release(handle).unwrap();
}

#[test]
fn longer_capture_produces_multiple_payloads() {
    let core = build_core();
    let mut sink = MemorySink::new();
    let stop = AtomicBool::new(false);

    let stats = pipeline::record(
        core as Arc<dyn MediaCore>,
        &names(),
        &CaptureConfig::default(),
        &mut sink,
        Duration::from_millis(50),
        &stop,
    )
    .unwrap();

    assert!(stats.payloads > 1, "only {} payloads", stats.payloads);
    assert_eq!(sink.payload_count() as u64, stats.payloads);
}

#[test]
fn raised_stop_flag_still_records_one_payload() {
    let core = build_core();
    let mut sink = MemorySink::new();
    let stop = AtomicBool::new(true);

    let stats = pipeline::record(
        core as Arc<dyn MediaCore>,
        &names(),
        &CaptureConfig::default(),
        &mut sink,
        Duration::from_secs(3600),
        &stop,
    )
    .unwrap();

    assert_eq!(stats.payloads, 1);
}

#[test]
fn encoder_idle_failure_aborts_before_any_port_is_enabled() {
    let core = Arc::new(
        VirtualCore::builder()
            .component("source", ComponentRole::Camera)
            .component("encoder", ComponentRole::Encoder)
            .component("sink", ComponentRole::Sink)
            .fail_state_transition("encoder", LifecycleState::Idle)
            .build(),
    );
    let mut sink = MemorySink::new();
    let stop = AtomicBool::new(false);

    let err = pipeline::record(
        Arc::clone(&core) as Arc<dyn MediaCore>,
        &names(),
        &CaptureConfig::default(),
        &mut sink,
        Duration::ZERO,
        &stop,
    )
    .unwrap_err();

    match err {
        PipelineError::Component { component, source } => {
            assert_eq!(component, "encoder");
            assert_eq!(
                source,
                ComponentError::Wait(WaitError::Async(CoreError::InsufficientResources))
            );
        }
        other => panic!("unexpected error: {}", other),
    }

    // The failure hit before port enabling; nothing must be left enabled
    // and nothing must have reached the sink.
    for (component, ports) in [
        ("source", &[70u32, 71, 72, 73][..]),
        ("encoder", &[200, 201][..]),
        ("sink", &[240][..]),
    ] {
        for &port in ports {
            assert!(!core.is_port_enabled(component, port));
        }
    }
    assert_eq!(sink.payload_count(), 0);
}

#[test]
fn invalid_config_is_rejected_before_touching_the_core() {
    let core = VirtualCore::builder().build();
    let mut sink = MemorySink::new();
    let stop = AtomicBool::new(false);

    let mut config = CaptureConfig::default();
    config.camera.brightness = 200;

    let err = pipeline::record(
        Arc::new(core) as Arc<dyn MediaCore>,
        &names(),
        &config,
        &mut sink,
        Duration::ZERO,
        &stop,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

/// Records the flags of every payload it receives.
#[derive(Default)]
struct FlagSink {
    flags: Vec<u32>,
}

impl omxcam::pipeline::StreamSink for FlagSink {
    fn write(&mut self, _payload: &[u8], meta: omxcam::core::BufferMeta) -> std::io::Result<()> {
        self.flags.push(meta.flags);
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn stream_contains_sync_frames_at_the_idr_cadence() {
    let core = build_core();
    let mut sink = FlagSink::default();
    let stop = AtomicBool::new(false);

    let mut config = CaptureConfig::default();
    config.encoder.idr_period = 2;

    pipeline::record(
        core as Arc<dyn MediaCore>,
        &names(),
        &config,
        &mut sink,
        Duration::from_millis(50),
        &stop,
    )
    .unwrap();

    // Codec setup first, then the stream starting on a sync frame.
    assert!(sink.flags.len() >= 4, "only {} payloads", sink.flags.len());
    assert!(sink.flags[0] & buffer_flags::CODEC_CONFIG != 0);
    assert!(sink.flags[1] & buffer_flags::SYNC_FRAME != 0);
    // With an IDR period of two, sync frames alternate.
    assert!(sink.flags[2] & buffer_flags::SYNC_FRAME == 0);
    assert!(sink.flags[3] & buffer_flags::SYNC_FRAME != 0);
}
