// SPDX-License-Identifier: GPL-3.0-only

//! Software emulation of the media core.
//!
//! Implements the full [`MediaCore`](super::MediaCore) protocol without any
//! hardware: components are registered up front with a role, commands are
//! validated against the lifecycle state machine, and completions are
//! delivered from a dedicated notification thread, exactly one event at a
//! time and in issue order. Encoder components produce deterministic
//! Annex-B-shaped payloads so the capture path can be exercised end to end.

use super::{
    Command, CompressionFormat, ColorFormat, Config, ConfigQuery, ComponentHandle, CoreError,
    CoreEvent, CoreNotifications, CoreResult, LifecycleState, MediaCore, OutputBuffer, Parameter,
    PortDirection, PortDomain, PortRange, VideoPortDefinition, WatchedParam, buffer_flags,
};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Role a registered component plays; determines its port layout and how it
/// reacts to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentRole {
    /// Frame source with preview/video/still outputs and a clock input
    Camera,
    /// Video encoder with one input and one compressed output
    Encoder,
    /// Discarding sink with one input per media domain
    Sink,
}

const CAMERA_PREVIEW_PORT: u32 = 70;
const CAMERA_VIDEO_PORT: u32 = 71;
const CAMERA_STILL_PORT: u32 = 72;
const CAMERA_CLOCK_PORT: u32 = 73;
const ENCODER_INPUT_PORT: u32 = 200;
const ENCODER_OUTPUT_PORT: u32 = 201;
const SINK_VIDEO_PORT: u32 = 240;
const SINK_AUDIO_PORT: u32 = 241;
const SINK_IMAGE_PORT: u32 = 242;

const DEFAULT_ENCODER_BUFFER_SIZE: usize = 65536;

struct PortSlot {
    definition: VideoPortDefinition,
    enabled: bool,
    tunneled: bool,
    /// Enable issued, completion gated on buffer allocation
    pending_enable: bool,
    /// Disable issued, completion gated on buffer release
    pending_disable: bool,
    buffers: Vec<Arc<OutputBuffer>>,
    capturing: bool,
}

impl PortSlot {
    fn new(definition: VideoPortDefinition) -> Self {
        Self {
            definition,
            enabled: true,
            tunneled: false,
            pending_enable: false,
            pending_disable: false,
            buffers: Vec::new(),
            capturing: false,
        }
    }
}

struct ComponentSlot {
    name: String,
    role: ComponentRole,
    acquired: bool,
    state: LifecycleState,
    ports: HashMap<u32, PortSlot>,
    notify: Option<Arc<dyn CoreNotifications>>,
    /// Watches installed through request-callback configs
    watch_device_number: bool,
    idr_period: u32,
    /// Frames produced so far by an encoder role
    frames_filled: u64,
    codec_config_sent: bool,
}

impl ComponentSlot {
    fn port(&self, port: u32) -> CoreResult<&PortSlot> {
        self.ports.get(&port).ok_or(CoreError::BadPortIndex)
    }

    fn port_mut(&mut self, port: u32) -> CoreResult<&mut PortSlot> {
        self.ports.get_mut(&port).ok_or(CoreError::BadPortIndex)
    }
}

enum Job {
    Notify {
        notify: Arc<dyn CoreNotifications>,
        event: CoreEvent,
    },
    Fill {
        slot: usize,
        buffer: Arc<OutputBuffer>,
    },
}

struct CoreState {
    slots: Vec<ComponentSlot>,
    by_name: HashMap<String, usize>,
    /// State transitions registered to fail with an asynchronous error
    faults: Vec<(String, LifecycleState)>,
}

/// Registers components and faults before the core starts.
pub struct VirtualCoreBuilder {
    components: Vec<(String, ComponentRole)>,
    faults: Vec<(String, LifecycleState)>,
}

impl VirtualCoreBuilder {
    /// Register a component under `name`.
    pub fn component(mut self, name: &str, role: ComponentRole) -> Self {
        self.components.push((name.to_string(), role));
        self
    }

    /// Make the named component answer a transition request to `target` with
    /// an asynchronous insufficient-resources error instead of completing it.
    pub fn fail_state_transition(mut self, name: &str, target: LifecycleState) -> Self {
        self.faults.push((name.to_string(), target));
        self
    }

    pub fn build(self) -> VirtualCore {
        let mut slots = Vec::new();
        let mut by_name = HashMap::new();
        for (name, role) in self.components {
            by_name.insert(name.clone(), slots.len());
            slots.push(ComponentSlot {
                name,
                role,
                acquired: false,
                state: LifecycleState::Loaded,
                ports: default_ports(role),
                notify: None,
                watch_device_number: false,
                idr_period: 60,
                frames_filled: 0,
                codec_config_sent: false,
            });
        }

        let state = Arc::new(Mutex::new(CoreState {
            slots,
            by_name,
            faults: self.faults,
        }));
        let (jobs, inbox) = mpsc::channel();
        let worker_state = Arc::clone(&state);
        // Without the notification thread every wait would hang; a failed
        // spawn must not produce a usable core.
        let worker = thread::Builder::new()
            .name("core-notify".into())
            .spawn(move || notification_loop(worker_state, inbox))
            .expect("failed to spawn core notification thread");

        VirtualCore {
            state,
            jobs,
            worker: Mutex::new(Some(worker)),
        }
    }
}

/// In-process core with a notification thread, suitable for exercising the
/// orchestration protocol without hardware.
pub struct VirtualCore {
    state: Arc<Mutex<CoreState>>,
    jobs: Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualCore {
    pub fn builder() -> VirtualCoreBuilder {
        VirtualCoreBuilder {
            components: Vec::new(),
            faults: Vec::new(),
        }
    }

    /// Whether the named component's port is currently enabled. Test hook;
    /// reads the core's own bookkeeping, not the orchestrator's.
    pub fn is_port_enabled(&self, name: &str, port: u32) -> bool {
        let state = self.lock();
        state
            .by_name
            .get(name)
            .and_then(|&i| state.slots[i].ports.get(&port))
            .is_some_and(|p| p.enabled)
    }

    /// Current lifecycle state of the named component. Test hook.
    pub fn component_state(&self, name: &str) -> Option<LifecycleState> {
        let state = self.lock();
        state.by_name.get(name).map(|&i| state.slots[i].state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(&self, job: Job) {
        // The worker outlives every handle; a send only fails during drop.
        let _ = self.jobs.send(job);
    }

    fn notify_of(&self, slot: &ComponentSlot, event: CoreEvent) {
        if let Some(notify) = &slot.notify {
            self.enqueue(Job::Notify {
                notify: Arc::clone(notify),
                event,
            });
        }
    }

    fn slot_index(state: &CoreState, handle: ComponentHandle) -> CoreResult<usize> {
        let index = handle.0 as usize;
        let slot = state.slots.get(index).ok_or(CoreError::BadParameter)?;
        if !slot.acquired {
            return Err(CoreError::BadParameter);
        }
        Ok(index)
    }
}

impl Drop for VirtualCore {
    fn drop(&mut self) {
        // Closing the channel stops the notification loop.
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let (stop, _inbox) = mpsc::channel();
        self.jobs = stop;
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl MediaCore for VirtualCore {
    fn acquire(
        &self,
        name: &str,
        notify: Arc<dyn CoreNotifications>,
    ) -> CoreResult<ComponentHandle> {
        let mut state = self.lock();
        let index = *state
            .by_name
            .get(name)
            .ok_or(CoreError::ComponentNotFound)?;
        let slot = &mut state.slots[index];
        if slot.acquired {
            return Err(CoreError::IncorrectStateOperation);
        }
        slot.acquired = true;
        slot.state = LifecycleState::Loaded;
        slot.notify = Some(notify);
        debug!(component = name, "component acquired");
        Ok(ComponentHandle(index as u32))
    }

    fn release(&self, handle: ComponentHandle) -> CoreResult<()> {
        let mut state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        let slot = &mut state.slots[index];
        slot.acquired = false;
        slot.notify = None;
        debug!(component = %slot.name, "component released");
        Ok(())
    }

    fn port_count(&self, handle: ComponentHandle, domain: PortDomain) -> CoreResult<PortRange> {
        let state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        Ok(domain_range(state.slots[index].role, domain))
    }

    fn port_definition(
        &self,
        handle: ComponentHandle,
        port: u32,
    ) -> CoreResult<VideoPortDefinition> {
        let state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        Ok(state.slots[index].port(port)?.definition)
    }

    fn set_port_definition(
        &self,
        handle: ComponentHandle,
        port: u32,
        definition: VideoPortDefinition,
    ) -> CoreResult<()> {
        let mut state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        let slot = &mut state.slots[index];
        slot.port_mut(port)?.definition = definition;
        Ok(())
    }

    fn set_parameter(&self, handle: ComponentHandle, parameter: Parameter) -> CoreResult<()> {
        let mut state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        let slot = &mut state.slots[index];
        match parameter {
            Parameter::CameraDeviceNumber(number) => {
                if slot.role != ComponentRole::Camera {
                    return Err(CoreError::UnsupportedIndex);
                }
                debug!(component = %slot.name, device = number, "camera device selected");
                if slot.watch_device_number {
                    let event = CoreEvent::ParamOrConfigChanged;
                    let slot = &state.slots[index];
                    self.notify_of(slot, event);
                }
            }
            Parameter::Bitrate {
                port,
                control: _,
                target_bps,
            } => {
                slot.port_mut(port)?.definition.bitrate = target_bps;
            }
            Parameter::PortFormat { port, compression } => {
                slot.port_mut(port)?.definition.compression = compression;
            }
        }
        Ok(())
    }

    fn set_config(&self, handle: ComponentHandle, config: Config) -> CoreResult<()> {
        let mut state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        let slot = &mut state.slots[index];
        match config {
            Config::RequestCallback { param, enabled } => match param {
                WatchedParam::CameraDeviceNumber => slot.watch_device_number = enabled,
            },
            Config::Sharpness(v) | Config::Contrast(v) | Config::Saturation(v) => {
                if !(-100..=100).contains(&v) {
                    return Err(CoreError::UnsupportedSetting);
                }
            }
            Config::Brightness(v) => {
                if v > 100 {
                    return Err(CoreError::UnsupportedSetting);
                }
            }
            Config::Rotation { port, degrees } => {
                slot.port(port)?;
                if degrees % 90 != 0 || degrees >= 360 {
                    return Err(CoreError::UnsupportedSetting);
                }
            }
            Config::Mirror { port, .. } => {
                slot.port(port)?;
            }
            Config::Framerate { port, fps } => {
                if fps == 0 {
                    return Err(CoreError::UnsupportedSetting);
                }
                slot.port_mut(port)?.definition.framerate = fps;
            }
            Config::Capturing { port, enabled } => {
                let port = slot.port_mut(port)?;
                port.capturing = enabled;
            }
            Config::AvcIntraPeriod { port, idr_period } => {
                slot.port(port)?;
                if idr_period == 0 {
                    return Err(CoreError::UnsupportedSetting);
                }
                slot.idr_period = idr_period;
            }
            // Remaining camera controls are accepted and have no observable
            // effect on the synthetic stream.
            Config::ExposureValue { .. }
            | Config::ExposureControl(_)
            | Config::FrameStabilization(_)
            | Config::WhiteBalance(_)
            | Config::WhiteBalanceGains { .. }
            | Config::ImageFilter(_)
            | Config::ColorEnhancement { .. }
            | Config::Denoise(_) => {}
        }
        Ok(())
    }

    fn get_config(&self, handle: ComponentHandle, query: ConfigQuery) -> CoreResult<Config> {
        let state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        let slot = &state.slots[index];
        match query {
            ConfigQuery::AvcIntraPeriod { port } => {
                slot.port(port)?;
                Ok(Config::AvcIntraPeriod {
                    port,
                    idr_period: slot.idr_period,
                })
            }
        }
    }

    fn send_command(&self, handle: ComponentHandle, command: Command) -> CoreResult<()> {
        let mut state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        match command {
            Command::SetState(target) => {
                let faulted = {
                    let slot = &state.slots[index];
                    state
                        .faults
                        .iter()
                        .any(|(name, t)| *name == slot.name && *t == target)
                };
                let slot = &mut state.slots[index];
                if faulted {
                    debug!(component = %slot.name, target = %target, "transition faulted");
                    let slot = &state.slots[index];
                    self.notify_of(slot, CoreEvent::Error(CoreError::InsufficientResources));
                    return Ok(());
                }
                if slot.state == target {
                    let slot = &state.slots[index];
                    self.notify_of(slot, CoreEvent::Error(CoreError::SameState));
                    return Ok(());
                }
                if !slot.state.can_transition_to(target) {
                    let slot = &state.slots[index];
                    self.notify_of(slot, CoreEvent::Error(CoreError::IncorrectStateTransition));
                    return Ok(());
                }
                slot.state = target;
                let emits_settings_changed =
                    slot.role == ComponentRole::Encoder && target == LifecycleState::Executing;
                let slot = &state.slots[index];
                self.notify_of(slot, CoreEvent::StateSet(target));
                if emits_settings_changed {
                    self.notify_of(slot, CoreEvent::PortSettingsChanged(ENCODER_OUTPUT_PORT));
                }
            }
            Command::EnablePort(port) => {
                let slot = &mut state.slots[index];
                let port_slot = slot.port_mut(port)?;
                if port_slot.enabled || port_slot.pending_enable {
                    let slot = &state.slots[index];
                    self.notify_of(slot, CoreEvent::Error(CoreError::IncorrectStateOperation));
                    return Ok(());
                }
                if port_slot.tunneled || !port_slot.buffers.is_empty() {
                    port_slot.enabled = true;
                    let slot = &state.slots[index];
                    self.notify_of(slot, CoreEvent::PortEnabled(port));
                } else {
                    // Completion is gated on buffer allocation.
                    port_slot.pending_enable = true;
                }
            }
            Command::DisablePort(port) => {
                let slot = &mut state.slots[index];
                let port_slot = slot.port_mut(port)?;
                if !port_slot.enabled && !port_slot.pending_enable {
                    let slot = &state.slots[index];
                    self.notify_of(slot, CoreEvent::Error(CoreError::IncorrectStateOperation));
                    return Ok(());
                }
                port_slot.pending_enable = false;
                if port_slot.buffers.is_empty() {
                    port_slot.enabled = false;
                    let slot = &state.slots[index];
                    self.notify_of(slot, CoreEvent::PortDisabled(port));
                } else {
                    // Completion is gated on buffer release.
                    port_slot.pending_disable = true;
                }
            }
            Command::Flush(port) => {
                let slot = &mut state.slots[index];
                slot.port(port)?;
                let slot = &state.slots[index];
                self.notify_of(slot, CoreEvent::FlushComplete(port));
            }
        }
        Ok(())
    }

    fn setup_tunnel(
        &self,
        output: ComponentHandle,
        output_port: u32,
        input: ComponentHandle,
        input_port: u32,
    ) -> CoreResult<()> {
        let mut state = self.lock();
        let out_index = Self::slot_index(&state, output)?;
        let in_index = Self::slot_index(&state, input)?;

        let out_def = state.slots[out_index].port(output_port)?.definition;
        if out_def.direction != PortDirection::Output {
            return Err(CoreError::BadPortIndex);
        }
        {
            let in_slot = &mut state.slots[in_index];
            let in_port = in_slot.port_mut(input_port)?;
            if in_port.definition.direction != PortDirection::Input {
                return Err(CoreError::BadPortIndex);
            }
            // Tunnel negotiation: the supplier's geometry wins.
            in_port.definition.width = out_def.width;
            in_port.definition.height = out_def.height;
            in_port.definition.stride = out_def.stride;
            in_port.definition.framerate = out_def.framerate;
            in_port.tunneled = true;
            if in_slot.role == ComponentRole::Encoder {
                let out = in_slot.port_mut(ENCODER_OUTPUT_PORT)?;
                out.definition.width = out_def.width;
                out.definition.height = out_def.height;
                out.definition.framerate = out_def.framerate;
            }
        }
        state.slots[out_index].port_mut(output_port)?.tunneled = true;
        debug!(
            source = %state.slots[out_index].name,
            source_port = output_port,
            sink = %state.slots[in_index].name,
            sink_port = input_port,
            "tunnel established"
        );
        Ok(())
    }

    fn allocate_buffer(
        &self,
        handle: ComponentHandle,
        port: u32,
        size: usize,
    ) -> CoreResult<Arc<OutputBuffer>> {
        let mut state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        let slot = &mut state.slots[index];
        let port_slot = slot.port_mut(port)?;
        if port_slot.tunneled {
            return Err(CoreError::IncorrectStateOperation);
        }
        let buffer = Arc::new(OutputBuffer::new(port, size));
        port_slot.buffers.push(Arc::clone(&buffer));
        if port_slot.pending_enable {
            port_slot.pending_enable = false;
            port_slot.enabled = true;
            let slot = &state.slots[index];
            self.notify_of(slot, CoreEvent::PortEnabled(port));
        }
        Ok(buffer)
    }

    fn free_buffer(
        &self,
        handle: ComponentHandle,
        port: u32,
        buffer: Arc<OutputBuffer>,
    ) -> CoreResult<()> {
        let mut state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        let slot = &mut state.slots[index];
        let port_slot = slot.port_mut(port)?;
        let position = port_slot
            .buffers
            .iter()
            .position(|b| Arc::ptr_eq(b, &buffer))
            .ok_or(CoreError::BadParameter)?;
        port_slot.buffers.remove(position);
        if port_slot.pending_disable && port_slot.buffers.is_empty() {
            port_slot.pending_disable = false;
            port_slot.enabled = false;
            let slot = &state.slots[index];
            self.notify_of(slot, CoreEvent::PortDisabled(port));
        }
        Ok(())
    }

    fn fill_buffer(&self, handle: ComponentHandle, buffer: Arc<OutputBuffer>) -> CoreResult<()> {
        let state = self.lock();
        let index = Self::slot_index(&state, handle)?;
        let slot = &state.slots[index];
        if slot.state != LifecycleState::Executing {
            return Err(CoreError::IncorrectStateOperation);
        }
        let port_slot = slot.port(buffer.port())?;
        if !port_slot.enabled {
            return Err(CoreError::IncorrectStateOperation);
        }
        drop(state);
        self.enqueue(Job::Fill {
            slot: index,
            buffer,
        });
        Ok(())
    }
}

fn notification_loop(state: Arc<Mutex<CoreState>>, inbox: Receiver<Job>) {
    while let Ok(job) = inbox.recv() {
        match job {
            Job::Notify { notify, event } => notify.event(event),
            Job::Fill { slot, buffer } => {
                let notify = {
                    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                    let slot = &mut state.slots[slot];
                    produce_payload(slot, &buffer);
                    slot.notify.clone()
                };
                if let Some(notify) = notify {
                    notify.fill_buffer_done(&buffer);
                }
            }
        }
    }
}

/// Write the next deterministic payload of the synthetic stream into
/// `buffer`. The first fill carries codec setup data; thereafter every
/// `idr_period`-th frame is a sync frame.
fn produce_payload(slot: &mut ComponentSlot, buffer: &OutputBuffer) {
    if slot.role == ComponentRole::Encoder && !slot.codec_config_sent {
        slot.codec_config_sent = true;
        let mut bytes = vec![0, 0, 0, 1, 0x27, 0x64, 0x00, 0x28];
        bytes.extend_from_slice(&[0, 0, 0, 1, 0x28, 0xee, 0x38, 0x80]);
        buffer.fill(
            &bytes,
            0,
            buffer_flags::CODEC_CONFIG | buffer_flags::END_OF_FRAME,
        );
        return;
    }

    let frame = slot.frames_filled;
    slot.frames_filled += 1;
    let framerate = slot
        .ports
        .get(&buffer.port())
        .map(|p| p.definition.framerate.max(1))
        .unwrap_or(30);
    let timestamp_us = (frame as i64) * 1_000_000 / framerate as i64;
    let sync = slot.idr_period > 0 && frame % slot.idr_period as u64 == 0;

    let nal_type: u8 = if sync { 0x25 } else { 0x21 };
    let len = if sync { 4096 } else { 1024 + (frame as usize % 7) * 128 };
    let mut bytes = Vec::with_capacity(len);
    bytes.extend_from_slice(&[0, 0, 0, 1, nal_type]);
    // Cheap deterministic generator keyed on the frame number.
    let mut word = frame.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(1);
    while bytes.len() < len {
        word = word
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        bytes.push((word >> 33) as u8);
    }

    let mut flags = buffer_flags::END_OF_FRAME;
    if sync {
        flags |= buffer_flags::SYNC_FRAME;
    }
    buffer.fill(&bytes, timestamp_us, flags);
}

fn video_def(
    direction: PortDirection,
    width: u32,
    height: u32,
    framerate: u32,
    compression: CompressionFormat,
) -> VideoPortDefinition {
    let color = match compression {
        CompressionFormat::Unused => ColorFormat::Yuv420PackedPlanar,
        CompressionFormat::Avc => ColorFormat::None,
    };
    let buffer_size = match compression {
        CompressionFormat::Unused => (width * height * 3 / 2) as usize,
        CompressionFormat::Avc => DEFAULT_ENCODER_BUFFER_SIZE,
    };
    VideoPortDefinition {
        direction,
        width,
        height,
        stride: width,
        framerate,
        compression,
        color,
        bitrate: 0,
        buffer_size,
    }
}

fn default_ports(role: ComponentRole) -> HashMap<u32, PortSlot> {
    use PortDirection::{Input, Output};
    let mut ports = HashMap::new();
    match role {
        ComponentRole::Camera => {
            for port in [CAMERA_PREVIEW_PORT, CAMERA_VIDEO_PORT, CAMERA_STILL_PORT] {
                ports.insert(
                    port,
                    PortSlot::new(video_def(Output, 1920, 1080, 30, CompressionFormat::Unused)),
                );
            }
            ports.insert(
                CAMERA_CLOCK_PORT,
                PortSlot::new(video_def(Input, 0, 0, 0, CompressionFormat::Unused)),
            );
        }
        ComponentRole::Encoder => {
            ports.insert(
                ENCODER_INPUT_PORT,
                PortSlot::new(video_def(Input, 1920, 1080, 30, CompressionFormat::Unused)),
            );
            ports.insert(
                ENCODER_OUTPUT_PORT,
                PortSlot::new(video_def(Output, 1920, 1080, 30, CompressionFormat::Avc)),
            );
        }
        ComponentRole::Sink => {
            for port in [SINK_VIDEO_PORT, SINK_AUDIO_PORT, SINK_IMAGE_PORT] {
                ports.insert(
                    port,
                    PortSlot::new(video_def(Input, 0, 0, 0, CompressionFormat::Unused)),
                );
            }
        }
    }
    ports
}

fn domain_range(role: ComponentRole, domain: PortDomain) -> PortRange {
    match (role, domain) {
        (ComponentRole::Camera, PortDomain::Video) => PortRange {
            start: CAMERA_PREVIEW_PORT,
            count: 3,
        },
        (ComponentRole::Camera, PortDomain::Other) => PortRange {
            start: CAMERA_CLOCK_PORT,
            count: 1,
        },
        (ComponentRole::Encoder, PortDomain::Video) => PortRange {
            start: ENCODER_INPUT_PORT,
            count: 2,
        },
        (ComponentRole::Sink, PortDomain::Video) => PortRange {
            start: SINK_VIDEO_PORT,
            count: 1,
        },
        (ComponentRole::Sink, PortDomain::Audio) => PortRange {
            start: SINK_AUDIO_PORT,
            count: 1,
        },
        (ComponentRole::Sink, PortDomain::Image) => PortRange {
            start: SINK_IMAGE_PORT,
            count: 1,
        },
        _ => PortRange { start: 0, count: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingNotify {
        events: StdMutex<Vec<CoreEvent>>,
        fills: StdMutex<usize>,
    }

    impl CoreNotifications for RecordingNotify {
        fn event(&self, event: CoreEvent) {
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event);
        }

        fn fill_buffer_done(&self, _buffer: &Arc<OutputBuffer>) {
            *self.fills.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        }
    }

    impl RecordingNotify {
        fn wait_for(&self, kind: EventKind) -> CoreEvent {
            for _ in 0..200 {
                {
                    let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(event) = events.iter().find(|e| e.kind() == kind) {
                        return *event;
                    }
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            panic!("no {} event arrived", kind.name());
        }
    }

    fn camera_core() -> (VirtualCore, Arc<RecordingNotify>, ComponentHandle) {
        let core = VirtualCore::builder()
            .component("source", ComponentRole::Camera)
            .build();
        let notify = Arc::new(RecordingNotify::default());
        let handle = core
            .acquire("source", Arc::clone(&notify) as Arc<dyn CoreNotifications>)
            .unwrap();
        (core, notify, handle)
    }

    #[test]
    fn acquire_unknown_component_fails() {
        let core = VirtualCore::builder().build();
        let notify = Arc::new(RecordingNotify::default());
        let err = core
            .acquire("missing", notify as Arc<dyn CoreNotifications>)
            .unwrap_err();
        assert_eq!(err, CoreError::ComponentNotFound);
    }

    #[test]
    fn same_state_request_reports_async_error() {
        let (core, notify, handle) = camera_core();
        core.send_command(handle, Command::SetState(LifecycleState::Loaded))
            .unwrap();
        match notify.wait_for(EventKind::Error) {
            CoreEvent::Error(code) => assert_eq!(code, CoreError::SameState),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn skipping_a_state_reports_async_error() {
        let (core, notify, handle) = camera_core();
        core.send_command(handle, Command::SetState(LifecycleState::Executing))
            .unwrap();
        match notify.wait_for(EventKind::Error) {
            CoreEvent::Error(code) => assert_eq!(code, CoreError::IncorrectStateTransition),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn valid_transition_completes_with_state_set() {
        let (core, notify, handle) = camera_core();
        core.send_command(handle, Command::SetState(LifecycleState::Idle))
            .unwrap();
        match notify.wait_for(EventKind::StateSet) {
            CoreEvent::StateSet(state) => assert_eq!(state, LifecycleState::Idle),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(core.component_state("source"), Some(LifecycleState::Idle));
    }

    #[test]
    fn untunneled_enable_waits_for_buffer_allocation() {
        let core = VirtualCore::builder()
            .component("encoder", ComponentRole::Encoder)
            .build();
        let notify = Arc::new(RecordingNotify::default());
        let handle = core
            .acquire("encoder", Arc::clone(&notify) as Arc<dyn CoreNotifications>)
            .unwrap();

        core.send_command(handle, Command::DisablePort(ENCODER_OUTPUT_PORT))
            .unwrap();
        notify.wait_for(EventKind::PortDisabled);

        core.send_command(handle, Command::EnablePort(ENCODER_OUTPUT_PORT))
            .unwrap();
        assert!(!core.is_port_enabled("encoder", ENCODER_OUTPUT_PORT));

        let buffer = core
            .allocate_buffer(handle, ENCODER_OUTPUT_PORT, 4096)
            .unwrap();
        notify.wait_for(EventKind::PortEnabled);
        assert!(core.is_port_enabled("encoder", ENCODER_OUTPUT_PORT));
        drop(buffer);
    }

    #[test]
    fn faulted_transition_reports_injected_error() {
        let core = VirtualCore::builder()
            .component("encoder", ComponentRole::Encoder)
            .fail_state_transition("encoder", LifecycleState::Idle)
            .build();
        let notify = Arc::new(RecordingNotify::default());
        let handle = core
            .acquire("encoder", Arc::clone(&notify) as Arc<dyn CoreNotifications>)
            .unwrap();
        core.send_command(handle, Command::SetState(LifecycleState::Idle))
            .unwrap();
        match notify.wait_for(EventKind::Error) {
            CoreEvent::Error(code) => assert_eq!(code, CoreError::InsufficientResources),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            core.component_state("encoder"),
            Some(LifecycleState::Loaded)
        );
    }

    #[test]
    fn first_fill_carries_codec_config() {
        let core = VirtualCore::builder()
            .component("encoder", ComponentRole::Encoder)
            .build();
        let notify = Arc::new(RecordingNotify::default());
        let handle = core
            .acquire("encoder", Arc::clone(&notify) as Arc<dyn CoreNotifications>)
            .unwrap();

        for state in [LifecycleState::Idle, LifecycleState::Executing] {
            core.send_command(handle, Command::SetState(state)).unwrap();
        }
        let buffer = core
            .allocate_buffer(handle, ENCODER_OUTPUT_PORT, 65536)
            .unwrap();

        core.fill_buffer(handle, Arc::clone(&buffer)).unwrap();
        for _ in 0..200 {
            if *notify.fills.lock().unwrap() > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(*notify.fills.lock().unwrap(), 1);
        buffer.with_payload(|bytes, meta| {
            assert!(meta.flags & buffer_flags::CODEC_CONFIG != 0);
            assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        });
    }
}
