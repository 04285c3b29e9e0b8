// SPDX-License-Identifier: GPL-3.0-only

//! Abstraction over the underlying hardware media framework.
//!
//! The framework itself is an opaque collaborator: it owns the component
//! implementations and a notification thread, and is reached through a fixed
//! protocol of synchronous get/set calls plus asynchronous commands whose
//! completion arrives through the [`CoreNotifications`] callbacks. The crate
//! ships one implementation, [`virtual_core::VirtualCore`], which emulates
//! the protocol in software.

pub mod buffer;
pub mod state;
pub mod virtual_core;

pub use buffer::{BufferMeta, OutputBuffer, buffer_flags};
pub use state::LifecycleState;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque handle to an acquired component, valid between acquire and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentHandle(pub(crate) u32);

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Status codes reported by the core, both as synchronous command-issuance
/// rejections and as asynchronous error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    Undefined,
    InsufficientResources,
    InvalidComponentName,
    ComponentNotFound,
    BadParameter,
    NotImplemented,
    InvalidState,
    /// The requested state is the state already held
    SameState,
    IncorrectStateTransition,
    IncorrectStateOperation,
    BadPortIndex,
    PortUnpopulated,
    UnsupportedIndex,
    UnsupportedSetting,
    Hardware,
}

impl CoreError {
    /// Stable display name, used for logs and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            CoreError::Undefined => "undefined",
            CoreError::InsufficientResources => "insufficient-resources",
            CoreError::InvalidComponentName => "invalid-component-name",
            CoreError::ComponentNotFound => "component-not-found",
            CoreError::BadParameter => "bad-parameter",
            CoreError::NotImplemented => "not-implemented",
            CoreError::InvalidState => "invalid-state",
            CoreError::SameState => "same-state",
            CoreError::IncorrectStateTransition => "incorrect-state-transition",
            CoreError::IncorrectStateOperation => "incorrect-state-operation",
            CoreError::BadPortIndex => "bad-port-index",
            CoreError::PortUnpopulated => "port-unpopulated",
            CoreError::UnsupportedIndex => "unsupported-index",
            CoreError::UnsupportedSetting => "unsupported-setting",
            CoreError::Hardware => "hardware",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::error::Error for CoreError {}

/// Port-kind domains a component may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDomain {
    Audio,
    Video,
    Image,
    Other,
}

impl PortDomain {
    pub const ALL: [PortDomain; 4] = [
        PortDomain::Audio,
        PortDomain::Video,
        PortDomain::Image,
        PortDomain::Other,
    ];
}

impl fmt::Display for PortDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortDomain::Audio => "audio",
            PortDomain::Video => "video",
            PortDomain::Image => "image",
            PortDomain::Other => "other",
        };
        f.write_str(name)
    }
}

/// Contiguous range of port indices advertised for one domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortRange {
    pub start: u32,
    pub count: u32,
}

impl PortRange {
    pub fn indices(self) -> std::ops::Range<u32> {
        self.start..self.start + self.count
    }
}

/// Direction of a port relative to its owning component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Compression applied on a video port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionFormat {
    /// Raw frames, no compression
    Unused,
    /// H.264/AVC
    Avc,
}

/// Uncompressed color layout on a video port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    Yuv420PackedPlanar,
    Yuv422PackedPlanar,
    None,
}

/// Geometry and format of a video port.
///
/// Read-modify-write: fetch with
/// [`MediaCore::port_definition`], adjust, store with
/// [`MediaCore::set_port_definition`].
#[derive(Debug, Clone, Copy)]
pub struct VideoPortDefinition {
    pub direction: PortDirection,
    pub width: u32,
    pub height: u32,
    /// Bytes per row; for planar YUV this equals the width
    pub stride: u32,
    pub framerate: u32,
    pub compression: CompressionFormat,
    pub color: ColorFormat,
    /// Target bitrate in bits per second; meaningful on compressed ports
    pub bitrate: u32,
    /// Required allocation size for externally supplied buffers
    pub buffer_size: usize,
}

/// Bitrate control mode of an encoder output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateControl {
    Disable,
    Variable,
    Constant,
}

/// Exposure metering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeteringMode {
    Average,
    Spot,
    Matrix,
    Backlit,
}

/// Exposure control program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureControl {
    Off,
    Auto,
    Night,
    BackLight,
    Sports,
    Snow,
    FixedFps,
    Antishake,
}

/// Artistic image filter applied by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFilter {
    None,
    Noise,
    Emboss,
    Negative,
    Sketch,
    OilPaint,
    Solarize,
    Watercolor,
    Film,
    Blur,
}

/// Frame mirroring applied by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirrorMode {
    None,
    Horizontal,
    Vertical,
    Both,
}

/// White balance control program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhiteBalanceMode {
    Off,
    Auto,
    SunLight,
    Cloudy,
    Shade,
    Tungsten,
    Fluorescent,
    Incandescent,
    Flash,
    Horizon,
}

/// Parameters the core watches for out-of-band completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedParam {
    /// Setting the device number loads the camera drivers asynchronously
    CameraDeviceNumber,
}

/// Synchronous component parameters (applied while Loaded).
#[derive(Debug, Clone, Copy)]
pub enum Parameter {
    /// Selects the physical device; completion of the driver load is
    /// signaled out-of-band when a request-callback watch is installed
    CameraDeviceNumber(u32),
    Bitrate {
        port: u32,
        control: RateControl,
        target_bps: u32,
    },
    PortFormat {
        port: u32,
        compression: CompressionFormat,
    },
}

/// Synchronous component configuration (applicable in any state).
#[derive(Debug, Clone, Copy)]
pub enum Config {
    /// Ask the core to emit a param-or-config-changed event when the watched
    /// parameter finishes applying
    RequestCallback { param: WatchedParam, enabled: bool },
    Sharpness(i32),
    Contrast(i32),
    Saturation(i32),
    Brightness(u32),
    ExposureValue {
        metering: MeteringMode,
        ev_compensation: i32,
        shutter_speed_us: u32,
        auto_shutter: bool,
        iso: u32,
        auto_iso: bool,
    },
    ExposureControl(ExposureControl),
    FrameStabilization(bool),
    WhiteBalance(WhiteBalanceMode),
    /// Manual gains, honored when white balance control is off
    WhiteBalanceGains { red: f32, blue: f32 },
    ImageFilter(ImageFilter),
    Mirror { port: u32, mode: MirrorMode },
    Rotation { port: u32, degrees: u32 },
    ColorEnhancement { enabled: bool, u: u8, v: u8 },
    Denoise(bool),
    Framerate { port: u32, fps: u32 },
    /// Toggle frame delivery on a capture port
    Capturing { port: u32, enabled: bool },
    AvcIntraPeriod { port: u32, idr_period: u32 },
}

/// Queries for readable configuration, mirrored by [`Config`] values.
#[derive(Debug, Clone, Copy)]
pub enum ConfigQuery {
    AvcIntraPeriod { port: u32 },
}

/// Asynchronous commands; completion arrives as a notification event.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    SetState(LifecycleState),
    EnablePort(u32),
    DisablePort(u32),
    Flush(u32),
}

/// Notification delivered by the core's callback thread.
#[derive(Debug, Clone, Copy)]
pub enum CoreEvent {
    StateSet(LifecycleState),
    PortEnabled(u32),
    PortDisabled(u32),
    FlushComplete(u32),
    Mark,
    PortSettingsChanged(u32),
    ParamOrConfigChanged,
    BufferFlag(u32),
    ResourcesAcquired,
    DynamicResourcesAvailable,
    Error(CoreError),
}

impl CoreEvent {
    /// The event-flag category the notification maps to.
    pub fn kind(self) -> crate::events::EventKind {
        use crate::events::EventKind;
        match self {
            CoreEvent::StateSet(_) => EventKind::StateSet,
            CoreEvent::PortEnabled(_) => EventKind::PortEnabled,
            CoreEvent::PortDisabled(_) => EventKind::PortDisabled,
            CoreEvent::FlushComplete(_) => EventKind::FlushComplete,
            CoreEvent::Mark => EventKind::Mark,
            CoreEvent::PortSettingsChanged(_) => EventKind::PortSettingsChanged,
            CoreEvent::ParamOrConfigChanged => EventKind::ParamOrConfigChanged,
            CoreEvent::BufferFlag(_) => EventKind::BufferFlag,
            CoreEvent::ResourcesAcquired => EventKind::ResourcesAcquired,
            CoreEvent::DynamicResourcesAvailable => EventKind::DynamicResourcesAvailable,
            CoreEvent::Error(_) => EventKind::Error,
        }
    }
}

/// The two-callback notification interface installed at acquisition.
///
/// Both callbacks are invoked from the core's notification thread,
/// concurrently with whatever the calling thread is doing; implementations
/// must only signal and log.
pub trait CoreNotifications: Send + Sync {
    /// Generic command-completion / error / settings event.
    fn event(&self, event: CoreEvent);

    /// A fill-this-buffer request completed; the payload region of `buffer`
    /// is owned by the orchestrator again.
    fn fill_buffer_done(&self, buffer: &Arc<OutputBuffer>);
}

/// The media framework's component API.
pub trait MediaCore: Send + Sync {
    /// Obtain a handle to the named component and install its callbacks.
    fn acquire(&self, name: &str, notify: Arc<dyn CoreNotifications>)
    -> CoreResult<ComponentHandle>;

    /// Release a handle. The handle is invalid afterwards.
    fn release(&self, handle: ComponentHandle) -> CoreResult<()>;

    /// Ports advertised by the component for one domain.
    fn port_count(&self, handle: ComponentHandle, domain: PortDomain) -> CoreResult<PortRange>;

    fn port_definition(
        &self,
        handle: ComponentHandle,
        port: u32,
    ) -> CoreResult<VideoPortDefinition>;

    fn set_port_definition(
        &self,
        handle: ComponentHandle,
        port: u32,
        definition: VideoPortDefinition,
    ) -> CoreResult<()>;

    fn set_parameter(&self, handle: ComponentHandle, parameter: Parameter) -> CoreResult<()>;

    fn set_config(&self, handle: ComponentHandle, config: Config) -> CoreResult<()>;

    fn get_config(&self, handle: ComponentHandle, query: ConfigQuery) -> CoreResult<Config>;

    /// Issue an asynchronous command. Returns as soon as the command is
    /// queued; completion (or error) arrives through the callbacks.
    fn send_command(&self, handle: ComponentHandle, command: Command) -> CoreResult<()>;

    /// Link an output port to an input port. Buffer exchange across the link
    /// is managed by the core and invisible to the caller.
    fn setup_tunnel(
        &self,
        output: ComponentHandle,
        output_port: u32,
        input: ComponentHandle,
        input_port: u32,
    ) -> CoreResult<()>;

    /// Allocate an externally owned buffer for a non-tunneled port.
    fn allocate_buffer(
        &self,
        handle: ComponentHandle,
        port: u32,
        size: usize,
    ) -> CoreResult<Arc<OutputBuffer>>;

    fn free_buffer(
        &self,
        handle: ComponentHandle,
        port: u32,
        buffer: Arc<OutputBuffer>,
    ) -> CoreResult<()>;

    /// Ask the component to fill `buffer`. Returns immediately; the payload
    /// region belongs to the core until the fill-done callback fires.
    fn fill_buffer(&self, handle: ComponentHandle, buffer: Arc<OutputBuffer>) -> CoreResult<()>;
}
