// SPDX-License-Identifier: GPL-3.0-only

//! A component handle paired with its event flags.
//!
//! [`Component::acquire`] installs the notification bridge, takes the handle
//! and walks every advertised port into the disabled state, which is the
//! baseline the pipeline builds from. All blocking waits go through the
//! component's own [`EventFlags`] set, so components can be driven
//! independently from one thread.

use crate::core::{
    Command, ComponentHandle, Config, ConfigQuery, CoreError, CoreEvent, CoreNotifications,
    LifecycleState, MediaCore, OutputBuffer, Parameter, PortDomain, VideoPortDefinition,
};
use crate::events::{EventKind, EventSet};
use crate::flags::{EventFlags, WaitError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure of a component operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// The core rejected the call synchronously.
    Core(CoreError),
    /// The core accepted the call but reported an asynchronous error in
    /// place of the completion event.
    Wait(WaitError),
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentError::Core(code) => write!(f, "core rejected the call: {}", code),
            ComponentError::Wait(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ComponentError {}

impl From<CoreError> for ComponentError {
    fn from(code: CoreError) -> Self {
        ComponentError::Core(code)
    }
}

impl From<WaitError> for ComponentError {
    fn from(err: WaitError) -> Self {
        ComponentError::Wait(err)
    }
}

/// Bridges the core's callback thread into the event-flag set.
struct Notifier {
    component: String,
    flags: Arc<EventFlags>,
}

impl CoreNotifications for Notifier {
    fn event(&self, event: CoreEvent) {
        match event {
            CoreEvent::StateSet(state) => {
                debug!(component = %self.component, state = %state, "state set");
            }
            CoreEvent::PortEnabled(port) => {
                debug!(component = %self.component, port, "port enabled");
            }
            CoreEvent::PortDisabled(port) => {
                debug!(component = %self.component, port, "port disabled");
            }
            CoreEvent::FlushComplete(port) => {
                debug!(component = %self.component, port, "flush complete");
            }
            CoreEvent::PortSettingsChanged(port) => {
                debug!(component = %self.component, port, "port settings changed");
            }
            CoreEvent::ParamOrConfigChanged => {
                debug!(component = %self.component, "param or config changed");
            }
            CoreEvent::BufferFlag(flags) => {
                debug!(component = %self.component, flags, "buffer flag");
            }
            CoreEvent::Mark => {
                debug!(component = %self.component, "mark reached");
            }
            CoreEvent::ResourcesAcquired => {
                debug!(component = %self.component, "resources acquired");
            }
            CoreEvent::DynamicResourcesAvailable => {
                debug!(component = %self.component, "dynamic resources available");
            }
            CoreEvent::Error(code) => {
                warn!(component = %self.component, error = %code, "asynchronous error");
                self.flags.signal_error(code);
                return;
            }
        }
        self.flags.signal(event.kind());
    }

    fn fill_buffer_done(&self, buffer: &Arc<OutputBuffer>) {
        debug!(component = %self.component, port = buffer.port(), "fill buffer done");
        self.flags.signal(EventKind::FillBufferDone);
    }
}

/// An acquired component, released on [`Component::release`].
pub struct Component {
    name: String,
    handle: ComponentHandle,
    flags: Arc<EventFlags>,
    core: Arc<dyn MediaCore>,
}

impl Component {
    /// Acquire the named component and disable every port it advertises,
    /// waiting for each disable to complete.
    pub fn acquire(core: Arc<dyn MediaCore>, name: &str) -> Result<Self, ComponentError> {
        let flags = Arc::new(EventFlags::new());
        let notifier = Arc::new(Notifier {
            component: name.to_string(),
            flags: Arc::clone(&flags),
        });
        let handle = core.acquire(name, notifier)?;
        debug!(component = name, "handle acquired");

        let component = Self {
            name: name.to_string(),
            handle,
            flags,
            core,
        };

        for domain in PortDomain::ALL {
            let range = component.core.port_count(component.handle, domain)?;
            for port in range.indices() {
                component.send_disable_port(port)?;
                component.wait_for(EventKind::PortDisabled)?;
            }
        }
        Ok(component)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until one of `wanted` (or an unexpected error) is pending.
    pub fn wait(&self, wanted: EventSet) -> Result<EventSet, WaitError> {
        self.flags.wait(wanted)
    }

    /// Block until `wanted` (or an unexpected error) is pending.
    pub fn wait_for(&self, wanted: EventKind) -> Result<EventSet, WaitError> {
        self.flags.wait(wanted.bit())
    }

    /// Request a state transition and block until it completes.
    pub fn request_state(&self, state: LifecycleState) -> Result<(), ComponentError> {
        debug!(component = %self.name, target = %state, "requesting state");
        self.core
            .send_command(self.handle, Command::SetState(state))?;
        self.wait_for(EventKind::StateSet)?;
        Ok(())
    }

    /// Issue a port enable. Completion must be awaited separately; for
    /// non-tunneled ports it only arrives once buffers are allocated.
    pub fn send_enable_port(&self, port: u32) -> Result<(), ComponentError> {
        debug!(component = %self.name, port, "requesting port enable");
        self.core
            .send_command(self.handle, Command::EnablePort(port))?;
        Ok(())
    }

    /// Issue a port disable. Completion must be awaited separately; for
    /// ports holding buffers it only arrives once they are freed.
    pub fn send_disable_port(&self, port: u32) -> Result<(), ComponentError> {
        debug!(component = %self.name, port, "requesting port disable");
        self.core
            .send_command(self.handle, Command::DisablePort(port))?;
        Ok(())
    }

    /// Enable a tunneled port and block until the enable completes.
    pub fn enable_port(&self, port: u32) -> Result<(), ComponentError> {
        self.send_enable_port(port)?;
        self.wait_for(EventKind::PortEnabled)?;
        Ok(())
    }

    /// Disable a buffer-free port and block until the disable completes.
    pub fn disable_port(&self, port: u32) -> Result<(), ComponentError> {
        self.send_disable_port(port)?;
        self.wait_for(EventKind::PortDisabled)?;
        Ok(())
    }

    pub fn port_definition(&self, port: u32) -> Result<VideoPortDefinition, ComponentError> {
        Ok(self.core.port_definition(self.handle, port)?)
    }

    pub fn set_port_definition(
        &self,
        port: u32,
        definition: VideoPortDefinition,
    ) -> Result<(), ComponentError> {
        Ok(self.core.set_port_definition(self.handle, port, definition)?)
    }

    pub fn set_parameter(&self, parameter: Parameter) -> Result<(), ComponentError> {
        Ok(self.core.set_parameter(self.handle, parameter)?)
    }

    pub fn set_config(&self, config: Config) -> Result<(), ComponentError> {
        Ok(self.core.set_config(self.handle, config)?)
    }

    pub fn get_config(&self, query: ConfigQuery) -> Result<Config, ComponentError> {
        Ok(self.core.get_config(self.handle, query)?)
    }

    /// Allocate an output buffer sized to the port's advertised requirement.
    ///
    /// Issue the port enable first; the allocation is what lets it complete.
    pub fn allocate_output_buffer(&self, port: u32) -> Result<Arc<OutputBuffer>, ComponentError> {
        let definition = self.core.port_definition(self.handle, port)?;
        debug!(
            component = %self.name,
            port,
            size = definition.buffer_size,
            "allocating output buffer"
        );
        Ok(self
            .core
            .allocate_buffer(self.handle, port, definition.buffer_size)?)
    }

    pub fn free_output_buffer(
        &self,
        port: u32,
        buffer: Arc<OutputBuffer>,
    ) -> Result<(), ComponentError> {
        debug!(component = %self.name, port, "freeing output buffer");
        Ok(self.core.free_buffer(self.handle, port, buffer)?)
    }

    /// Hand a buffer to the component for filling. The fill-done event
    /// signals when the payload is readable again.
    pub fn fill_buffer(&self, buffer: Arc<OutputBuffer>) -> Result<(), ComponentError> {
        Ok(self.core.fill_buffer(self.handle, buffer)?)
    }

    /// Link this component's output port into another component's input port.
    pub fn tunnel_to(
        &self,
        output_port: u32,
        downstream: &Component,
        input_port: u32,
    ) -> Result<(), ComponentError> {
        debug!(
            source = %self.name,
            source_port = output_port,
            sink = %downstream.name,
            sink_port = input_port,
            "setting up tunnel"
        );
        Ok(self
            .core
            .setup_tunnel(self.handle, output_port, downstream.handle, input_port)?)
    }

    /// Release the handle. Consumes the component so a handle is released
    /// exactly once.
    pub fn release(self) -> Result<(), ComponentError> {
        debug!(component = %self.name, "releasing handle");
        Ok(self.core.release(self.handle)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::virtual_core::{ComponentRole, VirtualCore};

    fn core() -> Arc<VirtualCore> {
        Arc::new(
            VirtualCore::builder()
                .component("source", ComponentRole::Camera)
                .component("encoder", ComponentRole::Encoder)
                .build(),
        )
    }

    #[test]
    fn acquire_disables_every_port() {
        let core = core();
        let component =
            Component::acquire(Arc::clone(&core) as Arc<dyn MediaCore>, "source").unwrap();
        for port in [70, 71, 72, 73] {
            assert!(!core.is_port_enabled("source", port));
        }
        component.release().unwrap();
    }

    #[test]
    fn state_round_trip() {
        let core = core();
        let component =
            Component::acquire(Arc::clone(&core) as Arc<dyn MediaCore>, "source").unwrap();
        component.request_state(LifecycleState::Idle).unwrap();
        component.request_state(LifecycleState::Executing).unwrap();
        component.request_state(LifecycleState::Idle).unwrap();
        component.request_state(LifecycleState::Loaded).unwrap();
        component.release().unwrap();
    }

    #[test]
    fn illegal_state_request_surfaces_async_error() {
        let core = core();
        let component =
            Component::acquire(Arc::clone(&core) as Arc<dyn MediaCore>, "source").unwrap();
        let err = component
            .request_state(LifecycleState::Executing)
            .unwrap_err();
        assert_eq!(
            err,
            ComponentError::Wait(WaitError::Async(CoreError::IncorrectStateTransition))
        );
        component.release().unwrap();
    }

    #[test]
    fn buffered_port_enable_completes_after_allocation() {
        let core = core();
        let encoder =
            Component::acquire(Arc::clone(&core) as Arc<dyn MediaCore>, "encoder").unwrap();

        encoder.send_enable_port(201).unwrap();
        let buffer = encoder.allocate_output_buffer(201).unwrap();
        encoder.wait_for(EventKind::PortEnabled).unwrap();
        assert!(core.is_port_enabled("encoder", 201));

        encoder.send_disable_port(201).unwrap();
        encoder.free_output_buffer(201, buffer).unwrap();
        encoder.wait_for(EventKind::PortDisabled).unwrap();
        assert!(!core.is_port_enabled("encoder", 201));
        encoder.release().unwrap();
    }
}
