// SPDX-License-Identifier: GPL-3.0-only

//! Notification event categories delivered by the core's callback thread.
//!
//! Each category occupies a distinct bit so several events can be pending on
//! a component at once. [`EventSet`] is the bitmask the wait/signal primitive
//! in [`crate::flags`] operates on.

use std::fmt;
use std::str::FromStr;

/// A single notification category.
///
/// The set is closed: these are the only events the core ever reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventKind {
    /// Asynchronous error reported in place of an expected completion
    Error = 0x1,
    /// Port-enable command completed
    PortEnabled = 0x2,
    /// Port-disable command completed
    PortDisabled = 0x4,
    /// State-transition command completed
    StateSet = 0x8,
    /// Flush command completed
    FlushComplete = 0x10,
    /// Mark-buffer command completed
    MarkBuffer = 0x20,
    /// A marked buffer reached the component
    Mark = 0x40,
    /// Output port settings changed (e.g. the encoder's initial header)
    PortSettingsChanged = 0x80,
    /// A watched parameter or config finished applying out-of-band
    ParamOrConfigChanged = 0x100,
    /// A buffer carrying a flagged payload was processed
    BufferFlag = 0x200,
    /// Component acquired its resources
    ResourcesAcquired = 0x400,
    /// Dynamic resources became available
    DynamicResourcesAvailable = 0x800,
    /// A fill-this-buffer request completed
    FillBufferDone = 0x1000,
    /// An empty-this-buffer request completed
    EmptyBufferDone = 0x2000,
}

impl EventKind {
    /// Every defined event kind, in bit order.
    pub const ALL: [EventKind; 14] = [
        EventKind::Error,
        EventKind::PortEnabled,
        EventKind::PortDisabled,
        EventKind::StateSet,
        EventKind::FlushComplete,
        EventKind::MarkBuffer,
        EventKind::Mark,
        EventKind::PortSettingsChanged,
        EventKind::ParamOrConfigChanged,
        EventKind::BufferFlag,
        EventKind::ResourcesAcquired,
        EventKind::DynamicResourcesAvailable,
        EventKind::FillBufferDone,
        EventKind::EmptyBufferDone,
    ];

    /// The bitmask containing only this event.
    pub fn bit(self) -> EventSet {
        EventSet(self as u16)
    }

    /// Stable display name, used for logs and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Error => "error",
            EventKind::PortEnabled => "port-enabled",
            EventKind::PortDisabled => "port-disabled",
            EventKind::StateSet => "state-set",
            EventKind::FlushComplete => "flush-complete",
            EventKind::MarkBuffer => "mark-buffer",
            EventKind::Mark => "mark",
            EventKind::PortSettingsChanged => "port-settings-changed",
            EventKind::ParamOrConfigChanged => "param-or-config-changed",
            EventKind::BufferFlag => "buffer-flag",
            EventKind::ResourcesAcquired => "resources-acquired",
            EventKind::DynamicResourcesAvailable => "dynamic-resources-available",
            EventKind::FillBufferDone => "fill-buffer-done",
            EventKind::EmptyBufferDone => "empty-buffer-done",
        }
    }

    /// Parse an event kind from its display name.
    pub fn from_name(name: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::from_name(s).ok_or_else(|| UnknownEventName(s.to_string()))
    }
}

/// Error returned when parsing an unrecognized event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventName(pub String);

impl fmt::Display for UnknownEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event name: {}", self.0)
    }
}

impl std::error::Error for UnknownEventName {}

/// A set of pending events, one bit per [`EventKind`].
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSet(u16);

impl EventSet {
    /// The empty set.
    pub const EMPTY: EventSet = EventSet(0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind as u16 != 0
    }

    /// True if the two sets share at least one event.
    pub fn intersects(self, other: EventSet) -> bool {
        self.0 & other.0 != 0
    }

    /// The events present in both sets.
    pub fn intersection(self, other: EventSet) -> EventSet {
        EventSet(self.0 & other.0)
    }

    /// This set with the events of `other` removed.
    pub fn difference(self, other: EventSet) -> EventSet {
        EventSet(self.0 & !other.0)
    }

    pub fn insert(&mut self, kind: EventKind) {
        self.0 |= kind as u16;
    }

    /// Iterate over the events in the set, in bit order.
    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl From<EventKind> for EventSet {
    fn from(kind: EventKind) -> Self {
        kind.bit()
    }
}

impl std::ops::BitOr for EventSet {
    type Output = EventSet;

    fn bitor(self, rhs: EventSet) -> EventSet {
        EventSet(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<EventKind> for EventSet {
    type Output = EventSet;

    fn bitor(self, rhs: EventKind) -> EventSet {
        EventSet(self.0 | rhs as u16)
    }
}

impl std::ops::BitOr for EventKind {
    type Output = EventSet;

    fn bitor(self, rhs: EventKind) -> EventSet {
        EventSet(self as u16 | rhs as u16)
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("{}");
        }
        let names: Vec<&str> = self.iter().map(EventKind::name).collect();
        write!(f, "{{{}}}", names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_without_collisions() {
        let mut seen = std::collections::HashSet::new();
        for kind in EventKind::ALL {
            let name = kind.name();
            assert!(seen.insert(name), "duplicate display name: {}", name);
            assert_eq!(name.parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!("no-such-event".parse::<EventKind>().is_err());
    }

    #[test]
    fn bits_are_distinct() {
        for a in EventKind::ALL {
            for b in EventKind::ALL {
                if a != b {
                    assert!(!a.bit().intersects(b.bit()));
                }
            }
        }
    }

    #[test]
    fn set_operations() {
        let mut set = EventSet::EMPTY;
        set.insert(EventKind::StateSet);
        set.insert(EventKind::Error);

        assert!(set.contains(EventKind::StateSet));
        assert!(!set.contains(EventKind::PortEnabled));

        let wanted = EventKind::StateSet | EventKind::PortEnabled;
        assert_eq!(
            set.intersection(wanted),
            EventSet::from(EventKind::StateSet)
        );
        assert_eq!(
            set.difference(EventKind::StateSet.bit()),
            EventSet::from(EventKind::Error)
        );
    }
}
