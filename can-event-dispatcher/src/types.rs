//! Core types for the event dispatcher engine
//!
//! This module defines the vocabulary shared by all parts of the engine: the kinds of
//! events, the handles and indexes by which timers and event sources are addressed, and
//! the error type returned by all fallible operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatcherError>;

/// Handle by which an external sender (e.g. a CAN receive ISR) identifies its events
pub type SenderHandle = u32;

/// The first raw value available for sender defined event kinds
pub const FIRST_CUSTOM_EVENT: u32 = 0;

/// The last raw value available for sender defined event kinds. The values above, up to
/// and including `u32::MAX - 2`, are reserved for the engine's own events.
pub const KIND_LAST: u32 = u32::MAX - 5;

const RAW_EXT_SOURCE_INIT: u32 = KIND_LAST + 1;
const RAW_INT_SOURCE_INIT: u32 = KIND_LAST + 2;
const RAW_TIMER_ELAPSED: u32 = KIND_LAST + 3;

/// Sentinel for "no event source"; the accessors of this crate return `Option` instead
pub const INVALID_EVENT_SOURCE_INDEX: usize = usize::MAX;

/// The kind of an event as seen by a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// First event of an external event source, delivered once after registration
    ExtSourceInit,
    /// First event of an internal event source, delivered once after registration
    IntSourceInit,
    /// A timer became due
    TimerElapsed,
    /// Sender defined event, at most `KIND_LAST`. Build it with `EventKind::custom`,
    /// which rejects the reserved range; the engine only ever delivers validated kinds.
    Custom(u32),
}

impl EventKind {
    /// Create a sender defined kind, rejecting values from the reserved range
    pub fn custom(kind: u32) -> Result<Self> {
        if kind > KIND_LAST {
            return Err(DispatcherError::InvalidEventKind(kind));
        }
        Ok(EventKind::Custom(kind))
    }

    /// The integral representation of the kind. Only meaningful for kinds built through
    /// `custom` or `from_raw`: an unchecked `Custom` above `KIND_LAST` collides with the
    /// reserved values.
    pub fn to_raw(self) -> u32 {
        match self {
            EventKind::ExtSourceInit => RAW_EXT_SOURCE_INIT,
            EventKind::IntSourceInit => RAW_INT_SOURCE_INIT,
            EventKind::TimerElapsed => RAW_TIMER_ELAPSED,
            EventKind::Custom(kind) => kind,
        }
    }

    /// Decode an integral kind. Reserved values that don't name an engine event are
    /// rejected.
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            RAW_EXT_SOURCE_INIT => Ok(EventKind::ExtSourceInit),
            RAW_INT_SOURCE_INIT => Ok(EventKind::IntSourceInit),
            RAW_TIMER_ELAPSED => Ok(EventKind::TimerElapsed),
            kind => EventKind::custom(kind),
        }
    }

    /// True for the kinds produced by senders rather than by the engine
    pub fn is_custom(&self) -> bool {
        matches!(self, EventKind::Custom(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::ExtSourceInit => write!(f, "ExtSourceInit"),
            EventKind::IntSourceInit => write!(f, "IntSourceInit"),
            EventKind::TimerElapsed => write!(f, "TimerElapsed"),
            EventKind::Custom(kind) => write!(f, "Custom({})", kind),
        }
    }
}

/// Identification of a registered event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventSourceId {
    /// Source of events posted by the platform, addressed by sender handle
    External(usize),
    /// Source of events posted by software inside the dispatcher system
    Internal(usize),
}

impl EventSourceId {
    /// The index within the external or internal table, respectively
    pub fn index(&self) -> usize {
        match self {
            EventSourceId::External(idx) | EventSourceId::Internal(idx) => *idx,
        }
    }

    /// The system wide, combined index: external sources come first, internal sources
    /// follow after the capacity of the external table.
    pub fn combined_index(&self, max_external_sources: usize) -> usize {
        match self {
            EventSourceId::External(idx) => *idx,
            EventSourceId::Internal(idx) => max_external_sources + idx,
        }
    }
}

impl fmt::Display for EventSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSourceId::External(idx) => write!(f, "ext#{}", idx),
            EventSourceId::Internal(idx) => write!(f, "int#{}", idx),
        }
    }
}

/// Handle of a timer. Handles are generational: once a timer is killed, its handle is
/// rejected even if the storage slot is reused by a later timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl TimerHandle {
    /// A handle that never refers to a timer
    pub const INVALID: TimerHandle = TimerHandle {
        slot: u32::MAX,
        generation: 0,
    };

    /// Check for the sentinel value
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "timer#{}.{}", self.slot, self.generation)
        } else {
            write!(f, "timer#invalid")
        }
    }
}

/// Errors that can occur while configuring or operating a dispatcher system
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatcherError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dispatcher index {0} is out of range")]
    DispatcherIndexOutOfRange(usize),

    #[error("Dispatcher {0} has already been created")]
    DispatcherAlreadyCreated(usize),

    #[error("Dispatcher {0} has not been created")]
    DispatcherNotCreated(usize),

    #[error("Dispatcher {0} has been taken out of the system")]
    DispatcherTaken(usize),

    #[error("Too many {kind} event sources, capacity is {capacity}")]
    TooManyEventSources { kind: &'static str, capacity: usize },

    #[error("Sender handle {0} is already registered")]
    DuplicateSenderHandle(SenderHandle),

    #[error("Unknown event source: {0}")]
    UnknownEventSource(String),

    #[error("Invalid timer handle: {0}")]
    InvalidTimerHandle(TimerHandle),

    #[error("Operation requires a single-shot timer: {0}")]
    WrongTimerKind(TimerHandle),

    #[error("Event kind {0} is reserved for the dispatcher engine")]
    InvalidEventKind(u32),

    #[error("Event payload of {size} bytes exceeds the port limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Port queue is full, capacity is {0}")]
    QueueFull(usize),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}
