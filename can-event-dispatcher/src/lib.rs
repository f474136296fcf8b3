//! CAN Event Dispatcher Library
//!
//! An event dispatcher engine for CAN interface integrations. Events from the platform
//! (e.g. received CAN frames) and from software are queued in ports and delivered to
//! callbacks by dispatchers, which also operate periodic and single-shot timers.
//!
//! # Architecture
//!
//! - A `DispatcherSystem` holds one or more `Dispatcher`s and the system wide registry
//!   of event sources
//! - External event sources are addressed by the platform's sender handle, internal
//!   event sources by their index
//! - Senders post events through an `EventSenderPort` from any thread; the owning
//!   dispatcher drains its `EventReceiverPort`s once per tick
//! - Callbacks receive a `CallbackContext`, through which they inspect the event and
//!   create, kill, suspend or retrigger timers
//!
//! # Example Usage
//!
//! ```no_run
//! use can_event_dispatcher::{
//!     event_port, user_data, DispatcherConfig, DispatcherSystem, EventKind, SystemConfig,
//! };
//!
//! let (sender, receiver) = event_port(32, 16);
//! let mut system = DispatcherSystem::new(SystemConfig::new()).unwrap();
//! system
//!     .create_dispatcher(0, DispatcherConfig::new().with_tick_ms(10), vec![receiver])
//!     .unwrap();
//!
//! system
//!     .register_external_event_source(
//!         0,
//!         0x123,
//!         |ctx| match ctx.kind() {
//!             EventKind::ExtSourceInit => {
//!                 ctx.create_periodic_timer(100, |_| println!("100 ms elapsed"), None);
//!             }
//!             kind => println!("Event {} with {} bytes", kind, ctx.event_data().len()),
//!         },
//!         user_data(0u32),
//!     )
//!     .unwrap();
//!
//! sender.post_external(0x123, 1, &[0xAA]).unwrap();
//! loop {
//!     system.dispatcher_main(0).unwrap();
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

// Public modules
pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod frame;
pub mod port;
pub mod system;
pub mod types;

// Re-export main types for convenience
pub use callback::{boxed, user_data, Callback, CallbackContext, UserData};
pub use config::{DispatcherConfig, SystemConfig};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use frame::CanFrame;
pub use port::{event_port, EventReceiverPort, EventSenderPort};
pub use system::DispatcherSystem;
pub use types::{
    DispatcherError, EventKind, EventSourceId, Result, SenderHandle, TimerHandle,
    FIRST_CUSTOM_EVENT, INVALID_EVENT_SOURCE_INDEX, KIND_LAST,
};

// Internal modules (not exposed in public API)
mod registry;
mod timer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: a system with one dispatcher and no sources just ticks
        let mut system = DispatcherSystem::new(SystemConfig::new()).unwrap();
        system.create_dispatcher(0, DispatcherConfig::new(), vec![]).unwrap();
        system.dispatcher_main(0).unwrap();
        assert_eq!(system.dispatcher(0).unwrap().stats().ticks, 1);
    }
}
