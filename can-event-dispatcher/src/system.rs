//! The dispatcher system
//!
//! Container of all dispatchers of an application and owner of the system wide event
//! source registry. Typical use is to create the system and its dispatchers and to
//! register all event sources during initialization. Afterwards, either each dispatcher
//! is stepped through `DispatcherSystem::dispatcher_main`, or it is taken out of the
//! system and moved into the thread that is going to run it.

use crate::callback::{CallbackContext, UserData};
use crate::config::{DispatcherConfig, SystemConfig};
use crate::dispatcher::Dispatcher;
use crate::port::EventReceiverPort;
use crate::registry::SourceRegistry;
use crate::types::{DispatcherError, Result, SenderHandle};
use parking_lot::RwLock;
use std::sync::Arc;

enum DispatcherSlot {
    Empty,
    Created(Box<Dispatcher>),
    Taken,
}

/// A set of dispatchers sharing one event source registry
pub struct DispatcherSystem {
    config: SystemConfig,
    registry: Arc<RwLock<SourceRegistry>>,
    dispatchers: Vec<DispatcherSlot>,
}

impl DispatcherSystem {
    /// Create a dispatcher system. The dispatchers themselves are created one by one
    /// with `create_dispatcher`.
    pub fn new(config: SystemConfig) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Creating dispatcher system: {} dispatcher(s), {} external and {} internal \
             event sources",
            config.no_dispatchers,
            config.max_external_sources,
            config.max_internal_sources
        );

        let registry =
            SourceRegistry::new(config.max_external_sources, config.max_internal_sources);
        let dispatchers = (0..config.no_dispatchers).map(|_| DispatcherSlot::Empty).collect();
        Ok(Self {
            config,
            registry: Arc::new(RwLock::new(registry)),
            dispatchers,
        })
    }

    /// Create the dispatcher with the given index, listening to the given ports
    pub fn create_dispatcher(
        &mut self,
        idx_dispatcher: usize,
        config: DispatcherConfig,
        ports: Vec<EventReceiverPort>,
    ) -> Result<()> {
        config.validate()?;
        let check = self.config.check_event_delivery;
        let registry = Arc::clone(&self.registry);

        let slot = self
            .dispatchers
            .get_mut(idx_dispatcher)
            .ok_or(DispatcherError::DispatcherIndexOutOfRange(idx_dispatcher))?;
        if !matches!(slot, DispatcherSlot::Empty) {
            return Err(DispatcherError::DispatcherAlreadyCreated(idx_dispatcher));
        }

        log::info!(
            "Creating dispatcher {} with tick {} ms and {} port(s)",
            idx_dispatcher,
            config.tick_ms,
            ports.len()
        );
        *slot = DispatcherSlot::Created(Box::new(Dispatcher::new(
            idx_dispatcher,
            config,
            ports,
            registry,
            check,
        )));
        Ok(())
    }

    /// Access a dispatcher, which is still owned by the system
    pub fn dispatcher(&self, idx_dispatcher: usize) -> Result<&Dispatcher> {
        match self.dispatchers.get(idx_dispatcher) {
            Some(DispatcherSlot::Created(dispatcher)) => Ok(&**dispatcher),
            Some(DispatcherSlot::Empty) => {
                Err(DispatcherError::DispatcherNotCreated(idx_dispatcher))
            }
            Some(DispatcherSlot::Taken) => Err(DispatcherError::DispatcherTaken(idx_dispatcher)),
            None => Err(DispatcherError::DispatcherIndexOutOfRange(idx_dispatcher)),
        }
    }

    pub fn dispatcher_mut(&mut self, idx_dispatcher: usize) -> Result<&mut Dispatcher> {
        match self.dispatchers.get_mut(idx_dispatcher) {
            Some(DispatcherSlot::Created(dispatcher)) => Ok(&mut **dispatcher),
            Some(DispatcherSlot::Empty) => {
                Err(DispatcherError::DispatcherNotCreated(idx_dispatcher))
            }
            Some(DispatcherSlot::Taken) => Err(DispatcherError::DispatcherTaken(idx_dispatcher)),
            None => Err(DispatcherError::DispatcherIndexOutOfRange(idx_dispatcher)),
        }
    }

    /// Register an external event source at the given dispatcher
    pub fn register_external_event_source<F>(
        &mut self,
        idx_dispatcher: usize,
        sender_handle: SenderHandle,
        callback: F,
        data: Option<UserData>,
    ) -> Result<usize>
    where
        F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
    {
        self.dispatcher_mut(idx_dispatcher)?
            .register_external_event_source(sender_handle, callback, data)
    }

    /// Register an internal event source at the given dispatcher
    pub fn register_internal_event_source<F>(
        &mut self,
        idx_dispatcher: usize,
        callback: F,
        data: Option<UserData>,
    ) -> Result<usize>
    where
        F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
    {
        self.dispatcher_mut(idx_dispatcher)?
            .register_internal_event_source(callback, data)
    }

    /// Process one tick of the given dispatcher
    pub fn dispatcher_main(&mut self, idx_dispatcher: usize) -> Result<()> {
        self.dispatcher_mut(idx_dispatcher)?.dispatcher_main();
        Ok(())
    }

    /// Move a dispatcher out of the system, e.g. to run it in a thread of its own. The
    /// registry stays shared, so events are still routed system wide.
    pub fn take_dispatcher(&mut self, idx_dispatcher: usize) -> Result<Dispatcher> {
        self.dispatcher(idx_dispatcher)?;
        match std::mem::replace(&mut self.dispatchers[idx_dispatcher], DispatcherSlot::Taken) {
            DispatcherSlot::Created(dispatcher) => Ok(*dispatcher),
            _ => Err(DispatcherError::DispatcherNotCreated(idx_dispatcher)),
        }
    }

    /// Move all created dispatchers out of the system
    pub fn take_all_dispatchers(&mut self) -> Vec<Dispatcher> {
        (0..self.dispatchers.len())
            .filter_map(|idx| self.take_dispatcher(idx).ok())
            .collect()
    }

    /// Map a sender handle to the index of its external event source
    pub fn idx_external_event_source(&self, sender_handle: SenderHandle) -> Option<usize> {
        self.registry.read().lookup_sender(sender_handle)
    }

    /// The sender handle an external event source was registered with
    pub fn sender_handle(&self, idx_external_source: usize) -> Option<SenderHandle> {
        self.registry.read().sender_handle(idx_external_source)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn no_dispatchers(&self) -> usize {
        self.dispatchers.len()
    }

    /// Number of registered external and internal event sources
    pub fn no_event_sources(&self) -> (usize, usize) {
        let registry = self.registry.read();
        (registry.no_external(), registry.no_internal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::event_port;

    #[test]
    fn test_system_creation() {
        let system = DispatcherSystem::new(SystemConfig::new().with_dispatchers(2)).unwrap();
        assert_eq!(system.no_dispatchers(), 2);
        assert!(matches!(
            system.dispatcher(0),
            Err(DispatcherError::DispatcherNotCreated(0))
        ));
        assert!(DispatcherSystem::new(SystemConfig::new().with_dispatchers(0)).is_err());
    }

    #[test]
    fn test_create_dispatcher_errors() {
        let mut system = DispatcherSystem::new(SystemConfig::new()).unwrap();
        system.create_dispatcher(0, DispatcherConfig::new(), vec![]).unwrap();

        assert_eq!(
            system.create_dispatcher(0, DispatcherConfig::new(), vec![]),
            Err(DispatcherError::DispatcherAlreadyCreated(0))
        );
        assert_eq!(
            system.create_dispatcher(1, DispatcherConfig::new(), vec![]),
            Err(DispatcherError::DispatcherIndexOutOfRange(1))
        );
        assert!(matches!(
            system.register_internal_event_source(3, |_| {}, None),
            Err(DispatcherError::DispatcherIndexOutOfRange(3))
        ));
    }

    #[test]
    fn test_take_dispatcher() {
        let mut system = DispatcherSystem::new(SystemConfig::new().with_dispatchers(2)).unwrap();
        let (_tx, rx) = event_port(4, 0);
        system.create_dispatcher(1, DispatcherConfig::new(), vec![rx]).unwrap();
        system.register_external_event_source(1, 42, |_| {}, None).unwrap();

        let dispatcher = system.take_dispatcher(1).unwrap();
        assert_eq!(dispatcher.idx(), 1);
        assert_eq!(dispatcher.no_event_sources(), 1);
        assert!(matches!(system.dispatcher_main(1), Err(DispatcherError::DispatcherTaken(1))));
        assert_eq!(system.idx_external_event_source(42), Some(0));
        assert_eq!(system.sender_handle(0), Some(42));
        assert!(system.take_all_dispatchers().is_empty());
    }
}
