//! The dispatcher
//!
//! A dispatcher owns a set of event sources, their timers and the receiving ends of its
//! ports. The integration calls `dispatcher_main` once per tick, always from the same
//! thread; all callbacks of the dispatcher's sources and timers are executed inside this
//! call.
//!
//! One tick consists of:
//! 1. Advance the tick counter and fire all timers, which are due now
//! 2. Deliver the init event to newly registered event sources
//! 3. Drain the ports in the order they were passed to the dispatcher

use crate::callback::{Callback, CallbackContext, UserData};
use crate::config::DispatcherConfig;
use crate::port::{EventAddress, EventReceiverPort, QueuedEvent};
use crate::registry::SourceRegistry;
use crate::timer::TimerQueue;
use crate::types::{EventKind, EventSourceId, Result, SenderHandle};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counters describing the work done by a dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Number of completed calls of `dispatcher_main`
    pub ticks: u64,
    /// Number of port events delivered to a callback
    pub events_dispatched: u64,
    /// Number of init events delivered
    pub sources_initialized: u64,
    /// Number of timer callbacks invoked
    pub timers_fired: u64,
    /// Port events addressed to a source nobody registered
    pub unknown_source_events: u64,
    /// Port events addressed to a source of another dispatcher
    pub misrouted_events: u64,
}

struct SourceEntry {
    callback: Option<Callback>,
    data: Option<UserData>,
}

/// A single event loop of a dispatcher system
pub struct Dispatcher {
    idx: usize,
    config: DispatcherConfig,
    ports: Vec<EventReceiverPort>,
    registry: Arc<RwLock<SourceRegistry>>,
    check_event_delivery: bool,
    sources: BTreeMap<EventSourceId, SourceEntry>,
    /// Sources registered since the last tick, still waiting for their init event
    pending_init: Vec<EventSourceId>,
    timers: TimerQueue,
    tick: u64,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub(crate) fn new(
        idx: usize,
        config: DispatcherConfig,
        ports: Vec<EventReceiverPort>,
        registry: Arc<RwLock<SourceRegistry>>,
        check_event_delivery: bool,
    ) -> Self {
        Self {
            idx,
            config,
            ports,
            registry,
            check_event_delivery,
            sources: BTreeMap::new(),
            pending_init: Vec::new(),
            timers: TimerQueue::new(),
            tick: 0,
            stats: DispatcherStats::default(),
        }
    }

    /// Register an external event source owned by this dispatcher. The events posted
    /// with `sender_handle` are delivered to `callback`.
    pub fn register_external_event_source<F>(
        &mut self,
        sender_handle: SenderHandle,
        callback: F,
        data: Option<UserData>,
    ) -> Result<usize>
    where
        F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
    {
        let idx = self
            .registry
            .write()
            .register_external(self.idx, sender_handle)?;
        self.add_source(EventSourceId::External(idx), Box::new(callback), data);
        log::debug!(
            "Dispatcher {}: external event source {} registered for sender handle {}",
            self.name(),
            idx,
            sender_handle
        );
        Ok(idx)
    }

    /// Register an internal event source owned by this dispatcher
    pub fn register_internal_event_source<F>(
        &mut self,
        callback: F,
        data: Option<UserData>,
    ) -> Result<usize>
    where
        F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
    {
        let idx = self.registry.write().register_internal(self.idx)?;
        self.add_source(EventSourceId::Internal(idx), Box::new(callback), data);
        log::debug!("Dispatcher {}: internal event source {} registered", self.name(), idx);
        Ok(idx)
    }

    fn add_source(&mut self, id: EventSourceId, callback: Callback, data: Option<UserData>) {
        self.sources.insert(
            id,
            SourceEntry {
                callback: Some(callback),
                data,
            },
        );
        self.pending_init.push(id);
    }

    /// Process one tick: due timers, pending init events and all queued port events
    pub fn dispatcher_main(&mut self) {
        self.tick += 1;
        log::trace!("Dispatcher {}: tick {}", self.name(), self.tick);

        self.fire_due_timers();
        self.initialize_sources();
        self.drain_ports();

        self.stats.ticks += 1;
    }

    /// Run a number of ticks back to back, without waiting for real time to pass
    pub fn run_for(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.dispatcher_main();
        }
    }

    fn fire_due_timers(&mut self) {
        while let Some(mut fired) = self.timers.pop_due(self.tick) {
            let installed = {
                let source_data = self
                    .sources
                    .get_mut(&fired.owner)
                    .and_then(|entry| entry.data.as_deref_mut());
                let mut context = CallbackContext {
                    idx_dispatcher: self.idx,
                    config: &self.config,
                    tick: self.tick,
                    max_external_sources: self.registry.read().max_external(),
                    kind: EventKind::TimerElapsed,
                    payload: &[],
                    idx_port: None,
                    source: fired.owner,
                    source_data,
                    timer: Some(fired.handle),
                    timer_data: fired.data.as_deref_mut(),
                    timers: &mut self.timers,
                    installed: None,
                };
                (fired.callback)(&mut context);
                context.installed.take()
            };

            self.stats.timers_fired += 1;
            let owner = fired.owner;
            self.timers.end_fire(fired);

            if let Some((callback, data)) = installed {
                if let Some(entry) = self.sources.get_mut(&owner) {
                    entry.callback = Some(callback);
                    entry.data = data;
                }
            }
        }
    }

    fn initialize_sources(&mut self) {
        if self.pending_init.is_empty() {
            return;
        }
        // External before internal, each in registration order.
        let mut pending = std::mem::take(&mut self.pending_init);
        pending.sort_unstable();

        for id in pending {
            let kind = match id {
                EventSourceId::External(_) => EventKind::ExtSourceInit,
                EventSourceId::Internal(_) => EventKind::IntSourceInit,
            };
            self.invoke_source(id, kind, &[], None);
            self.stats.sources_initialized += 1;
        }
    }

    fn drain_ports(&mut self) {
        for idx_port in 0..self.ports.len() {
            // Events posted while draining wait for the next tick.
            let pending = self.ports[idx_port].len();
            for _ in 0..pending {
                let Some(event) = self.ports[idx_port].read_from_head() else {
                    break;
                };
                self.process_event(idx_port, event);
            }
        }
    }

    fn process_event(&mut self, idx_port: usize, event: QueuedEvent) {
        let Some(id) = self.resolve(event.address) else {
            self.stats.unknown_source_events += 1;
            log::warn!(
                "Dispatcher {}: event {} on port {} for unknown source {:?} dropped",
                self.name(),
                event.kind,
                idx_port,
                event.address
            );
            return;
        };

        if !self.sources.contains_key(&id) {
            self.report_foreign_event(idx_port, id);
            return;
        }

        log::trace!(
            "Dispatcher {}: event {} from source {} on port {}",
            self.name(),
            event.kind,
            id,
            idx_port
        );
        self.invoke_source(id, event.kind, &event.payload, Some(idx_port));
        self.stats.events_dispatched += 1;
    }

    fn resolve(&self, address: EventAddress) -> Option<EventSourceId> {
        let registry = self.registry.read();
        match address {
            EventAddress::Sender(handle) => {
                registry.lookup_sender(handle).map(EventSourceId::External)
            }
            EventAddress::Internal(idx) if idx < registry.no_internal() => {
                Some(EventSourceId::Internal(idx))
            }
            EventAddress::Internal(_) => None,
        }
    }

    fn report_foreign_event(&mut self, idx_port: usize, id: EventSourceId) {
        if self.check_event_delivery {
            let owner = self.registry.read().owner(id);
            self.stats.misrouted_events += 1;
            log::error!(
                "Dispatcher {}: event of source {} received on port {}, but the source belongs \
                 to dispatcher {:?}; event dropped",
                self.name(),
                id,
                idx_port,
                owner
            );
        } else {
            self.stats.unknown_source_events += 1;
            log::warn!(
                "Dispatcher {}: event of foreign source {} on port {} dropped",
                self.name(),
                id,
                idx_port
            );
        }
    }

    fn invoke_source(
        &mut self,
        id: EventSourceId,
        kind: EventKind,
        payload: &[u8],
        idx_port: Option<usize>,
    ) {
        let max_external_sources = self.registry.read().max_external();
        let Some(entry) = self.sources.get_mut(&id) else {
            return;
        };
        let Some(mut callback) = entry.callback.take() else {
            return;
        };

        let installed = {
            let mut context = CallbackContext {
                idx_dispatcher: self.idx,
                config: &self.config,
                tick: self.tick,
                max_external_sources,
                kind,
                payload,
                idx_port,
                source: id,
                source_data: entry.data.as_deref_mut(),
                timer: None,
                timer_data: None,
                timers: &mut self.timers,
                installed: None,
            };
            callback(&mut context);
            context.installed.take()
        };

        match installed {
            Some((new_callback, new_data)) => {
                entry.callback = Some(new_callback);
                entry.data = new_data;
            }
            None => entry.callback = Some(callback),
        }
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    /// The configured name, or the index if the dispatcher has no name
    pub fn name(&self) -> String {
        self.config
            .name
            .clone()
            .unwrap_or_else(|| self.idx.to_string())
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Number of completed ticks
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    /// Number of existing timers, armed or suspended
    pub fn no_timers(&self) -> usize {
        self.timers.len()
    }

    /// Number of event sources owned by this dispatcher
    pub fn no_event_sources(&self) -> usize {
        self.sources.len()
    }

    /// The receiving ends of the ports, e.g. for queue diagnostics
    pub fn ports(&self) -> &[EventReceiverPort] {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::user_data;
    use crate::port::event_port;
    use std::sync::Mutex;

    fn dispatcher_with_port(check: bool) -> (Dispatcher, crate::port::EventSenderPort) {
        let (tx, rx) = event_port(16, 8);
        let registry = Arc::new(RwLock::new(SourceRegistry::new(8, 8)));
        let config = DispatcherConfig::new().with_tick_ms(10);
        let dispatcher = Dispatcher::new(0, config, vec![rx], registry, check);
        (dispatcher, tx)
    }

    #[test]
    fn test_init_event_before_port_events() {
        let (mut dispatcher, tx) = dispatcher_with_port(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        dispatcher
            .register_external_event_source(
                0x55,
                move |ctx| {
                    let entry = (ctx.kind(), ctx.idx_port(), ctx.event_data().to_vec());
                    log.lock().unwrap().push(entry);
                },
                None,
            )
            .unwrap();

        tx.post_external(0x55, 3, &[9]).unwrap();
        dispatcher.dispatcher_main();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (EventKind::ExtSourceInit, None, vec![]),
                (EventKind::Custom(3), Some(0), vec![9]),
            ]
        );
        assert_eq!(dispatcher.stats().sources_initialized, 1);
        assert_eq!(dispatcher.stats().events_dispatched, 1);
    }

    #[test]
    fn test_source_data_and_install_callback() {
        let (mut dispatcher, tx) = dispatcher_with_port(true);
        let result = Arc::new(Mutex::new(0u32));
        let out = Arc::clone(&result);

        dispatcher
            .register_internal_event_source(
                move |ctx| {
                    if ctx.kind() == EventKind::IntSourceInit {
                        return;
                    }
                    *ctx.event_source_data::<u32>().unwrap() += 1;
                    let out = Arc::clone(&out);
                    ctx.install_callback(
                        move |ctx| {
                            *out.lock().unwrap() = *ctx.event_source_data::<u32>().unwrap();
                        },
                        user_data(100u32),
                    );
                },
                user_data(0u32),
            )
            .unwrap();

        tx.post_internal(0, 1, &[]).unwrap();
        tx.post_internal(0, 1, &[]).unwrap();
        dispatcher.dispatcher_main();

        assert_eq!(*result.lock().unwrap(), 100);
    }

    #[test]
    fn test_unknown_and_foreign_sources() {
        let (mut dispatcher, tx) = dispatcher_with_port(true);
        dispatcher.registry.write().register_external(1, 0x77).unwrap();

        tx.post_external(0x66, 0, &[]).unwrap();
        tx.post_external(0x77, 0, &[]).unwrap();
        tx.post_internal(5, 0, &[]).unwrap();
        dispatcher.dispatcher_main();

        let stats = dispatcher.stats();
        assert_eq!(stats.unknown_source_events, 2);
        assert_eq!(stats.misrouted_events, 1);
        assert_eq!(stats.events_dispatched, 0);
    }

    #[test]
    fn test_timer_sees_owner_and_context_data() {
        let (mut dispatcher, _tx) = dispatcher_with_port(false);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&fired);

        dispatcher
            .register_external_event_source(
                1,
                move |ctx| {
                    if ctx.kind() != EventKind::ExtSourceInit {
                        return;
                    }
                    let log = Arc::clone(&log);
                    ctx.create_periodic_timer(
                        20,
                        move |ctx| {
                            let count = ctx.timer_context_data::<u32>().unwrap();
                            *count += 1;
                            let count = *count;
                            let owner = *ctx.event_source_data::<&str>().unwrap();
                            log.lock().unwrap().push((ctx.tick(), count, owner));
                        },
                        user_data(0u32),
                    );
                },
                user_data("owner"),
            )
            .unwrap();

        dispatcher.run_for(6);
        assert_eq!(
            *fired.lock().unwrap(),
            vec![(3, 1, "owner"), (5, 2, "owner")]
        );
        assert_eq!(dispatcher.no_timers(), 1);
    }

    #[test]
    fn test_install_callback_from_timer_replaces_owner_callback() {
        let (mut dispatcher, tx) = dispatcher_with_port(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        dispatcher
            .register_internal_event_source(
                move |ctx| match ctx.kind() {
                    EventKind::IntSourceInit => {
                        let log = Arc::clone(&log);
                        ctx.create_single_shot_timer(
                            10,
                            move |ctx| {
                                let log = Arc::clone(&log);
                                ctx.install_callback(
                                    move |ctx| {
                                        let entry =
                                            format!("new {} {:?}", ctx.kind(), ctx.idx_port());
                                        log.lock().unwrap().push(entry);
                                    },
                                    None,
                                );
                            },
                            None,
                            true,
                        );
                    }
                    kind => log.lock().unwrap().push(format!("old {}", kind)),
                },
                None,
            )
            .unwrap();

        // Tick 1: init, tick 2: the timer installs the new callback
        dispatcher.run_for(2);
        tx.post_internal(0, 4, &[]).unwrap();
        dispatcher.dispatcher_main();

        assert_eq!(*seen.lock().unwrap(), vec!["new Custom(4) Some(0)".to_string()]);
        assert_eq!(dispatcher.no_timers(), 0);
    }

    #[test]
    fn test_foreign_event_without_delivery_check() {
        let (mut dispatcher, tx) = dispatcher_with_port(false);
        dispatcher.registry.write().register_external(1, 0x77).unwrap();

        tx.post_external(0x77, 0, &[]).unwrap();
        dispatcher.dispatcher_main();

        let stats = dispatcher.stats();
        assert_eq!(stats.unknown_source_events, 1);
        assert_eq!(stats.misrouted_events, 0);
    }

    #[test]
    fn test_events_posted_while_draining_wait_for_next_tick() {
        let (mut dispatcher, tx) = dispatcher_with_port(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let own_port = tx.clone();

        dispatcher
            .register_internal_event_source(
                move |ctx| {
                    if !ctx.kind().is_custom() {
                        return;
                    }
                    let value = ctx.event_data()[0];
                    log.lock().unwrap().push((ctx.tick(), value));
                    if value < 3 {
                        own_port.post_internal(0, 1, &[value + 1]).unwrap();
                    }
                },
                None,
            )
            .unwrap();

        tx.post_internal(0, 1, &[1]).unwrap();
        dispatcher.run_for(4);

        assert_eq!(*seen.lock().unwrap(), vec![(1, 1), (2, 2), (3, 3)]);
        assert!(dispatcher.ports()[0].is_empty());
    }

    #[test]
    fn test_kill_at_due_timer_survives_when_retriggered() {
        let (mut dispatcher, _tx) = dispatcher_with_port(true);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&fired);

        dispatcher
            .register_internal_event_source(
                move |ctx| {
                    if ctx.kind() != EventKind::IntSourceInit {
                        return;
                    }
                    let log = Arc::clone(&log);
                    ctx.create_single_shot_timer(
                        10,
                        move |ctx| {
                            log.lock().unwrap().push(ctx.tick());
                            let count = ctx.timer_context_data::<u32>().unwrap();
                            *count += 1;
                            if *count < 3 {
                                let me = ctx.timer_handle().unwrap();
                                ctx.retrigger_single_shot_timer(me, 10).unwrap();
                            }
                        },
                        user_data(0u32),
                        true,
                    );
                },
                None,
            )
            .unwrap();

        dispatcher.run_for(3);
        assert_eq!(*fired.lock().unwrap(), vec![2, 3]);
        assert_eq!(dispatcher.no_timers(), 1);

        dispatcher.run_for(3);
        assert_eq!(*fired.lock().unwrap(), vec![2, 3, 4]);
        assert_eq!(dispatcher.no_timers(), 0);
    }

    #[test]
    fn test_init_order_external_before_internal() {
        let (mut dispatcher, _tx) = dispatcher_with_port(true);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        dispatcher
            .register_internal_event_source(
                move |ctx| log.lock().unwrap().push(ctx.event_source()),
                None,
            )
            .unwrap();
        let log = Arc::clone(&seen);
        dispatcher
            .register_external_event_source(
                9,
                move |ctx| log.lock().unwrap().push(ctx.event_source()),
                None,
            )
            .unwrap();

        dispatcher.run_for(2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventSourceId::External(0), EventSourceId::Internal(0)]
        );
        assert_eq!(dispatcher.stats().sources_initialized, 2);
    }
}
