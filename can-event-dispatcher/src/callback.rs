//! Callback binding
//!
//! A callback is invoked by its dispatcher for every event of the event source or timer
//! it is bound to. The callback receives a `CallbackContext`, which describes the event
//! and gives access to the operations that are only allowed in the dispatcher's context,
//! namely the timer operations.

use crate::config::DispatcherConfig;
use crate::timer::{TimerKind, TimerQueue};
use crate::types::{EventKind, EventSourceId, Result, TimerHandle};
use std::any::Any;

/// A callback bound to an event source or timer
pub type Callback = Box<dyn FnMut(&mut CallbackContext<'_>) + Send>;

/// Opaque user data of an event source or timer
pub type UserData = Box<dyn Any + Send>;

/// Box a closure as `Callback`
pub fn boxed<F>(callback: F) -> Callback
where
    F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
{
    Box::new(callback)
}

/// Wrap a value as user data
pub fn user_data<T: Any + Send>(value: T) -> Option<UserData> {
    Some(Box::new(value))
}

/// Everything a callback may know about and do with the event it is invoked for
pub struct CallbackContext<'a> {
    pub(crate) idx_dispatcher: usize,
    pub(crate) config: &'a DispatcherConfig,
    pub(crate) tick: u64,
    pub(crate) max_external_sources: usize,
    pub(crate) kind: EventKind,
    pub(crate) payload: &'a [u8],
    pub(crate) idx_port: Option<usize>,
    pub(crate) source: EventSourceId,
    pub(crate) source_data: Option<&'a mut (dyn Any + Send + 'static)>,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) timer_data: Option<&'a mut (dyn Any + Send + 'static)>,
    pub(crate) timers: &'a mut TimerQueue,
    pub(crate) installed: Option<(Callback, Option<UserData>)>,
}

impl<'a> CallbackContext<'a> {
    /// The kind of the event being processed
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The payload posted together with the event; empty for init and timer events
    pub fn event_data(&self) -> &[u8] {
        self.payload
    }

    /// The event source the event belongs to. For timer events this is the source in
    /// whose context the timer was created.
    pub fn event_source(&self) -> EventSourceId {
        self.source
    }

    /// The system wide, combined index of the event source
    pub fn idx_event_source(&self) -> usize {
        self.source.combined_index(self.max_external_sources)
    }

    pub fn idx_external_event_source(&self) -> Option<usize> {
        match self.source {
            EventSourceId::External(idx) => Some(idx),
            EventSourceId::Internal(_) => None,
        }
    }

    pub fn idx_internal_event_source(&self) -> Option<usize> {
        match self.source {
            EventSourceId::Internal(idx) => Some(idx),
            EventSourceId::External(_) => None,
        }
    }

    /// The user data of the event source, if it has data of type `T`
    pub fn event_source_data<T: Any>(&mut self) -> Option<&mut T> {
        self.source_data.as_deref_mut()?.downcast_mut::<T>()
    }

    /// The port the event was received through; `None` for init and timer events
    pub fn idx_port(&self) -> Option<usize> {
        self.idx_port
    }

    /// The timer whose callback is running; `None` outside timer callbacks
    pub fn timer_handle(&self) -> Option<TimerHandle> {
        self.timer
    }

    /// The context data of the timer whose callback is running, if it has data of type `T`
    pub fn timer_context_data<T: Any>(&mut self) -> Option<&mut T> {
        self.timer_data.as_deref_mut()?.downcast_mut::<T>()
    }

    pub fn idx_dispatcher(&self) -> usize {
        self.idx_dispatcher
    }

    /// Number of dispatcher ticks since the dispatcher was created
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Dispatcher time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.tick * u64::from(self.config.tick_ms)
    }

    /// Replace callback and data of the current event source. The new callback is used
    /// from the next event on; when called more than once, the last call wins.
    pub fn install_callback<F>(&mut self, callback: F, data: Option<UserData>)
    where
        F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
    {
        log::debug!(
            "Dispatcher {}: new callback installed for event source {}",
            self.idx_dispatcher,
            self.source
        );
        let callback: Callback = Box::new(callback);
        self.installed = Some((callback, data));
    }

    /// Create a timer, which is due every `period_ms`, the first time one period from now
    pub fn create_periodic_timer<F>(
        &mut self,
        period_ms: u32,
        callback: F,
        data: Option<UserData>,
    ) -> TimerHandle
    where
        F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
    {
        self.create_periodic_timer_shifted(period_ms, period_ms, callback, data)
    }

    /// Create a timer, which is due every `period_ms`, the first time `first_due_ms` from
    /// now. Shifting the phase distributes the load of timers with the same period.
    pub fn create_periodic_timer_shifted<F>(
        &mut self,
        period_ms: u32,
        first_due_ms: u32,
        callback: F,
        data: Option<UserData>,
    ) -> TimerHandle
    where
        F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
    {
        let period = self.config.ms_to_ticks(period_ms);
        let due = self.tick + self.config.ms_to_ticks(first_due_ms);
        let handle = self.timers.create(
            TimerKind::Periodic { period },
            self.source,
            Box::new(callback),
            data,
            due,
        );
        log::debug!(
            "Dispatcher {}: periodic {} created, period {} ticks, first due at tick {}",
            self.idx_dispatcher,
            handle,
            period,
            due
        );
        handle
    }

    /// Create a timer, which is due once, `delay_ms` from now. With `kill_at_due` the
    /// timer is destroyed after its callback returned, otherwise it stays suspended and
    /// can be retriggered.
    pub fn create_single_shot_timer<F>(
        &mut self,
        delay_ms: u32,
        callback: F,
        data: Option<UserData>,
        kill_at_due: bool,
    ) -> TimerHandle
    where
        F: FnMut(&mut CallbackContext<'_>) + Send + 'static,
    {
        let due = self.tick + self.config.ms_to_ticks(delay_ms);
        let handle = self.timers.create(
            TimerKind::SingleShot { kill_at_due },
            self.source,
            Box::new(callback),
            data,
            due,
        );
        log::debug!(
            "Dispatcher {}: single-shot {} created, due at tick {}",
            self.idx_dispatcher,
            handle,
            due
        );
        handle
    }

    /// Destroy a timer. A timer may kill itself from its own callback.
    pub fn kill_timer(&mut self, handle: TimerHandle) -> Result<()> {
        self.timers.kill(handle)?;
        log::debug!("Dispatcher {}: {} killed", self.idx_dispatcher, handle);
        Ok(())
    }

    /// Stop a single-shot timer without destroying it
    pub fn suspend_single_shot_timer(&mut self, handle: TimerHandle) -> Result<()> {
        self.timers.suspend(handle)
    }

    /// Arm a single-shot timer to be due `delay_ms` from now, regardless of whether it
    /// is currently running or suspended
    pub fn retrigger_single_shot_timer(
        &mut self,
        handle: TimerHandle,
        delay_ms: u32,
    ) -> Result<()> {
        let due = self.tick + self.config.ms_to_ticks(delay_ms);
        self.timers.retrigger(handle, due)
    }

    /// Check if a timer handle still refers to an existing timer
    pub fn is_timer_alive(&self, handle: TimerHandle) -> bool {
        self.timers.contains(handle)
    }
}
