//! Timers of a dispatcher
//!
//! Timers live in a generational slab; the due timers are found through a min-heap
//! ordered by due tick and arming order. Re-arming, suspending or killing a timer doesn't
//! touch the heap: every arming gets a fresh stamp and heap entries with an outdated
//! stamp are skipped when they surface.

use crate::callback::{Callback, UserData};
use crate::types::{DispatcherError, EventSourceId, Result, TimerHandle};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// The behavior of a timer after it became due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Due again after `period` ticks
    Periodic { period: u64 },
    /// Due once; destroyed afterwards if `kill_at_due`, suspended otherwise
    SingleShot { kill_at_due: bool },
}

pub(crate) struct Timer {
    kind: TimerKind,
    owner: EventSourceId,
    callback: Option<Callback>,
    data: Option<UserData>,
    due: Option<u64>,
    stamp: u64,
}

struct Slot {
    generation: u32,
    timer: Option<Timer>,
}

/// A timer, which became due and whose callback is to be invoked. Callback and context
/// data are lent to the caller until `TimerQueue::end_fire`.
pub(crate) struct FiredTimer {
    pub handle: TimerHandle,
    pub owner: EventSourceId,
    pub callback: Callback,
    pub data: Option<UserData>,
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    slots: Vec<Slot>,
    free: Vec<u32>,
    heap: BinaryHeap<Reverse<(u64, u64, u32)>>,
    next_stamp: u64,
    no_timers: usize,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of existing timers, armed or suspended
    pub fn len(&self) -> usize {
        self.no_timers
    }

    /// Add a new timer, armed to be due at the given tick
    pub fn create(
        &mut self,
        kind: TimerKind,
        owner: EventSourceId,
        callback: Callback,
        data: Option<UserData>,
        due: u64,
    ) -> TimerHandle {
        let timer = Timer {
            kind,
            owner,
            callback: Some(callback),
            data,
            due: None,
            stamp: 0,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize].timer = Some(timer);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    timer: Some(timer),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.no_timers += 1;

        let handle = TimerHandle {
            slot,
            generation: self.slots[slot as usize].generation,
        };
        self.arm_slot(slot, due);
        handle
    }

    fn timer_mut(&mut self, handle: TimerHandle) -> Result<&mut Timer> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.timer.as_mut())
            .ok_or(DispatcherError::InvalidTimerHandle(handle))
    }

    fn arm_slot(&mut self, slot: u32, due: u64) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(timer) = self.slots[slot as usize].timer.as_mut() {
            timer.due = Some(due);
            timer.stamp = stamp;
            self.heap.push(Reverse((due, stamp, slot)));
        }
    }

    /// Check if the handle refers to an existing timer
    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.slots
            .get(handle.slot as usize)
            .map_or(false, |s| s.generation == handle.generation && s.timer.is_some())
    }

    /// The tick at which the timer is due next, `None` if it is suspended
    #[cfg(test)]
    pub fn due(&mut self, handle: TimerHandle) -> Result<Option<u64>> {
        Ok(self.timer_mut(handle)?.due)
    }

    /// Destroy a timer; the handle becomes invalid
    pub fn kill(&mut self, handle: TimerHandle) -> Result<()> {
        self.timer_mut(handle)?;
        let slot = &mut self.slots[handle.slot as usize];
        slot.timer = None;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(handle.slot);
        self.no_timers -= 1;
        Ok(())
    }

    /// Disarm a single-shot timer without destroying it
    pub fn suspend(&mut self, handle: TimerHandle) -> Result<()> {
        let timer = self.timer_mut(handle)?;
        if !matches!(timer.kind, TimerKind::SingleShot { .. }) {
            return Err(DispatcherError::WrongTimerKind(handle));
        }
        timer.due = None;
        Ok(())
    }

    /// (Re-)arm a single-shot timer to be due at the given tick
    pub fn retrigger(&mut self, handle: TimerHandle, due: u64) -> Result<()> {
        let timer = self.timer_mut(handle)?;
        if !matches!(timer.kind, TimerKind::SingleShot { .. }) {
            return Err(DispatcherError::WrongTimerKind(handle));
        }
        self.arm_slot(handle.slot, due);
        Ok(())
    }

    /// Take the next timer due at or before `now`. A periodic timer is re-armed before
    /// its callback runs, a single-shot timer is disarmed; either can be changed by the
    /// callback.
    pub fn pop_due(&mut self, now: u64) -> Option<FiredTimer> {
        while let Some(Reverse((due, stamp, slot))) = self.heap.peek().copied() {
            if due > now {
                return None;
            }
            self.heap.pop();

            let generation = self.slots[slot as usize].generation;
            let Some(timer) = self.slots[slot as usize].timer.as_mut() else {
                continue;
            };
            if timer.stamp != stamp || timer.due != Some(due) {
                continue;
            }
            let Some(callback) = timer.callback.take() else {
                continue;
            };

            let owner = timer.owner;
            let kind = timer.kind;
            let data = timer.data.take();
            timer.due = None;
            if let TimerKind::Periodic { period } = kind {
                self.arm_slot(slot, due + period);
            }

            return Some(FiredTimer {
                handle: TimerHandle { slot, generation },
                owner,
                callback,
                data,
            });
        }
        None
    }

    /// Return the lent callback and data after the callback has run. A timer killed by
    /// its own callback is gone already; a single-shot timer with `kill_at_due`, which
    /// wasn't retriggered, is destroyed now.
    pub fn end_fire(&mut self, fired: FiredTimer) {
        let FiredTimer {
            handle,
            callback,
            data,
            ..
        } = fired;

        let Ok(timer) = self.timer_mut(handle) else {
            return;
        };
        timer.callback = Some(callback);
        timer.data = data;

        let expired = matches!(timer.kind, TimerKind::SingleShot { kill_at_due: true })
            && timer.due.is_none();
        if expired {
            // Handle was checked just above.
            let _ = self.kill(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        crate::callback::boxed(|_| {})
    }

    const OWNER: EventSourceId = EventSourceId::External(0);

    fn fire_all(queue: &mut TimerQueue, now: u64) -> Vec<TimerHandle> {
        let mut fired = Vec::new();
        while let Some(timer) = queue.pop_due(now) {
            fired.push(timer.handle);
            queue.end_fire(timer);
        }
        fired
    }

    #[test]
    fn test_periodic_timer() {
        let mut queue = TimerQueue::new();
        let h = queue.create(TimerKind::Periodic { period: 3 }, OWNER, noop(), None, 3);

        assert!(fire_all(&mut queue, 2).is_empty());
        assert_eq!(fire_all(&mut queue, 3), vec![h]);
        assert_eq!(queue.due(h).unwrap(), Some(6));
        assert!(fire_all(&mut queue, 5).is_empty());
        assert_eq!(fire_all(&mut queue, 6), vec![h]);
    }

    #[test]
    fn test_due_order_and_ties() {
        let mut queue = TimerQueue::new();
        let single = TimerKind::SingleShot { kill_at_due: true };
        let late = queue.create(single, OWNER, noop(), None, 5);
        let first = queue.create(single, OWNER, noop(), None, 4);
        let second = queue.create(single, OWNER, noop(), None, 4);

        assert_eq!(fire_all(&mut queue, 5), vec![first, second, late]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_single_shot_suspend_and_retrigger() {
        let mut queue = TimerQueue::new();
        let h = queue.create(TimerKind::SingleShot { kill_at_due: false }, OWNER, noop(), None, 2);

        assert_eq!(fire_all(&mut queue, 2), vec![h]);
        assert!(queue.contains(h));
        assert_eq!(queue.due(h).unwrap(), None);

        queue.retrigger(h, 10).unwrap();
        queue.retrigger(h, 7).unwrap();
        assert!(fire_all(&mut queue, 6).is_empty());
        assert_eq!(fire_all(&mut queue, 10), vec![h]);

        queue.retrigger(h, 12).unwrap();
        queue.suspend(h).unwrap();
        queue.suspend(h).unwrap();
        assert!(fire_all(&mut queue, 20).is_empty());
    }

    #[test]
    fn test_kill_invalidates_handle() {
        let mut queue = TimerQueue::new();
        let h = queue.create(TimerKind::Periodic { period: 1 }, OWNER, noop(), None, 1);
        queue.kill(h).unwrap();

        assert_eq!(queue.kill(h), Err(DispatcherError::InvalidTimerHandle(h)));
        assert!(fire_all(&mut queue, 5).is_empty());

        let reused = queue.create(TimerKind::Periodic { period: 1 }, OWNER, noop(), None, 6);
        assert_eq!(reused.slot, h.slot);
        assert_ne!(reused, h);
        assert!(!queue.contains(h));
        assert!(queue.kill(TimerHandle::INVALID).is_err());
    }

    #[test]
    fn test_periodic_rejects_single_shot_operations() {
        let mut queue = TimerQueue::new();
        let h = queue.create(TimerKind::Periodic { period: 2 }, OWNER, noop(), None, 2);
        assert_eq!(queue.suspend(h), Err(DispatcherError::WrongTimerKind(h)));
        assert_eq!(queue.retrigger(h, 4), Err(DispatcherError::WrongTimerKind(h)));
    }
}
