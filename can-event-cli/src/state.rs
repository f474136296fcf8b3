//! Reception state of the simulated messages
//!
//! Filled by the dispatcher callbacks, which may run in different threads, and read by
//! the report generator after the run.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reception statistics of one CAN message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    pub name: String,
    pub can_id: u32,
    pub dispatcher: usize,
    pub sent: u64,
    pub lost: u64,
    pub received: u64,
    pub timeouts: u64,
    pub recoveries: u64,
    pub in_timeout: bool,
    pub last_data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct SimulationState {
    pub messages: BTreeMap<u32, MessageStats>,
    /// Timeout notifications received by the diagnostics source of each dispatcher
    pub timeout_notifications: BTreeMap<usize, u64>,
}

pub type SharedState = Arc<Mutex<SimulationState>>;

pub fn shared_state() -> SharedState {
    Arc::new(Mutex::new(SimulationState::default()))
}

impl SimulationState {
    pub fn message_mut(&mut self, can_id: u32) -> Option<&mut MessageStats> {
        self.messages.get_mut(&can_id)
    }

    /// Number of messages currently in timeout
    pub fn no_messages_in_timeout(&self) -> usize {
        self.messages.values().filter(|m| m.in_timeout).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_in_timeout() {
        let state = shared_state();
        {
            let mut state = state.lock();
            for can_id in [1, 2, 3] {
                state.messages.insert(can_id, MessageStats { can_id, ..Default::default() });
            }
            state.message_mut(2).unwrap().in_timeout = true;
        }
        assert_eq!(state.lock().no_messages_in_timeout(), 1);
        assert!(state.lock().message_mut(4).is_none());
    }
}
