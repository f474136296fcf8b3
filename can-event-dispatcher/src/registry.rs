//! Event source registry
//!
//! System wide tables of the registered event sources. The registry knows which
//! dispatcher owns a source and maps the platform's sender handles onto external source
//! indexes. Callbacks and user data are not kept here; they live in the owning
//! dispatcher.

use crate::types::{DispatcherError, EventSourceId, Result, SenderHandle};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct ExternalRecord {
    sender_handle: SenderHandle,
    idx_dispatcher: usize,
}

/// The registered event sources of a dispatcher system
#[derive(Debug)]
pub struct SourceRegistry {
    max_external: usize,
    max_internal: usize,
    external: Vec<ExternalRecord>,
    internal: Vec<usize>,
    by_sender_handle: HashMap<SenderHandle, usize>,
}

impl SourceRegistry {
    pub fn new(max_external: usize, max_internal: usize) -> Self {
        Self {
            max_external,
            max_internal,
            external: Vec::new(),
            internal: Vec::new(),
            by_sender_handle: HashMap::new(),
        }
    }

    /// Add an external event source owned by the given dispatcher
    pub fn register_external(
        &mut self,
        idx_dispatcher: usize,
        sender_handle: SenderHandle,
    ) -> Result<usize> {
        if self.by_sender_handle.contains_key(&sender_handle) {
            return Err(DispatcherError::DuplicateSenderHandle(sender_handle));
        }
        if self.external.len() >= self.max_external {
            return Err(DispatcherError::TooManyEventSources {
                kind: "external",
                capacity: self.max_external,
            });
        }

        let idx = self.external.len();
        self.external.push(ExternalRecord {
            sender_handle,
            idx_dispatcher,
        });
        self.by_sender_handle.insert(sender_handle, idx);
        Ok(idx)
    }

    /// Add an internal event source owned by the given dispatcher
    pub fn register_internal(&mut self, idx_dispatcher: usize) -> Result<usize> {
        if self.internal.len() >= self.max_internal {
            return Err(DispatcherError::TooManyEventSources {
                kind: "internal",
                capacity: self.max_internal,
            });
        }

        self.internal.push(idx_dispatcher);
        Ok(self.internal.len() - 1)
    }

    /// Map a sender handle onto the index of its external event source
    pub fn lookup_sender(&self, sender_handle: SenderHandle) -> Option<usize> {
        self.by_sender_handle.get(&sender_handle).copied()
    }

    /// The sender handle an external source was registered with
    pub fn sender_handle(&self, idx_external: usize) -> Option<SenderHandle> {
        self.external.get(idx_external).map(|r| r.sender_handle)
    }

    /// The dispatcher, which registered the given source
    pub fn owner(&self, source: EventSourceId) -> Option<usize> {
        match source {
            EventSourceId::External(idx) => self.external.get(idx).map(|r| r.idx_dispatcher),
            EventSourceId::Internal(idx) => self.internal.get(idx).copied(),
        }
    }

    pub fn max_external(&self) -> usize {
        self.max_external
    }

    pub fn no_external(&self) -> usize {
        self.external.len()
    }

    pub fn no_internal(&self) -> usize {
        self.internal.len()
    }
}
