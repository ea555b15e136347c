//! Reference Registry
//!
//! Tracks every host value exposed to the runtime as an opaque handle. Each
//! exposure gets its own entry; entries leave only through [`ReferenceRegistry::release`],
//! which the handle's collection callback invokes.

use crate::handle::{Arena, Handle};
use crate::host::HostValue;
use std::cell::RefCell;
use tracing::trace;

#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    slots: RefCell<Arena<HostValue>>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload and return the handle that keeps it alive.
    pub fn new_reference(&self, value: HostValue) -> Handle {
        let kind = value.kind_name();
        let handle = self.slots.borrow_mut().insert(value);
        trace!(%handle, %kind, "reference created");
        handle
    }

    /// Payload registered under `handle`. Never removes the entry.
    pub fn lookup(&self, handle: Handle) -> Option<HostValue> {
        self.slots.borrow().get(handle).cloned()
    }

    /// Drop the entry for a collected handle. Unknown handles are ignored.
    pub(crate) fn release(&self, handle: Handle) {
        // The payload may own proxies whose own teardown touches this registry,
        // so it is dropped only after the borrow ends.
        let released = self.slots.borrow_mut().remove(handle);
        if released.is_some() {
            trace!(%handle, "reference released");
        }
        drop(released);
    }

    /// Number of live references.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}
