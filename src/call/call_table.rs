//! Calls in flight on one peer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::pending_call::{CallId, CallOutcome, PendingCall};

/// Tracks the pending calls issued through one peer so a disconnect can
/// fail them all at once.
#[derive(Debug, Default)]
pub struct CallTable {
    calls: Mutex<HashMap<CallId, Arc<PendingCall>>>,
}

impl CallTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `call` until it is removed.
    pub fn insert(&self, call: Arc<PendingCall>) {
        self.calls.lock().insert(call.id(), call);
    }

    /// Stops tracking the call with `id`.
    pub fn remove(&self, id: CallId) -> Option<Arc<PendingCall>> {
        self.calls.lock().remove(&id)
    }

    /// Resolves every tracked call as a transport failure and clears the
    /// table. Returns how many calls this actually resolved.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<Arc<PendingCall>> =
            self.calls.lock().drain().map(|(_, call)| call).collect();
        drained
            .iter()
            .filter(|call| call.resolve(CallOutcome::TransportFailed(reason.to_string())))
            .count()
    }

    /// Number of tracked calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns `true` if no call is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

/// Removes a call from its table when dropped, including when the caller's
/// future is cancelled mid-wait.
#[derive(Debug)]
pub(crate) struct Registration<'a> {
    table: &'a CallTable,
    id: CallId,
}

impl<'a> Registration<'a> {
    pub(crate) fn new(table: &'a CallTable, call: &Arc<PendingCall>) -> Self {
        table.insert(Arc::clone(call));
        Self {
            table,
            id: call.id(),
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
