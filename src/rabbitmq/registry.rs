use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::debug;

use super::errors::{Result, RpcError};

/// Single-use slot a call waits on. Sending never blocks.
pub type ResponseSink = oneshot::Sender<Vec<u8>>;

#[derive(Debug)]
pub struct PendingCall {
    pub sink: ResponseSink,
    pub registered_at: Instant,
}

/// Calls currently awaiting a reply, keyed by correlation id.
///
/// Every operation takes the one internal lock and releases it before
/// returning; no caller ever holds it across an await point.
#[derive(Debug, Default)]
pub struct PendingCallRegistry {
    calls: Mutex<HashMap<String, PendingCall>>,
}

// Poisoning only means another task panicked mid insert/remove; the map
// itself is still consistent.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PendingCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sink` under `id`. Fails if `id` is already pending.
    pub fn register(&self, id: String, sink: ResponseSink) -> Result<()> {
        let mut calls = lock_ignore_poison(&self.calls);
        if calls.contains_key(&id) {
            return Err(RpcError::DuplicateCorrelationId(id));
        }
        calls.insert(
            id,
            PendingCall {
                sink,
                registered_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Removes and returns the call for `id`, or `None` if it is already gone.
    pub fn take_if_present(&self, id: &str) -> Option<PendingCall> {
        lock_ignore_poison(&self.calls).remove(id)
    }

    /// Idempotent removal.
    pub fn remove_if_present(&self, id: &str) {
        if lock_ignore_poison(&self.calls).remove(id).is_some() {
            debug!(correlation_id = %id, "Deregistered pending call");
        }
    }

    /// Drops every pending sink, waking each waiter with a closed channel.
    /// Returns how many calls were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut calls = lock_ignore_poison(&self.calls);
            calls.drain().map(|(_, call)| call).collect()
        };
        drained.len()
    }

    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        lock_ignore_poison(&self.calls).contains_key(id)
    }
}

/// Deregisters its call when dropped, whichever way the call ends.
pub struct Registration<'a> {
    registry: &'a PendingCallRegistry,
    id: String,
}

impl<'a> Registration<'a> {
    pub fn new(registry: &'a PendingCallRegistry, id: String, sink: ResponseSink) -> Result<Self> {
        registry.register(id.clone(), sink)?;
        Ok(Self { registry, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.remove_if_present(&self.id);
    }
}
