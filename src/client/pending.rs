use crate::multiplexer::lock_ignore_poison;
use crate::protocol::CorrelationId;
use crate::{Result, RpcError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// What a response resolves a pending query to: the payload, or the remote
/// handler's error text.
pub(crate) type Outcome = std::result::Result<Value, String>;

#[derive(Default)]
struct State {
    requests: HashMap<CorrelationId, oneshot::Sender<Outcome>>,
    closed: bool,
}

/// Tracks in-flight queries of one message channel.
///
/// Maps correlation ids to oneshot senders. An entry is removed the first time
/// it is completed, timed out or abandoned; later events for the same id find
/// nothing and are ignored.
#[derive(Default)]
pub(crate) struct PendingRequests {
    state: Mutex<State>,
}

impl PendingRequests {
    // ---

    /// Register a new pending query under a fresh correlation id.
    ///
    /// The returned guard removes the entry when dropped, so an entry never
    /// outlives the query that created it.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Shutdown`] once the table has been closed.
    pub fn register(
        self: &Arc<Self>,
    ) -> Result<(CorrelationId, oneshot::Receiver<Outcome>, PendingGuard)> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        if state.closed {
            return Err(RpcError::Shutdown);
        }

        let (tx, rx) = oneshot::channel();
        let correlation_id = loop {
            let id = CorrelationId::generate();
            if !state.requests.contains_key(&id) {
                break id;
            }
        };
        state.requests.insert(correlation_id.clone(), tx);

        let guard = PendingGuard {
            table: Arc::clone(self),
            correlation_id: correlation_id.clone(),
        };
        Ok((correlation_id, rx, guard))
    }

    /// Complete a pending query.
    ///
    /// Returns true if the correlation id was found. The waiting side may
    /// already have given up, in which case the outcome is discarded.
    pub fn complete(&self, correlation_id: &CorrelationId, outcome: Outcome) -> bool {
        // ---
        let tx = lock_ignore_poison(&self.state).requests.remove(correlation_id);
        match tx {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove a pending query without completing it.
    pub fn remove(&self, correlation_id: &CorrelationId) -> bool {
        // ---
        lock_ignore_poison(&self.state)
            .requests
            .remove(correlation_id)
            .is_some()
    }

    /// Reject future registrations and drop every waiting sender, which wakes
    /// their queries.
    pub fn close(&self) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.closed = true;
        state.requests.clear();
    }

    /// Number of queries currently waiting.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.state).requests.len()
    }
}

/// Removes its pending entry on drop.
pub(crate) struct PendingGuard {
    table: Arc<PendingRequests>,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(&self.correlation_id);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_complete() {
        // ---
        let pending = Arc::new(PendingRequests::default());
        let (id, rx, _guard) = pending.register().unwrap();
        assert_eq!(pending.len(), 1);

        assert!(pending.complete(&id, Ok(json!("pong"))));
        assert_eq!(pending.len(), 0);

        assert_eq!(rx.blocking_recv().unwrap(), Ok(json!("pong")));
    }

    #[test]
    fn test_second_completion_is_ignored() {
        // ---
        let pending = Arc::new(PendingRequests::default());
        let (id, rx, _guard) = pending.register().unwrap();

        assert!(pending.complete(&id, Err("first".into())));
        assert!(!pending.complete(&id, Ok(json!(1))));
        assert_eq!(rx.blocking_recv().unwrap(), Err("first".to_string()));
    }

    #[test]
    fn test_guard_removes_entry() {
        // ---
        let pending = Arc::new(PendingRequests::default());
        let (id, _rx, guard) = pending.register().unwrap();
        drop(guard);

        assert_eq!(pending.len(), 0);
        assert!(!pending.complete(&id, Ok(json!(1))));
    }

    #[test]
    fn test_complete_unknown_id() {
        // ---
        let pending = PendingRequests::default();
        assert!(!pending.complete(&CorrelationId::generate(), Ok(json!(1))));
    }

    #[test]
    fn test_close_wakes_waiters_and_rejects_new() {
        // ---
        let pending = Arc::new(PendingRequests::default());
        let (_id, rx, _guard) = pending.register().unwrap();

        pending.close();

        assert!(rx.blocking_recv().is_err());
        assert!(matches!(pending.register(), Err(RpcError::Shutdown)));
    }

    #[test]
    fn test_ids_are_independent() {
        // ---
        let pending = Arc::new(PendingRequests::default());
        let (a, _rx_a, _ga) = pending.register().unwrap();
        let (b, _rx_b, _gb) = pending.register().unwrap();
        assert_ne!(a, b);
        assert_eq!(pending.len(), 2);
    }
}
