//! Request/response correlation
//!
//! Every command gets a fresh id from a monotonically increasing counter.
//! A pending entry lives until exactly one of these happens: its result
//! arrives, its timeout fires, the connection closes, or the caller stops
//! waiting. Whichever comes first removes the entry; the rest find nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};

type Outcome = Result<Value>;

/// Matches responses to the requests that caused them
#[derive(Debug)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
    timeout: Duration,
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate an id and park a waiter for it
    pub fn register(self: &Arc<Self>) -> PendingRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        trace!(id, "Registered pending request");

        PendingRequest {
            id,
            rx: Some(rx),
            correlator: Arc::clone(self),
        }
    }

    /// Deliver an outcome; unknown ids are dropped silently
    pub fn resolve(&self, id: u64, outcome: Outcome) -> bool {
        match self.take(id) {
            Some(tx) => {
                // The waiter may have gone away between take and send
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(id, "Discarding response for unknown request");
                false
            }
        }
    }

    /// Fail every waiter, returning how many were pending
    pub fn fail_all(&self, make_err: impl Fn() -> Error) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(make_err()));
        }
        if count > 0 {
            debug!(count, "Failed pending requests");
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.lock().contains_key(&id)
    }

    fn take(&self, id: u64) -> Option<oneshot::Sender<Outcome>> {
        self.pending.lock().remove(&id)
    }
}

/// One outstanding request; dropping it withdraws the entry
#[derive(Debug)]
pub struct PendingRequest {
    id: u64,
    rx: Option<oneshot::Receiver<Outcome>>,
    correlator: Arc<Correlator>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the outcome or the request timeout
    pub async fn wait(mut self) -> Result<Value> {
        let Some(mut rx) = self.rx.take() else {
            return Err(Error::Internal("pending request awaited twice".into()));
        };
        let timeout = self.correlator.timeout;

        tokio::select! {
            outcome = &mut rx => flatten(outcome),
            _ = tokio::time::sleep(timeout) => {
                if self.correlator.take(self.id).is_some() {
                    debug!(id = self.id, "Request timed out");
                    Err(Error::RequestTimeout {
                        id: self.id,
                        timeout_ms: timeout.as_millis() as u64,
                    })
                } else {
                    // Lost the race to a result or a close; its outcome is already sent
                    flatten(rx.await)
                }
            }
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.correlator.take(self.id).is_some() {
            trace!(id = self.id, "Withdrew abandoned request");
        }
    }
}

fn flatten(received: std::result::Result<Outcome, oneshot::error::RecvError>) -> Outcome {
    received.unwrap_or_else(|_| Err(Error::connection_lost("request abandoned")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    fn correlator(ms: u64) -> Arc<Correlator> {
        Arc::new(Correlator::new(Duration::from_millis(ms)))
    }

    #[test]
    fn test_ids_increase_from_one() {
        let c = correlator(1000);
        let a = c.register();
        let b = c.register();
        let d = c.register();
        assert_eq!((a.id(), b.id(), d.id()), (1, 2, 3));
        assert_eq!(c.pending_count(), 3);
    }

    #[tokio::test]
    async fn test_resolve_delivers_result() {
        let c = correlator(1000);
        let pending = c.register();
        let id = pending.id();

        assert!(c.resolve(id, Ok(json!({"ok": true}))));
        assert_eq!(pending.wait().await.unwrap(), json!({"ok": true}));
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_delivers_failure() {
        let c = correlator(1000);
        let pending = c.register();
        c.resolve(
            pending.id(),
            Err(Error::Command {
                code: Some("not_found".into()),
                message: "nope".into(),
            }),
        );
        assert!(matches!(pending.wait().await, Err(Error::Command { .. })));
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let c = correlator(1000);
        let _pending = c.register();
        assert!(!c.resolve(99, Ok(Value::Null)));
        assert_eq!(c.pending_count(), 1);
    }

    #[test]
    fn test_second_response_is_ignored() {
        let c = correlator(1000);
        let pending = c.register();
        assert!(c.resolve(pending.id(), Ok(Value::Null)));
        assert!(!c.resolve(pending.id(), Ok(Value::Null)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let c = correlator(50);
        let pending = c.register();
        let id = pending.id();

        match pending.wait().await {
            Err(Error::RequestTimeout { id: timed_out, timeout_ms }) => {
                assert_eq!(timed_out, id);
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert_eq!(c.pending_count(), 0);

        // A late response finds nothing
        assert!(!c.resolve(id, Ok(Value::Null)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_stays_pending_until_resolved() {
        let c = correlator(10_000);
        let pending = c.register();
        let id = pending.id();

        let mut waiter = task::spawn(pending.wait());
        assert_pending!(waiter.poll());

        c.resolve(id, Ok(json!(42)));
        assert!(waiter.is_woken());
        let outcome = assert_ready!(waiter.poll());
        assert_eq!(outcome.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_fail_all_drains() {
        let c = correlator(1000);
        let first = c.register();
        let second = c.register();

        assert_eq!(c.fail_all(|| Error::connection_lost("closed")), 2);
        assert_eq!(c.pending_count(), 0);
        assert!(matches!(first.wait().await, Err(Error::ConnectionLost { .. })));
        assert!(matches!(second.wait().await, Err(Error::ConnectionLost { .. })));
    }

    #[test]
    fn test_drop_withdraws_entry() {
        let c = correlator(1000);
        let pending = c.register();
        let id = pending.id();
        drop(pending);
        assert!(!c.is_pending(id));
    }

    #[test]
    fn test_ids_never_reused_after_drain() {
        let c = correlator(1000);
        let first = c.register();
        c.fail_all(|| Error::NotConnected);
        let next = c.register();
        assert!(next.id() > first.id());
    }
}
