//! Correlation table for synchronous relays.
//!
//! Each outstanding synchronous event owns one entry keyed by its
//! correlation id. The entry is resolved exactly once: either a client's
//! result arrives (`signal`) or the waiter's deadline passes. Both paths
//! remove the entry under the same lock, so whichever runs second sees
//! nothing to do.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{sync::oneshot, time::Instant};

use crate::EventResult;

/// Pending request error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PendingError {
    #[error("Correlation id already pending: {0}")]
    DuplicateCorrelation(String),
    #[error("Timed out waiting for result of {0}")]
    TimedOut(String),
}

struct Entry {
    token: u64,
    tx: oneshot::Sender<EventResult>,
    created_at: Instant,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// A resolved wait.
#[derive(Debug, Clone)]
pub struct Completed {
    pub result: EventResult,
    /// Time from registration to resolution.
    pub elapsed: Duration,
}

/// Table of outstanding synchronous requests.
#[derive(Clone, Default)]
pub struct PendingRequestTable {
    entries: Entries,
    next_token: Arc<AtomicU64>,
}

impl PendingRequestTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a correlation id that must resolve within `timeout`.
    ///
    /// # Errors
    /// Returns `DuplicateCorrelation` if the id is already pending; the
    /// existing waiter is left untouched.
    pub fn register(
        &self,
        correlation_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<PendingWait, PendingError> {
        let correlation_id = correlation_id.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let (tx, rx) = oneshot::channel();

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.contains_key(&correlation_id) {
                return Err(PendingError::DuplicateCorrelation(correlation_id));
            }
            entries.insert(
                correlation_id.clone(),
                Entry {
                    token,
                    tx,
                    created_at,
                },
            );
        }

        tracing::debug!(correlation_id = %correlation_id, ?timeout, "Registered pending request");
        Ok(PendingWait {
            entries: Arc::clone(&self.entries),
            correlation_id,
            token,
            created_at,
            deadline,
            rx,
        })
    }

    /// Resolve a pending request with a client's result.
    ///
    /// Returns false when nothing is pending under that id (late or
    /// duplicate result); that case is not an error.
    pub fn signal(&self, correlation_id: &str, result: EventResult) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.remove(correlation_id) else {
            return false;
        };
        // Sent while still holding the lock so a concurrent timeout either
        // finds the entry or finds the value already in its receiver.
        let delivered = entry.tx.send(result).is_ok();
        drop(entries);

        tracing::debug!(
            correlation_id,
            elapsed_ms = entry.created_at.elapsed().as_millis(),
            "Signalled pending request"
        );
        delivered
    }

    /// Whether the id is currently pending.
    #[must_use]
    pub fn contains(&self, correlation_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(correlation_id)
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Waiter side of a registered request.
///
/// Dropping it before resolution removes its table entry.
pub struct PendingWait {
    entries: Entries,
    correlation_id: String,
    token: u64,
    created_at: Instant,
    deadline: Instant,
    rx: oneshot::Receiver<EventResult>,
}

impl PendingWait {
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the result until the registered deadline.
    ///
    /// # Errors
    /// `TimedOut` when the deadline passes first; the entry is removed.
    pub async fn wait(mut self) -> Result<Completed, PendingError> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(result)) => Ok(self.completed(result)),
            // Only `signal` removes another waiter's entry, and it always sends.
            Ok(Err(_)) => Err(PendingError::TimedOut(self.correlation_id.clone())),
            Err(_) => {
                if self.remove_own_entry() {
                    return Err(PendingError::TimedOut(self.correlation_id.clone()));
                }
                // A signal won the race and already filled the receiver.
                match self.rx.try_recv() {
                    Ok(result) => Ok(self.completed(result)),
                    Err(_) => Err(PendingError::TimedOut(self.correlation_id.clone())),
                }
            }
        }
    }

    fn completed(&self, result: EventResult) -> Completed {
        Completed {
            result,
            elapsed: self.created_at.elapsed(),
        }
    }

    /// Remove this waiter's entry if it is still the one in the table.
    fn remove_own_entry(&self) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&self.correlation_id) {
            Some(entry) if entry.token == self.token => {
                entries.remove(&self.correlation_id);
                true
            }
            _ => false,
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if self.remove_own_entry() {
            tracing::debug!(correlation_id = %self.correlation_id, "Abandoned pending request removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn result(id: &str, status: &str) -> EventResult {
        let mut result = Map::new();
        result.insert("status".into(), json!(status));
        EventResult::new(id, result)
    }

    #[tokio::test]
    async fn test_signal_resolves_waiter() {
        let table = PendingRequestTable::new();
        let wait = table.register("t1", Duration::from_secs(5)).unwrap();
        assert!(table.contains("t1"));

        assert!(table.signal("t1", result("t1", "completed")));
        assert!(!table.contains("t1"));

        let completed = assert_ok!(wait.wait().await);
        assert_eq!(completed.result.status(), Some("completed"));
    }

    #[tokio::test]
    async fn test_second_signal_is_noop() {
        let table = PendingRequestTable::new();
        let wait = table.register("t1", Duration::from_secs(5)).unwrap();

        assert!(table.signal("t1", result("t1", "first")));
        assert!(!table.signal("t1", result("t1", "second")));

        let completed = wait.wait().await.unwrap();
        assert_eq!(completed.result.status(), Some("first"));
    }

    #[tokio::test]
    async fn test_signal_unknown_id_is_noop() {
        let table = PendingRequestTable::new();
        assert!(!table.signal("nobody", result("nobody", "completed")));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let table = PendingRequestTable::new();
        let first = table.register("dup", Duration::from_secs(5)).unwrap();

        let second = table.register("dup", Duration::from_secs(5));
        assert_eq!(
            second.err(),
            Some(PendingError::DuplicateCorrelation("dup".into()))
        );

        // The first waiter is still the one that gets resolved.
        assert!(table.signal("dup", result("dup", "ok")));
        assert_ok!(first.wait().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let table = PendingRequestTable::new();
        let wait = table.register("t1", Duration::from_secs(1)).unwrap();

        let start = Instant::now();
        let err = assert_err!(wait.wait().await);
        assert_eq!(err, PendingError::TimedOut("t1".into()));
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(!table.contains("t1"));

        // Late result is dropped and does not resurrect the wait.
        assert!(!table.signal("t1", result("t1", "late")));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_stale_waiter_leaves_reused_id_alone() {
        let table = PendingRequestTable::new();
        let stale = table.register("t1", Duration::from_secs(1)).unwrap();
        assert!(table.signal("t1", result("t1", "first")));
        let fresh = table.register("t1", Duration::from_secs(10)).unwrap();

        // The resolved waiter still holds its value and leaves the new entry be.
        let completed = assert_ok!(stale.wait().await);
        assert_eq!(completed.result.status(), Some("first"));
        assert!(table.contains("t1"));

        assert!(table.signal("t1", result("t1", "second")));
        let completed = assert_ok!(fresh.wait().await);
        assert_eq!(completed.result.status(), Some("second"));
    }

    #[test]
    fn test_dropping_stale_waiter_keeps_reused_id() {
        let table = PendingRequestTable::new();
        let stale = table.register("t1", Duration::from_secs(1)).unwrap();
        assert!(table.signal("t1", result("t1", "first")));
        let _fresh = table.register("t1", Duration::from_secs(10)).unwrap();

        drop(stale);
        assert!(table.contains("t1"));
    }

    #[test]
    fn test_dropped_waiter_cleans_up() {
        let table = PendingRequestTable::new();
        let wait = table.register("gone", Duration::from_secs(30)).unwrap();
        assert_eq!(table.len(), 1);
        drop(wait);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_signal_and_wait() {
        let table = PendingRequestTable::new();
        let mut waits = Vec::new();
        for i in 0..16 {
            waits.push(table.register(format!("c{i}"), Duration::from_secs(5)).unwrap());
        }

        let signaller = table.clone();
        let handle = tokio::spawn(async move {
            for i in 0..16 {
                let id = format!("c{i}");
                assert!(signaller.signal(&id, result(&id, "done")));
            }
        });

        for wait in waits {
            let expected = wait.correlation_id().to_string();
            let completed = wait.wait().await.unwrap();
            assert_eq!(completed.result.correlation(), Some(expected.as_str()));
        }
        handle.await.unwrap();
        assert!(table.is_empty());
    }
}
