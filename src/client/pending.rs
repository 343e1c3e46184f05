use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Tracks pending requests waiting for responses.
///
/// Each entry maps a correlator to a oneshot completion plus its optional
/// deadline-timer handle. The response path and the timer path are mutually
/// cancelling: whoever removes the entry first settles the caller, and the
/// loser finds the correlator gone and does nothing. The oneshot guarantees
/// the completion fires at most once.
pub(super) struct PendingRequests {
    // ---
    requests: HashMap<String, PendingEntry>,
}

struct PendingEntry {
    // ---
    tx: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
}

impl PendingRequests {
    // ---

    /// Create a new empty pending-request table.
    pub fn new() -> Self {
        // ---
        Self {
            requests: HashMap::new(),
        }
    }

    /// Install a pending entry under `correlator`.
    ///
    /// Called only after the request has been sent, so the table never
    /// holds an unsent request.
    pub fn insert(
        &mut self,
        correlator: String,
        tx: oneshot::Sender<Result<Value>>,
        timer: Option<JoinHandle<()>>,
    ) {
        // ---
        self.requests.insert(correlator, PendingEntry { tx, timer });
    }

    /// Settle a pending request with the given outcome and cancel its
    /// deadline timer.
    ///
    /// Returns `false` when the correlator is unknown (already settled,
    /// timed out, or never ours) — the response is then dropped.
    pub fn complete(&mut self, correlator: &str, outcome: Result<Value>) -> bool {
        // ---
        let Some(entry) = self.requests.remove(correlator) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        // A closed receiver means the caller went away; nothing to deliver.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Remove a pending entry, returning its completion without firing it.
    ///
    /// Used by the deadline timer, which must not abort itself: the timer
    /// handle is dropped un-aborted and the caller sends the timeout.
    pub fn take(&mut self, correlator: &str) -> Option<oneshot::Sender<Result<Value>>> {
        // ---
        self.requests.remove(correlator).map(|entry| entry.tx)
    }

    /// Reject every pending request with a link error and clear the table.
    pub fn fail_all(&mut self, description: &str) {
        // ---
        for (_, entry) in self.requests.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            let _ = entry.tx.send(Err(Error::Link(description.to_string())));
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn len(&self) -> usize {
        // ---
        self.requests.len()
    }
}
