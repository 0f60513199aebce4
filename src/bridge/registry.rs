//! In-flight request bookkeeping.
//!
//! The registry is the only owner of a request's reply channel. An entry
//! leaves the map through [`PendingRegistry::settle`] or
//! [`PendingRegistry::reject_all`], and either path delivers exactly one
//! outcome.

use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::bridge::timeout::TimeoutState;
use crate::error::BridgeError;

/// Outcome delivered to a caller.
pub type Outcome = Result<Value, BridgeError>;

/// Where the outcome of a request is sent.
pub type Reply = oneshot::Sender<Outcome>;

/// One command awaiting its reply.
#[derive(Debug)]
pub struct PendingRequest {
    /// Correlation id.
    pub id: String,
    /// Command name, kept for diagnostics.
    pub command: String,
    /// Channel to record as joined when this request succeeds.
    pub join_channel: Option<String>,
    /// When the command was sent.
    pub started_at: Instant,
    /// Last time a message related to this request was seen.
    pub last_activity: Instant,
    /// Timeout for this request; the unit of each extension.
    pub base_timeout: Duration,
    /// Deadline state machine.
    pub timeout: TimeoutState,
    reply: Reply,
}

impl PendingRequest {
    /// Creates a request whose clock starts at `now`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        base_timeout: Duration,
        reply: Reply,
        now: Instant,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            join_channel: None,
            started_at: now,
            last_activity: now,
            base_timeout,
            timeout: TimeoutState::start(now, base_timeout),
            reply,
        }
    }

    /// Marks this request as a join for `channel`.
    #[must_use]
    pub fn joining(mut self, channel: impl Into<String>) -> Self {
        self.join_channel = Some(channel.into());
        self
    }

    /// Delivers `outcome` to the caller, consuming the request.
    pub fn finish(mut self, outcome: Outcome) {
        self.timeout.settle();
        // The caller may have stopped waiting.
        let _ = self.reply.send(outcome);
    }
}

/// Map from request id to pending request, in registration order.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: IndexMap<String, PendingRequest>,
}

impl PendingRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `id` is in flight.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Looks up a request.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PendingRequest> {
        self.entries.get(id)
    }

    /// Iterates requests in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.entries.values()
    }

    /// Adds a request.
    ///
    /// # Errors
    ///
    /// Returns the request back if its id is already in flight.
    pub fn register(&mut self, request: PendingRequest) -> Result<(), PendingRequest> {
        if self.entries.contains_key(&request.id) {
            return Err(request);
        }
        self.entries.insert(request.id.clone(), request);
        Ok(())
    }

    /// Records activity for `id`. Returns `false` for unknown ids.
    pub fn touch(&mut self, id: &str, now: Instant) -> bool {
        self.entries.get_mut(id).is_some_and(|entry| {
            entry.last_activity = now;
            true
        })
    }

    /// Records activity and pushes the deadline to `now + window`.
    pub fn refresh(&mut self, id: &str, now: Instant, window: Duration) -> bool {
        self.entries.get_mut(id).is_some_and(|entry| {
            entry.last_activity = now;
            entry.timeout.refresh(now, window);
            true
        })
    }

    /// Removes `id` and delivers `outcome`.
    ///
    /// Unknown ids are ignored, so late or duplicate replies are harmless.
    /// Returns `true` if a request was settled.
    pub fn settle(&mut self, id: &str, outcome: Outcome) -> bool {
        match self.entries.shift_remove(id) {
            Some(entry) => {
                entry.finish(outcome);
                true
            }
            None => false,
        }
    }

    /// Rejects every request with `error` and empties the registry.
    ///
    /// Returns how many requests were rejected.
    pub fn reject_all(&mut self, error: &BridgeError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain(..) {
            entry.finish(Err(error.clone()));
        }
        count
    }

    /// Earliest deadline among pending requests.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter_map(|entry| entry.timeout.deadline())
            .min()
    }

    /// Mutable access to requests whose deadline is at or before `now`.
    pub fn due_mut(&mut self, now: Instant) -> impl Iterator<Item = &mut PendingRequest> {
        self.entries
            .values_mut()
            .filter(move |entry| entry.timeout.deadline().is_some_and(|d| d <= now))
    }
}
