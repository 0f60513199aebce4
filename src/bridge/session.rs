//! The synchronous core of the bridge.
//!
//! A [`Session`] holds everything the connection task mutates: the pending
//! registry, channel membership and timeout policy. It performs no I/O and
//! never awaits, so the channel check and the registration for a send happen
//! in one step, and tests can drive it with hand-picked instants.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::bridge::channel::{is_join, ChannelMembership};
use crate::bridge::correlator::{correlate, MatchRule};
use crate::bridge::envelope::{CommandEnvelope, InboundMessage, JOIN_COMMAND};
use crate::bridge::registry::{PendingRegistry, PendingRequest, Reply};
use crate::bridge::timeout::{Expiry, TimeoutPolicy};
use crate::error::BridgeError;

/// A command waiting to be sent.
#[derive(Debug)]
pub struct CommandRequest {
    /// Command name.
    pub command: String,
    /// Command parameters.
    pub params: Value,
    /// Overrides the policy's base timeout.
    pub timeout: Option<Duration>,
    /// Where the outcome goes.
    pub reply: Reply,
}

impl CommandRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(command: impl Into<String>, params: Value, reply: Reply) -> Self {
        Self {
            command: command.into(),
            params,
            timeout: None,
            reply,
        }
    }

    /// Creates a channel join request.
    #[must_use]
    pub fn join(channel: &str, reply: Reply) -> Self {
        Self::new(
            JOIN_COMMAND,
            serde_json::json!({ "channel": channel }),
            reply,
        )
    }

    /// Sets a timeout override.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fails the request without sending it.
    pub fn fail(self, error: BridgeError) {
        let _ = self.reply.send(Err(error));
    }
}

/// A registered request ready to be written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Id of the registered request.
    pub id: String,
    /// Serialised envelope.
    pub text: String,
}

/// What [`Session::on_message`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Progress update for a pending request.
    Progress {
        /// The request that made progress.
        id: String,
    },
    /// A pending request was settled.
    Settled {
        /// The settled request.
        id: String,
        /// Rule that matched it.
        rule: MatchRule,
    },
    /// Our own command reflected back by the relay.
    Echo,
    /// No pending request matched.
    Unmatched,
    /// Not a JSON object.
    Malformed,
}

/// Correlation state for one logical connection.
#[derive(Debug)]
pub struct Session {
    policy: TimeoutPolicy,
    registry: PendingRegistry,
    channel: ChannelMembership,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            policy,
            registry: PendingRegistry::new(),
            channel: ChannelMembership::new(),
        }
    }

    /// The timeout policy.
    #[must_use]
    pub const fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Requests in flight.
    #[must_use]
    pub const fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    /// The joined channel.
    #[must_use]
    pub fn current_channel(&self) -> Option<&str> {
        self.channel.current()
    }

    /// A new connection opened; membership does not carry over.
    pub fn on_open(&mut self) {
        if let Some(previous) = self.channel.current() {
            debug!(channel = previous, "Connection reopened, channel membership reset");
        }
        self.channel.reset();
    }

    /// The connection closed: every pending request fails.
    pub fn on_close(&mut self, code: u16, reason: &str) -> usize {
        let error = BridgeError::ConnectionClosed {
            code,
            reason: reason.to_string(),
        };
        self.fail_all(&error)
    }

    /// Fails every pending request with `error`.
    pub fn fail_all(&mut self, error: &BridgeError) -> usize {
        self.channel.reset();
        let rejected = self.registry.reject_all(error);
        if rejected > 0 {
            warn!(rejected, error = %error, "Rejected pending requests");
        }
        rejected
    }

    /// Checks preconditions, registers the request and builds its envelope.
    ///
    /// Precondition failures are delivered to the request's reply and leave
    /// the registry untouched. Returns `None` in that case.
    pub fn submit(&mut self, request: CommandRequest, now: Instant) -> Option<Outbound> {
        let id = new_request_id(&request.command);
        self.submit_with_id(request, id, now)
    }

    /// As [`Session::submit`], with a caller-chosen id.
    pub fn submit_with_id(
        &mut self,
        request: CommandRequest,
        id: String,
        now: Instant,
    ) -> Option<Outbound> {
        let channel = match self.channel.require(&request.command) {
            Ok(channel) => channel.map(str::to_string),
            Err(error) => {
                debug!(command = %request.command, "Refusing command without a channel");
                request.fail(error);
                return None;
            }
        };

        let (envelope, join_channel) = match build_envelope(&request, &id, channel.as_deref()) {
            Ok(built) => built,
            Err(error) => {
                request.fail(error);
                return None;
            }
        };

        let text = match envelope.to_text() {
            Ok(text) => text,
            Err(error) => {
                request.fail(error);
                return None;
            }
        };

        let CommandRequest {
            command,
            timeout,
            reply,
            ..
        } = request;
        let timeout = timeout.unwrap_or(self.policy.base);
        let mut pending = PendingRequest::new(id.clone(), command, timeout, reply, now);
        if let Some(channel) = join_channel {
            pending = pending.joining(channel);
        }

        if let Err(rejected) = self.registry.register(pending) {
            let error = BridgeError::DuplicateId {
                id: rejected.id.clone(),
            };
            rejected.finish(Err(error));
            return None;
        }

        trace!(
            id = %id,
            budget_ms = self.policy.total_budget(timeout).as_millis(),
            "Registered pending request"
        );
        Some(Outbound { id, text })
    }

    /// Fails a registered request whose envelope could not be written.
    pub fn transmit_failed(&mut self, id: &str, error: BridgeError) -> bool {
        self.registry.settle(id, Err(error))
    }

    /// Handles one inbound text frame.
    pub fn on_message(&mut self, text: &str, now: Instant) -> Delivery {
        let Some(msg) = InboundMessage::parse(text) else {
            warn!(len = text.len(), "Ignoring message that is not a JSON object");
            return Delivery::Malformed;
        };

        if msg.is_progress() {
            return self.on_progress(&msg, now);
        }

        if msg.is_command_echo() {
            trace!(id = ?msg.id, "Ignoring echo of an outbound command");
            return Delivery::Echo;
        }

        for id in [msg.id.clone(), msg.nested_id()].into_iter().flatten() {
            self.registry.touch(&id, now);
        }

        let Some(correlation) = correlate(&msg, &self.registry) else {
            debug!(
                kind = msg.kind.as_deref().unwrap_or("-"),
                id = msg.id.as_deref().unwrap_or("-"),
                "Unmatched broadcast message"
            );
            return Delivery::Unmatched;
        };

        let join_channel = self
            .registry
            .get(&correlation.id)
            .and_then(|p| p.join_channel.clone());

        let outcome = correlation
            .outcome
            .map_err(|message| BridgeError::Remote { message });
        let succeeded = outcome.is_ok();

        debug!(
            id = %correlation.id,
            rule = correlation.rule.name(),
            ok = succeeded,
            "Correlated reply"
        );
        self.registry.settle(&correlation.id, outcome);

        if succeeded {
            if let Some(channel) = join_channel {
                info!(channel = %channel, "Joined channel");
                self.channel.join(channel);
            }
        }

        Delivery::Settled {
            id: correlation.id,
            rule: correlation.rule,
        }
    }

    fn on_progress(&mut self, msg: &InboundMessage, now: Instant) -> Delivery {
        let data = msg.progress_data().unwrap_or_default();
        let id = [msg.id.clone(), msg.nested_id(), data.command_id.clone()]
            .into_iter()
            .flatten()
            .find(|id| self.registry.contains(id));

        let Some(id) = id else {
            debug!(id = ?msg.id, "Progress update for unknown request");
            return Delivery::Unmatched;
        };

        self.registry
            .refresh(&id, now, self.policy.progress_window);
        info!(
            id = %id,
            command = data.command_type.as_deref().unwrap_or("-"),
            progress = data.progress.unwrap_or_default(),
            status = data.status.as_deref().unwrap_or("-"),
            items = data.item_counts().as_deref().unwrap_or("-"),
            message = data.message.as_deref().unwrap_or(""),
            "Command progress"
        );
        Delivery::Progress { id }
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.registry.next_deadline()
    }

    /// Extends or fails every request whose deadline has passed.
    ///
    /// Returns the ids that failed.
    pub fn on_tick(&mut self, now: Instant) -> Vec<String> {
        let max_extensions = self.policy.max_extensions;
        let mut expired = Vec::new();

        for entry in self.registry.due_mut(now) {
            match entry.timeout.expire(now, entry.base_timeout, max_extensions) {
                Expiry::Extended(deadline) => {
                    debug!(
                        id = %entry.id,
                        extension = entry.timeout.extensions(),
                        remaining = entry.timeout.remaining(max_extensions),
                        wait_ms = deadline.saturating_duration_since(now).as_millis(),
                        "Extending request timeout"
                    );
                }
                Expiry::Exhausted => {
                    let elapsed = now.saturating_duration_since(entry.started_at);
                    expired.push((
                        entry.id.clone(),
                        BridgeError::Timeout {
                            command: entry.command.clone(),
                            elapsed_ms: elapsed.as_millis(),
                        },
                    ));
                }
            }
        }

        expired
            .into_iter()
            .map(|(id, error)| {
                warn!(id = %id, error = %error, "Request timed out");
                self.registry.settle(&id, Err(error));
                id
            })
            .collect()
    }
}

/// Builds the envelope for `request`, plus the channel a join would record.
fn build_envelope(
    request: &CommandRequest,
    id: &str,
    channel: Option<&str>,
) -> Result<(CommandEnvelope, Option<String>), BridgeError> {
    if is_join(&request.command) {
        let target = request
            .params
            .get("channel")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BridgeError::InvalidParams {
                command: request.command.clone(),
                message: "missing channel name".to_string(),
            })?;
        return Ok((CommandEnvelope::join(id, target), Some(target.to_string())));
    }

    let channel = channel.ok_or_else(|| BridgeError::NoChannel {
        command: request.command.clone(),
    })?;
    let envelope = CommandEnvelope::command(id, channel, &request.command, request.params.clone())?;
    Ok((envelope, None))
}

/// Fresh correlation id. The command name is kept in the id so that the
/// id-based fallbacks in the correlator can find it.
#[must_use]
pub fn new_request_id(command: &str) -> String {
    format!("{command}_{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot;

    use crate::bridge::registry::Outcome;

    const BASE: Duration = Duration::from_secs(60);

    fn joined_session(now: Instant) -> Session {
        let mut session = Session::new(TimeoutPolicy::default());
        let (tx, _rx) = oneshot::channel();
        let out = session
            .submit(CommandRequest::join("design", tx), now)
            .unwrap();
        let reply = json!({"id": out.id, "result": "joined"}).to_string();
        session.on_message(&reply, now);
        assert_eq!(session.current_channel(), Some("design"));
        session
    }

    fn send(
        session: &mut Session,
        command: &str,
        now: Instant,
    ) -> (Outbound, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let out = session
            .submit(CommandRequest::new(command, json!({}), tx), now)
            .unwrap();
        (out, rx)
    }

    #[test]
    fn channel_gate_leaves_registry_untouched() {
        let mut session = Session::new(TimeoutPolicy::default());
        let (tx, mut rx) = oneshot::channel();
        let out = session.submit(
            CommandRequest::new("get_selection", json!({}), tx),
            Instant::now(),
        );

        assert!(out.is_none());
        assert!(session.registry().is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(BridgeError::NoChannel { .. })
        ));
    }

    #[test]
    fn join_records_channel_on_success() {
        let session = joined_session(Instant::now());
        assert!(session.registry().is_empty());
    }

    #[test]
    fn failed_join_leaves_channel_unset() {
        let mut session = Session::new(TimeoutPolicy::default());
        let (tx, mut rx) = oneshot::channel();
        let out = session
            .submit(CommandRequest::join("design", tx), Instant::now())
            .unwrap();
        session.on_message(
            &json!({"id": out.id, "error": "channel full"}).to_string(),
            Instant::now(),
        );
        assert_eq!(session.current_channel(), None);
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err(),
            BridgeError::Remote {
                message: "channel full".to_string()
            }
        );
    }

    #[test]
    fn join_requires_channel_name() {
        let mut session = Session::new(TimeoutPolicy::default());
        let (tx, mut rx) = oneshot::channel();
        let out = session.submit(CommandRequest::new("join", json!({}), tx), Instant::now());
        assert!(out.is_none());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(BridgeError::InvalidParams { .. })
        ));
    }

    #[test]
    fn envelope_carries_channel_and_command_id() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let (out, _rx) = send(&mut session, "create_rectangle", now);

        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(value["id"], out.id.as_str());
        assert_eq!(value["channel"], "design");
        assert_eq!(value["message"]["params"]["commandId"], out.id.as_str());
        assert!(out.id.starts_with("create_rectangle_"));
    }

    #[test]
    fn sends_and_settles_balance() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let before = session.registry().len();

        let outs: Vec<_> = (0..4).map(|_| send(&mut session, "get_node_info", now)).collect();
        assert_eq!(session.registry().len(), before + 4);

        for (out, _) in &outs {
            let reply = json!({"id": out.id, "result": {}}).to_string();
            session.on_message(&reply, now);
        }
        assert_eq!(session.registry().len(), before);
    }

    #[test]
    fn out_of_order_replies() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let (a, mut rx_a) = send(&mut session, "get_node_info", now);
        let (b, mut rx_b) = send(&mut session, "get_node_info", now);

        session.on_message(&json!({"id": b.id, "result": "B"}).to_string(), now);
        session.on_message(&json!({"id": a.id, "result": "A"}).to_string(), now);

        assert_eq!(rx_a.try_recv().unwrap().unwrap(), json!("A"));
        assert_eq!(rx_b.try_recv().unwrap().unwrap(), json!("B"));
    }

    #[test]
    fn duplicate_reply_is_ignored() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let (out, mut rx) = send(&mut session, "get_selection", now);

        let reply = json!({"id": out.id, "result": 1}).to_string();
        assert!(matches!(session.on_message(&reply, now), Delivery::Settled { .. }));
        assert_eq!(session.on_message(&reply, now), Delivery::Unmatched);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn echo_does_not_settle() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let (out, mut rx) = send(&mut session, "get_selection", now);

        assert_eq!(session.on_message(&out.text, now), Delivery::Echo);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.registry().len(), 1);
    }

    #[test]
    fn silent_request_fails_after_all_extensions() {
        let start = Instant::now();
        let mut session = joined_session(start);
        let (_out, mut rx) = send(&mut session, "scan_text_nodes", start);

        for n in 1..=3u32 {
            let at = session.next_deadline().unwrap();
            assert!(session.on_tick(at).is_empty(), "extension {n} expected");
        }
        assert!(rx.try_recv().is_err());

        let now = session.next_deadline().unwrap();
        assert_eq!(now - start, BASE * 7);
        let failed = session.on_tick(now);
        assert_eq!(failed.len(), 1);
        assert!(session.registry().is_empty());
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err(),
            BridgeError::Timeout {
                command: "scan_text_nodes".to_string(),
                elapsed_ms: (BASE * 7).as_millis(),
            }
        );
    }

    #[test]
    fn progress_keeps_request_alive() {
        let start = Instant::now();
        let mut session = joined_session(start);
        let (out, mut rx) = send(&mut session, "set_multiple_text_contents", start);

        let progress_at = start + BASE - Duration::from_secs(1);
        let progress = json!({
            "id": out.id,
            "type": "progress_update",
            "message": {"data": {"commandType": "set_multiple_text_contents", "progress": 50, "status": "in_progress"}}
        })
        .to_string();
        assert_eq!(
            session.on_message(&progress, progress_at),
            Delivery::Progress { id: out.id.clone() }
        );

        // Original deadline passes without any expiry.
        assert!(session.on_tick(start + BASE).is_empty());
        assert_eq!(session.next_deadline(), Some(progress_at + BASE));
        assert_eq!(
            session.registry().get(&out.id).unwrap().timeout.extensions(),
            0
        );

        session.on_message(&json!({"id": out.id, "result": "done"}).to_string(), start + BASE);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!("done"));
    }

    #[test]
    fn progress_by_command_id() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let (out, _rx) = send(&mut session, "scan_text_nodes", now);
        let progress = json!({
            "type": "progress_update",
            "message": {"data": {"commandId": out.id, "progress": 10}}
        })
        .to_string();
        assert_eq!(
            session.on_message(&progress, now),
            Delivery::Progress { id: out.id }
        );
    }

    #[test]
    fn close_rejects_everything() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let mut receivers: Vec<_> = (0..3)
            .map(|_| send(&mut session, "get_node_info", now).1)
            .collect();

        assert_eq!(session.on_close(4001, "relay restart"), 3);
        assert!(session.registry().is_empty());
        assert_eq!(session.current_channel(), None);
        for rx in &mut receivers {
            let err = rx.try_recv().unwrap().unwrap_err();
            assert!(err.to_string().contains("4001"));
        }
    }

    #[test]
    fn open_resets_channel() {
        let mut session = joined_session(Instant::now());
        session.on_open();
        assert_eq!(session.current_channel(), None);
    }

    #[test]
    fn per_command_timeout_override() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let (tx, _rx) = oneshot::channel();
        let request = CommandRequest::new("export_node_as_image", json!({}), tx)
            .with_timeout(Some(Duration::from_secs(5)));
        session.submit(request, now).unwrap();
        assert_eq!(session.next_deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut session = Session::new(TimeoutPolicy::default());
        assert_eq!(
            session.on_message("definitely not json", Instant::now()),
            Delivery::Malformed
        );
    }

    #[test]
    fn explicit_id_collision() {
        let now = Instant::now();
        let mut session = joined_session(now);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        session
            .submit_with_id(CommandRequest::new("a", json!({}), tx1), "x".into(), now)
            .unwrap();
        assert!(session
            .submit_with_id(CommandRequest::new("a", json!({}), tx2), "x".into(), now)
            .is_none());
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Err(BridgeError::DuplicateId { .. })
        ));
    }
}
