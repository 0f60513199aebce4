//! Matching inbound messages to pending requests.
//!
//! The plugin does not answer in one consistent shape, so matching is an
//! ordered list of rules ([`MATCH_ORDER`]). Each rule is a pure function over
//! the message and the registry; the first rule that produces a
//! [`Correlation`] wins. New shapes go into the list at the position they
//! should take, without touching the other rules.
//!
//! Rules 5 to 7 are approximations: overlapping ids or two concurrent
//! commands of the same type can make them pick the wrong request. Ties are
//! broken by most recent activity, then by most recent registration.

use serde_json::{json, Value};

use crate::bridge::envelope::{error_message, InboundMessage};
use crate::bridge::registry::{PendingRegistry, PendingRequest};

/// Id fragments identifying a document-info request.
const DOCUMENT_INFO_MARKERS: [&str; 2] = ["document_info", "get_document"];

/// One matching heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Outer id known, top-level `result` or `error`.
    Direct,
    /// Outer id known, `message.result` or `message.error`.
    MessageWrapped,
    /// `message.id` known, nested `result` or `error`.
    NestedId,
    /// Outer id known, `message` is an object taken as the result.
    GenericObject,
    /// Outer id and a pending id contain one another.
    FuzzyId,
    /// Result looks like a root document node.
    DocumentInfo,
    /// Most recently active request whose id names the message's command.
    CommandRecency,
}

/// Rules in the order they are tried.
pub const MATCH_ORDER: [MatchRule; 7] = [
    MatchRule::Direct,
    MatchRule::MessageWrapped,
    MatchRule::NestedId,
    MatchRule::GenericObject,
    MatchRule::FuzzyId,
    MatchRule::DocumentInfo,
    MatchRule::CommandRecency,
];

impl MatchRule {
    /// Short label for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::MessageWrapped => "message_wrapped",
            Self::NestedId => "nested_id",
            Self::GenericObject => "generic_object",
            Self::FuzzyId => "fuzzy_id",
            Self::DocumentInfo => "document_info",
            Self::CommandRecency => "command_recency",
        }
    }

    /// Applies this rule alone.
    #[must_use]
    pub fn apply(self, msg: &InboundMessage, pending: &PendingRegistry) -> Option<Correlation> {
        let (id, outcome) = match self {
            Self::Direct => match_direct(msg, pending),
            Self::MessageWrapped => match_message_wrapped(msg, pending),
            Self::NestedId => match_nested_id(msg, pending),
            Self::GenericObject => match_generic_object(msg, pending),
            Self::FuzzyId => match_fuzzy_id(msg, pending),
            Self::DocumentInfo => match_document_info(msg, pending),
            Self::CommandRecency => match_command_recency(msg, pending),
        }?;
        Some(Correlation {
            id,
            rule: self,
            outcome,
        })
    }
}

/// A message matched to a pending request.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    /// Id of the pending request.
    pub id: String,
    /// Rule that matched.
    pub rule: MatchRule,
    /// Result, or the remote error message.
    pub outcome: Result<Value, String>,
}

/// Finds the pending request `msg` answers, trying rules in [`MATCH_ORDER`].
#[must_use]
pub fn correlate(msg: &InboundMessage, pending: &PendingRegistry) -> Option<Correlation> {
    if pending.is_empty() {
        return None;
    }
    MATCH_ORDER
        .iter()
        .find_map(|rule| rule.apply(msg, pending))
}

type Matched = Option<(String, Result<Value, String>)>;

/// Outer id when it is an exact pending id.
fn known_outer_id(msg: &InboundMessage, pending: &PendingRegistry) -> Option<String> {
    msg.id.clone().filter(|id| pending.contains(id))
}

/// Error wins over result when both are present.
fn outcome_of(result: Option<&Value>, error: Option<&Value>) -> Option<Result<Value, String>> {
    if let Some(error) = error {
        return Some(Err(error_message(error)));
    }
    result.map(|r| Ok(r.clone()))
}

fn match_direct(msg: &InboundMessage, pending: &PendingRegistry) -> Matched {
    let id = known_outer_id(msg, pending)?;
    let outcome = outcome_of(msg.result.as_ref(), msg.error.as_ref())?;
    Some((id, outcome))
}

fn match_message_wrapped(msg: &InboundMessage, pending: &PendingRegistry) -> Matched {
    let id = known_outer_id(msg, pending)?;
    let outcome = outcome_of(msg.nested_result(), msg.nested_error())?;
    Some((id, outcome))
}

fn match_nested_id(msg: &InboundMessage, pending: &PendingRegistry) -> Matched {
    let id = msg
        .nested_id()
        .filter(|nested| msg.id.as_ref() != Some(nested) && pending.contains(nested))?;
    let outcome = outcome_of(msg.nested_result(), msg.nested_error())?;
    Some((id, outcome))
}

fn match_generic_object(msg: &InboundMessage, pending: &PendingRegistry) -> Matched {
    let id = known_outer_id(msg, pending)?;
    let message = msg.message_object()?;
    if let Some(error) = msg.nested_error() {
        return Some((id, Err(error_message(error))));
    }
    Some((id, Ok(message.clone())))
}

fn match_fuzzy_id(msg: &InboundMessage, pending: &PendingRegistry) -> Matched {
    let outer = msg.id.as_deref().filter(|id| !pending.contains(id))?;
    let outcome = outcome_of(
        msg.result.as_ref().or_else(|| msg.nested_result()),
        msg.error.as_ref().or_else(|| msg.nested_error()),
    )?;
    let candidate = most_recent(
        pending
            .iter()
            .filter(|p| p.id.contains(outer) || outer.contains(p.id.as_str())),
    )?;
    Some((candidate.id.clone(), outcome))
}

fn match_document_info(msg: &InboundMessage, pending: &PendingRegistry) -> Matched {
    let result = msg
        .result
        .as_ref()
        .or_else(|| msg.nested_result())
        .filter(|r| looks_like_document(r))?;
    let candidate = most_recent(pending.iter().filter(|p| {
        DOCUMENT_INFO_MARKERS
            .iter()
            .any(|marker| p.id.contains(marker))
    }))?;
    Some((candidate.id.clone(), Ok(result.clone())))
}

fn match_command_recency(msg: &InboundMessage, pending: &PendingRegistry) -> Matched {
    let command = msg.command_name().filter(|c| !c.is_empty())?;
    let candidate = most_recent(pending.iter().filter(|p| p.id.contains(command)))?;
    let outcome = outcome_of(
        msg.result.as_ref().or_else(|| msg.nested_result()),
        msg.error.as_ref().or_else(|| msg.nested_error()),
    )
    .unwrap_or_else(|| Ok(json!({ "success": true, "command": command })));
    Some((candidate.id.clone(), outcome))
}

/// A root document node: has an `id`, `type == "PAGE"` and `children`.
fn looks_like_document(value: &Value) -> bool {
    value.get("id").is_some()
        && value.get("type").and_then(Value::as_str) == Some("PAGE")
        && value.get("children").is_some()
}

/// Latest `last_activity`; on ties the latest registered.
fn most_recent<'a>(
    candidates: impl Iterator<Item = &'a PendingRequest>,
) -> Option<&'a PendingRequest> {
    candidates.fold(None, |best: Option<&PendingRequest>, p| match best {
        Some(b) if b.last_activity > p.last_activity => Some(b),
        _ => Some(p),
    })
}
