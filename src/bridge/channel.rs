//! Channel membership of the current connection.

use crate::bridge::envelope::JOIN_COMMAND;
use crate::error::BridgeError;

/// Tracks which channel, if any, the connection has joined.
///
/// A fresh connection never inherits membership; the connection task calls
/// [`ChannelMembership::reset`] on every open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMembership {
    current: Option<String>,
}

impl ChannelMembership {
    /// Creates membership with no channel joined.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// The joined channel, if any.
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Records a successful join.
    pub fn join(&mut self, channel: impl Into<String>) {
        self.current = Some(channel.into());
    }

    /// Forgets the joined channel.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Returns the channel a `command` may be sent on.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoChannel`] for any command other than
    /// `join` while no channel is joined.
    pub fn require(&self, command: &str) -> Result<Option<&str>, BridgeError> {
        if is_join(command) {
            return Ok(self.current());
        }
        self.current()
            .map(Some)
            .ok_or_else(|| BridgeError::NoChannel {
                command: command.to_string(),
            })
    }
}

/// Returns `true` for the channel join command.
#[must_use]
pub fn is_join(command: &str) -> bool {
    command == JOIN_COMMAND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let membership = ChannelMembership::new();
        assert_eq!(membership.current(), None);
    }

    #[test]
    fn join_bypasses_gate() {
        let membership = ChannelMembership::new();
        assert_eq!(membership.require("join").unwrap(), None);
    }

    #[test]
    fn commands_need_channel() {
        let mut membership = ChannelMembership::new();
        let err = membership.require("get_selection").unwrap_err();
        assert!(matches!(err, BridgeError::NoChannel { ref command } if command == "get_selection"));

        membership.join("design-review");
        assert_eq!(
            membership.require("get_selection").unwrap(),
            Some("design-review")
        );
    }

    #[test]
    fn reset_clears() {
        let mut membership = ChannelMembership::new();
        membership.join("a");
        membership.reset();
        assert_eq!(membership.current(), None);
    }
}
