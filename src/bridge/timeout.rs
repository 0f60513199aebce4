//! Progressive per-request timeouts.
//!
//! A request starts in [`TimeoutState::Waiting`]. Each time its deadline
//! passes without a reply it moves to [`TimeoutState::Extended`] with a
//! longer deadline, until the extension budget is spent and it fails.
//! Progress updates reset the deadline to a fixed window without touching the
//! extension counter.

use std::time::Duration;

use tokio::time::Instant;

/// Timeout parameters shared by all requests of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Initial timeout; also the unit of each extension.
    pub base: Duration,
    /// How many times a silent request is extended before failing.
    pub max_extensions: u32,
    /// Window granted by a progress update.
    pub progress_window: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max_extensions: 3,
            progress_window: Duration::from_secs(60),
        }
    }
}

impl TimeoutPolicy {
    /// Worst-case wait for a request that never hears back.
    #[must_use]
    pub fn total_budget(&self, base: Duration) -> Duration {
        (1..=self.max_extensions).fold(base, |acc, n| acc + base * n)
    }
}

/// Timeout state of one pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    /// First deadline not yet reached.
    Waiting {
        /// When the request next expires.
        deadline: Instant,
    },
    /// At least one extension granted.
    Extended {
        /// Extensions used so far.
        extensions: u32,
        /// When the request next expires.
        deadline: Instant,
    },
    /// Terminal.
    Settled,
}

/// What to do when a deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Keep waiting until the new deadline.
    Extended(Instant),
    /// Give up on the request.
    Exhausted,
}

impl TimeoutState {
    /// Starts the clock.
    #[must_use]
    pub fn start(now: Instant, base: Duration) -> Self {
        Self::Waiting {
            deadline: now + base,
        }
    }

    /// Current deadline, `None` once settled.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Waiting { deadline } | Self::Extended { deadline, .. } => Some(*deadline),
            Self::Settled => None,
        }
    }

    /// Extensions used so far.
    #[must_use]
    pub const fn extensions(&self) -> u32 {
        match self {
            Self::Extended { extensions, .. } => *extensions,
            Self::Waiting { .. } | Self::Settled => 0,
        }
    }

    /// Extensions still available.
    #[must_use]
    pub const fn remaining(&self, max_extensions: u32) -> u32 {
        max_extensions.saturating_sub(self.extensions())
    }

    /// Handles a passed deadline.
    ///
    /// Extension `n` (1-based) lasts `base * n`.
    pub fn expire(&mut self, now: Instant, base: Duration, max_extensions: u32) -> Expiry {
        if matches!(self, Self::Settled) {
            return Expiry::Exhausted;
        }

        let used = self.extensions();
        if used >= max_extensions {
            *self = Self::Settled;
            return Expiry::Exhausted;
        }

        let extensions = used + 1;
        let deadline = now + base * extensions;
        *self = Self::Extended {
            extensions,
            deadline,
        };
        Expiry::Extended(deadline)
    }

    /// Pushes the deadline out to `now + window` after a progress update.
    pub fn refresh(&mut self, now: Instant, window: Duration) {
        match self {
            Self::Waiting { deadline } | Self::Extended { deadline, .. } => {
                *deadline = now + window;
            }
            Self::Settled => {}
        }
    }

    /// Marks the request as finished.
    pub fn settle(&mut self) {
        *self = Self::Settled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(60);

    #[test]
    fn starts_waiting() {
        let now = Instant::now();
        let state = TimeoutState::start(now, BASE);
        assert_eq!(state.deadline(), Some(now + BASE));
        assert_eq!(state.remaining(3), 3);
    }

    #[test]
    fn extensions_widen_then_exhaust() {
        let start = Instant::now();
        let mut state = TimeoutState::start(start, BASE);

        let mut now = start + BASE;
        for n in 1..=3 {
            let Expiry::Extended(deadline) = state.expire(now, BASE, 3) else {
                panic!("extension {n} should be granted");
            };
            assert_eq!(deadline, now + BASE * n);
            assert_eq!(state.extensions(), n);
            now = deadline;
        }

        assert_eq!(now - start, BASE * 7);
        assert_eq!(state.expire(now, BASE, 3), Expiry::Exhausted);
        assert_eq!(state, TimeoutState::Settled);
        assert_eq!(state.deadline(), None);
    }

    #[test]
    fn zero_budget_fails_first_time() {
        let now = Instant::now();
        let mut state = TimeoutState::start(now, BASE);
        assert_eq!(state.expire(now + BASE, BASE, 0), Expiry::Exhausted);
    }

    #[test]
    fn refresh_keeps_extension_count() {
        let start = Instant::now();
        let mut state = TimeoutState::start(start, BASE);
        state.expire(start + BASE, BASE, 3);

        let later = start + BASE + Duration::from_secs(5);
        state.refresh(later, Duration::from_secs(60));
        assert_eq!(state.extensions(), 1);
        assert_eq!(state.deadline(), Some(later + Duration::from_secs(60)));
    }

    #[test]
    fn settled_ignores_refresh() {
        let mut state = TimeoutState::start(Instant::now(), BASE);
        state.settle();
        state.refresh(Instant::now(), BASE);
        assert_eq!(state, TimeoutState::Settled);
    }

    #[test]
    fn total_budget_matches_schedule() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.total_budget(BASE), BASE * 7);
    }
}
