//! Connection ready state shared by every channel layer.

use std::fmt;

/// Four-value connection lifecycle.
///
/// States are totally ordered. Transitions only move forward; `Closed` is
/// terminal and re-entering it is a no-op rather than an error. A new
/// connect on a closed channel starts over through [`ReadyState::restart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    /// Connection attempt in progress.
    Connecting,
    /// Connection established, messages flow.
    Open,
    /// Close requested, waiting for the transport to finish.
    Closing,
    /// Connection closed (terminal).
    Closed,
}

/// Result of applying a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State moved forward.
    Advanced,
    /// `Closed` re-entered; nothing changed.
    Unchanged,
    /// Backward or self transition; nothing changed.
    Rejected,
}

impl Transition {
    /// Check if the state changed.
    pub fn is_advanced(self) -> bool {
        self == Transition::Advanced
    }
}

impl ReadyState {
    /// Check if moving to `next` is a legal forward transition.
    pub fn can_advance_to(self, next: ReadyState) -> bool {
        next > self
    }

    /// Apply a transition in place.
    pub fn advance(&mut self, next: ReadyState) -> Transition {
        if *self == ReadyState::Closed && next == ReadyState::Closed {
            Transition::Unchanged
        } else if self.can_advance_to(next) {
            *self = next;
            Transition::Advanced
        } else {
            Transition::Rejected
        }
    }

    /// Begin a new lifecycle. Only a closed channel may restart.
    pub fn restart(&mut self) -> Transition {
        if *self == ReadyState::Closed {
            *self = ReadyState::Connecting;
            Transition::Advanced
        } else {
            Transition::Rejected
        }
    }

    /// Check if the channel is closing or closed.
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, ReadyState::Closing | ReadyState::Closed)
    }

    /// Upper-case name, as used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            ReadyState::Connecting => "CONNECTING",
            ReadyState::Open => "OPEN",
            ReadyState::Closing => "CLOSING",
            ReadyState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
