//! Session state and end-of-call reasons

use serde::{Deserialize, Serialize};

/// Turn-taking state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    /// Waiting for the caller
    Listening,
    /// A response is being generated, no audio yet
    Thinking,
    /// Agent audio is being produced
    Speaking,
    /// Caller barged in; stale output is being discarded
    Interrupted,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
            SessionState::Interrupted => "interrupted",
            SessionState::Closed => "closed",
        }
    }

    /// Check if transition to target state is allowed
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Listening)
            | (Listening, Thinking)
            | (Listening, Speaking)
            | (Thinking, Speaking)
            | (Thinking, Listening)
            | (Speaking, Listening)
            | (Speaking, Interrupted)
            | (Interrupted, Thinking)
            | (Interrupted, Listening) => true,
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The caller hung up or the transport disconnected
    CallerHangup,
    /// Too many capability failures in a row
    ConsecutiveFailureLimitExceeded,
    /// The transport failed underneath the session
    TransportError,
    /// Process shutdown
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::CallerHangup => "caller_hangup",
            EndReason::ConsecutiveFailureLimitExceeded => "consecutive_failure_limit_exceeded",
            EndReason::TransportError => "transport_error",
            EndReason::Shutdown => "shutdown",
        }
    }

    /// Whether this end is a failure the transport should report as such
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EndReason::ConsecutiveFailureLimitExceeded | EndReason::TransportError
        )
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
