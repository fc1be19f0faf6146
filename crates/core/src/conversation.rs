//! Conversation types: utterances, response chunks, turns and history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Caller => "caller",
            Role::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a turn came to be recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Ordinary speech from either side
    #[default]
    Spoken,
    /// Apology spoken in place of a failed response
    Fallback,
    /// Placeholder for speech lost to a capability failure
    ErrorMarker,
}

/// A transcribed span of caller speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    /// Offset from the start of the transcriber stream
    pub start: Duration,
    pub end: Duration,
    /// Partial results may still change; final ones close the caller's turn
    pub is_final: bool,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Utterance {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            start: Duration::ZERO,
            end: Duration::ZERO,
            is_final: false,
            confidence: None,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::partial(text)
        }
    }

    pub fn with_span(mut self, start: Duration, end: Duration) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Whitespace-only results carry no caller activity
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// An incremental piece of agent reply text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseChunk {
    pub text: String,
    /// Position within the response, starting at 0
    pub index: usize,
    pub is_last: bool,
}

impl ResponseChunk {
    pub fn new(index: usize, text: impl Into<String>, is_last: bool) -> Self {
        Self {
            text: text.into(),
            index,
            is_last,
        }
    }
}

/// One completed caller or agent message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub kind: TurnKind,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>, kind: TurnKind) -> Self {
        Self {
            role,
            text: text.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn caller(text: impl Into<String>) -> Self {
        Self::new(Role::Caller, text, TurnKind::Spoken)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text, TurnKind::Spoken)
    }
}

/// Append-only record of a session's turns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// True when roles alternate caller, agent, caller, ... from the first turn
    pub fn alternates(&self) -> bool {
        self.turns.iter().enumerate().all(|(i, turn)| {
            let expected = if i % 2 == 0 { Role::Caller } else { Role::Agent };
            turn.role == expected
        })
    }
}
