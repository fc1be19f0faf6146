//! Prompt building
//!
//! Turns the persona, the greeting and the committed conversation into the chat
//! messages sent to the model.

use serde::{Deserialize, Serialize};
use std::fmt;

use parley_core::{ConversationTurn, Role as TurnRole, TurnKind};

/// Stands in for caller speech the transcriber lost
const LOST_SPEECH: &str = "(inaudible)";
/// Marks agent text that never reached the caller
const UNDELIVERED: &str = "(not heard by the caller)";

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Prompt builder
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    messages: Vec<Message>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persona preamble as the system message
    pub fn system_prompt(mut self, preamble: &str) -> Self {
        let preamble = preamble.trim();
        if !preamble.is_empty() {
            self.messages.push(Message::system(preamble));
        }
        self
    }

    /// The greeting the caller heard before saying anything
    pub fn greeting(mut self, greeting: Option<&str>) -> Self {
        if let Some(text) = greeting {
            self.push(Message::assistant(text));
        }
        self
    }

    /// Committed turns, oldest first
    ///
    /// Blank spoken turns are skipped. Error markers stay in so the model knows
    /// something was lost: caller markers become a placeholder, agent markers are
    /// annotated as never heard.
    pub fn history(mut self, turns: &[ConversationTurn]) -> Self {
        for turn in turns {
            let text = turn.text.trim();
            let message = match (turn.role, turn.kind) {
                (TurnRole::Caller, TurnKind::ErrorMarker) => Message::user(LOST_SPEECH),
                (TurnRole::Agent, TurnKind::ErrorMarker) if text.is_empty() => {
                    Message::assistant(UNDELIVERED)
                },
                (TurnRole::Agent, TurnKind::ErrorMarker) => {
                    Message::assistant(format!("{} {}", text, UNDELIVERED))
                },
                _ if text.is_empty() => continue,
                (TurnRole::Caller, _) => Message::user(text),
                (TurnRole::Agent, _) => Message::assistant(text),
            };
            self.push(message);
        }
        self
    }

    pub fn user_message(mut self, content: &str) -> Self {
        self.push(Message::user(content));
        self
    }

    /// Append, folding into the previous message when the speaker is the same
    fn push(&mut self, message: Message) {
        match self.messages.last_mut() {
            Some(last) if last.role == message.role && message.role != Role::System => {
                last.content.push(' ');
                last.content.push_str(&message.content);
            },
            _ => self.messages.push(message),
        }
    }

    pub fn build(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_prompt_order() {
        let history = vec![
            ConversationTurn::caller("Hi"),
            ConversationTurn::agent("Yo, what's good"),
        ];
        let messages = PromptBuilder::new()
            .system_prompt("Answer by rapping.")
            .greeting(Some("How's your day been?"))
            .history(&history)
            .user_message("Tell me about Toronto")
            .build();

        assert_eq!(
            messages,
            vec![
                Message::system("Answer by rapping."),
                Message::assistant("How's your day been?"),
                Message::user("Hi"),
                Message::assistant("Yo, what's good"),
                Message::user("Tell me about Toronto"),
            ]
        );
    }

    #[test]
    fn test_blank_parts_skipped() {
        let history = vec![
            ConversationTurn::caller("Hi"),
            ConversationTurn::agent("  "),
        ];
        let messages = PromptBuilder::new()
            .system_prompt("")
            .greeting(None)
            .history(&history)
            .user_message("Still there?")
            .build();

        assert_eq!(messages, vec![Message::user("Hi Still there?")]);
    }

    #[test]
    fn test_error_markers_annotated() {
        let history = vec![
            ConversationTurn::caller("Tell me a story"),
            ConversationTurn::new(TurnRole::Agent, "Once upon a", TurnKind::ErrorMarker),
            ConversationTurn::new(TurnRole::Caller, "", TurnKind::ErrorMarker),
            ConversationTurn::new(TurnRole::Agent, "Sorry, say that again?", TurnKind::Fallback),
            ConversationTurn::caller("Go on"),
            ConversationTurn::new(TurnRole::Agent, "", TurnKind::ErrorMarker),
        ];
        let messages = PromptBuilder::new()
            .greeting(Some("Hey"))
            .history(&history)
            .user_message("Hello?")
            .build();

        assert_eq!(
            messages,
            vec![
                Message::assistant("Hey"),
                Message::user("Tell me a story"),
                Message::assistant("Once upon a (not heard by the caller)"),
                Message::user("(inaudible)"),
                Message::assistant("Sorry, say that again?"),
                Message::user("Go on"),
                Message::assistant("(not heard by the caller)"),
                Message::user("Hello?"),
            ]
        );
    }

    #[test]
    fn test_consecutive_agent_turns_folded() {
        // Greeting, then a canned apology with no caller turn in between
        let history = vec![ConversationTurn::new(
            TurnRole::Agent,
            "Sorry, I missed that.",
            TurnKind::Fallback,
        )];
        let messages = PromptBuilder::new()
            .greeting(Some("How's your day been?"))
            .history(&history)
            .user_message("Fine")
            .build();

        assert_eq!(
            messages,
            vec![
                Message::assistant("How's your day been? Sorry, I missed that."),
                Message::user("Fine"),
            ]
        );
    }
}
