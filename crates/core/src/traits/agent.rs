//! Response generation capability

use crate::{ConversationTurn, ResponseChunk, Result, Utterance};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Reply text for one caller utterance, chunk by chunk
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseChunk>> + Send>>;

/// Conversational agent
///
/// An agent is configured once with a persona and an optional greeting and is then
/// shared by every session; each `respond` call is independent.
#[async_trait]
pub trait ResponseAgent: Send + Sync + 'static {
    /// Generate a reply to `utterance` given the committed history
    ///
    /// `history` never contains `utterance` itself. Chunks arrive in order and the
    /// final one has `is_last` set; a stream that simply ends is treated as complete.
    fn respond(&self, history: &[ConversationTurn], utterance: &Utterance) -> ResponseStream;

    /// Greeting spoken when a session starts
    fn initial_message(&self) -> Option<&str>;

    /// Persona / prompt preamble
    fn persona(&self) -> &str;

    /// Get agent name for logging
    fn name(&self) -> &str;

    /// Check if the backing model is reachable
    async fn is_available(&self) -> bool {
        true
    }
}
