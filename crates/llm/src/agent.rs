//! Chat-model response agent
//!
//! One `ChatAgent` serves every session. Replies are streamed sentence by sentence
//! so the synthesizer can start speaking while the model is still generating.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;

use parley_config::AgentConfig;
use parley_core::{
    ConversationTurn, Error, ResponseAgent, ResponseChunk, ResponseStream, Utterance,
};

use crate::backend::{LlmBackend, OpenAIBackend};
use crate::prompt::{Message, PromptBuilder};
use crate::sentence::SentenceChunker;
use crate::LlmError;

pub struct ChatAgent {
    backend: Arc<dyn LlmBackend>,
    greeting: Option<String>,
    preamble: String,
    /// Shared by all sessions
    generations: Arc<Semaphore>,
}

impl ChatAgent {
    /// Agent backed by the configured OpenAI-compatible model
    pub fn from_config(config: &AgentConfig) -> Result<Self, LlmError> {
        let backend = OpenAIBackend::new(config.llm.clone())?;
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    pub fn with_backend(backend: Arc<dyn LlmBackend>, config: &AgentConfig) -> Self {
        tracing::info!(
            model = backend.model_name(),
            max_concurrent = config.max_concurrent_generations,
            "Chat agent ready"
        );
        Self {
            backend,
            greeting: config.greeting().map(str::to_string),
            preamble: config.prompt_preamble.clone(),
            generations: Arc::new(Semaphore::new(config.max_concurrent_generations.max(1))),
        }
    }

    fn messages(&self, history: &[ConversationTurn], utterance: &Utterance) -> Vec<Message> {
        PromptBuilder::new()
            .system_prompt(&self.preamble)
            .greeting(self.greeting.as_deref())
            .history(history)
            .user_message(utterance.text.trim())
            .build()
    }
}

#[async_trait]
impl ResponseAgent for ChatAgent {
    fn respond(&self, history: &[ConversationTurn], utterance: &Utterance) -> ResponseStream {
        Box::pin(reply_chunks(
            self.backend.clone(),
            self.messages(history, utterance),
            self.generations.clone(),
        ))
    }

    fn initial_message(&self) -> Option<&str> {
        self.greeting.as_deref()
    }

    fn persona(&self) -> &str {
        &self.preamble
    }

    fn name(&self) -> &str {
        self.backend.model_name()
    }

    async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }
}

/// Stream one reply; a generation slot is held until the stream ends or is dropped
fn reply_chunks(
    backend: Arc<dyn LlmBackend>,
    messages: Vec<Message>,
    generations: Arc<Semaphore>,
) -> impl Stream<Item = Result<ResponseChunk, Error>> + Send + 'static {
    async_stream::try_stream! {
        let _permit = generations.acquire_owned().await.map_err(|_| Error::Closed)?;

        let mut tokens = backend.stream(messages);
        let mut chunker = SentenceChunker::new();
        let mut index = 0;

        while let Some(token) = tokens.next().await {
            let token = token.map_err(Error::from)?;
            for sentence in chunker.push(&token) {
                yield ResponseChunk::new(index, sentence, false);
                index += 1;
            }
        }

        tracing::debug!(chunks = index + 1, "Reply generated");
        yield ResponseChunk::new(index, chunker.finish().unwrap_or_default(), true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TokenStream;
    use parking_lot::Mutex;
    use parley_core::Capability;
    use std::time::Duration;

    /// Backend replaying fixed tokens and recording every prompt
    struct ScriptedBackend {
        tokens: Vec<Result<String, String>>,
        pace: Option<Duration>,
        prompts: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedBackend {
        fn new(tokens: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                tokens: tokens.iter().map(|t| Ok(t.to_string())).collect(),
                pace: None,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        fn stream(&self, messages: Vec<Message>) -> TokenStream {
            self.prompts.lock().push(messages);
            let tokens = self.tokens.clone();
            let pace = self.pace;
            Box::pin(async_stream::stream! {
                for token in tokens {
                    if let Some(pace) = pace {
                        tokio::time::sleep(pace).await;
                    }
                    yield token.map_err(LlmError::Api);
                }
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn agent(backend: Arc<ScriptedBackend>, max_concurrent: usize) -> ChatAgent {
        ChatAgent::with_backend(
            backend,
            &AgentConfig {
                max_concurrent_generations: max_concurrent,
                ..Default::default()
            },
        )
    }

    async fn collect(stream: ResponseStream) -> Vec<Result<ResponseChunk, Error>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_reply_chunked_by_sentence() {
        let backend = ScriptedBackend::new(&["Yo, my day", " was fly. Beats", " stacked high"]);
        let agent = agent(backend.clone(), 4);

        let history = vec![
            ConversationTurn::caller("Hey"),
            ConversationTurn::agent("What's up"),
        ];
        let chunks = collect(agent.respond(&history, &Utterance::final_text("How was it?"))).await;
        let chunks: Vec<_> = chunks.into_iter().map(|c| c.unwrap()).collect();

        assert_eq!(
            chunks,
            vec![
                ResponseChunk::new(0, "Yo, my day was fly.", false),
                ResponseChunk::new(1, "Beats stacked high", true),
            ]
        );

        let prompts = backend.prompts.lock();
        let prompt = &prompts[0];
        assert_eq!(prompt.len(), 5);
        assert!(prompt[0].content.contains("rapping"));
        assert_eq!(prompt[1], Message::assistant("How's your day been?"));
        assert_eq!(prompt[4], Message::user("How was it?"));
    }

    #[tokio::test]
    async fn test_trailing_sentence_is_last_chunk() {
        let agent = agent(ScriptedBackend::new(&["Done. "]), 4);
        let chunks = collect(agent.respond(&[], &Utterance::final_text("Hi"))).await;
        let chunks: Vec<_> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(chunks, vec![ResponseChunk::new(0, "Done.", true)]);
    }

    #[tokio::test]
    async fn test_empty_generation_ends_with_blank_chunk() {
        let agent = agent(ScriptedBackend::new(&[]), 4);
        let chunks = collect(agent.respond(&[], &Utterance::final_text("Hi"))).await;
        let chunks: Vec<_> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(chunks, vec![ResponseChunk::new(0, "", true)]);
    }

    #[tokio::test]
    async fn test_backend_error_surfaces_as_agent_failure() {
        let backend = Arc::new(ScriptedBackend {
            tokens: vec![
                Ok("Hello there. ".to_string()),
                Ok("Listen".to_string()),
                Err("boom".to_string()),
            ],
            pace: None,
            prompts: Mutex::new(Vec::new()),
        });
        let agent = agent(backend, 4);
        let chunks = collect(agent.respond(&[], &Utterance::final_text("Hi"))).await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap().text, "Hello there.");
        let err = chunks[1].as_ref().unwrap_err();
        assert_eq!(err.capability(), Some(Capability::ResponseAgent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generations_capped_across_sessions() {
        let backend = Arc::new(ScriptedBackend {
            tokens: vec![Ok("Slow reply.".to_string())],
            pace: Some(Duration::from_secs(1)),
            prompts: Mutex::new(Vec::new()),
        });
        let agent = agent(backend.clone(), 1);

        let mut first = agent.respond(&[], &Utterance::final_text("one"));
        let mut second = agent.respond(&[], &Utterance::final_text("two"));

        let first = tokio::spawn(async move {
            let chunk = first.next().await;
            drop(first);
            chunk
        });
        let second = tokio::spawn(async move { second.next().await });

        // The second reply waits for the first to release its slot
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(backend.prompts.lock().len(), 1);

        assert!(first.await.unwrap().unwrap().is_ok());
        assert!(second.await.unwrap().unwrap().is_ok());
        assert_eq!(backend.prompts.lock().len(), 2);
    }

    #[test]
    fn test_persona_and_greeting() {
        let agent = ChatAgent::with_backend(
            ScriptedBackend::new(&[]),
            &AgentConfig {
                initial_message: Some(String::new()),
                ..Default::default()
            },
        );
        assert_eq!(agent.initial_message(), None);
        assert!(agent.persona().contains("Drake"));
        assert_eq!(agent.name(), "scripted");
    }
}
