//! Conversation session
//!
//! One session owns one call: the two audio buses, the turn controller, the
//! conversation history and the capability instances bound to the call.
//!
//! Tasks per session:
//! - transcriber: input bus -> `Transcriber` -> utterance events (restarted after failures)
//! - driver: owns the `TurnController` and the history, executes its actions
//! - per response: one generation task and one synthesis task, both under the
//!   response's child `CancellationToken`
//!
//! Stages only talk through the buses and the driver's event queue.

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use parley_config::SessionSettings;
use parley_core::{
    AudioFormat, AudioFrame, Capability, ConversationHistory, ConversationTurn, EndReason, Error,
    FrameAssembler, ResponseAgent, ResponseChunk, Result, Role, SessionState, SpeechSynthesizer,
    Transcriber, TurnKind, Utterance,
};

use crate::bus::AudioFrameBus;
use crate::playback::PlaybackClock;
use crate::tts::SynthesizerBackend;
use crate::turn::{ResponseId, TurnAction, TurnConfig, TurnController, TurnEvent};

/// Capacity of the driver's event queue
const EVENT_QUEUE: usize = 64;

/// Runtime policy for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub bus_depth: usize,
    pub frame_duration: Duration,
    pub transcriber_timeout: Duration,
    pub agent_timeout: Duration,
    pub synthesizer_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub allow_interruptions: bool,
    pub apology: String,
    pub closing_notice: Option<String>,
    pub transcriber_restart_delay: Duration,
    /// Agent audio allowed ahead of real-time playback
    pub playback_lead: Duration,
    /// Capacity of the `SessionEvent` broadcast channel
    pub event_capacity: usize,
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            bus_depth: settings.bus_depth,
            frame_duration: Duration::from_millis(settings.frame_ms),
            transcriber_timeout: Duration::from_millis(settings.transcriber_timeout_ms),
            agent_timeout: Duration::from_millis(settings.agent_timeout_ms),
            synthesizer_timeout: Duration::from_millis(settings.synthesizer_timeout_ms),
            max_consecutive_failures: settings.max_consecutive_failures,
            allow_interruptions: settings.allow_interruptions,
            apology: settings.apology.clone(),
            closing_notice: Some(settings.closing_notice.clone())
                .filter(|text| !text.trim().is_empty()),
            transcriber_restart_delay: Duration::from_millis(settings.transcriber_restart_ms),
            playback_lead: Duration::from_millis(settings.playback_lead_ms),
            event_capacity: 256,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

/// Observability events published by every session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Transcriber output, partial or final
    Transcript { text: String, is_final: bool },
    /// Text handed to the synthesizer
    AgentText {
        response_id: ResponseId,
        text: String,
        is_final: bool,
    },
    /// First chunk of a reply arrived
    FirstChunk {
        response_id: ResponseId,
        latency: Duration,
    },
    TurnRecorded { role: Role, kind: TurnKind },
    Interrupted { response_id: ResponseId },
    CapabilityFailed {
        capability: Capability,
        message: String,
    },
    Ended { reason: EndReason },
}

/// Everything bound to one session at construction
pub struct SessionParts {
    pub id: String,
    pub input_format: AudioFormat,
    pub output_format: AudioFormat,
    pub transcriber: Arc<dyn Transcriber>,
    pub agent: Arc<dyn ResponseAgent>,
    pub synthesizer: SynthesizerBackend,
}

/// State shared by the session handle and its tasks
struct Shared {
    id: String,
    config: SessionConfig,
    input_format: AudioFormat,
    output_format: AudioFormat,
    input: Arc<AudioFrameBus>,
    output: Arc<AudioFrameBus>,
    transcriber: Arc<dyn Transcriber>,
    agent: Arc<dyn ResponseAgent>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Written by the driver only
    history: RwLock<ConversationHistory>,
    state: watch::Sender<SessionState>,
    end: watch::Sender<Option<EndReason>>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    close_reason: Mutex<Option<EndReason>>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Close buses and publish the end; only the first call has any effect
    fn finish(&self, reason: EndReason) {
        self.input.close();
        self.output.close();
        self.state.send_if_modified(|state| {
            if state.is_closed() {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });

        let first = self.end.send_if_modified(|end| {
            if end.is_none() {
                *end = Some(reason);
                true
            } else {
                false
            }
        });
        if first {
            if reason.is_fatal() {
                tracing::error!(session_id = %self.id, reason = %reason, "Session ended");
            } else {
                tracing::info!(session_id = %self.id, reason = %reason, "Session ended");
            }
            self.emit(SessionEvent::Ended { reason });
        }
    }

    fn requested_close(&self) -> EndReason {
        (*self.close_reason.lock()).unwrap_or(EndReason::CallerHangup)
    }
}

/// One call's pipeline
pub struct ConversationSession {
    shared: Arc<Shared>,
    assembler: Mutex<FrameAssembler>,
    inbox: mpsc::Sender<TurnEvent>,
    pending_inbox: Mutex<Option<mpsc::Receiver<TurnEvent>>>,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
    started: AtomicBool,
    outbound_taken: AtomicBool,
}

impl ConversationSession {
    /// Build a session; the synthesizer is created here, once
    pub fn new(parts: SessionParts, config: SessionConfig) -> Result<Self> {
        let synthesizer: Arc<dyn SpeechSynthesizer> =
            Arc::from(parts.synthesizer.create(parts.output_format)?);

        tracing::info!(
            session_id = %parts.id,
            transcriber = parts.transcriber.model_name(),
            agent = parts.agent.name(),
            synthesizer = synthesizer.model_name(),
            input_rate = parts.input_format.sample_rate.as_u32(),
            output_rate = parts.output_format.sample_rate.as_u32(),
            "Session created"
        );

        let assembler = FrameAssembler::new(
            parts.input_format.sample_rate,
            parley_core::Channels::Mono,
            config.frame_duration,
        );
        let (inbox, inbox_rx) = mpsc::channel(EVENT_QUEUE);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(SessionState::Idle);
        let (end, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            id: parts.id,
            input: Arc::new(AudioFrameBus::new("inbound", config.bus_depth)),
            output: Arc::new(AudioFrameBus::new("outbound", config.bus_depth)),
            config,
            input_format: parts.input_format,
            output_format: parts.output_format,
            transcriber: parts.transcriber,
            agent: parts.agent,
            synthesizer,
            history: RwLock::new(ConversationHistory::new()),
            state,
            end,
            events,
            cancel: CancellationToken::new(),
            close_reason: Mutex::new(None),
        });

        Ok(Self {
            shared,
            assembler: Mutex::new(assembler),
            inbox,
            pending_inbox: Mutex::new(Some(inbox_rx)),
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
            started: AtomicBool::new(false),
            outbound_taken: AtomicBool::new(false),
        })
    }

    /// Spawn the session tasks and enter Listening
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Session("session already started".to_string()));
        }
        let inbox_rx = self
            .pending_inbox
            .lock()
            .take()
            .ok_or_else(|| Error::Session("session already started".to_string()))?;

        let greeting = self.shared.agent.initial_message().map(str::to_string);
        let controller = TurnController::new(TurnConfig {
            greeting,
            apology: self.shared.config.apology.clone(),
            closing_notice: self.shared.config.closing_notice.clone(),
            max_consecutive_failures: self.shared.config.max_consecutive_failures,
            allow_interruptions: self.shared.config.allow_interruptions,
        });

        let driver = Driver {
            shared: self.shared.clone(),
            controller,
            inbox: inbox_rx,
            events: self.inbox.clone(),
            responses: HashMap::new(),
            tasks: JoinSet::new(),
            last_cancelled: None,
        };

        // Queued ahead of anything the transcriber produces
        self.inbox
            .try_send(TurnEvent::Start)
            .map_err(|_| Error::Closed)?;

        let mut tasks = self.tasks.lock().await;
        tasks.spawn(driver.run());
        tasks.spawn(transcribe(self.shared.clone(), self.inbox.clone()));
        Ok(())
    }

    /// Hand caller audio to the transcriber stage
    ///
    /// Never waits: audio is re-framed and pushed with the drop-oldest policy.
    pub fn submit_inbound_audio(&self, frame: AudioFrame) -> Result<()> {
        if self.shared.input.is_closed() {
            return Err(Error::Closed);
        }

        let frames = self.assembler.lock().push_frame(&frame);
        for frame in frames {
            self.shared.input.push_drop_oldest(frame)?;
        }
        Ok(())
    }

    /// Agent audio, in playback order; ends when the session closes
    ///
    /// Can be taken once.
    pub fn outbound_audio(&self) -> Result<impl futures::Stream<Item = AudioFrame> + Send + 'static> {
        if self.outbound_taken.swap(true, Ordering::SeqCst) {
            return Err(Error::Session("outbound audio already taken".to_string()));
        }
        Ok(self.shared.output.clone().into_stream())
    }

    /// Close as a caller hangup
    pub async fn close(&self) {
        self.close_with(EndReason::CallerHangup).await
    }

    /// Cancel all in-flight work, close the buses and wait for every task
    ///
    /// Idempotent; the first reason wins.
    pub async fn close_with(&self, reason: EndReason) {
        {
            let mut close_reason = self.shared.close_reason.lock();
            if close_reason.is_none() {
                *close_reason = Some(reason);
            }
        }
        self.shared.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(session_id = %self.shared.id, error = %e, "Session task panicked");
                }
            }
        }
        drop(tasks);

        self.shared.finish(self.shared.requested_close());
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Snapshot of the committed history
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.shared.history.read().turns().to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn input_format(&self) -> AudioFormat {
        self.shared.input_format
    }

    pub fn output_format(&self) -> AudioFormat {
        self.shared.output_format
    }

    /// Why the session ended, once it has
    pub fn end_reason(&self) -> Option<EndReason> {
        *self.shared.end.borrow()
    }

    /// Wait for the session to end
    pub async fn ended(&self) -> EndReason {
        let mut end = self.shared.end.subscribe();
        let reason = match end.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(EndReason::Shutdown),
            Err(_) => EndReason::Shutdown,
        };
        reason
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        // Tasks observe cancellation and exit on their own
        self.shared.cancel.cancel();
    }
}

/// Tasks and channels belonging to one response
struct ResponseTasks {
    token: CancellationToken,
    speech: Option<mpsc::UnboundedSender<String>>,
    synthesizing: bool,
    started: Instant,
    first_chunk: bool,
}

impl ResponseTasks {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            speech: None,
            synthesizing: false,
            started: Instant::now(),
            first_chunk: false,
        }
    }
}

/// Owns the controller and executes its actions
struct Driver {
    shared: Arc<Shared>,
    controller: TurnController,
    inbox: mpsc::Receiver<TurnEvent>,
    /// Cloned into response tasks
    events: mpsc::Sender<TurnEvent>,
    responses: HashMap<ResponseId, ResponseTasks>,
    tasks: JoinSet<()>,
    last_cancelled: Option<ResponseId>,
}

impl Driver {
    async fn run(mut self) {
        let reason = loop {
            let event = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => TurnEvent::Close {
                    reason: self.shared.requested_close(),
                },
                event = self.inbox.recv() => match event {
                    Some(event) => event,
                    None => TurnEvent::Close { reason: self.shared.requested_close() },
                },
            };

            self.observe(&event);
            let actions = self.controller.handle(event);
            if let Some(reason) = self.execute(actions) {
                break reason;
            }
            if self.controller.state().is_closed() {
                break self.shared.requested_close();
            }

            // Reap finished response tasks
            while self.tasks.try_join_next().is_some() {}
        };

        for (_, response) in self.responses.drain() {
            response.token.cancel();
        }
        self.shared.cancel.cancel();
        self.shared.input.close();
        self.shared.output.close();
        while self.tasks.join_next().await.is_some() {}

        self.shared.finish(reason);
    }

    /// Publish observability events for an incoming event
    fn observe(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::Utterance(utterance) if !utterance.is_blank() => {
                tracing::debug!(
                    session_id = %self.shared.id,
                    is_final = utterance.is_final,
                    text = %utterance.text,
                    "Utterance"
                );
                self.shared.emit(SessionEvent::Transcript {
                    text: utterance.text.clone(),
                    is_final: utterance.is_final,
                });
            },
            TurnEvent::ResponseChunk { response_id, .. } => {
                if let Some(response) = self.responses.get_mut(response_id) {
                    if !response.first_chunk {
                        response.first_chunk = true;
                        let latency = response.started.elapsed();
                        tracing::debug!(
                            session_id = %self.shared.id,
                            response_id,
                            latency_ms = latency.as_millis() as u64,
                            "First response chunk"
                        );
                        self.shared.emit(SessionEvent::FirstChunk {
                            response_id: *response_id,
                            latency,
                        });
                    }
                }
            },
            TurnEvent::ResponseFailed { error, .. } => {
                self.report_failure(Capability::ResponseAgent, error)
            },
            TurnEvent::SynthesisFailed { error, .. } => {
                self.report_failure(Capability::SpeechSynthesizer, error)
            },
            TurnEvent::TranscriberFailed { error } => {
                self.report_failure(Capability::Transcriber, error)
            },
            _ => {},
        }
    }

    fn report_failure(&self, fallback: Capability, error: &Error) {
        let capability = error.capability().unwrap_or(fallback);
        tracing::warn!(
            session_id = %self.shared.id,
            capability = %capability,
            error = %error,
            "Capability failed"
        );
        self.shared.emit(SessionEvent::CapabilityFailed {
            capability,
            message: error.to_string(),
        });
    }

    /// Run actions in order; returns the end reason once the controller closes
    fn execute(&mut self, actions: Vec<TurnAction>) -> Option<EndReason> {
        let mut closed = None;

        for action in actions {
            match action {
                TurnAction::Transition { from, to } => {
                    tracing::info!(session_id = %self.shared.id, from = %from, to = %to, "State transition");
                    self.shared.state.send_replace(to);
                    if to == SessionState::Interrupted {
                        if let Some(response_id) = self.last_cancelled {
                            self.shared.emit(SessionEvent::Interrupted { response_id });
                        }
                    }
                    self.shared.emit(SessionEvent::StateChanged { from, to });
                },
                TurnAction::StartResponse {
                    response_id,
                    utterance,
                } => self.start_response(response_id, utterance),
                TurnAction::Speak {
                    response_id,
                    text,
                    is_last,
                } => self.speak(response_id, text, is_last),
                TurnAction::CancelResponse { response_id } => self.cancel_response(response_id),
                TurnAction::RecordTurn(turn) => {
                    tracing::debug!(
                        session_id = %self.shared.id,
                        role = %turn.role,
                        kind = ?turn.kind,
                        "Turn recorded"
                    );
                    let (role, kind) = (turn.role, turn.kind);
                    self.shared.history.write().push(turn);
                    self.shared.emit(SessionEvent::TurnRecorded { role, kind });
                },
                TurnAction::Close { reason } => closed = Some(reason),
            }
        }

        closed
    }

    fn start_response(&mut self, response_id: ResponseId, utterance: Utterance) {
        let history = self.shared.history.read().turns().to_vec();
        let token = self.shared.cancel.child_token();
        self.responses
            .insert(response_id, ResponseTasks::new(token.clone()));

        tracing::debug!(
            session_id = %self.shared.id,
            response_id,
            history_len = history.len(),
            "Generating response"
        );
        self.tasks.spawn(generate(
            self.shared.agent.clone(),
            history,
            utterance,
            response_id,
            self.shared.config.agent_timeout,
            self.events.clone(),
            token,
        ));
    }

    fn speak(&mut self, response_id: ResponseId, text: String, is_last: bool) {
        self.shared.emit(SessionEvent::AgentText {
            response_id,
            text: text.clone(),
            is_final: is_last,
        });

        let response = self
            .responses
            .entry(response_id)
            .or_insert_with(|| ResponseTasks::new(self.shared.cancel.child_token()));

        if !response.synthesizing {
            let (speech_tx, speech_rx) = mpsc::unbounded_channel();
            response.speech = Some(speech_tx);
            response.synthesizing = true;

            self.tasks.spawn(synthesize(
                self.shared.clone(),
                response_id,
                speech_rx,
                self.shared.output.epoch(),
                self.events.clone(),
                response.token.clone(),
            ));
        }

        if let Some(speech) = &response.speech {
            // Closed only when the synthesis task already gave up
            let _ = speech.send(text);
        }
        if is_last {
            response.speech = None;
        }
    }

    fn cancel_response(&mut self, response_id: ResponseId) {
        if let Some(response) = self.responses.remove(&response_id) {
            response.token.cancel();
        }
        let discarded = self.shared.output.discard_pending();
        self.last_cancelled = Some(response_id);

        tracing::debug!(
            session_id = %self.shared.id,
            response_id,
            discarded,
            "Response cancelled"
        );
    }
}

/// Wrap errors that did not come from a capability
fn capability_error(capability: Capability, error: Error) -> Error {
    if error.is_capability_error() {
        error
    } else {
        Error::failure(capability, error.to_string())
    }
}

/// Pull reply chunks from the agent and forward them to the driver
async fn generate(
    agent: Arc<dyn ResponseAgent>,
    history: Vec<ConversationTurn>,
    utterance: Utterance,
    response_id: ResponseId,
    timeout: Duration,
    events: mpsc::Sender<TurnEvent>,
    token: CancellationToken,
) {
    let mut stream = agent.respond(&history, &utterance);
    let mut next_index = 0;

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return,
            next = tokio::time::timeout(timeout, stream.next()) => next,
        };

        let (event, done) = match next {
            Err(_) => (
                TurnEvent::ResponseFailed {
                    response_id,
                    error: Error::timeout(Capability::ResponseAgent, timeout),
                },
                true,
            ),
            // A stream that just ends is a complete response
            Ok(None) => (
                TurnEvent::ResponseChunk {
                    response_id,
                    chunk: ResponseChunk::new(next_index, "", true),
                },
                true,
            ),
            Ok(Some(Err(error))) => (
                TurnEvent::ResponseFailed {
                    response_id,
                    error: capability_error(Capability::ResponseAgent, error),
                },
                true,
            ),
            Ok(Some(Ok(chunk))) => {
                next_index = chunk.index + 1;
                let done = chunk.is_last;
                (TurnEvent::ResponseChunk { response_id, chunk }, done)
            },
        };

        tokio::select! {
            _ = token.cancelled() => return,
            sent = events.send(event) => {
                if sent.is_err() {
                    return;
                }
            },
        }
        if done {
            return;
        }
    }
}

/// Synthesize a response's text as it arrives and play it out
async fn synthesize(
    shared: Arc<Shared>,
    response_id: ResponseId,
    mut speech: mpsc::UnboundedReceiver<String>,
    epoch: u64,
    events: mpsc::Sender<TurnEvent>,
    token: CancellationToken,
) {
    let result = tokio::select! {
        _ = token.cancelled() => return,
        result = play(&shared, &mut speech, epoch) => result,
    };

    let event = match result {
        Ok(()) => TurnEvent::SynthesisComplete { response_id },
        Err(error) if error.is_cancelled() => return,
        Err(error) => TurnEvent::SynthesisFailed {
            response_id,
            error: capability_error(Capability::SpeechSynthesizer, error),
        },
    };

    tokio::select! {
        _ = token.cancelled() => {},
        _ = events.send(event) => {},
    }
}

async fn play(
    shared: &Shared,
    speech: &mut mpsc::UnboundedReceiver<String>,
    epoch: u64,
) -> Result<()> {
    let format = shared.output_format;
    let timeout = shared.config.synthesizer_timeout;
    let mut assembler =
        FrameAssembler::new(format.sample_rate, format.channels, shared.config.frame_duration);
    let mut clock = PlaybackClock::new(shared.config.playback_lead);

    while let Some(text) = speech.recv().await {
        if text.trim().is_empty() {
            continue;
        }

        let mut frames = shared.synthesizer.synthesize(&text);
        loop {
            match tokio::time::timeout(timeout, frames.next()).await {
                Err(_) => return Err(Error::timeout(Capability::SpeechSynthesizer, timeout)),
                Ok(None) => break,
                Ok(Some(Err(error))) => {
                    return Err(capability_error(Capability::SpeechSynthesizer, error))
                },
                Ok(Some(Ok(frame))) => {
                    for frame in assembler.push_frame(&frame) {
                        clock.pace(frame.duration).await;
                        shared.output.send(frame, epoch).await?;
                    }
                },
            }
        }
    }

    if let Some(tail) = assembler.flush() {
        clock.pace(tail.duration).await;
        shared.output.send(tail, epoch).await?;
    }

    // Complete only once the transport has taken every frame and it has played
    shared.output.drained().await;
    clock.played_out().await;
    if shared.output.epoch() != epoch {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Feed the input bus to the transcriber, restarting the stream after failures
async fn transcribe(shared: Arc<Shared>, events: mpsc::Sender<TurnEvent>) {
    let format = AudioFormat {
        channels: parley_core::Channels::Mono,
        ..shared.input_format
    };

    loop {
        let audio = Box::pin(shared.input.clone().into_stream());
        let mut utterances = shared.transcriber.transcribe_stream(format, audio);
        let mut mid_utterance = false;

        let error = loop {
            let next = async {
                if mid_utterance {
                    tokio::time::timeout(shared.config.transcriber_timeout, utterances.next())
                        .await
                        .map_err(|_| {
                            Error::timeout(Capability::Transcriber, shared.config.transcriber_timeout)
                        })
                } else {
                    Ok(utterances.next().await)
                }
            };

            let next = tokio::select! {
                _ = shared.cancel.cancelled() => return,
                next = next => next,
            };

            match next {
                Ok(Some(Ok(utterance))) => {
                    mid_utterance = !utterance.is_final && !utterance.is_blank();
                    if events.send(TurnEvent::Utterance(utterance)).await.is_err() {
                        return;
                    }
                },
                Ok(Some(Err(error))) => break capability_error(Capability::Transcriber, error),
                Ok(None) => {
                    if shared.input.is_closed() {
                        return;
                    }
                    break Error::failure(Capability::Transcriber, "stream ended unexpectedly");
                },
                Err(error) => break error,
            }
        };

        drop(utterances);
        if events
            .send(TurnEvent::TranscriberFailed { error })
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.config.transcriber_restart_delay) => {},
        }
        tracing::debug!(session_id = %shared.id, "Restarting transcriber stream");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings() {
        let settings = SessionSettings {
            agent_timeout_ms: 1500,
            closing_notice: "  ".to_string(),
            ..Default::default()
        };
        let config = SessionConfig::from(&settings);

        assert_eq!(config.agent_timeout, Duration::from_millis(1500));
        assert_eq!(config.frame_duration, Duration::from_millis(20));
        assert!(config.closing_notice.is_none());
    }
}
