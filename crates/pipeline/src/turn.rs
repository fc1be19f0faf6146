//! Turn-taking state machine
//!
//! The controller is a synchronous reducer: the session feeds it typed events
//! (utterances, response chunks, completion and failure signals) and executes the
//! actions it returns. It never touches audio, tasks or the transport, so every
//! rule below can be exercised with synthetic event sequences.
//!
//! ```text
//! Idle -> Listening -> Thinking -> Speaking -> Listening ...
//!                                     |
//!                                     +-> Interrupted -> Thinking
//! any -> Closed
//! ```
//!
//! History discipline: a caller turn is only committed together with the agent turn
//! that answers it, so the recorded history strictly alternates. Caller text whose
//! reply was interrupted is carried into the next utterance.

use parley_core::{
    Capability, ConversationTurn, EndReason, Error, ResponseChunk, Role, SessionState, TurnKind,
    Utterance,
};

/// Identifies one response within a session
pub type ResponseId = u64;

/// What a response is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Agent reply to caller speech
    Reply,
    /// Initial message played at session start
    Greeting,
    /// Apology spoken after a failure
    Fallback,
    /// Closing notice spoken before a fatal close
    Farewell,
}

/// Controller policy
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub greeting: Option<String>,
    pub apology: String,
    pub closing_notice: Option<String>,
    pub max_consecutive_failures: u32,
    pub allow_interruptions: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            greeting: None,
            apology: parley_config::constants::persona::APOLOGY.to_string(),
            closing_notice: Some(parley_config::constants::persona::CLOSING_NOTICE.to_string()),
            max_consecutive_failures: 3,
            allow_interruptions: true,
        }
    }
}

/// Inputs to the controller
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Session started
    Start,
    /// Transcriber output
    Utterance(Utterance),
    /// Next chunk of a reply
    ResponseChunk {
        response_id: ResponseId,
        chunk: ResponseChunk,
    },
    /// Reply generation failed or timed out
    ResponseFailed {
        response_id: ResponseId,
        error: Error,
    },
    /// Every frame of a response has been played out
    SynthesisComplete { response_id: ResponseId },
    /// Synthesis failed or timed out
    SynthesisFailed {
        response_id: ResponseId,
        error: Error,
    },
    /// Transcriber stream failed or timed out
    TranscriberFailed { error: Error },
    /// Session teardown
    Close { reason: EndReason },
}

/// Work the session must perform, in order
#[derive(Debug, Clone, PartialEq)]
pub enum TurnAction {
    Transition {
        from: SessionState,
        to: SessionState,
    },
    /// Ask the agent to reply to `utterance`
    StartResponse {
        response_id: ResponseId,
        utterance: Utterance,
    },
    /// Synthesize `text` as part of `response_id`; `is_last` ends the response
    Speak {
        response_id: ResponseId,
        text: String,
        is_last: bool,
    },
    /// Stop generation and synthesis for `response_id` and discard its queued audio
    CancelResponse { response_id: ResponseId },
    RecordTurn(ConversationTurn),
    Close { reason: EndReason },
}

#[derive(Debug)]
struct ActiveResponse {
    id: ResponseId,
    kind: ResponseKind,
    /// Text handed to the synthesizer so far
    spoken: Vec<String>,
    /// The agent failed after some of the reply was already spoken
    failed: bool,
}

impl ActiveResponse {
    fn new(id: ResponseId, kind: ResponseKind) -> Self {
        Self {
            id,
            kind,
            spoken: Vec::new(),
            failed: false,
        }
    }

    fn text(&self) -> String {
        self.spoken
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Turn-taking state machine for one session
#[derive(Debug)]
pub struct TurnController {
    config: TurnConfig,
    state: SessionState,
    next_id: ResponseId,
    active: Option<ActiveResponse>,
    /// Caller text awaiting the agent turn that answers it
    pending_caller: Option<String>,
    /// Final caller speech held back while an uninterruptible response plays
    deferred: Option<Utterance>,
    consecutive_failures: u32,
    closing: bool,
}

impl TurnController {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            next_id: 0,
            active: None,
            pending_caller: None,
            deferred: None,
            consecutive_failures: 0,
            closing: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Response currently being generated or played
    pub fn active_response(&self) -> Option<(ResponseId, ResponseKind)> {
        self.active.as_ref().map(|a| (a.id, a.kind))
    }

    /// Apply one event, returning the actions to execute
    pub fn handle(&mut self, event: TurnEvent) -> Vec<TurnAction> {
        let mut actions = Vec::new();
        if self.state.is_closed() {
            return actions;
        }

        match event {
            TurnEvent::Start => self.on_start(&mut actions),
            TurnEvent::Utterance(utterance) => self.on_utterance(utterance, &mut actions),
            TurnEvent::ResponseChunk { response_id, chunk } => {
                self.on_chunk(response_id, chunk, &mut actions)
            },
            TurnEvent::ResponseFailed { response_id, error } => {
                self.on_response_failed(response_id, error, &mut actions)
            },
            TurnEvent::SynthesisComplete { response_id } => {
                self.on_synthesis_complete(response_id, &mut actions)
            },
            TurnEvent::SynthesisFailed { response_id, error } => {
                self.on_synthesis_failed(response_id, error, &mut actions)
            },
            TurnEvent::TranscriberFailed { error } => {
                self.on_transcriber_failed(error, &mut actions)
            },
            TurnEvent::Close { reason } => self.close(reason, &mut actions),
        }

        actions
    }

    fn on_start(&mut self, actions: &mut Vec<TurnAction>) {
        if self.state != SessionState::Idle {
            return;
        }
        self.transition(SessionState::Listening, actions);

        if let Some(greeting) = self.config.greeting.clone() {
            self.speak_canned(ResponseKind::Greeting, greeting, actions);
        }
    }

    fn on_utterance(&mut self, utterance: Utterance, actions: &mut Vec<TurnAction>) {
        if utterance.is_blank() {
            return;
        }

        match self.state {
            SessionState::Listening | SessionState::Interrupted => {
                if utterance.is_final {
                    self.start_reply(utterance, actions);
                }
            },
            SessionState::Thinking => {
                if utterance.is_final {
                    // Caller kept talking: answer everything they said instead
                    if let Some(active) = self.active.take() {
                        actions.push(TurnAction::CancelResponse {
                            response_id: active.id,
                        });
                    }
                    self.start_reply(utterance, actions);
                }
            },
            SessionState::Speaking => {
                let kind = self.active.as_ref().map(|a| a.kind);
                if kind == Some(ResponseKind::Farewell) {
                    return;
                }

                if !self.config.allow_interruptions {
                    if utterance.is_final {
                        self.defer(utterance);
                    }
                    return;
                }

                if let Some(active) = self.active.take() {
                    tracing::info!(
                        response_id = active.id,
                        kind = ?active.kind,
                        "Caller interrupted response"
                    );
                    actions.push(TurnAction::CancelResponse {
                        response_id: active.id,
                    });
                }
                self.transition(SessionState::Interrupted, actions);

                if utterance.is_final {
                    self.start_reply(utterance, actions);
                }
            },
            SessionState::Idle | SessionState::Closed => {},
        }
    }

    fn on_chunk(
        &mut self,
        response_id: ResponseId,
        chunk: ResponseChunk,
        actions: &mut Vec<TurnAction>,
    ) {
        let Some(active) = self.active.as_mut().filter(|a| a.id == response_id) else {
            tracing::trace!(response_id, "Ignoring chunk from stale response");
            return;
        };
        if active.failed {
            return;
        }

        let blank = chunk.text.trim().is_empty();
        if blank && !chunk.is_last {
            return;
        }
        if blank && active.spoken.is_empty() {
            self.on_response_failed(
                response_id,
                Error::failure(Capability::ResponseAgent, "empty response"),
                actions,
            );
            return;
        }

        active.spoken.push(chunk.text.clone());
        if self.state == SessionState::Thinking {
            self.transition(SessionState::Speaking, actions);
        }
        actions.push(TurnAction::Speak {
            response_id,
            text: chunk.text,
            is_last: chunk.is_last,
        });
    }

    fn on_response_failed(
        &mut self,
        response_id: ResponseId,
        error: Error,
        actions: &mut Vec<TurnAction>,
    ) {
        let nothing_spoken = match self.active.as_ref().filter(|a| a.id == response_id) {
            Some(active) if active.kind == ResponseKind::Reply && !active.failed => {
                active.spoken.is_empty()
            },
            _ => return,
        };

        tracing::warn!(response_id, error = %error, "Response generation failed");
        self.consecutive_failures += 1;

        if self.limit_reached() {
            self.begin_closing(Capability::ResponseAgent, actions);
            return;
        }

        let apology = self.config.apology.clone();
        if nothing_spoken {
            // Nothing was said yet: answer the caller with the apology instead
            self.active = None;
            actions.push(TurnAction::CancelResponse { response_id });
            self.record_pair(TurnKind::Spoken, apology.clone(), TurnKind::Fallback, actions);
            self.speak_canned(ResponseKind::Fallback, apology, actions);
        } else if let Some(active) = self.active.as_mut() {
            // Finish what is already queued, then apologise in the same response
            active.failed = true;
            active.spoken.push(apology.clone());
            actions.push(TurnAction::Speak {
                response_id,
                text: apology,
                is_last: true,
            });
        }
    }

    fn on_synthesis_complete(&mut self, response_id: ResponseId, actions: &mut Vec<TurnAction>) {
        let Some(active) = self.active.take_if_id(response_id) else {
            return;
        };

        match active.kind {
            ResponseKind::Reply => {
                let text = active.text();
                if active.failed {
                    self.record_pair(TurnKind::Spoken, text, TurnKind::Fallback, actions);
                } else {
                    self.consecutive_failures = 0;
                    self.record_pair(TurnKind::Spoken, text, TurnKind::Spoken, actions);
                }
                self.finish_speaking(actions);
            },
            ResponseKind::Greeting | ResponseKind::Fallback => self.finish_speaking(actions),
            ResponseKind::Farewell => {
                self.close(EndReason::ConsecutiveFailureLimitExceeded, actions)
            },
        }
    }

    fn on_synthesis_failed(
        &mut self,
        response_id: ResponseId,
        error: Error,
        actions: &mut Vec<TurnAction>,
    ) {
        let Some(active) = self.active.take_if_id(response_id) else {
            return;
        };

        tracing::warn!(response_id, error = %error, "Speech synthesis failed");
        actions.push(TurnAction::CancelResponse { response_id });

        if active.kind == ResponseKind::Farewell {
            self.close(EndReason::ConsecutiveFailureLimitExceeded, actions);
            return;
        }

        self.consecutive_failures += 1;
        if active.kind == ResponseKind::Reply {
            self.record_pair(TurnKind::Spoken, active.text(), TurnKind::ErrorMarker, actions);
        }

        if self.limit_reached() {
            self.begin_closing(Capability::SpeechSynthesizer, actions);
            return;
        }
        self.finish_speaking(actions);
    }

    fn on_transcriber_failed(&mut self, error: Error, actions: &mut Vec<TurnAction>) {
        if self.state == SessionState::Idle {
            return;
        }

        tracing::warn!(state = %self.state, error = %error, "Transcriber failed");
        self.consecutive_failures += 1;

        if self.limit_reached() {
            self.begin_closing(Capability::Transcriber, actions);
            return;
        }

        match self.state {
            SessionState::Listening | SessionState::Interrupted => {
                let lost = self.pending_caller.take().unwrap_or_default();
                let apology = self.config.apology.clone();
                actions.push(TurnAction::RecordTurn(ConversationTurn::new(
                    Role::Caller,
                    lost,
                    TurnKind::ErrorMarker,
                )));
                actions.push(TurnAction::RecordTurn(ConversationTurn::new(
                    Role::Agent,
                    apology.clone(),
                    TurnKind::Fallback,
                )));
                self.speak_canned(ResponseKind::Fallback, apology, actions);
            },
            // The in-flight response carries on; the failure only counts
            _ => {},
        }
    }

    fn start_reply(&mut self, utterance: Utterance, actions: &mut Vec<TurnAction>) {
        let text = match self.pending_caller.take() {
            Some(earlier) => format!("{} {}", earlier.trim(), utterance.text.trim()),
            None => utterance.text.trim().to_string(),
        };
        self.pending_caller = Some(text.clone());

        let response_id = self.allocate_id();
        self.active = Some(ActiveResponse::new(response_id, ResponseKind::Reply));
        self.transition(SessionState::Thinking, actions);
        actions.push(TurnAction::StartResponse {
            response_id,
            utterance: Utterance { text, ..utterance },
        });
    }

    /// Play fixed text as a single-chunk response
    fn speak_canned(&mut self, kind: ResponseKind, text: String, actions: &mut Vec<TurnAction>) {
        let response_id = self.allocate_id();
        let mut active = ActiveResponse::new(response_id, kind);
        active.spoken.push(text.clone());
        self.active = Some(active);

        if self.state == SessionState::Interrupted {
            self.transition(SessionState::Listening, actions);
        }
        self.transition(SessionState::Speaking, actions);
        actions.push(TurnAction::Speak {
            response_id,
            text,
            is_last: true,
        });
    }

    fn finish_speaking(&mut self, actions: &mut Vec<TurnAction>) {
        self.transition(SessionState::Listening, actions);
        if let Some(utterance) = self.deferred.take() {
            self.start_reply(utterance, actions);
        }
    }

    fn defer(&mut self, utterance: Utterance) {
        self.deferred = Some(match self.deferred.take() {
            Some(earlier) => Utterance {
                text: format!("{} {}", earlier.text.trim(), utterance.text.trim()),
                start: earlier.start,
                ..utterance
            },
            None => utterance,
        });
    }

    /// Commit the pending caller text and the agent turn answering it
    fn record_pair(
        &mut self,
        caller_kind: TurnKind,
        agent_text: String,
        agent_kind: TurnKind,
        actions: &mut Vec<TurnAction>,
    ) {
        let caller = self.pending_caller.take().unwrap_or_default();
        actions.push(TurnAction::RecordTurn(ConversationTurn::new(
            Role::Caller,
            caller,
            caller_kind,
        )));
        actions.push(TurnAction::RecordTurn(ConversationTurn::new(
            Role::Agent,
            agent_text,
            agent_kind,
        )));
    }

    fn limit_reached(&self) -> bool {
        self.consecutive_failures >= self.config.max_consecutive_failures
    }

    /// Speak the closing notice (when possible) and close
    fn begin_closing(&mut self, failing: Capability, actions: &mut Vec<TurnAction>) {
        tracing::error!(
            failures = self.consecutive_failures,
            capability = %failing,
            "Consecutive failure limit reached"
        );

        if let Some(active) = self.active.take() {
            actions.push(TurnAction::CancelResponse {
                response_id: active.id,
            });
            if active.kind == ResponseKind::Reply && self.pending_caller.is_some() {
                let apology = self.config.apology.clone();
                self.record_pair(TurnKind::Spoken, apology, TurnKind::Fallback, actions);
            }
        }

        let notice = self
            .config
            .closing_notice
            .clone()
            .filter(|text| !text.trim().is_empty());

        match notice {
            Some(notice) if failing != Capability::SpeechSynthesizer && !self.closing => {
                self.closing = true;
                self.deferred = None;
                self.speak_canned(ResponseKind::Farewell, notice, actions);
            },
            _ => self.close(EndReason::ConsecutiveFailureLimitExceeded, actions),
        }
    }

    fn close(&mut self, reason: EndReason, actions: &mut Vec<TurnAction>) {
        if self.state.is_closed() {
            return;
        }
        if let Some(active) = self.active.take() {
            actions.push(TurnAction::CancelResponse {
                response_id: active.id,
            });
        }
        self.transition(SessionState::Closed, actions);
        actions.push(TurnAction::Close { reason });
    }

    fn transition(&mut self, to: SessionState, actions: &mut Vec<TurnAction>) {
        let from = self.state;
        if from == to {
            return;
        }
        debug_assert!(
            from.can_transition_to(to),
            "invalid transition {} -> {}",
            from,
            to
        );
        self.state = to;
        actions.push(TurnAction::Transition { from, to });
    }

    fn allocate_id(&mut self) -> ResponseId {
        self.next_id += 1;
        self.next_id
    }
}

trait TakeIfId {
    fn take_if_id(&mut self, id: ResponseId) -> Option<ActiveResponse>;
}

impl TakeIfId for Option<ActiveResponse> {
    fn take_if_id(&mut self, id: ResponseId) -> Option<ActiveResponse> {
        if self.as_ref().is_some_and(|a| a.id == id) {
            self.take()
        } else {
            None
        }
    }
}
