//! Session router
//!
//! Binds transport connections to conversation sessions. Each connection gets one
//! session and one supervisor task that moves audio and events between the two
//! until either side ends. Audio and events reach the transport on one ordered
//! queue.

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parley_core::{AudioFormat, AudioFrame, EndReason, ResponseAgent, Transcriber};

use crate::session::{ConversationSession, SessionConfig, SessionEvent, SessionParts};
use crate::tts::SynthesizerBackend;
use crate::PipelineError;

/// Router limits and per-session policy
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub session: SessionConfig,
    /// Concurrent sessions accepted before new connections are refused
    pub max_sessions: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            max_sessions: 100,
        }
    }
}

/// Transport to session
#[derive(Debug)]
pub enum InboundMessage {
    Audio(AudioFrame),
    /// Caller ended the call
    Stop,
}

/// Session to transport
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Audio(AudioFrame),
    Event(SessionEvent),
    /// Final message; the session is gone
    End(EndReason),
}

/// One accepted transport connection
pub struct TransportConnection {
    pub id: String,
    pub input_format: AudioFormat,
    pub output_format: AudioFormat,
    pub inbound: mpsc::Receiver<InboundMessage>,
    pub outbound: mpsc::Sender<OutboundMessage>,
}

struct SessionEntry {
    session: Arc<ConversationSession>,
    stop: oneshot::Sender<EndReason>,
    handle: JoinHandle<()>,
}

type SessionMap = Arc<Mutex<HashMap<String, SessionEntry>>>;

/// Creates, tracks and tears down one session per connection
pub struct SessionRouter {
    config: RouterConfig,
    agent: Arc<dyn ResponseAgent>,
    synthesizer: SynthesizerBackend,
    transcriber: Arc<dyn Transcriber>,
    sessions: SessionMap,
    permits: Arc<Semaphore>,
}

impl SessionRouter {
    pub fn new(
        config: RouterConfig,
        agent: Arc<dyn ResponseAgent>,
        synthesizer: SynthesizerBackend,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_sessions.max(1)));
        Self {
            config,
            agent,
            synthesizer,
            transcriber,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            permits,
        }
    }

    /// Create and start a session for `connection`
    ///
    /// Returns once the session is running; the connection's channels are then
    /// driven by a supervisor task until the session ends.
    pub async fn on_connect(
        &self,
        connection: TransportConnection,
    ) -> Result<Arc<ConversationSession>, PipelineError> {
        let TransportConnection {
            id,
            input_format,
            output_format,
            inbound,
            outbound,
        } = connection;

        if self.sessions.lock().contains_key(&id) {
            return Err(PipelineError::DuplicateSession(id));
        }
        let permit = self.permits.clone().try_acquire_owned().map_err(|_| {
            tracing::warn!(session_id = %id, max = self.config.max_sessions, "Session limit reached");
            PipelineError::SessionLimit(self.config.max_sessions)
        })?;

        let session = Arc::new(ConversationSession::new(
            SessionParts {
                id: id.clone(),
                input_format,
                output_format,
                transcriber: self.transcriber.clone(),
                agent: self.agent.clone(),
                synthesizer: self.synthesizer.clone(),
            },
            self.config.session.clone(),
        )?);

        let events = session.subscribe();
        let audio = session.outbound_audio()?;
        session.start().await?;

        let (stop, stop_rx) = oneshot::channel();
        let supervisor = Supervisor {
            session: session.clone(),
            sessions: self.sessions.clone(),
            _permit: permit,
        };

        // Checked and inserted under one lock so the supervisor cannot remove the
        // entry before it exists
        let inserted = {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(&id) {
                false
            } else {
                let handle =
                    tokio::spawn(supervisor.run(inbound, outbound, events, audio, stop_rx));
                sessions.insert(
                    id.clone(),
                    SessionEntry {
                        session: session.clone(),
                        stop,
                        handle,
                    },
                );
                true
            }
        };
        if !inserted {
            session.close_with(EndReason::Shutdown).await;
            return Err(PipelineError::DuplicateSession(id));
        }

        tracing::info!(session_id = %id, "Session connected");
        Ok(session)
    }

    /// Close the session for `id` as a caller hangup and wait for it to finish
    pub async fn on_disconnect(&self, id: &str) {
        let entry = self.sessions.lock().remove(id);
        if let Some(entry) = entry {
            let _ = entry.stop.send(EndReason::CallerHangup);
            if let Err(e) = entry.handle.await {
                tracing::error!(session_id = %id, error = %e, "Session supervisor failed");
            }
        }
    }

    /// Close every session and wait for all of them
    pub async fn shutdown(&self) {
        let entries: Vec<(String, SessionEntry)> = self.sessions.lock().drain().collect();
        if entries.is_empty() {
            return;
        }
        tracing::info!(sessions = entries.len(), "Shutting down sessions");

        let mut handles = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let _ = entry.stop.send(EndReason::Shutdown);
            handles.push((id, entry.handle));
        }
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(session_id = %id, error = %e, "Session supervisor failed");
            }
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session(&self, id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions.lock().get(id).map(|entry| entry.session.clone())
    }

    pub fn max_sessions(&self) -> usize {
        self.config.max_sessions
    }
}

/// Per-connection task; holds the session's capacity permit
struct Supervisor {
    session: Arc<ConversationSession>,
    sessions: SessionMap,
    _permit: OwnedSemaphorePermit,
}

impl Supervisor {
    async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        outbound: mpsc::Sender<OutboundMessage>,
        events: broadcast::Receiver<SessionEvent>,
        audio: impl futures::Stream<Item = AudioFrame> + Send + 'static,
        mut stop: oneshot::Receiver<EndReason>,
    ) {
        let id = self.session.id().to_string();
        let pump_cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_outbound(
            audio,
            events,
            outbound.clone(),
            pump_cancel.clone(),
        ));

        // (reason, whether the session ended on its own)
        let (reason, from_session) = loop {
            tokio::select! {
                reason = &mut stop => break (reason.unwrap_or(EndReason::Shutdown), false),
                reason = self.session.ended() => break (reason, true),
                message = inbound.recv() => match message {
                    Some(InboundMessage::Audio(frame)) => {
                        if let Err(e) = self.session.submit_inbound_audio(frame) {
                            tracing::debug!(session_id = %id, error = %e, "Inbound audio rejected");
                        }
                    },
                    Some(InboundMessage::Stop) | None => break (EndReason::CallerHangup, false),
                },
            }
        };

        // Nobody is listening once the caller is gone
        if !from_session {
            pump_cancel.cancel();
        }
        self.session.close_with(reason).await;
        let reason = self.session.end_reason().unwrap_or(reason);

        // Otherwise queued audio drains on its own once the output bus closes
        if let Err(e) = pump.await {
            tracing::error!(session_id = %id, error = %e, "Outbound pump failed");
        }

        {
            let mut sessions = self.sessions.lock();
            if sessions
                .get(&id)
                .is_some_and(|entry| Arc::ptr_eq(&entry.session, &self.session))
            {
                sessions.remove(&id);
            }
        }
        let _ = outbound.send(OutboundMessage::End(reason)).await;

        tracing::info!(session_id = %id, reason = %reason, "Session disconnected");
    }
}

/// Relay session audio and events to the transport in the order they happened
///
/// Events win ties, so an interruption is never queued behind audio produced
/// after it. Ends when the output bus closes, after forwarding the remaining
/// events, or at once on `cancel`.
async fn pump_outbound(
    audio: impl futures::Stream<Item = AudioFrame> + Send + 'static,
    mut events: broadcast::Receiver<SessionEvent>,
    outbound: mpsc::Sender<OutboundMessage>,
    cancel: CancellationToken,
) {
    let mut audio = Box::pin(audio);
    let mut events_open = true;

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = events.recv(), if events_open => match event {
                Ok(event) => OutboundMessage::Event(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Transport fell behind session events");
                    continue;
                },
                Err(broadcast::error::RecvError::Closed) => {
                    events_open = false;
                    continue;
                },
            },
            frame = audio.next() => match frame {
                Some(frame) => OutboundMessage::Audio(frame),
                None => break,
            },
        };

        if outbound.send(message).await.is_err() {
            return;
        }
    }

    // Deliver whatever was published before the end
    while let Ok(event) = events.try_recv() {
        if outbound.send(OutboundMessage::Event(event)).await.is_err() {
            return;
        }
    }
}
