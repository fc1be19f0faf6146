//! WebSocket Handler
//!
//! One websocket is one conversation. The client opens with a `start` message
//! negotiating both audio directions, then streams base64 audio; the server answers
//! with agent audio, optional transcripts and a final `end`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

use parley_core::{AudioEncoding, AudioFormat, AudioFrame, Channels, EndReason, SampleRate};
use parley_pipeline::{InboundMessage, OutboundMessage, SessionEvent, TransportConnection};

use crate::metrics;
use crate::state::AppState;
use crate::ServerError;

/// How long a fresh socket may stay silent before sending `start`
const START_TIMEOUT: Duration = Duration::from_secs(10);

const INBOUND_QUEUE: usize = 64;
const OUTBOUND_QUEUE: usize = 256;

/// Audio direction as negotiated by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub sampling_rate: u32,
    #[serde(default)]
    pub audio_encoding: AudioEncoding,
}

impl AudioSpec {
    pub fn negotiate(&self) -> Result<AudioFormat, ServerError> {
        let rate = SampleRate::try_from(self.sampling_rate)
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        Ok(AudioFormat::new(rate, self.audio_encoding))
    }
}

/// Client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start {
        input_audio: AudioSpec,
        output_audio: AudioSpec,
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        subscribe_transcript: bool,
    },
    /// Caller audio in the input format (base64 encoded)
    Audio { data: String },
    Stop,
}

/// Who a transcript line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
}

/// Server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ready {
        session_id: String,
    },
    /// Agent audio in the output format (base64 encoded)
    Audio {
        data: String,
    },
    Transcript {
        sender: Speaker,
        text: String,
        is_final: bool,
    },
    /// Drop any agent audio buffered for playback; the caller interrupted it
    Clear,
    End {
        reason: EndReason,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    fn into_ws(self) -> Option<Message> {
        match serde_json::to_string(&self) {
            Ok(json) => Some(Message::Text(json)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server message");
                None
            },
        }
    }
}

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Negotiated parameters of one conversation
struct Negotiated {
    id: String,
    input: AudioFormat,
    output: AudioFormat,
    subscribe_transcript: bool,
}

/// Handle WebSocket upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let negotiated = match tokio::time::timeout(START_TIMEOUT, read_start(&mut stream)).await {
        Ok(Ok(negotiated)) => negotiated,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Rejected conversation start");
            reject(&mut sink, e.to_string()).await;
            return;
        },
        Err(_) => {
            reject(&mut sink, "no start message received".to_string()).await;
            return;
        },
    };

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let connection = TransportConnection {
        id: negotiated.id.clone(),
        input_format: negotiated.input,
        output_format: negotiated.output,
        inbound: inbound_rx,
        outbound: outbound_tx,
    };

    let session = match state.router.on_connect(connection).await {
        Ok(session) => session,
        Err(e) => {
            metrics::record_session_rejected();
            tracing::warn!(session_id = %negotiated.id, error = %e, "Conversation refused");
            reject(&mut sink, e.to_string()).await;
            return;
        },
    };
    metrics::record_session_started(state.router.active_sessions());

    let ready = ServerMessage::Ready {
        session_id: negotiated.id.clone(),
    };
    if let Some(message) = ready.into_ws() {
        if sink.send(message).await.is_err() {
            session.close().await;
        }
    }

    let writer = tokio::spawn(write_outbound(
        sink,
        outbound_rx,
        negotiated.output,
        negotiated.subscribe_transcript,
    ));

    if let Err(e) = read_inbound(&mut stream, &inbound_tx, negotiated.input).await {
        tracing::warn!(session_id = %negotiated.id, error = %e, "Conversation socket failed");
        session.close_with(EndReason::TransportError).await;
    }
    // The supervisor treats a closed inbound channel as a hangup
    drop(inbound_tx);

    match writer.await {
        Ok(Some(reason)) => metrics::record_session_ended(reason, state.router.active_sessions()),
        Ok(None) => metrics::record_active_sessions(state.router.active_sessions()),
        Err(e) => tracing::error!(session_id = %negotiated.id, error = %e, "Socket writer failed"),
    }
}

/// Wait for the `start` message and negotiate formats
async fn read_start(stream: &mut WsStream) -> Result<Negotiated, ServerError> {
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| ServerError::WebSocket(e.to_string()))?;
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Pings are answered by axum
            _ => continue,
        };

        return match parse_client_message(&text)? {
            ClientMessage::Start {
                input_audio,
                output_audio,
                conversation_id,
                subscribe_transcript,
            } => Ok(Negotiated {
                id: conversation_id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                input: input_audio.negotiate()?,
                output: output_audio.negotiate()?,
                subscribe_transcript,
            }),
            _ => Err(ServerError::InvalidRequest(
                "expected a start message".to_string(),
            )),
        };
    }

    Err(ServerError::WebSocket("closed before start".to_string()))
}

/// Forward caller messages to the session until the caller stops or leaves
///
/// Returns an error only when the socket itself failed.
async fn read_inbound(
    stream: &mut WsStream,
    inbound: &mpsc::Sender<InboundMessage>,
    format: AudioFormat,
) -> Result<(), ServerError> {
    let mut sequence = 0u64;

    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| ServerError::WebSocket(e.to_string()))?;
        let bytes = match message {
            Message::Text(text) => match parse_client_message(&text) {
                Ok(ClientMessage::Audio { data }) => match BASE64.decode(data.as_bytes()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping undecodable audio");
                        continue;
                    },
                },
                Ok(ClientMessage::Stop) => {
                    let _ = inbound.send(InboundMessage::Stop).await;
                    return Ok(());
                },
                Ok(ClientMessage::Start { .. }) => {
                    tracing::debug!("Ignoring repeated start");
                    continue;
                },
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring malformed client message");
                    continue;
                },
            },
            // Raw audio in the input format
            Message::Binary(bytes) => bytes,
            Message::Close(_) => return Ok(()),
            _ => continue,
        };

        if let Some(frame) = decode_audio(format, &bytes, sequence) {
            sequence += 1;
            if inbound.send(InboundMessage::Audio(frame)).await.is_err() {
                // Session is gone
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Relay session output to the socket; returns the end reason once delivered
///
/// Everything already queued is looked at before the next send, so audio that an
/// interruption made stale is dropped instead of played.
async fn write_outbound(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    format: AudioFormat,
    subscribe_transcript: bool,
) -> Option<EndReason> {
    let mut pending = VecDeque::new();
    let mut socket_open = true;

    loop {
        if pending.is_empty() {
            match outbound.recv().await {
                Some(message) => pending.push_back(message),
                None => return None,
            }
        }
        while let Ok(message) = outbound.try_recv() {
            pending.push_back(message);
        }

        let stale = discard_stale_audio(&mut pending);
        if stale > 0 {
            tracing::debug!(frames = stale, "Dropped interrupted audio");
        }

        let Some(message) = pending.pop_front() else {
            continue;
        };
        let (reply, end) = match message {
            OutboundMessage::Audio(frame) => (Some(encode_audio(format, &frame)), None),
            OutboundMessage::Event(event) => {
                metrics::record_event(&event);
                (event_message(event, subscribe_transcript), None)
            },
            OutboundMessage::End(reason) => (Some(ServerMessage::End { reason }), Some(reason)),
        };

        if socket_open {
            if let Some(message) = reply.and_then(ServerMessage::into_ws) {
                // Keep draining so the session never blocks on a dead socket
                socket_open = sink.send(message).await.is_ok();
            }
        }

        if end.is_some() {
            let _ = sink.close().await;
            return end;
        }
    }
}

/// Drop queued audio that precedes the last queued interruption
///
/// Returns how many frames were dropped.
fn discard_stale_audio(pending: &mut VecDeque<OutboundMessage>) -> usize {
    let Some(cut) = pending.iter().rposition(|message| {
        matches!(message, OutboundMessage::Event(SessionEvent::Interrupted { .. }))
    }) else {
        return 0;
    };

    let before = pending.len();
    let mut index = 0;
    pending.retain(|message| {
        let keep = index >= cut || !matches!(message, OutboundMessage::Audio(_));
        index += 1;
        keep
    });
    before - pending.len()
}

/// Client message for a session event, if the client wants one
fn event_message(event: SessionEvent, subscribe_transcript: bool) -> Option<ServerMessage> {
    match event {
        SessionEvent::Interrupted { .. } => Some(ServerMessage::Clear),
        event if subscribe_transcript => transcript_message(event),
        _ => None,
    }
}

fn transcript_message(event: SessionEvent) -> Option<ServerMessage> {
    match event {
        SessionEvent::Transcript { text, is_final } => Some(ServerMessage::Transcript {
            sender: Speaker::Caller,
            text,
            is_final,
        }),
        SessionEvent::AgentText { text, is_final, .. } if !text.trim().is_empty() => {
            Some(ServerMessage::Transcript {
                sender: Speaker::Agent,
                text,
                is_final,
            })
        },
        _ => None,
    }
}

fn parse_client_message(text: &str) -> Result<ClientMessage, ServerError> {
    serde_json::from_str(text).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}

fn decode_audio(format: AudioFormat, bytes: &[u8], sequence: u64) -> Option<AudioFrame> {
    let samples = format.decode(bytes);
    if samples.is_empty() {
        return None;
    }
    Some(AudioFrame::new(
        samples,
        format.sample_rate,
        Channels::Mono,
        sequence,
    ))
}

fn encode_audio(format: AudioFormat, frame: &AudioFrame) -> ServerMessage {
    ServerMessage::Audio {
        data: BASE64.encode(format.encode(frame)),
    }
}

async fn reject(sink: &mut WsSink, message: String) {
    if let Some(error) = (ServerMessage::Error { message }).into_ws() {
        let _ = sink.send(error).await;
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let json = r#"{
            "type": "start",
            "input_audio": {"sampling_rate": 16000, "audio_encoding": "linear16"},
            "output_audio": {"sampling_rate": 8000, "audio_encoding": "mulaw"},
            "subscribe_transcript": true
        }"#;

        match parse_client_message(json).unwrap() {
            ClientMessage::Start {
                input_audio,
                output_audio,
                conversation_id,
                subscribe_transcript,
            } => {
                assert_eq!(
                    input_audio.negotiate().unwrap(),
                    AudioFormat::new(SampleRate::Hz16000, AudioEncoding::Pcm16)
                );
                assert_eq!(
                    output_audio.negotiate().unwrap(),
                    AudioFormat::new(SampleRate::Hz8000, AudioEncoding::Mulaw)
                );
                assert_eq!(conversation_id, None);
                assert!(subscribe_transcript);
            },
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_rate_rejected() {
        let spec = AudioSpec {
            sampling_rate: 11025,
            audio_encoding: AudioEncoding::Pcm16,
        };
        assert!(matches!(spec.negotiate(), Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn test_server_message_shape() {
        let json = serde_json::to_value(ServerMessage::End {
            reason: EndReason::ConsecutiveFailureLimitExceeded,
        })
        .unwrap();
        assert_eq!(json["type"], "end");
        assert_eq!(json["reason"], "consecutive_failure_limit_exceeded");

        let json = serde_json::to_value(ServerMessage::Transcript {
            sender: Speaker::Agent,
            text: "Yo".to_string(),
            is_final: true,
        })
        .unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["sender"], "agent");
    }

    #[test]
    fn test_audio_roundtrip_through_format() {
        let format = AudioFormat::new(SampleRate::Hz8000, AudioEncoding::Mulaw);
        let frame = decode_audio(format, &[0xFF; 160], 3).unwrap();
        assert_eq!(frame.samples.len(), 160);
        assert_eq!(frame.sequence, 3);

        match encode_audio(format, &frame) {
            ServerMessage::Audio { data } => {
                assert_eq!(BASE64.decode(data).unwrap(), vec![0xFF; 160]);
            },
            other => panic!("expected audio, got {:?}", other),
        }

        assert!(decode_audio(format, &[], 0).is_none());
    }

    #[test]
    fn test_transcripts_by_speaker() {
        let caller = transcript_message(SessionEvent::Transcript {
            text: "hello".to_string(),
            is_final: false,
        });
        assert!(matches!(
            caller,
            Some(ServerMessage::Transcript { sender: Speaker::Caller, is_final: false, .. })
        ));

        assert!(transcript_message(SessionEvent::Interrupted {
            response_id: Default::default(),
        })
        .is_none());
    }

    fn frame() -> OutboundMessage {
        OutboundMessage::Audio(AudioFrame::new(
            vec![0.0; 160],
            SampleRate::Hz8000,
            Channels::Mono,
            0,
        ))
    }

    fn interrupted() -> OutboundMessage {
        OutboundMessage::Event(SessionEvent::Interrupted { response_id: 1 })
    }

    #[test]
    fn test_interruption_clears_client_audio() {
        assert!(matches!(
            event_message(SessionEvent::Interrupted { response_id: 1 }, false),
            Some(ServerMessage::Clear)
        ));
        assert!(event_message(
            SessionEvent::Transcript {
                text: "hi".to_string(),
                is_final: true,
            },
            false,
        )
        .is_none());

        let json = serde_json::to_value(ServerMessage::Clear).unwrap();
        assert_eq!(json, serde_json::json!({"type": "clear"}));
    }

    #[test]
    fn test_queued_audio_before_interruption_dropped() {
        let mut pending: VecDeque<_> = vec![
            frame(),
            frame(),
            OutboundMessage::Event(SessionEvent::Transcript {
                text: "wait".to_string(),
                is_final: true,
            }),
            frame(),
            interrupted(),
            frame(),
        ]
        .into();

        assert_eq!(discard_stale_audio(&mut pending), 3);
        assert_eq!(pending.len(), 3);
        assert!(matches!(
            pending[0],
            OutboundMessage::Event(SessionEvent::Transcript { .. })
        ));
        assert!(matches!(
            pending[1],
            OutboundMessage::Event(SessionEvent::Interrupted { .. })
        ));
        assert!(matches!(pending[2], OutboundMessage::Audio(_)));

        // Nothing left to drop
        assert_eq!(discard_stale_audio(&mut pending), 0);
        let mut quiet: VecDeque<_> = vec![frame(), frame()].into();
        assert_eq!(discard_stale_audio(&mut quiet), 0);
    }
}
