//! Upstream engine wire dialects.
//!
//! Each dialect knows how to render the session configuration frame, how to
//! classify the frames the engine sends, and how to answer a tool call. The
//! relay never rewrites a frame: decoding produces a read-only
//! `UpstreamEvent` next to the untouched raw text.

pub mod elevenlabs;
pub mod openai;

use crate::session_config::SessionConfig;
use crate::tools::{ToolInvocation, ToolOutcome};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Normalized view of one frame received from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The engine accepted the session.
    SessionAck { session_id: Option<String> },
    AudioDelta,
    SpeechStarted,
    SpeechStopped,
    /// The engine finished a response. `transcript` is the text it spoke, if any.
    ResponseDone { transcript: Option<String> },
    ToolCall(ToolInvocation),
    /// Keep-alive the client is expected to answer.
    Ping { event_id: Option<u64> },
    Error { message: String },
    Other { kind: String },
}

impl UpstreamEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::SessionAck { .. } => "session_ack",
            Self::AudioDelta => "audio_delta",
            Self::SpeechStarted => "speech_started",
            Self::SpeechStopped => "speech_stopped",
            Self::ResponseDone { .. } => "response_done",
            Self::ToolCall(_) => "tool_call",
            Self::Ping { .. } => "ping",
            Self::Error { .. } => "error",
            Self::Other { kind } => kind,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no string `{0}` field")]
    MissingType(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    ElevenLabs,
}

impl Dialect {
    /// The frame that must be sent before any other outbound frame.
    pub fn session_frame(self, config: &SessionConfig) -> serde_json::Result<String> {
        let frame = match self {
            Self::OpenAi => openai::session_update(config),
            Self::ElevenLabs => elevenlabs::initiation_data(config),
        };
        serde_json::to_string(&frame)
    }

    pub fn decode(self, raw: &str) -> Result<UpstreamEvent, DecodeError> {
        match self {
            Self::OpenAi => openai::decode(raw),
            Self::ElevenLabs => elevenlabs::decode(raw),
        }
    }

    /// Whether `event` completes the configuring phase.
    ///
    /// OpenAI has no dedicated acknowledgment for `session.update` that is
    /// guaranteed to arrive first, so any inbound frame counts.
    pub fn acknowledges(self, event: &UpstreamEvent) -> bool {
        match self {
            Self::OpenAi => true,
            Self::ElevenLabs => matches!(event, UpstreamEvent::SessionAck { .. }),
        }
    }

    /// Frames that deliver a tool result back into the conversation.
    pub fn tool_result_frames(self, outcome: &ToolOutcome) -> serde_json::Result<Vec<String>> {
        let frames = match self {
            Self::OpenAi => openai::tool_result(outcome),
            Self::ElevenLabs => elevenlabs::tool_result(outcome),
        };
        frames.iter().map(serde_json::to_string).collect()
    }

    /// The reply to an engine keep-alive, for dialects that expect one.
    pub fn pong_frame(self, event_id: Option<u64>) -> Option<String> {
        match self {
            Self::OpenAi => None,
            Self::ElevenLabs => Some(elevenlabs::pong(event_id).to_string()),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => f.write_str("openai"),
            Self::ElevenLabs => f.write_str("elevenlabs"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(format!("unknown realtime provider '{}'", other)),
        }
    }
}

/// Parses `raw` and pulls out its discriminator field.
fn split_frame(raw: &str, field: &'static str) -> Result<(String, Value), DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let kind = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType(field))?
        .to_string();
    Ok((kind, value))
}

/// Deserializes the typed body of a frame, falling back to `Other` when the
/// engine sent a shape this crate does not model.
fn typed<T, F>(kind: &str, value: Value, map: F) -> UpstreamEvent
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> UpstreamEvent,
{
    match serde_json::from_value::<T>(value) {
        Ok(body) => map(body),
        Err(e) => {
            tracing::debug!(kind, error = %e, "Upstream frame did not match its expected shape");
            UpstreamEvent::Other {
                kind: kind.to_string(),
            }
        }
    }
}
