//! ElevenLabs Conversational AI dialect.
//!
//! Tools are registered on the agent itself, so the initiation frame only
//! carries dynamic variables and per-session overrides.

use super::{DecodeError, UpstreamEvent, split_frame, typed};
use crate::session_config::SessionConfig;
use crate::tools::{ToolInvocation, ToolOutcome};
use serde::Deserialize;
use serde_json::{Value, json};

pub fn initiation_data(config: &SessionConfig) -> Value {
    let mut override_config = json!({
        "agent": {
            "prompt": { "prompt": config.instructions() },
            "first_message": config.first_message(),
        }
    });
    if let Some(voice_id) = config.voice_id() {
        override_config["tts"] = json!({ "voice_id": voice_id });
    }

    json!({
        "type": "conversation_initiation_client_data",
        "conversation_config_override": override_config,
        "dynamic_variables": config.dynamic_variables(),
    })
}

#[derive(Deserialize)]
struct InitiationMetadataEvent {
    conversation_initiation_metadata_event: InitiationMetadata,
}

#[derive(Deserialize)]
struct InitiationMetadata {
    conversation_id: Option<String>,
}

#[derive(Deserialize)]
struct AgentResponseEvent {
    agent_response_event: AgentResponse,
}

#[derive(Deserialize)]
struct AgentResponse {
    agent_response: String,
}

#[derive(Deserialize)]
struct ClientToolCallEvent {
    client_tool_call: ClientToolCall,
}

#[derive(Deserialize)]
struct ClientToolCall {
    tool_name: String,
    tool_call_id: String,
    #[serde(default)]
    parameters: Value,
}

#[derive(Deserialize)]
struct PingEvent {
    ping_event: PingBody,
}

#[derive(Deserialize)]
struct PingBody {
    event_id: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    message: String,
}

pub fn decode(raw: &str) -> Result<UpstreamEvent, DecodeError> {
    let (kind, value) = split_frame(raw, "type")?;
    let event = match kind.as_str() {
        "conversation_initiation_metadata" => {
            typed(&kind, value, |e: InitiationMetadataEvent| {
                UpstreamEvent::SessionAck {
                    session_id: e.conversation_initiation_metadata_event.conversation_id,
                }
            })
        }
        "audio" => UpstreamEvent::AudioDelta,
        // The user barged in while the agent was speaking.
        "interruption" => UpstreamEvent::SpeechStarted,
        "agent_response" => typed(&kind, value, |e: AgentResponseEvent| {
            UpstreamEvent::ResponseDone {
                transcript: Some(e.agent_response_event.agent_response),
            }
        }),
        "client_tool_call" => typed(&kind, value, |e: ClientToolCallEvent| {
            UpstreamEvent::ToolCall(ToolInvocation {
                call_id: e.client_tool_call.tool_call_id,
                name: e.client_tool_call.tool_name,
                arguments: e.client_tool_call.parameters,
            })
        }),
        "ping" => typed(&kind, value, |e: PingEvent| UpstreamEvent::Ping {
            event_id: e.ping_event.event_id,
        }),
        "error" => typed(&kind, value, |e: ErrorEvent| UpstreamEvent::Error {
            message: e.message,
        }),
        _ => UpstreamEvent::Other { kind },
    };
    Ok(event)
}

pub fn tool_result(outcome: &ToolOutcome) -> Vec<Value> {
    vec![json!({
        "type": "client_tool_result",
        "tool_call_id": outcome.call_id,
        "result": outcome.output,
        "is_error": outcome.is_error,
    })]
}

pub fn pong(event_id: Option<u64>) -> Value {
    json!({ "type": "pong", "event_id": event_id })
}
