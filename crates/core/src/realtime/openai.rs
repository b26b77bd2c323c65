//! OpenAI Realtime API dialect (`OpenAI-Beta: realtime=v1`).

use super::{DecodeError, UpstreamEvent, split_frame, typed};
use crate::session_config::SessionConfig;
use crate::tools::{ClientTool, ToolInvocation, ToolOutcome};
use serde::Deserialize;
use serde_json::{Value, json};

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Builds the `session.update` frame.
///
/// The engine has no notion of dynamic variables, so they are appended to the
/// instructions as a `Session context` block the model can read.
pub fn session_update(config: &SessionConfig) -> Value {
    let mut instructions = config.instructions().to_string();
    if !config.dynamic_variables().is_empty() {
        instructions.push_str("\n\nSession context:");
        for (key, value) in config.dynamic_variables() {
            instructions.push_str(&format!("\n- {}: {}", key, value));
        }
    }

    let turn = config.turn_detection();
    let mut session = json!({
        "modalities": ["text", "audio"],
        "instructions": instructions,
        "voice": config.voice(),
        "input_audio_format": config.audio_format(),
        "output_audio_format": config.audio_format(),
        "input_audio_transcription": { "model": TRANSCRIPTION_MODEL },
        "turn_detection": {
            "type": "server_vad",
            "threshold": turn.threshold,
            "prefix_padding_ms": turn.prefix_padding_ms,
            "silence_duration_ms": turn.silence_duration_ms,
        },
        "temperature": config.temperature(),
        "max_response_output_tokens": "inf",
    });

    if config.client_tools() {
        let tools: Vec<Value> = ClientTool::ALL
            .into_iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters(),
                })
            })
            .collect();
        session["tools"] = Value::Array(tools);
        session["tool_choice"] = json!("auto");
    }

    json!({ "type": "session.update", "session": session })
}

#[derive(Deserialize)]
struct SessionEvent {
    session: SessionBody,
}

#[derive(Deserialize)]
struct SessionBody {
    id: Option<String>,
}

#[derive(Deserialize)]
struct ResponseDoneEvent {
    response: ResponseBody,
}

#[derive(Deserialize)]
struct ResponseBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    transcript: Option<String>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct FunctionCallDoneEvent {
    call_id: String,
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub fn decode(raw: &str) -> Result<UpstreamEvent, DecodeError> {
    let (kind, value) = split_frame(raw, "type")?;
    let event = match kind.as_str() {
        "session.created" | "session.updated" => {
            typed(&kind, value, |e: SessionEvent| UpstreamEvent::SessionAck {
                session_id: e.session.id,
            })
        }
        "response.audio.delta" => UpstreamEvent::AudioDelta,
        "input_audio_buffer.speech_started" => UpstreamEvent::SpeechStarted,
        "input_audio_buffer.speech_stopped" => UpstreamEvent::SpeechStopped,
        "response.done" => typed(&kind, value, |e: ResponseDoneEvent| {
            let transcript: Vec<String> = e
                .response
                .output
                .into_iter()
                .flat_map(|item| item.content)
                .filter_map(|part| part.transcript.or(part.text))
                .collect();
            UpstreamEvent::ResponseDone {
                transcript: (!transcript.is_empty()).then(|| transcript.join(" ")),
            }
        }),
        "response.function_call_arguments.done" => {
            typed(&kind, value, |e: FunctionCallDoneEvent| {
                // Arguments arrive as a JSON-encoded string.
                let arguments =
                    serde_json::from_str(&e.arguments).unwrap_or(Value::String(e.arguments));
                UpstreamEvent::ToolCall(ToolInvocation {
                    call_id: e.call_id,
                    name: e.name,
                    arguments,
                })
            })
        }
        "error" => typed(&kind, value, |e: ErrorEvent| UpstreamEvent::Error {
            message: e.error.message,
        }),
        _ => UpstreamEvent::Other { kind },
    };
    Ok(event)
}

/// A function call output item followed by `response.create`, so the model
/// continues speaking with the result in context.
pub fn tool_result(outcome: &ToolOutcome) -> Vec<Value> {
    vec![
        json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": outcome.call_id,
                "output": outcome.output,
            }
        }),
        json!({ "type": "response.create" }),
    ]
}
