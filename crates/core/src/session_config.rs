//! Session Configuration Builder
//!
//! Turns caller-supplied options into the immutable `SessionConfig` that is
//! sent to the upstream engine as the very first frame of a session. The
//! provider-specific wire shape is produced by the `realtime` dialects.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_PREFIX_PADDING_MS: u32 = 300;
pub const DEFAULT_SILENCE_DURATION_MS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Persona used when no prompt file is configured.
pub const DEFAULT_PERSONA: &str = "You are a professional SIXT rental sales agent. Your role is to help customers find the perfect vehicle upgrade.

Guidelines:
- Be friendly, professional, and enthusiastic about SIXT's premium service
- Ask about their trip purpose (business, leisure, family)
- Inquire about passenger count and luggage needs
- Ask about preferred features (luxury, performance, fuel efficiency)
- Suggest 2-3 vehicles that match their criteria
- Emphasize SIXT's premium quality and service

When you have gathered enough information, say \"Based on what you've told me, I have some excellent recommendations for you\" and end the conversation.";

pub const DEFAULT_FIRST_MESSAGE: &str = "Hi, this is Rachel from Sixt. How can I help you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    #[default]
    #[serde(rename = "pcm16")]
    Pcm16,
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

/// Server-side voice activity detection parameters, every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnDetectionOptions {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TurnDetection {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            prefix_padding_ms: DEFAULT_PREFIX_PADDING_MS,
            silence_duration_ms: DEFAULT_SILENCE_DURATION_MS,
        }
    }
}

/// The recognised options for a session. Anything omitted falls back to the
/// documented defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionOptions {
    pub persona_instructions: Option<String>,
    pub voice: Option<Voice>,
    /// Provider voice identifier (ElevenLabs) overriding the agent's default voice.
    pub voice_id: Option<String>,
    pub audio_format: Option<AudioFormat>,
    pub turn_detection: Option<TurnDetectionOptions>,
    #[serde(default)]
    pub dynamic_variables: BTreeMap<String, String>,
    pub first_message: Option<String>,
    pub temperature: Option<f32>,
    /// Advertise the client tools to the engine.
    pub client_tools: Option<bool>,
}

/// Immutable configuration payload for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    instructions: String,
    voice: Voice,
    voice_id: Option<String>,
    audio_format: AudioFormat,
    turn_detection: TurnDetection,
    dynamic_variables: BTreeMap<String, String>,
    first_message: String,
    temperature: f32,
    client_tools: bool,
}

impl SessionConfig {
    /// Persona instructions with `{{key}}` placeholders already resolved.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn voice(&self) -> Voice {
        self.voice
    }

    pub fn voice_id(&self) -> Option<&str> {
        self.voice_id.as_deref()
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    pub fn turn_detection(&self) -> TurnDetection {
        self.turn_detection
    }

    pub fn dynamic_variables(&self) -> &BTreeMap<String, String> {
        &self.dynamic_variables
    }

    pub fn first_message(&self) -> &str {
        &self.first_message
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn client_tools(&self) -> bool {
        self.client_tools
    }
}

pub struct SessionConfigBuilder {
    options: SessionOptions,
    required: Vec<String>,
}

impl SessionConfigBuilder {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            required: Vec::new(),
        }
    }

    /// Declares a dynamic variable the flow cannot start without.
    pub fn require(mut self, key: impl Into<String>) -> Self {
        self.required.push(key.into());
        self
    }

    pub fn require_all<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<SessionConfig, ConfigurationError> {
        let SessionOptions {
            persona_instructions,
            voice,
            voice_id,
            audio_format,
            turn_detection,
            dynamic_variables,
            first_message,
            temperature,
            client_tools,
        } = self.options;

        for key in &self.required {
            let present = dynamic_variables
                .get(key)
                .is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(ConfigurationError::MissingDynamicVariable(key.clone()));
            }
        }

        let turn = turn_detection.unwrap_or_default();
        let threshold = turn.threshold.unwrap_or(DEFAULT_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigurationError::InvalidValue {
                field: "turn_detection.threshold".to_string(),
                reason: format!("{} is not within [0, 1]", threshold),
            });
        }

        let temperature = temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.6..=1.2).contains(&temperature) {
            return Err(ConfigurationError::InvalidValue {
                field: "temperature".to_string(),
                reason: format!("{} is not within [0.6, 1.2]", temperature),
            });
        }

        let persona = persona_instructions
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PERSONA.to_string());

        Ok(SessionConfig {
            instructions: interpolate(&persona, &dynamic_variables),
            voice: voice.unwrap_or_default(),
            voice_id: voice_id.filter(|v| !v.is_empty()),
            audio_format: audio_format.unwrap_or_default(),
            turn_detection: TurnDetection {
                threshold,
                prefix_padding_ms: turn.prefix_padding_ms.unwrap_or(DEFAULT_PREFIX_PADDING_MS),
                silence_duration_ms: turn
                    .silence_duration_ms
                    .unwrap_or(DEFAULT_SILENCE_DURATION_MS),
            },
            first_message: interpolate(
                first_message.as_deref().unwrap_or(DEFAULT_FIRST_MESSAGE),
                &dynamic_variables,
            ),
            dynamic_variables,
            temperature,
            client_tools: client_tools.unwrap_or(true),
        })
    }
}

/// Replaces `{{key}}` placeholders with the matching dynamic variable.
/// Unknown placeholders are left as written.
/// Substituted values are never scanned again.
fn interpolate(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        match vars.get(&after[..end]) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}
