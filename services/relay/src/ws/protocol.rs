//! Frames the relay itself originates toward the client.
//!
//! Everything else the client receives is an upstream frame forwarded
//! verbatim, so this enum only covers the synthesized extras.

use sales_agent_core::{ConversationComplete, Recommendations, SignalKind, VehicleDescriptor};
use serde::Serialize;

/// Machine-readable reason carried by an `error` frame.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UpstreamConnectionFailed,
    UpstreamError,
    SessionTimeout,
}

/// Messages synthesized by the relay.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The conversation reached its terminal signal.
    #[serde(rename = "conversation.complete")]
    ConversationComplete {
        recommendations: Recommendations,
        signal: SignalKind,
    },
    /// Reports a fatal error; the socket is closed right after.
    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },
    #[serde(rename = "ui.show_vehicle")]
    ShowVehicle { vehicle: VehicleDescriptor },
    #[serde(rename = "ui.dismiss_vehicle")]
    DismissVehicle,
    #[serde(rename = "ui.redirect")]
    Redirect { target: String },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

impl From<ConversationComplete> for ServerMessage {
    fn from(complete: ConversationComplete) -> Self {
        Self::ConversationComplete {
            recommendations: complete.recommendations,
            signal: complete.signal,
        }
    }
}
