//! Completion Detector
//!
//! Watches the upstream event stream for a terminal signal and turns the first
//! one into a single `ConversationComplete`. What counts as terminal is a
//! pluggable `CompletionPolicy`: the engine gives no guaranteed "done" signal,
//! so a session may end without ever completing, or complete early.

use crate::realtime::UpstreamEvent;
use crate::tools::{ClientTool, PresentRecommendationsArgs};
use crate::vehicle::Recommendations;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Phrase the default persona is told to say once it has enough information.
pub const DEFAULT_CUE_PHRASE: &str = "I have some excellent recommendations for you";

/// Which kind of terminal signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ToolCall,
    CuePhrase,
    ResponseDone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalSignal {
    pub kind: SignalKind,
    /// Recommendations carried by the signal itself, if any.
    pub recommendations: Option<Recommendations>,
}

impl TerminalSignal {
    fn bare(kind: SignalKind) -> Self {
        Self {
            kind,
            recommendations: None,
        }
    }
}

/// Classifies a single event. Implementations hold no per-session state.
pub trait CompletionPolicy: Send + Sync + fmt::Debug {
    fn classify(&self, event: &UpstreamEvent) -> Option<TerminalSignal>;
}

/// Fires on the distinguished `present_recommendations` tool invocation.
#[derive(Debug, Default)]
pub struct ToolCallPolicy;

impl CompletionPolicy for ToolCallPolicy {
    fn classify(&self, event: &UpstreamEvent) -> Option<TerminalSignal> {
        let UpstreamEvent::ToolCall(call) = event else {
            return None;
        };
        if call.name != ClientTool::PresentRecommendations.name() {
            return None;
        }
        let recommendations =
            serde_json::from_value::<PresentRecommendationsArgs>(call.arguments.clone())
                .ok()
                .map(|args| args.recommendations)
                .filter(|recs| !recs.is_empty());
        Some(TerminalSignal {
            kind: SignalKind::ToolCall,
            recommendations,
        })
    }
}

/// Fires on a finished response whose transcript contains the cue phrase.
#[derive(Debug)]
pub struct CuePhrasePolicy {
    cue: String,
}

impl CuePhrasePolicy {
    pub fn new(cue: &str) -> Self {
        Self {
            cue: cue.to_lowercase(),
        }
    }
}

impl CompletionPolicy for CuePhrasePolicy {
    fn classify(&self, event: &UpstreamEvent) -> Option<TerminalSignal> {
        match event {
            UpstreamEvent::ResponseDone {
                transcript: Some(text),
            } if text.to_lowercase().contains(&self.cue) => {
                Some(TerminalSignal::bare(SignalKind::CuePhrase))
            }
            _ => None,
        }
    }
}

/// Fires on the first finished response, whatever it said.
#[derive(Debug, Default)]
pub struct ResponseDonePolicy;

impl CompletionPolicy for ResponseDonePolicy {
    fn classify(&self, event: &UpstreamEvent) -> Option<TerminalSignal> {
        matches!(event, UpstreamEvent::ResponseDone { .. })
            .then(|| TerminalSignal::bare(SignalKind::ResponseDone))
    }
}

/// Fires when any of its policies does, checked in order.
#[derive(Debug)]
pub struct AnyOf(pub Vec<Box<dyn CompletionPolicy>>);

impl CompletionPolicy for AnyOf {
    fn classify(&self, event: &UpstreamEvent) -> Option<TerminalSignal> {
        self.0.iter().find_map(|policy| policy.classify(event))
    }
}

/// The policy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionStrategy {
    Tool,
    Cue,
    ResponseDone,
    /// Tool call or cue phrase.
    #[default]
    Any,
}

impl CompletionStrategy {
    pub fn into_policy(self, cue: &str) -> Arc<dyn CompletionPolicy> {
        match self {
            Self::Tool => Arc::new(ToolCallPolicy),
            Self::Cue => Arc::new(CuePhrasePolicy::new(cue)),
            Self::ResponseDone => Arc::new(ResponseDonePolicy),
            Self::Any => Arc::new(AnyOf(vec![
                Box::new(ToolCallPolicy),
                Box::new(CuePhrasePolicy::new(cue)),
            ])),
        }
    }
}

impl FromStr for CompletionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tool" => Ok(Self::Tool),
            "cue" => Ok(Self::Cue),
            "response_done" => Ok(Self::ResponseDone),
            "any" => Ok(Self::Any),
            other => Err(format!("unknown completion policy '{}'", other)),
        }
    }
}

/// The synthesized application-level result of a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationComplete {
    pub recommendations: Recommendations,
    pub signal: SignalKind,
}

/// Per-session gate that lets the policy fire at most once.
pub struct CompletionDetector {
    policy: Arc<dyn CompletionPolicy>,
    fallback: Recommendations,
    fired: bool,
}

impl CompletionDetector {
    pub fn new(policy: Arc<dyn CompletionPolicy>, fallback: Recommendations) -> Self {
        Self {
            policy,
            fallback,
            fired: false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn inspect(&mut self, event: &UpstreamEvent) -> Option<ConversationComplete> {
        if self.fired {
            return None;
        }
        let signal = self.policy.classify(event)?;
        self.fired = true;
        info!(signal = ?signal.kind, "Conversation completion detected");
        Some(ConversationComplete {
            recommendations: signal
                .recommendations
                .unwrap_or_else(|| self.fallback.clone()),
            signal: signal.kind,
        })
    }
}
