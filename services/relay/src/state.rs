//! Shared Application State
//!
//! Everything in here is built once at startup and only read afterwards;
//! sessions share no mutable state.

use crate::config::Config;
use sales_agent_core::{
    ConfigurationError, Recommendations, SessionConfig, SessionConfigBuilder, SessionOptions,
    completion::CompletionPolicy,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Persona instructions, still containing their `{{key}}` placeholders.
    pub persona: Arc<String>,
    pub fallback_recommendations: Arc<Recommendations>,
    pub completion_policy: Arc<dyn CompletionPolicy>,
}

impl AppState {
    pub fn new(config: Config, persona: String, fallback_recommendations: Recommendations) -> Self {
        let completion_policy = config
            .completion_policy
            .into_policy(&config.completion_cue);
        Self {
            config: Arc::new(config),
            persona: Arc::new(persona),
            fallback_recommendations: Arc::new(fallback_recommendations),
            completion_policy,
        }
    }

    /// Builds the session configuration for one connection from the
    /// per-session dynamic variables.
    pub fn session_config(
        &self,
        dynamic_variables: BTreeMap<String, String>,
    ) -> Result<SessionConfig, ConfigurationError> {
        let options = SessionOptions {
            persona_instructions: Some(self.persona.to_string()),
            dynamic_variables,
            client_tools: Some(self.config.client_tools_enabled),
            ..Default::default()
        };
        SessionConfigBuilder::new(options)
            .require_all(self.config.required_dynamic_variables.iter().cloned())
            .build()
    }
}
