use sales_agent_core::completion::{CompletionStrategy, DEFAULT_CUE_PHRASE};
use sales_agent_core::realtime::Dialect;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where and how to reach the upstream engine.
#[derive(Debug)]
pub struct UpstreamSettings {
    pub dialect: Dialect,
    /// Overrides the provider's default endpoint.
    pub url: Option<String>,
    pub api_key: SecretString,
    pub openai_model: String,
    pub elevenlabs_agent_id: Option<String>,
    pub connect_timeout: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub upstream: UpstreamSettings,
    pub prompts_path: PathBuf,
    pub required_dynamic_variables: Vec<String>,
    pub completion_policy: CompletionStrategy,
    pub completion_cue: String,
    pub fallback_recommendations_path: Option<PathBuf>,
    pub client_tools_enabled: bool,
    pub session_timeout: Duration,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs = parse_var::<u64>(name, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var::<SocketAddr>(
            "BIND_ADDRESS",
            SocketAddr::from(([0, 0, 0, 0], 3000)),
        )?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let dialect = parse_var::<Dialect>("REALTIME_PROVIDER", Dialect::OpenAi)?;

        let (api_key, elevenlabs_agent_id) = match dialect {
            Dialect::OpenAi => {
                let key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                    ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    )
                })?;
                (key, None)
            }
            Dialect::ElevenLabs => {
                let key = std::env::var("ELEVENLABS_API_KEY").map_err(|_| {
                    ConfigError::MissingVar(
                        "ELEVENLABS_API_KEY must be set for 'elevenlabs' provider".to_string(),
                    )
                })?;
                let agent_id = std::env::var("ELEVENLABS_AGENT_ID").map_err(|_| {
                    ConfigError::MissingVar(
                        "ELEVENLABS_AGENT_ID must be set for 'elevenlabs' provider".to_string(),
                    )
                })?;
                (key, Some(agent_id))
            }
        };

        let openai_model = std::env::var("OPENAI_REALTIME_MODEL")
            .unwrap_or_else(|_| sales_agent_core::realtime::openai::DEFAULT_MODEL.to_string());
        let url = std::env::var("UPSTREAM_URL").ok().filter(|u| !u.is_empty());

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let required_dynamic_variables = std::env::var("REQUIRED_DYNAMIC_VARIABLES")
            .unwrap_or_else(|_| "booking_id".to_string())
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        let completion_policy =
            parse_var::<CompletionStrategy>("COMPLETION_POLICY", CompletionStrategy::Any)?;
        let completion_cue = std::env::var("COMPLETION_CUE")
            .ok()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CUE_PHRASE.to_string());

        let fallback_recommendations_path = std::env::var("FALLBACK_RECOMMENDATIONS_PATH")
            .ok()
            .map(PathBuf::from);

        let client_tools_enabled = parse_var::<bool>("CLIENT_TOOLS_ENABLED", true)?;
        let connect_timeout = parse_secs("CONNECT_TIMEOUT_SECS", 10)?;
        let session_timeout = parse_secs("SESSION_TIMEOUT_SECS", 900)?;

        Ok(Self {
            bind_address,
            log_level,
            upstream: UpstreamSettings {
                dialect,
                url,
                api_key: SecretString::from(api_key),
                openai_model,
                elevenlabs_agent_id,
                connect_timeout,
            },
            prompts_path,
            required_dynamic_variables,
            completion_policy,
            completion_cue,
            fallback_recommendations_path,
            client_tools_enabled,
            session_timeout,
        })
    }
}
