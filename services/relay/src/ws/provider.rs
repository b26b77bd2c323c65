//! Per-provider upstream endpoints and handshake headers.

use super::upstream::{ConnectionError, build_request};
use crate::config::UpstreamSettings;
use sales_agent_core::Dialect;
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use url::Url;

pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const ELEVENLABS_CONVAI_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

/// Resolves the upstream URL: the configured override or the provider
/// default, with the provider's selector query parameter appended.
pub fn endpoint_url(settings: &UpstreamSettings) -> Result<Url, ConnectionError> {
    let base = settings
        .url
        .as_deref()
        .unwrap_or(match settings.dialect {
            Dialect::OpenAi => OPENAI_REALTIME_URL,
            Dialect::ElevenLabs => ELEVENLABS_CONVAI_URL,
        });
    let mut url =
        Url::parse(base).map_err(|e| ConnectionError::Request(format!("{base}: {e}")))?;

    match settings.dialect {
        Dialect::OpenAi => {
            url.query_pairs_mut()
                .append_pair("model", &settings.openai_model);
        }
        Dialect::ElevenLabs => {
            if let Some(agent_id) = &settings.elevenlabs_agent_id {
                url.query_pairs_mut().append_pair("agent_id", agent_id);
            }
        }
    }
    Ok(url)
}

fn headers(settings: &UpstreamSettings) -> Vec<(&'static str, String)> {
    let key = settings.api_key.expose_secret();
    match settings.dialect {
        Dialect::OpenAi => vec![
            ("Authorization", format!("Bearer {key}")),
            ("OpenAI-Beta", "realtime=v1".to_string()),
        ],
        Dialect::ElevenLabs => vec![("xi-api-key", key.to_string())],
    }
}

/// The authenticated handshake request for the configured provider.
pub fn upstream_request(settings: &UpstreamSettings) -> Result<Request, ConnectionError> {
    let url = endpoint_url(settings)?;
    build_request(url.as_str(), headers(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::time::Duration;

    fn settings(dialect: Dialect, url: Option<&str>) -> UpstreamSettings {
        UpstreamSettings {
            dialect,
            url: url.map(str::to_string),
            api_key: SecretString::from("sk-test".to_string()),
            openai_model: "gpt-4o-realtime-preview".to_string(),
            elevenlabs_agent_id: Some("agent_42".to_string()),
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_openai_endpoint_and_headers() {
        let request = upstream_request(&settings(Dialect::OpenAi, None)).unwrap();

        assert_eq!(
            request.uri().to_string(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["OpenAI-Beta"], "realtime=v1");
        assert!(request.headers().get("xi-api-key").is_none());
    }

    #[test]
    fn test_elevenlabs_endpoint_and_headers() {
        let request = upstream_request(&settings(Dialect::ElevenLabs, None)).unwrap();

        assert_eq!(
            request.uri().to_string(),
            "wss://api.elevenlabs.io/v1/convai/conversation?agent_id=agent_42"
        );
        assert_eq!(request.headers()["xi-api-key"], "sk-test");
        assert!(request.headers().get("Authorization").is_none());
    }

    #[test]
    fn test_override_url_keeps_existing_query() {
        let url = endpoint_url(&settings(
            Dialect::OpenAi,
            Some("ws://127.0.0.1:9000/mock?region=eu"),
        ))
        .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:9000/mock?region=eu&model=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_invalid_override_is_a_request_error() {
        let err = endpoint_url(&settings(Dialect::OpenAi, Some("not a url"))).unwrap_err();
        assert!(matches!(err, ConnectionError::Request(_)));
    }
}
