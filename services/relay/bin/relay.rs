//! Main Entrypoint for the Sales Agent Relay
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the persona prompt and the fallback recommendations.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use sales_agent_core::{Recommendations, session_config::DEFAULT_PERSONA};
use sales_agent_relay::{config::Config, router::create_router, state::AppState};
use std::{collections::HashMap, fs, net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Persona prompt file, without its `.md` extension.
const PERSONA_PROMPT: &str = "sales_agent";

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

fn load_persona(prompts_path: &Path) -> String {
    match load_prompts(prompts_path) {
        Ok(mut prompts) => match prompts.remove(PERSONA_PROMPT) {
            Some(persona) => {
                info!(path = %prompts_path.display(), "Loaded persona prompt.");
                persona
            }
            None => {
                warn!("{PERSONA_PROMPT}.md not found in prompts directory; using built-in persona.");
                DEFAULT_PERSONA.to_string()
            }
        },
        Err(e) => {
            warn!(error = %e, path = %prompts_path.display(), "Could not read prompts; using built-in persona.");
            DEFAULT_PERSONA.to_string()
        }
    }
}

fn load_fallback_recommendations(path: Option<&Path>) -> anyhow::Result<Recommendations> {
    let Some(path) = path else {
        return Ok(Recommendations::demo_fallback());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let recommendations = Recommendations::from_json(&raw)
        .with_context(|| format!("Invalid recommendations in {}", path.display()))?;
    info!(count = recommendations.len(), "Loaded fallback recommendations.");
    Ok(recommendations)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Persona and Fallbacks ---
    let persona = load_persona(&config.prompts_path);
    let fallback = load_fallback_recommendations(config.fallback_recommendations_path.as_deref())?;

    let provider = config.upstream.dialect;
    let policy = config.completion_policy;
    let bind_address = config.bind_address;
    let app_state = Arc::new(AppState::new(config, persona, fallback));

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        %provider,
        completion_policy = ?policy,
        %bind_address,
        "Relay configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
