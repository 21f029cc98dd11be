//! Wordsmith · Submission & Progress Engine
//!
//! - Axum HTTP API over the submission/scoring engine
//! - Optional OpenAI grading (via environment variables)
//! - Durable progress snapshot (JSON on disk)
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   OPENAI_API_KEY        : enables remote grading if present
//!   OPENAI_BASE_URL       : default "https://api.openai.com/v1"
//!   OPENAI_MODEL          : default "gpt-4o"
//!   SUBMISSIONS_API_URL   : base URL of the remote submissions table
//!   SUBMISSIONS_API_KEY   : key/bearer for the submissions table
//!   WORDSMITH_CONFIG_PATH : path to TOML config (exercise bank + prompts)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod ledger;
mod grader;
mod gateway;
mod coordinator;
mod feed;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    // Build the engine once: config, ledger, gateway, grader, coordinator, feed.
    let config = config::load_config_from_env();
    let state = Arc::new(AppState::new(config));

    // Warm the feed cache in the background; the single-flight guard makes
    // this safe against an immediate UI-triggered refresh.
    {
        let feed = state.feed.clone();
        tokio::spawn(async move { feed.refresh().await });
    }

    let app = build_router(state);

    let addr: SocketAddr = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

    let listener = TcpListener::bind(addr).await?;
    info!(target: "wordsmith_backend", %addr, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
