use anyhow::{Context, Result};
use message_enricher::{Config, LogFormat, SharedHealthState, init_logging, run_with_ctrl_c};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    init_logging(LogFormat::from_env());

    let config = Config::from_env().context("Failed to load configuration")?;
    let health_state = SharedHealthState::default();

    run_with_ctrl_c(config, health_state).await
}
