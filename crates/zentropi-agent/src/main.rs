//! Zentropi Agent Binary
//!
//! Runs one agent configured from `ZENTROPI_*` environment variables. It
//! joins the configured spaces and answers pings until interrupted.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, info};
use zentropi_agent::{AgentBuilder, AgentConfig, Config, Field, Handler, Kind, CATCH_ALL};

const ENV_PREFIX: &str = "ZENTROPI_";

fn settings() -> zentropi_agent::Result<Config> {
    let mut config = Config::strict()
        .with_field(Field::new("name", "zentropi-agent").with_description("Agent name"))?
        .with_field(
            Field::new("endpoint", Value::Null)
                .required()
                .with_description("Endpoint URL"),
        )?
        .with_field(Field::new("spaces", "").with_description("Comma-separated spaces to join"))?
        .with_field(Field::new("auth", Value::Null).with_description("Relay token"))?
        .with_field(
            Field::new("bind", false).with_description("Create the endpoint instead of connecting"),
        )?;
    config.load_env(ENV_PREFIX)?;
    config.check_required()?;
    config.freeze();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = settings().context("Invalid ZENTROPI_* settings")?;
    let name = settings.get_str("name").unwrap_or("zentropi-agent");
    let endpoint = settings
        .get_str("endpoint")
        .context("ZENTROPI_ENDPOINT must be a string")?;

    info!("Starting Zentropi agent {}", name);

    let agent = AgentBuilder::from_config(AgentConfig::new(name))
        .handler(Handler::sync(Kind::Request, "ping", |_, _| Ok("pong")))
        .handler(Handler::on_message("ping", |_, _| Ok("pong")).ignore_case())
        .handler(Handler::on_message(CATCH_ALL, |agent, frame| {
            debug!("{} heard {}", agent.name(), frame);
            Ok(())
        }))
        .build()?;

    if settings.get_bool("bind") == Some(true) {
        agent.bind(endpoint, None).await?;
    } else {
        agent
            .connect(endpoint, settings.get_str("auth"), None)
            .await
            .with_context(|| format!("Failed to connect to {}", endpoint))?;
    }

    let spaces = settings.get_str("spaces").unwrap_or_default();
    for space in spaces.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        agent.join(space, None).await?;
        info!("Joined {}", space);
    }

    let stopper = agent.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            if let Err(e) = stopper.stop() {
                error!("Stop failed: {}", e);
            }
        }
    });

    if let Err(e) = agent.run().await {
        error!("Agent error: {}", e);
        std::process::exit(1);
    }

    info!("Agent shutting down");
    Ok(())
}
