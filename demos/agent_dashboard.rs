// demos/agent_dashboard.rs
//
// Keeps a live view of agent and task activity until Ctrl+C.
//
//   REALTIME_API_BASE_URL=https://orchestrator.example.com/api \
//   REALTIME_TOKEN=... cargo run --example agent_dashboard
use orchestrator_realtime::{
    config::ClientConfig,
    types::{message_types, ConnectionState},
    websocket::RealtimeClient,
};
use serde::Deserialize;
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct AgentStatus {
    agent_id: String,
    status: String,
}

/// Sets up logging with a custom format
fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();
    dotenv::dotenv().ok();

    let config = ClientConfig::from_env();
    let token = env::var("REALTIME_TOKEN").ok();
    let client = RealtimeClient::new(config);

    client.on_state_change(|state| match state {
        ConnectionState::Connected => info!("Connection is live"),
        ConnectionState::Reconnecting => warn!("Connection lost, reconnecting..."),
        other => info!("Connection state: {}", other),
    });

    client.on(message_types::AGENT_STATUS, |_, envelope| {
        match envelope.payload_as::<AgentStatus>() {
            Ok(update) => info!("Agent {} is now {}", update.agent_id, update.status),
            Err(e) => warn!("Unexpected agent status payload: {}", e),
        }
    });
    client.on(message_types::TASK_UPDATE, |payload, _| {
        info!("Task update: {}", payload);
    });
    client.on(message_types::ALERT_NEW, |payload, envelope| {
        warn!("Alert on {:?}: {}", envelope.channel, payload);
    });
    client.on(message_types::ERROR, |payload, _| {
        error!("Server reported an error: {}", payload);
    });

    client.subscribe("agents");
    client.subscribe("tasks");
    client.subscribe("alerts");

    // A failed first attempt keeps retrying in the background.
    if let Err(e) = client.connect(token.as_deref()).await {
        error!("Initial connection failed: {}", e);
    }

    info!("Listening. Press Ctrl+C to exit.");
    tokio::signal::ctrl_c().await?;

    client.disconnect();
    info!("Done.");
    Ok(())
}
