// demos/echo_roundtrip.rs
//
// Queues a few messages before connecting, then sends one envelope per
// second for 30 seconds and prints whatever comes back.
use orchestrator_realtime::{
    config::ClientConfig, types::Envelope, websocket::RealtimeClient,
};
use serde_json::json;
use std::env;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    dotenv::dotenv().ok();

    let config = ClientConfig::from_env().with_debug(true);
    let token = env::var("REALTIME_TOKEN").ok();
    let client = RealtimeClient::new(config);

    client.on_any(|envelope| {
        info!("<- {} {}", envelope.kind, envelope.payload);
    });

    // Sent in order once the socket opens.
    for n in 1..=3 {
        let envelope = Envelope::new("message:new", json!({"text": format!("queued #{}", n)}));
        client.send(&envelope)?;
    }
    info!("{} messages queued before connecting", client.queued_messages());

    client.connect(token.as_deref()).await?;

    for n in 1..=30 {
        let envelope = Envelope::new("message:new", json!({"text": format!("live #{}", n)}))
            .with_channel("echo");
        if let Err(e) = client.send(&envelope) {
            error!("Failed to send message: {}", e);
        }
        sleep(Duration::from_secs(1)).await;
    }

    client.disconnect();
    info!("Disconnected ({:?}).", client.disconnect_reason());
    Ok(())
}
