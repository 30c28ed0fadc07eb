// tests/common.rs
use orchestrator_realtime::config::{ClientConfig, ReconnectConfig};
use orchestrator_realtime::types::ConnectionState;
use orchestrator_realtime::websocket::{MockTransport, RealtimeClient};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

// Loads .env (if any) and installs a test logger, once per test binary.
pub fn setup() {
    INIT.call_once(|| {
        dotenv::dotenv().ok();
        env_logger::builder().is_test(true).try_init().ok();
    });
}

pub const TEST_URL: &str = "ws://orchestrator.test/ws";

pub fn test_config() -> ClientConfig {
    ClientConfig::default().with_url(TEST_URL)
}

#[allow(dead_code)]
pub fn fast_retry_config(max_attempts: u32) -> ClientConfig {
    test_config().with_reconnect(ReconnectConfig {
        max_attempts,
        initial_delay_ms: 100,
        max_delay_ms: 1_000,
    })
}

pub fn mock_client(config: ClientConfig) -> (RealtimeClient, MockTransport) {
    setup();
    let transport = MockTransport::new();
    let client = RealtimeClient::with_transport(config, Arc::new(transport.clone()));
    (client, transport)
}

/// Records every state the client reports, starting with the current one.
pub fn record_states(client: &RealtimeClient) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    client.on_state_change(move |state| sink.lock().unwrap().push(state));
    states
}

/// Lets spawned tasks run without crossing any timer the tests care about.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
