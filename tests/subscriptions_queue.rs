mod common;

use common::{mock_client, test_config};
use orchestrator_realtime::types::Envelope;
use serde_json::json;
use tokio_test::assert_ok;

#[tokio::test(start_paused = true)]
async fn test_repeated_subscribe_sends_one_frame() {
    let (client, transport) = mock_client(test_config());
    assert_ok!(client.connect(None).await);

    client.subscribe("agents");
    client.subscribe("agents");
    client.subscribe("agents");

    assert_eq!(client.subscriptions(), vec!["agents"]);
    let socket = transport.last_socket().unwrap();
    assert_eq!(
        socket.sent_of_type("subscribe"),
        vec![json!({"type": "subscribe", "channel": "agents"})]
    );
}

#[tokio::test(start_paused = true)]
async fn test_offline_subscriptions_announced_once_on_connect() {
    let (client, transport) = mock_client(test_config());
    client.subscribe("agents");
    client.subscribe("tasks");
    client.subscribe("agents");

    assert!(transport.last_socket().is_none());
    assert_ok!(client.connect(None).await);

    let mut channels: Vec<String> = transport
        .last_socket()
        .unwrap()
        .sent_of_type("subscribe")
        .into_iter()
        .map(|v| v["channel"].as_str().unwrap().to_string())
        .collect();
    channels.sort();
    assert_eq!(channels, vec!["agents", "tasks"]);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_handle_is_idempotent() {
    let (client, transport) = mock_client(test_config());
    assert_ok!(client.connect(None).await);

    let handle = client.subscribe("pipelines");
    handle.unregister();
    handle.unregister();
    client.unsubscribe("pipelines");

    assert!(client.subscriptions().is_empty());
    let socket = transport.last_socket().unwrap();
    assert_eq!(
        socket.sent_of_type("unsubscribe"),
        vec![json!({"type": "unsubscribe", "channel": "pipelines"})]
    );
}

#[tokio::test(start_paused = true)]
async fn test_offline_unsubscribe_sends_nothing() {
    let (client, transport) = mock_client(test_config());
    client.subscribe("alerts");
    client.unsubscribe("alerts");
    assert_ok!(client.connect(None).await);

    let socket = transport.last_socket().unwrap();
    assert!(socket.sent_json().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queue_flushed_in_order_after_resubscribe() {
    let (client, transport) = mock_client(test_config());
    client.subscribe("agents");
    for n in 1..=3 {
        assert_ok!(client.send(&json!({"type": "task:create", "n": n})));
    }
    assert_eq!(client.queued_messages(), 3);

    assert_ok!(client.connect(None).await);
    assert_ok!(client.send(&json!({"type": "task:create", "n": 4})));

    assert_eq!(client.queued_messages(), 0);
    let sent = transport.last_socket().unwrap().sent_json();
    assert_eq!(
        sent,
        vec![
            json!({"type": "subscribe", "channel": "agents"}),
            json!({"type": "task:create", "n": 1}),
            json!({"type": "task:create", "n": 2}),
            json!({"type": "task:create", "n": 3}),
            json!({"type": "task:create", "n": 4}),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_queue_not_replayed_on_later_reconnects() {
    let (client, transport) = mock_client(test_config());
    assert_ok!(client.send(&json!({"type": "once"})));
    assert_ok!(client.connect(None).await);

    transport.last_socket().unwrap().close(1006, "abnormal");
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

    assert_eq!(transport.socket_count(), 2);
    assert_eq!(transport.socket(0).unwrap().sent_of_type("once").len(), 1);
    assert!(transport.socket(1).unwrap().sent_of_type("once").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_while_transport_dead_is_queued() {
    let (client, transport) = mock_client(test_config());
    assert_ok!(client.connect(None).await);
    let socket = transport.last_socket().unwrap();
    socket.set_transport_open(false);

    assert_ok!(client.send(&json!({"type": "late"})));
    assert_eq!(client.queued_messages(), 1);
    assert!(socket.sent_of_type("late").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queue_cap_drops_oldest() {
    let (client, transport) = mock_client(test_config().with_max_queued_messages(2));
    for n in 1..=4 {
        assert_ok!(client.send(&json!({"type": "m", "n": n})));
    }
    assert_eq!(client.queued_messages(), 2);
    assert_ok!(client.connect(None).await);

    let ns: Vec<i64> = transport
        .last_socket()
        .unwrap()
        .sent_of_type("m")
        .iter()
        .map(|v| v["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, vec![3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_send_envelope_serializes_wire_shape() {
    let (client, transport) = mock_client(test_config());
    assert_ok!(client.connect(None).await);

    let envelope = Envelope::new("message:new", json!({"text": "hi"})).with_channel("chat");
    assert_ok!(client.send(&envelope));

    let sent = transport.last_socket().unwrap().sent_of_type("message:new");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["channel"], "chat");
    assert_eq!(sent[0]["payload"]["text"], "hi");
    assert!(sent[0]["id"].is_string());
}
