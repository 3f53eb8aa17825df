//! Live Channel Tests
//!
//! Updates go over a registered worker session when it acknowledges in time
//! and fall back to the config file otherwise.

mod common;

use common::{eventually, form, harness, slot};
use futures::{SinkExt, StreamExt};
use galaxy_common::{AckStatus, DaemonMessage, UpdateMethod};
use galaxyd::server;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_acknowledged_update_uses_channel() {
    let h = harness();
    let h = &h;
    let channel = Arc::clone(h.daemon.channel());
    let (session, mut outbound) = channel.open_session();
    assert_eq!(
        channel.handle_text(session, r#"{"type":"register","slot":2}"#),
        Some(DaemonMessage::Registered { slot: slot(2) })
    );

    // Worker side: acknowledge the first push with the token it carries
    let worker = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            let Some(DaemonMessage::ConfigUpdate { token, slot, config }) = outbound.recv().await else {
                panic!("expected a config_update");
            };
            assert_eq!(slot.id(), 2);
            assert_eq!(config.planet_name, "Nebula");
            let ack = json!({"type": "config_ack", "token": token, "result": {"applied": true}});
            assert_eq!(channel.handle_text(session, &ack.to_string()), None);
        })
    };

    let mut update = form(2);
    update.insert("PlanetName2".to_string(), json!("Nebula"));
    let ack = h.daemon.update(slot(2), &update).await.unwrap();
    worker.await.unwrap();

    assert_eq!(ack.status, AckStatus::Updated);
    assert_eq!(ack.method, Some(UpdateMethod::Channel));
    assert_eq!(ack.result, Some(json!({"applied": true})));
    assert_eq!(channel.pending_count(), 0);

    // The file is still written, without a reload signal
    assert!(eventually(|| async move { h.persisted(2).is_some() }).await);
    assert_eq!(h.persisted(2).unwrap()["planetName"], "Nebula");
    assert_eq!(h.fake.call_count("signal"), 0);
}

#[tokio::test]
async fn test_unacknowledged_update_falls_back_to_file() {
    let h = harness();
    let h = &h;
    let channel = Arc::clone(h.daemon.channel());
    let (session, _outbound) = channel.open_session();
    channel.handle_text(session, r#"{"type":"register","slot":2}"#);

    let mut update = form(2);
    update.insert("stopAttackTime2".to_string(), json!(9999));
    let ack = h.daemon.update(slot(2), &update).await.unwrap();

    assert_eq!(ack.method, Some(UpdateMethod::File));
    assert!(ack.result.is_none());

    assert!(
        eventually(|| async move {
            h.persisted(2)
                .is_some_and(|v| v["stopAttackTime"] == 9999)
        })
        .await,
        "config2.json should carry the new timing"
    );
    let signal = format!("signal SIGUSR2 {}", h.process_name(2));
    let signal = signal.as_str();
    assert!(eventually(|| async move { h.fake.call_count(signal) == 1 }).await);
}

#[tokio::test]
async fn test_update_without_session_writes_file() {
    let h = harness();
    let h = &h;

    let ack = h.daemon.update(slot(5), &form(5)).await.unwrap();
    assert_eq!(ack.method, Some(UpdateMethod::File));

    assert!(eventually(|| async move { h.persisted(5).is_some() }).await);
    let persisted = h.persisted(5).unwrap();
    assert_eq!(persisted["RC1"], "code-one");
    assert!(persisted.get("RC2startAttackTime").is_none());
    assert!(persisted["lastUpdated"].as_i64().unwrap() > 0);

    // The validated config is retained for diagnostics
    let record = h.daemon.table().get(slot(5)).await;
    assert_eq!(record.config.unwrap().planet_name, "Andromeda");
}

#[tokio::test]
async fn test_dual_rc_update_persists_all_timing_fields() {
    let h = harness();
    let h = &h;
    let mut update = form(3);
    update.insert("dualRCToggle3".to_string(), json!("TRUE"));
    for (i, field) in galaxy_common::TimingBlock::FIELDS.iter().enumerate() {
        update.insert(format!("RC2{field}3"), json!(100 + i));
    }

    h.daemon.update(slot(3), &update).await.unwrap();

    assert!(eventually(|| async move { h.persisted(3).is_some() }).await);
    let persisted = h.persisted(3).unwrap();
    for field in galaxy_common::TimingBlock::FIELDS {
        assert!(persisted.get(field).is_some(), "missing {field}");
        assert!(persisted.get(format!("RC2{field}")).is_some(), "missing RC2{field}");
    }
    assert!(persisted.get("RC1").is_some());
    assert!(persisted.get("RC2").is_some());
}

#[tokio::test]
async fn test_dropped_session_stops_routing() {
    let h = harness();
    let h = &h;
    let channel = Arc::clone(h.daemon.channel());
    let (session, outbound) = channel.open_session();
    channel.handle_text(session, r#"{"type":"register","slot":1}"#);

    drop(outbound);
    channel.close_session(session);

    let ack = h.daemon.update(slot(1), &form(1)).await.unwrap();
    assert_eq!(ack.method, Some(UpdateMethod::File));
    assert!(!channel.is_registered(slot(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rapid_updates_leave_last_config_on_disk() {
    let h = harness();

    for attack in 1..=8 {
        let mut update = form(2);
        update.insert("stopAttackTime2".to_string(), json!(attack));
        h.daemon.update(slot(2), &update).await.unwrap();
    }
    assert!(h.daemon.pool().drain(Duration::from_secs(5)).await);

    let persisted = h.persisted(2).unwrap();
    assert_eq!(persisted["stopAttackTime"], 8);
}

#[tokio::test]
async fn test_socket_round_trip_delivers_update() {
    let h = harness();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(listener, Arc::clone(&h.daemon), async move {
        let _ = stop_rx.await;
    }));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    async fn next_json(
        socket: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("message in time")
                .expect("socket open")
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    socket
        .send(Message::Text(json!({"type": "register", "slot": 4}).to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await, json!({"type": "registered", "slot": 4}));

    let daemon = Arc::clone(&h.daemon);
    let update = tokio::spawn(async move { daemon.update(slot(4), &form(4)).await });

    let push = next_json(&mut socket).await;
    assert_eq!(push["type"], "config_update");
    assert_eq!(push["slot"], 4);
    assert_eq!(push["config"]["planetName"], "Andromeda");
    let ack = json!({"type": "config_ack", "token": push["token"], "result": {"reloaded": true}});
    socket.send(Message::Text(ack.to_string())).await.unwrap();

    let ack = update.await.unwrap().unwrap();
    assert_eq!(ack.method, Some(UpdateMethod::Channel));
    assert_eq!(ack.result, Some(json!({"reloaded": true})));

    // Shutdown closes the session from the daemon side
    stop_tx.send(()).unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(message)) = socket.next().await {
            if message.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    server.await.unwrap().unwrap();
    assert_eq!(h.daemon.channel().session_count(), 0);
}
