//! Stress Tests for Deadlock Detection Under Load
//!
//! Drives the runtime with many concurrent sends, a flaky storage gateway,
//! a self-confirming chain and a noisy inbound peer, all through small
//! channel buffers, and checks that the read model still converges.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{local, peer, peer_str, Fixture};
use dechat_harness::{MockChain, MockChainConfig, MockPeer, MockPeerConfig, MockStorage};
use dechat_runtime::{Amount, DechatConfig, DeliveryState, MessageKind, Timestamp};
use tokio::time::timeout;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn create_stress_test_config() -> DechatConfig {
    let mut config = DechatConfig::testing();
    // Tiny buffers force backpressure between the services and the engine
    config.channels.event_buffer_size = 2;
    config.channels.notification_buffer_size = 1;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_load_converges() {
    init_test_logging();

    let chain = MockChain::new(MockChainConfig {
        revert_rate: 0.25,
        block_time_range: (1, 10),
        ..MockChainConfig::auto_confirming()
    });
    let fixture = Arc::new(
        Fixture::with(create_stress_test_config(), MockStorage::flaky(), chain).await,
    );
    fixture.runtime.connect().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..60u64 {
        let fixture = Arc::clone(&fixture);
        handles.push(tokio::spawn(async move {
            let runtime = &fixture.runtime;
            let recipient = peer_str();
            match i % 3 {
                0 => runtime.send_text(&recipient, &format!("text {i}")).await,
                1 => runtime.send_image(&recipient, i.to_le_bytes().to_vec()).await,
                _ => runtime.send_transfer(&recipient, Amount::from_wei(1_000 + u128::from(i))).await,
            }
        }));
    }

    let remote = MockPeer::new(peer(), MockPeerConfig::unreliable(3));
    let inbound: Vec<_> = (0..40)
        .map(|i| remote.text(local(), &format!("inbound {i}"), Timestamp::new(1_000 + i)))
        .collect();
    let delivered = timeout(
        Duration::from_secs(5),
        remote.deliver(&fixture.runtime.inbound(), inbound),
    )
    .await
    .expect("inbound delivery should not deadlock")
    .unwrap();
    assert!(delivered >= 40);

    let mut sent = Vec::new();
    for handle in handles {
        let result = timeout(Duration::from_secs(5), handle)
            .await
            .expect("send should not deadlock")
            .unwrap();
        // Flaky storage rejects some images; every other send must succeed
        if let Ok(envelope) = result {
            sent.push(envelope);
        }
    }
    assert!(sent.len() >= 40, "too many failed sends: {}", sent.len());

    for envelope in sent.iter().filter(|e| e.kind() == MessageKind::ValueTransfer) {
        timeout(
            Duration::from_secs(5),
            fixture.wait_for_envelope(&envelope.id(), |e| e.delivery_state().is_terminal()),
        )
        .await
        .expect("transfer should settle");
    }
    fixture.runtime.flush().await.unwrap();

    let conversation = fixture.runtime.conversation_with(&peer()).unwrap();
    assert_eq!(conversation.len(), sent.len() + 40);
    assert!(conversation
        .windows(2)
        .all(|pair| pair[0].order_key() < pair[1].order_key()));
    for envelope in &sent {
        let stored = fixture.stored(&envelope.id());
        match stored.kind() {
            MessageKind::ValueTransfer => assert!(stored.delivery_state().is_terminal()),
            _ => assert_eq!(stored.delivery_state(), &DeliveryState::Confirmed),
        }
    }

    let stats = fixture.runtime.stats().await.unwrap();
    assert_eq!(stats.inserted, sent.len() + 40);
    assert_eq!(stats.duplicates, delivered - 40);
}

#[tokio::test]
async fn test_shutdown_under_load_persists_everything() {
    init_test_logging();

    let dir = tempfile::tempdir().unwrap();
    let mut config = create_stress_test_config();
    config.persistence.history_path = Some(dir.path().join("history.json"));

    let mut fixture = Fixture::with(config, MockStorage::ideal(), MockChain::default()).await;
    fixture.runtime.connect().await.unwrap();

    let remote = MockPeer::new(peer(), MockPeerConfig::default());
    let inbound = fixture.runtime.inbound();
    for i in 0..25 {
        inbound
            .deliver(remote.text(local(), &format!("m{i}"), Timestamp::new(i)))
            .await
            .unwrap();
    }

    let snapshot = timeout(Duration::from_secs(5), fixture.runtime.shutdown())
        .await
        .expect("shutdown should not hang")
        .unwrap();
    assert_eq!(snapshot.envelopes.len(), 25);

    let saved = dechat_runtime::HistorySnapshot::load(&dir.path().join("history.json")).unwrap();
    assert_eq!(saved, snapshot);
}
