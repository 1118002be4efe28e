//! History persistence tests
//!
//! A restart must reproduce the exact view continuous operation produced.

use dechat_core::{
    Amount, ChainState, ConversationKey, DechatError, DeliveryState, EngineEvent,
    HistorySnapshot, MessageEnvelope, Payload, ReconciliationEngine, Timestamp, TransferId,
    WalletAddress,
};

fn addr(byte: u8) -> WalletAddress {
    WalletAddress::new([byte; 20])
}

fn text(from: u8, to: u8, at: u64, body: &str) -> MessageEnvelope {
    MessageEnvelope::compose(
        addr(from),
        addr(to),
        Payload::Text { body: body.into() },
        Timestamp::new(at),
    )
}

/// Build an engine holding a mix of kinds and delivery states
fn populated_engine() -> ReconciliationEngine {
    let mut engine = ReconciliationEngine::new();
    let confirmed_transfer = TransferId::generate();
    let reverted_transfer = TransferId::generate();
    let pending_transfer = TransferId::generate();

    let mut events = vec![
        EngineEvent::Inbound(text(2, 1, 30, "third")),
        EngineEvent::Composed(text(1, 2, 10, "first")),
        EngineEvent::Composed(text(1, 3, 5, "other conversation")),
    ];
    for (transfer_id, at) in [
        (confirmed_transfer, 20),
        (reverted_transfer, 25),
        (pending_transfer, 40),
    ] {
        events.push(EngineEvent::Composed(MessageEnvelope::compose(
            addr(1),
            addr(2),
            Payload::ValueTransfer {
                amount: Amount::from_ether(2),
                transfer_id,
            },
            Timestamp::new(at),
        )));
    }
    for state in [
        ChainState::Submitted,
        ChainState::Included,
        ChainState::Finalized,
    ] {
        events.push(EngineEvent::TransferUpdate {
            transfer_id: confirmed_transfer,
            state,
            tx_reference: Some("0xabc".into()),
        });
    }
    for state in [ChainState::Submitted, ChainState::Reverted] {
        events.push(EngineEvent::TransferUpdate {
            transfer_id: reverted_transfer,
            state,
            tx_reference: None,
        });
    }

    engine.apply_all(events);
    engine
}

#[test]
fn test_restore_reproduces_continuous_view() {
    let original = populated_engine();
    let json = original.snapshot().to_json().unwrap();

    let mut restored = ReconciliationEngine::new();
    restored.restore(HistorySnapshot::from_json(&json).unwrap());

    let reader = original.reader();
    let restored_reader = restored.reader();
    assert_eq!(reader.conversations(), restored_reader.conversations());
    for key in reader.conversations() {
        assert_eq!(reader.get(&key), restored_reader.get(&key));
    }

    let main = reader.get(&ConversationKey::new(addr(1), addr(2)));
    let states: Vec<_> = main.iter().map(|e| e.delivery_state().clone()).collect();
    assert_eq!(
        states,
        vec![
            DeliveryState::Confirmed,
            DeliveryState::Confirmed,
            DeliveryState::failed("transfer reverted"),
            DeliveryState::Confirmed,
            DeliveryState::Pending,
        ]
    );
}

#[test]
fn test_restore_merges_with_live_events() {
    let original = populated_engine();
    let snapshot = original.snapshot();
    let live = snapshot.envelopes[0].clone();

    let mut engine = ReconciliationEngine::new();
    engine.apply(EngineEvent::Inbound(live));
    engine.restore(snapshot);

    assert_eq!(
        engine.reader().total_envelopes(),
        original.reader().total_envelopes()
    );
    assert_eq!(engine.stats().duplicates, 1);
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("history.json");

    let original = populated_engine();
    original.snapshot().save(&path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());

    let loaded = HistorySnapshot::load(&path).unwrap();
    assert_eq!(loaded, original.snapshot());
}

#[test]
fn test_corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = HistorySnapshot::load(&path).unwrap_err();
    assert!(matches!(err, DechatError::Serialization(_)));
}
