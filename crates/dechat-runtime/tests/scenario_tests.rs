//! End-to-end message scenarios against mock collaborators

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{local, peer, peer_str, Fixture};
use dechat_runtime::{
    Amount, ChainId, ChainState, ConnectionError, ConversationKey, DechatError, DeliveryState,
    MessageKind, Payload, StorageError, StoreDiff, TransferError, ValidationError, WalletAddress,
};

fn transfer_id_of(payload: &Payload) -> dechat_runtime::TransferId {
    payload.transfer_id().expect("transfer payload")
}

#[tokio::test]
async fn test_text_is_confirmed_immediately() {
    let fixture = Fixture::connected().await;

    let envelope = fixture
        .runtime
        .send_text(&peer_str(), "hello")
        .await
        .unwrap();

    assert_eq!(envelope.kind(), MessageKind::Text);
    assert_eq!(envelope.delivery_state(), &DeliveryState::Confirmed);
    assert_eq!(envelope.sender(), local());
    assert_eq!(envelope.recipient(), peer());
    assert_eq!(
        envelope.payload(),
        &Payload::Text {
            body: "hello".into()
        }
    );

    let conversation = fixture.runtime.conversation_with(&peer()).unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].id(), envelope.id());
}

#[tokio::test]
async fn test_reverted_transfer_fails_envelope() {
    let fixture = Fixture::connected().await;

    let envelope = fixture
        .runtime
        .send_transfer(&peer_str(), Amount::parse_ether("1.0").unwrap())
        .await
        .unwrap();
    assert_eq!(envelope.kind(), MessageKind::ValueTransfer);
    assert_eq!(envelope.delivery_state(), &DeliveryState::Pending);

    let transfer_id = transfer_id_of(envelope.payload());
    fixture.chain.revert(&transfer_id).await.unwrap();

    let stored = fixture
        .wait_for_envelope(&envelope.id(), |e| e.delivery_state().is_terminal())
        .await;
    assert_eq!(
        stored.delivery_state(),
        &DeliveryState::failed("transfer reverted")
    );

    let conversation = fixture.runtime.conversation_with(&peer()).unwrap();
    let matching = conversation
        .iter()
        .filter(|e| e.id() == envelope.id())
        .count();
    assert_eq!(matching, 1);
    assert_eq!(conversation.len(), 1);
}

#[tokio::test]
async fn test_finalized_transfer_confirms_envelope() {
    let fixture = Fixture::connected().await;

    let envelope = fixture
        .runtime
        .send_transfer(&peer_str(), Amount::parse_ether("0.25").unwrap())
        .await
        .unwrap();
    let transfer_id = transfer_id_of(envelope.payload());

    fixture.chain.confirm(&transfer_id).await.unwrap();
    fixture
        .wait_for_envelope(&envelope.id(), |e| e.delivery_state().is_terminal())
        .await;

    assert_eq!(
        fixture.stored(&envelope.id()).delivery_state(),
        &DeliveryState::Confirmed
    );
    let record = fixture.runtime.transfers().record(&transfer_id).unwrap();
    assert_eq!(record.chain_state, ChainState::Finalized);
    assert!(record.tx_reference.as_str().starts_with("0x"));
}

#[tokio::test]
async fn test_identical_images_share_hash_not_id() {
    let fixture = Fixture::connected().await;
    let bytes = b"\x89PNG fake image".to_vec();

    let first = fixture
        .runtime
        .send_image(&peer_str(), bytes.clone())
        .await
        .unwrap();
    let second = fixture.runtime.send_image(&peer_str(), bytes).await.unwrap();

    let hash_of = |payload: &Payload| match payload {
        Payload::ImageRef { content_hash, .. } => *content_hash,
        other => panic!("expected image, got {other:?}"),
    };
    assert_eq!(hash_of(first.payload()), hash_of(second.payload()));
    assert_ne!(first.id(), second.id());
    assert_eq!(first.delivery_state(), &DeliveryState::Confirmed);

    let conversation = fixture.runtime.conversation_with(&peer()).unwrap();
    assert_eq!(conversation.len(), 2);
    assert_eq!(fixture.storage.object_count(), 1);
}

#[tokio::test]
async fn test_account_switch_mid_upload_fails_compose() {
    let fixture = Fixture::connected().await;
    fixture.storage.pause_uploads();

    let recipient = peer_str();
    let send = fixture
        .runtime
        .send_image(&recipient, b"held image".to_vec());
    let switch = async {
        fixture.storage.upload_started().await;
        let change = fixture
            .wallet
            .switch_account(WalletAddress::new([0x33; 20]), ChainId::new(1))
            .await;
        assert!(fixture.runtime.observe_wallet_change(change));
        fixture.storage.resume_uploads();
    };
    let (result, ()) = tokio::join!(send, switch);

    assert!(matches!(
        result,
        Err(DechatError::Connection(
            ConnectionError::SessionInvalidated { .. }
        ))
    ));
    fixture.runtime.flush().await.unwrap();
    assert_eq!(fixture.runtime.reader().total_envelopes(), 0);
    assert!(fixture.runtime.current_session().is_none());
}

#[tokio::test]
async fn test_account_switch_mid_submit_cancels_transfer() {
    let fixture = Fixture::connected().await;
    fixture
        .chain
        .set_submission_delay(Duration::from_millis(100));

    let recipient = peer_str();
    let send = fixture
        .runtime
        .send_transfer(&recipient, Amount::from_ether(1));
    let switch = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        fixture.runtime.observe_wallet_change(dechat_runtime::WalletChange {
            address: local(),
            chain_id: ChainId::new(5),
        });
    };
    let (result, ()) = tokio::join!(send, switch);

    assert!(matches!(
        result,
        Err(DechatError::Connection(
            ConnectionError::SessionInvalidated { .. }
        ))
    ));
    // Cancelled on chain, then released: nothing left to track
    assert_eq!(fixture.chain.stats().cancelled.load(Ordering::SeqCst), 1);
    assert!(fixture.runtime.transfer_records().is_empty());

    fixture.runtime.flush().await.unwrap();
    assert_eq!(fixture.runtime.reader().total_envelopes(), 0);
}

#[tokio::test]
async fn test_compose_without_session() {
    let fixture = Fixture::new().await;

    // Session check precedes recipient validation
    let err = fixture
        .runtime
        .send_text("not an address", "hi")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Connection(ConnectionError::NoActiveSession)
    ));
}

#[tokio::test]
async fn test_validation_errors() {
    let fixture = Fixture::connected().await;

    let err = fixture.runtime.send_text("0x1234", "hi").await.unwrap_err();
    assert!(matches!(
        err,
        DechatError::Validation(ValidationError::InvalidRecipient { .. })
    ));

    let err = fixture
        .runtime
        .send_text(&local().to_string(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Validation(ValidationError::SelfAddressed)
    ));

    let err = fixture
        .runtime
        .send_text(&WalletAddress::ZERO.to_string(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Validation(ValidationError::InvalidRecipient { .. })
    ));

    let err = fixture
        .runtime
        .send_text(&peer_str(), "   \n ")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Validation(ValidationError::EmptyText)
    ));

    let err = fixture
        .runtime
        .send_text(&peer_str(), "bell\u{7}")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Validation(ValidationError::InvalidContent { .. })
    ));

    assert_eq!(fixture.runtime.reader().total_envelopes(), 0);
}

#[tokio::test]
async fn test_transfer_rejections_insert_nothing() {
    let fixture = Fixture::connected().await;
    fixture
        .chain
        .set_balance(local(), Amount::parse_ether("0.5").unwrap());

    let err = fixture
        .runtime
        .send_transfer(&peer_str(), Amount::from_ether(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Transfer(TransferError::InsufficientFunds { .. })
    ));
    assert!(!err.is_retryable());

    fixture.chain.reject_next();
    let err = fixture
        .runtime
        .send_transfer(&peer_str(), Amount::parse_ether("0.1").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Transfer(TransferError::UserRejected)
    ));

    let err = fixture
        .runtime
        .send_transfer(&peer_str(), Amount::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Validation(ValidationError::InvalidAmount { .. })
    ));

    fixture.runtime.flush().await.unwrap();
    assert_eq!(fixture.runtime.reader().total_envelopes(), 0);
    assert!(fixture.runtime.transfer_records().is_empty());
}

#[tokio::test]
async fn test_storage_errors_surface_to_caller() {
    let fixture = Fixture::connected().await;

    fixture
        .storage
        .fail_next(StorageError::Unavailable {
            reason: "gateway down".into(),
        });
    let err = fixture
        .runtime
        .send_image(&peer_str(), b"img".to_vec())
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let too_big = vec![0u8; fixture.runtime.config().storage.max_payload_bytes + 1];
    let err = fixture
        .runtime
        .send_image(&peer_str(), too_big)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DechatError::Storage(StorageError::PayloadTooLarge { .. })
    ));
    assert!(!err.is_retryable());
    assert_eq!(fixture.runtime.reader().total_envelopes(), 0);
}

#[tokio::test]
async fn test_subscriber_receives_diffs() {
    let fixture = Fixture::connected().await;
    let key = ConversationKey::new(local(), peer());
    let mut subscription = fixture.runtime.subscribe(key);
    assert!(subscription.snapshot.is_empty());

    let envelope = fixture
        .runtime
        .send_transfer(&peer_str(), Amount::from_ether(2))
        .await
        .unwrap();
    fixture
        .chain
        .confirm(&transfer_id_of(envelope.payload()))
        .await
        .unwrap();

    let mut view = subscription.snapshot.clone();
    let inserted = subscription.recv().await.unwrap();
    assert!(matches!(inserted, StoreDiff::Inserted { position: 0, .. }));
    inserted.apply_to(&mut view);

    let updated = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(updated, StoreDiff::Updated { position: 0, .. }));
    updated.apply_to(&mut view);

    assert_eq!(view, fixture.runtime.conversation(&key));
    assert_eq!(view[0].delivery_state(), &DeliveryState::Confirmed);
}

#[tokio::test]
async fn test_creation_times_stay_monotonic_when_clock_steps_back() {
    let fixture = Fixture::connected().await;

    let first = fixture.runtime.send_text(&peer_str(), "one").await.unwrap();
    fixture.clock.set_time(10);
    let second = fixture.runtime.send_text(&peer_str(), "two").await.unwrap();

    assert!(second.created_at() > first.created_at());
    let conversation = fixture.runtime.conversation_with(&peer()).unwrap();
    assert_eq!(conversation[0].id(), first.id());
    assert_eq!(conversation[1].id(), second.id());
}
