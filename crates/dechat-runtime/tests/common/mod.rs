//! Shared fixture for runtime integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dechat_harness::{MockChain, MockStorage, MockTimeSource, MockWallet};
use dechat_runtime::{
    ChainId, DechatConfig, DechatRuntime, EnvelopeId, MessageEnvelope, RuntimeBuilder,
    WalletAddress,
};
use tokio::time::Instant;

pub const LOCAL: [u8; 20] = [0x11; 20];
pub const PEER: [u8; 20] = [0x22; 20];

pub struct Fixture {
    pub runtime: DechatRuntime,
    pub wallet: Arc<MockWallet>,
    pub storage: Arc<MockStorage>,
    pub chain: Arc<MockChain>,
    pub clock: MockTimeSource,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with(DechatConfig::testing(), MockStorage::ideal(), MockChain::default()).await
    }

    pub async fn with(config: DechatConfig, storage: MockStorage, chain: MockChain) -> Self {
        let wallet = Arc::new(MockWallet::new(local(), ChainId::new(1)));
        let storage = Arc::new(storage);
        let chain = Arc::new(chain);
        let clock = MockTimeSource::new_at(1_000);

        let runtime = RuntimeBuilder::new(wallet.clone(), storage.clone(), chain.clone())
            .with_config(config)
            .with_time_source(Arc::new(clock.clone()))
            .build_and_start()
            .await
            .expect("runtime should start");

        Self {
            runtime,
            wallet,
            storage,
            chain,
            clock,
        }
    }

    /// Start and connect
    pub async fn connected() -> Self {
        let fixture = Self::new().await;
        fixture.runtime.connect().await.expect("connect");
        fixture
    }

    pub fn stored(&self, id: &EnvelopeId) -> MessageEnvelope {
        self.runtime
            .reader()
            .envelope(id)
            .expect("envelope should be stored")
    }

    /// Poll the store until the envelope satisfies `condition`
    pub async fn wait_for_envelope<F>(&self, id: &EnvelopeId, condition: F) -> MessageEnvelope
    where
        F: Fn(&MessageEnvelope) -> bool,
    {
        wait_until(|| {
            self.runtime
                .reader()
                .envelope(id)
                .is_some_and(|envelope| condition(&envelope))
        })
        .await;
        self.stored(id)
    }
}

pub fn local() -> WalletAddress {
    WalletAddress::new(LOCAL)
}

pub fn peer() -> WalletAddress {
    WalletAddress::new(PEER)
}

pub fn peer_str() -> String {
    peer().to_string()
}

/// Poll `condition` every few milliseconds for up to two seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
