//! DeChat demo application
//!
//! Wires the runtime to the in-memory wallet, storage and chain from
//! `dechat-harness` and plays a short conversation with a simulated peer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use dechat_core::{
    Amount, ConversationKey, DeliveryState, HistorySnapshot, MessageEnvelope, StoreDiff,
    Subscription, SystemTimeSource, TimeSource, WalletAddress,
};
use dechat_harness::{MockChain, MockPeer, MockPeerConfig, MockStorage, MockWallet};
use dechat_runtime::{DechatRuntime, RuntimeBuilder};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// What the demo conversation should do
#[derive(Debug, Clone)]
pub struct DemoPlan {
    pub peer: WalletAddress,
    pub amount: Amount,
    /// Revert the transfer on chain instead of finalizing it
    pub revert: bool,
}

/// DeChat runtime plus the simulated collaborators behind it
pub struct DechatApp {
    local: WalletAddress,
    runtime: DechatRuntime,
    chain: Arc<MockChain>,
    storage: Arc<MockStorage>,
    time_source: Arc<dyn TimeSource>,
}

impl DechatApp {
    /// Build and start the runtime; history is loaded from and saved to
    /// `history_path` when given
    pub async fn new(config: AppConfig, history_path: Option<PathBuf>) -> Result<Self> {
        let local = config.local_address()?;
        let wallet = Arc::new(MockWallet::new(local, config.chain_id()));
        let storage = Arc::new(MockStorage::default());
        let chain = Arc::new(MockChain::default());
        let time_source: Arc<dyn TimeSource> = Arc::new(SystemTimeSource::new());

        let mut core = config.core;
        if history_path.is_some() {
            core.persistence.history_path = history_path;
        }

        let runtime = RuntimeBuilder::new(wallet, storage.clone(), chain.clone())
            .with_config(core)
            .with_time_source(Arc::clone(&time_source))
            .build_and_start()
            .await?;

        info!(address = %local, "DeChat demo app started");
        Ok(Self {
            local,
            runtime,
            chain,
            storage,
            time_source,
        })
    }

    pub fn local_address(&self) -> WalletAddress {
        self.local
    }

    pub fn runtime(&self) -> &DechatRuntime {
        &self.runtime
    }

    /// Play the scripted conversation and return it in display order
    pub async fn run_demo(&self, plan: &DemoPlan) -> Result<Vec<MessageEnvelope>> {
        let session = self.runtime.connect().await?;
        info!(address = %session.address, chain_id = session.chain_id.value(), "Wallet connected");

        let key = ConversationKey::new(self.local, plan.peer);
        let mut subscription = self.runtime.subscribe(key);

        // The peer opens the conversation
        let peer = MockPeer::new(plan.peer, MockPeerConfig::default());
        let greeting = peer.text(self.local, "gm! did the invoice go out?", self.time_source.now());
        peer.deliver(&self.runtime.inbound(), vec![greeting]).await?;

        let peer_address = plan.peer.to_string();
        self.runtime
            .send_text(&peer_address, "gm, sending it now with the receipt")
            .await?;

        let receipt = b"\x89PNG\r\n\x1a\n demo receipt".to_vec();
        let image = self.runtime.send_image(&peer_address, receipt).await?;
        debug!(
            envelope_id = %image.id(),
            objects = self.storage.object_count(),
            "Receipt uploaded"
        );

        let transfer = self.runtime.send_transfer(&peer_address, plan.amount).await?;
        let transfer_id = transfer.payload().transfer_id().ok_or_else(|| {
            CliError::MessageProcessing("transfer envelope without transfer id".to_string())
        })?;

        if plan.revert {
            self.chain.revert(&transfer_id).await.map_err(dechat_core::DechatError::from)?;
        } else {
            self.chain.confirm(&transfer_id).await.map_err(dechat_core::DechatError::from)?;
        }

        let settle_timeout = self.runtime.config().transfer.finality_timeout();
        let outcome = wait_for_outcome(&mut subscription, &transfer, settle_timeout).await;
        match outcome {
            Some(state) => info!(envelope_id = %transfer.id(), %state, "Transfer settled"),
            None => warn!(envelope_id = %transfer.id(), "Transfer still pending"),
        }

        self.runtime.flush().await?;
        Ok(self.runtime.conversation(&key))
    }

    /// Persist history and stop the runtime
    pub async fn stop(&mut self) -> Result<HistorySnapshot> {
        Ok(self.runtime.shutdown().await?)
    }
}

/// Follow diffs until `envelope` reaches a terminal state
async fn wait_for_outcome(
    subscription: &mut Subscription,
    envelope: &MessageEnvelope,
    limit: Duration,
) -> Option<DeliveryState> {
    let watch = async {
        while let Some(diff) = subscription.recv().await {
            if let StoreDiff::Updated { envelope: updated, .. } = &diff {
                if updated.id() == envelope.id() && updated.delivery_state().is_terminal() {
                    return Some(updated.delivery_state().clone());
                }
            }
        }
        None
    };
    tokio::time::timeout(limit, watch).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dechat_core::MessageKind;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.core = dechat_core::DechatConfig::testing();
        config.identity.name = Some("demo-test".to_string());
        config
    }

    #[tokio::test]
    async fn test_demo_conversation() {
        let mut app = DechatApp::new(test_config(), None).await.unwrap();
        let plan = DemoPlan {
            peer: WalletAddress::new([0x42; 20]),
            amount: Amount::parse_ether("0.05").unwrap(),
            revert: false,
        };

        let conversation = app.run_demo(&plan).await.unwrap();
        let kinds: Vec<_> = conversation.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::Text,
                MessageKind::Text,
                MessageKind::ImageRef,
                MessageKind::ValueTransfer
            ]
        );
        assert!(conversation
            .iter()
            .all(|e| e.delivery_state() == &DeliveryState::Confirmed));
        assert!(conversation.iter().any(|e| e.sender() == plan.peer));

        let snapshot = app.stop().await.unwrap();
        assert_eq!(snapshot.envelopes.len(), 4);
    }

    #[tokio::test]
    async fn test_demo_with_reverted_transfer() {
        let mut app = DechatApp::new(test_config(), None).await.unwrap();
        let plan = DemoPlan {
            peer: WalletAddress::new([0x42; 20]),
            amount: Amount::from_ether(1),
            revert: true,
        };

        let conversation = app.run_demo(&plan).await.unwrap();
        let transfer = conversation
            .iter()
            .find(|e| e.kind() == MessageKind::ValueTransfer)
            .unwrap();
        assert_eq!(
            transfer.delivery_state(),
            &DeliveryState::failed("transfer reverted")
        );
        app.stop().await.unwrap();
    }
}
