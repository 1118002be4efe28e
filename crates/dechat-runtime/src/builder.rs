//! Runtime Builder API
//!
//! Wires the external collaborators into the session, storage, transfer and
//! composer services, restores persisted history and starts the engine task.

use std::sync::Arc;

use dechat_core::{
    DechatConfig, HistorySnapshot, ReconciliationEngine, Result, SystemTimeSource, TimeSource,
};
use tokio::sync::mpsc;
use tracing::info;

use crate::composer::MessageComposer;
use crate::content::{ContentAddresser, StorageGateway};
use crate::engine::EngineTask;
use crate::identity::{IdentitySession, WalletProvider};
use crate::runtime::DechatRuntime;
use crate::transfer::{ChainClient, TransferSubmitter};

/// Capacity of the engine's control channel
const COMMAND_BUFFER_SIZE: usize = 32;

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

pub struct RuntimeBuilder {
    config: DechatConfig,
    wallet: Arc<dyn WalletProvider>,
    storage: Arc<dyn StorageGateway>,
    chain: Arc<dyn ChainClient>,
    time_source: Arc<dyn TimeSource>,
    history: Option<HistorySnapshot>,
}

impl RuntimeBuilder {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        storage: Arc<dyn StorageGateway>,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            config: DechatConfig::default(),
            wallet,
            storage,
            chain,
            time_source: Arc::new(SystemTimeSource),
            history: None,
        }
    }

    pub fn with_config(mut self, config: DechatConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the wall clock, e.g. with a mock in tests
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Seed the engine with an in-memory snapshot (in addition to any history file)
    pub fn with_history(mut self, snapshot: HistorySnapshot) -> Self {
        self.history = Some(snapshot);
        self
    }

    /// Build and start the runtime
    pub async fn build_and_start(self) -> Result<DechatRuntime> {
        self.config.validate()?;
        info!("Building DeChat runtime");

        let mut engine = ReconciliationEngine::new();
        if let Some(path) = &self.config.persistence.history_path {
            engine.restore(HistorySnapshot::load(path)?);
        }
        if let Some(snapshot) = self.history {
            engine.restore(snapshot);
        }
        let reader = engine.reader();

        let channels = &self.config.channels;
        let (events, event_receiver) = mpsc::channel(channels.event_buffer_size);
        let (commands, command_receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);

        let identity = IdentitySession::new(
            self.wallet,
            self.config.session.clone(),
            Arc::clone(&self.time_source),
        );
        let content = ContentAddresser::new(self.storage, self.config.storage.clone());
        let transfers = TransferSubmitter::new(
            self.chain,
            identity.accessor(),
            self.config.transfer.clone(),
            channels.notification_buffer_size,
            Arc::clone(&self.time_source),
            events.clone(),
        );
        let composer = MessageComposer::new(
            identity.accessor(),
            content,
            transfers.clone(),
            self.config.composer.clone(),
            Arc::clone(&self.time_source),
        );

        let task = EngineTask::new(
            engine,
            event_receiver,
            command_receiver,
            self.config.persistence.history_path.clone(),
            self.config.persistence.autosave,
        );
        let engine_handle = tokio::spawn(task.run());

        info!(
            restored = reader.total_envelopes(),
            "DeChat runtime started"
        );

        Ok(DechatRuntime {
            config: self.config,
            identity,
            composer: Arc::new(composer),
            transfers,
            reader,
            events,
            commands,
            engine_handle: Some(engine_handle),
        })
    }
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Create a runtime with short timeouts and small buffers for tests
pub async fn create_test_runtime(
    wallet: Arc<dyn WalletProvider>,
    storage: Arc<dyn StorageGateway>,
    chain: Arc<dyn ChainClient>,
) -> Result<DechatRuntime> {
    RuntimeBuilder::new(wallet, storage, chain)
        .with_config(DechatConfig::testing())
        .build_and_start()
        .await
}
