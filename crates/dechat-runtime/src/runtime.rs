//! Runtime handle
//!
//! [`DechatRuntime`] is what a presentation layer holds: it connects the
//! wallet, sends messages through the composer, exposes the read model and
//! transfer records, and shuts the engine task down.

use std::sync::Arc;
use std::time::Duration;

use dechat_core::{
    ConversationKey, DechatConfig, DechatError, EngineEvent, EngineStats, EnvelopeId,
    HistorySnapshot, MessageEnvelope, MessageKind, Result, StorageError, StoreDiff, StoreReader,
    Subscription, TransferId, WalletAddress,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::composer::{MessageComposer, PayloadInput};
use crate::engine::{request, CommandSender, EngineCommand, EventSender};
use crate::identity::{ConnectionState, IdentitySession, Session, SessionAccessor, WalletChange};
use crate::transfer::{TransferRecord, TransferSubmitter};

// ----------------------------------------------------------------------------
// Inbound Handle
// ----------------------------------------------------------------------------

/// Entry point for envelopes sent by peers, whatever transport carries them
#[derive(Debug, Clone)]
pub struct InboundHandle {
    events: EventSender,
}

impl InboundHandle {
    pub(crate) fn new(events: EventSender) -> Self {
        Self { events }
    }

    pub async fn deliver(&self, envelope: MessageEnvelope) -> Result<()> {
        self.events
            .send(EngineEvent::Inbound(envelope))
            .await
            .map_err(|_| DechatError::channel_error("engine task is not running"))
    }
}

// ----------------------------------------------------------------------------
// Runtime
// ----------------------------------------------------------------------------

/// Handle to a running messaging engine
pub struct DechatRuntime {
    pub(crate) config: DechatConfig,
    pub(crate) identity: IdentitySession,
    pub(crate) composer: Arc<MessageComposer>,
    pub(crate) transfers: TransferSubmitter,
    pub(crate) reader: StoreReader,
    pub(crate) events: EventSender,
    pub(crate) commands: CommandSender,
    pub(crate) engine_handle: Option<JoinHandle<Result<()>>>,
}

impl DechatRuntime {
    pub fn config(&self) -> &DechatConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    pub async fn connect(&self) -> Result<Session> {
        self.identity.connect().await
    }

    pub fn disconnect(&self) {
        self.identity.disconnect();
    }

    pub fn current_session(&self) -> Option<Session> {
        self.identity.current()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.identity.connection_state()
    }

    pub fn session_accessor(&self) -> SessionAccessor {
        self.identity.accessor()
    }

    /// Apply a wallet account/chain switch; returns `true` if the session was torn down
    pub fn observe_wallet_change(&self, change: WalletChange) -> bool {
        self.identity.observe_wallet_change(change)
    }

    pub fn watch_wallet_changes(&self, changes: mpsc::Receiver<WalletChange>) -> JoinHandle<()> {
        self.identity.watch_wallet_changes(changes)
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Compose an envelope and insert it optimistically.
    ///
    /// Returns the envelope as stored after the insert. Text is `Confirmed`;
    /// an image is confirmed as soon as its upload is acknowledged; a
    /// transfer stays `Pending` until its chain outcome arrives.
    pub async fn send(&self, recipient: &str, input: PayloadInput) -> Result<MessageEnvelope> {
        let envelope = self.composer.compose(recipient, input).await?;
        let id = envelope.id();
        let kind = envelope.kind();

        self.apply(EngineEvent::Composed(envelope.clone())).await?;
        if kind == MessageKind::ImageRef {
            self.apply(EngineEvent::StorageOutcome {
                envelope_id: id,
                result: Ok(()),
            })
            .await?;
        }

        Ok(self.reader.envelope(&id).unwrap_or(envelope))
    }

    pub async fn send_text(&self, recipient: &str, text: &str) -> Result<MessageEnvelope> {
        self.send(recipient, PayloadInput::Text(text.to_string()))
            .await
    }

    pub async fn send_image(&self, recipient: &str, bytes: Vec<u8>) -> Result<MessageEnvelope> {
        self.send(recipient, PayloadInput::Image(bytes)).await
    }

    pub async fn send_transfer(
        &self,
        recipient: &str,
        amount: dechat_core::Amount,
    ) -> Result<MessageEnvelope> {
        self.send(recipient, PayloadInput::Transfer(amount)).await
    }

    /// Report a storage-layer outcome that surfaced after compose
    pub async fn report_storage_outcome(
        &self,
        envelope_id: EnvelopeId,
        result: core::result::Result<(), StorageError>,
    ) -> Result<()> {
        self.events
            .send(EngineEvent::StorageOutcome {
                envelope_id,
                result,
            })
            .await
            .map_err(|_| DechatError::channel_error("engine task is not running"))
    }

    pub fn inbound(&self) -> InboundHandle {
        InboundHandle::new(self.events.clone())
    }

    // ------------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------------

    pub fn transfers(&self) -> &TransferSubmitter {
        &self.transfers
    }

    pub async fn cancel_transfer(&self, transfer_id: &TransferId) -> Result<TransferRecord> {
        self.transfers.cancel(transfer_id).await
    }

    /// Wait for chain inclusion; `None` uses the configured timeout
    pub async fn wait_for_inclusion(
        &self,
        transfer_id: &TransferId,
        timeout: Option<Duration>,
    ) -> Result<TransferRecord> {
        let timeout = timeout.unwrap_or_else(|| self.config.transfer.inclusion_timeout());
        self.transfers.wait_for_inclusion(transfer_id, timeout).await
    }

    pub fn transfer_records(&self) -> Vec<TransferRecord> {
        self.transfers.records()
    }

    // ------------------------------------------------------------------------
    // Read model
    // ------------------------------------------------------------------------

    pub fn reader(&self) -> StoreReader {
        self.reader.clone()
    }

    pub fn conversation(&self, key: &ConversationKey) -> Vec<MessageEnvelope> {
        self.reader.get(key)
    }

    /// Conversation between the current session and `peer`
    pub fn conversation_with(&self, peer: &WalletAddress) -> Result<Vec<MessageEnvelope>> {
        let session = self.identity.accessor().require()?;
        Ok(self.reader.get(&ConversationKey::new(session.address, *peer)))
    }

    pub fn subscribe(&self, key: ConversationKey) -> Subscription {
        self.reader.subscribe(key)
    }

    // ------------------------------------------------------------------------
    // Engine control
    // ------------------------------------------------------------------------

    /// Wait until every event queued so far has been applied
    pub async fn flush(&self) -> Result<()> {
        request(&self.commands, EngineCommand::Flush).await
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        request(&self.commands, EngineCommand::Stats).await
    }

    pub async fn snapshot(&self) -> Result<HistorySnapshot> {
        request(&self.commands, EngineCommand::Snapshot).await
    }

    pub fn is_running(&self) -> bool {
        self.engine_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Persist history and stop the engine task
    pub async fn shutdown(&mut self) -> Result<HistorySnapshot> {
        info!("Shutting down DeChat runtime");
        self.identity.disconnect();

        let snapshot = request(&self.commands, EngineCommand::Shutdown).await?;

        if let Some(handle) = self.engine_handle.take() {
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => {
                    return Err(DechatError::channel_error(format!(
                        "engine task panicked: {}",
                        e
                    )))
                }
                Err(_) => warn!("Engine task did not stop in time"),
            }
        }

        info!(envelopes = snapshot.envelopes.len(), "DeChat runtime shut down");
        Ok(snapshot)
    }

    async fn apply(&self, event: EngineEvent) -> Result<Vec<StoreDiff>> {
        let diffs = request(&self.commands, |reply| EngineCommand::Apply { event, reply }).await?;
        debug!(diffs = diffs.len(), "Applied composed event");
        Ok(diffs)
    }
}

impl core::fmt::Debug for DechatRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DechatRuntime")
            .field("identity", &self.identity)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
