//! Native-currency transfer submission and lifecycle tracking
//!
//! Each submitted transfer gets a [`TransferRecord`] held in a `watch`
//! channel and a watcher task that follows the chain collaborator's
//! notifications. Accepted state changes are forwarded to the engine as
//! [`EngineEvent::TransferUpdate`]; illegal ones are dropped with a warning.
//! Settled records beyond `transfer.settled_record_limit` are pruned oldest
//! first.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dechat_core::{
    Amount, ChainState, EngineEvent, Result, TimeSource, Timestamp, TransferConfig,
    TransferError, TransferId, ValidationError, WalletAddress,
};
use hashbrown::HashMap;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::EventSender;
use crate::identity::SessionAccessor;

// ----------------------------------------------------------------------------
// Chain Collaborator
// ----------------------------------------------------------------------------

/// Transaction reference returned by the chain collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TxReference(String);

impl TxReference {
    pub fn new<T: Into<String>>(reference: T) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TxReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signed transfer handed to the chain collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub transfer_id: TransferId,
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub amount: Amount,
}

/// External chain RPC client
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn send_transfer(
        &self,
        request: &TransferRequest,
    ) -> core::result::Result<TxReference, TransferError>;

    /// Register for inclusion/finality/revert notifications on `tx`
    async fn watch(
        &self,
        tx: &TxReference,
        notifications: mpsc::Sender<ChainState>,
    ) -> core::result::Result<(), TransferError>;

    /// Ask the chain to drop a not yet included transaction
    async fn cancel(&self, tx: &TxReference) -> core::result::Result<(), TransferError>;
}

// ----------------------------------------------------------------------------
// Transfer Record
// ----------------------------------------------------------------------------

/// Lifecycle of one on-chain value transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub amount: Amount,
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub chain_state: ChainState,
    pub tx_reference: TxReference,
    pub submitted_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Transfer Submitter
// ----------------------------------------------------------------------------

struct SubmitterInner {
    chain: Arc<dyn ChainClient>,
    session: SessionAccessor,
    config: TransferConfig,
    notification_buffer: usize,
    time_source: Arc<dyn TimeSource>,
    records: RwLock<HashMap<TransferId, watch::Sender<TransferRecord>>>,
    events: EventSender,
}

/// Submits transfers and tracks them to a terminal chain state
#[derive(Clone)]
pub struct TransferSubmitter {
    inner: Arc<SubmitterInner>,
}

impl TransferSubmitter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        session: SessionAccessor,
        config: TransferConfig,
        notification_buffer: usize,
        time_source: Arc<dyn TimeSource>,
        events: EventSender,
    ) -> Self {
        Self {
            inner: Arc::new(SubmitterInner {
                chain,
                session,
                config,
                notification_buffer,
                time_source,
                records: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Submit `amount` to `to` from the current session's address.
    ///
    /// Returns once the chain collaborator accepted the transaction; the
    /// record starts in `Submitted` and a watcher follows it from there.
    pub async fn submit(&self, amount: Amount, to: WalletAddress) -> Result<TransferRecord> {
        let session = self.inner.session.require()?;

        if to.is_zero() {
            return Err(TransferError::InvalidRecipient {
                reason: "zero address".into(),
            }
            .into());
        }
        if to == session.address {
            return Err(TransferError::InvalidRecipient {
                reason: "cannot transfer to the sending wallet".into(),
            }
            .into());
        }
        if amount.is_zero() {
            return Err(ValidationError::InvalidAmount {
                reason: "transfer amount must be greater than zero".into(),
            }
            .into());
        }

        let request = TransferRequest {
            transfer_id: TransferId::generate(),
            from: session.address,
            to,
            amount,
        };
        let tx_reference = self.inner.chain.send_transfer(&request).await?;

        let record = TransferRecord {
            transfer_id: request.transfer_id,
            amount,
            from: request.from,
            to,
            chain_state: ChainState::Submitted,
            tx_reference: tx_reference.clone(),
            submitted_at: self.inner.time_source.now(),
        };
        let (sender, _) = watch::channel(record.clone());
        self.write_records().insert(record.transfer_id, sender);
        self.prune_settled();

        info!(
            transfer_id = %record.transfer_id,
            tx = %tx_reference,
            amount = %amount,
            to = %to,
            "Transfer submitted"
        );

        self.forward(&record).await;
        self.spawn_watcher(record.transfer_id, tx_reference);
        Ok(record)
    }

    /// Cancel a transfer that has not been included yet. The record moves to
    /// `Reverted`; after inclusion this fails with `CancellationRejected`.
    pub async fn cancel(&self, transfer_id: &TransferId) -> Result<TransferRecord> {
        let record = self.record(transfer_id).ok_or_else(|| unknown(transfer_id))?;
        if record.chain_state != ChainState::Submitted {
            return Err(TransferError::CancellationRejected {
                state: record.chain_state.to_string(),
            }
            .into());
        }

        self.inner.chain.cancel(&record.tx_reference).await?;

        match self.transition(transfer_id, ChainState::Reverted) {
            Some(updated) => {
                info!(%transfer_id, "Transfer cancelled");
                self.forward(&updated).await;
                Ok(updated)
            }
            None => {
                // The watcher moved it past Submitted while the cancel was in flight
                let state = self
                    .record(transfer_id)
                    .map(|r| r.chain_state.to_string())
                    .unwrap_or_default();
                Err(TransferError::CancellationRejected { state }.into())
            }
        }
    }

    /// Stop tracking a transfer whose envelope will never be composed and
    /// tell the engine to drop its buffered state
    pub async fn release(&self, transfer_id: &TransferId) {
        let removed = self.write_records().remove(transfer_id).is_some();
        if removed {
            debug!(%transfer_id, "Released transfer record");
        }
        let event = EngineEvent::TransferAbandoned {
            transfer_id: *transfer_id,
        };
        if self.inner.events.send(event).await.is_err() {
            debug!(%transfer_id, "Engine stopped, dropping transfer release");
        }
    }

    /// Wait for the transfer to leave `Submitted` (included or reverted)
    pub async fn wait_for_inclusion(
        &self,
        transfer_id: &TransferId,
        timeout: Duration,
    ) -> Result<TransferRecord> {
        let mut receiver = self
            .read_records()
            .get(transfer_id)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| unknown(transfer_id))?;

        let waited = tokio::time::timeout(
            timeout,
            receiver.wait_for(|record| record.chain_state != ChainState::Submitted),
        )
        .await;

        match waited {
            Ok(Ok(record)) => Ok(record.clone()),
            Ok(Err(_)) => Err(unknown(transfer_id)),
            Err(_) => Err(TransferError::InclusionTimeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
        }
    }

    /// Wait for inclusion with the configured timeout
    pub async fn wait_for_inclusion_default(&self, transfer_id: &TransferId) -> Result<TransferRecord> {
        self.wait_for_inclusion(transfer_id, self.inner.config.inclusion_timeout())
            .await
    }

    pub fn record(&self, transfer_id: &TransferId) -> Option<TransferRecord> {
        self.read_records()
            .get(transfer_id)
            .map(|sender| sender.borrow().clone())
    }

    /// All records, oldest submission first
    pub fn records(&self) -> Vec<TransferRecord> {
        let mut records: Vec<_> = self
            .read_records()
            .values()
            .map(|sender| sender.borrow().clone())
            .collect();
        records.sort_by_key(|record| record.submitted_at);
        records
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Apply a chain state change if it is a legal transition
    fn transition(&self, transfer_id: &TransferId, next: ChainState) -> Option<TransferRecord> {
        let records = self.read_records();
        let sender = records.get(transfer_id)?;
        let changed = sender.send_if_modified(|record| {
            if record.chain_state.can_transition_to(next) {
                record.chain_state = next;
                true
            } else {
                false
            }
        });
        if changed {
            Some(sender.borrow().clone())
        } else {
            warn!(
                %transfer_id,
                from = %sender.borrow().chain_state,
                to = %next,
                "Ignoring illegal chain transition"
            );
            None
        }
    }

    fn prune_settled(&self) {
        let limit = self.inner.config.settled_record_limit;
        let mut records = self.write_records();
        let mut settled: Vec<(Timestamp, TransferId)> = records
            .iter()
            .filter_map(|(transfer_id, sender)| {
                let record = sender.borrow();
                let settled = record.chain_state.is_terminal();
                settled.then_some((record.submitted_at, *transfer_id))
            })
            .collect();
        if settled.len() <= limit {
            return;
        }

        settled.sort();
        let excess = settled.len() - limit;
        for (_, transfer_id) in settled.into_iter().take(excess) {
            records.remove(&transfer_id);
        }
        debug!(pruned = excess, "Pruned settled transfer records");
    }

    async fn forward(&self, record: &TransferRecord) {
        let event = EngineEvent::TransferUpdate {
            transfer_id: record.transfer_id,
            state: record.chain_state,
            tx_reference: Some(record.tx_reference.to_string()),
        };
        if self.inner.events.send(event).await.is_err() {
            debug!(transfer_id = %record.transfer_id, "Engine stopped, dropping transfer update");
        }
    }

    fn spawn_watcher(&self, transfer_id: TransferId, tx_reference: TxReference) {
        let submitter = self.clone();
        tokio::spawn(async move {
            submitter.watch_transfer(transfer_id, tx_reference).await;
        });
    }

    async fn watch_transfer(&self, transfer_id: TransferId, tx_reference: TxReference) {
        let (tx, mut rx) = mpsc::channel(self.inner.notification_buffer);
        if let Err(err) = self.inner.chain.watch(&tx_reference, tx).await {
            warn!(%transfer_id, error = %err, "Could not watch transfer");
            return;
        }

        let deadline = Instant::now() + self.inner.config.finality_timeout();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(state)) => {
                    if let Some(record) = self.transition(&transfer_id, state) {
                        debug!(%transfer_id, state = %state, "Chain state advanced");
                        self.forward(&record).await;
                    }
                    if self
                        .record(&transfer_id)
                        .is_some_and(|record| record.chain_state.is_terminal())
                    {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(%transfer_id, "Chain notification stream closed");
                    break;
                }
                Err(_) => {
                    warn!(
                        %transfer_id,
                        timeout_ms = self.inner.config.finality_timeout_ms,
                        "Gave up waiting for transfer finality"
                    );
                    break;
                }
            }
        }
    }

    fn read_records(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<TransferId, watch::Sender<TransferRecord>>> {
        self.inner
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_records(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<TransferId, watch::Sender<TransferRecord>>> {
        self.inner
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn unknown(transfer_id: &TransferId) -> dechat_core::DechatError {
    TransferError::UnknownTransfer {
        transfer_id: transfer_id.to_string(),
    }
    .into()
}

impl core::fmt::Debug for TransferSubmitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransferSubmitter")
            .field("config", &self.inner.config)
            .field("tracked", &self.read_records().len())
            .finish()
    }
}
