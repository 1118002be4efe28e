//! Reconciliation Engine
//!
//! Merges locally composed envelopes, transfer lifecycle events, storage
//! outcomes and inbound peer deliveries into the canonical per-conversation
//! timeline held by the [`ConversationStore`].
//!
//! Events from different sources arrive in any interleaving. The engine
//! restores a consistent view by:
//! 1. deduplicating on envelope id, merging delivery state monotonically;
//! 2. inserting new envelopes at their `(created_at, id)` position;
//! 3. buffering outcomes that refer to envelopes not seen yet and applying
//!    them the moment the envelope is inserted.
//!
//! The engine never returns errors: asynchronous failures become a terminal
//! `Failed` delivery state on the envelope itself.

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::envelope::{DeliveryState, EnvelopeId, MessageEnvelope, TransferId};
use crate::errors::{ChainOutcomeError, StorageError};
use crate::persistence::HistorySnapshot;
use crate::store::{ConversationStore, StoreDiff, StoreReader};

// ----------------------------------------------------------------------------
// Chain State
// ----------------------------------------------------------------------------

/// Lifecycle of an on-chain value transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChainState {
    Submitted,
    Included,
    Finalized,
    Reverted,
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Finalized | ChainState::Reverted)
    }

    /// Legal transitions: `Submitted → Included → Finalized`, `Submitted → Reverted`
    pub fn can_transition_to(&self, next: ChainState) -> bool {
        matches!(
            (self, next),
            (ChainState::Submitted, ChainState::Included)
                | (ChainState::Submitted, ChainState::Reverted)
                | (ChainState::Included, ChainState::Finalized)
        )
    }

    /// Delivery state an envelope takes on when its transfer reaches this state
    pub fn delivery_outcome(&self) -> Option<DeliveryState> {
        match self {
            ChainState::Submitted | ChainState::Included => None,
            ChainState::Finalized => Some(DeliveryState::Confirmed),
            ChainState::Reverted => Some(DeliveryState::failed(
                ChainOutcomeError::Reverted { tx_reference: None }.to_string(),
            )),
        }
    }
}

impl core::fmt::Display for ChainState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ChainState::Submitted => "submitted",
            ChainState::Included => "included",
            ChainState::Finalized => "finalized",
            ChainState::Reverted => "reverted",
        };
        write!(f, "{name}")
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Discrete inputs to the engine, each from an independently ordered source
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Optimistic insert of a locally composed envelope
    Composed(MessageEnvelope),
    /// Envelope sent by a peer
    Inbound(MessageEnvelope),
    /// Envelope replayed from persisted history
    Restored(MessageEnvelope),
    /// Transfer lifecycle change reported by the submitter
    TransferUpdate {
        transfer_id: TransferId,
        state: ChainState,
        tx_reference: Option<String>,
    },
    /// Result of the storage upload backing an image envelope
    StorageOutcome {
        envelope_id: EnvelopeId,
        result: Result<(), StorageError>,
    },
    /// A submitted transfer will never get an envelope (compose was aborted)
    TransferAbandoned { transfer_id: TransferId },
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Envelopes inserted into a conversation
    pub inserted: usize,
    /// Envelope events whose id was already present
    pub duplicates: usize,
    /// Delivery state changes applied
    pub state_updates: usize,
    /// Outcomes that arrived after a terminal state or carried no change
    pub stale_events: usize,
    /// Outcomes held until their envelope arrives
    pub buffered_outcomes: usize,
    /// Retryable storage failures observed
    pub storage_retries: usize,
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Single owner of the conversation store; all mutation flows through `apply`
#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    store: ConversationStore,
    /// Transfer to the envelope carrying it
    transfer_links: HashMap<TransferId, EnvelopeId>,
    /// Latest chain state seen per transfer
    transfer_states: HashMap<TransferId, (ChainState, Option<String>)>,
    /// Terminal outcomes waiting for their envelope
    pending_outcomes: HashMap<EnvelopeId, DeliveryState>,
    /// Storage retry counters per image envelope
    storage_attempts: HashMap<EnvelopeId, u32>,
    stats: EngineStats,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only handle for the presentation layer
    pub fn reader(&self) -> StoreReader {
        self.store.reader()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Latest chain state observed for a transfer
    pub fn transfer_state(&self, transfer_id: &TransferId) -> Option<ChainState> {
        self.transfer_states.get(transfer_id).map(|(state, _)| *state)
    }

    /// Transaction reference reported for a transfer, once known
    pub fn tx_reference(&self, transfer_id: &TransferId) -> Option<&str> {
        self.transfer_states
            .get(transfer_id)
            .and_then(|(_, tx)| tx.as_deref())
    }

    pub fn storage_attempts(&self, envelope_id: &EnvelopeId) -> u32 {
        self.storage_attempts.get(envelope_id).copied().unwrap_or(0)
    }

    /// Apply one event, returning the diffs it published
    pub fn apply(&mut self, event: EngineEvent) -> Vec<StoreDiff> {
        match event {
            EngineEvent::Composed(envelope)
            | EngineEvent::Inbound(envelope)
            | EngineEvent::Restored(envelope) => self.merge_envelope(envelope),
            EngineEvent::TransferUpdate {
                transfer_id,
                state,
                tx_reference,
            } => self.apply_transfer_update(transfer_id, state, tx_reference),
            EngineEvent::StorageOutcome {
                envelope_id,
                result,
            } => self.apply_storage_outcome(envelope_id, result),
            EngineEvent::TransferAbandoned { transfer_id } => {
                self.forget_transfer(transfer_id);
                Vec::new()
            }
        }
    }

    /// Apply a batch of events in order
    pub fn apply_all<I>(&mut self, events: I) -> Vec<StoreDiff>
    where
        I: IntoIterator<Item = EngineEvent>,
    {
        events
            .into_iter()
            .flat_map(|event| self.apply(event))
            .collect()
    }

    /// Replay persisted history through the live dedup and ordering path
    pub fn restore(&mut self, snapshot: HistorySnapshot) -> Vec<StoreDiff> {
        let count = snapshot.envelopes.len();
        let diffs = self.apply_all(snapshot.envelopes.into_iter().map(EngineEvent::Restored));
        info!(envelopes = count, inserted = diffs.len(), "Restored conversation history");
        diffs
    }

    /// Capture the full history for persistence
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot::new(self.store.all_envelopes())
    }

    // ------------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------------

    fn merge_envelope(&mut self, envelope: MessageEnvelope) -> Vec<StoreDiff> {
        let id = envelope.id();

        if self.store.contains(&id) {
            // Duplicate delivery: only the delivery state may move forward
            self.stats.duplicates += 1;
            debug!(envelope_id = %id, "Duplicate envelope event");
            return self.update_state(&id, envelope.delivery_state());
        }

        let transfer_id = envelope.payload().transfer_id();
        if let Some(transfer_id) = transfer_id {
            self.transfer_links.insert(transfer_id, id);
        }

        let mut diffs = Vec::new();
        if let Some(diff) = self.store.insert(envelope) {
            self.stats.inserted += 1;
            debug!(envelope_id = %id, position = diff.position(), "Inserted envelope");
            diffs.push(diff);
        }

        // Outcomes that overtook the envelope
        let transfer_outcome = transfer_id
            .and_then(|transfer_id| self.transfer_states.get(&transfer_id))
            .and_then(|(state, _)| state.delivery_outcome());
        let buffered = self.pending_outcomes.remove(&id).or(transfer_outcome);
        if let Some(outcome) = buffered {
            diffs.extend(self.update_state(&id, &outcome));
        }

        diffs
    }

    fn apply_transfer_update(
        &mut self,
        transfer_id: TransferId,
        state: ChainState,
        tx_reference: Option<String>,
    ) -> Vec<StoreDiff> {
        let tx_reference = match self.transfer_states.get(&transfer_id) {
            Some((previous, known_tx)) => {
                if previous.is_terminal() || !previous.can_transition_to(state) {
                    self.stats.stale_events += 1;
                    debug!(%transfer_id, from = %previous, to = %state, "Ignoring stale transfer update");
                    return Vec::new();
                }
                tx_reference.or_else(|| known_tx.clone())
            }
            None => tx_reference,
        };
        self.transfer_states.insert(transfer_id, (state, tx_reference));

        let Some(outcome) = state.delivery_outcome() else {
            return Vec::new();
        };

        match self.transfer_links.get(&transfer_id).copied() {
            Some(envelope_id) => {
                if matches!(state, ChainState::Reverted) {
                    warn!(%transfer_id, %envelope_id, "Transfer reverted");
                }
                self.update_state(&envelope_id, &outcome)
            }
            None => {
                // The envelope is not known yet; keep the outcome keyed by transfer
                self.stats.buffered_outcomes += 1;
                debug!(%transfer_id, "Buffering transfer outcome for unseen envelope");
                Vec::new()
            }
        }
    }

    fn apply_storage_outcome(
        &mut self,
        envelope_id: EnvelopeId,
        result: Result<(), StorageError>,
    ) -> Vec<StoreDiff> {
        let outcome = match result {
            Ok(()) => DeliveryState::Confirmed,
            Err(err) if err.is_retryable() => {
                let attempts = self.storage_attempts.entry(envelope_id).or_insert(0);
                *attempts += 1;
                self.stats.storage_retries += 1;
                warn!(%envelope_id, attempts = *attempts, error = %err, "Retryable storage failure");
                return Vec::new();
            }
            Err(err) => DeliveryState::failed(err.to_string()),
        };

        if self.store.contains(&envelope_id) {
            self.update_state(&envelope_id, &outcome)
        } else {
            self.buffer_outcome(envelope_id, outcome);
            Vec::new()
        }
    }

    fn forget_transfer(&mut self, transfer_id: TransferId) {
        if self.transfer_links.contains_key(&transfer_id) {
            debug!(%transfer_id, "Abandoned transfer already has an envelope; keeping it");
            return;
        }
        if self.transfer_states.remove(&transfer_id).is_some() {
            debug!(%transfer_id, "Dropped state of abandoned transfer");
        }
    }

    fn buffer_outcome(&mut self, envelope_id: EnvelopeId, outcome: DeliveryState) {
        self.stats.buffered_outcomes += 1;
        self.pending_outcomes
            .entry(envelope_id)
            .and_modify(|existing| {
                existing.advance(&outcome);
            })
            .or_insert(outcome);
    }

    fn update_state(&mut self, id: &EnvelopeId, observed: &DeliveryState) -> Vec<StoreDiff> {
        match self.store.update_state(id, observed) {
            Some(diff) => {
                self.stats.state_updates += 1;
                debug!(envelope_id = %id, state = %observed, "Delivery state updated");
                vec![diff]
            }
            None => {
                if observed.is_terminal() {
                    self.stats.stale_events += 1;
                }
                Vec::new()
            }
        }
    }
}
