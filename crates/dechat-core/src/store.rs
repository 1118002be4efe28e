//! Conversation Store
//!
//! Ordered per-conversation record of envelopes. The store has exactly one
//! writer (the reconciliation engine, which owns the `ConversationStore`)
//! and any number of readers holding a cloned `StoreReader`.
//!
//! Every mutation and its subscriber notification happen under the same
//! write lock, so a reader never observes an insert whose diff has not been
//! published, nor a diff describing state it cannot read.
//!
//! Subscriber queues are unbounded: the writer never waits on a reader and
//! never drops a diff, so a mirror built from the snapshot plus every diff
//! always equals the store. A reader that stops polling only grows its own
//! queue.

use core::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hashbrown::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::{DeliveryState, EnvelopeId, MessageEnvelope, OrderKey};
use crate::types::WalletAddress;

// ----------------------------------------------------------------------------
// Conversation Key
// ----------------------------------------------------------------------------

/// Unordered pair of participants identifying a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationKey {
    low: WalletAddress,
    high: WalletAddress,
}

impl ConversationKey {
    pub fn new(a: WalletAddress, b: WalletAddress) -> Self {
        // Ensure consistent ordering
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn participants(&self) -> (WalletAddress, WalletAddress) {
        (self.low, self.high)
    }

    pub fn involves(&self, address: &WalletAddress) -> bool {
        &self.low == address || &self.high == address
    }

    /// The participant that is not `local`, if `local` takes part
    pub fn peer_of(&self, local: &WalletAddress) -> Option<WalletAddress> {
        if &self.low == local {
            Some(self.high)
        } else if &self.high == local {
            Some(self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}↔{}", self.low.short(), self.high.short())
    }
}

// ----------------------------------------------------------------------------
// Diffs
// ----------------------------------------------------------------------------

/// Incremental change to a conversation's read model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreDiff {
    /// A new envelope now sits at `position`
    Inserted {
        key: ConversationKey,
        position: usize,
        envelope: MessageEnvelope,
    },
    /// The envelope at `position` changed its delivery state
    Updated {
        key: ConversationKey,
        position: usize,
        envelope: MessageEnvelope,
    },
}

impl StoreDiff {
    pub fn key(&self) -> ConversationKey {
        match self {
            StoreDiff::Inserted { key, .. } | StoreDiff::Updated { key, .. } => *key,
        }
    }

    pub fn envelope(&self) -> &MessageEnvelope {
        match self {
            StoreDiff::Inserted { envelope, .. } | StoreDiff::Updated { envelope, .. } => envelope,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            StoreDiff::Inserted { position, .. } | StoreDiff::Updated { position, .. } => *position,
        }
    }

    /// Apply this diff to a locally mirrored sequence
    pub fn apply_to(&self, view: &mut Vec<MessageEnvelope>) {
        match self {
            StoreDiff::Inserted {
                position, envelope, ..
            } => view.insert(*position, envelope.clone()),
            StoreDiff::Updated {
                position, envelope, ..
            } => {
                if let Some(slot) = view.get_mut(*position) {
                    *slot = envelope.clone();
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Subscription
// ----------------------------------------------------------------------------

/// Snapshot of a conversation plus the stream of diffs that follow it
#[derive(Debug)]
pub struct Subscription {
    pub key: ConversationKey,
    /// State of the conversation at the moment of subscribing
    pub snapshot: Vec<MessageEnvelope>,
    receiver: mpsc::UnboundedReceiver<StoreDiff>,
}

impl Subscription {
    /// Wait for the next diff; `None` once the store is gone
    pub async fn recv(&mut self) -> Option<StoreDiff> {
        self.receiver.recv().await
    }

    /// Take a diff if one is ready
    pub fn try_recv(&mut self) -> Option<StoreDiff> {
        self.receiver.try_recv().ok()
    }

    /// Drain every diff published so far
    pub fn drain(&mut self) -> Vec<StoreDiff> {
        let mut diffs = Vec::new();
        while let Ok(diff) = self.receiver.try_recv() {
            diffs.push(diff);
        }
        diffs
    }
}

// ----------------------------------------------------------------------------
// Store State
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreInner {
    /// Envelopes per conversation, sorted by `(created_at, id)`
    conversations: HashMap<ConversationKey, Vec<MessageEnvelope>>,
    /// Envelope id to its conversation and ordering key
    index: HashMap<EnvelopeId, (ConversationKey, OrderKey)>,
    subscribers: HashMap<ConversationKey, Vec<mpsc::UnboundedSender<StoreDiff>>>,
}

impl StoreInner {
    fn position_of(&self, id: &EnvelopeId) -> Option<(ConversationKey, usize)> {
        let (key, order_key) = self.index.get(id)?;
        let entries = self.conversations.get(key)?;
        entries
            .binary_search_by(|probe| probe.order_key().cmp(order_key))
            .ok()
            .map(|position| (*key, position))
    }

    fn publish(&mut self, diff: &StoreDiff) {
        let key = diff.key();
        if let Some(listeners) = self.subscribers.get_mut(&key) {
            listeners.retain(|tx| tx.send(diff.clone()).is_ok());
            if listeners.is_empty() {
                debug!(conversation = %key, "Last subscriber dropped");
                self.subscribers.remove(&key);
            }
        }
    }
}

fn read_lock(lock: &RwLock<StoreInner>) -> RwLockReadGuard<'_, StoreInner> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock(lock: &RwLock<StoreInner>) -> RwLockWriteGuard<'_, StoreInner> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

/// Single-writer handle to the conversation store
#[derive(Debug, Default)]
pub struct ConversationStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloneable read-only handle
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn contains(&self, id: &EnvelopeId) -> bool {
        read_lock(&self.inner).index.contains_key(id)
    }

    pub fn envelope(&self, id: &EnvelopeId) -> Option<MessageEnvelope> {
        let inner = read_lock(&self.inner);
        let (key, position) = inner.position_of(id)?;
        inner
            .conversations
            .get(&key)
            .and_then(|entries| entries.get(position))
            .cloned()
    }

    /// Insert a new envelope at its ordered position and notify subscribers.
    /// Returns `None` if an envelope with the same id is already present.
    pub(crate) fn insert(&mut self, envelope: MessageEnvelope) -> Option<StoreDiff> {
        let mut inner = write_lock(&self.inner);
        if inner.index.contains_key(&envelope.id()) {
            return None;
        }

        let key = envelope.conversation_key();
        let order_key = envelope.order_key();
        let entries = inner.conversations.entry(key).or_default();
        let position = entries.partition_point(|probe| probe.order_key() < order_key);
        entries.insert(position, envelope.clone());
        inner.index.insert(envelope.id(), (key, order_key));

        let diff = StoreDiff::Inserted {
            key,
            position,
            envelope,
        };
        inner.publish(&diff);
        Some(diff)
    }

    /// Merge an observed delivery state into a stored envelope.
    /// Returns `None` when the envelope is unknown or the state did not change.
    pub(crate) fn update_state(
        &mut self,
        id: &EnvelopeId,
        observed: &DeliveryState,
    ) -> Option<StoreDiff> {
        let mut inner = write_lock(&self.inner);
        let (key, position) = inner.position_of(id)?;
        let entry = inner
            .conversations
            .get_mut(&key)
            .and_then(|entries| entries.get_mut(position))?;

        if !entry.advance_state(observed) {
            return None;
        }

        let diff = StoreDiff::Updated {
            key,
            position,
            envelope: entry.clone(),
        };
        inner.publish(&diff);
        Some(diff)
    }

    /// Every stored envelope, conversation by conversation in order
    pub fn all_envelopes(&self) -> Vec<MessageEnvelope> {
        let inner = read_lock(&self.inner);
        let mut keys: Vec<_> = inner.conversations.keys().copied().collect();
        keys.sort();
        keys.iter()
            .filter_map(|key| inner.conversations.get(key))
            .flat_map(|entries| entries.iter().cloned())
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Read-only view of the conversation store
#[derive(Debug, Clone)]
pub struct StoreReader {
    inner: Arc<RwLock<StoreInner>>,
}

impl StoreReader {
    /// Ordered envelopes of a conversation (empty if unknown)
    pub fn get(&self, key: &ConversationKey) -> Vec<MessageEnvelope> {
        read_lock(&self.inner)
            .conversations
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscribe to a conversation. The snapshot and registration are taken
    /// under one lock, so no diff is missed or duplicated.
    pub fn subscribe(&self, key: ConversationKey) -> Subscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        let mut inner = write_lock(&self.inner);
        let snapshot = inner.conversations.get(&key).cloned().unwrap_or_default();
        inner.subscribers.entry(key).or_default().push(tx);
        Subscription {
            key,
            snapshot,
            receiver,
        }
    }

    pub fn envelope(&self, id: &EnvelopeId) -> Option<MessageEnvelope> {
        let inner = read_lock(&self.inner);
        let (key, position) = inner.position_of(id)?;
        inner
            .conversations
            .get(&key)
            .and_then(|entries| entries.get(position))
            .cloned()
    }

    /// All known conversations, sorted by key
    pub fn conversations(&self) -> Vec<ConversationKey> {
        let mut keys: Vec<_> = read_lock(&self.inner).conversations.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Conversations in which `address` participates
    pub fn conversations_for(&self, address: &WalletAddress) -> Vec<ConversationKey> {
        self.conversations()
            .into_iter()
            .filter(|key| key.involves(address))
            .collect()
    }

    pub fn conversation_len(&self, key: &ConversationKey) -> usize {
        read_lock(&self.inner)
            .conversations
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn total_envelopes(&self) -> usize {
        read_lock(&self.inner).index.len()
    }

    pub fn subscriber_count(&self, key: &ConversationKey) -> usize {
        read_lock(&self.inner)
            .subscribers
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeId, Payload};
    use crate::types::Timestamp;
    use uuid::Uuid;

    fn addr(byte: u8) -> WalletAddress {
        WalletAddress::new([byte; 20])
    }

    fn text_at(created_at: u64, id: u128) -> MessageEnvelope {
        MessageEnvelope::from_parts(
            EnvelopeId::from_uuid(Uuid::from_u128(id)),
            addr(1),
            addr(2),
            Payload::Text {
                body: format!("m{id}"),
            },
            Timestamp::new(created_at),
            DeliveryState::Pending,
        )
    }

    #[test]
    fn test_insert_orders_by_created_at_then_id() {
        let mut store = ConversationStore::new();
        let reader = store.reader();

        store.insert(text_at(20, 1)).unwrap();
        store.insert(text_at(10, 2)).unwrap();
        let diff = store.insert(text_at(20, 0)).unwrap();
        assert_eq!(diff.position(), 1);

        let key = ConversationKey::new(addr(1), addr(2));
        let ids: Vec<u128> = reader
            .get(&key)
            .iter()
            .map(|e| e.id().as_uuid().as_u128())
            .collect();
        assert_eq!(ids, vec![2, 0, 1]);
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let mut store = ConversationStore::new();
        assert!(store.insert(text_at(1, 7)).is_some());
        assert!(store.insert(text_at(1, 7)).is_none());
        assert_eq!(store.reader().total_envelopes(), 1);
    }

    #[test]
    fn test_subscribers_receive_diffs() {
        let mut store = ConversationStore::new();
        store.insert(text_at(1, 1)).unwrap();

        let key = ConversationKey::new(addr(1), addr(2));
        let mut subscription = store.reader().subscribe(key);
        assert_eq!(subscription.snapshot.len(), 1);

        store.insert(text_at(0, 2)).unwrap();
        store
            .update_state(
                &EnvelopeId::from_uuid(Uuid::from_u128(1)),
                &DeliveryState::Confirmed,
            )
            .unwrap();

        let mut mirror = subscription.snapshot.clone();
        let diffs = subscription.drain();
        assert_eq!(diffs.len(), 2);
        for diff in &diffs {
            diff.apply_to(&mut mirror);
        }
        assert_eq!(mirror, store.reader().get(&key));
        assert!(matches!(diffs[1], StoreDiff::Updated { position: 1, .. }));
    }

    #[test]
    fn test_idle_subscriber_misses_no_diffs() {
        let mut store = ConversationStore::new();
        let key = ConversationKey::new(addr(1), addr(2));
        let mut subscription = store.reader().subscribe(key);

        for id in 0..500u128 {
            store.insert(text_at(500 - id as u64, id)).unwrap();
        }
        store
            .update_state(
                &EnvelopeId::from_uuid(Uuid::from_u128(0)),
                &DeliveryState::Confirmed,
            )
            .unwrap();

        let mut mirror = subscription.snapshot.clone();
        let diffs = subscription.drain();
        assert_eq!(diffs.len(), 501);
        for diff in &diffs {
            diff.apply_to(&mut mirror);
        }
        assert_eq!(mirror, store.reader().get(&key));
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let mut store = ConversationStore::new();
        let key = ConversationKey::new(addr(1), addr(2));
        let reader = store.reader();
        drop(reader.subscribe(key));
        assert_eq!(reader.subscriber_count(&key), 1);

        store.insert(text_at(1, 1)).unwrap();
        assert_eq!(reader.subscriber_count(&key), 0);
    }

    #[test]
    fn test_update_unknown_or_unchanged_is_none() {
        let mut store = ConversationStore::new();
        let missing = EnvelopeId::from_uuid(Uuid::from_u128(99));
        assert!(store.update_state(&missing, &DeliveryState::Confirmed).is_none());

        store.insert(text_at(1, 1)).unwrap();
        let id = EnvelopeId::from_uuid(Uuid::from_u128(1));
        assert!(store.update_state(&id, &DeliveryState::Pending).is_none());
        assert!(store.update_state(&id, &DeliveryState::Confirmed).is_some());
        assert!(store.update_state(&id, &DeliveryState::Confirmed).is_none());
    }
}
