//! Message envelopes
//!
//! An envelope is the atomic unit of communication: immutable addressing,
//! kind and payload fixed at construction, plus a delivery state that only
//! the reconciliation engine advances.

use core::cmp::Ordering;
use core::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::ConversationKey;
use crate::types::{Amount, ContentHash, Timestamp, WalletAddress};

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Locally generated, collision-free envelope identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an on-chain value transfer, assigned at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Kind and Payload
// ----------------------------------------------------------------------------

/// Closed set of message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    ImageRef,
    ValueTransfer,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::ImageRef => write!(f, "image"),
            MessageKind::ValueTransfer => write!(f, "transfer"),
        }
    }
}

/// Kind-specific envelope content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text {
        body: String,
    },
    ImageRef {
        content_hash: ContentHash,
        locator: String,
    },
    ValueTransfer {
        amount: Amount,
        transfer_id: TransferId,
    },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Text { .. } => MessageKind::Text,
            Payload::ImageRef { .. } => MessageKind::ImageRef,
            Payload::ValueTransfer { .. } => MessageKind::ValueTransfer,
        }
    }

    /// Transfer referenced by this payload, if any
    pub fn transfer_id(&self) -> Option<TransferId> {
        match self {
            Payload::ValueTransfer { transfer_id, .. } => Some(*transfer_id),
            Payload::Text { .. } | Payload::ImageRef { .. } => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery State
// ----------------------------------------------------------------------------

/// Delivery status of an envelope. `Confirmed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed(String),
}

impl DeliveryState {
    pub fn failed<T: Into<String>>(reason: T) -> Self {
        DeliveryState::Failed(reason.into())
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryState::Pending)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryState::Pending)
    }

    /// Merge an observed state into this one.
    ///
    /// Pending may move to either terminal state; terminal states absorb
    /// everything after them. Returns `true` if the state changed.
    pub fn advance(&mut self, observed: &DeliveryState) -> bool {
        if self.is_terminal() || !observed.is_terminal() {
            return false;
        }
        *self = observed.clone();
        true
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryState::Pending => write!(f, "pending"),
            DeliveryState::Confirmed => write!(f, "confirmed"),
            DeliveryState::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

// ----------------------------------------------------------------------------
// Ordering Key
// ----------------------------------------------------------------------------

/// Position of an envelope within a conversation: `(createdAt, id)` lexicographic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub created_at: Timestamp,
    pub id: EnvelopeId,
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// One unit of sent or received content plus its delivery status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    id: EnvelopeId,
    sender: WalletAddress,
    recipient: WalletAddress,
    payload: Payload,
    created_at: Timestamp,
    delivery_state: DeliveryState,
}

impl MessageEnvelope {
    /// Build a locally composed envelope with a fresh id.
    ///
    /// Text needs no network confirmation, so it is `Confirmed` as soon as it
    /// is constructed; images and transfers start `Pending`.
    pub fn compose(
        sender: WalletAddress,
        recipient: WalletAddress,
        payload: Payload,
        created_at: Timestamp,
    ) -> Self {
        let delivery_state = match payload.kind() {
            MessageKind::Text => DeliveryState::Confirmed,
            MessageKind::ImageRef | MessageKind::ValueTransfer => DeliveryState::Pending,
        };

        Self {
            id: EnvelopeId::generate(),
            sender,
            recipient,
            payload,
            created_at,
            delivery_state,
        }
    }

    /// Rebuild an envelope from externally supplied parts (peer delivery, history reload)
    pub fn from_parts(
        id: EnvelopeId,
        sender: WalletAddress,
        recipient: WalletAddress,
        payload: Payload,
        created_at: Timestamp,
        delivery_state: DeliveryState,
    ) -> Self {
        Self {
            id,
            sender,
            recipient,
            payload,
            created_at,
            delivery_state,
        }
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn sender(&self) -> WalletAddress {
        self.sender
    }

    pub fn recipient(&self) -> WalletAddress {
        self.recipient
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn delivery_state(&self) -> &DeliveryState {
        &self.delivery_state
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            created_at: self.created_at,
            id: self.id,
        }
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.sender, self.recipient)
    }

    /// Advance the delivery state monotonically. Crate-private: only the
    /// reconciliation engine mutates envelopes after construction.
    pub(crate) fn advance_state(&mut self, observed: &DeliveryState) -> bool {
        self.delivery_state.advance(observed)
    }
}
