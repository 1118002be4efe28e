//! DeChat Runtime
//!
//! Asynchronous services around the `dechat-core` domain:
//! - `IdentitySession`: the single wallet session and its read accessor
//! - `ContentAddresser`: image uploads through a storage gateway
//! - `TransferSubmitter`: value transfers and their chain lifecycle
//! - `MessageComposer`: validated envelope construction
//! - `EngineTask`: the task owning the reconciliation engine
//!
//! `RuntimeBuilder` wires them to the external collaborators and returns a
//! `DechatRuntime` handle for the presentation layer.

pub mod builder;
pub mod composer;
pub mod content;
pub mod engine;
pub mod identity;
pub mod transfer;
mod runtime;

pub use builder::{create_test_runtime, RuntimeBuilder};
pub use composer::{MessageComposer, PayloadInput};
pub use content::{ContentAddresser, StorageGateway, StoredContent};
pub use engine::{EngineCommand, EngineTask, EventSender};
pub use identity::{
    ConnectionState, IdentitySession, Session, SessionAccessor, WalletAccount, WalletChange,
    WalletProvider,
};
pub use runtime::{DechatRuntime, InboundHandle};
pub use transfer::{ChainClient, TransferRecord, TransferRequest, TransferSubmitter, TxReference};

// Re-export core types for convenience
pub use dechat_core::{
    Amount, ChainId, ChainState, ConnectionError, ContentHash, ConversationKey, DechatConfig,
    DechatError, DechatResult, DeliveryState, EngineEvent, EngineStats, EnvelopeId,
    HistorySnapshot, MessageEnvelope, MessageKind, Payload, StorageError, StoreDiff, StoreReader,
    Subscription, TimeSource, Timestamp, TransferError, TransferId, ValidationError,
    WalletAddress,
};
