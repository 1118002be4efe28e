//! DeChat Core
//!
//! Synchronous domain layer of the wallet-identified messaging engine: wallet
//! addresses and amounts, message envelopes, the ordered conversation store,
//! the reconciliation engine that merges asynchronous outcomes into it, and
//! history persistence.
//!
//! Nothing in this crate performs I/O against wallets, storage networks or
//! chains; the async collaborators live in `dechat-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod envelope;
pub mod errors;
pub mod persistence;
pub mod reconcile;
pub mod store;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{
    ChannelConfig, ComposerConfig, DechatConfig, PersistenceConfig, SessionConfig, StorageConfig,
    TransferConfig,
};
pub use envelope::{
    DeliveryState, EnvelopeId, MessageEnvelope, MessageKind, OrderKey, Payload, TransferId,
};
pub use errors::{
    ChainOutcomeError, ConnectionError, DechatError, DechatResult, Result, StorageError,
    TransferError, ValidationError,
};
pub use persistence::{HistorySnapshot, SCHEMA_VERSION};
pub use reconcile::{ChainState, EngineEvent, EngineStats, ReconciliationEngine};
pub use store::{ConversationKey, ConversationStore, StoreDiff, StoreReader, Subscription};
pub use types::{
    Amount, ChainId, ContentHash, LogicalClock, SystemTimeSource, TimeSource, Timestamp,
    WalletAddress,
};
