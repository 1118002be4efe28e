//! DeChat Harness
//!
//! In-memory stand-ins for the external collaborators of the messaging
//! engine: a wallet, a content-addressed store, a chain, a controllable
//! clock and a peer feed that delivers inbound envelopes with configurable
//! duplication and reordering. Failure modes are scripted or drawn from
//! `fastrand` so tests can exercise every error path.

pub mod mock_chain;
pub mod mock_peer;
pub mod mock_storage;
pub mod mock_time;
pub mod mock_wallet;

pub use mock_chain::{MockChain, MockChainConfig, MockChainStats};
pub use mock_peer::{MockPeer, MockPeerConfig};
pub use mock_storage::{MockStorage, MockStorageConfig, MockStorageStats};
pub use mock_time::MockTimeSource;
pub use mock_wallet::MockWallet;
