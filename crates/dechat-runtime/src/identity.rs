//! Wallet identity session
//!
//! Owns the single process-wide [`Session`]. All mutation goes through
//! [`IdentitySession`]'s connect/disconnect/invalidate operations; every
//! other component only holds a [`SessionAccessor`] and re-reads it instead
//! of caching a copy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dechat_core::{
    ChainId, ConnectionError, DechatError, Result, SessionConfig, TimeSource, Timestamp,
    WalletAddress,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Wallet Provider
// ----------------------------------------------------------------------------

/// Account reported by the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletAccount {
    pub address: WalletAddress,
    pub chain_id: ChainId,
}

/// Account or chain switch announced by the wallet
pub type WalletChange = WalletAccount;

/// External wallet that authenticates the local identity
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet for its active account, prompting the user if needed
    async fn request_account(&self) -> core::result::Result<WalletAccount, ConnectionError>;
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// The live authenticated wallet identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub address: WalletAddress,
    pub chain_id: ChainId,
    /// Bumped on every install; distinguishes a reconnect from the session it replaced
    pub generation: u64,
    pub connected_at: Timestamp,
}

impl Session {
    fn matches(&self, account: &WalletAccount) -> bool {
        self.address == account.address && self.chain_id == account.chain_id
    }
}

#[derive(Debug, Clone, Default)]
struct SessionState {
    connection_state: ConnectionState,
    session: Option<Session>,
}

// ----------------------------------------------------------------------------
// Accessor
// ----------------------------------------------------------------------------

/// Read-only view of the current session
#[derive(Debug, Clone)]
pub struct SessionAccessor {
    state: watch::Receiver<SessionState>,
}

impl SessionAccessor {
    pub fn current(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().connection_state
    }

    /// Whether `session` is still the installed session
    pub fn is_current(&self, session: &Session) -> bool {
        self.state
            .borrow()
            .session
            .as_ref()
            .is_some_and(|current| current.generation == session.generation)
    }

    /// Current session or `NoActiveSession`
    pub fn require(&self) -> Result<Session> {
        self.current()
            .ok_or(DechatError::Connection(ConnectionError::NoActiveSession))
    }

    /// Fail with `SessionInvalidated` unless `session` is still installed
    pub fn ensure_current(&self, session: &Session) -> Result<()> {
        if self.is_current(session) {
            Ok(())
        } else {
            Err(DechatError::session_invalidated(
                "wallet session changed while the operation was in flight",
            ))
        }
    }

    /// Wait until the session state changes; `false` once the owner is gone
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }
}

// ----------------------------------------------------------------------------
// Identity Session
// ----------------------------------------------------------------------------

struct IdentityInner {
    provider: Arc<dyn WalletProvider>,
    config: SessionConfig,
    time_source: Arc<dyn TimeSource>,
    state: watch::Sender<SessionState>,
    /// Serializes connect calls so two callers never race an install
    connect_lock: Mutex<()>,
    next_generation: AtomicU64,
}

/// Owner of the process-wide wallet session
#[derive(Clone)]
pub struct IdentitySession {
    inner: Arc<IdentityInner>,
}

impl IdentitySession {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        config: SessionConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(IdentityInner {
                provider,
                config,
                time_source,
                state,
                connect_lock: Mutex::new(()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn accessor(&self) -> SessionAccessor {
        SessionAccessor {
            state: self.inner.state.subscribe(),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.borrow().connection_state
    }

    /// Connect to the wallet.
    ///
    /// Returns the existing session if the wallet still reports the same
    /// account and chain; a different account replaces the old session.
    pub async fn connect(&self) -> Result<Session> {
        let _guard = self.inner.connect_lock.lock().await;

        let existing = self.current();
        if existing.is_none() {
            self.set_connection_state(ConnectionState::Connecting);
        }

        let account = match self.request_account().await {
            Ok(account) => account,
            Err(err) => {
                if existing.is_none() {
                    self.set_connection_state(ConnectionState::Disconnected);
                }
                warn!(error = %err, "Wallet connection failed");
                return Err(err);
            }
        };

        if let Some(session) = existing {
            if session.matches(&account) {
                debug!(address = %session.address, "Already connected");
                return Ok(session);
            }
            self.teardown("wallet reported a different account on reconnect");
        }

        if let Some(expected) = self.inner.config.expected_chain_id {
            if expected != account.chain_id {
                self.set_connection_state(ConnectionState::Disconnected);
                return Err(ConnectionError::WrongChain {
                    expected: expected.value(),
                    actual: account.chain_id.value(),
                }
                .into());
            }
        }

        let session = Session {
            address: account.address,
            chain_id: account.chain_id,
            generation: self.inner.next_generation.fetch_add(1, Ordering::SeqCst),
            connected_at: self.inner.time_source.now(),
        };
        self.inner.state.send_replace(SessionState {
            connection_state: ConnectionState::Connected,
            session: Some(session.clone()),
        });

        info!(
            address = %session.address,
            chain_id = session.chain_id.value(),
            generation = session.generation,
            "Wallet session established"
        );
        Ok(session)
    }

    /// Drop the session, if any
    pub fn disconnect(&self) {
        if self.teardown("disconnected by user") {
            info!("Wallet session closed");
        }
    }

    /// Tear down the session after an external change; in-flight compose
    /// calls holding the old session fail with `SessionInvalidated`.
    /// Returns `true` if a session was installed.
    pub fn invalidate(&self, reason: &str) -> bool {
        let removed = self.teardown(reason);
        if removed {
            warn!(reason, "Wallet session invalidated");
        }
        removed
    }

    /// React to a wallet account/chain switch. Any difference from the
    /// installed session tears it down completely; returns `true` if so.
    pub fn observe_wallet_change(&self, change: WalletChange) -> bool {
        let Some(session) = self.current() else {
            return false;
        };
        if session.matches(&change) {
            return false;
        }

        warn!(
            previous = %session.address,
            address = %change.address,
            chain_id = change.chain_id.value(),
            "Wallet switched"
        );
        self.invalidate("wallet account or chain changed")
    }

    /// Forward wallet change notifications into the session until the
    /// channel closes
    pub fn watch_wallet_changes(&self, mut changes: mpsc::Receiver<WalletChange>) -> JoinHandle<()> {
        let identity = self.clone();
        tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                identity.observe_wallet_change(change);
            }
            debug!("Wallet change feed closed");
        })
    }

    async fn request_account(&self) -> Result<WalletAccount> {
        let timeout = self.inner.config.connect_timeout();
        match tokio::time::timeout(timeout, self.inner.provider.request_account()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::Timeout {
                duration_ms: self.inner.config.connect_timeout_ms,
            }
            .into()),
        }
    }

    fn set_connection_state(&self, connection_state: ConnectionState) {
        self.inner
            .state
            .send_modify(|state| state.connection_state = connection_state);
    }

    fn teardown(&self, reason: &str) -> bool {
        let mut removed = false;
        self.inner.state.send_modify(|state| {
            removed = state.session.take().is_some();
            state.connection_state = ConnectionState::Disconnected;
        });
        if removed {
            debug!(reason, "Session torn down");
        }
        removed
    }
}

impl core::fmt::Debug for IdentitySession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentitySession")
            .field("connection_state", &self.connection_state())
            .field("session", &self.current())
            .finish()
    }
}
