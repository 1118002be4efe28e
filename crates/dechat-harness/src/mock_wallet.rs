//! Mock wallet provider
//!
//! Holds one active account which tests can switch, deny, or make
//! unavailable. Switches are also published on a change feed so the
//! runtime's `watch_wallet_changes` path can be exercised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dechat_core::{ChainId, ConnectionError, WalletAddress};
use dechat_runtime::{WalletAccount, WalletChange, WalletProvider};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
pub struct MockWallet {
    account: Mutex<WalletAccount>,
    deny_next: AtomicBool,
    unavailable: AtomicBool,
    delay: Mutex<Duration>,
    change_feed: Mutex<Option<mpsc::Sender<WalletChange>>>,
}

impl MockWallet {
    pub fn new(address: WalletAddress, chain_id: ChainId) -> Self {
        Self {
            account: Mutex::new(WalletAccount { address, chain_id }),
            deny_next: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            change_feed: Mutex::new(None),
        }
    }

    /// Wallet with a deterministic address derived from `seed`
    pub fn with_seed(seed: u8) -> Self {
        Self::new(WalletAddress::new([seed; 20]), ChainId::new(1))
    }

    pub fn address(&self) -> WalletAddress {
        self.account().address
    }

    pub fn account(&self) -> WalletAccount {
        *self.account.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject the next connection request as if the user clicked "deny"
    pub fn deny_next(&self) {
        self.deny_next.store(true, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every account request, e.g. to trigger connect timeouts
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Receiver for account/chain switch notifications
    pub fn change_feed(&self, buffer: usize) -> mpsc::Receiver<WalletChange> {
        let (tx, rx) = mpsc::channel(buffer);
        *self.change_feed.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Switch the active account, notifying the change feed if one is open
    pub async fn switch_account(&self, address: WalletAddress, chain_id: ChainId) -> WalletChange {
        let change = WalletAccount { address, chain_id };
        *self.account.lock().unwrap_or_else(PoisonError::into_inner) = change;
        debug!(%address, chain_id = chain_id.value(), "Mock wallet switched account");

        let feed = self
            .change_feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(feed) = feed {
            let _ = feed.send(change).await;
        }
        change
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_account(&self) -> Result<WalletAccount, ConnectionError> {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConnectionError::ProviderUnavailable {
                reason: "mock wallet offline".into(),
            });
        }
        if self.deny_next.swap(false, Ordering::SeqCst) {
            return Err(ConnectionError::UserDenied);
        }
        Ok(self.account())
    }
}
