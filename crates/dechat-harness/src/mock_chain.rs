//! Mock chain collaborator
//!
//! Tracks balances and transactions in memory. Tests either drive each
//! transaction by hand (`include`, `finalize`, `revert`) or enable
//! `auto_confirm`, in which case every watched transaction is included and
//! finalized (or randomly reverted) after a simulated block time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dechat_core::{Amount, ChainState, TransferError, TransferId, WalletAddress};
use dechat_runtime::{ChainClient, TransferRequest, TxReference};
use tokio::sync::mpsc;
use tracing::debug;

// ----------------------------------------------------------------------------
// Mock Chain Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockChainConfig {
    /// Balance of any address that was never funded explicitly
    pub default_balance: Amount,
    /// Advance watched transactions without test intervention
    pub auto_confirm: bool,
    /// Simulated block time range (min, max) in milliseconds for auto-confirm
    pub block_time_range: (u64, u64),
    /// Probability that an auto-confirmed transaction reverts instead
    pub revert_rate: f64,
}

impl Default for MockChainConfig {
    fn default() -> Self {
        Self {
            default_balance: Amount::from_ether(100),
            auto_confirm: false,
            block_time_range: (5, 20),
            revert_rate: 0.0,
        }
    }
}

impl MockChainConfig {
    /// Every transaction finalizes quickly on its own
    pub fn auto_confirming() -> Self {
        Self {
            auto_confirm: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct MockChainStats {
    pub submitted: AtomicU64,
    pub finalized: AtomicU64,
    pub reverted: AtomicU64,
    pub cancelled: AtomicU64,
}

// ----------------------------------------------------------------------------
// Chain State
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct MockTx {
    request: TransferRequest,
    state: ChainState,
    watcher: Option<mpsc::Sender<ChainState>>,
    /// Notifications produced before anyone watched
    backlog: Vec<ChainState>,
}

#[derive(Debug, Default)]
struct ChainInner {
    balances: HashMap<WalletAddress, Amount>,
    txs: HashMap<TxReference, MockTx>,
    by_transfer: HashMap<TransferId, TxReference>,
}

#[derive(Debug, Clone)]
pub struct MockChain {
    config: MockChainConfig,
    inner: Arc<Mutex<ChainInner>>,
    reject_next: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
    submission_delay: Arc<Mutex<Duration>>,
    stats: Arc<MockChainStats>,
}

impl MockChain {
    pub fn new(config: MockChainConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(ChainInner::default())),
            reject_next: Arc::new(AtomicBool::new(false)),
            unavailable: Arc::new(AtomicBool::new(false)),
            submission_delay: Arc::new(Mutex::new(Duration::ZERO)),
            stats: Arc::new(MockChainStats::default()),
        }
    }

    pub fn auto_confirming() -> Self {
        Self::new(MockChainConfig::auto_confirming())
    }

    pub fn set_balance(&self, address: WalletAddress, amount: Amount) {
        self.lock().balances.insert(address, amount);
    }

    pub fn balance_of(&self, address: &WalletAddress) -> Amount {
        self.lock()
            .balances
            .get(address)
            .copied()
            .unwrap_or(self.config.default_balance)
    }

    /// Reject the next submission as if the user declined to sign it
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Hold every submission for `delay` before the chain answers
    pub fn set_submission_delay(&self, delay: Duration) {
        *self
            .submission_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn stats(&self) -> Arc<MockChainStats> {
        Arc::clone(&self.stats)
    }

    pub fn tx_for(&self, transfer_id: &TransferId) -> Option<TxReference> {
        self.lock().by_transfer.get(transfer_id).cloned()
    }

    pub fn state_of(&self, transfer_id: &TransferId) -> Option<ChainState> {
        let inner = self.lock();
        let tx = inner.by_transfer.get(transfer_id)?;
        inner.txs.get(tx).map(|mock| mock.state)
    }

    pub async fn include(&self, transfer_id: &TransferId) -> Result<(), TransferError> {
        self.advance(transfer_id, ChainState::Included).await
    }

    pub async fn finalize(&self, transfer_id: &TransferId) -> Result<(), TransferError> {
        self.advance(transfer_id, ChainState::Finalized).await
    }

    pub async fn revert(&self, transfer_id: &TransferId) -> Result<(), TransferError> {
        self.advance(transfer_id, ChainState::Reverted).await
    }

    /// Include then finalize
    pub async fn confirm(&self, transfer_id: &TransferId) -> Result<(), TransferError> {
        self.include(transfer_id).await?;
        self.finalize(transfer_id).await
    }

    /// Deliver a notification without validating it against the chain's own
    /// state, to simulate a misbehaving node
    pub async fn notify_raw(&self, transfer_id: &TransferId, state: ChainState) {
        let watcher = {
            let inner = self.lock();
            inner
                .by_transfer
                .get(transfer_id)
                .and_then(|tx| inner.txs.get(tx))
                .and_then(|mock| mock.watcher.clone())
        };
        if let Some(watcher) = watcher {
            let _ = watcher.send(state).await;
        }
    }

    /// Move a transaction to `next` and notify its watcher
    pub async fn advance(&self, transfer_id: &TransferId, next: ChainState) -> Result<(), TransferError> {
        let watcher = {
            let mut inner = self.lock();
            let tx = inner
                .by_transfer
                .get(transfer_id)
                .cloned()
                .ok_or_else(|| TransferError::UnknownTransfer {
                    transfer_id: transfer_id.to_string(),
                })?;
            let Some(mock) = inner.txs.get_mut(&tx) else {
                return Err(TransferError::UnknownTransfer {
                    transfer_id: transfer_id.to_string(),
                });
            };
            if !mock.state.can_transition_to(next) {
                return Err(TransferError::IllegalTransition {
                    from: mock.state.to_string(),
                    to: next.to_string(),
                });
            }
            mock.state = next;
            let watcher = mock.watcher.clone();
            if watcher.is_none() {
                mock.backlog.push(next);
            }

            let request = mock.request.clone();
            match next {
                ChainState::Finalized => {
                    self.stats.finalized.fetch_add(1, Ordering::Relaxed);
                    let balance = inner
                        .balances
                        .entry(request.to)
                        .or_insert(self.config.default_balance);
                    *balance = balance.saturating_add(request.amount);
                }
                ChainState::Reverted => {
                    self.stats.reverted.fetch_add(1, Ordering::Relaxed);
                    refund(&mut inner, &request, self.config.default_balance);
                }
                ChainState::Submitted | ChainState::Included => {}
            }
            watcher
        };

        debug!(%transfer_id, state = %next, "Mock chain advanced transaction");
        if let Some(watcher) = watcher {
            let _ = watcher.send(next).await;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_auto_confirm(&self, transfer_id: TransferId) {
        let chain = self.clone();
        tokio::spawn(async move {
            let (min, max) = chain.config.block_time_range;
            tokio::time::sleep(Duration::from_millis(fastrand::u64(min..=max))).await;

            let outcome = if fastrand::f64() < chain.config.revert_rate {
                chain.revert(&transfer_id).await
            } else {
                match chain.include(&transfer_id).await {
                    Ok(()) => {
                        tokio::time::sleep(Duration::from_millis(fastrand::u64(min..=max))).await;
                        chain.finalize(&transfer_id).await
                    }
                    Err(err) => Err(err),
                }
            };
            if let Err(err) = outcome {
                debug!(%transfer_id, error = %err, "Auto-confirm stopped");
            }
        });
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new(MockChainConfig::default())
    }
}

fn refund(inner: &mut ChainInner, request: &TransferRequest, default_balance: Amount) {
    let balance = inner.balances.entry(request.from).or_insert(default_balance);
    *balance = balance.saturating_add(request.amount);
}

fn random_tx_reference() -> TxReference {
    let bytes: Vec<u8> = (0..32).map(|_| fastrand::u8(..)).collect();
    TxReference::new(format!("0x{}", hex::encode(bytes)))
}

#[async_trait]
impl ChainClient for MockChain {
    async fn send_transfer(&self, request: &TransferRequest) -> Result<TxReference, TransferError> {
        let delay = *self
            .submission_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransferError::ChainUnavailable {
                reason: "mock RPC endpoint offline".into(),
            });
        }
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(TransferError::UserRejected);
        }

        let mut inner = self.lock();
        let balance = inner
            .balances
            .entry(request.from)
            .or_insert(self.config.default_balance);
        let Some(remaining) = balance.checked_sub(request.amount) else {
            return Err(TransferError::InsufficientFunds {
                requested: request.amount,
                available: *balance,
            });
        };
        *balance = remaining;

        let tx = random_tx_reference();
        inner.txs.insert(
            tx.clone(),
            MockTx {
                request: request.clone(),
                state: ChainState::Submitted,
                watcher: None,
                backlog: Vec::new(),
            },
        );
        inner.by_transfer.insert(request.transfer_id, tx.clone());
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        debug!(transfer_id = %request.transfer_id, %tx, "Mock chain accepted transfer");
        Ok(tx)
    }

    async fn watch(
        &self,
        tx: &TxReference,
        notifications: mpsc::Sender<ChainState>,
    ) -> Result<(), TransferError> {
        let (backlog, transfer_id) = {
            let mut inner = self.lock();
            let mock = inner
                .txs
                .get_mut(tx)
                .ok_or_else(|| TransferError::UnknownTransfer {
                    transfer_id: tx.to_string(),
                })?;
            mock.watcher = Some(notifications.clone());
            (std::mem::take(&mut mock.backlog), mock.request.transfer_id)
        };

        for state in backlog {
            let _ = notifications.send(state).await;
        }

        if self.config.auto_confirm {
            self.spawn_auto_confirm(transfer_id);
        }
        Ok(())
    }

    async fn cancel(&self, tx: &TxReference) -> Result<(), TransferError> {
        let mut inner = self.lock();
        let mock = inner
            .txs
            .get_mut(tx)
            .ok_or_else(|| TransferError::UnknownTransfer {
                transfer_id: tx.to_string(),
            })?;
        if mock.state != ChainState::Submitted {
            return Err(TransferError::CancellationRejected {
                state: mock.state.to_string(),
            });
        }
        mock.state = ChainState::Reverted;
        let request = mock.request.clone();
        refund(&mut inner, &request, self.config.default_balance);
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(%tx, "Mock chain dropped transaction");
        Ok(())
    }
}
