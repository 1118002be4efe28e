//! Mock remote peer
//!
//! Builds envelopes as a remote wallet would send them and delivers them
//! through the runtime's inbound handle, optionally duplicated and
//! reordered the way an unreliable transport would.

use std::sync::{Mutex, PoisonError};

use dechat_core::{
    DeliveryState, EnvelopeId, LogicalClock, MessageEnvelope, Payload, Result, Timestamp,
    WalletAddress,
};
use dechat_runtime::InboundHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MockPeerConfig {
    /// Probability that an envelope is delivered twice
    pub duplication_rate: f64,
    /// Maximum reorder distance for out-of-order delivery
    pub max_reorder_distance: usize,
    /// Seed for the delivery RNG
    pub seed: u64,
}

impl Default for MockPeerConfig {
    fn default() -> Self {
        Self {
            duplication_rate: 0.0,
            max_reorder_distance: 0,
            seed: 7,
        }
    }
}

impl MockPeerConfig {
    /// Duplicates a third of all envelopes and shuffles within a window of 4
    pub fn unreliable(seed: u64) -> Self {
        Self {
            duplication_rate: 0.3,
            max_reorder_distance: 4,
            seed,
        }
    }
}

#[derive(Debug)]
pub struct MockPeer {
    address: WalletAddress,
    config: MockPeerConfig,
    rng: Mutex<fastrand::Rng>,
    clock: Mutex<LogicalClock>,
}

impl MockPeer {
    pub fn new(address: WalletAddress, config: MockPeerConfig) -> Self {
        let rng = fastrand::Rng::with_seed(config.seed);
        Self {
            address,
            config,
            rng: Mutex::new(rng),
            clock: Mutex::new(LogicalClock::new()),
        }
    }

    pub fn address(&self) -> WalletAddress {
        self.address
    }

    /// Text envelope from this peer to `to`, stamped by the peer's own clock
    pub fn text(&self, to: WalletAddress, body: &str, wall_now: Timestamp) -> MessageEnvelope {
        let created_at = self
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(wall_now);
        MessageEnvelope::from_parts(
            EnvelopeId::generate(),
            self.address,
            to,
            Payload::Text {
                body: body.to_string(),
            },
            created_at,
            DeliveryState::Confirmed,
        )
    }

    /// Deliver envelopes through `inbound`, applying duplication and
    /// reordering. Returns the number of events actually sent.
    pub async fn deliver(
        &self,
        inbound: &InboundHandle,
        envelopes: Vec<MessageEnvelope>,
    ) -> Result<usize> {
        let schedule = self.schedule(envelopes);
        let count = schedule.len();
        for envelope in schedule {
            inbound.deliver(envelope).await?;
        }
        debug!(peer = %self.address, events = count, "Mock peer delivered envelopes");
        Ok(count)
    }

    fn schedule(&self, envelopes: Vec<MessageEnvelope>) -> Vec<MessageEnvelope> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let mut schedule = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            if rng.f64() < self.config.duplication_rate {
                schedule.push(envelope.clone());
            }
            schedule.push(envelope);
        }

        let window = self.config.max_reorder_distance;
        if window > 0 {
            for start in (0..schedule.len()).step_by(window) {
                let end = (start + window).min(schedule.len());
                rng.shuffle(&mut schedule[start..end]);
            }
        }
        schedule
    }
}
