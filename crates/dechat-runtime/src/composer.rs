//! Message Composer
//!
//! Validates user intent and produces immutable, typed envelopes. Validation
//! order is fixed and short-circuits on the first failure:
//! 1. an active session is required;
//! 2. the recipient must parse, be non-zero and differ from the sender;
//! 3. the kind-specific payload check (text rules, storage upload, transfer
//!    submission).
//!
//! Uploads and submissions suspend; the captured session is re-checked after
//! each of them so an account switch mid-compose fails the call.

use std::sync::{Arc, Mutex, PoisonError};

use dechat_core::{
    Amount, ComposerConfig, DechatError, LogicalClock, MessageEnvelope, Payload, Result,
    TimeSource, Timestamp, ValidationError, WalletAddress,
};
use tracing::{debug, warn};

use crate::content::ContentAddresser;
use crate::identity::{Session, SessionAccessor};
use crate::transfer::TransferSubmitter;

/// Raw user input for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadInput {
    Text(String),
    Image(Vec<u8>),
    Transfer(Amount),
}

pub struct MessageComposer {
    session: SessionAccessor,
    content: ContentAddresser,
    transfers: TransferSubmitter,
    config: ComposerConfig,
    time_source: Arc<dyn TimeSource>,
    clock: Mutex<LogicalClock>,
}

impl MessageComposer {
    pub fn new(
        session: SessionAccessor,
        content: ContentAddresser,
        transfers: TransferSubmitter,
        config: ComposerConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            session,
            content,
            transfers,
            config,
            time_source,
            clock: Mutex::new(LogicalClock::new()),
        }
    }

    /// Build an envelope from the current session to `recipient`
    pub async fn compose(&self, recipient: &str, input: PayloadInput) -> Result<MessageEnvelope> {
        let session = self.session.require()?;
        let recipient = parse_recipient(recipient, &session)?;

        let payload = match input {
            PayloadInput::Text(text) => Payload::Text {
                body: self.validate_text(&text)?,
            },
            PayloadInput::Image(bytes) => {
                let stored = self.content.store(&bytes).await?;
                self.session.ensure_current(&session)?;
                Payload::ImageRef {
                    content_hash: stored.content_hash,
                    locator: stored.locator,
                }
            }
            PayloadInput::Transfer(amount) => {
                let record = self.transfers.submit(amount, recipient).await?;
                if let Err(err) = self.session.ensure_current(&session) {
                    if let Err(cancel_err) = self.transfers.cancel(&record.transfer_id).await {
                        warn!(
                            transfer_id = %record.transfer_id,
                            error = %cancel_err,
                            "Could not cancel transfer after session change"
                        );
                    }
                    self.transfers.release(&record.transfer_id).await;
                    return Err(err);
                }
                Payload::ValueTransfer {
                    amount,
                    transfer_id: record.transfer_id,
                }
            }
        };

        let envelope =
            MessageEnvelope::compose(session.address, recipient, payload, self.next_created_at());
        debug!(
            envelope_id = %envelope.id(),
            kind = %envelope.kind(),
            recipient = %recipient,
            "Composed envelope"
        );
        Ok(envelope)
    }

    /// Validate text and return the body to store
    pub fn validate_text(&self, text: &str) -> Result<String> {
        let body = text.trim();
        if body.is_empty() {
            return Err(ValidationError::EmptyText.into());
        }

        let length = body.chars().count();
        if length > self.config.max_text_length {
            return Err(ValidationError::TextTooLong {
                max: self.config.max_text_length,
                actual: length,
            }
            .into());
        }

        if self.config.strict_content_validation {
            if body.contains('\0') {
                return Err(ValidationError::InvalidContent {
                    reason: "contains null bytes".into(),
                }
                .into());
            }
            if body
                .chars()
                .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
            {
                return Err(ValidationError::InvalidContent {
                    reason: "contains control characters".into(),
                }
                .into());
            }
        }

        Ok(body.to_string())
    }

    fn next_created_at(&self) -> Timestamp {
        let now = self.time_source.now();
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(now)
    }
}

fn parse_recipient(recipient: &str, session: &Session) -> Result<WalletAddress> {
    let address: WalletAddress = recipient.parse()?;
    if address.is_zero() {
        return Err(DechatError::invalid_recipient("zero address"));
    }
    if address == session.address {
        return Err(ValidationError::SelfAddressed.into());
    }
    Ok(address)
}

impl core::fmt::Debug for MessageComposer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageComposer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
