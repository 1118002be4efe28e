//! Core value types for DeChat
//!
//! This module defines the fundamental value types used throughout the
//! messaging core, using newtype patterns for validation and type safety.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::ValidationError;

// ----------------------------------------------------------------------------
// Wallet Address
// ----------------------------------------------------------------------------

/// A 20-byte chain account identifier, normalized to lowercase on display
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress([u8; 20]);

impl WalletAddress {
    /// Byte length of an address
    pub const LEN: usize = 20;

    /// The all-zero address, never a valid recipient
    pub const ZERO: Self = Self([0u8; 20]);

    /// Create an address from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Short form for log lines, e.g. `0x1234…cdef`
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for WalletAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let clean_str = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if clean_str.len() != Self::LEN * 2 {
            return Err(ValidationError::InvalidRecipient {
                reason: format!(
                    "expected {} hex digits, got {}",
                    Self::LEN * 2,
                    clean_str.len()
                ),
            });
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(clean_str, &mut bytes).map_err(|_| {
            ValidationError::InvalidRecipient {
                reason: "address contains non-hex characters".into(),
            }
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.to_string()
    }
}

// ----------------------------------------------------------------------------
// Chain Identifier
// ----------------------------------------------------------------------------

/// EIP-155 style chain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(u64);

impl ChainId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Amount
// ----------------------------------------------------------------------------

const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;
const ETHER_DECIMALS: usize = 18;

/// Native currency amount in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Create an amount from wei
    pub const fn from_wei(wei: u128) -> Self {
        Self(wei)
    }

    /// Create an amount from whole ether
    pub fn from_ether(ether: u64) -> Self {
        Self(ether as u128 * WEI_PER_ETHER)
    }

    /// Parse a decimal ether string such as `"1.0"` or `"0.25"`
    pub fn parse_ether(s: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidAmount {
            reason: format!("{reason}: {s:?}"),
        };

        let trimmed = s.trim();
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("empty amount"));
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid("not a decimal number"));
        }
        if fraction.len() > ETHER_DECIMALS {
            return Err(invalid("more than 18 fractional digits"));
        }

        let whole_wei = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u128>()
                .ok()
                .and_then(|w| w.checked_mul(WEI_PER_ETHER))
                .ok_or_else(|| invalid("amount overflows"))?
        };

        let fraction_wei = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{fraction:0<width$}", width = ETHER_DECIMALS);
            padded
                .parse::<u128>()
                .map_err(|_| invalid("not a decimal number"))?
        };

        whole_wei
            .checked_add(fraction_wei)
            .map(Self)
            .ok_or_else(|| invalid("amount overflows"))
    }

    pub fn as_wei(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Self(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / WEI_PER_ETHER;
        let fraction = self.0 % WEI_PER_ETHER;
        if fraction == 0 {
            write!(f, "{whole}")
        } else {
            let digits = format!("{fraction:0>width$}", width = ETHER_DECIMALS);
            write!(f, "{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

impl TryFrom<String> for Amount {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse::<u128>()
            .map(Self)
            .map_err(|_| ValidationError::InvalidAmount {
                reason: format!("not a wei amount: {value:?}"),
            })
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0.to_string()
    }
}

// ----------------------------------------------------------------------------
// Content Hash
// ----------------------------------------------------------------------------

/// SHA-256 digest of a stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash arbitrary payload bytes. Identical input yields identical hashes everywhere.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(digest.into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of wall-clock timestamps, swappable for deterministic tests
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard library implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Logical Clock
// ----------------------------------------------------------------------------

/// Strictly monotonic creation-time generator.
///
/// Each tick returns `max(previous + 1, wall_now)`, so envelope creation
/// times keep increasing even when the wall clock stalls or steps back.
#[derive(Debug, Clone, Default)]
pub struct LogicalClock {
    last: u64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock given the current wall time
    pub fn tick(&mut self, wall_now: Timestamp) -> Timestamp {
        let next = core::cmp::max(self.last.saturating_add(1), wall_now.as_millis());
        self.last = next;
        Timestamp::new(next)
    }

    /// Last value handed out
    pub fn last(&self) -> Timestamp {
        Timestamp::new(self.last)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
