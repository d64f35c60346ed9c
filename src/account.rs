//! Account addresses used by the registry and the escrow ledger.
//!
//! An account is an opaque 32-byte address. The all-zero address is the
//! *empty* account: it marks vacant member slots and absent withdrawals, and
//! is never a valid depositor, receiver or fee sink.

use crate::utils::validate_and_strip_hex;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;

/// Length of an account address in bytes.
pub const ACCOUNT_BYTES: usize = 32;

/// Expected length of an account in hex characters (excluding 0x prefix).
pub const ACCOUNT_HEX_LENGTH: usize = ACCOUNT_BYTES * 2;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account([u8; ACCOUNT_BYTES]);

impl Account {
    /// The empty account.
    pub const EMPTY: Account = Account([0u8; ACCOUNT_BYTES]);

    #[must_use]
    pub const fn new(bytes: [u8; ACCOUNT_BYTES]) -> Self {
        Self(bytes)
    }

    /// Derives an account deterministically from a label as `SHA3-256(label)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use mrln::account::Account;
    ///
    /// let alice = Account::from_seed("alice");
    /// assert_eq!(alice, Account::from_seed("alice"));
    /// assert!(!alice.is_empty());
    /// ```
    #[must_use]
    pub fn from_seed(label: &str) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(b"mrln-account:");
        hasher.update(label.as_bytes());
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ACCOUNT_BYTES]
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_BYTES] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Validates and normalizes an account address to lowercase hex without prefix.
///
/// # Examples
///
/// ```
/// use mrln::account::normalize_account;
///
/// let hex = format!("0x{}", "AB".repeat(32));
/// assert_eq!(normalize_account(&hex).unwrap(), "ab".repeat(32));
/// ```
pub fn normalize_account(address: &str) -> Result<String> {
    validate_and_strip_hex(address, ACCOUNT_HEX_LENGTH).map(|s| s.to_lowercase())
}

impl FromStr for Account {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = normalize_account(s)?;
        let bytes = hex::decode(&normalized).context("Failed to decode account from hex")?;
        let bytes: [u8; ACCOUNT_BYTES] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Account bytes length mismatch"))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Account {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.to_hex()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("Account(empty)");
        }
        write!(f, "Account(0x{}..)", &self.to_hex()[..8])
    }
}
