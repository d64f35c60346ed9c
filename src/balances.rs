//! Fungible-token ledger the registry escrows stakes in.

use crate::account::Account;
use log::{debug, error};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EscrowError {
    #[error("insufficient balance: {account} holds {available}, needs {requested}")]
    InsufficientBalance {
        account: Account,
        available: u64,
        requested: u64,
    },
    #[error("insufficient supply: crediting {requested} to {account} overflows")]
    InsufficientSupply { account: Account, requested: u64 },
}

/// Debit / credit capability over token balances.
///
/// Implementations must let a posting that just succeeded be reversed:
/// crediting back an amount just debited, or debiting an amount just
/// credited, may not fail. [`settle`] relies on it to roll back.
pub trait Escrow {
    fn balance(&self, account: &Account) -> u64;

    /// Adds `amount` to `account`; fails with [`EscrowError::InsufficientSupply`] on overflow.
    fn credit(&mut self, account: &Account, amount: u64) -> Result<(), EscrowError>;

    /// Removes `amount` from `account`; fails with [`EscrowError::InsufficientBalance`].
    fn debit(&mut self, account: &Account, amount: u64) -> Result<(), EscrowError>;
}

/// One side of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posting {
    Debit(Account, u64),
    Credit(Account, u64),
}

/// Applies `postings` in order, all or nothing.
///
/// When a posting fails, the postings already applied are reversed before
/// the error is returned, so the ledger is left as it was found.
pub fn settle<E: Escrow + ?Sized>(escrow: &mut E, postings: &[Posting]) -> Result<(), EscrowError> {
    for (applied, posting) in postings.iter().enumerate() {
        let result = match posting {
            Posting::Debit(account, amount) => escrow.debit(account, *amount),
            Posting::Credit(account, amount) => escrow.credit(account, *amount),
        };

        if let Err(e) = result {
            debug!("Settlement failed at posting {applied}: {e}; reverting");
            for undo in postings[..applied].iter().rev() {
                let reverted = match undo {
                    Posting::Debit(account, amount) => escrow.credit(account, *amount),
                    Posting::Credit(account, amount) => escrow.debit(account, *amount),
                };
                if let Err(undo_err) = reverted {
                    error!("Failed to revert {undo:?} after settlement error: {undo_err}");
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

/// In-memory token ledger with a tracked total supply.
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    balances: HashMap<Account, u64>,
    total_supply: u64,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `amount` new tokens in `account`.
    pub fn mint(&mut self, account: &Account, amount: u64) -> Result<(), EscrowError> {
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(EscrowError::InsufficientSupply {
                account: *account,
                requested: amount,
            })?;
        self.credit(account, amount)?;
        self.total_supply = total_supply;
        Ok(())
    }

    #[must_use]
    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }
}

impl Escrow for TokenLedger {
    fn balance(&self, account: &Account) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn credit(&mut self, account: &Account, amount: u64) -> Result<(), EscrowError> {
        let updated = self
            .balance(account)
            .checked_add(amount)
            .ok_or(EscrowError::InsufficientSupply {
                account: *account,
                requested: amount,
            })?;
        self.balances.insert(*account, updated);
        Ok(())
    }

    fn debit(&mut self, account: &Account, amount: u64) -> Result<(), EscrowError> {
        let available = self.balance(account);
        let updated = available
            .checked_sub(amount)
            .ok_or(EscrowError::InsufficientBalance {
                account: *account,
                available,
                requested: amount,
            })?;
        self.balances.insert(*account, updated);
        Ok(())
    }
}
