//! Staking registry: deposits, timed withdrawals and slashing.
//!
//! ## States (per identity commitment)
//!
//! ```text
//! UNREGISTERED --register--> REGISTERED --withdraw--> WITHDRAWAL_PENDING
//!      ^                         |                           |
//!      +---------slash-----------+----------slash------------+
//!      +-------------------------release---------------------+
//! ```
//!
//! Keys return to UNREGISTERED and may be registered again.
//!
//! Every operation checks all of its guards before touching anything, then
//! settles balances all-or-nothing, then writes the tables. A rejected
//! operation leaves tables, counter, event log and balances unchanged.

use crate::account::Account;
use crate::balances::{settle, Escrow, EscrowError, Posting};
use crate::proof::ProofArtifact;
use crate::table::{Sentinel, Table};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lookup key of a member record, chosen by the registrant.
///
/// Not the zero-knowledge identity commitment; only a table key.
pub type IdentityCommitment = u64;

/// Registry parameters, fixed at [`MrlnRegistry::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Price of one message per epoch, and the smallest accepted deposit.
    pub minimal_deposit: u64,
    /// Largest message quota a single identity may buy.
    pub maximal_rate: u64,
    /// Capacity of the membership tree, `1 << depth`.
    pub set_size: u64,
    pub fee_receiver: Account,
    /// Share of a slashed stake kept by `fee_receiver`, in percent.
    pub fee_percentage: u64,
    /// Blocks a withdrawal must age before it can be released.
    pub freeze_period: u64,
    /// The registry's own escrow account.
    pub pool_account: Account,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub address: Account,
    pub message_limit: u64,
    pub index: u64,
}

impl Sentinel for Member {
    const ABSENT: Self = Member {
        address: Account::EMPTY,
        message_limit: 0,
        index: 0,
    };

    fn is_absent(&self) -> bool {
        self.address.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Withdrawal {
    pub block_number: u64,
    pub amount: u64,
    pub receiver: Account,
}

impl Sentinel for Withdrawal {
    const ABSENT: Self = Withdrawal {
        block_number: 0,
        amount: 0,
        receiver: Account::EMPTY,
    };

    fn is_absent(&self) -> bool {
        self.block_number == 0
    }
}

/// Transaction context supplied by the host ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxContext {
    pub sender: Account,
    pub block_height: u64,
}

impl TxContext {
    #[must_use]
    pub fn new(sender: Account, block_height: u64) -> Self {
        Self {
            sender,
            block_height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberState {
    Unregistered,
    Registered,
    WithdrawalPending,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "UNREGISTERED",
            Self::Registered => "REGISTERED",
            Self::WithdrawalPending => "WITHDRAWAL_PENDING",
        };
        f.write_str(s)
    }
}

/// Record of a committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered {
        identity_commitment: IdentityCommitment,
        member: Member,
    },
    WithdrawalRequested {
        identity_commitment: IdentityCommitment,
        withdrawal: Withdrawal,
    },
    Released {
        identity_commitment: IdentityCommitment,
        receiver: Account,
        amount: u64,
    },
    Slashed {
        identity_commitment: IdentityCommitment,
        payout: SlashPayout,
    },
}

/// How a slashed stake was split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashPayout {
    pub receiver: Account,
    pub reward: u64,
    pub fee_receiver: Account,
    pub fee: u64,
}

impl SlashPayout {
    /// Total stake that left the pool.
    #[must_use]
    pub fn stake(&self) -> u64 {
        self.reward + self.fee
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("fee receiver cannot be empty")]
    EmptyFeeReceiver,
    #[error("pool account cannot be empty")]
    EmptyPoolAccount,
    #[error("fee percentage must be at most 100, got {0}")]
    FeePercentageOutOfRange(u64),
    #[error("set is full")]
    SetFull,
    #[error("amount is lower than minimal deposit")]
    DepositTooLow,
    #[error("amount is not a multiple of minimal deposit")]
    NotAMultiple,
    #[error("idCommitment already registered")]
    AlreadyRegistered,
    #[error("message limit cannot be more than maximal rate")]
    RateTooHigh,
    #[error("sender account is empty")]
    EmptySender,
    #[error("member does not exist")]
    NoSuchMember,
    #[error("such withdrawal exists")]
    WithdrawalAlreadyExists,
    #[error("block height must be positive")]
    InvalidBlockHeight,
    #[error("invalid proof")]
    InvalidProof,
    #[error("no such withdrawals")]
    NoSuchWithdrawal,
    #[error("cannot release yet")]
    FreezePeriodNotElapsed,
    #[error("empty receiver")]
    EmptyReceiver,
    #[error("self-slashing is prohibited")]
    SelfSlashingProhibited,
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error(transparent)]
    Escrow(#[from] EscrowError),
}

/// The staking state machine.
#[derive(Debug, Clone)]
pub struct MrlnRegistry {
    config: RegistryConfig,
    members: Table<IdentityCommitment, Member>,
    withdrawals: Table<IdentityCommitment, Withdrawal>,
    identity_commitment_index: u64,
    events: Vec<RegistryEvent>,
}

impl MrlnRegistry {
    /// One-time initialisation; the returned registry's config never changes.
    pub fn init(config: RegistryConfig) -> Result<Self, RegistryError> {
        if config.fee_receiver.is_empty() {
            return Err(RegistryError::EmptyFeeReceiver);
        }
        if config.pool_account.is_empty() {
            return Err(RegistryError::EmptyPoolAccount);
        }
        if config.fee_percentage > 100 {
            return Err(RegistryError::FeePercentageOutOfRange(
                config.fee_percentage,
            ));
        }

        info!(
            "MRLN registry initialised: minimal_deposit={}, maximal_rate={}, set_size={}, fee={}%, freeze_period={}",
            config.minimal_deposit,
            config.maximal_rate,
            config.set_size,
            config.fee_percentage,
            config.freeze_period
        );

        Ok(Self {
            config,
            members: Table::new(),
            withdrawals: Table::new(),
            identity_commitment_index: 0,
            events: Vec::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[must_use]
    pub fn member(&self, identity_commitment: IdentityCommitment) -> Member {
        self.members.get(&identity_commitment)
    }

    #[must_use]
    pub fn withdrawal(&self, identity_commitment: IdentityCommitment) -> Withdrawal {
        self.withdrawals.get(&identity_commitment)
    }

    #[must_use]
    pub fn identity_commitment_index(&self) -> u64 {
        self.identity_commitment_index
    }

    #[must_use]
    pub fn member_state(&self, identity_commitment: IdentityCommitment) -> MemberState {
        if self.member(identity_commitment).is_absent() {
            MemberState::Unregistered
        } else if self.withdrawal(identity_commitment).is_absent() {
            MemberState::Registered
        } else {
            MemberState::WithdrawalPending
        }
    }

    /// Drains the events of transitions committed so far.
    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    fn stake_of(&self, member: &Member) -> Result<u64, RegistryError> {
        member
            .message_limit
            .checked_mul(self.config.minimal_deposit)
            .ok_or(RegistryError::ArithmeticOverflow)
    }

    fn vacate(&mut self, identity_commitment: IdentityCommitment) {
        self.withdrawals.reset(&identity_commitment);
        self.members.reset(&identity_commitment);
    }

    /// Deposits `amount` from the sender and buys `amount / minimal_deposit` messages.
    pub fn register<E: Escrow + ?Sized>(
        &mut self,
        escrow: &mut E,
        ctx: &TxContext,
        identity_commitment: IdentityCommitment,
        amount: u64,
    ) -> Result<Member, RegistryError> {
        let index = self.identity_commitment_index;
        let minimal_deposit = self.config.minimal_deposit;
        let divisor = minimal_deposit.max(1);

        let guard = || -> Result<u64, RegistryError> {
            if index >= self.config.set_size {
                return Err(RegistryError::SetFull);
            }
            if amount < minimal_deposit {
                return Err(RegistryError::DepositTooLow);
            }
            if amount % divisor != 0 {
                return Err(RegistryError::NotAMultiple);
            }
            if !self.member(identity_commitment).is_absent() {
                return Err(RegistryError::AlreadyRegistered);
            }
            let message_limit = amount / divisor;
            if message_limit > self.config.maximal_rate {
                return Err(RegistryError::RateTooHigh);
            }
            if ctx.sender.is_empty() {
                return Err(RegistryError::EmptySender);
            }
            Ok(message_limit)
        };
        let message_limit = guard().inspect_err(|e| {
            debug!("register({identity_commitment}) rejected: {e}");
        })?;

        settle(
            escrow,
            &[
                Posting::Debit(ctx.sender, amount),
                Posting::Credit(self.config.pool_account, amount),
            ],
        )?;

        let member = Member {
            address: ctx.sender,
            message_limit,
            index,
        };
        self.members.set(identity_commitment, member);
        self.identity_commitment_index = index + 1;

        info!(
            "Registered {identity_commitment} at index {index} with message limit {message_limit}"
        );
        self.events.push(RegistryEvent::Registered {
            identity_commitment,
            member,
        });
        Ok(member)
    }

    /// Starts the freeze period for a member's exit.
    pub fn withdraw<P: ProofArtifact + ?Sized>(
        &mut self,
        ctx: &TxContext,
        identity_commitment: IdentityCommitment,
        proof: &P,
    ) -> Result<Withdrawal, RegistryError> {
        let member = self.member(identity_commitment);

        let guard = || -> Result<u64, RegistryError> {
            if member.is_absent() {
                return Err(RegistryError::NoSuchMember);
            }
            if !self.withdrawal(identity_commitment).is_absent() {
                return Err(RegistryError::WithdrawalAlreadyExists);
            }
            // Block 0 is the absent withdrawal record.
            if ctx.block_height == 0 {
                return Err(RegistryError::InvalidBlockHeight);
            }
            if !proof.verify() {
                return Err(RegistryError::InvalidProof);
            }
            self.stake_of(&member)
        };
        let amount = guard().inspect_err(|e| {
            debug!("withdraw({identity_commitment}) rejected: {e}");
        })?;

        let withdrawal = Withdrawal {
            block_number: ctx.block_height,
            amount,
            receiver: member.address,
        };
        self.withdrawals.set(identity_commitment, withdrawal);

        info!(
            "Withdrawal of {amount} requested for {identity_commitment} at block {}",
            ctx.block_height
        );
        self.events.push(RegistryEvent::WithdrawalRequested {
            identity_commitment,
            withdrawal,
        });
        Ok(withdrawal)
    }

    /// Pays out a withdrawal whose freeze period has elapsed and frees the slot.
    pub fn release<E: Escrow + ?Sized>(
        &mut self,
        escrow: &mut E,
        ctx: &TxContext,
        identity_commitment: IdentityCommitment,
    ) -> Result<Withdrawal, RegistryError> {
        let withdrawal = self.withdrawal(identity_commitment);

        let guard = || -> Result<(), RegistryError> {
            if withdrawal.is_absent() {
                return Err(RegistryError::NoSuchWithdrawal);
            }
            let elapsed = ctx.block_height.saturating_sub(withdrawal.block_number);
            if elapsed <= self.config.freeze_period {
                return Err(RegistryError::FreezePeriodNotElapsed);
            }
            Ok(())
        };
        guard().inspect_err(|e| {
            debug!("release({identity_commitment}) rejected: {e}");
        })?;

        settle(
            escrow,
            &[
                Posting::Debit(self.config.pool_account, withdrawal.amount),
                Posting::Credit(withdrawal.receiver, withdrawal.amount),
            ],
        )?;
        self.vacate(identity_commitment);

        info!(
            "Released {} to {} for {identity_commitment}",
            withdrawal.amount, withdrawal.receiver
        );
        self.events.push(RegistryEvent::Released {
            identity_commitment,
            receiver: withdrawal.receiver,
            amount: withdrawal.amount,
        });
        Ok(withdrawal)
    }

    /// Confiscates a member's stake, pre-empting any pending withdrawal.
    ///
    /// `receiver` gets the stake minus `fee_percentage` percent, which goes
    /// to the fee receiver.
    pub fn slash<E: Escrow + ?Sized, P: ProofArtifact + ?Sized>(
        &mut self,
        escrow: &mut E,
        identity_commitment: IdentityCommitment,
        receiver: Account,
        proof: &P,
    ) -> Result<SlashPayout, RegistryError> {
        let member = self.member(identity_commitment);

        let guard = || -> Result<SlashPayout, RegistryError> {
            if receiver.is_empty() {
                return Err(RegistryError::EmptyReceiver);
            }
            if member.is_absent() {
                return Err(RegistryError::NoSuchMember);
            }
            if member.address == receiver {
                return Err(RegistryError::SelfSlashingProhibited);
            }
            if !proof.verify() {
                return Err(RegistryError::InvalidProof);
            }
            let stake = self.stake_of(&member)?;
            let fee = split_fee(stake, self.config.fee_percentage)?;
            Ok(SlashPayout {
                receiver,
                reward: stake - fee,
                fee_receiver: self.config.fee_receiver,
                fee,
            })
        };
        let payout = guard().inspect_err(|e| {
            debug!("slash({identity_commitment}) rejected: {e}");
        })?;

        settle(
            escrow,
            &[
                Posting::Debit(self.config.pool_account, payout.stake()),
                Posting::Credit(payout.receiver, payout.reward),
                Posting::Credit(payout.fee_receiver, payout.fee),
            ],
        )?;
        self.vacate(identity_commitment);

        info!(
            "Slashed {identity_commitment}: {} to {}, fee {} to {}",
            payout.reward, payout.receiver, payout.fee, payout.fee_receiver
        );
        self.events.push(RegistryEvent::Slashed {
            identity_commitment,
            payout,
        });
        Ok(payout)
    }
}

/// `fee_percentage * stake / 100`, rounded down.
fn split_fee(stake: u64, fee_percentage: u64) -> Result<u64, RegistryError> {
    let fee = u128::from(fee_percentage) * u128::from(stake) / 100;
    u64::try_from(fee).map_err(|_| RegistryError::ArithmeticOverflow)
}
