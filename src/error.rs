//! Error taxonomy for the allocation and auction engines.
//!
//! Every failure names the exact condition that was violated so callers can
//! match on it. Nothing in the core retries; an error aborts the whole
//! operation with no partial state change.

use crate::fleet::Role;
use crate::utils::Address;
use crate::auction::AuctionKey;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // ---------------------------------------------------------------------
    // Precondition violations
    // ---------------------------------------------------------------------
    #[error("Invalid auction duration: {seconds}s (must be > 0)")]
    InvalidDuration { seconds: i64 },

    #[error("Invalid prices: start {start_price} must be greater than end {end_price}")]
    InvalidPrices {
        start_price: Decimal,
        end_price: Decimal,
    },

    #[error("Invalid token amount: {amount}")]
    InvalidTokenAmount { amount: Decimal },

    #[error("Invalid kicker reward percentage: {percentage} (must be in [0, 100))")]
    InvalidKickerRewardPercentage { percentage: Decimal },

    #[error("Division by zero")]
    DivisionByZero,

    // ---------------------------------------------------------------------
    // Arithmetic violations
    // ---------------------------------------------------------------------
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    // ---------------------------------------------------------------------
    // Temporal / state violations
    // ---------------------------------------------------------------------
    #[error("Auction {key} is already finalized")]
    AuctionAlreadyFinalized { key: AuctionKey },

    #[error("Auction {key} is not active (ended at {end_time})")]
    AuctionNotActive {
        key: AuctionKey,
        end_time: DateTime<Utc>,
    },

    #[error("Auction {key} has not ended (ends at {end_time})")]
    AuctionNotEnded {
        key: AuctionKey,
        end_time: DateTime<Utc>,
    },

    #[error("Auction {key} not found")]
    AuctionNotFound { key: AuctionKey },

    #[error("Auction {key} is still running")]
    AuctionAlreadyRunning { key: AuctionKey },

    #[error("No tokens to auction for {key}")]
    NoTokensToAuction { key: AuctionKey },

    #[error(
        "Cooldown not elapsed: last action {last_action}, cooldown {}s, now {now}",
        cooldown.num_seconds()
    )]
    CooldownNotElapsed {
        last_action: DateTime<Utc>,
        cooldown: Duration,
        now: DateTime<Utc>,
    },

    #[error("Invalid cooldown {}s (max {}s)", cooldown.num_seconds(), max.num_seconds())]
    InvalidCooldown { cooldown: Duration, max: Duration },

    // ---------------------------------------------------------------------
    // Capacity violations
    // ---------------------------------------------------------------------
    #[error("Insufficient tokens available: requested {requested}, remaining {remaining}")]
    InsufficientTokensAvailable {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Max outflow exceeded for ark {ark}: amount {amount}, limit {limit}")]
    MaxOutflowExceeded {
        ark: Address,
        amount: Decimal,
        limit: Decimal,
    },

    #[error("Max inflow exceeded for ark {ark}: amount {amount}, limit {limit}")]
    MaxInflowExceeded {
        ark: Address,
        amount: Decimal,
        limit: Decimal,
    },

    #[error("Deposit cap exceeded: total {total} + deposit {amount} > cap {cap}")]
    DepositCapExceeded {
        total: Decimal,
        amount: Decimal,
        cap: Decimal,
    },

    #[error("Buffer balance {balance} below minimum {minimum}")]
    BufferBalanceBelowMinimum { balance: Decimal, minimum: Decimal },

    #[error("Insufficient balance of token {token} for {holder}: requested {requested}, available {available}")]
    InsufficientBalance {
        token: Address,
        holder: Address,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Insufficient liquidity: requested {requested}, withdrawable {available}")]
    InsufficientLiquidity {
        requested: Decimal,
        available: Decimal,
    },

    // ---------------------------------------------------------------------
    // Registry / batch shape
    // ---------------------------------------------------------------------
    #[error("Ark {ark} is neither active nor the buffer ark")]
    ArkNotActiveOrBufferArk { ark: Address },

    #[error("Ark {ark} already registered")]
    ArkAlreadyExists { ark: Address },

    #[error("Ark {ark} not found")]
    ArkNotFound { ark: Address },

    #[error("Ark {ark} still holds {balance}")]
    ArkNotEmpty { ark: Address, balance: Decimal },

    #[error("Ark {ark} balance {balance} exceeds deposit cap {cap}")]
    ArkBalanceExceedsCap {
        ark: Address,
        balance: Decimal,
        cap: Decimal,
    },

    #[error("The buffer ark cannot be removed")]
    CannotRemoveBufferArk,

    #[error("Rebalance batch is empty")]
    EmptyRebalanceBatch,

    #[error("Rebalance batch has {count} operations (max {max})")]
    TooManyRebalanceOperations { count: usize, max: usize },

    #[error("Rebalance amount is zero ({from} -> {to})")]
    RebalanceAmountZero { from: Address, to: Address },

    #[error("Cannot rebalance ark {ark} into itself")]
    SameArkRebalance { ark: Address },

    // ---------------------------------------------------------------------
    // Authorization / collaborators
    // ---------------------------------------------------------------------
    #[error("Account {account} lacks role {role:?}")]
    Unauthorized { role: Role, account: Address },

    #[error("Ark {ark} failed: {reason}")]
    Adapter { ark: Address, reason: String },

    /// An operation failed and undoing its completed legs failed too, so
    /// funds at `ark` were not put back.
    #[error("Rollback after '{source}' left ark {ark} unrestored: {reason}")]
    RollbackFailed {
        source: Box<Error>,
        ark: Address,
        reason: Box<Error>,
    },
}

impl Error {
    /// Whether the caller can reasonably retry the same call later without
    /// changing its parameters or privileges.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::AuctionNotEnded { .. }
                | Error::CooldownNotElapsed { .. }
                | Error::AuctionAlreadyRunning { .. }
        )
    }
}
