//! Strategy adapter ("ark") capability.
//!
//! The allocation engine depends only on this trait. Adapter-specific data
//! travels through [`ArkData`] untouched.

use crate::error::Result;
use crate::utils::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque payload interpreted only by the adapter that receives it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ArkData(Vec<u8>);

impl ArkData {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ArkData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for ArkData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArkData(0x{})", hex::encode(&self.0))
    }
}

/// Reward tokens released by a harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestedReward {
    pub token: Address,
    pub amount: Decimal,
}

/// Per-ark limits enforced by the allocation engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArkConfig {
    /// Maximum balance the ark may hold.
    pub deposit_cap: Decimal,
    /// Maximum amount moved out of the ark in one rebalance.
    pub max_rebalance_outflow: Decimal,
    /// Maximum amount moved into the ark in one rebalance.
    pub max_rebalance_inflow: Decimal,
}

impl ArkConfig {
    pub fn new(deposit_cap: Decimal, max_outflow: Decimal, max_inflow: Decimal) -> Self {
        Self {
            deposit_cap,
            max_rebalance_outflow: max_outflow,
            max_rebalance_inflow: max_inflow,
        }
    }

    /// No limits at all; used for the buffer ark.
    pub fn unlimited() -> Self {
        Self::new(Decimal::MAX, Decimal::MAX, Decimal::MAX)
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Ark {
    fn address(&self) -> Address;

    fn name(&self) -> String;

    /// Assets currently held by the ark.
    fn total_assets(&self) -> Result<Decimal>;

    /// Current yield rate (annualised percent points). Advisory only.
    fn rate(&self) -> Result<Decimal>;

    /// Whether funds can be pulled without keeper-supplied data.
    fn is_withdrawable(&self) -> bool;

    fn board(&mut self, amount: Decimal, data: &ArkData) -> Result<()>;

    fn disembark(&mut self, amount: Decimal, data: &ArkData) -> Result<()>;

    fn harvest(&mut self, data: &ArkData) -> Result<Vec<HarvestedReward>>;
}
