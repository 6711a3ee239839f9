//! Fungible token transfer capability.
//!
//! The engines only need balance reads and transfers. Failures are signalled
//! through `Err` rather than a boolean return.

use crate::error::{Error, Result};
use crate::utils::decimal::{checked_add, checked_sub};
use crate::utils::Address;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

pub trait TokenLedger {
    fn balance_of(&self, token: Address, holder: Address) -> Decimal;

    /// Move `amount` of `token` from `from` to `to`.
    fn transfer(&mut self, token: Address, from: Address, to: Address, amount: Decimal)
        -> Result<()>;
}

/// Balances held in memory, keyed by (token, holder).
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedger {
    balances: HashMap<(Address, Address), Decimal>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create tokens out of thin air. Only simulations and tests do this.
    pub fn mint(&mut self, token: Address, to: Address, amount: Decimal) -> Result<()> {
        let entry = self.balances.entry((token, to)).or_insert(Decimal::ZERO);
        *entry = checked_add(*entry, amount)?;
        debug!(%token, %to, %amount, "Minted");
        Ok(())
    }

    /// Sum of all balances for one token.
    pub fn total_supply(&self, token: Address) -> Decimal {
        self.balances
            .iter()
            .filter(|((t, _), _)| *t == token)
            .map(|(_, v)| *v)
            .sum()
    }
}

impl TokenLedger for InMemoryLedger {
    fn balance_of(&self, token: Address, holder: Address) -> Decimal {
        self.balances
            .get(&(token, holder))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: Decimal,
    ) -> Result<()> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let available = self.balance_of(token, from);
        if amount > available {
            return Err(Error::InsufficientBalance {
                token,
                holder: from,
                requested: amount,
                available,
            });
        }
        let receiver = checked_add(self.balance_of(token, to), amount)?;
        self.balances
            .insert((token, from), checked_sub(available, amount)?);
        self.balances.insert((token, to), receiver);
        Ok(())
    }
}
