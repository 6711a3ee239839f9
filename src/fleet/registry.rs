//! Active ark set, the buffer ark, and memoized balance aggregation.

use super::ark::{Ark, ArkConfig};
use super::cache::{ArkBalance, AssetsCache};
use crate::error::{Error, Result};
use crate::utils::decimal::checked_add;
use crate::utils::Address;
use rust_decimal::Decimal;
use tracing::{debug, info};

/// An ark together with the limits the fleet enforces on it.
pub struct ArkEntry {
    pub ark: Box<dyn Ark>,
    pub config: ArkConfig,
}

impl ArkEntry {
    pub fn address(&self) -> Address {
        self.ark.address()
    }
}

pub struct StrategyRegistry {
    arks: Vec<ArkEntry>,
    buffer: ArkEntry,
    cache: AssetsCache,
}

impl StrategyRegistry {
    pub fn new(buffer: Box<dyn Ark>, buffer_config: ArkConfig) -> Self {
        Self {
            arks: Vec::new(),
            buffer: ArkEntry {
                ark: buffer,
                config: buffer_config,
            },
            cache: AssetsCache::new(),
        }
    }

    pub fn buffer_address(&self) -> Address {
        self.buffer.address()
    }

    pub fn is_buffer(&self, ark: &Address) -> bool {
        self.buffer.address() == *ark
    }

    pub fn is_active(&self, ark: &Address) -> bool {
        self.arks.iter().any(|e| e.address() == *ark)
    }

    pub fn is_active_or_buffer(&self, ark: &Address) -> bool {
        self.is_buffer(ark) || self.is_active(ark)
    }

    /// Active arks in registration order (buffer excluded).
    pub fn arks(&self) -> impl Iterator<Item = &ArkEntry> {
        self.arks.iter()
    }

    pub fn ark_addresses(&self) -> Vec<Address> {
        self.arks.iter().map(|e| e.address()).collect()
    }

    pub fn len(&self) -> usize {
        self.arks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arks.is_empty()
    }

    pub fn entry(&self, ark: &Address) -> Option<&ArkEntry> {
        if self.is_buffer(ark) {
            return Some(&self.buffer);
        }
        self.arks.iter().find(|e| e.address() == *ark)
    }

    pub fn entry_mut(&mut self, ark: &Address) -> Option<&mut ArkEntry> {
        if self.is_buffer(ark) {
            return Some(&mut self.buffer);
        }
        self.arks.iter_mut().find(|e| e.address() == *ark)
    }

    pub(crate) fn require_entry_mut(&mut self, ark: &Address) -> Result<&mut ArkEntry> {
        self.entry_mut(ark)
            .ok_or(Error::ArkNotActiveOrBufferArk { ark: *ark })
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Register a new ark. Its current balance must already respect `config`.
    pub fn add_ark(&mut self, ark: Box<dyn Ark>, config: ArkConfig) -> Result<()> {
        let address = ark.address();
        if self.is_active_or_buffer(&address) {
            return Err(Error::ArkAlreadyExists { ark: address });
        }
        let balance = ark.total_assets()?;
        if balance > config.deposit_cap {
            return Err(Error::ArkBalanceExceedsCap {
                ark: address,
                balance,
                cap: config.deposit_cap,
            });
        }
        info!(ark = %address, name = %ark.name(), cap = %config.deposit_cap, "Ark registered");
        self.arks.push(ArkEntry { ark, config });
        self.flush_cache();
        Ok(())
    }

    /// Deregister an empty ark and hand it back.
    pub fn remove_ark(&mut self, ark: &Address) -> Result<Box<dyn Ark>> {
        if self.is_buffer(ark) {
            return Err(Error::CannotRemoveBufferArk);
        }
        let idx = self
            .arks
            .iter()
            .position(|e| e.address() == *ark)
            .ok_or(Error::ArkNotFound { ark: *ark })?;
        let balance = self.arks[idx].ark.total_assets()?;
        if !balance.is_zero() {
            return Err(Error::ArkNotEmpty {
                ark: *ark,
                balance,
            });
        }
        let entry = self.arks.remove(idx);
        info!(ark = %ark, "Ark removed");
        self.flush_cache();
        Ok(entry.ark)
    }

    /// Invalidate all memoized balances. Must follow every balance change.
    pub fn flush_cache(&mut self) {
        self.cache.flush();
    }

    /// Uncached balance read straight from the ark.
    pub fn live_balance(&self, ark: &Address) -> Result<Decimal> {
        self.entry(ark)
            .ok_or(Error::ArkNotActiveOrBufferArk { ark: *ark })?
            .ark
            .total_assets()
    }

    /// Balance of one ark, served from the cache when fresh.
    pub fn ark_balance(&mut self, ark: &Address) -> Result<Decimal> {
        if let Some(balance) = self.cache.ark_balance(ark) {
            return Ok(balance);
        }
        let balance = self.live_balance(ark)?;
        self.cache.store_ark_balance(*ark, balance);
        Ok(balance)
    }

    pub fn buffer_balance(&mut self) -> Result<Decimal> {
        let buffer = self.buffer_address();
        self.ark_balance(&buffer)
    }

    /// Sum of every active ark plus the buffer.
    ///
    /// A failing ark query fails the whole aggregate and nothing is cached.
    pub fn total_assets(&mut self) -> Result<Decimal> {
        if let Some(total) = self.cache.total() {
            return Ok(total);
        }

        let mut balances = Vec::with_capacity(self.arks.len() + 1);
        balances.push((self.buffer.address(), self.buffer.ark.total_assets()?));
        for entry in &self.arks {
            balances.push((entry.address(), entry.ark.total_assets()?));
        }

        let mut total = Decimal::ZERO;
        for (ark, balance) in balances {
            total = checked_add(total, balance)?;
            self.cache.store_ark_balance(ark, balance);
        }
        self.cache.store_total(total);
        debug!(%total, arks = self.arks.len(), "Aggregated total assets");
        Ok(total)
    }

    /// Total assets after discarding the cache.
    pub fn live_total_assets(&mut self) -> Result<Decimal> {
        self.flush_cache();
        self.total_assets()
    }

    /// Withdrawable arks (buffer excluded) sorted by ascending balance; ties
    /// keep registration order.
    pub fn withdrawable_arks(&mut self) -> Result<Vec<ArkBalance>> {
        Ok(self.withdrawable_snapshot()?.1)
    }

    /// Buffer plus every ark that can be exited without keeper data.
    pub fn withdrawable_total_assets(&mut self) -> Result<Decimal> {
        Ok(self.withdrawable_snapshot()?.0)
    }

    fn withdrawable_snapshot(&mut self) -> Result<(Decimal, Vec<ArkBalance>)> {
        if let Some(snapshot) = self.cache.withdrawable() {
            return Ok(snapshot);
        }

        let mut arks = Vec::new();
        for entry in self.arks.iter().filter(|e| e.ark.is_withdrawable()) {
            arks.push(ArkBalance {
                ark: entry.address(),
                balance: entry.ark.total_assets()?,
            });
        }
        arks.sort_by(|a, b| a.balance.cmp(&b.balance));

        let mut total = self.buffer.ark.total_assets()?;
        for ark in &arks {
            total = checked_add(total, ark.balance)?;
        }
        self.cache.store_withdrawable(total, arks.clone());
        Ok((total, arks))
    }
}
