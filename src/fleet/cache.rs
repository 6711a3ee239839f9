//! Generation-stamped memo of ark balances.
//!
//! Every entry remembers the generation it was written in. `flush` bumps the
//! generation, so all earlier entries miss from then on.

use crate::utils::Address;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// Balance reported by one ark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArkBalance {
    pub ark: Address,
    pub balance: Decimal,
}

#[derive(Debug, Clone)]
struct Stamped<T> {
    generation: u64,
    value: T,
}

#[derive(Debug, Default)]
pub struct AssetsCache {
    generation: u64,
    per_ark: HashMap<Address, Stamped<Decimal>>,
    total: Option<Stamped<Decimal>>,
    withdrawable: Option<Stamped<(Decimal, Vec<ArkBalance>)>>,
    hits: u64,
    misses: u64,
}

impl AssetsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Invalidate everything cached so far.
    pub fn flush(&mut self) {
        self.generation += 1;
        self.per_ark.clear();
        self.total = None;
        self.withdrawable = None;
        debug!(generation = self.generation, "Assets cache flushed");
    }

    fn fresh<'a, T>(&self, entry: Option<&'a Stamped<T>>) -> Option<&'a T> {
        entry
            .filter(|e| e.generation == self.generation)
            .map(|e| &e.value)
    }

    pub fn ark_balance(&mut self, ark: &Address) -> Option<Decimal> {
        let hit = self.fresh(self.per_ark.get(ark)).copied();
        self.record(hit.is_some());
        hit
    }

    pub fn store_ark_balance(&mut self, ark: Address, balance: Decimal) {
        self.per_ark.insert(
            ark,
            Stamped {
                generation: self.generation,
                value: balance,
            },
        );
    }

    pub fn total(&mut self) -> Option<Decimal> {
        let hit = self.fresh(self.total.as_ref()).copied();
        self.record(hit.is_some());
        hit
    }

    pub fn store_total(&mut self, total: Decimal) {
        self.total = Some(Stamped {
            generation: self.generation,
            value: total,
        });
    }

    pub fn withdrawable(&mut self) -> Option<(Decimal, Vec<ArkBalance>)> {
        let hit = self.fresh(self.withdrawable.as_ref()).cloned();
        self.record(hit.is_some());
        hit
    }

    pub fn store_withdrawable(&mut self, total: Decimal, arks: Vec<ArkBalance>) {
        self.withdrawable = Some(Stamped {
            generation: self.generation,
            value: (total, arks),
        });
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}
