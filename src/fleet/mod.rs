//! Yield allocation across a fleet of arks.
//!
//! - `ark`: the adapter contract every yield source implements
//! - `registry`: active arks, the buffer ark and the balance cache
//! - `commander`: rebalancing, deposits, withdrawals and governance

mod access;
mod adapters;
mod ark;
mod cache;
mod commander;
mod cooldown;
mod registry;

pub use access::{require_any_role, require_role, AccessControl, Role, RoleRegistry};
pub use adapters::{BufferArk, SimulatedArk};
pub use ark::{Ark, ArkConfig, ArkData, HarvestedReward};
pub use cache::{ArkBalance, AssetsCache};
pub use commander::{FleetCommander, FleetParams, RebalanceInstruction};
pub use cooldown::CooldownEnforcer;
pub use registry::{ArkEntry, StrategyRegistry};

#[cfg(test)]
pub use ark::MockArk;
