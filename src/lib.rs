//! # Fleet Commander
//!
//! Yield allocation across a fleet of strategy adapters ("arks") with
//! Dutch-auction liquidation of harvested reward tokens.
//!
//! ## Architecture
//!
//! - `utils`: Fixed-point percentages, addresses and checked decimal math
//! - `auction`: Auction ledger, Dutch auction engine and price curves
//! - `fleet`: Ark adapters, strategy registry and cache, rebalancing engine
//! - `raft`: Reward harvesting and per-ark liquidation auctions
//! - `keeper`: Rate-following rebalance planner
//! - `tokens`: Token balance and transfer capability
//! - `events`: Structured events consumed by indexers
//! - `persistence`: SQLite event journal
//! - `config`: Configuration management and validation

pub mod auction;
pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod keeper;
pub mod persistence;
pub mod raft;
pub mod tokens;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventLog, FleetEvent};
