//! Dutch auctions for liquidating reward tokens.
//!
//! - `ledger`: auction records, identities and price-decay schedules
//! - `engine`: creation, pricing, purchases and finalization
//! - `manager`: numeric-id front end for arbitrary token pairs
//! - `curve`: expected price tables for fixtures
//!
//! Lifecycle: `Active -> {SoldOut | Expired} -> Finalized`. Nothing leaves
//! `Finalized`.

mod curve;
mod engine;
mod ledger;
mod manager;

pub use curve::{price_curve, sample_times, PriceCurve};
pub use engine::{AuctionEngine, Purchase, Settlement};
pub use ledger::{Auction, AuctionKey, AuctionParams, AuctionStatus, DecayFunction};
pub use manager::AuctionManager;
