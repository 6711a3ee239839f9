//! Structured events emitted by the auction and allocation engines.
//!
//! Events are the durable record indexers consume. Field sets and emission
//! order are part of the external contract, so they are only ever appended
//! after the operation that produced them has fully succeeded.

use crate::auction::{AuctionKey, DecayFunction};
use crate::utils::{Address, Percentage};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FleetEvent {
    // Auctions
    KickerRewardPaid {
        auction: AuctionKey,
        kicker: Address,
        token: Address,
        amount: Decimal,
    },
    AuctionCreated {
        auction: AuctionKey,
        auction_token: Address,
        payment_token: Address,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        start_price: Decimal,
        end_price: Decimal,
        total_tokens: Decimal,
        kicker: Address,
        kicker_reward_percentage: Percentage,
        decay: DecayFunction,
    },
    TokensPurchased {
        auction: AuctionKey,
        buyer: Address,
        amount: Decimal,
        price: Decimal,
        total_cost: Decimal,
    },
    AuctionFinalized {
        auction: AuctionKey,
        sold_tokens: Decimal,
        remaining_tokens: Decimal,
    },

    // Registry & caps
    ArkAdded {
        ark: Address,
        name: String,
    },
    ArkRemoved {
        ark: Address,
    },
    ArkDepositCapUpdated {
        ark: Address,
        cap: Decimal,
    },
    ArkMaxRebalanceOutflowUpdated {
        ark: Address,
        max_outflow: Decimal,
    },
    ArkMaxRebalanceInflowUpdated {
        ark: Address,
        max_inflow: Decimal,
    },
    MinimumBufferBalanceUpdated {
        minimum: Decimal,
    },
    FleetDepositCapUpdated {
        cap: Decimal,
    },
    RebalanceCooldownUpdated {
        cooldown_secs: i64,
    },

    // Fund movements
    Rebalanced {
        from_ark: Address,
        to_ark: Address,
        amount: Decimal,
    },
    Deposited {
        account: Address,
        amount: Decimal,
    },
    Withdrawn {
        account: Address,
        amount: Decimal,
    },

    // Reward liquidation
    RewardsHarvested {
        ark: Address,
        reward_token: Address,
        amount: Decimal,
    },
    ProceedsBoarded {
        ark: Address,
        reward_token: Address,
        amount: Decimal,
    },
}

impl FleetEvent {
    /// Short event name, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetEvent::KickerRewardPaid { .. } => "KickerRewardPaid",
            FleetEvent::AuctionCreated { .. } => "AuctionCreated",
            FleetEvent::TokensPurchased { .. } => "TokensPurchased",
            FleetEvent::AuctionFinalized { .. } => "AuctionFinalized",
            FleetEvent::ArkAdded { .. } => "ArkAdded",
            FleetEvent::ArkRemoved { .. } => "ArkRemoved",
            FleetEvent::ArkDepositCapUpdated { .. } => "ArkDepositCapUpdated",
            FleetEvent::ArkMaxRebalanceOutflowUpdated { .. } => "ArkMaxRebalanceOutflowUpdated",
            FleetEvent::ArkMaxRebalanceInflowUpdated { .. } => "ArkMaxRebalanceInflowUpdated",
            FleetEvent::MinimumBufferBalanceUpdated { .. } => "MinimumBufferBalanceUpdated",
            FleetEvent::FleetDepositCapUpdated { .. } => "FleetDepositCapUpdated",
            FleetEvent::RebalanceCooldownUpdated { .. } => "RebalanceCooldownUpdated",
            FleetEvent::Rebalanced { .. } => "Rebalanced",
            FleetEvent::Deposited { .. } => "Deposited",
            FleetEvent::Withdrawn { .. } => "Withdrawn",
            FleetEvent::RewardsHarvested { .. } => "RewardsHarvested",
            FleetEvent::ProceedsBoarded { .. } => "ProceedsBoarded",
        }
    }

    /// Auction this event belongs to, if any.
    pub fn auction(&self) -> Option<&AuctionKey> {
        match self {
            FleetEvent::KickerRewardPaid { auction, .. }
            | FleetEvent::AuctionCreated { auction, .. }
            | FleetEvent::TokensPurchased { auction, .. }
            | FleetEvent::AuctionFinalized { auction, .. } => Some(auction),
            _ => None,
        }
    }
}

/// Append-only, ordered event sink.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<FleetEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event and emit it as a structured log line.
    pub fn emit(&mut self, event: FleetEvent) {
        let json = serde_json::to_string(&event).unwrap_or_default();
        info!(target: "fleet_event", kind = event.kind(), "EVENT: {}", json);
        self.events.push(event);
    }

    /// Append a batch that was staged while an operation was in flight.
    pub fn emit_all(&mut self, events: impl IntoIterator<Item = FleetEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Append events that were already emitted by another log.
    pub fn absorb(&mut self, events: Vec<FleetEvent>) {
        self.events.extend(events);
    }

    pub fn events(&self) -> &[FleetEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hand all recorded events to the caller, leaving the log empty.
    pub fn drain(&mut self) -> Vec<FleetEvent> {
        std::mem::take(&mut self.events)
    }
}
