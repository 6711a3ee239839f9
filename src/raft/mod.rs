//! Reward liquidation.
//!
//! The raft collects reward tokens harvested from arks, sells them through
//! one Dutch auction per (ark, reward token) pair, and boards the payment
//! proceeds into the fleet's buffer ark. Unsold tokens come back into raft
//! custody and join the next auction for the same pair. Proceeds the
//! fleet refuses stay pending on the raft until boarded again.

use crate::auction::{
    Auction, AuctionEngine, AuctionKey, AuctionParams, DecayFunction, Purchase, Settlement,
};
use crate::error::{Error, Result};
use crate::events::{EventLog, FleetEvent};
use crate::fleet::{require_role, AccessControl, ArkData, FleetCommander, Role};
use crate::tokens::TokenLedger;
use crate::utils::decimal::checked_add;
use crate::utils::{Address, Percentage};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Auction parameters applied when a pair has no override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuctionDefaults {
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub start_price: Decimal,
    pub end_price: Decimal,
    pub kicker_reward_percentage: Percentage,
    pub decay: DecayFunction,
}

impl Default for AuctionDefaults {
    fn default() -> Self {
        Self {
            duration: Duration::days(1),
            start_price: dec!(100),
            end_price: dec!(10),
            kicker_reward_percentage: Percentage::from_points(5),
            decay: DecayFunction::Linear,
        }
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::seconds(i64::deserialize(d)?))
    }
}

pub struct Raft {
    address: Address,
    /// Token buyers pay with; the fleet's underlying asset.
    asset: Address,
    engine: AuctionEngine,
    defaults: AuctionDefaults,
    overrides: HashMap<(Address, Address), AuctionDefaults>,
    /// Reward tokens in custody, per (ark, reward token), not yet auctioned.
    obtained: HashMap<(Address, Address), Decimal>,
    /// Settled payment tokens not yet boarded into the buffer.
    pending_proceeds: HashMap<(Address, Address), Decimal>,
    access: Arc<dyn AccessControl>,
    events: EventLog,
}

impl Raft {
    pub fn new(
        address: Address,
        asset: Address,
        defaults: AuctionDefaults,
        access: Arc<dyn AccessControl>,
    ) -> Self {
        Self {
            address,
            asset,
            engine: AuctionEngine::new(address),
            defaults,
            overrides: HashMap::new(),
            obtained: HashMap::new(),
            pending_proceeds: HashMap::new(),
            access,
            events: EventLog::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn pending_proceeds(&self, ark: Address, reward_token: Address) -> Decimal {
        self.pending_proceeds
            .get(&(ark, reward_token))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn obtained_tokens(&self, ark: Address, reward_token: Address) -> Decimal {
        self.obtained
            .get(&(ark, reward_token))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn auction(&self, ark: Address, reward_token: Address) -> Option<&Auction> {
        self.engine.get(&AuctionKey::ark_reward(ark, reward_token))
    }

    pub fn current_price(
        &self,
        ark: Address,
        reward_token: Address,
        now: DateTime<Utc>,
    ) -> Result<Decimal> {
        self.engine
            .current_price(&AuctionKey::ark_reward(ark, reward_token), now)
    }

    pub fn auction_parameters(&self, ark: Address, reward_token: Address) -> AuctionDefaults {
        self.overrides
            .get(&(ark, reward_token))
            .copied()
            .unwrap_or(self.defaults)
    }

    pub fn set_auction_parameters(
        &mut self,
        caller: Address,
        ark: Address,
        reward_token: Address,
        parameters: AuctionDefaults,
    ) -> Result<()> {
        require_role(self.access.as_ref(), Role::Governor, caller)?;
        self.overrides.insert((ark, reward_token), parameters);
        info!(%ark, %reward_token, "Auction parameters overridden");
        Ok(())
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<FleetEvent> {
        self.events.drain()
    }

    /// Harvest `ark` and move the released reward tokens into raft custody.
    pub fn harvest<L: TokenLedger + ?Sized>(
        &mut self,
        fleet: &mut FleetCommander,
        ark: Address,
        data: &ArkData,
        ledger: &mut L,
    ) -> Result<Decimal> {
        let rewards = fleet.harvest_ark(&ark, data)?;
        let mut harvested = Decimal::ZERO;
        for reward in rewards {
            ledger.transfer(reward.token, ark, self.address, reward.amount)?;
            let pair = (ark, reward.token);
            let held = checked_add(self.obtained_tokens(ark, reward.token), reward.amount)?;
            self.obtained.insert(pair, held);
            harvested = checked_add(harvested, reward.amount)?;
            debug!(%ark, token = %reward.token, amount = %reward.amount, "Reward moved to raft");
            self.events.emit(FleetEvent::RewardsHarvested {
                ark,
                reward_token: reward.token,
                amount: reward.amount,
            });
        }
        Ok(harvested)
    }

    /// Kick an auction for everything held for the pair. The caller is
    /// the kicker and collects the kicker reward.
    pub fn start_auction<L: TokenLedger + ?Sized>(
        &mut self,
        caller: Address,
        ark: Address,
        reward_token: Address,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<()> {
        require_role(self.access.as_ref(), Role::Keeper, caller)?;
        let key = AuctionKey::ark_reward(ark, reward_token);
        let total_tokens = self.obtained_tokens(ark, reward_token);
        if total_tokens.is_zero() {
            return Err(Error::NoTokensToAuction { key });
        }

        let parameters = self.auction_parameters(ark, reward_token);
        let params = AuctionParams {
            auction_token: reward_token,
            payment_token: self.asset,
            duration: parameters.duration,
            start_price: parameters.start_price,
            end_price: parameters.end_price,
            total_tokens,
            kicker_reward_percentage: parameters.kicker_reward_percentage,
            kicker: caller,
            unsold_tokens_recipient: self.address,
            decay: parameters.decay,
        };

        let result = self.engine.create_auction(key, params, now, ledger).map(|_| ());
        self.events.absorb(self.engine.drain_events());
        result?;
        self.obtained.insert((ark, reward_token), Decimal::ZERO);
        Ok(())
    }

    /// Buy from a pair's auction. A purchase that sells the auction out
    /// also boards the proceeds into the fleet buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn buy_tokens<L: TokenLedger + ?Sized>(
        &mut self,
        fleet: &mut FleetCommander,
        ark: Address,
        reward_token: Address,
        buyer: Address,
        amount: Decimal,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<Purchase> {
        let key = AuctionKey::ark_reward(ark, reward_token);
        let result = self.engine.buy_tokens(&key, buyer, amount, now, ledger);
        self.events.absorb(self.engine.drain_events());
        let purchase = result?;

        if purchase.sold_out {
            let proceeds = self
                .engine
                .get(&key)
                .map(|a| a.payment_received)
                .unwrap_or(Decimal::ZERO);
            self.board_proceeds(fleet, key, proceeds, ledger)?;
        }
        Ok(purchase)
    }

    /// Finalize an expired pair auction: unsold tokens stay with the raft
    /// for the next round and the proceeds go to the buffer.
    pub fn finalize_auction<L: TokenLedger + ?Sized>(
        &mut self,
        fleet: &mut FleetCommander,
        ark: Address,
        reward_token: Address,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<Settlement> {
        let key = AuctionKey::ark_reward(ark, reward_token);
        let result = self.engine.finalize_auction(&key, now, ledger);
        self.events.absorb(self.engine.drain_events());
        let settlement = result?;

        if settlement.unsold_tokens > Decimal::ZERO {
            let held = checked_add(
                self.obtained_tokens(ark, reward_token),
                settlement.unsold_tokens,
            )?;
            self.obtained.insert((ark, reward_token), held);
        }
        self.board_proceeds(fleet, key, settlement.payment_received, ledger)?;
        Ok(settlement)
    }

    /// Queue settled proceeds and try to board them. A refused board keeps
    /// them pending; the settlement itself stands.
    fn board_proceeds<L: TokenLedger + ?Sized>(
        &mut self,
        fleet: &mut FleetCommander,
        key: AuctionKey,
        proceeds: Decimal,
        ledger: &mut L,
    ) -> Result<()> {
        let AuctionKey::ArkReward { ark, reward_token } = key else {
            return Ok(());
        };
        if proceeds.is_zero() {
            warn!(auction = %key, "Auction closed without proceeds");
            return Ok(());
        }

        let pending = checked_add(self.pending_proceeds(ark, reward_token), proceeds)?;
        self.pending_proceeds.insert((ark, reward_token), pending);
        if let Err(e) = self.board_pending_proceeds(fleet, ark, reward_token, ledger) {
            warn!(auction = %key, %pending, error = %e, "Proceeds left pending");
        }
        Ok(())
    }

    /// Board whatever proceeds are pending for the pair. Permissionless.
    /// Returns the amount boarded.
    pub fn board_pending_proceeds<L: TokenLedger + ?Sized>(
        &mut self,
        fleet: &mut FleetCommander,
        ark: Address,
        reward_token: Address,
        ledger: &mut L,
    ) -> Result<Decimal> {
        let amount = self.pending_proceeds(ark, reward_token);
        if amount.is_zero() {
            return Ok(Decimal::ZERO);
        }

        let buffer = fleet.buffer_ark();
        ledger.transfer(self.asset, self.address, buffer, amount)?;
        if let Err(e) = fleet.board_proceeds(amount) {
            ledger
                .transfer(self.asset, buffer, self.address, amount)
                .map_err(|undo| Error::RollbackFailed {
                    source: Box::new(e.clone()),
                    ark: buffer,
                    reason: Box::new(undo),
                })?;
            return Err(e);
        }

        self.pending_proceeds.remove(&(ark, reward_token));
        info!(%ark, %reward_token, proceeds = %amount, "Proceeds boarded into buffer");
        self.events.emit(FleetEvent::ProceedsBoarded {
            ark,
            reward_token,
            amount,
        });
        Ok(amount)
    }
}
