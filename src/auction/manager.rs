//! Standalone auction manager with sequential numeric ids.

use super::engine::{AuctionEngine, Purchase, Settlement};
use super::ledger::{Auction, AuctionKey, AuctionParams};
use crate::error::Result;
use crate::events::FleetEvent;
use crate::tokens::TokenLedger;
use crate::utils::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub struct AuctionManager {
    engine: AuctionEngine,
    next_id: u64,
}

impl AuctionManager {
    pub fn new(custodian: Address) -> Self {
        Self {
            engine: AuctionEngine::new(custodian),
            next_id: 1,
        }
    }

    /// Create an auction and return its id. Ids are never reused.
    pub fn create_auction<L: TokenLedger + ?Sized>(
        &mut self,
        params: AuctionParams,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<u64> {
        let id = self.next_id;
        self.engine
            .create_auction(AuctionKey::id(id), params, now, ledger)?;
        self.next_id += 1;
        Ok(id)
    }

    pub fn auction(&self, id: u64) -> Option<&Auction> {
        self.engine.get(&AuctionKey::id(id))
    }

    pub fn current_price(&self, id: u64, now: DateTime<Utc>) -> Result<Decimal> {
        self.engine.current_price(&AuctionKey::id(id), now)
    }

    pub fn buy_tokens<L: TokenLedger + ?Sized>(
        &mut self,
        id: u64,
        buyer: Address,
        amount: Decimal,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<Purchase> {
        self.engine
            .buy_tokens(&AuctionKey::id(id), buyer, amount, now, ledger)
    }

    pub fn finalize_auction<L: TokenLedger + ?Sized>(
        &mut self,
        id: u64,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<Settlement> {
        self.engine
            .finalize_auction(&AuctionKey::id(id), now, ledger)
    }

    pub fn drain_events(&mut self) -> Vec<FleetEvent> {
        self.engine.drain_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::DecayFunction;
    use crate::error::Error;
    use crate::tokens::InMemoryLedger;
    use crate::utils::Percentage;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    const MANAGER: Address = Address::repeat_byte(0x4d);

    fn params(total: Decimal) -> AuctionParams {
        AuctionParams {
            auction_token: Address::repeat_byte(1),
            payment_token: Address::repeat_byte(2),
            duration: Duration::hours(1),
            start_price: dec!(20),
            end_price: dec!(5),
            total_tokens: total,
            kicker_reward_percentage: Percentage::ZERO,
            kicker: Address::repeat_byte(3),
            unsold_tokens_recipient: Address::repeat_byte(4),
            decay: DecayFunction::Quadratic,
        }
    }

    #[test]
    fn test_ids_are_sequential_and_not_reused_on_failure() {
        let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let mut ledger = InMemoryLedger::new();
        ledger
            .mint(Address::repeat_byte(1), MANAGER, dec!(300))
            .unwrap();
        let mut manager = AuctionManager::new(MANAGER);

        assert_eq!(manager.create_auction(params(dec!(100)), now, &mut ledger).unwrap(), 1);
        assert!(matches!(
            manager.create_auction(params(Decimal::ZERO), now, &mut ledger),
            Err(Error::InvalidTokenAmount { .. })
        ));
        assert_eq!(manager.create_auction(params(dec!(100)), now, &mut ledger).unwrap(), 2);

        assert_eq!(manager.current_price(2, now).unwrap(), dec!(20));
        assert!(manager.auction(3).is_none());
    }

    #[test]
    fn test_expire_and_finalize_by_id() {
        let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let mut ledger = InMemoryLedger::new();
        ledger
            .mint(Address::repeat_byte(1), MANAGER, dec!(100))
            .unwrap();
        let mut manager = AuctionManager::new(MANAGER);
        let id = manager.create_auction(params(dec!(100)), now, &mut ledger).unwrap();

        let settlement = manager
            .finalize_auction(id, now + Duration::hours(2), &mut ledger)
            .unwrap();
        assert_eq!(settlement.unsold_tokens, dec!(100));
        assert_eq!(
            ledger.balance_of(Address::repeat_byte(1), Address::repeat_byte(4)),
            dec!(100)
        );
        assert_eq!(manager.drain_events().len(), 2);
    }

    #[test]
    fn test_auctions_sharing_a_token_cannot_overcommit_custody() {
        let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let token = Address::repeat_byte(1);
        let buyer = Address::repeat_byte(0xb0);
        let mut ledger = InMemoryLedger::new();
        ledger.mint(token, MANAGER, dec!(1000)).unwrap();
        ledger.mint(Address::repeat_byte(2), buyer, dec!(10_000)).unwrap();
        let mut manager = AuctionManager::new(MANAGER);

        let first = manager
            .create_auction(
                AuctionParams {
                    kicker_reward_percentage: Percentage::from_points(5),
                    ..params(dec!(800))
                },
                now,
                &mut ledger,
            )
            .unwrap();
        // 40 paid to the kicker, 760 committed, 200 free
        assert_eq!(
            manager.create_auction(params(dec!(900)), now, &mut ledger),
            Err(Error::InsufficientBalance {
                token,
                holder: MANAGER,
                requested: dec!(900),
                available: dec!(200),
            })
        );

        let second = manager.create_auction(params(dec!(200)), now, &mut ledger).unwrap();
        let purchase = manager
            .buy_tokens(second, buyer, dec!(200), now, &mut ledger)
            .unwrap();
        assert!(purchase.sold_out);

        let settlement = manager
            .finalize_auction(first, now + Duration::hours(2), &mut ledger)
            .unwrap();
        assert_eq!(settlement.unsold_tokens, dec!(760));
        assert_eq!(ledger.balance_of(token, Address::repeat_byte(4)), dec!(760));
        assert_eq!(ledger.balance_of(token, MANAGER), Decimal::ZERO);
    }
}
