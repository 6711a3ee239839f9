//! Dutch auction engine: create, price, buy, finalize.

use super::ledger::{Auction, AuctionKey, AuctionParams, AuctionStatus};
use crate::error::{Error, Result};
use crate::events::{EventLog, FleetEvent};
use crate::tokens::TokenLedger;
use crate::utils::decimal::{checked_add, checked_mul, checked_sub, is_whole_units};
use crate::utils::{apply_percentage, Address, Percentage};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

/// Outcome of a successful purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub price: Decimal,
    pub total_cost: Decimal,
    pub remaining_tokens: Decimal,
    /// The purchase emptied the auction and finalized it.
    pub sold_out: bool,
}

/// Outcome of finalizing an auction.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub sold_tokens: Decimal,
    pub unsold_tokens: Decimal,
    pub payment_received: Decimal,
}

/// Holds auctioned tokens in custody of `custodian` and runs auctions over
/// them. Buyers pay into the custodian.
pub struct AuctionEngine {
    custodian: Address,
    auctions: HashMap<AuctionKey, Auction>,
    events: EventLog,
}

impl AuctionEngine {
    pub fn new(custodian: Address) -> Self {
        Self {
            custodian,
            auctions: HashMap::new(),
            events: EventLog::new(),
        }
    }

    pub fn custodian(&self) -> Address {
        self.custodian
    }

    pub fn get(&self, key: &AuctionKey) -> Option<&Auction> {
        self.auctions.get(key)
    }

    pub fn auctions(&self) -> impl Iterator<Item = &Auction> {
        self.auctions.values()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<FleetEvent> {
        self.events.drain()
    }

    fn auction(&self, key: &AuctionKey) -> Result<&Auction> {
        self.auctions
            .get(key)
            .ok_or(Error::AuctionNotFound { key: *key })
    }

    /// Tokens of `token` still owed to buyers or sweeps of live auctions.
    pub fn committed_tokens(&self, token: Address) -> Result<Decimal> {
        self.auctions
            .values()
            .filter(|a| !a.is_finalized && a.auction_token == token)
            .try_fold(Decimal::ZERO, |sum, a| checked_add(sum, a.remaining_tokens))
    }

    /// Validate creation parameters without touching state.
    pub fn validate_params(params: &AuctionParams) -> Result<()> {
        if params.duration.num_seconds() <= 0 {
            return Err(Error::InvalidDuration {
                seconds: params.duration.num_seconds(),
            });
        }
        if params.start_price <= params.end_price || params.end_price.is_sign_negative() {
            return Err(Error::InvalidPrices {
                start_price: params.start_price,
                end_price: params.end_price,
            });
        }
        if params.total_tokens <= Decimal::ZERO || !is_whole_units(params.total_tokens) {
            return Err(Error::InvalidTokenAmount {
                amount: params.total_tokens,
            });
        }
        let pct = params.kicker_reward_percentage;
        if pct < Percentage::ZERO || pct >= Percentage::HUNDRED {
            return Err(Error::InvalidKickerRewardPercentage {
                percentage: pct.points(),
            });
        }
        Ok(())
    }

    /// Create an auction under `key`.
    ///
    /// The custodian must already hold `total_tokens` of the auction token.
    /// The kicker reward is paid out immediately and is not part of the
    /// auctioned amount. A finalized auction under the same key is replaced.
    pub fn create_auction<L: TokenLedger + ?Sized>(
        &mut self,
        key: AuctionKey,
        params: AuctionParams,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<&Auction> {
        Self::validate_params(&params)?;

        if let Some(existing) = self.auctions.get(&key) {
            if !existing.is_finalized {
                return Err(Error::AuctionAlreadyRunning { key });
            }
        }

        let held = ledger.balance_of(params.auction_token, self.custodian);
        let committed = self.committed_tokens(params.auction_token)?;
        let available = checked_sub(held, committed)?.max(Decimal::ZERO);
        if available < params.total_tokens {
            return Err(Error::InsufficientBalance {
                token: params.auction_token,
                holder: self.custodian,
                requested: params.total_tokens,
                available,
            });
        }

        let kicker_reward_amount =
            apply_percentage(params.total_tokens, params.kicker_reward_percentage)?;
        let auctioned_tokens = checked_sub(params.total_tokens, kicker_reward_amount)?;
        let end_time = now
            .checked_add_signed(params.duration)
            .ok_or(Error::ArithmeticOverflow)?;

        if kicker_reward_amount > Decimal::ZERO {
            ledger.transfer(
                params.auction_token,
                self.custodian,
                params.kicker,
                kicker_reward_amount,
            )?;
            self.events.emit(FleetEvent::KickerRewardPaid {
                auction: key,
                kicker: params.kicker,
                token: params.auction_token,
                amount: kicker_reward_amount,
            });
        }

        let auction = Auction {
            key,
            auction_token: params.auction_token,
            payment_token: params.payment_token,
            start_time: now,
            end_time,
            start_price: params.start_price,
            end_price: params.end_price,
            total_tokens: auctioned_tokens,
            remaining_tokens: auctioned_tokens,
            kicker: params.kicker,
            kicker_reward_amount,
            unsold_tokens_recipient: params.unsold_tokens_recipient,
            decay: params.decay,
            is_finalized: false,
            payment_received: Decimal::ZERO,
        };

        info!(
            auction = %key,
            total_tokens = %auctioned_tokens,
            kicker_reward = %kicker_reward_amount,
            start_price = %params.start_price,
            end_price = %params.end_price,
            decay = %params.decay,
            %end_time,
            "Auction created"
        );

        self.events.emit(FleetEvent::AuctionCreated {
            auction: key,
            auction_token: auction.auction_token,
            payment_token: auction.payment_token,
            start_time: auction.start_time,
            end_time: auction.end_time,
            start_price: auction.start_price,
            end_price: auction.end_price,
            total_tokens: auction.total_tokens,
            kicker: auction.kicker,
            kicker_reward_percentage: params.kicker_reward_percentage,
            decay: auction.decay,
        });

        self.auctions.insert(key, auction);
        self.auction(&key)
    }

    pub fn current_price(&self, key: &AuctionKey, now: DateTime<Utc>) -> Result<Decimal> {
        self.auction(key)?.current_price(now)
    }

    pub fn status(&self, key: &AuctionKey, now: DateTime<Utc>) -> Result<AuctionStatus> {
        Ok(self.auction(key)?.status(now))
    }

    /// Buy `amount` tokens at the current price.
    pub fn buy_tokens<L: TokenLedger + ?Sized>(
        &mut self,
        key: &AuctionKey,
        buyer: Address,
        amount: Decimal,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<Purchase> {
        let custodian = self.custodian;
        let auction = self
            .auctions
            .get_mut(key)
            .ok_or(Error::AuctionNotFound { key: *key })?;

        if auction.is_finalized {
            return Err(Error::AuctionAlreadyFinalized { key: *key });
        }
        if now >= auction.end_time {
            return Err(Error::AuctionNotActive {
                key: *key,
                end_time: auction.end_time,
            });
        }
        if amount <= Decimal::ZERO || !is_whole_units(amount) {
            return Err(Error::InvalidTokenAmount { amount });
        }
        if amount > auction.remaining_tokens {
            return Err(Error::InsufficientTokensAvailable {
                requested: amount,
                remaining: auction.remaining_tokens,
            });
        }

        let price = auction.current_price(now)?;
        let total_cost = checked_mul(price, amount)?;
        let remaining_tokens = checked_sub(auction.remaining_tokens, amount)?;
        let payment_received = checked_add(auction.payment_received, total_cost)?;

        let held = ledger.balance_of(auction.auction_token, custodian);
        if held < amount {
            return Err(Error::InsufficientBalance {
                token: auction.auction_token,
                holder: custodian,
                requested: amount,
                available: held,
            });
        }

        ledger.transfer(auction.payment_token, buyer, custodian, total_cost)?;
        ledger.transfer(auction.auction_token, custodian, buyer, amount)?;

        auction.remaining_tokens = remaining_tokens;
        auction.payment_received = payment_received;
        let sold_out = remaining_tokens.is_zero();
        if sold_out {
            auction.is_finalized = true;
        }
        let sold_tokens = auction.sold_tokens();

        info!(
            auction = %key,
            buyer = %buyer.short(),
            %amount,
            %price,
            %total_cost,
            remaining = %remaining_tokens,
            "Tokens purchased"
        );

        self.events.emit(FleetEvent::TokensPurchased {
            auction: *key,
            buyer,
            amount,
            price,
            total_cost,
        });

        if sold_out {
            info!(auction = %key, %sold_tokens, "Auction sold out");
            self.events.emit(FleetEvent::AuctionFinalized {
                auction: *key,
                sold_tokens,
                remaining_tokens: Decimal::ZERO,
            });
        }

        Ok(Purchase {
            price,
            total_cost,
            remaining_tokens,
            sold_out,
        })
    }

    /// Close an expired auction and sweep unsold tokens to the recipient.
    /// Permissionless.
    pub fn finalize_auction<L: TokenLedger + ?Sized>(
        &mut self,
        key: &AuctionKey,
        now: DateTime<Utc>,
        ledger: &mut L,
    ) -> Result<Settlement> {
        let custodian = self.custodian;
        let auction = self
            .auctions
            .get_mut(key)
            .ok_or(Error::AuctionNotFound { key: *key })?;

        if auction.is_finalized {
            return Err(Error::AuctionAlreadyFinalized { key: *key });
        }
        if now < auction.end_time && !auction.remaining_tokens.is_zero() {
            return Err(Error::AuctionNotEnded {
                key: *key,
                end_time: auction.end_time,
            });
        }

        let unsold = auction.remaining_tokens;
        if unsold > Decimal::ZERO {
            ledger.transfer(
                auction.auction_token,
                custodian,
                auction.unsold_tokens_recipient,
                unsold,
            )?;
            debug!(
                auction = %key,
                %unsold,
                recipient = %auction.unsold_tokens_recipient,
                "Swept unsold tokens"
            );
        }
        auction.is_finalized = true;

        let settlement = Settlement {
            sold_tokens: auction.sold_tokens(),
            unsold_tokens: unsold,
            payment_received: auction.payment_received,
        };

        info!(
            auction = %key,
            sold = %settlement.sold_tokens,
            unsold = %unsold,
            "Auction finalized"
        );

        self.events.emit(FleetEvent::AuctionFinalized {
            auction: *key,
            sold_tokens: settlement.sold_tokens,
            remaining_tokens: unsold,
        });

        Ok(settlement)
    }
}
