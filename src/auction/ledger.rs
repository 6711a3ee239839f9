//! Auction records and price-decay schedules.

use crate::error::{Error, Result};
use crate::utils::decimal::{checked_add, checked_sub, mul_div_trunc, product_ratio_trunc};
use crate::utils::{Address, Percentage};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuctionKey {
    /// Standalone auction manager id.
    Id { id: u64 },
    /// Reward liquidation for one (ark, reward token) pair.
    ArkReward { ark: Address, reward_token: Address },
}

impl AuctionKey {
    pub fn id(id: u64) -> Self {
        AuctionKey::Id { id }
    }

    pub fn ark_reward(ark: Address, reward_token: Address) -> Self {
        AuctionKey::ArkReward { ark, reward_token }
    }
}

impl fmt::Display for AuctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuctionKey::Id { id } => write!(f, "#{}", id),
            AuctionKey::ArkReward { ark, reward_token } => {
                write!(f, "{}/{}", ark.short(), reward_token.short())
            }
        }
    }
}

/// Price schedule between `start_price` and `end_price`.
///
/// `Quadratic` is what older deployments call "exponential": the curve is
/// `(remaining / duration)^2`, not a true exponential. The formula is kept
/// exactly because changing it changes auction economics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayFunction {
    Linear,
    #[serde(alias = "exponential")]
    Quadratic,
}

impl DecayFunction {
    /// Price after `elapsed` of `duration` seconds. Callers clamp `elapsed`
    /// to `[0, duration)`.
    pub fn price_at(
        &self,
        start_price: Decimal,
        end_price: Decimal,
        elapsed: i64,
        duration: i64,
    ) -> Result<Decimal> {
        let spread = checked_sub(start_price, end_price)?;
        let duration_d = Decimal::from(duration);
        match self {
            DecayFunction::Linear => {
                let decayed = mul_div_trunc(spread, Decimal::from(elapsed), duration_d)?;
                checked_sub(start_price, decayed)
            }
            DecayFunction::Quadratic => {
                let remaining = Decimal::from(duration - elapsed);
                // One floor over spread * remaining^2 / duration^2
                let premium = product_ratio_trunc(
                    &[spread, remaining, remaining],
                    &[duration_d, duration_d],
                    0,
                )?;
                checked_add(end_price, premium)
            }
        }
    }
}

impl fmt::Display for DecayFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecayFunction::Linear => write!(f, "linear"),
            DecayFunction::Quadratic => write!(f, "quadratic"),
        }
    }
}

/// Inputs for creating an auction.
#[derive(Debug, Clone)]
pub struct AuctionParams {
    pub auction_token: Address,
    pub payment_token: Address,
    pub duration: Duration,
    pub start_price: Decimal,
    pub end_price: Decimal,
    /// Tokens handed to the auction, before the kicker reward is taken.
    pub total_tokens: Decimal,
    pub kicker_reward_percentage: Percentage,
    pub kicker: Address,
    pub unsold_tokens_recipient: Address,
    pub decay: DecayFunction,
}

/// Lifecycle position of an auction at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuctionStatus {
    Active,
    SoldOut,
    Expired,
    Finalized,
}

/// One live or finalized Dutch auction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Auction {
    pub key: AuctionKey,
    pub auction_token: Address,
    pub payment_token: Address,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_price: Decimal,
    pub end_price: Decimal,
    /// Tokens on sale, net of the kicker reward.
    pub total_tokens: Decimal,
    pub remaining_tokens: Decimal,
    pub kicker: Address,
    pub kicker_reward_amount: Decimal,
    pub unsold_tokens_recipient: Address,
    pub decay: DecayFunction,
    pub is_finalized: bool,
    /// Payment tokens collected from buyers so far.
    pub payment_received: Decimal,
}

impl Auction {
    /// Current unit price. Constant at `end_price` from `end_time` onwards.
    pub fn current_price(&self, now: DateTime<Utc>) -> Result<Decimal> {
        if now >= self.end_time {
            return Ok(self.end_price);
        }
        let duration = (self.end_time - self.start_time).num_seconds();
        if duration <= 0 {
            return Err(Error::InvalidDuration { seconds: duration });
        }
        let elapsed = (now - self.start_time).num_seconds().clamp(0, duration);
        self.decay
            .price_at(self.start_price, self.end_price, elapsed, duration)
    }

    pub fn sold_tokens(&self) -> Decimal {
        self.total_tokens - self.remaining_tokens
    }

    pub fn status(&self, now: DateTime<Utc>) -> AuctionStatus {
        if self.is_finalized {
            AuctionStatus::Finalized
        } else if self.remaining_tokens.is_zero() {
            AuctionStatus::SoldOut
        } else if now >= self.end_time {
            AuctionStatus::Expired
        } else {
            AuctionStatus::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    const DAY: i64 = 86_400;

    fn auction(decay: DecayFunction) -> Auction {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Auction {
            key: AuctionKey::id(1),
            auction_token: Address::repeat_byte(1),
            payment_token: Address::repeat_byte(2),
            start_time: start,
            end_time: start + Duration::seconds(DAY),
            start_price: dec!(100),
            end_price: dec!(10),
            total_tokens: dec!(950),
            remaining_tokens: dec!(950),
            kicker: Address::repeat_byte(3),
            kicker_reward_amount: dec!(50),
            unsold_tokens_recipient: Address::repeat_byte(4),
            decay,
            is_finalized: false,
            payment_received: Decimal::ZERO,
        }
    }

    #[test]
    fn test_linear_price_points() {
        let a = auction(DecayFunction::Linear);
        assert_eq!(a.current_price(a.start_time).unwrap(), dec!(100));
        assert_eq!(
            a.current_price(a.start_time + Duration::seconds(DAY / 2)).unwrap(),
            dec!(55)
        );
        assert_eq!(a.current_price(a.end_time).unwrap(), dec!(10));
        assert_eq!(
            a.current_price(a.end_time + Duration::days(30)).unwrap(),
            dec!(10)
        );
    }

    #[test]
    fn test_quadratic_price_points() {
        let a = auction(DecayFunction::Quadratic);
        assert_eq!(a.current_price(a.start_time).unwrap(), dec!(100));
        // 10 + 90 * (0.5)^2 = 32.5 -> 32
        assert_eq!(
            a.current_price(a.start_time + Duration::seconds(DAY / 2)).unwrap(),
            dec!(32)
        );
        assert_eq!(a.current_price(a.end_time).unwrap(), dec!(10));
    }

    #[test]
    fn test_quadratic_matches_reference_table() {
        // 100e9 -> 50e9 over one day, second of ten even intervals.
        let start = dec!(100_000_000_000);
        let end = dec!(50_000_000_000);
        let t = DAY / 9;
        // 50e9 + 50e9 * (8/9)^2, truncated
        assert_eq!(
            DecayFunction::Quadratic.price_at(start, end, t, DAY).unwrap(),
            dec!(89_506_172_839)
        );
        // 100e9 - 50e9 * 1/9, truncated
        assert_eq!(
            DecayFunction::Linear.price_at(start, end, t, DAY).unwrap(),
            dec!(94_444_444_445)
        );
    }

    #[test]
    fn test_quadratic_prices_at_wei_scale() {
        // spread * remaining^2 exceeds Decimal range; the price does not
        let start = dec!(100_000_000_000_000_000_000);
        let end = dec!(50_000_000_000_000_000_000);
        assert_eq!(
            DecayFunction::Quadratic.price_at(start, end, 1, DAY).unwrap(),
            dec!(99_998_842_599_290_552_126)
        );
        assert_eq!(
            DecayFunction::Quadratic
                .price_at(Decimal::MAX, Decimal::ZERO, 0, DAY)
                .unwrap(),
            Decimal::MAX
        );
    }

    #[test]
    fn test_price_before_start_clamps() {
        let a = auction(DecayFunction::Linear);
        assert_eq!(
            a.current_price(a.start_time - Duration::seconds(5)).unwrap(),
            dec!(100)
        );
    }

    #[test]
    fn test_status_transitions() {
        let mut a = auction(DecayFunction::Linear);
        assert_eq!(a.status(a.start_time), AuctionStatus::Active);
        assert_eq!(a.status(a.end_time), AuctionStatus::Expired);
        a.remaining_tokens = Decimal::ZERO;
        assert_eq!(a.status(a.start_time), AuctionStatus::SoldOut);
        a.is_finalized = true;
        assert_eq!(a.status(a.start_time), AuctionStatus::Finalized);
    }

    #[test]
    fn test_decay_accepts_exponential_alias() {
        let decay: DecayFunction = serde_json::from_str("\"exponential\"").unwrap();
        assert_eq!(decay, DecayFunction::Quadratic);
        assert_eq!(serde_json::to_string(&decay).unwrap(), "\"quadratic\"");
    }

    #[test]
    fn test_key_display() {
        assert_eq!(AuctionKey::id(7).to_string(), "#7");
        let key = AuctionKey::ark_reward(Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
        assert_eq!(key.to_string(), "0xabab…abab/0xcdcd…cdcd");
    }
}
