//! Expected price tables for both decay schedules.
//!
//! Used to produce fixtures (`expected_prices.json`) that other
//! implementations of the auction math are checked against.

use super::ledger::DecayFunction;
use crate::error::{Error, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Prices keyed by seconds elapsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceCurve {
    pub linear: BTreeMap<i64, Decimal>,
    pub quadratic: BTreeMap<i64, Decimal>,
}

/// `points` sample times spread evenly over `[0, duration]`, both ends
/// included. Each time is truncated to whole seconds.
pub fn sample_times(duration: Duration, points: usize) -> Result<Vec<i64>> {
    let seconds = duration.num_seconds();
    if seconds <= 0 {
        return Err(Error::InvalidDuration { seconds });
    }
    if points < 2 {
        return Err(Error::DivisionByZero);
    }
    let steps = (points - 1) as i64;
    (0..points as i64)
        .map(|i| {
            i.checked_mul(seconds)
                .map(|scaled| scaled / steps)
                .ok_or(Error::ArithmeticOverflow)
        })
        .collect()
}

pub fn price_curve(
    start_price: Decimal,
    end_price: Decimal,
    duration: Duration,
    points: usize,
) -> Result<PriceCurve> {
    if start_price <= end_price {
        return Err(Error::InvalidPrices {
            start_price,
            end_price,
        });
    }
    let total = duration.num_seconds();
    let mut curve = PriceCurve {
        linear: BTreeMap::new(),
        quadratic: BTreeMap::new(),
    };
    for t in sample_times(duration, points)? {
        curve.linear.insert(
            t,
            DecayFunction::Linear.price_at(start_price, end_price, t, total)?,
        );
        curve.quadratic.insert(
            t,
            DecayFunction::Quadratic.price_at(start_price, end_price, t, total)?,
        );
    }
    Ok(curve)
}
