//! In-memory ark implementations.
//!
//! Protocol integrations (lending pools, vaults) live outside this crate.
//! These adapters back the simulator and the tests.

use super::ark::{Ark, ArkData, HarvestedReward};
use crate::error::{Error, Result};
use crate::utils::decimal::{checked_add, checked_sub, mul_div_trunc};
use crate::utils::Address;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

const SECONDS_PER_YEAR: Decimal = dec!(31_536_000);

fn board_into(ark: Address, balance: &mut Decimal, amount: Decimal) -> Result<()> {
    *balance = checked_add(*balance, amount).map_err(|_| Error::Adapter {
        ark,
        reason: "balance overflow".to_string(),
    })?;
    Ok(())
}

fn disembark_from(ark: Address, balance: &mut Decimal, amount: Decimal) -> Result<()> {
    if amount > *balance {
        return Err(Error::Adapter {
            ark,
            reason: format!("cannot disembark {} from balance {}", amount, balance),
        });
    }
    *balance = checked_sub(*balance, amount)?;
    Ok(())
}

/// Zero-yield ark holding instantly withdrawable liquidity.
#[derive(Debug, Clone)]
pub struct BufferArk {
    address: Address,
    balance: Decimal,
}

impl BufferArk {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: Decimal::ZERO,
        }
    }

    pub fn with_balance(address: Address, balance: Decimal) -> Self {
        Self { address, balance }
    }
}

impl Ark for BufferArk {
    fn address(&self) -> Address {
        self.address
    }

    fn name(&self) -> String {
        "BufferArk".to_string()
    }

    fn total_assets(&self) -> Result<Decimal> {
        Ok(self.balance)
    }

    fn rate(&self) -> Result<Decimal> {
        Ok(Decimal::ZERO)
    }

    fn is_withdrawable(&self) -> bool {
        true
    }

    fn board(&mut self, amount: Decimal, _data: &ArkData) -> Result<()> {
        board_into(self.address, &mut self.balance, amount)
    }

    fn disembark(&mut self, amount: Decimal, _data: &ArkData) -> Result<()> {
        disembark_from(self.address, &mut self.balance, amount)
    }

    fn harvest(&mut self, _data: &ArkData) -> Result<Vec<HarvestedReward>> {
        Ok(Vec::new())
    }
}

#[derive(Debug)]
struct SimulatedState {
    balance: Decimal,
    rate: Decimal,
    pending_rewards: BTreeMap<Address, Decimal>,
}

/// Rate-accruing position that also emits reward tokens.
///
/// Clones share state, so a driver can keep a handle to accrue interest
/// while another copy sits in the fleet registry.
#[derive(Debug, Clone)]
pub struct SimulatedArk {
    address: Address,
    name: String,
    withdrawable: bool,
    state: Rc<RefCell<SimulatedState>>,
}

impl SimulatedArk {
    pub fn new(address: Address, name: impl Into<String>, rate: Decimal) -> Self {
        Self {
            address,
            name: name.into(),
            withdrawable: true,
            state: Rc::new(RefCell::new(SimulatedState {
                balance: Decimal::ZERO,
                rate,
                pending_rewards: BTreeMap::new(),
            })),
        }
    }

    /// Mark the ark as requiring keeper data to exit.
    pub fn non_withdrawable(mut self) -> Self {
        self.withdrawable = false;
        self
    }

    pub fn with_balance(self, balance: Decimal) -> Self {
        self.state.borrow_mut().balance = balance;
        self
    }

    pub fn set_rate(&self, rate: Decimal) {
        self.state.borrow_mut().rate = rate;
    }

    /// Grow the balance by `rate` pro-rated over `elapsed`. Returns interest.
    pub fn accrue(&self, elapsed: Duration) -> Result<Decimal> {
        let mut state = self.state.borrow_mut();
        let yearly = mul_div_trunc(state.balance, state.rate, dec!(100))?;
        let interest = mul_div_trunc(
            yearly,
            Decimal::from(elapsed.num_seconds().max(0)),
            SECONDS_PER_YEAR,
        )?;
        state.balance = checked_add(state.balance, interest)?;
        Ok(interest)
    }

    /// Queue reward tokens to be released on the next harvest.
    pub fn emit_rewards(&self, token: Address, amount: Decimal) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state.pending_rewards.entry(token).or_insert(Decimal::ZERO);
        *entry = checked_add(*entry, amount)?;
        Ok(())
    }

    pub fn balance(&self) -> Decimal {
        self.state.borrow().balance
    }
}

impl Ark for SimulatedArk {
    fn address(&self) -> Address {
        self.address
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn total_assets(&self) -> Result<Decimal> {
        Ok(self.state.borrow().balance)
    }

    fn rate(&self) -> Result<Decimal> {
        Ok(self.state.borrow().rate)
    }

    fn is_withdrawable(&self) -> bool {
        self.withdrawable
    }

    fn board(&mut self, amount: Decimal, data: &ArkData) -> Result<()> {
        debug!(ark = %self.name, %amount, ?data, "Boarding");
        board_into(self.address, &mut self.state.borrow_mut().balance, amount)
    }

    fn disembark(&mut self, amount: Decimal, data: &ArkData) -> Result<()> {
        debug!(ark = %self.name, %amount, ?data, "Disembarking");
        disembark_from(self.address, &mut self.state.borrow_mut().balance, amount)
    }

    fn harvest(&mut self, _data: &ArkData) -> Result<Vec<HarvestedReward>> {
        let pending = std::mem::take(&mut self.state.borrow_mut().pending_rewards);
        Ok(pending
            .into_iter()
            .filter(|(_, amount)| *amount > Decimal::ZERO)
            .map(|(token, amount)| HarvestedReward { token, amount })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_board_and_disembark() {
        let mut buffer = BufferArk::new(Address::repeat_byte(0xbf));
        buffer.board(dec!(100), &ArkData::empty()).unwrap();
        buffer.disembark(dec!(40), &ArkData::empty()).unwrap();
        assert_eq!(buffer.total_assets().unwrap(), dec!(60));
        assert!(matches!(
            buffer.disembark(dec!(61), &ArkData::empty()),
            Err(Error::Adapter { .. })
        ));
        assert!(buffer.harvest(&ArkData::empty()).unwrap().is_empty());
    }

    #[test]
    fn test_simulated_ark_shares_state_between_clones() {
        let ark = SimulatedArk::new(Address::repeat_byte(1), "Aave", dec!(5));
        let mut boxed: Box<dyn Ark> = Box::new(ark.clone());
        boxed.board(dec!(1000), &ArkData::empty()).unwrap();
        assert_eq!(ark.balance(), dec!(1000));
    }

    #[test]
    fn test_accrue_interest() {
        let ark = SimulatedArk::new(Address::repeat_byte(1), "Aave", dec!(10))
            .with_balance(dec!(1_000_000));
        // 10% for a full year
        let interest = ark.accrue(Duration::days(365)).unwrap();
        assert_eq!(interest, dec!(100_000));
        assert_eq!(ark.balance(), dec!(1_100_000));
    }

    #[test]
    fn test_harvest_drains_rewards_in_token_order() {
        let mut ark = SimulatedArk::new(Address::repeat_byte(1), "Morpho", dec!(4));
        ark.emit_rewards(Address::repeat_byte(0x20), dec!(5)).unwrap();
        ark.emit_rewards(Address::repeat_byte(0x10), dec!(7)).unwrap();
        ark.emit_rewards(Address::repeat_byte(0x10), dec!(3)).unwrap();

        let rewards = ark.harvest(&ArkData::empty()).unwrap();
        assert_eq!(
            rewards,
            vec![
                HarvestedReward {
                    token: Address::repeat_byte(0x10),
                    amount: dec!(10)
                },
                HarvestedReward {
                    token: Address::repeat_byte(0x20),
                    amount: dec!(5)
                },
            ]
        );
        assert!(ark.harvest(&ArkData::empty()).unwrap().is_empty());
    }

    #[test]
    fn test_non_withdrawable_flag() {
        let ark = SimulatedArk::new(Address::repeat_byte(1), "Pendle", dec!(8)).non_withdrawable();
        assert!(!ark.is_withdrawable());
    }
}
