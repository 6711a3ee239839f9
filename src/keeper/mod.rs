//! Keeper-side rebalance planning.
//!
//! The planner samples ark rates once per tick and remembers which ark was
//! on top. When one ark has led for a full window of samples, it plans a
//! batch that moves every other ark's funds into the leader.

use crate::error::Result;
use crate::fleet::{FleetCommander, RebalanceInstruction};
use crate::utils::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Configuration for the rebalance planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Consecutive samples the same ark must lead before funds move
    pub rate_window: usize,
    /// Moves at or below this amount are skipped
    pub min_move_amount: Decimal,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            rate_window: 12,
            min_move_amount: dec!(100),
        }
    }
}

/// Rate observation for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopArk {
    pub ark: Address,
    pub rate: Decimal,
}

pub struct RebalancePlanner {
    config: PlannerConfig,
    history: VecDeque<Address>,
}

impl RebalancePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.rate_window),
            config,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Highest-rate ark among the probes that answered. Ties go to the
    /// earlier ark.
    pub fn top_ark(rates: &[(Address, Option<Decimal>)]) -> Option<TopArk> {
        rates
            .iter()
            .filter_map(|(ark, rate)| rate.map(|rate| TopArk { ark: *ark, rate }))
            .fold(None, |best: Option<TopArk>, candidate| match best {
                Some(b) if b.rate >= candidate.rate => Some(b),
                _ => Some(candidate),
            })
    }

    /// Record one sample. Returns the leader once it has held the top spot
    /// for the whole window.
    pub fn observe(&mut self, rates: &[(Address, Option<Decimal>)]) -> Option<TopArk> {
        let top = Self::top_ark(rates)?;
        if self.history.len() == self.config.rate_window {
            self.history.pop_front();
        }
        self.history.push_back(top.ark);
        debug!(ark = %top.ark, rate = %top.rate, samples = self.history.len(), "Top ark sampled");
        self.is_stable().then_some(top)
    }

    pub fn is_stable(&self) -> bool {
        self.config.rate_window > 0
            && self.history.len() == self.config.rate_window
            && self.history.iter().all(|ark| Some(ark) == self.history.front())
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Plan moves from every other ark into `target`, clamped to the
    /// source outflow caps and the target's inflow cap and free capacity.
    pub fn plan(&self, fleet: &mut FleetCommander, target: Address) -> Result<Vec<RebalanceInstruction>> {
        let Some(target_config) = fleet.ark_config(&target) else {
            warn!(%target, "Planner target is not a fleet member");
            return Ok(Vec::new());
        };
        let target_balance = fleet.ark_balance(&target)?;
        let mut inflow_room = target_config.max_rebalance_inflow;
        let mut capacity = target_config.deposit_cap.saturating_sub(target_balance);
        let max_operations = fleet.params().max_rebalance_operations;

        let mut instructions = Vec::new();
        for ark in fleet.arks() {
            if ark == target || instructions.len() >= max_operations {
                continue;
            }
            let balance = match fleet.ark_balance(&ark) {
                Ok(balance) => balance,
                Err(e) => {
                    warn!(%ark, error = %e, "Skipping ark with unreadable balance");
                    continue;
                }
            };
            let Some(config) = fleet.ark_config(&ark) else {
                continue;
            };

            let amount = balance
                .min(config.max_rebalance_outflow)
                .min(inflow_room)
                .min(capacity);
            if amount <= self.config.min_move_amount {
                continue;
            }

            inflow_room -= amount;
            capacity -= amount;
            instructions.push(RebalanceInstruction::new(ark, target, amount));
        }

        if !instructions.is_empty() {
            info!(%target, moves = instructions.len(), "Rebalance planned");
        }
        Ok(instructions)
    }

    /// Sample rates and, if a leader is stable, plan the batch.
    pub fn tick(&mut self, fleet: &mut FleetCommander) -> Result<Option<Vec<RebalanceInstruction>>> {
        let rates = fleet.ark_rates();
        let Some(top) = self.observe(&rates) else {
            return Ok(None);
        };
        let instructions = self.plan(fleet, top.ark)?;
        Ok((!instructions.is_empty()).then_some(instructions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fleet::{Ark, ArkConfig, BufferArk, FleetParams, MockArk, Role, RoleRegistry, SimulatedArk};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    const GOVERNOR: Address = Address::repeat_byte(0x60);
    const A: Address = Address::repeat_byte(0x0a);
    const B: Address = Address::repeat_byte(0x0b);
    const C: Address = Address::repeat_byte(0x0c);

    fn fleet(arks: Vec<(SimulatedArk, ArkConfig)>) -> FleetCommander {
        let roles = Arc::new(RoleRegistry::new());
        roles.grant(Role::Governor, GOVERNOR);
        let mut fleet = FleetCommander::new(
            Address::repeat_byte(0xf1),
            Box::new(BufferArk::new(Address::repeat_byte(0xbf))),
            ArkConfig::unlimited(),
            FleetParams::default(),
            roles,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        );
        for (ark, config) in arks {
            fleet.add_ark(GOVERNOR, Box::new(ark), config).unwrap();
        }
        fleet
    }

    fn planner(window: usize) -> RebalancePlanner {
        RebalancePlanner::new(PlannerConfig {
            rate_window: window,
            min_move_amount: dec!(100),
        })
    }

    #[test]
    fn test_top_ark_ignores_failed_probes_and_prefers_first_on_tie() {
        let rates = vec![(A, Some(dec!(3))), (B, None), (C, Some(dec!(3)))];
        assert_eq!(
            RebalancePlanner::top_ark(&rates),
            Some(TopArk { ark: A, rate: dec!(3) })
        );
        assert_eq!(RebalancePlanner::top_ark(&[(B, None)]), None);
    }

    #[test]
    fn test_leader_must_hold_whole_window() {
        let mut p = planner(3);
        let a_leads = vec![(A, Some(dec!(5))), (B, Some(dec!(3)))];
        let b_leads = vec![(A, Some(dec!(2))), (B, Some(dec!(3)))];

        assert_eq!(p.observe(&a_leads), None);
        assert_eq!(p.observe(&a_leads), None);
        assert_eq!(p.observe(&b_leads), None);
        assert_eq!(p.observe(&b_leads), None);
        assert_eq!(p.observe(&b_leads).map(|t| t.ark), Some(B));
        // Window slides; the leader stays stable
        assert!(p.observe(&b_leads).is_some());

        p.reset();
        assert!(!p.is_stable());
    }

    #[test]
    fn test_plan_moves_into_leader_with_clamps() {
        let a = SimulatedArk::new(A, "A", dec!(8)).with_balance(dec!(1000));
        let b = SimulatedArk::new(B, "B", dec!(4)).with_balance(dec!(5000));
        let c = SimulatedArk::new(C, "C", dec!(2)).with_balance(dec!(50));
        let mut fleet = fleet(vec![
            (a, ArkConfig::new(dec!(4000), dec!(10_000), dec!(10_000))),
            (b, ArkConfig::new(dec!(10_000), dec!(2500), dec!(10_000))),
            (c, ArkConfig::unlimited()),
        ]);

        let plan = planner(1).plan(&mut fleet, A).unwrap();
        // B limited by its outflow cap; C below the minimum move
        assert_eq!(plan, vec![RebalanceInstruction::new(B, A, dec!(2500))]);
    }

    #[test]
    fn test_plan_respects_target_capacity() {
        let a = SimulatedArk::new(A, "A", dec!(8)).with_balance(dec!(900));
        let b = SimulatedArk::new(B, "B", dec!(4)).with_balance(dec!(500));
        let c = SimulatedArk::new(C, "C", dec!(2)).with_balance(dec!(500));
        let mut fleet = fleet(vec![
            (a, ArkConfig::new(dec!(1500), dec!(10_000), dec!(10_000))),
            (b, ArkConfig::unlimited()),
            (c, ArkConfig::unlimited()),
        ]);

        let plan = planner(1).plan(&mut fleet, A).unwrap();
        // 600 of room: B takes 500, the 100 left for C is not worth moving
        assert_eq!(plan, vec![RebalanceInstruction::new(B, A, dec!(500))]);
    }

    #[test]
    fn test_tick_plans_once_stable_and_batch_applies() {
        let a = SimulatedArk::new(A, "A", dec!(8));
        let b = SimulatedArk::new(B, "B", dec!(4)).with_balance(dec!(700));
        let mut fleet = fleet(vec![
            (a.clone(), ArkConfig::unlimited()),
            (b.clone(), ArkConfig::unlimited()),
        ]);
        let mut p = planner(2);

        assert_eq!(p.tick(&mut fleet).unwrap(), None);
        let batch = p.tick(&mut fleet).unwrap().unwrap();
        fleet.force_rebalance(GOVERNOR, &batch).unwrap();
        assert_eq!(a.balance(), dec!(700));
        assert_eq!(b.balance(), Decimal::ZERO);

        // Nothing left to move
        assert_eq!(p.tick(&mut fleet).unwrap(), None);
    }

    #[test]
    fn test_unreadable_balance_is_skipped() {
        let a = SimulatedArk::new(A, "A", dec!(8));
        let mut fleet = fleet(vec![(a, ArkConfig::unlimited())]);

        let broken_addr = Address::repeat_byte(0xee);
        let mut broken = MockArk::new();
        broken.expect_address().return_const(broken_addr);
        broken.expect_name().return_const("broken".to_string());
        let mut reads = 0;
        broken.expect_total_assets().returning(move || {
            reads += 1;
            if reads == 1 {
                Ok(Decimal::ZERO)
            } else {
                Err(Error::Adapter {
                    ark: broken_addr,
                    reason: "rpc timeout".to_string(),
                })
            }
        });
        fleet
            .add_ark(GOVERNOR, Box::new(broken) as Box<dyn Ark>, ArkConfig::unlimited())
            .unwrap();

        assert!(planner(1).plan(&mut fleet, A).unwrap().is_empty());
    }
}
