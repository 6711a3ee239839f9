//! Configuration management for the fleet simulator.
//!
//! Loads settings from environment variables and config files.

use crate::auction::DecayFunction;
use crate::fleet::{ArkConfig, FleetParams};
use crate::keeper::PlannerConfig;
use crate::raft::AuctionDefaults;
use crate::utils::Percentage;
use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Fleet-wide limits
    #[serde(default)]
    pub fleet: FleetConfig,
    /// Limits on the buffer ark
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Simulated arks, in registration order
    #[serde(default = "default_arks")]
    pub arks: Vec<ArkSpec>,
    /// Default reward auction parameters
    #[serde(default)]
    pub auction: AuctionConfig,
    /// Keeper loop settings
    #[serde(default)]
    pub keeper: KeeperConfig,
    /// Event journal
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Maximum total assets across buffer and arks
    #[serde(default = "default_deposit_cap")]
    pub deposit_cap: Decimal,
    /// Buffer floor after every rebalance
    #[serde(default = "default_minimum_buffer_balance")]
    pub minimum_buffer_balance: Decimal,
    #[serde(default = "default_rebalance_cooldown_secs")]
    pub rebalance_cooldown_secs: i64,
    /// Upper bound the governor may raise the cooldown to
    #[serde(default = "default_max_rebalance_cooldown_secs")]
    pub max_rebalance_cooldown_secs: i64,
    /// Start the first cooldown at startup instead of allowing an immediate rebalance
    #[serde(default)]
    pub enforce_cooldown_from_now: bool,
    #[serde(default = "default_max_rebalance_operations")]
    pub max_rebalance_operations: usize,
    /// Deposited into the buffer when the simulation starts
    #[serde(default = "default_initial_deposit")]
    pub initial_deposit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_unlimited")]
    pub deposit_cap: Decimal,
    #[serde(default = "default_unlimited")]
    pub max_rebalance_outflow: Decimal,
    #[serde(default = "default_unlimited")]
    pub max_rebalance_inflow: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArkSpec {
    pub name: String,
    /// Annualised rate in percent points
    pub rate: Decimal,
    #[serde(default = "default_unlimited")]
    pub deposit_cap: Decimal,
    #[serde(default = "default_unlimited")]
    pub max_rebalance_outflow: Decimal,
    #[serde(default = "default_unlimited")]
    pub max_rebalance_inflow: Decimal,
    #[serde(default = "default_true")]
    pub withdrawable: bool,
    /// Reward tokens emitted per keeper tick (0 = none)
    #[serde(default)]
    pub reward_per_tick: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionConfig {
    #[serde(default = "default_auction_duration_secs")]
    pub duration_secs: i64,
    #[serde(default = "default_start_price")]
    pub start_price: Decimal,
    #[serde(default = "default_end_price")]
    pub end_price: Decimal,
    /// Kicker reward in percent points (5 = 5%)
    #[serde(default = "default_kicker_reward_percentage")]
    pub kicker_reward_percentage: Decimal,
    #[serde(default = "default_decay")]
    pub decay: DecayFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Samples the same ark must lead before funds move
    #[serde(default = "default_rate_window")]
    pub rate_window: usize,
    /// Moves at or below this amount are skipped
    #[serde(default = "default_min_move_amount")]
    pub min_move_amount: Decimal,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Simulated seconds that pass per tick
    #[serde(default = "default_simulated_secs_per_tick")]
    pub simulated_secs_per_tick: i64,
    /// Harvest rewards and kick auctions every N ticks
    #[serde(default = "default_harvest_every_ticks")]
    pub harvest_every_ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_deposit_cap() -> Decimal {
    dec!(100_000_000)
}

fn default_minimum_buffer_balance() -> Decimal {
    dec!(50_000)
}

fn default_rebalance_cooldown_secs() -> i64 {
    60
}

fn default_max_rebalance_cooldown_secs() -> i64 {
    86_400
}

fn default_max_rebalance_operations() -> usize {
    50
}

fn default_initial_deposit() -> Decimal {
    dec!(1_000_000)
}

fn default_unlimited() -> Decimal {
    Decimal::MAX
}

fn default_true() -> bool {
    true
}

fn default_auction_duration_secs() -> i64 {
    86_400
}

fn default_start_price() -> Decimal {
    dec!(100)
}

fn default_end_price() -> Decimal {
    dec!(10)
}

fn default_kicker_reward_percentage() -> Decimal {
    dec!(5)
}

fn default_decay() -> DecayFunction {
    DecayFunction::Linear
}

fn default_rate_window() -> usize {
    12
}

fn default_min_move_amount() -> Decimal {
    dec!(100)
}

fn default_tick_interval_secs() -> u64 {
    10
}

fn default_simulated_secs_per_tick() -> i64 {
    3_600
}

fn default_harvest_every_ticks() -> u64 {
    24
}

fn default_db_path() -> String {
    "fleet_events.db".to_string()
}

fn default_arks() -> Vec<ArkSpec> {
    vec![
        ArkSpec {
            name: "AaveV3".to_string(),
            rate: dec!(4.5),
            deposit_cap: dec!(5_000_000),
            max_rebalance_outflow: dec!(1_000_000),
            max_rebalance_inflow: dec!(1_000_000),
            withdrawable: true,
            reward_per_tick: Decimal::ZERO,
        },
        ArkSpec {
            name: "CompoundV3".to_string(),
            rate: dec!(3.8),
            deposit_cap: dec!(5_000_000),
            max_rebalance_outflow: dec!(1_000_000),
            max_rebalance_inflow: dec!(1_000_000),
            withdrawable: true,
            reward_per_tick: dec!(25),
        },
        ArkSpec {
            name: "MorphoVault".to_string(),
            rate: dec!(6.1),
            deposit_cap: dec!(2_000_000),
            max_rebalance_outflow: dec!(500_000),
            max_rebalance_inflow: dec!(500_000),
            withdrawable: false,
            reward_per_tick: dec!(10),
        },
    ]
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("FLEET"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.fleet.minimum_buffer_balance >= Decimal::ZERO
                && self.fleet.minimum_buffer_balance <= self.fleet.deposit_cap,
            "minimum_buffer_balance must be between 0 and deposit_cap"
        );

        anyhow::ensure!(
            self.fleet.rebalance_cooldown_secs >= 0
                && self.fleet.rebalance_cooldown_secs <= self.fleet.max_rebalance_cooldown_secs,
            "rebalance_cooldown_secs must be >= 0 and <= max_rebalance_cooldown_secs"
        );

        anyhow::ensure!(
            self.fleet.max_rebalance_operations >= 1,
            "max_rebalance_operations must be at least 1"
        );

        anyhow::ensure!(
            self.fleet.initial_deposit >= Decimal::ZERO
                && self.fleet.initial_deposit <= self.fleet.deposit_cap,
            "initial_deposit must be between 0 and deposit_cap"
        );

        let mut names = HashSet::new();
        for ark in &self.arks {
            anyhow::ensure!(names.insert(ark.name.as_str()), "duplicate ark name {}", ark.name);
            anyhow::ensure!(ark.rate >= Decimal::ZERO, "ark {} has a negative rate", ark.name);
            anyhow::ensure!(
                ark.reward_per_tick >= Decimal::ZERO,
                "ark {} has a negative reward_per_tick",
                ark.name
            );
        }

        anyhow::ensure!(
            self.auction.duration_secs > 0,
            "auction duration_secs must be positive"
        );
        anyhow::ensure!(
            self.auction.start_price > self.auction.end_price,
            "auction start_price must exceed end_price"
        );
        anyhow::ensure!(
            self.auction.kicker_reward_percentage >= Decimal::ZERO
                && self.auction.kicker_reward_percentage < dec!(100),
            "kicker_reward_percentage must be in [0, 100)"
        );

        anyhow::ensure!(self.keeper.rate_window >= 1, "rate_window must be at least 1");
        anyhow::ensure!(
            self.keeper.tick_interval_secs > 0,
            "tick_interval_secs must be positive"
        );
        anyhow::ensure!(
            self.keeper.harvest_every_ticks > 0,
            "harvest_every_ticks must be positive"
        );

        Ok(())
    }
}

impl FleetConfig {
    pub fn params(&self) -> FleetParams {
        FleetParams {
            deposit_cap: self.deposit_cap,
            minimum_buffer_balance: self.minimum_buffer_balance,
            rebalance_cooldown: Duration::seconds(self.rebalance_cooldown_secs),
            max_rebalance_cooldown: Duration::seconds(self.max_rebalance_cooldown_secs),
            enforce_cooldown_from_now: self.enforce_cooldown_from_now,
            max_rebalance_operations: self.max_rebalance_operations,
        }
    }
}

impl BufferConfig {
    pub fn ark_config(&self) -> ArkConfig {
        ArkConfig::new(
            self.deposit_cap,
            self.max_rebalance_outflow,
            self.max_rebalance_inflow,
        )
    }
}

impl ArkSpec {
    pub fn ark_config(&self) -> ArkConfig {
        ArkConfig::new(
            self.deposit_cap,
            self.max_rebalance_outflow,
            self.max_rebalance_inflow,
        )
    }
}

impl AuctionConfig {
    pub fn defaults(&self) -> AuctionDefaults {
        AuctionDefaults {
            duration: Duration::seconds(self.duration_secs),
            start_price: self.start_price,
            end_price: self.end_price,
            kicker_reward_percentage: Percentage::new(self.kicker_reward_percentage),
            decay: self.decay,
        }
    }
}

impl KeeperConfig {
    pub fn planner(&self) -> PlannerConfig {
        PlannerConfig {
            rate_window: self.rate_window,
            min_move_amount: self.min_move_amount,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fleet: FleetConfig::default(),
            buffer: BufferConfig::default(),
            arks: default_arks(),
            auction: AuctionConfig::default(),
            keeper: KeeperConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            deposit_cap: default_deposit_cap(),
            minimum_buffer_balance: default_minimum_buffer_balance(),
            rebalance_cooldown_secs: default_rebalance_cooldown_secs(),
            max_rebalance_cooldown_secs: default_max_rebalance_cooldown_secs(),
            enforce_cooldown_from_now: false,
            max_rebalance_operations: default_max_rebalance_operations(),
            initial_deposit: default_initial_deposit(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            deposit_cap: default_unlimited(),
            max_rebalance_outflow: default_unlimited(),
            max_rebalance_inflow: default_unlimited(),
        }
    }
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_auction_duration_secs(),
            start_price: default_start_price(),
            end_price: default_end_price(),
            kicker_reward_percentage: default_kicker_reward_percentage(),
            decay: default_decay(),
        }
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            rate_window: default_rate_window(),
            min_move_amount: default_min_move_amount(),
            tick_interval_secs: default_tick_interval_secs(),
            simulated_secs_per_tick: default_simulated_secs_per_tick(),
            harvest_every_ticks: default_harvest_every_ticks(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
        }
    }
}
