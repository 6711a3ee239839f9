//! Fleet Commander - Main Entry Point
//!
//! Simulator and tooling around the allocation and liquidation engines.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fleet_commander::auction::{price_curve, AuctionKey};
use fleet_commander::config::Config;
use fleet_commander::fleet::{
    Ark, ArkData, BufferArk, FleetCommander, Role, RoleRegistry, SimulatedArk,
};
use fleet_commander::keeper::RebalancePlanner;
use fleet_commander::persistence::{EventStore, FleetSnapshot};
use fleet_commander::raft::Raft;
use fleet_commander::tokens::{InMemoryLedger, TokenLedger};
use fleet_commander::utils::Address;
use fleet_commander::FleetEvent;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Fleet Commander CLI
#[derive(Parser)]
#[command(name = "fleet-commander")]
#[command(version, about = "Yield allocation fleet with Dutch-auction reward liquidation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write expected linear and quadratic auction prices as JSON
    PriceCurve {
        #[arg(long, default_value = "100000000000000000000")]
        start_price: Decimal,

        #[arg(long, default_value = "50000000000000000000")]
        end_price: Decimal,

        /// Auction duration in seconds
        #[arg(short, long, default_value = "86400")]
        duration: i64,

        /// Number of evenly spaced sample points, both ends included
        #[arg(short, long, default_value = "10")]
        points: usize,

        #[arg(short, long, default_value = "expected_prices.json")]
        output: String,
    },

    /// Run the keeper loop against a simulated fleet
    Simulate {
        /// Stop after this many ticks (default: run until Ctrl-C)
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Dump journaled events
    Events {
        /// Path to the SQLite journal (default: persistence.db_path from config)
        #[arg(short, long)]
        db: Option<String>,

        /// Only events of this kind, e.g. "Rebalanced"
        #[arg(short, long)]
        kind: Option<String>,

        /// Also print the latest fleet snapshots
        #[arg(short, long)]
        snapshots: bool,
    },
}

/// Fixed identities used by the simulator.
struct Actors {
    governor: Address,
    keeper: Address,
    depositor: Address,
    buyer: Address,
    fleet: Address,
    buffer: Address,
    raft: Address,
    asset: Address,
}

impl Default for Actors {
    fn default() -> Self {
        Self {
            governor: Address::from_low_u64(0x01),
            keeper: Address::from_low_u64(0x02),
            depositor: Address::from_low_u64(0x03),
            buyer: Address::from_low_u64(0x04),
            fleet: Address::from_low_u64(0x1000),
            buffer: Address::from_low_u64(0x1001),
            raft: Address::from_low_u64(0x1002),
            asset: Address::from_low_u64(0x2000),
        }
    }
}

/// A simulated ark plus the reward token it emits.
struct SimulatedPosition {
    ark: SimulatedArk,
    reward_token: Address,
    reward_per_tick: Decimal,
}

#[derive(Debug, Default)]
struct SimMetrics {
    ticks: u64,
    rebalances: u64,
    rebalances_rejected: u64,
    auctions_started: u64,
    auctions_finalized: u64,
    purchases: u64,
    events_journaled: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::PriceCurve {
            start_price,
            end_price,
            duration,
            points,
            output,
        } => write_price_curve(start_price, end_price, duration, points, &output),
        Commands::Simulate { ticks } => {
            let config = Config::load()?;
            config.validate()?;
            log_config(&config);
            run_simulation(config, ticks).await
        }
        Commands::Events { db, kind, snapshots } => {
            let db = match db {
                Some(db) => db,
                None => Config::load()?.persistence.db_path,
            };
            show_events(&db, kind.as_deref(), snapshots)
        }
    }
}

fn write_price_curve(
    start_price: Decimal,
    end_price: Decimal,
    duration: i64,
    points: usize,
    output: &str,
) -> Result<()> {
    let curve = price_curve(
        start_price,
        end_price,
        chrono::Duration::seconds(duration),
        points,
    )?;
    let json = serde_json::to_string_pretty(&curve)?;
    std::fs::write(output, json).with_context(|| format!("Failed to write {}", output))?;
    info!(
        %start_price,
        %end_price,
        duration,
        points,
        output,
        "Expected prices written"
    );
    Ok(())
}

async fn run_simulation(config: Config, max_ticks: Option<u64>) -> Result<()> {
    let actors = Actors::default();
    let roles = Arc::new(RoleRegistry::new());
    roles.grant(Role::Governor, actors.governor);
    roles.grant(Role::Curator, actors.governor);
    roles.grant(Role::Keeper, actors.keeper);

    let mut now: DateTime<Utc> = Utc::now();
    let mut ledger = InMemoryLedger::new();
    ledger.mint(actors.asset, actors.buyer, dec!(1_000_000_000_000))?;

    let mut fleet = FleetCommander::new(
        actors.fleet,
        Box::new(BufferArk::new(actors.buffer)),
        config.buffer.ark_config(),
        config.fleet.params(),
        roles.clone(),
        now,
    );

    let mut positions = Vec::with_capacity(config.arks.len());
    for (i, entry) in config.arks.iter().enumerate() {
        let address = Address::from_low_u64(0x4000 + i as u64);
        let mut ark = SimulatedArk::new(address, entry.name.clone(), entry.rate);
        if !entry.withdrawable {
            ark = ark.non_withdrawable();
        }
        fleet.add_ark(actors.governor, Box::new(ark.clone()), entry.ark_config())?;
        positions.push(SimulatedPosition {
            ark,
            reward_token: Address::from_low_u64(0x3000 + i as u64),
            reward_per_tick: entry.reward_per_tick,
        });
    }

    if config.fleet.initial_deposit > Decimal::ZERO {
        fleet.deposit(actors.depositor, config.fleet.initial_deposit)?;
    }

    let mut raft = Raft::new(
        actors.raft,
        actors.asset,
        config.auction.defaults(),
        roles.clone(),
    );
    let mut planner = RebalancePlanner::new(config.keeper.planner());

    let mut store = if config.persistence.enabled {
        Some(EventStore::new(&config.persistence.db_path)?)
    } else {
        None
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let step = chrono::Duration::seconds(config.keeper.simulated_secs_per_tick);
    let mut interval = tokio::time::interval(Duration::from_secs(config.keeper.tick_interval_secs));
    let mut metrics = SimMetrics::default();

    info!(
        arks = positions.len(),
        initial_deposit = %config.fleet.initial_deposit,
        "Starting keeper loop"
    );

    while !shutdown.load(Ordering::SeqCst) {
        if max_ticks.is_some_and(|max| metrics.ticks >= max) {
            break;
        }
        interval.tick().await;
        metrics.ticks += 1;
        now += step;

        // Interest and reward emissions happen outside the fleet
        for position in &positions {
            let interest = position.ark.accrue(step)?;
            if position.reward_per_tick > Decimal::ZERO {
                ledger.mint(
                    position.reward_token,
                    position.ark.address(),
                    position.reward_per_tick,
                )?;
                position
                    .ark
                    .emit_rewards(position.reward_token, position.reward_per_tick)?;
            }
            debug!(ark = %position.ark.name(), %interest, "Accrued");
        }
        fleet.refresh_balances();

        if let Some(batch) = planner.tick(&mut fleet)? {
            match fleet.rebalance(actors.keeper, &batch, now) {
                Ok(()) => metrics.rebalances += 1,
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "Rebalance deferred");
                }
                Err(e) => {
                    metrics.rebalances_rejected += 1;
                    warn!(error = %e, "Rebalance rejected");
                }
            }
        }

        if metrics.ticks % config.keeper.harvest_every_ticks == 0 {
            liquidate_rewards(
                &actors,
                &positions,
                &mut fleet,
                &mut raft,
                &mut ledger,
                now,
                &mut metrics,
            )?;
        }
        buy_cheap_rewards(&actors, &positions, &mut fleet, &mut raft, &mut ledger, now, &mut metrics);

        let mut events: Vec<FleetEvent> = fleet.drain_events();
        events.extend(raft.drain_events());
        if let Some(store) = store.as_mut() {
            metrics.events_journaled += store.append(&events, now)? as u64;
            store.record_snapshot(&FleetSnapshot {
                taken_at: now,
                total_assets: fleet.total_assets()?,
                buffer_balance: fleet.buffer_balance()?,
                ark_count: fleet.arks().len(),
            })?;
        }

        if metrics.ticks % 10 == 0 {
            info!(
                tick = metrics.ticks,
                sim_time = %now,
                total_assets = %fleet.total_assets()?,
                buffer = %fleet.buffer_balance()?,
                rebalances = metrics.rebalances,
                auctions = metrics.auctions_started,
                "Status"
            );
        }
    }

    info!(?metrics, "Simulation finished");
    Ok(())
}

/// Harvest every ark, close expired auctions and kick new ones.
fn liquidate_rewards(
    actors: &Actors,
    positions: &[SimulatedPosition],
    fleet: &mut FleetCommander,
    raft: &mut Raft,
    ledger: &mut InMemoryLedger,
    now: DateTime<Utc>,
    metrics: &mut SimMetrics,
) -> Result<()> {
    for position in positions {
        let ark = position.ark.address();
        let token = position.reward_token;
        raft.harvest(fleet, ark, &ArkData::empty(), ledger)?;
        if let Err(e) = raft.board_pending_proceeds(fleet, ark, token, ledger) {
            warn!(%ark, error = %e, "Pending proceeds still not boarded");
        }

        let expired = raft
            .auction(ark, token)
            .is_some_and(|a| !a.is_finalized && now >= a.end_time);
        if expired {
            let settlement = raft.finalize_auction(fleet, ark, token, now, ledger)?;
            metrics.auctions_finalized += 1;
            debug!(%ark, unsold = %settlement.unsold_tokens, "Expired auction settled");
        }

        if raft.obtained_tokens(ark, token).is_zero() {
            continue;
        }
        match raft.start_auction(actors.keeper, ark, token, now, ledger) {
            Ok(()) => metrics.auctions_started += 1,
            Err(e) if e.is_retryable() => {
                debug!(auction = %AuctionKey::ark_reward(ark, token), "Auction still running");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// The simulated buyer takes a quarter of what is left once the price has
/// fallen below the midpoint.
fn buy_cheap_rewards(
    actors: &Actors,
    positions: &[SimulatedPosition],
    fleet: &mut FleetCommander,
    raft: &mut Raft,
    ledger: &mut InMemoryLedger,
    now: DateTime<Utc>,
    metrics: &mut SimMetrics,
) {
    for position in positions {
        let ark = position.ark.address();
        let token = position.reward_token;
        let Some(auction) = raft.auction(ark, token) else {
            continue;
        };
        if auction.is_finalized || now >= auction.end_time {
            continue;
        }
        let midpoint = (auction.start_price + auction.end_price) / dec!(2);
        let Ok(price) = auction.current_price(now) else {
            continue;
        };
        if price > midpoint {
            continue;
        }
        let amount = (auction.remaining_tokens / dec!(4)).trunc().max(Decimal::ONE);
        if ledger.balance_of(actors.asset, actors.buyer) < price * amount {
            continue;
        }
        match raft.buy_tokens(fleet, ark, token, actors.buyer, amount, now, ledger) {
            Ok(purchase) => {
                metrics.purchases += 1;
                debug!(%ark, %amount, price = %purchase.price, "Buyer filled");
            }
            Err(e) => error!(%ark, error = %e, "Purchase failed"),
        }
    }
}

fn show_events(db_path: &str, kind: Option<&str>, snapshots: bool) -> Result<()> {
    if !Path::new(db_path).exists() {
        println!("Database not found: {}", db_path);
        println!("Run `fleet-commander simulate` first, or pass --db.");
        return Ok(());
    }

    let store = EventStore::new(db_path)?;
    let events = match kind {
        Some(kind) => store.events_by_kind(kind)?,
        None => store.all_events()?,
    };

    println!("{} events ({} total in journal)", events.len(), store.count()?);
    for stored in &events {
        println!(
            "#{:<6} {}  {}",
            stored.id,
            stored.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            serde_json::to_string(&stored.event)?
        );
    }

    if snapshots {
        println!("\nLatest snapshots");
        for snapshot in store.recent_snapshots(10)? {
            println!(
                "   {}  total={}  buffer={}  arks={}",
                snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC"),
                snapshot.total_assets,
                snapshot.buffer_balance,
                snapshot.ark_count
            );
        }
    }
    Ok(())
}

/// Initialize logging with both console and file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "fleet-commander.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // The writer flushes on drop; keep it for the whole run
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fleet_commander=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Deposit Cap: {}", config.fleet.deposit_cap);
    info!("   Minimum Buffer: {}", config.fleet.minimum_buffer_balance);
    info!(
        "   Rebalance Cooldown: {}s (max {}s)",
        config.fleet.rebalance_cooldown_secs, config.fleet.max_rebalance_cooldown_secs
    );
    for ark in &config.arks {
        info!(
            "   Ark {}: rate {}%, cap {}, withdrawable {}",
            ark.name, ark.rate, ark.deposit_cap, ark.withdrawable
        );
    }
    info!(
        "   Auctions: {}s, {} -> {}, kicker {}%, {} decay",
        config.auction.duration_secs,
        config.auction.start_price,
        config.auction.end_price,
        config.auction.kicker_reward_percentage,
        config.auction.decay
    );
    info!(
        "   Keeper: window {}, min move {}, tick {}s",
        config.keeper.rate_window, config.keeper.min_move_amount, config.keeper.tick_interval_secs
    );
}
