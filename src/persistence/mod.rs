//! SQLite journal of fleet events.
//!
//! Indexers replay the journal instead of the live process:
//! - Every emitted event, in emission order, as tagged JSON
//! - Periodic fleet snapshots (total assets, buffer balance)

use crate::auction::AuctionKey;
use crate::events::FleetEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// One journaled event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub event: FleetEvent,
}

/// Point-in-time fleet totals.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSnapshot {
    pub taken_at: DateTime<Utc>,
    pub total_assets: Decimal,
    pub buffer_balance: Decimal,
    pub ark_count: usize,
}

/// SQLite-backed event store.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (or create) the store at `db_path`. `":memory:"` works for tests.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Event store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                auction TEXT,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
            CREATE INDEX IF NOT EXISTS idx_events_auction ON events(auction);

            CREATE TABLE IF NOT EXISTS fleet_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                taken_at TEXT NOT NULL,
                total_assets TEXT NOT NULL,
                buffer_balance TEXT NOT NULL,
                ark_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_taken_at ON fleet_snapshots(taken_at);
            "#,
        )?;
        Ok(())
    }

    fn auction_column(key: &AuctionKey) -> Result<String> {
        serde_json::to_string(key).context("Failed to encode auction key")
    }

    /// Append events in order inside one transaction.
    pub fn append(&mut self, events: &[FleetEvent], recorded_at: DateTime<Utc>) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO events (recorded_at, kind, auction, payload)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for event in events {
                let auction = event.auction().map(Self::auction_column).transpose()?;
                let payload =
                    serde_json::to_string(event).context("Failed to encode event payload")?;
                stmt.execute(params![
                    recorded_at.to_rfc3339(),
                    event.kind(),
                    auction,
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = events.len(), "Events journaled");
        Ok(events.len())
    }

    fn query_events(&self, sql: &str, param: Option<&str>) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        };
        let rows: Vec<(i64, String, String)> = match param {
            Some(p) => stmt.query_map([p], map_row)?.collect::<rusqlite::Result<_>>()?,
            None => stmt.query_map([], map_row)?.collect::<rusqlite::Result<_>>()?,
        };

        rows.into_iter()
            .map(|(id, ts, payload)| {
                let recorded_at = DateTime::parse_from_rfc3339(&ts)
                    .with_context(|| format!("Bad timestamp on event {}", id))?
                    .with_timezone(&Utc);
                let event = serde_json::from_str(&payload)
                    .with_context(|| format!("Bad payload on event {}", id))?;
                Ok(StoredEvent {
                    id,
                    recorded_at,
                    event,
                })
            })
            .collect()
    }

    /// Every event, oldest first.
    pub fn all_events(&self) -> Result<Vec<StoredEvent>> {
        self.query_events(
            "SELECT id, recorded_at, payload FROM events ORDER BY id",
            None,
        )
    }

    /// Events belonging to one auction, in emission order.
    pub fn events_for_auction(&self, key: &AuctionKey) -> Result<Vec<StoredEvent>> {
        let column = Self::auction_column(key)?;
        self.query_events(
            "SELECT id, recorded_at, payload FROM events WHERE auction = ?1 ORDER BY id",
            Some(&column),
        )
    }

    pub fn events_by_kind(&self, kind: &str) -> Result<Vec<StoredEvent>> {
        self.query_events(
            "SELECT id, recorded_at, payload FROM events WHERE kind = ?1 ORDER BY id",
            Some(kind),
        )
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn record_snapshot(&self, snapshot: &FleetSnapshot) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO fleet_snapshots (taken_at, total_assets, buffer_balance, ark_count)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                snapshot.taken_at.to_rfc3339(),
                snapshot.total_assets.to_string(),
                snapshot.buffer_balance.to_string(),
                snapshot.ark_count as i64,
            ],
        )?;
        Ok(())
    }

    /// Most recent snapshots, newest first.
    pub fn recent_snapshots(&self, limit: usize) -> Result<Vec<FleetSnapshot>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT taken_at, total_assets, buffer_balance, ark_count
            FROM fleet_snapshots
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows: Vec<(String, String, String, i64)> = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        rows.into_iter()
            .map(|(ts, total, buffer, ark_count)| {
                Ok(FleetSnapshot {
                    taken_at: DateTime::parse_from_rfc3339(&ts)
                        .context("Bad snapshot timestamp")?
                        .with_timezone(&Utc),
                    total_assets: Decimal::from_str(&total).context("Bad total_assets")?,
                    buffer_balance: Decimal::from_str(&buffer).context("Bad buffer_balance")?,
                    ark_count: ark_count as usize,
                })
            })
            .collect()
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing event store");
        self.conn.execute_batch(
            r#"
            DELETE FROM events;
            DELETE FROM fleet_snapshots;
            "#,
        )?;
        Ok(())
    }
}
