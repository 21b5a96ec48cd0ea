use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Mutex;

use crate::execution::types::{TradeOutcome, TradeRecord};

/// Content address of every derived artifact: one (station, event-day,
/// cycle-timestamp) triple owns exactly one artifact of each kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKey {
    pub station: String,
    pub event_day: NaiveDate,
    pub cycle_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Forecast,
    Market,
    Decisions,
}

impl ArtifactKind {
    fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Forecast => "forecast",
            ArtifactKind::Market => "market",
            ArtifactKind::Decisions => "decisions",
        }
    }
}

/// Durable, replayable snapshot store plus the append-only trade ledger.
///
/// Writes are idempotent: INSERT OR IGNORE keyed on the full snapshot key,
/// so re-running or replaying a cycle is side-effect-free against storage.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                station TEXT NOT NULL,
                event_day TEXT NOT NULL,
                cycle_ts TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (station, event_day, cycle_ts, kind)
            );

            CREATE TABLE IF NOT EXISTS settlements (
                station TEXT NOT NULL,
                event_day TEXT NOT NULL,
                observed_high REAL NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (station, event_day)
            );

            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                station TEXT NOT NULL,
                event_day TEXT NOT NULL,
                settlement_id TEXT NOT NULL,
                price_id TEXT NOT NULL,
                price REAL NOT NULL,
                stake REAL NOT NULL,
                edge REAL NOT NULL,
                executed_at TEXT NOT NULL,
                mode TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trade_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id INTEGER NOT NULL,
                won INTEGER NOT NULL,
                pnl REAL NOT NULL,
                resolved_at TEXT NOT NULL,
                FOREIGN KEY(trade_id) REFERENCES trades(id)
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_station_day
                ON snapshots(station, event_day);
            CREATE INDEX IF NOT EXISTS idx_trades_station_day
                ON trades(station, event_day);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Write one artifact. Returns false when the key already existed, in
    /// which case the stored artifact is untouched.
    pub fn put<T: Serialize>(
        &self,
        key: &SnapshotKey,
        kind: ArtifactKind,
        artifact: &T,
    ) -> Result<bool> {
        let payload = serde_json::to_string(artifact)?;
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO snapshots (station, event_day, cycle_ts, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.station,
                key.event_day.to_string(),
                key.cycle_ts.to_rfc3339(),
                kind.as_str(),
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        key: &SnapshotKey,
        kind: ArtifactKind,
    ) -> Result<Option<T>> {
        let conn = self.conn.lock().unwrap();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM snapshots
                 WHERE station = ?1 AND event_day = ?2 AND cycle_ts = ?3 AND kind = ?4",
                params![
                    key.station,
                    key.event_day.to_string(),
                    key.cycle_ts.to_rfc3339(),
                    kind.as_str(),
                ],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).context("corrupt snapshot payload"))
            .transpose()
    }

    /// All cycle keys for a station with both forecast and market artifacts
    /// inside an event-day range, ordered by day then cycle timestamp.
    pub fn cycle_keys_in_range(
        &self,
        station: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SnapshotKey>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT f.event_day, f.cycle_ts FROM snapshots f
             JOIN snapshots m ON m.station = f.station
                AND m.event_day = f.event_day
                AND m.cycle_ts = f.cycle_ts
                AND m.kind = 'market'
             WHERE f.station = ?1 AND f.kind = 'forecast'
               AND f.event_day >= ?2 AND f.event_day <= ?3
             ORDER BY f.event_day, f.cycle_ts",
        )?;

        let rows = stmt.query_map(
            params![station, from.to_string(), to.to_string()],
            |row| {
                let day: String = row.get(0)?;
                let ts: String = row.get(1)?;
                Ok((day, ts))
            },
        )?;

        let mut keys = Vec::new();
        for row in rows {
            let (day, ts) = row?;
            let event_day = day.parse::<NaiveDate>().context("bad event_day in store")?;
            let cycle_ts = DateTime::parse_from_rfc3339(&ts)
                .context("bad cycle_ts in store")?
                .with_timezone(&Utc);
            keys.push(SnapshotKey {
                station: station.to_string(),
                event_day,
                cycle_ts,
            });
        }
        Ok(keys)
    }

    pub fn put_settlement(
        &self,
        station: &str,
        event_day: NaiveDate,
        observed_high: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO settlements (station, event_day, observed_high, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                station,
                event_day.to_string(),
                observed_high,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn settlement_for(&self, station: &str, event_day: NaiveDate) -> Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT observed_high FROM settlements WHERE station = ?1 AND event_day = ?2",
                params![station, event_day.to_string()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Append a trade to the ledger, returning its row id.
    pub fn insert_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trades (station, event_day, settlement_id, price_id, price, stake, edge, executed_at, mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trade.station,
                trade.event_day.to_string(),
                trade.settlement_id,
                trade.price_id,
                trade.price,
                trade.stake,
                trade.edge,
                trade.executed_at.to_rfc3339(),
                trade.mode.to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Settlement appends an outcome row; the trade row itself is never
    /// rewritten.
    pub fn record_outcome(&self, outcome: &TradeOutcome) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trade_outcomes (trade_id, won, pnl, resolved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                outcome.trade_id,
                outcome.won as i64,
                outcome.pnl,
                outcome.resolved_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn count_trades(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: usize = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::ForecastSnapshot;
    use crate::data::types::TempUnit;
    use crate::execution::types::ExecutionMode;
    use chrono::TimeZone;

    fn key() -> SnapshotKey {
        SnapshotKey {
            station: "KNYC".into(),
            event_day: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            cycle_ts: Utc.with_ymd_and_hms(2026, 3, 10, 14, 30, 0).unwrap(),
        }
    }

    fn forecast() -> ForecastSnapshot {
        ForecastSnapshot {
            station: "KNYC".into(),
            event_day: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            fetched_at: Utc.with_ymd_and_hms(2026, 3, 10, 14, 30, 0).unwrap(),
            unit: TempUnit::Fahrenheit,
            times: vec![],
            temps: vec![48.0, 50.0, 51.0],
        }
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = SnapshotStore::in_memory().unwrap();
        assert!(store.put(&key(), ArtifactKind::Forecast, &forecast()).unwrap());
        // Second write with different content is ignored, not overwritten
        let mut other = forecast();
        other.temps = vec![99.0];
        assert!(!store.put(&key(), ArtifactKind::Forecast, &other).unwrap());

        let stored: ForecastSnapshot = store.get(&key(), ArtifactKind::Forecast).unwrap().unwrap();
        assert_eq!(stored.temps, vec![48.0, 50.0, 51.0]);
    }

    #[test]
    fn test_tail_brackets_replay_from_archive() {
        use crate::data::types::{MarketBracket, MarketQuote, MarketSnapshot};

        let store = SnapshotStore::in_memory().unwrap();
        let market = MarketSnapshot {
            brackets: vec![
                MarketBracket {
                    lower: f64::NEG_INFINITY,
                    upper: 48.0,
                    settlement_id: "s-low".into(),
                    price_id: "p-low".into(),
                },
                MarketBracket {
                    lower: 55.0,
                    upper: f64::INFINITY,
                    settlement_id: "s-high".into(),
                    price_id: "p-high".into(),
                },
            ],
            quotes: vec![MarketQuote {
                price_id: "p-low".into(),
                mid: 0.2,
                bid_depth: 100.0,
                ask_depth: 100.0,
            }],
            trend: None,
            fetched_at: key().cycle_ts,
        };
        store.put(&key(), ArtifactKind::Market, &market).unwrap();

        let back: MarketSnapshot = store.get(&key(), ArtifactKind::Market).unwrap().unwrap();
        assert_eq!(back.brackets, market.brackets);
        assert!(back.brackets[0].is_low_tail());
        assert!(back.brackets[1].is_high_tail());
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = SnapshotStore::in_memory().unwrap();
        let got: Option<ForecastSnapshot> = store.get(&key(), ArtifactKind::Forecast).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_cycle_keys_require_both_artifacts() {
        let store = SnapshotStore::in_memory().unwrap();
        let k = key();
        store.put(&k, ArtifactKind::Forecast, &forecast()).unwrap();

        // Forecast alone is not a replayable cycle
        let keys = store
            .cycle_keys_in_range("KNYC", k.event_day, k.event_day)
            .unwrap();
        assert!(keys.is_empty());

        store
            .put(&k, ArtifactKind::Market, &serde_json::json!({"brackets": []}))
            .unwrap();
        let keys = store
            .cycle_keys_in_range("KNYC", k.event_day, k.event_day)
            .unwrap();
        assert_eq!(keys, vec![k]);
    }

    #[test]
    fn test_trade_ledger_roundtrip() {
        let store = SnapshotStore::in_memory().unwrap();
        let trade = TradeRecord {
            id: None,
            station: "KNYC".into(),
            event_day: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            settlement_id: "s-1".into(),
            price_id: "p-1".into(),
            price: 0.31,
            stake: 250.0,
            edge: 0.09,
            executed_at: Utc::now(),
            mode: ExecutionMode::Paper,
        };
        let id = store.insert_trade(&trade).unwrap();
        assert!(id > 0);
        assert_eq!(store.count_trades().unwrap(), 1);

        store
            .record_outcome(&TradeOutcome {
                trade_id: id,
                won: true,
                pnl: 550.0,
                resolved_at: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn test_settlement_storage() {
        let store = SnapshotStore::in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        store.put_settlement("KNYC", day, 51.0).unwrap();
        assert_eq!(store.settlement_for("KNYC", day).unwrap(), Some(51.0));
        assert_eq!(store.settlement_for("KMIA", day).unwrap(), None);
    }
}
