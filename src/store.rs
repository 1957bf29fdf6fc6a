//! Row-store persistence: one SQLite connection behind a mutex, same shape
//! as the donor's `database_tracker.rs` (`Arc<Mutex<Connection>>` plus
//! `include_str!("../schema.sql")`), generalized from opportunity-tracking
//! rows to the engine's own collections (bots, endpoints, trades, daily
//! volume, pending confirmations, blocklist).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::bot_scheduler::BotStore;
use crate::executor::TradeSink;
use crate::models::{Bot, BotStatus, DailyVolume, Endpoint, PendingConfirmation, TradeRecord};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("failed to create database directory")?;
            }
        }
        let conn = Connection::open(db_path).context("failed to open database")?;
        Self::init(conn, db_path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init(conn, "in-memory".to_string())
    }

    fn init(conn: Connection, label: String) -> Result<Self> {
        let schema = include_str!("../schema.sql");
        conn.execute_batch(schema).context("failed to apply schema")?;
        info!(db = %label, "store initialized");
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn save_bot(&self, bot: &Bot) -> Result<()> {
        let data = serde_json::to_string(bot).context("bot does not serialize")?;
        let status = match bot.state.status {
            BotStatus::Active => "active",
            BotStatus::Paused => "paused",
            BotStatus::Completed => "completed",
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bots (id, kind, status, input_mint, output_mint, data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind, status = excluded.status,
                input_mint = excluded.input_mint, output_mint = excluded.output_mint,
                data = excluded.data, updated_at = excluded.updated_at",
            params![
                bot.id,
                format!("{:?}", bot.kind),
                status,
                bot.input_mint,
                bot.output_mint,
                data,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("failed to upsert bot row")?;
        Ok(())
    }

    pub fn active_bots(&self) -> Result<Vec<Bot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data FROM bots WHERE status = 'active'")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("failed to read bot rows")?;
        rows.into_iter()
            .map(|json| serde_json::from_str(&json).context("stored bot row does not deserialize"))
            .collect()
    }

    pub fn all_bots(&self) -> Result<Vec<Bot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data FROM bots")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("failed to read bot rows")?;
        rows.into_iter()
            .map(|json| serde_json::from_str(&json).context("stored bot row does not deserialize"))
            .collect()
    }

    pub fn delete_bot(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM bots WHERE id = ?1", params![id]).context("failed to delete bot row")?;
        Ok(())
    }

    pub fn record_trade(&self, record: &TradeRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO trades (
                input_mint, output_mint, input_symbol, output_symbol, amount_in, amount_out,
                usd_value, slippage_bps, priority_fee_lamports, signature, source, status, executed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.input_mint,
                record.output_mint,
                record.input_symbol,
                record.output_symbol,
                record.amount_in,
                record.amount_out,
                record.usd_value,
                record.slippage_bps,
                record.priority_fee_lamports as i64,
                record.signature,
                record.source,
                record.status,
                record.executed_at.to_rfc3339(),
            ],
        )
        .context("failed to insert trade row")?;

        let today = record.executed_at.date_naive();
        conn.execute(
            "INSERT INTO daily_volume (date, volume_usd, trade_count) VALUES (?1, ?2, 1)
             ON CONFLICT(date) DO UPDATE SET
                volume_usd = volume_usd + excluded.volume_usd,
                trade_count = trade_count + 1",
            params![today.to_string(), record.usd_value],
        )
        .context("failed to roll up daily volume")?;
        Ok(())
    }

    pub fn daily_volume(&self, date: NaiveDate) -> Result<DailyVolume> {
        let conn = self.conn.lock();
        let row = conn
            .query_row("SELECT volume_usd, trade_count FROM daily_volume WHERE date = ?1", params![date.to_string()], |row| {
                Ok(DailyVolume { date, volume_usd: row.get(0)?, trade_count: row.get(1)? })
            })
            .optional()
            .context("failed to read daily volume")?;
        Ok(row.unwrap_or_else(|| DailyVolume::for_date(date)))
    }

    pub fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO endpoints (
                url, label, healthy, consecutive_failures, consecutive_recovery_probes,
                total_failures, total_successes, last_failure_time, last_success_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(url) DO UPDATE SET
                label = excluded.label, healthy = excluded.healthy,
                consecutive_failures = excluded.consecutive_failures,
                consecutive_recovery_probes = excluded.consecutive_recovery_probes,
                total_failures = excluded.total_failures, total_successes = excluded.total_successes,
                last_failure_time = excluded.last_failure_time, last_success_time = excluded.last_success_time",
            params![
                endpoint.url,
                endpoint.label,
                endpoint.healthy,
                endpoint.consecutive_failures,
                endpoint.consecutive_recovery_probes,
                endpoint.total_failures as i64,
                endpoint.total_successes as i64,
                endpoint.last_failure_time.map(|t| t.to_rfc3339()),
                endpoint.last_success_time.map(|t| t.to_rfc3339()),
            ],
        )
        .context("failed to upsert endpoint row")?;
        Ok(())
    }

    pub fn save_pending_confirmation(&self, pending: &PendingConfirmation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO pending_confirmations (
                id, input_mint, output_mint, amount, usd_value, slippage_bps, source, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                pending.id,
                pending.input_mint,
                pending.output_mint,
                pending.amount,
                pending.usd_value,
                pending.slippage_bps,
                pending.source,
                pending.expires_at.to_rfc3339(),
            ],
        )
        .context("failed to insert pending confirmation row")?;
        Ok(())
    }

    pub fn clear_pending_confirmation(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM pending_confirmations WHERE id = ?1", params![id]).context("failed to clear pending confirmation")?;
        Ok(())
    }

    pub fn blocklist(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT mint FROM blocklist")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?.collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    pub fn add_to_blocklist(&self, mint: &str, reason: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO blocklist (mint, reason) VALUES (?1, ?2)",
            params![mint, reason],
        )
        .context("failed to insert blocklist row")?;
        Ok(())
    }

    pub fn save_blockhash_snapshot(&self, blockhash: &str, last_valid_block_height: u64, slot: u64, fetched_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO blockhash_snapshots (blockhash, last_valid_block_height, slot, fetched_at) VALUES (?1, ?2, ?3, ?4)",
            params![blockhash, last_valid_block_height as i64, slot as i64, fetched_at.to_rfc3339()],
        )
        .context("failed to insert blockhash snapshot")?;
        Ok(())
    }

    /// Upserts the traded volume for `mint` in the hour bucket containing
    /// `at`, accumulating if a tick already landed in that bucket.
    pub fn record_hourly_volume(&self, mint: &str, at: DateTime<Utc>, volume: f64) -> Result<()> {
        let bucket = at.format("%Y-%m-%dT%H:00:00Z").to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ohlcv_cache (mint, hour_bucket, volume) VALUES (?1, ?2, ?3)
             ON CONFLICT(mint, hour_bucket) DO UPDATE SET volume = volume + excluded.volume",
            params![mint, bucket, volume],
        )
        .context("failed to upsert ohlcv_cache row")?;
        Ok(())
    }

    /// `hour_weight / avg_weight` for `mint` over the trailing
    /// `VWAP_LOOKBACK_HOURS` window: the most recent bucket's volume against
    /// the mean of every bucket in the window. `0.0` with no history yet.
    pub fn hour_weight_ratio(&self, mint: &str, now: DateTime<Utc>) -> f64 {
        let since = (now - ChronoDuration::hours(crate::constants::VWAP_LOOKBACK_HOURS)).format("%Y-%m-%dT%H:00:00Z").to_string();
        let current_bucket = now.format("%Y-%m-%dT%H:00:00Z").to_string();
        let conn = self.conn.lock();

        let current_volume: f64 = conn
            .query_row(
                "SELECT volume FROM ohlcv_cache WHERE mint = ?1 AND hour_bucket = ?2",
                params![mint, current_bucket],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or(None)
            .unwrap_or(0.0);

        let avg_volume: Option<f64> = conn
            .query_row(
                "SELECT AVG(volume) FROM ohlcv_cache WHERE mint = ?1 AND hour_bucket >= ?2 AND hour_bucket < ?3",
                params![mint, since, current_bucket],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()
            .unwrap_or(None)
            .flatten();

        match avg_volume {
            Some(avg) if avg > 0.0 => current_volume / avg,
            _ => 0.0,
        }
    }
}

impl crate::bot_scheduler::VolumeWeightOracle for Store {
    fn weight_ratio(&self, mint: &str) -> f64 {
        self.hour_weight_ratio(mint, Utc::now())
    }
}

#[async_trait]
impl BotStore for Store {
    async fn active_bots(&self) -> Result<Vec<Bot>> {
        Store::active_bots(self)
    }

    async fn save_bot(&self, bot: &Bot) -> Result<()> {
        Store::save_bot(self, bot)
    }
}

#[async_trait]
impl TradeSink for Store {
    async fn record_trade(&self, record: TradeRecord) -> Result<()> {
        Store::record_trade(self, &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BotConfig, BotKind};

    fn sample_bot(id: &str) -> Bot {
        Bot::new(id, BotKind::Grid, "So111".to_string(), "EPj111".to_string(), BotConfig::default(), Utc::now())
    }

    #[test]
    fn save_and_load_active_bot_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let bot = sample_bot("bot-1");
        store.save_bot(&bot).unwrap();
        let active = store.active_bots().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "bot-1");
    }

    #[test]
    fn paused_bot_excluded_from_active_bots() {
        let store = Store::open_in_memory().unwrap();
        let mut bot = sample_bot("bot-2");
        bot.state.status = BotStatus::Paused;
        store.save_bot(&bot).unwrap();
        assert!(store.active_bots().unwrap().is_empty());
        assert_eq!(store.all_bots().unwrap().len(), 1);
    }

    #[test]
    fn recording_a_trade_rolls_up_daily_volume() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let record = TradeRecord {
            input_mint: "So111".into(),
            output_mint: "EPj111".into(),
            input_symbol: "SOL".into(),
            output_symbol: "USDC".into(),
            amount_in: 1.0,
            amount_out: 150.0,
            usd_value: 150.0,
            slippage_bps: 50,
            priority_fee_lamports: 10_000,
            signature: "sig-1".into(),
            source: "jupiter".into(),
            status: "confirmed".into(),
            executed_at: now,
        };
        store.record_trade(&record).unwrap();
        let volume = store.daily_volume(now.date_naive()).unwrap();
        assert_eq!(volume.trade_count, 1);
        assert_eq!(volume.volume_usd, 150.0);
    }

    #[test]
    fn duplicate_signature_is_ignored_not_double_counted() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let record = TradeRecord {
            input_mint: "So111".into(),
            output_mint: "EPj111".into(),
            input_symbol: "SOL".into(),
            output_symbol: "USDC".into(),
            amount_in: 1.0,
            amount_out: 150.0,
            usd_value: 150.0,
            slippage_bps: 50,
            priority_fee_lamports: 10_000,
            signature: "sig-dup".into(),
            source: "jupiter".into(),
            status: "confirmed".into(),
            executed_at: now,
        };
        store.record_trade(&record).unwrap();
        store.record_trade(&record).unwrap();
        let volume = store.daily_volume(now.date_naive()).unwrap();
        assert_eq!(volume.trade_count, 1);
    }

    #[test]
    fn blocklist_insert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.add_to_blocklist("BADMINT", Some("rug")).unwrap();
        store.add_to_blocklist("BADMINT", Some("rug")).unwrap();
        assert_eq!(store.blocklist().unwrap(), vec!["BADMINT".to_string()]);
    }

    #[test]
    fn hour_weight_ratio_is_zero_with_no_history() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.hour_weight_ratio("TOKEN", Utc::now()), 0.0);
    }

    #[test]
    fn hour_weight_ratio_reflects_current_hour_against_window_average() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        for h in 1..=4 {
            store.record_hourly_volume("TOKEN", now - ChronoDuration::hours(h), 200.0).unwrap();
        }
        store.record_hourly_volume("TOKEN", now, 300.0).unwrap();
        let ratio = store.hour_weight_ratio("TOKEN", now);
        assert!((ratio - 1.5).abs() < 0.05);
    }

    #[test]
    fn repeated_ticks_in_the_same_hour_accumulate_volume() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.record_hourly_volume("TOKEN", now, 50.0).unwrap();
        store.record_hourly_volume("TOKEN", now, 25.0).unwrap();
        let avg: f64 = store
            .conn
            .lock()
            .query_row("SELECT volume FROM ohlcv_cache WHERE mint = 'TOKEN'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(avg, 75.0);
    }
}
