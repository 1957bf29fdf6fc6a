//! Core data model: bots, endpoints, blockhash snapshots, trade records.
//!
//! Bot config/state are typed per kind rather than dynamic dicts; the JSON
//! shape is only produced at the row-store boundary (see `store.rs`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type Mint = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintMeta {
    pub symbol: String,
    pub decimals: u8,
    pub logo_uri: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotKind {
    Dca,
    Twap,
    Vwap,
    Grid,
    LimitGrid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    MaxRuns,
    StopLoss,
    TakeProfit,
    CircuitBreaker,
    UserRequested,
}

/// One level of a grid strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridLevel {
    pub price: f64,
    pub has_position: bool,
    pub token_amount: f64,
    pub cost_usd: f64,
    pub order_id: Option<String>,
}

impl GridLevel {
    pub fn empty(price: f64) -> Self {
        Self {
            price,
            has_position: false,
            token_amount: 0.0,
            cost_usd: 0.0,
            order_id: None,
        }
    }

    /// Invariant from spec §3: `has_position ⇒ token_amount > 0 ∧ cost_usd > 0`.
    pub fn invariant_holds(&self) -> bool {
        !self.has_position || (self.token_amount > 0.0 && self.cost_usd > 0.0)
    }
}

/// Phase of a DCA/TWAP/VWAP bot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationPhase {
    Accumulating,
    MonitoringProfit,
    Completed,
}

/// Immutable-unless-edited configuration, shape varies by kind but is
/// flattened into one struct (spec §9: arena-style, not a separate table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub amount: f64,
    pub interval_minutes: f64,
    pub max_runs: Option<u32>,
    pub take_profit_pct: Option<f64>,
    pub take_profit_yield_usd: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub steps: Option<u32>,
    pub amount_per_level: Option<f64>,
    pub trailing_enabled: bool,
    pub hysteresis_pct: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            amount: 0.0,
            interval_minutes: 60.0,
            max_runs: None,
            take_profit_pct: None,
            take_profit_yield_usd: None,
            stop_loss_price: None,
            lower_bound: None,
            upper_bound: None,
            steps: None,
            amount_per_level: None,
            trailing_enabled: false,
            hysteresis_pct: crate::constants::DEFAULT_GRID_HYSTERESIS_PCT,
        }
    }
}

/// Mutable state evolved by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotState {
    pub status: BotStatus,
    pub completion_reason: Option<CompletionReason>,
    pub run_count: u32,
    pub total_bought: f64,
    pub total_cost: f64,
    pub profit_realized: f64,
    pub grid_yield: f64,
    pub next_run: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub avg_buy_price: f64,
    pub phase: AccumulationPhase,
    pub levels: Vec<GridLevel>,
}

impl BotState {
    pub fn new_active(now: DateTime<Utc>) -> Self {
        Self {
            status: BotStatus::Active,
            completion_reason: None,
            run_count: 0,
            total_bought: 0.0,
            total_cost: 0.0,
            profit_realized: 0.0,
            grid_yield: 0.0,
            next_run: now,
            consecutive_failures: 0,
            avg_buy_price: 0.0,
            phase: AccumulationPhase::Accumulating,
            levels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub kind: BotKind,
    pub input_mint: Mint,
    pub output_mint: Mint,
    pub config: BotConfig,
    pub state: BotState,
}

impl Bot {
    pub fn new(id: impl Into<String>, kind: BotKind, input_mint: Mint, output_mint: Mint, config: BotConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind,
            input_mint,
            output_mint,
            config,
            state: BotState::new_active(now),
        }
    }

    /// Invariant from spec §8: grid levels never claim a position without
    /// backing amount/cost.
    pub fn grid_invariant_holds(&self) -> bool {
        self.state.levels.iter().all(GridLevel::invariant_holds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub label: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_recovery_probes: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
            healthy: true,
            consecutive_failures: 0,
            consecutive_recovery_probes: 0,
            total_failures: 0,
            total_successes: 0,
            last_failure_time: None,
            last_success_time: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockhashSnapshot {
    pub blockhash: String,
    pub last_valid_block_height: u64,
    pub slot: u64,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub input_mint: Mint,
    pub output_mint: Mint,
    pub input_symbol: String,
    pub output_symbol: String,
    pub amount_in: f64,
    pub amount_out: f64,
    pub usd_value: f64,
    pub slippage_bps: u16,
    pub priority_fee_lamports: u64,
    pub signature: String,
    pub source: String,
    pub status: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyVolume {
    pub date: NaiveDate,
    pub volume_usd: f64,
    pub trade_count: u32,
}

impl DailyVolume {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date,
            volume_usd: 0.0,
            trade_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub id: String,
    pub input_mint: Mint,
    pub output_mint: Mint,
    pub amount: f64,
    pub usd_value: f64,
    pub slippage_bps: u16,
    pub source: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_level_invariant() {
        let mut level = GridLevel::empty(100.0);
        assert!(level.invariant_holds());
        level.has_position = true;
        assert!(!level.invariant_holds());
        level.token_amount = 10.0;
        level.cost_usd = 500.0;
        assert!(level.invariant_holds());
    }

    #[test]
    fn bot_row_round_trips_through_json() {
        let now = Utc::now();
        let bot = Bot::new(
            "bot-1",
            BotKind::Grid,
            "So11111111111111111111111111111111111111112".to_string(),
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            BotConfig::default(),
            now,
        );
        let json = serde_json::to_string(&bot).unwrap();
        let restored: Bot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, bot.id);
        assert_eq!(restored.kind, bot.kind);
        assert_eq!(restored.state.status, bot.state.status);
        assert_eq!(restored.config.hysteresis_pct, bot.config.hysteresis_pct);
    }
}
