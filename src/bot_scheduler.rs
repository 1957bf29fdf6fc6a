//! Grid/DCA/TWAP/VWAP/LIMIT_GRID state machines.
//!
//! Ported from `bots.py`: one lazily-created lock per bot id, every handler
//! takes it non-blocking (a busy bot just skips the tick), and the row
//! store's `status` column is the single source of truth for a bot's
//! lifecycle — any JSON state blob is a read-only mirror for presentation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::constants::{CIRCUIT_BREAKER_FAILURE_THRESHOLD, DCA_FAILURE_RETRY_SECONDS, PERFORMANCE_UPDATE_THROTTLE};
use crate::models::{AccumulationPhase, Bot, BotKind, BotStatus, CompletionReason, GridLevel, Mint};

#[derive(Debug, Clone, Copy)]
pub struct TradeOutcome {
    pub amount_out: f64,
    pub usd_value: f64,
}

/// Decouples the scheduler from the concrete swap path (Executor or
/// PumpfunBuilder + submitter); the scheduler only needs in/out amounts.
#[async_trait::async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, input_mint: &str, output_mint: &str, amount: f64, source: &str, priority_fee_lamports: u64) -> Result<TradeOutcome>;
}

/// Decouples from `portfolio.rs`'s cached balance map.
pub trait BalanceOracle: Send + Sync {
    fn cached_balance(&self, mint: &str) -> f64;
}

/// Decouples from the aggregator's limit-order surface (LIMIT_GRID only).
#[async_trait::async_trait]
pub trait LimitOrderService: Send + Sync {
    async fn open_order_pubkeys(&self) -> Result<Vec<String>>;
    async fn create_limit_order(&self, sell_mint: &str, buy_mint: &str, amount: f64, price: f64) -> Result<String>;
}

/// Decouples from the websocket/notification layer.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str, level: &str);
}

/// Decouples from the row-store boundary (`store.rs`).
#[async_trait::async_trait]
pub trait BotStore: Send + Sync {
    async fn active_bots(&self) -> Result<Vec<Bot>>;
    async fn save_bot(&self, bot: &Bot) -> Result<()>;
}

/// Hourly volume weighting for VWAP; decoupled so the scheduler doesn't
/// need to know how the lookback window is computed.
pub trait VolumeWeightOracle: Send + Sync {
    /// `hour_weight / avg_weight` for `mint`, uncapped.
    fn weight_ratio(&self, mint: &str) -> f64;
}

// ---------------------------------------------------------------------
// Pure state-machine helpers (unit-testable without I/O or locks)
// ---------------------------------------------------------------------

pub fn circuit_breaker_tripped(consecutive_failures: u32) -> bool {
    consecutive_failures >= CIRCUIT_BREAKER_FAILURE_THRESHOLD
}

pub fn stop_loss_tripped(stop_loss_price: Option<f64>, price: f64) -> bool {
    stop_loss_price.is_some_and(|sl| price <= sl)
}

pub fn take_profit_yield_tripped(take_profit_yield_usd: Option<f64>, grid_yield: f64) -> bool {
    take_profit_yield_usd.is_some_and(|tp| grid_yield >= tp)
}

pub fn grid_sell_trigger(level: &GridLevel, price: f64, hysteresis: f64) -> bool {
    level.has_position && price >= level.price + hysteresis
}

pub fn grid_buy_trigger(level: &GridLevel, price: f64, hysteresis: f64) -> bool {
    !level.has_position && price <= level.price - hysteresis
}

/// Step size for a trailing-grid shift, or `None` if trailing doesn't
/// apply at this tick.
pub fn trailing_step(trailing_enabled: bool, price: f64, lower_bound: f64, upper_bound: f64, steps: u32) -> Option<f64> {
    if !trailing_enabled || price < upper_bound || steps < 2 {
        return None;
    }
    Some((upper_bound - lower_bound) / (steps - 1) as f64)
}

pub fn grid_unrealized_appreciation(levels: &[GridLevel], current_price: f64) -> f64 {
    levels
        .iter()
        .filter(|l| l.has_position && l.token_amount > 0.0 && l.cost_usd > 0.0)
        .map(|l| (l.token_amount * current_price) - l.cost_usd)
        .sum()
}

pub fn dca_profit_realized(total_bought: f64, total_cost: f64, current_price: f64) -> f64 {
    (total_bought * current_price) - total_cost
}

pub fn vwap_weighted_amount(base_per_slot: f64, weight_ratio: f64) -> f64 {
    base_per_slot * weight_ratio.min(3.0).max(0.0)
}

pub fn next_accumulating_run(now: chrono::DateTime<Utc>, interval_minutes: f64) -> chrono::DateTime<Utc> {
    now + ChronoDuration::milliseconds((interval_minutes * 60_000.0) as i64)
}

pub fn monitoring_profit_target(avg_buy_price: f64, take_profit_pct: f64) -> f64 {
    avg_buy_price * (1.0 + take_profit_pct / 100.0)
}

// ---------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------

pub struct BotScheduler {
    store: Arc<dyn BotStore>,
    executor: Arc<dyn TradeExecutor>,
    balances: Arc<dyn BalanceOracle>,
    limit_orders: Arc<dyn LimitOrderService>,
    notifications: Arc<dyn NotificationSink>,
    volume_weights: Arc<dyn VolumeWeightOracle>,
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    last_performance_update: parking_lot::Mutex<HashMap<String, Instant>>,
}

impl BotScheduler {
    pub fn new(
        store: Arc<dyn BotStore>,
        executor: Arc<dyn TradeExecutor>,
        balances: Arc<dyn BalanceOracle>,
        limit_orders: Arc<dyn LimitOrderService>,
        notifications: Arc<dyn NotificationSink>,
        volume_weights: Arc<dyn VolumeWeightOracle>,
    ) -> Self {
        Self {
            store,
            executor,
            balances,
            limit_orders,
            notifications,
            volume_weights,
            locks: parking_lot::Mutex::new(HashMap::new()),
            last_performance_update: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn bot_lock(&self, bot_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(bot_id.to_string()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
    }

    /// Invoked on every price-update event from the stream and on the 15 s
    /// wake timer. `price` is the latest known price of `mint` in USD.
    pub async fn on_price_tick(&self, mint: &Mint, price: f64) -> Result<()> {
        for mut bot in self.store.active_bots().await? {
            if &bot.output_mint != mint {
                continue;
            }
            let lock = self.bot_lock(&bot.id);
            let Ok(_guard) = lock.try_lock() else { continue };

            match bot.kind {
                BotKind::Grid => self.process_grid(&mut bot, price).await,
                BotKind::Dca | BotKind::Twap | BotKind::Vwap => self.process_accumulating(&mut bot, price).await,
                BotKind::LimitGrid => Ok(()),
            }?;

            self.maybe_update_performance(&mut bot, price).await?;
        }
        Ok(())
    }

    /// Invoked every 15 s regardless of price activity: drives DCA/TWAP/VWAP
    /// accumulation wakeups and LIMIT_GRID fill detection.
    pub async fn on_wake_tick(&self) -> Result<()> {
        for mut bot in self.store.active_bots().await? {
            let lock = self.bot_lock(&bot.id);
            let Ok(_guard) = lock.try_lock() else { continue };
            match bot.kind {
                BotKind::Dca | BotKind::Twap | BotKind::Vwap => {
                    if bot.state.phase == AccumulationPhase::Accumulating && Utc::now() >= bot.state.next_run {
                        self.run_accumulation_step(&mut bot).await?;
                    }
                }
                BotKind::LimitGrid => self.process_limit_grid(&mut bot).await?,
                BotKind::Grid => {}
            }
        }
        Ok(())
    }

    async fn process_grid(&self, bot: &mut Bot, price: f64) -> Result<()> {
        if bot.state.status != BotStatus::Active {
            return Ok(());
        }
        let alias = bot.id.clone();

        if circuit_breaker_tripped(bot.state.consecutive_failures) {
            warn!(bot = %alias, "circuit breaker tripped, pausing grid bot");
            bot.state.status = BotStatus::Paused;
            self.notifications.notify("Circuit Breaker", &format!("Bot {alias} paused after repeated failures."), "error");
            self.store.save_bot(bot).await?;
            return Ok(());
        }
        if stop_loss_tripped(bot.config.stop_loss_price, price) {
            bot.state.status = BotStatus::Completed;
            bot.state.completion_reason = Some(CompletionReason::StopLoss);
            self.notifications.notify("Stop Loss", &format!("Bot {alias} stopped out at {price:.4}."), "error");
            self.store.save_bot(bot).await?;
            return Ok(());
        }
        if take_profit_yield_tripped(bot.config.take_profit_yield_usd, bot.state.grid_yield) {
            bot.state.status = BotStatus::Completed;
            bot.state.completion_reason = Some(CompletionReason::TakeProfit);
            self.notifications.notify("Take Profit", &format!("Bot {alias} hit its yield target."), "success");
            self.store.save_bot(bot).await?;
            return Ok(());
        }

        let hysteresis = price * bot.config.hysteresis_pct / 100.0;
        let mut changed = false;

        for i in 0..bot.state.levels.len() {
            if grid_sell_trigger(&bot.state.levels[i], price, hysteresis) {
                changed |= self.grid_sell_level(bot, i).await?;
            } else if grid_buy_trigger(&bot.state.levels[i], price, hysteresis) {
                changed |= self.grid_buy_level(bot, i, price).await?;
            }
        }

        if changed {
            if let Some(lower) = bot.config.lower_bound {
                if let (Some(upper), Some(steps)) = (bot.config.upper_bound, bot.config.steps) {
                    if let Some(step) = trailing_step(bot.config.trailing_enabled, price, lower, upper, steps) {
                        bot.config.lower_bound = Some(lower + step);
                        bot.config.upper_bound = Some(upper + step);
                        for level in bot.state.levels.iter_mut() {
                            level.price += step;
                        }
                        self.notifications.notify("Grid Trailing Active", &format!("Bot {alias} shifted up."), "info");
                    }
                }
            }
            self.store.save_bot(bot).await?;
        }
        Ok(())
    }

    async fn grid_sell_level(&self, bot: &mut Bot, i: usize) -> Result<bool> {
        let mut token_amount = bot.state.levels[i].token_amount;
        if token_amount <= 0.0 {
            return Ok(false);
        }
        let wallet_bal = self.balances.cached_balance(&bot.output_mint);
        if wallet_bal < token_amount {
            bot.state.levels[i].token_amount = wallet_bal;
            token_amount = wallet_bal;
            if token_amount < 1e-9 {
                bot.state.levels[i].has_position = false;
                return Ok(true);
            }
        }
        let cost_basis = bot.state.levels[i].cost_usd;
        let label = format!("Grid Sell @ {:.2}", bot.state.levels[i].price);
        match self.executor.execute(&bot.output_mint, &bot.input_mint, token_amount, &label, 0).await {
            Ok(outcome) => {
                let profit = outcome.usd_value - cost_basis;
                bot.state.grid_yield += profit;
                bot.state.run_count += 1;
                bot.state.consecutive_failures = 0;
                bot.state.levels[i].has_position = false;
                bot.state.levels[i].token_amount = 0.0;
                bot.state.levels[i].cost_usd = 0.0;
                info!(bot = %bot.id, profit, "grid sell succeeded");
                Ok(true)
            }
            Err(e) => {
                bot.state.consecutive_failures += 1;
                warn!(bot = %bot.id, "grid sell failed: {e}");
                Ok(false)
            }
        }
    }

    async fn grid_buy_level(&self, bot: &mut Bot, i: usize, price: f64) -> Result<bool> {
        let amount_usd = bot.config.amount_per_level.unwrap_or(0.0);
        if amount_usd <= 0.0 {
            return Ok(false);
        }
        let label = format!("Grid Buy @ {:.2}", bot.state.levels[i].price);
        match self.executor.execute(&bot.input_mint, &bot.output_mint, amount_usd, &label, 0).await {
            Ok(outcome) => {
                bot.state.levels[i].has_position = true;
                bot.state.levels[i].token_amount = if outcome.amount_out > 0.0 { outcome.amount_out } else { amount_usd / price };
                bot.state.levels[i].cost_usd = if outcome.usd_value > 0.0 { outcome.usd_value } else { amount_usd };
                bot.state.run_count += 1;
                bot.state.consecutive_failures = 0;
                info!(bot = %bot.id, amount = bot.state.levels[i].token_amount, "grid buy succeeded");
                Ok(true)
            }
            Err(e) => {
                bot.state.consecutive_failures += 1;
                warn!(bot = %bot.id, "grid buy failed: {e}");
                Ok(false)
            }
        }
    }

    /// Seeds levels strictly above the current price as pre-positioned, per
    /// a single aggregate buy apportioned evenly across them. Called once
    /// when a grid bot is created.
    pub async fn seed_grid(&self, bot: &mut Bot, current_price: f64) -> Result<()> {
        let sell_level_indices: Vec<usize> =
            bot.state.levels.iter().enumerate().filter(|(_, l)| l.price > current_price).map(|(i, _)| i).collect();
        if sell_level_indices.is_empty() {
            return Ok(());
        }
        let amount_per_level = bot.config.amount_per_level.unwrap_or(0.0);
        let total_usd = amount_per_level * sell_level_indices.len() as f64;
        if total_usd <= 0.0 {
            return Ok(());
        }
        match self.executor.execute(&bot.input_mint, &bot.output_mint, total_usd, "Grid Seed Buy", 0).await {
            Ok(outcome) => {
                let per_level_tokens = outcome.amount_out / sell_level_indices.len() as f64;
                let per_level_cost = outcome.usd_value / sell_level_indices.len() as f64;
                for i in sell_level_indices {
                    bot.state.levels[i].has_position = true;
                    bot.state.levels[i].token_amount = per_level_tokens;
                    bot.state.levels[i].cost_usd = per_level_cost;
                }
            }
            Err(e) => {
                warn!(bot = %bot.id, "grid seed buy failed, continuing buy-only: {e}");
                for i in sell_level_indices {
                    bot.state.levels[i].has_position = false;
                    bot.state.levels[i].token_amount = 0.0;
                    bot.state.levels[i].cost_usd = 0.0;
                }
            }
        }
        self.store.save_bot(bot).await
    }

    async fn process_accumulating(&self, bot: &mut Bot, price: f64) -> Result<()> {
        if bot.state.status != BotStatus::Active {
            return Ok(());
        }
        if bot.state.phase == AccumulationPhase::MonitoringProfit {
            let Some(take_profit_pct) = bot.config.take_profit_pct.filter(|p| *p > 0.0) else { return Ok(()) };
            if bot.state.avg_buy_price <= 0.0 {
                return Ok(());
            }
            let target = monitoring_profit_target(bot.state.avg_buy_price, take_profit_pct);
            if price < target || bot.state.total_bought <= 0.0 {
                return Ok(());
            }
            let total_tokens = bot.state.total_bought;
            match self.executor.execute(&bot.output_mint, &bot.input_mint, total_tokens, "Accumulation Exit", 0).await {
                Ok(outcome) => {
                    bot.state.status = BotStatus::Completed;
                    bot.state.phase = AccumulationPhase::Completed;
                    bot.state.completion_reason = Some(CompletionReason::TakeProfit);
                    bot.state.profit_realized = outcome.usd_value - bot.state.total_cost;
                    self.notifications.notify(
                        "Take Profit Hit",
                        &format!("Sold {total_tokens:.4} {} at {price:.4}", bot.output_mint),
                        "success",
                    );
                    self.store.save_bot(bot).await?;
                }
                Err(e) => warn!(bot = %bot.id, "accumulation exit sell failed: {e}"),
            }
            return Ok(());
        }

        if Utc::now() >= bot.state.next_run {
            self.run_accumulation_step(bot).await?;
        }
        Ok(())
    }

    async fn run_accumulation_step(&self, bot: &mut Bot) -> Result<()> {
        let amount = match bot.kind {
            BotKind::Vwap => vwap_weighted_amount(bot.config.amount, self.volume_weights.weight_ratio(&bot.output_mint)),
            _ => bot.config.amount,
        };
        let label = format!("{:?} Execution", bot.kind);
        match self.executor.execute(&bot.input_mint, &bot.output_mint, amount, &label, 0).await {
            Ok(outcome) => {
                bot.state.run_count += 1;
                bot.state.total_cost += outcome.usd_value;
                bot.state.total_bought += outcome.amount_out;
                if bot.state.total_bought > 0.0 {
                    bot.state.avg_buy_price = bot.state.total_cost / bot.state.total_bought;
                }
                let done = bot.config.max_runs.is_some_and(|max| bot.state.run_count >= max);
                if done {
                    if bot.config.take_profit_pct.is_some_and(|p| p > 0.0) {
                        bot.state.phase = AccumulationPhase::MonitoringProfit;
                    } else {
                        bot.state.status = BotStatus::Completed;
                        bot.state.completion_reason = Some(CompletionReason::MaxRuns);
                        self.notifications.notify("Bot Completed", &format!("Bot {} finished its run schedule.", bot.id), "info");
                    }
                } else {
                    bot.state.next_run = next_accumulating_run(Utc::now(), bot.config.interval_minutes);
                }
            }
            Err(e) => {
                warn!(bot = %bot.id, "accumulation step failed, retrying in {}s: {e}", DCA_FAILURE_RETRY_SECONDS);
                bot.state.next_run = Utc::now() + ChronoDuration::seconds(DCA_FAILURE_RETRY_SECONDS);
            }
        }
        self.store.save_bot(bot).await
    }

    async fn process_limit_grid(&self, bot: &mut Bot) -> Result<()> {
        if bot.state.status != BotStatus::Active {
            return Ok(());
        }
        let open = self.limit_orders.open_order_pubkeys().await?;
        let mut changed = false;

        for i in 0..bot.state.levels.len() {
            let Some(order_id) = bot.state.levels[i].order_id.clone() else { continue };
            if open.contains(&order_id) {
                continue;
            }
            info!(bot = %bot.id, level = i, "limit grid fill detected");
            if bot.state.levels[i].has_position {
                bot.state.levels[i].has_position = false;
                bot.state.levels[i].token_amount = 0.0;
                bot.state.levels[i].order_id = None;
                let alloc = bot.config.amount_per_level.unwrap_or(0.0);
                match self.limit_orders.create_limit_order(&bot.input_mint, &bot.output_mint, alloc, bot.state.levels[i].price).await {
                    Ok(id) => {
                        bot.state.levels[i].order_id = Some(id);
                        changed = true;
                    }
                    Err(e) => warn!(bot = %bot.id, "limit grid buy re-queue failed: {e}"),
                }
            } else {
                let alloc = bot.config.amount_per_level.unwrap_or(0.0);
                let price = bot.state.levels[i].price;
                if price <= 0.0 {
                    continue;
                }
                let token_amount = alloc / price;
                bot.state.levels[i].has_position = true;
                bot.state.levels[i].token_amount = token_amount;
                bot.state.levels[i].cost_usd = alloc;
                bot.state.levels[i].order_id = None;
                match self.limit_orders.create_limit_order(&bot.output_mint, &bot.input_mint, token_amount, 1.0 / price).await {
                    Ok(id) => {
                        bot.state.levels[i].order_id = Some(id);
                        changed = true;
                    }
                    Err(e) => warn!(bot = %bot.id, "limit grid sell re-queue failed: {e}"),
                }
            }
        }
        if changed {
            self.store.save_bot(bot).await?;
        }
        Ok(())
    }

    async fn maybe_update_performance(&self, bot: &mut Bot, price: f64) -> Result<()> {
        if bot.state.status != BotStatus::Active {
            return Ok(());
        }
        {
            let mut last = self.last_performance_update.lock();
            let now = Instant::now();
            if let Some(prev) = last.get(&bot.id) {
                if now.duration_since(*prev) < PERFORMANCE_UPDATE_THROTTLE {
                    return Ok(());
                }
            }
            last.insert(bot.id.clone(), now);
        }
        bot.state.profit_realized = match bot.kind {
            BotKind::Grid => bot.state.grid_yield + grid_unrealized_appreciation(&bot.state.levels, price),
            _ => dca_profit_realized(bot.state.total_bought, bot.state.total_cost, price),
        };
        self.store.save_bot(bot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_breaker_at_threshold() {
        assert!(!circuit_breaker_tripped(2));
        assert!(circuit_breaker_tripped(3));
    }

    #[test]
    fn stop_loss_triggers_at_or_below() {
        assert!(stop_loss_tripped(Some(10.0), 10.0));
        assert!(stop_loss_tripped(Some(10.0), 9.0));
        assert!(!stop_loss_tripped(Some(10.0), 11.0));
        assert!(!stop_loss_tripped(None, 1.0));
    }

    #[test]
    fn grid_sell_and_buy_triggers_respect_hysteresis() {
        let mut level = GridLevel::empty(100.0);
        level.has_position = true;
        assert!(!grid_sell_trigger(&level, 104.0, 5.0));
        assert!(grid_sell_trigger(&level, 106.0, 5.0));

        level.has_position = false;
        assert!(!grid_buy_trigger(&level, 96.0, 5.0));
        assert!(grid_buy_trigger(&level, 94.0, 5.0));
    }

    #[test]
    fn trailing_step_only_fires_above_upper_bound() {
        assert_eq!(trailing_step(true, 99.0, 0.0, 100.0, 5), None);
        assert_eq!(trailing_step(true, 100.0, 0.0, 100.0, 5), Some(25.0));
        assert_eq!(trailing_step(false, 100.0, 0.0, 100.0, 5), None);
    }

    #[test]
    fn grid_unrealized_appreciation_sums_positioned_levels_only() {
        let mut a = GridLevel::empty(100.0);
        a.has_position = true;
        a.token_amount = 10.0;
        a.cost_usd = 900.0;
        let mut b = GridLevel::empty(50.0);
        b.has_position = false;
        let levels = vec![a, b];
        assert_eq!(grid_unrealized_appreciation(&levels, 100.0), 100.0);
    }

    #[test]
    fn vwap_weight_ratio_is_capped_at_three() {
        assert_eq!(vwap_weighted_amount(10.0, 10.0), 30.0);
        assert_eq!(vwap_weighted_amount(10.0, 1.5), 15.0);
        assert_eq!(vwap_weighted_amount(10.0, -1.0), 0.0);
    }

    #[test]
    fn dca_profit_realized_is_mark_to_market_minus_cost() {
        assert_eq!(dca_profit_realized(5.0, 400.0, 100.0), 100.0);
    }

    #[test]
    fn monitoring_profit_target_applies_percentage() {
        assert_eq!(monitoring_profit_target(100.0, 10.0), 110.0);
    }

    #[test]
    fn next_accumulating_run_converts_minutes_to_seconds() {
        let now = Utc::now();
        let next = next_accumulating_run(now, 60.0);
        assert_eq!((next - now).num_seconds(), 3600);
    }
}
