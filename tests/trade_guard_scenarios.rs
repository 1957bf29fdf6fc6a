//! End-to-end interaction between the daily volume cap and the per-pair
//! cooldown: a trade that's still within the daily budget can still be
//! rejected by the cooldown, and the two checks compose in a fixed order
//! (daily cap is checked before cooldown, per `TradeGuard::validate_trade`).

mod common;

use solana_strategy_engine::error::TradeGuardError;
use solana_strategy_engine::trade_guard::{NoopAuditSink, TradeGuard};

use common::test_config;

fn guard_with_daily_cap(cap: f64) -> TradeGuard {
    let cfg = test_config(|c| {
        c.max_daily_volume_usd = cap;
        c.trade_cooldown_seconds = 30;
    });
    TradeGuard::new(&cfg, Box::new(NoopAuditSink))
}

#[test]
fn cooldown_blocks_a_repeat_trade_even_though_daily_budget_has_room() {
    let guard = guard_with_daily_cap(1_000.0);

    // first trade on SOL/USDC, well under the daily cap
    guard.record_trade("SOL", "USDC", 900.0);
    assert_eq!(guard.daily_stats().volume_usd, 900.0);

    // a second trade on the same pair has plenty of daily budget left
    // (900 + 50 = 950 < 1000) but the pair is still inside its cooldown
    let err = guard.validate_trade("SOL", "USDC", 1.0, 50.0, 50, "Manual", true).unwrap_err();
    assert_eq!(err, TradeGuardError::TradeCooldown, "daily budget alone doesn't clear the cooldown");
}

#[test]
fn daily_cap_is_checked_before_the_pair_has_a_chance_to_cool_down() {
    let guard = guard_with_daily_cap(1_000.0);

    guard.record_trade("SOL", "USDC", 900.0);

    // a different pair isn't on cooldown, but still blows through the
    // shared daily cap
    let err = guard.validate_trade("SOL", "BONK", 1.0, 200.0, 50, "Manual", true).unwrap_err();
    assert_eq!(err, TradeGuardError::DailyLimitExceeded);
}

#[test]
fn a_trade_within_budget_on_an_untouched_pair_is_accepted() {
    let guard = guard_with_daily_cap(1_000.0);
    guard.record_trade("SOL", "USDC", 100.0);
    // a fresh pair, under budget, no cooldown history
    assert!(guard.validate_trade("SOL", "WIF", 1.0, 50.0, 50, "Manual", false).is_ok());
}
