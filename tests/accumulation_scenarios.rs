//! End-to-end TWAP scenario: a bot already in `MonitoringProfit` (its
//! accumulation runs are done) exits in full once price clears its
//! take-profit target.

mod common;

use std::sync::Arc;

use chrono::Utc;
use solana_strategy_engine::models::{AccumulationPhase, Bot, BotConfig, BotKind, BotStatus, CompletionReason};
use solana_strategy_engine::Store;

use common::{scheduler_with, FakeBalances, FakeExecutor, FakeLimitOrders, FakeNotifications, FakeVolumeWeights};

const SOL: &str = "So11111111111111111111111111111111111111112";
const TOKEN: &str = "TwapTokenMint111111111111111111111111111111";

#[tokio::test]
async fn twap_exits_in_full_once_price_clears_the_take_profit_target() {
    let store = Arc::new(Store::open_in_memory().unwrap());

    let config = BotConfig {
        amount: 50.0,
        interval_minutes: 30.0,
        max_runs: Some(10),
        take_profit_pct: Some(10.0),
        ..BotConfig::default()
    };
    let mut bot = Bot::new("twap-1", BotKind::Twap, SOL.to_string(), TOKEN.to_string(), config, Utc::now());
    bot.state.phase = AccumulationPhase::MonitoringProfit;
    bot.state.run_count = 10;
    bot.state.total_bought = 10.0;
    bot.state.total_cost = 1_000.0;
    bot.state.avg_buy_price = 100.0; // target = 110.0
    store.save_bot(&bot).unwrap();

    let executor = Arc::new(FakeExecutor::new());
    executor.push_ok(0.0, 1_200.0);
    let notifications = Arc::new(FakeNotifications::new());

    let scheduler = scheduler_with(
        store.clone(),
        executor.clone(),
        Arc::new(FakeBalances::new()),
        Arc::new(FakeLimitOrders::new()),
        notifications.clone(),
        Arc::new(FakeVolumeWeights::new(1.0)),
    );

    // below target: nothing happens yet
    scheduler.on_price_tick(&TOKEN.to_string(), 105.0).await.unwrap();
    assert_eq!(executor.call_count(), 0);
    assert_eq!(store.all_bots().unwrap()[0].state.status, BotStatus::Active);

    // at/above target: sells the full accumulated position
    scheduler.on_price_tick(&TOKEN.to_string(), 111.0).await.unwrap();

    let bots = store.all_bots().unwrap();
    let bot = &bots[0];
    assert_eq!(executor.call_count(), 1);
    assert_eq!(bot.state.status, BotStatus::Completed);
    assert_eq!(bot.state.completion_reason, Some(CompletionReason::TakeProfit));
    assert_eq!(bot.state.phase, AccumulationPhase::Completed);
    assert_eq!(bot.state.profit_realized, 200.0, "1200 proceeds minus 1000 cost basis");
    assert!(notifications.titles().contains(&"Take Profit Hit".to_string()));
}
