//! Shared fakes for the integration suite: small stand-ins for the
//! I/O-backed traits `bot_scheduler.rs` decouples from, so a test can drive
//! a real `BotScheduler` against a real in-memory `Store` without touching
//! the network.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use solana_strategy_engine::bot_scheduler::{
    BalanceOracle, LimitOrderService, NotificationSink, TradeExecutor, TradeOutcome, VolumeWeightOracle,
};
use solana_strategy_engine::Config;

/// Replays a queue of canned outcomes; once the queue is empty every call
/// succeeds with a zero-value outcome, so tests only script the calls they
/// care about.
pub struct FakeExecutor {
    queue: Mutex<VecDeque<Result<TradeOutcome, String>>>,
    calls: Mutex<Vec<(String, String, f64)>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), calls: Mutex::new(Vec::new()) }
    }

    pub fn push_ok(&self, amount_out: f64, usd_value: f64) {
        self.queue.lock().push_back(Ok(TradeOutcome { amount_out, usd_value }));
    }

    pub fn push_err(&self, message: &str) {
        self.queue.lock().push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait::async_trait]
impl TradeExecutor for FakeExecutor {
    async fn execute(&self, input_mint: &str, output_mint: &str, amount: f64, _source: &str, _priority_fee_lamports: u64) -> Result<TradeOutcome> {
        self.calls.lock().push((input_mint.to_string(), output_mint.to_string(), amount));
        match self.queue.lock().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(TradeOutcome { amount_out: amount, usd_value: amount }),
        }
    }
}

/// Reports a balance large enough that grid sells never get capped unless
/// a test explicitly lowers it for a mint.
pub struct FakeBalances {
    overrides: Mutex<std::collections::HashMap<String, f64>>,
}

impl FakeBalances {
    pub fn new() -> Self {
        Self { overrides: Mutex::new(std::collections::HashMap::new()) }
    }

    pub fn set(&self, mint: &str, amount: f64) {
        self.overrides.lock().insert(mint.to_string(), amount);
    }
}

impl BalanceOracle for FakeBalances {
    fn cached_balance(&self, mint: &str) -> f64 {
        self.overrides.lock().get(mint).copied().unwrap_or(f64::MAX)
    }
}

/// No open orders by default; LIMIT_GRID scenarios aren't exercised by this
/// suite, so `create_limit_order` just hands back an incrementing id.
pub struct FakeLimitOrders {
    next_id: Mutex<u64>,
}

impl FakeLimitOrders {
    pub fn new() -> Self {
        Self { next_id: Mutex::new(0) }
    }
}

#[async_trait::async_trait]
impl LimitOrderService for FakeLimitOrders {
    async fn open_order_pubkeys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn create_limit_order(&self, _sell_mint: &str, _buy_mint: &str, _amount: f64, _price: f64) -> Result<String> {
        let mut next = self.next_id.lock();
        *next += 1;
        Ok(format!("order-{next}"))
    }
}

pub struct FakeNotifications {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl FakeNotifications {
    pub fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()) }
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(title, _, _)| title.clone()).collect()
    }
}

impl NotificationSink for FakeNotifications {
    fn notify(&self, title: &str, message: &str, level: &str) {
        self.sent.lock().push((title.to_string(), message.to_string(), level.to_string()));
    }
}

pub struct FakeVolumeWeights {
    ratio: Mutex<f64>,
}

impl FakeVolumeWeights {
    pub fn new(ratio: f64) -> Self {
        Self { ratio: Mutex::new(ratio) }
    }
}

impl VolumeWeightOracle for FakeVolumeWeights {
    fn weight_ratio(&self, _mint: &str) -> f64 {
        *self.ratio.lock()
    }
}

/// Same defaults `TradeGuard::for_tests` uses internally, duplicated here
/// since that helper is `cfg(test)`-gated to the crate's own unit tests and
/// unreachable from an external integration binary.
pub fn test_config(overrides: impl FnOnce(&mut Config)) -> Config {
    let mut cfg = Config {
        rpc_primary: "https://rpc-a.example".into(),
        rpc_secondary: "https://rpc-b.example".into(),
        ws_primary: String::new(),
        ws_secondary: String::new(),
        grpc_primary: String::new(),
        grpc_secondary: String::new(),
        rabbit_primary: String::new(),
        rabbit_secondary: String::new(),
        wallet_address: "Unknown".into(),
        paper_trading: true,
        max_single_trade_usd: 5_000.0,
        max_daily_volume_usd: 1_000.0,
        require_confirm_usd: 2_000.0,
        min_slippage_bps: 10,
        max_slippage_bps: 500,
        trade_cooldown_seconds: 5,
        sniper_max_amount_sol: 0.5,
        sniper_max_slippage_pct: 15.0,
        token_blocklist: vec![],
        blockhash_refresh_ms: 400,
        bonding_curve_cache_ttl_secs: 2,
        fail_threshold: 2,
        probe_interval_secs: 15,
        probe_timeout_secs: 3,
        recovery_probes: 2,
        jupiter_api_key: String::new(),
        database_path: ":memory:".into(),
        aggregator_base_url: "https://quote-api.jup.ag/v6".into(),
        price_feed_base_url: "https://example.invalid".into(),
        audit_log_dir: "logs".into(),
        audit_enabled: false,
    };
    overrides(&mut cfg);
    cfg
}

pub fn scheduler_with(
    store: Arc<solana_strategy_engine::Store>,
    executor: Arc<FakeExecutor>,
    balances: Arc<FakeBalances>,
    limit_orders: Arc<FakeLimitOrders>,
    notifications: Arc<FakeNotifications>,
    volume_weights: Arc<FakeVolumeWeights>,
) -> solana_strategy_engine::bot_scheduler::BotScheduler {
    solana_strategy_engine::bot_scheduler::BotScheduler::new(store, executor, balances, limit_orders, notifications, volume_weights)
}
