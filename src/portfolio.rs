//! Portfolio tracking and balance reconciliation.
//!
//! Ported from `portfolio.py`: a cached `mint -> balance` map, a polling
//! loop that slows down once gRPC account updates are flowing, and a
//! gRPC short-circuit for the SOL balance specifically (token balances
//! still wait for the next scheduled reconciliation).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bot_scheduler::{BalanceOracle, NotificationSink};
use crate::constants::{
    PORTFOLIO_GRPC_RECONCILE_INTERVAL, PORTFOLIO_POLL_INTERVAL, PORTFOLIO_SOL_CHANGE_THRESHOLD,
    PORTFOLIO_TOKEN_CHANGE_THRESHOLD,
};
use crate::endpoint_pool::EndpointManager;
use crate::executor::PriceOracle;
use crate::models::Mint;
use crate::service_registry::Service;

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Decouples from the SPL token-account enumeration surface (`tokens.py`).
#[async_trait]
pub trait TokenAccountSource: Send + Sync {
    async fn token_balances(&self, wallet: &str) -> Result<Vec<(Mint, f64)>>;
}

struct Inner {
    balances: HashMap<Mint, f64>,
}

pub struct PortfolioTracker {
    endpoints: Arc<EndpointManager>,
    http: reqwest::Client,
    wallet_address: String,
    inner: parking_lot::Mutex<Inner>,
    tokens: Arc<dyn TokenAccountSource>,
    prices: Arc<dyn PriceOracle>,
    notifications: Arc<dyn NotificationSink>,
    grpc_updates: AtomicU64,
    grpc_active: AtomicBool,
}

impl PortfolioTracker {
    pub fn new(
        endpoints: Arc<EndpointManager>,
        wallet_address: impl Into<String>,
        tokens: Arc<dyn TokenAccountSource>,
        prices: Arc<dyn PriceOracle>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            endpoints,
            http: reqwest::Client::new(),
            wallet_address: wallet_address.into(),
            inner: parking_lot::Mutex::new(Inner { balances: HashMap::new() }),
            tokens,
            prices,
            notifications,
            grpc_updates: AtomicU64::new(0),
            grpc_active: AtomicBool::new(false),
        }
    }

    /// Real-time SOL balance change from a Geyser account subscription on
    /// the wallet address. Short-circuits the SOL diff path only; token
    /// balances still wait for the next scheduled reconciliation.
    pub fn on_account_update(&self, lamports: u64) {
        self.grpc_active.store(true, Ordering::Relaxed);
        self.grpc_updates.fetch_add(1, Ordering::Relaxed);

        let new_sol = lamports as f64 / crate::constants::SOL_DECIMALS as f64;
        let old_sol = {
            let inner = self.inner.lock();
            inner.balances.get(SOL_MINT).copied().unwrap_or(0.0)
        };

        if (new_sol - old_sol).abs() > PORTFOLIO_SOL_CHANGE_THRESHOLD {
            self.inner.lock().balances.insert(SOL_MINT.to_string(), new_sol);
            if old_sol > 0.0 && new_sol > old_sol + PORTFOLIO_SOL_CHANGE_THRESHOLD {
                let diff = new_sol - old_sol;
                self.notifications.notify("Funds Received", &format!("Received {diff:.4} SOL (via gRPC)"), "success");
            }
            debug!(old_sol, new_sol, "gRPC SOL balance update");
        }
    }

    async fn fetch_sol_balance(&self) -> Result<f64> {
        let url = self.endpoints.rpc_url();
        let body = serde_json::json!({
            "jsonrpc": "2.0", "id": 1,
            "method": "getBalance",
            "params": [self.wallet_address],
        });
        let resp = self.http.post(&url).json(&body).send().await.context("getBalance request failed")?;
        let value: serde_json::Value = resp.json().await.context("getBalance response decode failed")?;
        let lamports = value.get("result").and_then(|r| r.get("value")).and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(lamports as f64 / crate::constants::SOL_DECIMALS as f64)
    }

    /// One reconciliation pass: SOL balance via RPC, SPL token balances via
    /// the configured source, diffed against the cache with a "funds
    /// received" notification on any meaningful increase.
    pub async fn reconcile(&self) -> Result<()> {
        let sol_balance = match self.fetch_sol_balance().await {
            Ok(b) => b,
            Err(e) => {
                warn!("SOL balance fetch failed: {e}");
                return Ok(());
            }
        };

        {
            let mut inner = self.inner.lock();
            if let Some(&prev) = inner.balances.get(SOL_MINT) {
                if sol_balance > prev + PORTFOLIO_SOL_CHANGE_THRESHOLD {
                    let diff = sol_balance - prev;
                    drop(inner);
                    self.notifications.notify("Funds Received", &format!("Received {diff:.4} SOL"), "success");
                    inner = self.inner.lock();
                }
            }
            inner.balances.insert(SOL_MINT.to_string(), sol_balance);
        }

        let holdings = self.tokens.token_balances(&self.wallet_address).await.unwrap_or_default();
        for (mint, balance) in holdings {
            let mut inner = self.inner.lock();
            if let Some(&prev) = inner.balances.get(&mint) {
                if balance > prev + PORTFOLIO_TOKEN_CHANGE_THRESHOLD {
                    let diff = balance - prev;
                    drop(inner);
                    self.notifications.notify("Funds Received", &format!("Received {diff:.4} tokens of {mint}"), "success");
                    inner = self.inner.lock();
                }
            }
            inner.balances.insert(mint, balance);
        }

        Ok(())
    }

    pub fn total_usd(&self) -> f64 {
        let inner = self.inner.lock();
        inner.balances.iter().map(|(mint, bal)| self.prices.usd_price(mint).unwrap_or(0.0) * bal).sum()
    }

    /// Poll loop: 30 s while gRPC hasn't delivered any account update yet,
    /// 5 min once it has (gRPC covers SOL in real time; this cadence only
    /// needs to catch up on token balances).
    pub async fn run_poll_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.reconcile().await {
                warn!("portfolio reconciliation error: {e}");
            }
            let interval = if self.grpc_updates.load(Ordering::Relaxed) > 0 {
                PORTFOLIO_GRPC_RECONCILE_INTERVAL
            } else {
                PORTFOLIO_POLL_INTERVAL
            };
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        info!("portfolio poll loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

impl BalanceOracle for PortfolioTracker {
    fn cached_balance(&self, mint: &str) -> f64 {
        self.inner.lock().balances.get(mint).copied().unwrap_or(0.0)
    }
}

/// Thin lifecycle wrapper exposing the poll loop as a `Service`, mirroring
/// the donor's `PortfolioService` thread wrapper around `balance_poller`.
pub struct PortfolioService {
    tracker: Arc<PortfolioTracker>,
    stop_tx: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PortfolioService {
    pub fn new(tracker: Arc<PortfolioTracker>) -> Self {
        Self { tracker, stop_tx: parking_lot::Mutex::new(None), handle: parking_lot::Mutex::new(None) }
    }

    pub fn tracker(&self) -> Arc<PortfolioTracker> {
        self.tracker.clone()
    }
}

/// SPL token balance enumeration via `getTokenAccountsByOwner` with
/// `jsonParsed` encoding, so the RPC node does the account-layout decoding.
pub struct RpcTokenAccountSource {
    endpoints: Arc<EndpointManager>,
    http: reqwest::Client,
}

impl RpcTokenAccountSource {
    pub fn new(endpoints: Arc<EndpointManager>) -> Self {
        Self { endpoints, http: reqwest::Client::new() }
    }
}

#[async_trait]
impl TokenAccountSource for RpcTokenAccountSource {
    async fn token_balances(&self, wallet: &str) -> Result<Vec<(Mint, f64)>> {
        let url = self.endpoints.rpc_url();
        let body = serde_json::json!({
            "jsonrpc": "2.0", "id": 1,
            "method": "getTokenAccountsByOwner",
            "params": [
                wallet,
                {"programId": crate::constants::TOKEN_PROGRAM_ID},
                {"encoding": "jsonParsed"},
            ],
        });
        let resp = self.http.post(&url).json(&body).send().await.context("getTokenAccountsByOwner request failed")?;
        let value: serde_json::Value = resp.json().await.context("getTokenAccountsByOwner response decode failed")?;
        Ok(parse_token_accounts(&value))
    }
}

/// Pulled out of `RpcTokenAccountSource::token_balances` so the `jsonParsed`
/// shape can be exercised without a live RPC call.
fn parse_token_accounts(value: &serde_json::Value) -> Vec<(Mint, f64)> {
    let accounts = value.get("result").and_then(|r| r.get("value")).and_then(|v| v.as_array()).cloned().unwrap_or_default();
    accounts
        .into_iter()
        .filter_map(|account| {
            let info = account.pointer("/account/data/parsed/info")?;
            let mint = info.get("mint")?.as_str()?.to_string();
            let ui_amount = info.pointer("/tokenAmount/uiAmount").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Some((mint, ui_amount))
        })
        .collect()
}

#[async_trait]
impl Service for PortfolioService {
    async fn start(&self) -> Result<()> {
        if self.handle.lock().is_some() {
            return Ok(());
        }
        let (tx, rx) = watch::channel(false);
        let tracker = self.tracker.clone();
        let handle = tokio::spawn(async move {
            tracker.run_poll_loop(rx).await;
        });
        *self.stop_tx.lock() = Some(tx);
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.await;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTokens;
    #[async_trait]
    impl TokenAccountSource for NoopTokens {
        async fn token_balances(&self, _wallet: &str) -> Result<Vec<(Mint, f64)>> {
            Ok(vec![])
        }
    }

    struct NoopPrices;
    impl PriceOracle for NoopPrices {
        fn usd_price(&self, _mint: &str) -> Option<f64> {
            Some(1.0)
        }
    }

    struct NoopNotify;
    impl NotificationSink for NoopNotify {
        fn notify(&self, _title: &str, _message: &str, _level: &str) {}
    }

    fn tracker() -> PortfolioTracker {
        let cfg = crate::config::Config::from_env().unwrap();
        let endpoints = Arc::new(EndpointManager::new(&cfg));
        PortfolioTracker::new(endpoints, "Unknown", Arc::new(NoopTokens), Arc::new(NoopPrices), Arc::new(NoopNotify))
    }

    #[test]
    fn grpc_update_short_circuits_sol_cache_without_spurious_notification_on_first_update() {
        let t = tracker();
        t.on_account_update(2_000_000_000);
        assert_eq!(t.cached_balance(SOL_MINT), 2.0);
    }

    #[test]
    fn grpc_update_ignores_sub_threshold_noise() {
        let t = tracker();
        t.on_account_update(1_000_000_000);
        t.on_account_update(1_000_000_050);
        assert_eq!(t.cached_balance(SOL_MINT), 1.0);
    }

    #[test]
    fn total_usd_sums_cached_balances_at_price() {
        let t = tracker();
        t.on_account_update(1_000_000_000);
        assert_eq!(t.total_usd(), 1.0);
    }

    #[test]
    fn parse_token_accounts_extracts_mint_and_ui_amount() {
        let value = serde_json::json!({
            "result": {
                "value": [
                    {"account": {"data": {"parsed": {"info": {
                        "mint": "EPj111",
                        "tokenAmount": {"uiAmount": 42.5}
                    }}}}}
                ]
            }
        });
        let balances = parse_token_accounts(&value);
        assert_eq!(balances, vec![("EPj111".to_string(), 42.5)]);
    }

    #[test]
    fn parse_token_accounts_skips_accounts_missing_parsed_info() {
        let value = serde_json::json!({"result": {"value": [{"account": {}}]}});
        assert!(parse_token_accounts(&value).is_empty());
    }
}
