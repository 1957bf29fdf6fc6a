//! Top-level composition root.
//!
//! The donor wires its components through a process-wide `SharedConfig`
//! plus a handful of module-level statics; here every component is a field
//! on `Engine`, built once in `Engine::new` and handed out as `Arc`s to
//! whatever else needs it. `Engine::start` spawns the long-lived workers and
//! `Engine::stop` signals them all to shut down and joins their handles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::blockhash_cache::BlockhashCache;
use crate::bot_scheduler::BotScheduler;
use crate::config::Config;
use crate::constants::{RATE_LIMIT_BURST, RATE_LIMIT_REQUESTS_PER_WINDOW, RATE_LIMIT_WINDOW_SECS, SCHEDULER_WAKE_INTERVAL};
use crate::endpoint_pool::EndpointManager;
use crate::executor::{AggregatorLimitOrders, Executor, PriceOracle};
use crate::jito_submitter::{JitoSubmitter, NoTipFloor};
use crate::portfolio::{PortfolioService, PortfolioTracker, RpcTokenAccountSource, SOL_MINT};
use crate::price_feed::PriceCache;
use crate::pumpfun_builder::PumpfunBuilder;
use crate::rate_limiter::RateLimiter;
use crate::service_registry::{ServiceDescriptor, ServiceRegistry};
use crate::store::Store;
use crate::stream_manager::StreamManager;
use crate::trade_guard::TradeGuard;
use crate::wallet_manager::WalletManager;

pub struct Engine {
    pub config: Config,
    pub store: Arc<Store>,
    pub endpoints: Arc<EndpointManager>,
    pub blockhash: Arc<BlockhashCache>,
    pub streams: Arc<StreamManager>,
    pub wallet: Arc<WalletManager>,
    pub prices: Arc<PriceCache>,
    pub audit: Arc<AuditLog>,
    pub rate_limiter: Arc<RateLimiter>,
    pub trade_guard: Arc<TradeGuard>,
    pub executor: Arc<Executor>,
    pub pumpfun: Arc<PumpfunBuilder>,
    pub jito: Arc<JitoSubmitter>,
    pub portfolio: Arc<PortfolioTracker>,
    pub scheduler: Arc<BotScheduler>,

    registry: ServiceRegistry,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(Store::new(&config.database_path).context("opening row store")?);
        let endpoints = Arc::new(EndpointManager::new(&config));
        let blockhash = Arc::new(BlockhashCache::new(endpoints.clone(), config.blockhash_refresh_ms));

        let streams = Arc::new(StreamManager::new(endpoints.clone()));
        streams.add_sink(blockhash.clone());

        let wallet = Arc::new(match WalletManager::from_env() {
            Ok(w) => w,
            Err(e) if config.paper_trading => {
                warn!("no wallet configured ({e}), using a generated paper-trading wallet");
                WalletManager::default()
            }
            Err(e) => return Err(e).context("wallet initialization failed"),
        });

        let prices = Arc::new(PriceCache::new(config.price_feed_base_url.clone(), vec![SOL_MINT.to_string()]));

        let audit = Arc::new(AuditLog::new(&config.audit_log_dir, "audit", config.audit_enabled));

        let rate_limiter =
            Arc::new(RateLimiter::new(RATE_LIMIT_REQUESTS_PER_WINDOW, RATE_LIMIT_WINDOW_SECS, RATE_LIMIT_BURST).with_audit(audit.clone()));

        let trade_guard = Arc::new(TradeGuard::new(&config, Box::new(audit.clone())));

        let executor = Arc::new(Executor::new(
            config.aggregator_base_url.clone(),
            endpoints.rpc_url(),
            blockhash.clone(),
            wallet.clone(),
            prices.clone() as Arc<dyn PriceOracle>,
            store.clone(),
        ));

        let pumpfun = Arc::new(PumpfunBuilder::new());
        let jito = Arc::new(JitoSubmitter::new(Arc::new(NoTipFloor)));

        let tokens = Arc::new(RpcTokenAccountSource::new(endpoints.clone()));
        let portfolio = Arc::new(PortfolioTracker::new(
            endpoints.clone(),
            config.wallet_address.clone(),
            tokens,
            prices.clone() as Arc<dyn PriceOracle>,
            audit.clone(),
        ));

        let limit_orders = Arc::new(AggregatorLimitOrders::new(config.aggregator_base_url.clone(), wallet.get_main_pubkey()));

        let scheduler = Arc::new(BotScheduler::new(
            store.clone(),
            executor.clone(),
            portfolio.clone(),
            limit_orders,
            audit.clone(),
            store.clone(),
        ));

        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            config,
            store,
            endpoints,
            blockhash,
            streams,
            wallet,
            prices,
            audit,
            rate_limiter,
            trade_guard,
            executor,
            pumpfun,
            jito,
            portfolio,
            scheduler,
            registry: ServiceRegistry::new(),
            stop_tx,
            stop_rx,
            handles: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Spawns every long-lived worker: endpoint health probing, blockhash
    /// refresh, the gRPC slot stream, the price poller, the portfolio
    /// reconciler (through `ServiceRegistry`), and the bot scheduler's wake
    /// and price-tick loops.
    pub async fn start(&mut self) -> Result<()> {
        self.audit.log_system_start(env!("CARGO_PKG_VERSION"));

        for mint in self.store.active_bots().context("loading active bots for price-feed seeding")?.into_iter().map(|b| b.output_mint) {
            self.prices.watch(mint);
        }

        self.registry.register(
            ServiceDescriptor::new("portfolio", "Portfolio Reconciler").auto_start(),
            Arc::new(PortfolioService::new(self.portfolio.clone())),
        );
        self.registry.start_all(true).await;

        let mut handles = Vec::new();

        let endpoints = self.endpoints.clone();
        let stop = self.stop_rx.clone();
        handles.push(tokio::spawn(async move {
            endpoints.run_probe_loop(crate::constants::PROBE_INTERVAL, stop).await;
        }));

        let blockhash = self.blockhash.clone();
        let stop = self.stop_rx.clone();
        handles.push(tokio::spawn(async move {
            blockhash.run_refresh_loop(stop).await;
        }));

        let streams = self.streams.clone();
        let stop = self.stop_rx.clone();
        handles.push(tokio::spawn(async move {
            streams.run(stop).await;
        }));

        let prices = self.prices.clone();
        let stop = self.stop_rx.clone();
        handles.push(tokio::spawn(async move {
            prices.run_poll_loop(stop).await;
        }));

        let scheduler = self.scheduler.clone();
        let stop = self.stop_rx.clone();
        handles.push(tokio::spawn(async move {
            run_scheduler_wake_loop(scheduler, stop).await;
        }));

        let scheduler = self.scheduler.clone();
        let prices = self.prices.clone();
        let stop = self.stop_rx.clone();
        handles.push(tokio::spawn(async move {
            run_price_tick_loop(scheduler, prices, stop).await;
        }));

        *self.handles.lock() = handles;
        info!("engine started");
        Ok(())
    }

    /// Signals every spawned worker to stop and joins them, waiting at most
    /// 10 seconds before giving up on a straggler.
    pub async fn stop(&mut self) -> Result<()> {
        let _ = self.stop_tx.send(true);
        self.registry.stop_all().await;

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
                warn!("a worker did not shut down within the grace period");
            }
        }

        self.audit.log_system_stop();
        info!("engine stopped");
        Ok(())
    }
}

async fn run_scheduler_wake_loop(scheduler: Arc<BotScheduler>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(SCHEDULER_WAKE_INTERVAL) => {
                if let Err(e) = scheduler.on_wake_tick().await {
                    warn!("scheduler wake tick failed: {e}");
                }
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    info!("scheduler wake loop stopping");
                    return;
                }
            }
        }
    }
}

/// Drives GRID/LIMIT_GRID bots off the live price cache: every poll
/// interval, replays the latest known price for each watched mint through
/// the scheduler so price-triggered levels don't wait for the 15 s wake.
async fn run_price_tick_loop(scheduler: Arc<BotScheduler>, prices: Arc<PriceCache>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(crate::constants::PRICE_POLL_INTERVAL) => {
                for mint in prices.watched_mints() {
                    if let Some(price) = prices.usd_price(&mint) {
                        if let Err(e) = scheduler.on_price_tick(&mint, price).await {
                            warn!(mint = %mint, "price tick failed: {e}");
                        }
                    }
                }
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    info!("price tick loop stopping");
                    return;
                }
            }
        }
    }
}
