//! Automated multi-strategy Solana trading engine.
//!
//! Runs Grid/DCA/TWAP/VWAP/LIMIT_GRID bots against Jupiter-routed swaps and
//! direct Pump.fun bonding-curve buys, guarded by a shared trade-safety
//! layer and backed by endpoint failover, a blockhash cache, and a
//! persistent row store. `ArbEngine` is an adjacent, separately composable
//! cross-venue arbitrage striker — `Engine` does not wire it by default.

pub mod arb_engine;
pub mod audit;
pub mod blockhash_cache;
pub mod bot_scheduler;
pub mod config;
pub mod constants;
pub mod endpoint_pool;
pub mod engine;
pub mod error;
pub mod executor;
pub mod jito_submitter;
pub mod models;
pub mod portfolio;
pub mod price_feed;
pub mod pumpfun_builder;
pub mod rate_limiter;
pub mod service_registry;
pub mod store;
pub mod stream_manager;
pub mod trade_guard;
pub mod wallet_manager;

pub use arb_engine::{ArbEngine, ArbOpportunity, ArbPair};
pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, PumpfunError, TradeGuardError};
pub use models::{Bot, BotConfig, BotKind, BotState, BotStatus, TradeRecord};
pub use store::Store;
pub use wallet_manager::WalletManager;
