//! Environment-driven configuration, following the donor crate's
//! `SharedConfig::from_env()` convention: `dotenvy::dotenv().ok()` then
//! `env::var(KEY).unwrap_or_else(|_| default)` per field.

use std::env;

use anyhow::Result;

use crate::constants::*;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_primary: String,
    pub rpc_secondary: String,
    pub ws_primary: String,
    pub ws_secondary: String,
    pub grpc_primary: String,
    pub grpc_secondary: String,
    pub rabbit_primary: String,
    pub rabbit_secondary: String,

    pub wallet_address: String,
    pub paper_trading: bool,

    pub max_single_trade_usd: f64,
    pub max_daily_volume_usd: f64,
    pub require_confirm_usd: f64,
    pub min_slippage_bps: u16,
    pub max_slippage_bps: u16,
    pub trade_cooldown_seconds: u64,
    pub sniper_max_amount_sol: f64,
    pub sniper_max_slippage_pct: f64,
    pub token_blocklist: Vec<String>,

    pub blockhash_refresh_ms: u64,
    pub bonding_curve_cache_ttl_secs: u64,

    pub fail_threshold: u32,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub recovery_probes: u32,

    pub jupiter_api_key: String,
    pub database_path: String,

    pub aggregator_base_url: String,
    pub price_feed_base_url: String,
    pub audit_log_dir: String,
    pub audit_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let rpc_primary = env::var("RPC_PRIMARY")
            .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string());
        let rpc_secondary = env::var("RPC_SECONDARY").unwrap_or_else(|_| rpc_primary.clone());
        let ws_primary =
            env::var("WS_PRIMARY").unwrap_or_else(|_| "wss://api.mainnet-beta.solana.com".to_string());
        let ws_secondary = env::var("WS_SECONDARY").unwrap_or_else(|_| ws_primary.clone());
        let grpc_primary =
            env::var("GRPC_PRIMARY").unwrap_or_else(|_| "grpc.eu.shyft.to:443".to_string());
        let grpc_secondary =
            env::var("GRPC_SECONDARY").unwrap_or_else(|_| "grpc.ams.shyft.to:443".to_string());
        let rabbit_primary = env::var("RABBIT_PRIMARY")
            .unwrap_or_else(|_| "rabbitstream.ams.shyft.to:443".to_string());
        let rabbit_secondary = env::var("RABBIT_SECONDARY")
            .unwrap_or_else(|_| "rabbitstream.fra.shyft.to:443".to_string());

        let wallet_address = env::var("WALLET_ADDRESS").unwrap_or_else(|_| "Unknown".to_string());
        let paper_trading = env::var("PAPER_TRADING")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(true);

        let max_single_trade_usd = env::var("MAX_SINGLE_TRADE_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_SINGLE_TRADE_USD);
        let max_daily_volume_usd = env::var("MAX_DAILY_VOLUME_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_DAILY_VOLUME_USD);
        let require_confirm_usd = env::var("REQUIRE_CONFIRM_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUIRE_CONFIRM_USD);
        let min_slippage_bps = env::var("MIN_SLIPPAGE_BPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MIN_SLIPPAGE_BPS);
        let max_slippage_bps = env::var("MAX_SLIPPAGE_BPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_SLIPPAGE_BPS);
        let trade_cooldown_seconds = env::var("TRADE_COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TRADE_COOLDOWN_SECONDS);
        let sniper_max_amount_sol = env::var("SNIPER_MAX_AMOUNT_SOL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SNIPER_MAX_AMOUNT_SOL);
        let sniper_max_slippage_pct = env::var("SNIPER_MAX_SLIPPAGE_PCT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SNIPER_MAX_SLIPPAGE_PCT);
        let token_blocklist = env::var("TOKEN_BLOCKLIST")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let blockhash_refresh_ms = env::var("BLOCKHASH_REFRESH_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(BLOCKHASH_POLL_INTERVAL_MS);
        let bonding_curve_cache_ttl_secs = env::var("BONDING_CURVE_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let fail_threshold = env::var("FAIL_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(FAIL_THRESHOLD);
        let probe_interval_secs = env::var("PROBE_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(PROBE_INTERVAL.as_secs());
        let probe_timeout_secs = env::var("PROBE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(PROBE_TIMEOUT.as_secs());
        let recovery_probes = env::var("RECOVERY_PROBES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(RECOVERY_PROBES);

        let jupiter_api_key = env::var("JUPITER_API_KEY").unwrap_or_default();
        let database_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/engine.db".to_string());

        let aggregator_base_url =
            env::var("AGGREGATOR_BASE_URL").unwrap_or_else(|_| "https://quote-api.jup.ag/v6".to_string());
        let price_feed_base_url = env::var("PRICE_FEED_BASE_URL")
            .unwrap_or_else(|_| crate::price_feed::PriceCache::default_base_url().to_string());
        let audit_log_dir = env::var("AUDIT_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
        let audit_enabled = env::var("AUDIT_ENABLED").map(|v| v.to_lowercase() != "false").unwrap_or(true);

        Ok(Self {
            rpc_primary,
            rpc_secondary,
            ws_primary,
            ws_secondary,
            grpc_primary,
            grpc_secondary,
            rabbit_primary,
            rabbit_secondary,
            wallet_address,
            paper_trading,
            max_single_trade_usd,
            max_daily_volume_usd,
            require_confirm_usd,
            min_slippage_bps,
            max_slippage_bps,
            trade_cooldown_seconds,
            sniper_max_amount_sol,
            sniper_max_slippage_pct,
            token_blocklist,
            blockhash_refresh_ms,
            bonding_curve_cache_ttl_secs,
            fail_threshold,
            probe_interval_secs,
            probe_timeout_secs,
            recovery_probes,
            jupiter_api_key,
            database_path,
            aggregator_base_url,
            price_feed_base_url,
            audit_log_dir,
            audit_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_when_env_is_empty() {
        env::remove_var("MAX_SINGLE_TRADE_USD");
        env::remove_var("TOKEN_BLOCKLIST");
        let cfg = Config {
            rpc_primary: "x".into(),
            rpc_secondary: "x".into(),
            ws_primary: "x".into(),
            ws_secondary: "x".into(),
            grpc_primary: "x".into(),
            grpc_secondary: "x".into(),
            rabbit_primary: "x".into(),
            rabbit_secondary: "x".into(),
            wallet_address: "Unknown".into(),
            paper_trading: true,
            max_single_trade_usd: DEFAULT_MAX_SINGLE_TRADE_USD,
            max_daily_volume_usd: DEFAULT_MAX_DAILY_VOLUME_USD,
            require_confirm_usd: DEFAULT_REQUIRE_CONFIRM_USD,
            min_slippage_bps: DEFAULT_MIN_SLIPPAGE_BPS,
            max_slippage_bps: DEFAULT_MAX_SLIPPAGE_BPS,
            trade_cooldown_seconds: DEFAULT_TRADE_COOLDOWN_SECONDS,
            sniper_max_amount_sol: DEFAULT_SNIPER_MAX_AMOUNT_SOL,
            sniper_max_slippage_pct: DEFAULT_SNIPER_MAX_SLIPPAGE_PCT,
            token_blocklist: vec![],
            blockhash_refresh_ms: BLOCKHASH_POLL_INTERVAL_MS,
            bonding_curve_cache_ttl_secs: 2,
            fail_threshold: FAIL_THRESHOLD,
            probe_interval_secs: PROBE_INTERVAL.as_secs(),
            probe_timeout_secs: PROBE_TIMEOUT.as_secs(),
            recovery_probes: RECOVERY_PROBES,
            jupiter_api_key: String::new(),
            database_path: "data/engine.db".into(),
            aggregator_base_url: "https://quote-api.jup.ag/v6".into(),
            price_feed_base_url: crate::price_feed::PriceCache::default_base_url().to_string(),
            audit_log_dir: "logs".into(),
            audit_enabled: true,
        };
        assert_eq!(cfg.fail_threshold, 2);
        assert!(cfg.token_blocklist.is_empty());
    }
}
