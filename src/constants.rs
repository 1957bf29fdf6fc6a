//! Centralized constants for the strategy engine.
//!
//! Keeps magic numbers for the safety/pool/cache/Pump.fun surfaces in one
//! place instead of scattered literals across modules.

use std::time::Duration;

// ============================================================================
// SOLANA BLOCKCHAIN CONSTANTS
// ============================================================================

/// 1 SOL = 1 billion lamports
pub const SOL_DECIMALS: u64 = 1_000_000_000;

pub const fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / SOL_DECIMALS as f64
}

pub const fn sol_to_lamports(sol: f64) -> u64 {
    (sol * SOL_DECIMALS as f64) as u64
}

/// Solana slot time (approximately 400ms)
pub const SOLANA_SLOT_TIME_MS: u64 = 400;

/// Native SOL mint decimals.
pub const SOL_MINT_DECIMALS: u8 = 9;

/// Decimals assumed for an SPL mint when the scheduler doesn't carry one
/// through (most meme-coin launches on Pump.fun use this).
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// Compute unit budget for a Jupiter-routed swap.
pub const JUPITER_COMPUTE_UNIT_LIMIT: u32 = 400_000;

// ============================================================================
// PUMPFUN BONDING CURVE CONSTANTS
// ============================================================================

/// Verified from recent successful buys against the live program.
pub const PUMPFUN_PROGRAM_ID: &str = "6EF8rrecqhRssReavQkS7tUSwGPbbSr6aYxBRfj4zcMY";
pub const PUMPFUN_FEE_RECIPIENT: &str = "CebN5WGQ4jvEPvsVU4EoHEpgzq1VV7AbCJyBVSY1dcGe";
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";
pub const RENT_SYSVAR_ID: &str = "SysvarRent111111111111111111111111111111111";
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

/// 8-byte Anchor-style discriminator for the `buy` instruction.
pub const PUMPFUN_BUY_DISCRIMINATOR: [u8; 8] = [0x66, 0x06, 0x3d, 0x12, 0x01, 0xda, 0xeb, 0xea];

/// Bonding curve account byte offsets (little-endian u64 fields unless noted).
pub const CURVE_OFFSET_VIRTUAL_TOKEN_RESERVES: usize = 8;
pub const CURVE_OFFSET_VIRTUAL_SOL_RESERVES: usize = 16;
pub const CURVE_OFFSET_REAL_TOKEN_RESERVES: usize = 24;
pub const CURVE_OFFSET_REAL_SOL_RESERVES: usize = 32;
pub const CURVE_OFFSET_TOKEN_TOTAL_SUPPLY: usize = 40;
pub const CURVE_OFFSET_COMPLETE: usize = 48;
/// Minimum account data length to safely parse through `complete`.
pub const CURVE_MIN_ACCOUNT_LEN: usize = 49;

/// Coalescing cache TTL for bonding-curve state fetches.
pub const CURVE_STATE_CACHE_TTL: Duration = Duration::from_secs(2);

pub const PUMPFUN_COMPUTE_UNIT_LIMIT: u32 = 200_000;

// ============================================================================
// ENDPOINT POOL CONSTANTS
// ============================================================================

pub const FAIL_THRESHOLD: u32 = 2;
pub const PROBE_INTERVAL: Duration = Duration::from_secs(15);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const RECOVERY_PROBES: u32 = 2;

// ============================================================================
// BLOCKHASH CACHE CONSTANTS
// ============================================================================

pub const BLOCKHASH_POLL_INTERVAL_MS: u64 = 400;
pub const BLOCKHASH_GRPC_STALE_THRESHOLD: Duration = Duration::from_secs(5);
pub const BLOCKHASH_FALLBACK_INTERVAL: Duration = Duration::from_secs(10);
pub const BLOCKHASH_STALE_REFRESH_AGE: Duration = Duration::from_secs(2);

// ============================================================================
// TRADE GUARD / SAFETY CONSTANTS
// ============================================================================

pub const DEFAULT_MAX_SINGLE_TRADE_USD: f64 = 5_000.0;
pub const DEFAULT_MAX_DAILY_VOLUME_USD: f64 = 25_000.0;
pub const DEFAULT_REQUIRE_CONFIRM_USD: f64 = 2_000.0;
pub const DEFAULT_MIN_SLIPPAGE_BPS: u16 = 10;
pub const DEFAULT_MAX_SLIPPAGE_BPS: u16 = 500;
pub const DEFAULT_TRADE_COOLDOWN_SECONDS: u64 = 5;
pub const DEFAULT_SNIPER_MAX_AMOUNT_SOL: f64 = 0.5;
pub const DEFAULT_SNIPER_MAX_SLIPPAGE_PCT: f64 = 15.0;

/// Confirmation tokens expire after 5 minutes.
pub const CONFIRMATION_LIFETIME: Duration = Duration::from_secs(300);

// ============================================================================
// BOT SCHEDULER CONSTANTS
// ============================================================================

pub const SCHEDULER_WAKE_INTERVAL: Duration = Duration::from_secs(15);
pub const CIRCUIT_BREAKER_FAILURE_THRESHOLD: u32 = 3;
pub const PERFORMANCE_UPDATE_THROTTLE: Duration = Duration::from_secs(1);
/// Linear retry delay applied to DCA/TWAP/VWAP bots after a failed run.
pub const DCA_FAILURE_RETRY_SECONDS: i64 = 60;
pub const DEFAULT_GRID_HYSTERESIS_PCT: f64 = 0.05;

/// Lookback window for VWAP's hour-weight ratio (hour_weight / avg_weight).
pub const VWAP_LOOKBACK_HOURS: i64 = 24;

// ============================================================================
// PORTFOLIO TRACKER CONSTANTS
// ============================================================================

pub const PORTFOLIO_SOL_CHANGE_THRESHOLD: f64 = 0.0001;
pub const PORTFOLIO_TOKEN_CHANGE_THRESHOLD: f64 = 0.000001;
pub const PORTFOLIO_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const PORTFOLIO_GRPC_RECONCILE_INTERVAL: Duration = Duration::from_secs(300);
pub const PORTFOLIO_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(3600);

// ============================================================================
// PRICE CACHE CONSTANTS
// ============================================================================

pub const PRICE_POLL_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// RATE LIMITER CONSTANTS (ambient HTTP-boundary guard, see DESIGN.md)
// ============================================================================

pub const RATE_LIMIT_REQUESTS_PER_WINDOW: u32 = 60;
pub const RATE_LIMIT_WINDOW_SECS: u32 = 60;
pub const RATE_LIMIT_BURST: u32 = 10;

// ============================================================================
// JITO CONSTANTS
// ============================================================================

pub const JITO_SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_JITO_TIP_LAMPORTS: u64 = 5_000_000;
pub const JITO_TIP_BASELINE_PERCENTILE: u8 = 99;
pub const JITO_TIP_SCALE_HIGH_MARGIN: f64 = 3.0;
pub const JITO_TIP_SCALE_MED_MARGIN: f64 = 2.0;
pub const JITO_TIP_SCALE_LOW_MARGIN: f64 = 1.0;

pub const JITO_TIP_ACCOUNTS: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZLw",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumxTHXXa9y",
    "3AVi9Tg9Uo68tJfuvoKvqKNWTaiyV691DQ3VKouGQR8k",
];

pub const JITO_ENDPOINTS: [&str; 4] = [
    "https://mainnet.block-engine.jito.wtf/api/v1/bundles",
    "https://ny.mainnet.block-engine.jito.wtf/api/v1/bundles",
    "https://tokyo.mainnet.block-engine.jito.wtf/api/v1/bundles",
    "https://frankfurt.mainnet.block-engine.jito.wtf/api/v1/bundles",
];

// ============================================================================
// RETRY & BACKOFF CONSTANTS
// ============================================================================

pub const BASE_RETRY_DELAY_MS: u64 = 200;
pub const MAX_RETRY_DELAY_MS: u64 = 10_000;
pub const BACKOFF_MULTIPLIER: f64 = 1.5;
pub const RETRY_JITTER_FACTOR: f64 = 0.2;
pub const STREAM_RECONNECT_MIN_BACKOFF: Duration = Duration::from_secs(1);
pub const STREAM_RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(30);

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

pub const fn bps_to_percentage(bps: u16) -> f64 {
    bps as f64 / 100.0
}

pub const fn percentage_to_bps(percentage: f64) -> u16 {
    (percentage * 100.0) as u16
}

pub const fn duration_from_ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sol_lamports_conversion() {
        assert_eq!(sol_to_lamports(1.0), SOL_DECIMALS);
        assert_eq!(lamports_to_sol(SOL_DECIMALS), 1.0);
        assert_eq!(sol_to_lamports(0.5), 500_000_000);
    }

    #[test]
    fn test_bps_percentage_conversion() {
        assert_eq!(bps_to_percentage(25), 0.25);
        assert_eq!(percentage_to_bps(0.25), 25);
    }

    #[test]
    fn test_discriminator_matches_documented_value() {
        let as_u64 = u64::from_be_bytes(PUMPFUN_BUY_DISCRIMINATOR);
        assert_eq!(as_u64, 0x66063d1201daebea);
    }
}
