//! Centralized trade validation: defense-in-depth checks applied to every
//! trade regardless of which bot or manual path originated it.
//!
//! Ported from `trade_guard.py`. The Python original is a process-wide
//! singleton; here `TradeGuard` is just another field the `Engine` owns
//! and hands out as `Arc<TradeGuard>`.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::constants::{
    CONFIRMATION_LIFETIME, DEFAULT_SNIPER_MAX_AMOUNT_SOL, DEFAULT_SNIPER_MAX_SLIPPAGE_PCT,
};
use crate::error::TradeGuardError;
use crate::models::{DailyVolume, PendingConfirmation};

/// Implemented by the audit log so `TradeGuard` can notify it of
/// blocks and violations without a circular module dependency.
pub trait TradeAuditSink: Send + Sync {
    fn log_trade_blocked(&self, mint: &str, reason: &str);
    fn log_guard_violation(&self, code: &str, details: &str);
}

pub struct NoopAuditSink;
impl TradeAuditSink for NoopAuditSink {
    fn log_trade_blocked(&self, _mint: &str, _reason: &str) {}
    fn log_guard_violation(&self, _code: &str, _details: &str) {}
}

/// Lets `Engine` hand the same `Arc<AuditLog>` it wires into the rate
/// limiter and bot scheduler into `TradeGuard::new`'s `Box<dyn TradeAuditSink>`.
impl<T: TradeAuditSink + ?Sized> TradeAuditSink for std::sync::Arc<T> {
    fn log_trade_blocked(&self, mint: &str, reason: &str) {
        (**self).log_trade_blocked(mint, reason)
    }
    fn log_guard_violation(&self, code: &str, details: &str) {
        (**self).log_guard_violation(code, details)
    }
}

/// Per-token safety signals gathered before an auto-snipe; field names
/// mirror the original's dict keys (`freeze_authority`/`freeze_auth` etc.)
/// collapsed into one optional each.
#[derive(Debug, Clone, Default)]
pub struct TokenSafetyData {
    pub mint: String,
    pub freeze_authority: Option<String>,
    pub mint_authority: Option<String>,
    pub is_rug: bool,
    pub socials_twitter: Option<String>,
    pub socials_telegram: Option<String>,
    pub socials_website: Option<String>,
    pub dex_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SniperSettings {
    pub require_mint_renounced: bool,
    pub require_lp_burned: bool,
    pub require_socials: bool,
}

impl Default for SniperSettings {
    fn default() -> Self {
        Self {
            require_mint_renounced: true,
            require_lp_burned: true,
            require_socials: false,
        }
    }
}

struct State {
    daily_volume: DailyVolume,
    recent_trades: HashMap<String, chrono::DateTime<Utc>>,
    pending_confirmations: HashMap<String, PendingConfirmation>,
    blocklist: std::collections::HashSet<String>,
}

pub struct TradeGuard {
    state: Mutex<State>,
    max_single_trade_usd: f64,
    max_daily_volume_usd: f64,
    require_confirm_usd: f64,
    min_slippage_bps: u16,
    max_slippage_bps: u16,
    trade_cooldown: chrono::Duration,
    sniper_max_amount_sol: f64,
    sniper_max_slippage_pct: f64,
    audit: Box<dyn TradeAuditSink>,
}

impl TradeGuard {
    pub fn new(cfg: &crate::config::Config, audit: Box<dyn TradeAuditSink>) -> Self {
        Self {
            state: Mutex::new(State {
                daily_volume: DailyVolume::for_date(Utc::now().date_naive()),
                recent_trades: HashMap::new(),
                pending_confirmations: HashMap::new(),
                blocklist: cfg.token_blocklist.iter().cloned().collect(),
            }),
            max_single_trade_usd: cfg.max_single_trade_usd,
            max_daily_volume_usd: cfg.max_daily_volume_usd,
            require_confirm_usd: cfg.require_confirm_usd,
            min_slippage_bps: cfg.min_slippage_bps,
            max_slippage_bps: cfg.max_slippage_bps,
            trade_cooldown: chrono::Duration::seconds(cfg.trade_cooldown_seconds as i64),
            sniper_max_amount_sol: cfg.sniper_max_amount_sol,
            sniper_max_slippage_pct: cfg.sniper_max_slippage_pct,
            audit,
        }
    }

    #[cfg(test)]
    pub fn for_tests(overrides: impl FnOnce(&mut crate::config::Config)) -> Self {
        let mut cfg = crate::config::Config {
            rpc_primary: String::new(),
            rpc_secondary: String::new(),
            ws_primary: String::new(),
            ws_secondary: String::new(),
            grpc_primary: String::new(),
            grpc_secondary: String::new(),
            rabbit_primary: String::new(),
            rabbit_secondary: String::new(),
            wallet_address: "Unknown".into(),
            paper_trading: true,
            max_single_trade_usd: crate::constants::DEFAULT_MAX_SINGLE_TRADE_USD,
            max_daily_volume_usd: crate::constants::DEFAULT_MAX_DAILY_VOLUME_USD,
            require_confirm_usd: crate::constants::DEFAULT_REQUIRE_CONFIRM_USD,
            min_slippage_bps: crate::constants::DEFAULT_MIN_SLIPPAGE_BPS,
            max_slippage_bps: crate::constants::DEFAULT_MAX_SLIPPAGE_BPS,
            trade_cooldown_seconds: crate::constants::DEFAULT_TRADE_COOLDOWN_SECONDS,
            sniper_max_amount_sol: DEFAULT_SNIPER_MAX_AMOUNT_SOL,
            sniper_max_slippage_pct: DEFAULT_SNIPER_MAX_SLIPPAGE_PCT,
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
            price_feed_base_url: crate::price_feed::PriceCache::default_base_url().to_string(),
            audit_log_dir: "logs".into(),
            audit_enabled: false,
        };
        overrides(&mut cfg);
        Self::new(&cfg, Box::new(NoopAuditSink))
    }

    fn roll_daily_volume(&self, state: &mut State) {
        let today = Utc::now().date_naive();
        if state.daily_volume.date != today {
            state.daily_volume = DailyVolume::for_date(today);
        }
    }

    /// Full validation pipeline. Returns an optional confirmation id when
    /// `usd_value` crosses `require_confirm_usd` and confirmation is
    /// requested by the caller.
    pub fn validate_trade(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: f64,
        usd_value: f64,
        slippage_bps: u16,
        source: &str,
        require_confirmation: bool,
    ) -> Result<Option<String>, TradeGuardError> {
        {
            let state = self.state.lock();
            if state.blocklist.contains(input_mint) || state.blocklist.contains(output_mint) {
                let blocked = if state.blocklist.contains(input_mint) { input_mint } else { output_mint };
                self.audit.log_trade_blocked(blocked, "BLOCKED_TOKEN");
                return Err(TradeGuardError::BlockedToken);
            }
        }

        if slippage_bps < self.min_slippage_bps {
            self.audit.log_guard_violation("SLIPPAGE_TOO_LOW", &format!("{slippage_bps} < {}", self.min_slippage_bps));
            return Err(TradeGuardError::SlippageTooLow);
        }
        if slippage_bps > self.max_slippage_bps {
            self.audit.log_guard_violation("SLIPPAGE_TOO_HIGH", &format!("{slippage_bps} > {}", self.max_slippage_bps));
            return Err(TradeGuardError::SlippageTooHigh);
        }

        if usd_value > self.max_single_trade_usd {
            self.audit.log_guard_violation("TRADE_SIZE_EXCEEDED", &format!("${usd_value:.2} > ${:.2}", self.max_single_trade_usd));
            return Err(TradeGuardError::TradeSizeExceeded);
        }

        let trade_key = format!("{input_mint}:{output_mint}");
        let now = Utc::now();

        {
            let mut state = self.state.lock();
            self.roll_daily_volume(&mut state);
            let projected = state.daily_volume.volume_usd + usd_value;
            if projected > self.max_daily_volume_usd {
                self.audit.log_guard_violation(
                    "DAILY_LIMIT_EXCEEDED",
                    &format!("${:.2} + ${usd_value:.2} > ${:.2}", state.daily_volume.volume_usd, self.max_daily_volume_usd),
                );
                return Err(TradeGuardError::DailyLimitExceeded);
            }

            if let Some(last) = state.recent_trades.get(&trade_key) {
                let elapsed = now - *last;
                if elapsed < self.trade_cooldown {
                    return Err(TradeGuardError::TradeCooldown);
                }
            }
        }

        let mut confirmation_id = None;
        if require_confirmation && usd_value >= self.require_confirm_usd {
            let id = Uuid::new_v4().to_string()[..8].to_string();
            let mut state = self.state.lock();
            state.pending_confirmations.insert(
                id.clone(),
                PendingConfirmation {
                    id: id.clone(),
                    input_mint: input_mint.to_string(),
                    output_mint: output_mint.to_string(),
                    amount,
                    usd_value,
                    slippage_bps,
                    source: source.to_string(),
                    expires_at: now + CONFIRMATION_LIFETIME,
                },
            );
            info!(usd_value, confirmation_id = %id, "large trade requires confirmation");
            confirmation_id = Some(id);
        }

        Ok(confirmation_id)
    }

    pub fn validate_sniper_trade(&self, amount_sol: f64, slippage_pct: f64, token_mint: &str) -> Result<(), TradeGuardError> {
        if self.state.lock().blocklist.contains(token_mint) {
            return Err(TradeGuardError::BlockedToken);
        }
        if amount_sol > self.sniper_max_amount_sol {
            return Err(TradeGuardError::SniperAmountExceeded);
        }
        if slippage_pct > self.sniper_max_slippage_pct {
            return Err(TradeGuardError::SniperSlippageExceeded);
        }
        Ok(())
    }

    /// Check order fixed by the original: freeze authority always blocks
    /// (and auto-blocklists), mint authority only if required, rug flag
    /// always blocks (and auto-blocklists), missing socials only if
    /// required, LP-not-burned is warning-only.
    pub fn validate_token_safety(&self, token: &TokenSafetyData, settings: SniperSettings) -> Result<(), TradeGuardError> {
        if let Some(freeze_auth) = &token.freeze_authority {
            self.add_to_blocklist(&token.mint);
            warn!(mint = %token.mint, freeze_authority = %freeze_auth, "blocked: active freeze authority");
            return Err(TradeGuardError::FreezeAuthorityActive);
        }

        if token.mint_authority.is_some() && settings.require_mint_renounced {
            warn!(mint = %token.mint, "blocked: active mint authority");
            return Err(TradeGuardError::MintNotRenounced);
        }

        if token.is_rug {
            self.add_to_blocklist(&token.mint);
            warn!(mint = %token.mint, "blocked: flagged as rug");
            return Err(TradeGuardError::RugDetected);
        }

        if settings.require_socials {
            let has_socials =
                token.socials_twitter.is_some() || token.socials_telegram.is_some() || token.socials_website.is_some();
            if !has_socials {
                warn!(mint = %token.mint, "blocked: no social links");
                return Err(TradeGuardError::NoSocials);
            }
        }

        if settings.require_lp_burned && token.dex_id != "Pump.fun" {
            info!(mint = %token.mint, dex = %token.dex_id, "LP burn check requested but not verifiable for this dex, proceeding");
        }

        Ok(())
    }

    pub fn confirm_trade(&self, confirmation_id: &str) -> Result<PendingConfirmation, TradeGuardError> {
        let mut state = self.state.lock();
        let Some(trade) = state.pending_confirmations.remove(confirmation_id) else {
            return Err(TradeGuardError::InvalidConfirmation);
        };
        if Utc::now() > trade.expires_at {
            return Err(TradeGuardError::ConfirmationExpired);
        }
        Ok(trade)
    }

    pub fn record_trade(&self, input_mint: &str, output_mint: &str, usd_value: f64) {
        let mut state = self.state.lock();
        self.roll_daily_volume(&mut state);
        state.daily_volume.volume_usd += usd_value;
        state.daily_volume.trade_count += 1;

        let trade_key = format!("{input_mint}:{output_mint}");
        let now = Utc::now();
        state.recent_trades.insert(trade_key, now);

        let cutoff = now - self.trade_cooldown * 2;
        state.recent_trades.retain(|_, v| *v > cutoff);

        info!(usd_value, daily_total = state.daily_volume.volume_usd, "trade recorded");
    }

    pub fn daily_stats(&self) -> DailyVolume {
        let mut state = self.state.lock();
        self.roll_daily_volume(&mut state);
        state.daily_volume.clone()
    }

    pub fn add_to_blocklist(&self, mint: &str) {
        self.state.lock().blocklist.insert(mint.to_string());
        warn!(mint, "token added to blocklist");
    }

    pub fn remove_from_blocklist(&self, mint: &str) {
        self.state.lock().blocklist.remove(mint);
    }

    pub fn is_blocked(&self, mint: &str) -> bool {
        self.state.lock().blocklist.contains(mint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> TradeGuard {
        TradeGuard::for_tests(|_| {})
    }

    #[test]
    fn blocklisted_mint_rejected() {
        let guard = guard();
        guard.add_to_blocklist("BADMINT");
        let err = guard
            .validate_trade("BADMINT", "OUT", 1.0, 10.0, 50, "Manual", true)
            .unwrap_err();
        assert_eq!(err, TradeGuardError::BlockedToken);
    }

    #[test]
    fn slippage_bounds_enforced() {
        let guard = guard();
        assert_eq!(
            guard.validate_trade("A", "B", 1.0, 10.0, 1, "Manual", true).unwrap_err(),
            TradeGuardError::SlippageTooLow
        );
        assert_eq!(
            guard.validate_trade("A", "B", 1.0, 10.0, 10_000, "Manual", true).unwrap_err(),
            TradeGuardError::SlippageTooHigh
        );
    }

    #[test]
    fn single_trade_cap_enforced() {
        let guard = guard();
        let err = guard
            .validate_trade("A", "B", 1.0, crate::constants::DEFAULT_MAX_SINGLE_TRADE_USD + 1.0, 50, "Manual", true)
            .unwrap_err();
        assert_eq!(err, TradeGuardError::TradeSizeExceeded);
    }

    #[test]
    fn daily_limit_enforced_cumulatively() {
        let guard = guard();
        guard.record_trade("A", "B", crate::constants::DEFAULT_MAX_DAILY_VOLUME_USD - 10.0);
        let err = guard.validate_trade("A", "C", 1.0, 20.0, 50, "Manual", true).unwrap_err();
        assert_eq!(err, TradeGuardError::DailyLimitExceeded);
    }

    #[test]
    fn cooldown_blocks_rapid_repeat_trades() {
        let guard = guard();
        guard.record_trade("A", "B", 10.0);
        let err = guard.validate_trade("A", "B", 1.0, 10.0, 50, "Manual", true).unwrap_err();
        assert_eq!(err, TradeGuardError::TradeCooldown);
    }

    #[test]
    fn large_trade_requires_confirmation_then_confirms() {
        let guard = guard();
        let usd = crate::constants::DEFAULT_REQUIRE_CONFIRM_USD + 1.0;
        let id = guard.validate_trade("A", "B", 1.0, usd, 50, "Manual", true).unwrap().unwrap();
        let confirmed = guard.confirm_trade(&id).unwrap();
        assert_eq!(confirmed.usd_value, usd);
        assert!(guard.confirm_trade(&id).is_err(), "single use");
    }

    #[test]
    fn token_safety_order_freeze_then_mint_then_rug_then_socials() {
        let guard = guard();
        let settings = SniperSettings { require_mint_renounced: true, require_lp_burned: true, require_socials: true };

        let freeze = TokenSafetyData { mint: "M1".into(), freeze_authority: Some("X".into()), ..Default::default() };
        assert_eq!(guard.validate_token_safety(&freeze, settings).unwrap_err(), TradeGuardError::FreezeAuthorityActive);
        assert!(guard.is_blocked("M1"), "freeze authority auto-blocklists");

        let mint_auth = TokenSafetyData { mint: "M2".into(), mint_authority: Some("X".into()), ..Default::default() };
        assert_eq!(guard.validate_token_safety(&mint_auth, settings).unwrap_err(), TradeGuardError::MintNotRenounced);

        let rug = TokenSafetyData { mint: "M3".into(), is_rug: true, ..Default::default() };
        assert_eq!(guard.validate_token_safety(&rug, settings).unwrap_err(), TradeGuardError::RugDetected);
        assert!(guard.is_blocked("M3"));

        let no_socials = TokenSafetyData { mint: "M4".into(), ..Default::default() };
        assert_eq!(guard.validate_token_safety(&no_socials, settings).unwrap_err(), TradeGuardError::NoSocials);
    }

    #[test]
    fn mint_authority_allowed_when_not_required() {
        let guard = guard();
        let settings = SniperSettings { require_mint_renounced: false, require_lp_burned: false, require_socials: false };
        let token = TokenSafetyData { mint: "M5".into(), mint_authority: Some("X".into()), ..Default::default() };
        assert!(guard.validate_token_safety(&token, settings).is_ok());
    }
}
