//! Jito bundle submission: parallel fan-out across block-engine regions,
//! first `200` response wins.
//!
//! Fan-out/cancel-on-first-success mechanics are ported from `jito.py`'s
//! `send_jito_bundle` (a thread-pool `as_completed` race). Tip sizing is
//! kept from the donor's `jito_submitter.rs` — the 99th-percentile-plus-
//! margin-scaling strategy survives as `compute_tip_lamports`, generalized
//! away from the donor's PumpFun-MEV framing and its global `Lazy` queue.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::constants::{
    JITO_ENDPOINTS, JITO_SUBMIT_TIMEOUT, JITO_TIP_ACCOUNTS, JITO_TIP_SCALE_HIGH_MARGIN,
    JITO_TIP_SCALE_LOW_MARGIN, JITO_TIP_SCALE_MED_MARGIN, MAX_JITO_TIP_LAMPORTS,
};

#[derive(Debug, Clone, Copy)]
pub struct TipFloorData {
    /// 99th-percentile landed tip observed by Jito's tip-floor API, in SOL.
    pub landed_tips_99th_sol: f64,
}

/// Decouples from the live Jito tip-floor polling endpoint; a cache that
/// refreshes on its own schedule implements this.
pub trait TipFloorSource: Send + Sync {
    fn cached_tip_floor(&self) -> Option<TipFloorData>;
}

pub struct NoTipFloor;
impl TipFloorSource for NoTipFloor {
    fn cached_tip_floor(&self) -> Option<TipFloorData> {
        None
    }
}

const MIN_TIP_LAMPORTS: u64 = 100_000;
const DEX_FEE_FRACTION: f64 = 0.025;
const GAS_FEE_SOL: f64 = 0.0001;
const PROFIT_CAP_FRACTION: f64 = 0.17;
const FALLBACK_FEE_BUDGET_FRACTION: f64 = 0.05;
const FALLBACK_TIP_SHARE: f64 = 0.40;

/// Profit-margin-scaled tip in lamports: base the tip on the 99th-percentile
/// landed tip when available, scaled up as fee margin tightens (more
/// aggressive the closer fees eat into profit), capped by both a hard
/// ceiling and a fraction of expected profit.
pub fn compute_tip_lamports(expected_profit_sol: f64, position_size_sol: f64, tip_floor: Option<TipFloorData>) -> u64 {
    let dex_fees_sol = position_size_sol * DEX_FEE_FRACTION;

    let scaled = match tip_floor {
        Some(data) => {
            let tip_99th_sol = data.landed_tips_99th_sol;
            let total_fees_base = dex_fees_sol + GAS_FEE_SOL + tip_99th_sol;
            let fee_pct = if expected_profit_sol > 0.0 { (total_fees_base / expected_profit_sol) * 100.0 } else { 100.0 };

            let multiplier = if fee_pct >= 10.0 {
                JITO_TIP_SCALE_LOW_MARGIN
            } else if fee_pct >= 5.0 {
                JITO_TIP_SCALE_MED_MARGIN - ((fee_pct - 5.0) / 5.0) * (JITO_TIP_SCALE_MED_MARGIN - 1.5)
            } else {
                JITO_TIP_SCALE_HIGH_MARGIN - (fee_pct / 5.0) * (JITO_TIP_SCALE_HIGH_MARGIN - JITO_TIP_SCALE_MED_MARGIN)
            };

            let base_tip_lamports = (tip_99th_sol * crate::constants::SOL_DECIMALS as f64) as u64;
            (base_tip_lamports as f64 * multiplier) as u64
        }
        None => {
            warn!("no tip-floor data cached, using fallback tip calculation");
            let budget = expected_profit_sol * FALLBACK_FEE_BUDGET_FRACTION * FALLBACK_TIP_SHARE;
            (budget * crate::constants::SOL_DECIMALS as f64) as u64
        }
    };

    let profit_cap = ((expected_profit_sol * PROFIT_CAP_FRACTION) * crate::constants::SOL_DECIMALS as f64) as u64;
    scaled.max(MIN_TIP_LAMPORTS).min(profit_cap.max(MIN_TIP_LAMPORTS)).min(MAX_JITO_TIP_LAMPORTS)
}

pub fn random_tip_account() -> Pubkey {
    let idx = fastrand::usize(0..JITO_TIP_ACCOUNTS.len());
    Pubkey::from_str(JITO_TIP_ACCOUNTS[idx]).expect("valid static tip account")
}

#[derive(Debug)]
pub struct BundleSubmitResult {
    pub endpoint: &'static str,
    pub accepted: bool,
    pub detail: String,
}

pub struct JitoSubmitter {
    http: reqwest::Client,
    tip_floor: Arc<dyn TipFloorSource>,
}

impl JitoSubmitter {
    pub fn new(tip_floor: Arc<dyn TipFloorSource>) -> Self {
        Self {
            http: reqwest::Client::builder().timeout(JITO_SUBMIT_TIMEOUT).build().expect("reqwest client builds"),
            tip_floor,
        }
    }

    pub fn compute_tip(&self, expected_profit_sol: f64, position_size_sol: f64) -> u64 {
        compute_tip_lamports(expected_profit_sol, position_size_sol, self.tip_floor.cached_tip_floor())
    }

    /// Sends the base64-encoded bundle to every Jito region in parallel,
    /// returning as soon as one accepts it (HTTP 200). Results from
    /// endpoints that hadn't answered yet are dropped, not awaited.
    pub async fn send_bundle(&self, transactions_b64: Vec<String>) -> Result<BundleSubmitResult> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [transactions_b64],
        });

        let mut inflight = FuturesUnordered::new();
        for &endpoint in JITO_ENDPOINTS.iter() {
            let http = self.http.clone();
            let payload = payload.clone();
            inflight.push(async move { post_bundle(&http, endpoint, &payload).await });
        }

        let mut last_error: Option<BundleSubmitResult> = None;
        while let Some(result) = inflight.next().await {
            if result.accepted {
                info!(endpoint = result.endpoint, "jito bundle accepted");
                return Ok(result);
            }
            last_error = Some(result);
        }

        Err(anyhow!("no jito endpoint accepted the bundle: {:?}", last_error.map(|r| r.detail)))
    }
}

async fn post_bundle(http: &reqwest::Client, endpoint: &'static str, payload: &serde_json::Value) -> BundleSubmitResult {
    match http.post(endpoint).json(payload).send().await {
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            BundleSubmitResult { endpoint, accepted: status.as_u16() == 200, detail: body }
        }
        Err(e) => BundleSubmitResult { endpoint, accepted: false, detail: e.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_floor_present_scales_with_margin() {
        let tight = compute_tip_lamports(0.01, 1.0, Some(TipFloorData { landed_tips_99th_sol: 0.001 }));
        let loose = compute_tip_lamports(1.0, 1.0, Some(TipFloorData { landed_tips_99th_sol: 0.001 }));
        assert!(tight >= loose, "tighter margin should scale tip up relative to a looser margin: {tight} vs {loose}");
    }

    #[test]
    fn tip_never_exceeds_hard_cap() {
        let tip = compute_tip_lamports(1000.0, 1.0, Some(TipFloorData { landed_tips_99th_sol: 0.5 }));
        assert!(tip <= MAX_JITO_TIP_LAMPORTS);
    }

    #[test]
    fn tip_never_below_minimum() {
        let tip = compute_tip_lamports(0.0001, 0.0001, Some(TipFloorData { landed_tips_99th_sol: 0.00001 }));
        assert!(tip >= MIN_TIP_LAMPORTS);
    }

    #[test]
    fn fallback_without_tip_floor_still_respects_bounds() {
        let tip = compute_tip_lamports(0.05, 0.5, None);
        assert!(tip >= MIN_TIP_LAMPORTS);
        assert!(tip <= MAX_JITO_TIP_LAMPORTS);
    }

    #[test]
    fn random_tip_account_is_always_a_listed_account() {
        let picked = random_tip_account();
        let listed: Vec<Pubkey> = JITO_TIP_ACCOUNTS.iter().map(|s| Pubkey::from_str(s).unwrap()).collect();
        assert!(listed.contains(&picked));
    }
}
