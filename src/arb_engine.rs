//! Cross-venue arbitrage: watch configured mint pairs across two venues,
//! and when the spread clears its threshold, strike both legs atomically
//! through a Jito bundle.
//!
//! Adjacent to the core strategy engine (bots trade one venue through
//! `Executor`/`PumpfunBuilder`); this module is grounded on the donor's
//! `arbitrage_engine.rs`, generalized away from its own DEX-registry/fee-
//! model/bundle-manager stack onto the shared `JitoSubmitter` and a small
//! `BundleStriker` trait so it doesn't need its own swap-building code.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::jito_submitter::{BundleSubmitResult, JitoSubmitter};
use crate::models::Mint;

/// A configured venue pair watched for arbitrage (row-store `arb_pairs`).
#[derive(Debug, Clone)]
pub struct ArbPair {
    pub base_mint: Mint,
    pub quote_mint: Mint,
    pub venue_a: String,
    pub venue_b: String,
    pub min_spread_pct: f64,
    pub max_position_sol: f64,
}

/// Decouples from wherever live per-venue prices come from (stream
/// callbacks, venue-specific pollers).
pub trait VenuePriceSource: Send + Sync {
    fn venue_price(&self, venue: &str, mint: &str) -> Option<f64>;
}

/// Builds a signed, base64-encoded leg transaction for one venue; the
/// engine never constructs swap instructions itself.
#[async_trait]
pub trait BundleStriker: Send + Sync {
    async fn build_leg(&self, venue: &str, input_mint: &str, output_mint: &str, amount_sol: f64) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ArbOpportunity {
    pub opportunity_id: String,
    pub base_mint: Mint,
    pub quote_mint: Mint,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread_pct: f64,
    pub position_sol: f64,
    pub detected_at: DateTime<Utc>,
}

/// `(buy_venue_is_a, spread_pct)` if the spread between `price_a` and
/// `price_b` clears `min_spread_pct`, else `None`. Pure and independent of
/// I/O so it's directly testable.
pub fn detect_spread(price_a: f64, price_b: f64, min_spread_pct: f64) -> Option<(bool, f64)> {
    if price_a <= 0.0 || price_b <= 0.0 {
        return None;
    }
    let (low, high, buy_is_a) = if price_a < price_b { (price_a, price_b, true) } else { (price_b, price_a, false) };
    let spread_pct = ((high - low) / low) * 100.0;
    if spread_pct >= min_spread_pct {
        Some((buy_is_a, spread_pct))
    } else {
        None
    }
}

/// Clamps the opportunity's position size to `max_position_sol`.
pub fn clamp_position_size(requested_sol: f64, max_position_sol: f64) -> f64 {
    requested_sol.min(max_position_sol).max(0.0)
}

pub struct ArbEngine {
    pairs: Mutex<Vec<ArbPair>>,
    prices: Arc<dyn VenuePriceSource>,
    striker: Arc<dyn BundleStriker>,
    jito: Arc<JitoSubmitter>,
}

impl ArbEngine {
    pub fn new(prices: Arc<dyn VenuePriceSource>, striker: Arc<dyn BundleStriker>, jito: Arc<JitoSubmitter>) -> Self {
        Self { pairs: Mutex::new(Vec::new()), prices, striker, jito }
    }

    pub fn register_pair(&self, pair: ArbPair) {
        self.pairs.lock().push(pair);
    }

    /// Scans every registered pair once and returns every opportunity that
    /// clears its configured spread threshold, most profitable first.
    pub fn scan_once(&self) -> Vec<ArbOpportunity> {
        let pairs = self.pairs.lock().clone();
        let mut found: Vec<ArbOpportunity> = pairs
            .into_iter()
            .filter_map(|pair| {
                let price_a = self.prices.venue_price(&pair.venue_a, &pair.base_mint)?;
                let price_b = self.prices.venue_price(&pair.venue_b, &pair.base_mint)?;
                let (buy_is_a, spread_pct) = detect_spread(price_a, price_b, pair.min_spread_pct)?;
                let (buy_venue, sell_venue, buy_price, sell_price) = if buy_is_a {
                    (pair.venue_a.clone(), pair.venue_b.clone(), price_a, price_b)
                } else {
                    (pair.venue_b.clone(), pair.venue_a.clone(), price_b, price_a)
                };
                Some(ArbOpportunity {
                    opportunity_id: Uuid::new_v4().to_string(),
                    base_mint: pair.base_mint.clone(),
                    quote_mint: pair.quote_mint.clone(),
                    buy_venue,
                    sell_venue,
                    buy_price,
                    sell_price,
                    spread_pct,
                    position_sol: clamp_position_size(pair.max_position_sol, pair.max_position_sol),
                    detected_at: Utc::now(),
                })
            })
            .collect();
        found.sort_by(|a, b| b.spread_pct.partial_cmp(&a.spread_pct).unwrap_or(std::cmp::Ordering::Equal));
        found
    }

    /// Builds both legs and submits them as one Jito bundle, cancelling
    /// the strike if either leg fails to build.
    pub async fn strike(&self, opportunity: &ArbOpportunity) -> Result<BundleSubmitResult> {
        let buy_leg = self
            .striker
            .build_leg(&opportunity.buy_venue, &opportunity.quote_mint, &opportunity.base_mint, opportunity.position_sol)
            .await?;
        let sell_leg = self
            .striker
            .build_leg(&opportunity.sell_venue, &opportunity.base_mint, &opportunity.quote_mint, opportunity.position_sol)
            .await?;

        let expected_profit_sol = opportunity.position_sol * (opportunity.sell_price - opportunity.buy_price) / opportunity.buy_price.max(f64::EPSILON);
        let tip_lamports = self.jito.compute_tip(expected_profit_sol.max(0.0), opportunity.position_sol);
        info!(
            opportunity = opportunity.opportunity_id,
            spread_pct = opportunity.spread_pct,
            tip_lamports,
            "striking arbitrage opportunity"
        );

        if expected_profit_sol <= 0.0 {
            return Err(anyhow!("opportunity {} no longer profitable at strike time", opportunity.opportunity_id));
        }

        self.jito.send_bundle(vec![buy_leg, sell_leg]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_below_threshold_is_not_an_opportunity() {
        assert!(detect_spread(100.0, 100.3, 1.0).is_none());
    }

    #[test]
    fn spread_above_threshold_identifies_cheaper_venue() {
        let (buy_is_a, spread_pct) = detect_spread(100.0, 103.0, 1.0).unwrap();
        assert!(buy_is_a);
        assert!((spread_pct - 3.0).abs() < 1e-9);
    }

    #[test]
    fn spread_direction_flips_when_b_is_cheaper() {
        let (buy_is_a, _) = detect_spread(105.0, 100.0, 1.0).unwrap();
        assert!(!buy_is_a);
    }

    #[test]
    fn non_positive_prices_never_produce_an_opportunity() {
        assert!(detect_spread(0.0, 10.0, 0.1).is_none());
        assert!(detect_spread(-1.0, 10.0, 0.1).is_none());
    }

    #[test]
    fn position_size_clamps_to_configured_maximum() {
        assert_eq!(clamp_position_size(10.0, 2.0), 2.0);
        assert_eq!(clamp_position_size(1.0, 2.0), 1.0);
    }

    struct FixedPrices(std::collections::HashMap<(String, String), f64>);
    impl VenuePriceSource for FixedPrices {
        fn venue_price(&self, venue: &str, mint: &str) -> Option<f64> {
            self.0.get(&(venue.to_string(), mint.to_string())).copied()
        }
    }

    struct FakeStriker;
    #[async_trait]
    impl BundleStriker for FakeStriker {
        async fn build_leg(&self, venue: &str, _input_mint: &str, _output_mint: &str, _amount_sol: f64) -> Result<String> {
            Ok(format!("leg-on-{venue}"))
        }
    }

    #[test]
    fn scan_once_finds_registered_pair_above_threshold() {
        let mut prices = std::collections::HashMap::new();
        prices.insert(("raydium".to_string(), "TOKEN".to_string()), 1.00);
        prices.insert(("orca".to_string(), "TOKEN".to_string()), 1.05);
        let prices = Arc::new(FixedPrices(prices));
        let striker = Arc::new(FakeStriker);
        let jito = Arc::new(JitoSubmitter::new(Arc::new(crate::jito_submitter::NoTipFloor)));
        let engine = ArbEngine::new(prices, striker, jito);
        engine.register_pair(ArbPair {
            base_mint: "TOKEN".to_string(),
            quote_mint: "So111".to_string(),
            venue_a: "raydium".to_string(),
            venue_b: "orca".to_string(),
            min_spread_pct: 1.0,
            max_position_sol: 2.0,
        });

        let found = engine.scan_once();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].buy_venue, "raydium");
        assert_eq!(found[0].sell_venue, "orca");
    }

    #[test]
    fn scan_once_skips_pairs_missing_a_price() {
        let prices = Arc::new(FixedPrices(std::collections::HashMap::new()));
        let striker = Arc::new(FakeStriker);
        let jito = Arc::new(JitoSubmitter::new(Arc::new(crate::jito_submitter::NoTipFloor)));
        let engine = ArbEngine::new(prices, striker, jito);
        engine.register_pair(ArbPair {
            base_mint: "TOKEN".to_string(),
            quote_mint: "So111".to_string(),
            venue_a: "raydium".to_string(),
            venue_b: "orca".to_string(),
            min_spread_pct: 1.0,
            max_position_sol: 2.0,
        });
        assert!(engine.scan_once().is_empty());
    }
}
