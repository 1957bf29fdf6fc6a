//! Reader-majority USD price cache.
//!
//! Writers are the price poller below and (out of scope here) a webhook
//! handler; readers are the executor, trade guard, and bot scheduler via
//! `PriceOracle`. Cache reads never cross an `.await` point, so this uses
//! `parking_lot::RwLock` rather than the tokio equivalent, matching how
//! `intelligent_failover.rs` uses a plain sync mutex for metrics that are
//! only ever touched synchronously.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::executor::PriceOracle;
use crate::models::Mint;

pub struct PriceCache {
    watched: RwLock<Vec<Mint>>,
    prices: RwLock<HashMap<Mint, f64>>,
    http: reqwest::Client,
    base_url: String,
}

impl PriceCache {
    pub fn new(base_url: impl Into<String>, watched: Vec<Mint>) -> Self {
        Self {
            watched: RwLock::new(watched),
            prices: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Jupiter's public price API base, used when a caller doesn't override it.
    pub fn default_base_url() -> &'static str {
        "https://price.jup.ag/v4"
    }

    pub fn watch(&self, mint: Mint) {
        let mut watched = self.watched.write();
        if !watched.contains(&mint) {
            watched.push(mint);
        }
    }

    pub fn watched_mints(&self) -> Vec<Mint> {
        self.watched.read().clone()
    }

    async fn poll_once(&self) -> Result<()> {
        let ids = self.watched.read().clone();
        if ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}/price?ids={}", self.base_url, ids.join(","));
        let resp = self.http.get(&url).send().await.context("price poll request failed")?;
        let value: serde_json::Value = resp.json().await.context("price poll response decode failed")?;
        let data = value.get("data").and_then(|d| d.as_object()).cloned().unwrap_or_default();

        let mut updated = 0usize;
        let mut prices = self.prices.write();
        for (mint, entry) in data {
            if let Some(price) = entry.get("price").and_then(|p| p.as_f64()) {
                prices.insert(mint, price);
                updated += 1;
            }
        }
        drop(prices);
        debug!(updated, "price cache poll complete");
        Ok(())
    }

    pub async fn run_poll_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.poll_once().await {
                warn!("price poll failed: {e}");
            }
            tokio::select! {
                _ = tokio::time::sleep(crate::constants::PRICE_POLL_INTERVAL) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        info!("price poll loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

impl PriceOracle for PriceCache {
    fn usd_price(&self, mint: &str) -> Option<f64> {
        self.prices.read().get(mint).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_price_is_none_before_any_poll() {
        let cache = PriceCache::new(PriceCache::default_base_url(), vec!["TOKEN".to_string()]);
        assert_eq!(cache.usd_price("TOKEN"), None);
    }

    #[test]
    fn watch_is_idempotent() {
        let cache = PriceCache::new(PriceCache::default_base_url(), vec![]);
        cache.watch("TOKEN".to_string());
        cache.watch("TOKEN".to_string());
        assert_eq!(cache.watched.read().len(), 1);
    }

    #[test]
    fn prices_insert_directly_are_readable_through_the_oracle() {
        let cache = PriceCache::new(PriceCache::default_base_url(), vec![]);
        cache.prices.write().insert("TOKEN".to_string(), 1.23);
        assert_eq!(cache.usd_price("TOKEN"), Some(1.23));
    }
}
