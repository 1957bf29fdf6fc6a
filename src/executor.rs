//! Jupiter-routed swap execution.
//!
//! Ported from the donor's `jupiter_executor.rs` shape (rate-limited HTTP
//! client wrapping an aggregator, `ExecutionParams`/`ExecutionResult`
//! structs) but reframed from the donor's pre-calculated-route "Ultra"
//! flow onto a classic quote-then-swap contract: request a quote, request
//! a signed-shape transaction from the aggregator, sign locally, submit
//! raw. The donor's `jupiter_rate_limiter.rs` burst-protection idiom is
//! kept almost verbatim for the HTTP layer.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use governor::{Quota, RateLimiter};
use governor::state::{InMemoryState, NotKeyed};
use governor::clock::DefaultClock;
use serde::{Deserialize, Serialize};
use solana_sdk::message::VersionedMessage;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, info, warn};

use crate::blockhash_cache::BlockhashCache;
use crate::constants::{DEFAULT_TOKEN_DECIMALS, JUPITER_COMPUTE_UNIT_LIMIT, SOL_MINT_DECIMALS};
use crate::models::{Mint, TradeRecord};
use crate::portfolio::SOL_MINT;

/// Decouples the executor from the concrete wallet implementation (the
/// donor's `wallet_manager.rs` signs legacy `Transaction`s; the executor
/// needs to sign a `VersionedMessage`).
#[async_trait::async_trait]
pub trait SigningOracle: Send + Sync {
    fn payer(&self) -> Pubkey;
    async fn sign_message(&self, message: &VersionedMessage) -> Result<solana_sdk::signature::Signature>;
}

/// Reader-majority price cache; only `usd_price` is needed at this boundary.
pub trait PriceOracle: Send + Sync {
    fn usd_price(&self, mint: &str) -> Option<f64>;
}

/// Append-only trade persistence, decoupling the executor from `store.rs`.
#[async_trait::async_trait]
pub trait TradeSink: Send + Sync {
    async fn record_trade(&self, record: TradeRecord) -> Result<()>;
}

/// Aggregator-backed limit orders for LIMIT_GRID bots, over the same
/// quote/swap HTTP base as [`AggregatorClient`] but a distinct endpoint
/// family (the aggregator's limit-order service, not its swap router).
pub struct AggregatorLimitOrders {
    http: reqwest::Client,
    base_url: String,
    owner: Pubkey,
}

impl AggregatorLimitOrders {
    pub fn new(base_url: impl Into<String>, owner: Pubkey) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), owner }
    }
}

fn parse_open_order_pubkeys(orders: &[serde_json::Value]) -> Vec<String> {
    orders.iter().filter_map(|o| o.get("publicKey").and_then(|v| v.as_str()).map(str::to_string)).collect()
}

#[async_trait::async_trait]
impl crate::bot_scheduler::LimitOrderService for AggregatorLimitOrders {
    async fn open_order_pubkeys(&self) -> Result<Vec<String>> {
        let url = format!("{}/limit-orders/open?wallet={}", self.base_url, self.owner);
        let resp = self.http.get(&url).send().await.context("limit order listing request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("aggregator open-orders error {status}: {body}"));
        }
        let orders: Vec<serde_json::Value> = resp.json().await.context("open orders response decode failed")?;
        Ok(parse_open_order_pubkeys(&orders))
    }

    async fn create_limit_order(&self, sell_mint: &str, buy_mint: &str, amount: f64, price: f64) -> Result<String> {
        let url = format!("{}/limit-orders/create", self.base_url);
        let body = serde_json::json!({
            "owner": self.owner.to_string(),
            "inputMint": sell_mint,
            "outputMint": buy_mint,
            "makingAmount": amount,
            "price": price,
        });
        let resp = self.http.post(&url).json(&body).send().await.context("limit order create request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("aggregator create-order error {status}: {text}"));
        }
        let value: serde_json::Value = resp.json().await.context("create order response decode failed")?;
        value
            .get("orderPubkey")
            .or_else(|| value.get("publicKey"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("create-order response missing order pubkey"))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionParams {
    pub input_mint: Mint,
    pub output_mint: Mint,
    pub input_decimals: u8,
    pub output_decimals: u8,
    pub ui_amount: f64,
    pub slippage_bps: u16,
    /// Priority fee budget in lamports for the whole transaction; converted
    /// to μlamports/compute-unit against `compute_unit_limit`.
    pub priority_fee_lamports: u64,
    pub compute_unit_limit: u32,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub signature: String,
    pub amount_out: f64,
    pub route_fees_lamports: u64,
    pub usd_value: f64,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "outAmount")]
    out_amount: String,
    #[serde(rename = "routePlan", default)]
    route_plan: Vec<RoutePlanStep>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RoutePlanStep {
    #[serde(rename = "swapInfo")]
    swap_info: SwapInfo,
}

#[derive(Debug, Deserialize)]
struct SwapInfo {
    #[serde(rename = "feeAmount", default)]
    fee_amount: Option<String>,
}

#[derive(Debug, Serialize)]
struct SwapRequest<'a> {
    #[serde(rename = "quoteResponse")]
    quote_response: &'a serde_json::Value,
    #[serde(rename = "userPublicKey")]
    user_public_key: String,
    #[serde(rename = "prioritizationFeeLamports")]
    prioritization_fee_lamports: u64,
    #[serde(rename = "computeUnitPriceMicroLamports")]
    compute_unit_price_micro_lamports: u64,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    #[serde(rename = "swapTransaction")]
    swap_transaction: String,
}

struct BurstProtector {
    last_request: Option<Instant>,
    min_interval_ms: u64,
}

/// Rate-limited client over an aggregator's quote/swap endpoints, following
/// the donor's `JupiterRateLimiter` shape: a `governor` quota for steady
/// state plus a manual minimum-interval burst guard.
pub struct AggregatorClient {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    burst: parking_lot::Mutex<BurstProtector>,
}

impl AggregatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(4).unwrap()).allow_burst(NonZeroU32::new(8).unwrap());
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client builds"),
            base_url: base_url.into(),
            limiter: RateLimiter::direct(quota),
            burst: parking_lot::Mutex::new(BurstProtector { last_request: None, min_interval_ms: 250 }),
        }
    }

    async fn throttle(&self) {
        self.limiter.until_ready().await;
        let wait = {
            let burst = self.burst.lock();
            burst.last_request.and_then(|last| {
                let elapsed = last.elapsed();
                let min_interval = Duration::from_millis(burst.min_interval_ms);
                (elapsed < min_interval).then(|| min_interval - elapsed)
            })
        };
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
        self.burst.lock().last_request = Some(Instant::now());
    }

    async fn quote(&self, input_mint: &str, output_mint: &str, amount_atomic: u64, slippage_bps: u16) -> Result<serde_json::Value> {
        self.throttle().await;
        let url = format!(
            "{}/quote?inputMint={input_mint}&outputMint={output_mint}&amount={amount_atomic}&slippageBps={slippage_bps}",
            self.base_url
        );
        let resp = self.http.get(&url).send().await.context("quote request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("aggregator quote error {status}: {body}"));
        }
        resp.json::<serde_json::Value>().await.context("quote response decode failed")
    }

    async fn swap(&self, quote: &serde_json::Value, user_pubkey: &str, priority_fee_lamports: u64, cu_price_micro_lamports: u64) -> Result<SwapResponse> {
        self.throttle().await;
        let url = format!("{}/swap", self.base_url);
        let body = SwapRequest {
            quote_response: quote,
            user_public_key: user_pubkey.to_string(),
            prioritization_fee_lamports: priority_fee_lamports,
            compute_unit_price_micro_lamports: cu_price_micro_lamports,
        };
        let resp = self.http.post(&url).json(&body).send().await.context("swap request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("aggregator swap error {status}: {text}"));
        }
        resp.json::<SwapResponse>().await.context("swap response decode failed")
    }
}

pub struct Executor {
    aggregator: AggregatorClient,
    rpc_url: String,
    blockhash: Arc<BlockhashCache>,
    signer: Arc<dyn SigningOracle>,
    prices: Arc<dyn PriceOracle>,
    sink: Arc<dyn TradeSink>,
}

impl Executor {
    pub fn new(
        aggregator_base_url: impl Into<String>,
        rpc_url: impl Into<String>,
        blockhash: Arc<BlockhashCache>,
        signer: Arc<dyn SigningOracle>,
        prices: Arc<dyn PriceOracle>,
        sink: Arc<dyn TradeSink>,
    ) -> Self {
        Self {
            aggregator: AggregatorClient::new(aggregator_base_url),
            rpc_url: rpc_url.into(),
            blockhash,
            signer,
            prices,
            sink,
        }
    }

    /// Executes `params` end to end per the 7-step contract: quote, build,
    /// sign, submit, price, persist. Never retries a submitted signature.
    pub async fn execute_swap(&self, params: ExecutionParams) -> Result<ExecutionResult> {
        let amount_atomic = (params.ui_amount * 10f64.powi(params.input_decimals as i32)).round() as u64;

        let quote = self
            .aggregator
            .quote(&params.input_mint, &params.output_mint, amount_atomic, params.slippage_bps)
            .await?;

        let parsed: QuoteResponse =
            serde_json::from_value(quote.clone()).context("quote response missing expected fields")?;
        let amount_out_atomic: u64 = parsed.out_amount.parse().context("outAmount not a valid integer")?;
        let amount_out = amount_out_atomic as f64 / 10f64.powi(params.output_decimals as i32);
        let route_fees_lamports: u64 = parsed
            .route_plan
            .iter()
            .filter_map(|step| step.swap_info.fee_amount.as_ref())
            .filter_map(|s| s.parse::<u64>().ok())
            .sum();

        let cu_price_micro_lamports = if params.compute_unit_limit == 0 {
            0
        } else {
            (params.priority_fee_lamports.saturating_mul(1_000_000)) / params.compute_unit_limit as u64
        };

        let payer = self.signer.payer();
        let swap = self
            .aggregator
            .swap(&quote, &payer.to_string(), params.priority_fee_lamports, cu_price_micro_lamports)
            .await?;

        let tx_bytes = base64::engine::general_purpose::STANDARD
            .decode(swap.swap_transaction.as_bytes())
            .context("swap transaction not valid base64")?;
        let mut versioned: VersionedTransaction =
            bincode::deserialize(&tx_bytes).context("swap transaction not a valid versioned transaction")?;

        let signature = self.signer.sign_message(&versioned.message).await.context("signing oracle failed")?;
        versioned.signatures = vec![signature];

        let raw = bincode::serialize(&versioned).context("re-serializing signed transaction failed")?;
        let signature_str = self.submit_raw(&raw).await.context("submitting signed transaction failed")?;

        let usd_value = self
            .prices
            .usd_price(&params.input_mint)
            .map(|p| p * params.ui_amount)
            .or_else(|| self.prices.usd_price(&params.output_mint).map(|p| p * amount_out))
            .unwrap_or(0.0);

        let record = TradeRecord {
            input_mint: params.input_mint.clone(),
            output_mint: params.output_mint.clone(),
            input_symbol: params.input_mint.clone(),
            output_symbol: params.output_mint.clone(),
            amount_in: params.ui_amount,
            amount_out,
            usd_value,
            slippage_bps: params.slippage_bps,
            priority_fee_lamports: params.priority_fee_lamports,
            signature: signature_str.clone(),
            source: params.source,
            status: "executed".to_string(),
            executed_at: chrono::Utc::now(),
        };
        if let Err(e) = self.sink.record_trade(record).await {
            warn!("trade executed but failed to persist trade row: {e}");
        }

        info!(signature = %signature_str, amount_out, usd_value, "swap executed");

        Ok(ExecutionResult { signature: signature_str, amount_out, route_fees_lamports, usd_value })
    }

    async fn submit_raw(&self, raw: &[u8]) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendTransaction",
            "params": [encoded, {"encoding": "base64", "skipPreflight": true, "maxRetries": 0}],
        });
        let resp = reqwest::Client::new()
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .context("sendTransaction request failed")?;
        let value: serde_json::Value = resp.json().await.context("sendTransaction response decode failed")?;
        if let Some(err) = value.get("error") {
            return Err(anyhow!("sendTransaction rejected: {err}"));
        }
        value
            .get("result")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("sendTransaction response missing result"))
    }

    /// Latest cached blockhash, for callers composing their own instructions
    /// (e.g. the bot scheduler's pre-flight balance checks).
    pub fn blockhash(&self) -> Arc<BlockhashCache> {
        self.blockhash.clone()
    }
}

/// Decimals for `mint` as far as the scheduler needs to know: exact for
/// wrapped SOL, a reasonable default for everything else (the scheduler
/// doesn't carry a mint registry).
fn assumed_decimals(mint: &str) -> u8 {
    if mint == SOL_MINT {
        SOL_MINT_DECIMALS
    } else {
        DEFAULT_TOKEN_DECIMALS
    }
}

#[async_trait::async_trait]
impl crate::bot_scheduler::TradeExecutor for Executor {
    async fn execute(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: f64,
        source: &str,
        priority_fee_lamports: u64,
    ) -> Result<crate::bot_scheduler::TradeOutcome> {
        let params = ExecutionParams {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            input_decimals: assumed_decimals(input_mint),
            output_decimals: assumed_decimals(output_mint),
            ui_amount: amount,
            slippage_bps: crate::constants::DEFAULT_MIN_SLIPPAGE_BPS,
            priority_fee_lamports,
            compute_unit_limit: JUPITER_COMPUTE_UNIT_LIMIT,
            source: source.to_string(),
        };
        let result = self.execute_swap(params).await?;
        Ok(crate::bot_scheduler::TradeOutcome { amount_out: result.amount_out, usd_value: result.usd_value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeSigner(Pubkey);
    #[async_trait::async_trait]
    impl SigningOracle for FakeSigner {
        fn payer(&self) -> Pubkey {
            self.0
        }
        async fn sign_message(&self, _message: &VersionedMessage) -> Result<solana_sdk::signature::Signature> {
            Ok(solana_sdk::signature::Signature::default())
        }
    }

    struct FakePrices;
    impl PriceOracle for FakePrices {
        fn usd_price(&self, mint: &str) -> Option<f64> {
            if mint == "So11111111111111111111111111111111111111112" {
                Some(150.0)
            } else {
                None
            }
        }
    }

    struct CountingSink(AtomicU64);
    #[async_trait::async_trait]
    impl TradeSink for CountingSink {
        async fn record_trade(&self, _record: TradeRecord) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn priority_fee_converts_to_micro_lamports_per_cu() {
        let priority_fee_lamports = 10_000u64;
        let compute_unit_limit = 200_000u32;
        let micro = (priority_fee_lamports.saturating_mul(1_000_000)) / compute_unit_limit as u64;
        assert_eq!(micro, 50_000);
    }

    #[test]
    fn zero_compute_unit_limit_does_not_divide_by_zero() {
        let compute_unit_limit = 0u32;
        let micro = if compute_unit_limit == 0 { 0u64 } else { 10_000 / compute_unit_limit as u64 };
        assert_eq!(micro, 0);
    }

    #[tokio::test]
    async fn usd_value_falls_back_to_output_mint_price() {
        let prices = FakePrices;
        let usd_value = prices
            .usd_price("unknown-mint")
            .map(|p| p * 1.0)
            .or_else(|| prices.usd_price("So11111111111111111111111111111111111111112").map(|p| p * 2.0))
            .unwrap_or(0.0);
        assert_eq!(usd_value, 300.0);
    }

    #[tokio::test]
    async fn counting_sink_records_once() {
        let sink = CountingSink(AtomicU64::new(0));
        let record = TradeRecord {
            input_mint: "in".into(),
            output_mint: "out".into(),
            input_symbol: "IN".into(),
            output_symbol: "OUT".into(),
            amount_in: 1.0,
            amount_out: 2.0,
            usd_value: 3.0,
            slippage_bps: 50,
            priority_fee_lamports: 1000,
            signature: "sig".into(),
            source: "test".into(),
            status: "executed".into(),
            executed_at: chrono::Utc::now(),
        };
        sink.record_trade(record).await.unwrap();
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fake_signer_exposes_payer() {
        let pk = Pubkey::new_unique();
        let signer = FakeSigner(pk);
        assert_eq!(signer.payer(), pk);
    }

    #[test]
    fn assumed_decimals_special_cases_wrapped_sol() {
        assert_eq!(assumed_decimals("So11111111111111111111111111111111111111112"), 9);
        assert_eq!(assumed_decimals("SomeOtherTokenMintAddress"), 6);
    }

    #[test]
    fn parse_open_order_pubkeys_extracts_public_keys() {
        let orders = vec![serde_json::json!({"publicKey": "Order1"}), serde_json::json!({"notAKey": true})];
        assert_eq!(parse_open_order_pubkeys(&orders), vec!["Order1".to_string()]);
    }
}
