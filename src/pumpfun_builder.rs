//! Direct Pump.fun bonding-curve buy instruction building.
//!
//! Ported from `pumpfun.py`: skips the Jupiter HTTP quote/swap round-trip
//! (~600ms) for a single RPC fetch plus local instruction assembly
//! (~50ms). Grounded on the donor's `pumpfun_executor.rs` for Solana SDK
//! idiom (`solana_sdk::instruction::{Instruction, AccountMeta}`,
//! `Pubkey::find_program_address`), with the account list, discriminator,
//! and byte offsets corrected to the values verified in the original.

use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{v0::Message as MessageV0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, warn};

use crate::constants::{
    ASSOCIATED_TOKEN_PROGRAM_ID, CURVE_MIN_ACCOUNT_LEN, CURVE_OFFSET_COMPLETE,
    CURVE_OFFSET_REAL_SOL_RESERVES, CURVE_OFFSET_REAL_TOKEN_RESERVES, CURVE_OFFSET_VIRTUAL_SOL_RESERVES,
    CURVE_OFFSET_VIRTUAL_TOKEN_RESERVES, CURVE_STATE_CACHE_TTL, PUMPFUN_BUY_DISCRIMINATOR,
    PUMPFUN_COMPUTE_UNIT_LIMIT, PUMPFUN_FEE_RECIPIENT, PUMPFUN_PROGRAM_ID, RENT_SYSVAR_ID,
    SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use crate::error::PumpfunError;
use crate::models::Mint;

#[derive(Debug, Clone)]
pub struct BondingCurveState {
    pub bonding_curve_address: Pubkey,
    pub token_mint: Pubkey,
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
    pub associated_bonding_curve: Pubkey,
}

struct CacheEntry {
    state: BondingCurveState,
    cached_at: Instant,
}

/// Builds unsigned Pump.fun buy transactions and caches bonding curve
/// reads for `CURVE_STATE_CACHE_TTL`.
pub struct PumpfunBuilder {
    program_id: Pubkey,
    http: reqwest::Client,
    state_cache: Mutex<std::collections::HashMap<String, CacheEntry>>,
}

impl PumpfunBuilder {
    pub fn new() -> Self {
        Self {
            program_id: Pubkey::from_str(PUMPFUN_PROGRAM_ID).expect("valid static pubkey"),
            http: reqwest::Client::new(),
            state_cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn derive_bonding_curve(&self, token_mint: &Pubkey) -> (Pubkey, Pubkey) {
        let (bonding_curve, _) =
            Pubkey::find_program_address(&[b"bonding-curve", token_mint.as_ref()], &self.program_id);
        let assoc_bonding_curve = Self::derive_ata(&bonding_curve, token_mint);
        (bonding_curve, assoc_bonding_curve)
    }

    fn derive_global_config(&self) -> Pubkey {
        Pubkey::find_program_address(&[b"global"], &self.program_id).0
    }

    fn derive_event_authority(&self) -> Pubkey {
        Pubkey::find_program_address(&[b"__event_authority"], &self.program_id).0
    }

    fn derive_ata(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        let token_program = Pubkey::from_str(TOKEN_PROGRAM_ID).expect("valid static pubkey");
        let ata_program = Pubkey::from_str(ASSOCIATED_TOKEN_PROGRAM_ID).expect("valid static pubkey");
        Pubkey::find_program_address(&[owner.as_ref(), token_program.as_ref(), mint.as_ref()], &ata_program).0
    }

    pub async fn fetch_bonding_curve_state(&self, rpc_url: &str, token_mint: &Mint) -> Result<BondingCurveState, PumpfunError> {
        if let Some(entry) = self.state_cache.lock().get(token_mint) {
            if entry.cached_at.elapsed() < CURVE_STATE_CACHE_TTL {
                return Ok(entry.state.clone());
            }
        }

        let mint_pubkey = Pubkey::from_str(token_mint).map_err(|_| PumpfunError::MalformedCurveData)?;
        let (bonding_curve, assoc_bonding_curve) = self.derive_bonding_curve(&mint_pubkey);

        let body = serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "getAccountInfo",
            "params": [bonding_curve.to_string(), {"encoding": "base64", "commitment": "confirmed"}]
        });
        let resp = self
            .http
            .post(rpc_url)
            .json(&body)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|_| PumpfunError::StateFetchFailed)?;
        let json: serde_json::Value = resp.json().await.map_err(|_| PumpfunError::StateFetchFailed)?;

        let value = json.get("result").and_then(|r| r.get("value"));
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Err(PumpfunError::CurveNotFound);
        };
        let data_b64 = value
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .and_then(|s| s.as_str())
            .ok_or(PumpfunError::CurveNotFound)?;

        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD
            .decode(data_b64)
            .map_err(|_| PumpfunError::MalformedCurveData)?;
        if data.len() < CURVE_MIN_ACCOUNT_LEN {
            warn!(token_mint, len = data.len(), "bonding curve data too short");
            return Err(PumpfunError::MalformedCurveData);
        }

        let read_u64 = |offset: usize| -> u64 { u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap()) };

        let state = BondingCurveState {
            bonding_curve_address: bonding_curve,
            token_mint: mint_pubkey,
            virtual_token_reserves: read_u64(CURVE_OFFSET_VIRTUAL_TOKEN_RESERVES),
            virtual_sol_reserves: read_u64(CURVE_OFFSET_VIRTUAL_SOL_RESERVES),
            real_token_reserves: read_u64(CURVE_OFFSET_REAL_TOKEN_RESERVES),
            real_sol_reserves: read_u64(CURVE_OFFSET_REAL_SOL_RESERVES),
            token_total_supply: read_u64(40),
            complete: data[CURVE_OFFSET_COMPLETE] != 0,
            associated_bonding_curve: assoc_bonding_curve,
        };

        debug!(
            token_mint,
            v_tokens = state.virtual_token_reserves,
            v_sol = state.virtual_sol_reserves,
            complete = state.complete,
            "fetched bonding curve state"
        );

        self.state_cache.lock().insert(
            token_mint.clone(),
            CacheEntry { state: state.clone(), cached_at: Instant::now() },
        );
        Ok(state)
    }

    /// Constant-product swap math: `tokens_out = sol_in * vTokens / (vSol + sol_in)`.
    pub fn compute_tokens_out(&self, sol_lamports: u64, state: &BondingCurveState) -> u64 {
        if state.virtual_sol_reserves == 0 {
            return 0;
        }
        let numerator = (sol_lamports as u128) * (state.virtual_token_reserves as u128);
        let denominator = (state.virtual_sol_reserves as u128) + (sol_lamports as u128);
        (numerator / denominator) as u64
    }

    /// Inverse of `compute_tokens_out`, with a 1-lamport rounding safety margin.
    pub fn compute_sol_for_tokens(&self, tokens_wanted: u64, state: &BondingCurveState) -> u64 {
        if state.virtual_token_reserves == 0 || tokens_wanted >= state.virtual_token_reserves {
            return 0;
        }
        let numerator = (tokens_wanted as u128) * (state.virtual_sol_reserves as u128);
        let denominator = (state.virtual_token_reserves as u128) - (tokens_wanted as u128);
        (numerator / denominator) as u64 + 1
    }

    fn create_ata_idempotent_ix(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
        let ata = Self::derive_ata(owner, mint);
        let token_program = Pubkey::from_str(TOKEN_PROGRAM_ID).expect("valid static pubkey");
        let ata_program = Pubkey::from_str(ASSOCIATED_TOKEN_PROGRAM_ID).expect("valid static pubkey");
        let system_program = Pubkey::from_str(SYSTEM_PROGRAM_ID).expect("valid static pubkey");

        Instruction {
            program_id: ata_program,
            accounts: vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new(ata, false),
                AccountMeta::new_readonly(*owner, false),
                AccountMeta::new_readonly(*mint, false),
                AccountMeta::new_readonly(system_program, false),
                AccountMeta::new_readonly(token_program, false),
            ],
            data: vec![1], // createIdempotent
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_buy_instruction(
        &self,
        global_config: Pubkey,
        fee_recipient: Pubkey,
        mint: Pubkey,
        bonding_curve: Pubkey,
        assoc_bonding_curve: Pubkey,
        user_ata: Pubkey,
        user: Pubkey,
        event_authority: Pubkey,
        token_amount: u64,
        max_sol_cost: u64,
    ) -> Instruction {
        let mut data = Vec::with_capacity(24);
        data.extend_from_slice(&PUMPFUN_BUY_DISCRIMINATOR);
        data.extend_from_slice(&token_amount.to_le_bytes());
        data.extend_from_slice(&max_sol_cost.to_le_bytes());

        let token_program = Pubkey::from_str(TOKEN_PROGRAM_ID).expect("valid static pubkey");
        let rent_sysvar = Pubkey::from_str(RENT_SYSVAR_ID).expect("valid static pubkey");
        let system_program = Pubkey::from_str(SYSTEM_PROGRAM_ID).expect("valid static pubkey");

        // 12 accounts, authoritative order verified against the original.
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new_readonly(global_config, false),
                AccountMeta::new(fee_recipient, false),
                AccountMeta::new_readonly(mint, false),
                AccountMeta::new(bonding_curve, false),
                AccountMeta::new(assoc_bonding_curve, false),
                AccountMeta::new(user_ata, false),
                AccountMeta::new(user, true),
                AccountMeta::new_readonly(system_program, false),
                AccountMeta::new_readonly(token_program, false),
                AccountMeta::new_readonly(rent_sysvar, false),
                AccountMeta::new_readonly(event_authority, false),
                AccountMeta::new_readonly(self.program_id, false),
            ],
            data,
        }
    }

    /// Builds an unsigned, base64-encoded `VersionedTransaction` for a buy.
    pub async fn build_buy_transaction(
        &self,
        rpc_url: &str,
        token_mint: &Mint,
        sol_lamports: u64,
        min_tokens_out: u64,
        user_pubkey: &str,
        blockhash: &str,
        compute_unit_price: u64,
    ) -> Result<String, PumpfunError> {
        let state = self.fetch_bonding_curve_state(rpc_url, token_mint).await?;
        if state.complete {
            warn!(token_mint, "bonding curve complete, token has graduated");
            return Err(PumpfunError::CurveComplete);
        }

        let user = Pubkey::from_str(user_pubkey).map_err(|_| PumpfunError::MalformedCurveData)?;
        let global_config = self.derive_global_config();
        let event_authority = self.derive_event_authority();
        let user_ata = Self::derive_ata(&user, &state.token_mint);
        let fee_recipient = Pubkey::from_str(PUMPFUN_FEE_RECIPIENT).expect("valid static pubkey");

        let mut instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(PUMPFUN_COMPUTE_UNIT_LIMIT),
            ComputeBudgetInstruction::set_compute_unit_price(compute_unit_price),
            Self::create_ata_idempotent_ix(&user, &user, &state.token_mint),
        ];
        instructions.push(self.build_buy_instruction(
            global_config,
            fee_recipient,
            state.token_mint,
            state.bonding_curve_address,
            state.associated_bonding_curve,
            user_ata,
            user,
            event_authority,
            min_tokens_out,
            sol_lamports,
        ));

        let recent_blockhash =
            solana_sdk::hash::Hash::from_str(blockhash).map_err(|_| PumpfunError::MalformedCurveData)?;
        let message = MessageV0::try_compile(&user, &instructions, &[], recent_blockhash)
            .map_err(|_| PumpfunError::MalformedCurveData)?;
        let tx = VersionedTransaction {
            signatures: vec![solana_sdk::signature::Signature::default()],
            message: VersionedMessage::V0(message),
        };

        let bytes = bincode::serialize(&tx).map_err(|_| PumpfunError::MalformedCurveData)?;
        use base64::Engine;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn clear_cache(&self) {
        self.state_cache.lock().clear();
    }

    #[cfg(test)]
    fn insert_test_state(&self, mint: &str, state: BondingCurveState) {
        self.state_cache.lock().insert(mint.to_string(), CacheEntry { state, cached_at: Instant::now() });
    }
}

impl Default for PumpfunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> BondingCurveState {
        BondingCurveState {
            bonding_curve_address: Pubkey::new_unique(),
            token_mint: Pubkey::new_unique(),
            virtual_token_reserves: 1_000_000_000_000,
            virtual_sol_reserves: 30_000_000_000,
            real_token_reserves: 800_000_000_000,
            real_sol_reserves: 10_000_000_000,
            token_total_supply: 1_000_000_000_000,
            complete: false,
            associated_bonding_curve: Pubkey::new_unique(),
        }
    }

    #[test]
    fn tokens_out_follows_constant_product() {
        let builder = PumpfunBuilder::new();
        let state = sample_state();
        let tokens_out = builder.compute_tokens_out(1_000_000_000, &state);
        let expected = (1_000_000_000u128 * 1_000_000_000_000u128) / (30_000_000_000u128 + 1_000_000_000u128);
        assert_eq!(tokens_out as u128, expected);
    }

    #[test]
    fn sol_for_tokens_is_approximate_inverse() {
        let builder = PumpfunBuilder::new();
        let state = sample_state();
        let tokens_out = builder.compute_tokens_out(1_000_000_000, &state);
        let sol_needed = builder.compute_sol_for_tokens(tokens_out, &state);
        // The +1 lamport rounding safety margin means this never exactly
        // round-trips; it should be within a few lamports.
        assert!(sol_needed >= 1_000_000_000, "sol_needed={sol_needed}");
        assert!(sol_needed < 1_000_000_010, "sol_needed={sol_needed}");
    }

    #[test]
    fn zero_virtual_sol_reserves_yields_zero_tokens() {
        let builder = PumpfunBuilder::new();
        let mut state = sample_state();
        state.virtual_sol_reserves = 0;
        assert_eq!(builder.compute_tokens_out(1_000_000_000, &state), 0);
    }

    #[tokio::test]
    async fn completed_curve_rejects_buy_before_any_network_call() {
        let builder = PumpfunBuilder::new();
        let mut state = sample_state();
        state.complete = true;
        let mint = "GRADUATEDMINT1111111111111111111111111111";
        builder.insert_test_state(mint, state);

        let result = builder
            .build_buy_transaction("http://unused.invalid", &mint.to_string(), 1_000_000_000, 1, "11111111111111111111111111111111", "11111111111111111111111111111111", 1000)
            .await;
        assert_eq!(result.unwrap_err(), PumpfunError::CurveComplete);
    }
}
