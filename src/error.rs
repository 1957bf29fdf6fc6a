//! Typed error kinds for the trade-validation and execution boundary.
//!
//! Transient transport errors stay as `anyhow::Result` at their call sites
//! (RPC plumbing, stream I/O); these enums cover the paths where a caller
//! needs to match on a specific kind — trade guard rejections and the
//! handful of execution failures that are fatal for a single attempt.

use thiserror::Error;

/// Rejections raised by `TradeGuard`. The variant name is the
/// machine-readable code; the `#[error]` message is shown to a user.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TradeGuardError {
    #[error("mint is blocklisted")]
    BlockedToken,
    #[error("slippage below minimum allowed")]
    SlippageTooLow,
    #[error("slippage above maximum allowed")]
    SlippageTooHigh,
    #[error("trade size exceeds the single-trade cap")]
    TradeSizeExceeded,
    #[error("trade would exceed the daily volume limit")]
    DailyLimitExceeded,
    #[error("pair is within its cooldown window")]
    TradeCooldown,
    #[error("confirmation id not found")]
    InvalidConfirmation,
    #[error("confirmation has expired")]
    ConfirmationExpired,
    #[error("mint has an active freeze authority")]
    FreezeAuthorityActive,
    #[error("mint authority has not been renounced")]
    MintNotRenounced,
    #[error("mint is flagged as a rug")]
    RugDetected,
    #[error("mint has no social links on file")]
    NoSocials,
    #[error("sniper amount exceeds the configured maximum")]
    SniperAmountExceeded,
    #[error("sniper slippage exceeds the configured maximum")]
    SniperSlippageExceeded,
}

impl TradeGuardError {
    /// The stable machine-readable code surfaced to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BlockedToken => "BLOCKED_TOKEN",
            Self::SlippageTooLow => "SLIPPAGE_TOO_LOW",
            Self::SlippageTooHigh => "SLIPPAGE_TOO_HIGH",
            Self::TradeSizeExceeded => "TRADE_SIZE_EXCEEDED",
            Self::DailyLimitExceeded => "DAILY_LIMIT_EXCEEDED",
            Self::TradeCooldown => "TRADE_COOLDOWN",
            Self::InvalidConfirmation => "INVALID_CONFIRMATION",
            Self::ConfirmationExpired => "CONFIRMATION_EXPIRED",
            Self::FreezeAuthorityActive => "FREEZE_AUTHORITY_ACTIVE",
            Self::MintNotRenounced => "MINT_NOT_RENOUNCED",
            Self::RugDetected => "RUG_DETECTED",
            Self::NoSocials => "NO_SOCIALS",
            Self::SniperAmountExceeded => "SNIPER_AMOUNT_EXCEEDED",
            Self::SniperSlippageExceeded => "SNIPER_SLIPPAGE_EXCEEDED",
        }
    }
}

/// Fatal-for-this-attempt failures from the Pump.fun direct-build path.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PumpfunError {
    #[error("bonding curve account not found for mint")]
    CurveNotFound,
    #[error("bonding curve has graduated and no longer accepts buys")]
    CurveComplete,
    #[error("failed to fetch bonding curve state")]
    StateFetchFailed,
    #[error("bonding curve account data too short to parse")]
    MalformedCurveData,
}

/// Errors that cross module boundaries in the engine and don't fit the
/// trade-guard/pumpfun taxonomies above.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("trade rejected: {0}")]
    TradeGuard(#[from] TradeGuardError),
    #[error("pump.fun build failed: {0}")]
    Pumpfun(#[from] PumpfunError),
    #[error("no healthy endpoint available for protocol {0}")]
    NoHealthyEndpoint(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
