// 8.0.2: reports and errors for engine operations.

use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use crate::account::AccountError;
use crate::chain::ChainError;
use crate::config::ConfigError;
use crate::error_code::DexErrorCode;
use crate::lots::LotError;
use crate::market::MarketError;
use crate::order::{DesiredOrder, PlannedOrder, SkipReason};
use crate::position::{PositionError, PositionLimits};
use crate::protocol::ProtocolError;
use crate::types::{OrderId, Side};

/// Why a submitted transaction did not land.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub code: Option<u32>,
    pub error: Option<DexErrorCode>,
    pub message: String,
}

impl From<&ChainError> for Rejection {
    fn from(e: &ChainError) -> Self {
        let code = match e {
            ChainError::Rejected(err) => crate::error_code::custom_error_code(err),
            _ => None,
        };
        Self {
            code,
            error: e.dex_error(),
            message: e.to_string(),
        }
    }
}

/// Outcome of one `send_orders` call.
#[derive(Debug, Clone, Default)]
pub struct SendReport {
    pub skipped: Vec<(DesiredOrder, SkipReason)>,
    pub submitted: Vec<PlannedOrder>,
    pub signature: Option<Signature>,
    pub rejection: Option<Rejection>,
}

impl SendReport {
    pub fn is_confirmed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn skipped_for(&self, reason: &SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| r == reason).count()
    }
}

/// Outcome of one `cancel_orders` call.
#[derive(Debug, Clone, Default)]
pub struct CancelReport {
    pub canceled: usize,
    pub signature: Option<Signature>,
    pub rejection: Option<Rejection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceLine {
    pub symbol: String,
    pub token_account: Option<Pubkey>,
    pub native: u64,
    /// Human units, rounded to the token's display precision.
    pub amount: Decimal,
    pub limits: PositionLimits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrderLine {
    pub market: String,
    pub side: Side,
    pub price_lots: u64,
    pub price: Decimal,
    pub order_id: OrderId,
    pub client_id: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Lot error: {0}")]
    Lot(#[from] LotError),

    #[error("Submission for {0} still in flight")]
    SubmissionInFlight(String),

    #[error("Market {market} trades {found} but {symbol} is configured with mint {expected}")]
    MintMismatch {
        market: String,
        symbol: String,
        expected: Pubkey,
        found: Pubkey,
    },
}
