// 2.0: exchange program error codes. a rejected transaction carries a custom
// program error number; this table names it for the logs. advisory only, never
// used to decide what the engine does next.

use serde::{Deserialize, Serialize};
use solana_sdk::instruction::InstructionError;
use solana_sdk::transaction::TransactionError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DexErrorCode {
    InvalidMarketFlags,
    InvalidAskFlags,
    InvalidBidFlags,
    InvalidQueueLength,
    OwnerAccountNotProvided,
    ConsumeEventsQueueFailure,
    WrongCoinVault,
    WrongPcVault,
    WrongCoinMint,
    WrongPcMint,
    CoinVaultProgramId,
    PcVaultProgramId,
    CoinMintProgramId,
    PcMintProgramId,
    WrongCoinMintSize,
    WrongPcMintSize,
    WrongCoinVaultSize,
    WrongPcVaultSize,
    UninitializedVault,
    UninitializedMint,
    CoinMintUninitialized,
    PcMintUninitialized,
    WrongMint,
    WrongVaultOwner,
    VaultHasDelegate,
    AlreadyInitialized,
    WrongAccountDataAlignment,
    WrongAccountDataPaddingLength,
    WrongAccountHeadPadding,
    WrongAccountTailPadding,
    RequestQueueEmpty,
    EventQueueTooSmall,
    SlabTooSmall,
    BadVaultSignerNonce,
    InsufficientFunds,
    SplAccountProgramId,
    SplAccountLen,
    WrongFeeDiscountAccountOwner,
    WrongFeeDiscountMint,
    CoinPayerProgramId,
    PcPayerProgramId,
    ClientIdNotFound,
    TooManyOpenOrders,
    FakeErrorSoWeDontChangeNumbers,
    BorrowError,
    WrongOrdersAccount,
    WrongBidsAccount,
    WrongAsksAccount,
    WrongRequestQueueAccount,
    WrongEventQueueAccount,
    RequestQueueFull,
    EventQueueFull,
    MarketIsDisabled,
    WrongSigner,
    TransferFailed,
    ClientOrderIdIsZero,
    WrongRentSysvarAccount,
    RentNotProvided,
    OrdersNotRentExempt,
    OrderNotFound,
    OrderNotYours,
    WouldSelfTrade,
    InvalidOpenOrdersAuthority,
    OrderMaxTimestampExceeded,
    Unknown,
}

// indexed by code. the exchange numbers its errors densely from zero.
const CODES: [DexErrorCode; 64] = [
    DexErrorCode::InvalidMarketFlags,
    DexErrorCode::InvalidAskFlags,
    DexErrorCode::InvalidBidFlags,
    DexErrorCode::InvalidQueueLength,
    DexErrorCode::OwnerAccountNotProvided,
    DexErrorCode::ConsumeEventsQueueFailure,
    DexErrorCode::WrongCoinVault,
    DexErrorCode::WrongPcVault,
    DexErrorCode::WrongCoinMint,
    DexErrorCode::WrongPcMint,
    DexErrorCode::CoinVaultProgramId,
    DexErrorCode::PcVaultProgramId,
    DexErrorCode::CoinMintProgramId,
    DexErrorCode::PcMintProgramId,
    DexErrorCode::WrongCoinMintSize,
    DexErrorCode::WrongPcMintSize,
    DexErrorCode::WrongCoinVaultSize,
    DexErrorCode::WrongPcVaultSize,
    DexErrorCode::UninitializedVault,
    DexErrorCode::UninitializedMint,
    DexErrorCode::CoinMintUninitialized,
    DexErrorCode::PcMintUninitialized,
    DexErrorCode::WrongMint,
    DexErrorCode::WrongVaultOwner,
    DexErrorCode::VaultHasDelegate,
    DexErrorCode::AlreadyInitialized,
    DexErrorCode::WrongAccountDataAlignment,
    DexErrorCode::WrongAccountDataPaddingLength,
    DexErrorCode::WrongAccountHeadPadding,
    DexErrorCode::WrongAccountTailPadding,
    DexErrorCode::RequestQueueEmpty,
    DexErrorCode::EventQueueTooSmall,
    DexErrorCode::SlabTooSmall,
    DexErrorCode::BadVaultSignerNonce,
    DexErrorCode::InsufficientFunds,
    DexErrorCode::SplAccountProgramId,
    DexErrorCode::SplAccountLen,
    DexErrorCode::WrongFeeDiscountAccountOwner,
    DexErrorCode::WrongFeeDiscountMint,
    DexErrorCode::CoinPayerProgramId,
    DexErrorCode::PcPayerProgramId,
    DexErrorCode::ClientIdNotFound,
    DexErrorCode::TooManyOpenOrders,
    DexErrorCode::FakeErrorSoWeDontChangeNumbers,
    DexErrorCode::BorrowError,
    DexErrorCode::WrongOrdersAccount,
    DexErrorCode::WrongBidsAccount,
    DexErrorCode::WrongAsksAccount,
    DexErrorCode::WrongRequestQueueAccount,
    DexErrorCode::WrongEventQueueAccount,
    DexErrorCode::RequestQueueFull,
    DexErrorCode::EventQueueFull,
    DexErrorCode::MarketIsDisabled,
    DexErrorCode::WrongSigner,
    DexErrorCode::TransferFailed,
    DexErrorCode::ClientOrderIdIsZero,
    DexErrorCode::WrongRentSysvarAccount,
    DexErrorCode::RentNotProvided,
    DexErrorCode::OrdersNotRentExempt,
    DexErrorCode::OrderNotFound,
    DexErrorCode::OrderNotYours,
    DexErrorCode::WouldSelfTrade,
    DexErrorCode::InvalidOpenOrdersAuthority,
    DexErrorCode::OrderMaxTimestampExceeded,
];

impl DexErrorCode {
    /// Total over `u8`: anything outside the table is `Unknown`.
    pub fn from_code(code: u8) -> Self {
        CODES.get(code as usize).copied().unwrap_or(DexErrorCode::Unknown)
    }

    pub fn from_custom(code: u32) -> Self {
        u8::try_from(code)
            .map(Self::from_code)
            .unwrap_or(DexErrorCode::Unknown)
    }

    pub fn code(&self) -> Option<u8> {
        CODES.iter().position(|c| c == self).map(|i| i as u8)
    }

    pub fn from_transaction_error(err: &TransactionError) -> Option<Self> {
        custom_error_code(err).map(Self::from_custom)
    }
}

impl fmt::Display for DexErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub fn custom_error_code(err: &TransactionError) -> Option<u32> {
    match err {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) => Some(*code),
        _ => None,
    }
}
