//! Chain connection abstraction.
//!
//! The core never speaks RPC itself. Everything it needs from the cluster goes
//! through [`ChainConnection`]: point and batched account reads, account-change
//! subscriptions, and submit-and-confirm of signed transactions. The live
//! implementation wraps an RPC + websocket client; [`crate::sim::InMemoryChain`]
//! implements it in memory for tests and the demo binary.
//!
//! Submissions wait for confirmation with whatever bounded polling the
//! implementation uses. Nothing here retries.

use async_trait::async_trait;
use solana_sdk::account::Account;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::TransactionError;
use tokio::sync::mpsc;

use crate::error_code::DexErrorCode;

/// Push stream of raw account states, one item per confirmed change.
pub type AccountStream = mpsc::UnboundedReceiver<Account>;

#[async_trait]
pub trait ChainConnection: Send + Sync {
    /// Fetch one account. `None` if it does not exist.
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, ChainError>;

    /// Fetch many accounts in one round trip. The result is positional.
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, ChainError>;

    /// All token accounts whose owner field is `owner`.
    async fn get_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>, ChainError>;

    /// All accounts owned by `program_id`.
    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>, ChainError>;

    /// Subscribe to changes of one account.
    async fn on_account_change(&self, address: &Pubkey) -> Result<AccountStream, ChainError>;

    /// Sign with `signers` (first one pays), submit and wait for confirmation.
    async fn send_and_confirm(
        &self,
        instructions: &[Instruction],
        signers: &[&Keypair],
    ) -> Result<Signature, ChainError>;

    /// Test-network faucet. Credits `amount` native units to `address`.
    async fn request_airdrop(&self, address: &Pubkey, amount: u64) -> Result<Signature, ChainError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction rejected: {0}")]
    Rejected(TransactionError),

    #[error("Confirmation timed out for {0}")]
    ConfirmationTimeout(Signature),

    #[error("Subscription to {0} closed")]
    SubscriptionClosed(Pubkey),
}

impl ChainError {
    /// Exchange error name for an on-chain rejection carrying a custom code.
    pub fn dex_error(&self) -> Option<DexErrorCode> {
        match self {
            ChainError::Rejected(err) => DexErrorCode::from_transaction_error(err),
            _ => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ChainError::Rejected(_))
    }
}
