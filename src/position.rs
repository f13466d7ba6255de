// 4.0: one token balance. the balance is whatever the chain last confirmed:
// it is written only by the account subscription (or an explicit refresh),
// never optimistically on submit.
// 4.1 BalanceCell is the single-writer cell, shared with the payer's lamports.

use rust_decimal::Decimal;
use solana_sdk::account::Account;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chain::{AccountStream, ChainConnection, ChainError};
use crate::lots::{lots_to_decimal, LotError};
use crate::protocol::TokenProgram;

// spl token account: mint(32) owner(32) amount(8) ...
pub const TOKEN_ACCOUNT_LEN: usize = 165;
const MINT_OFFSET: usize = 0;
const OWNER_OFFSET: usize = 32;
const AMOUNT_OFFSET: usize = 64;

pub fn decode_token_amount(data: &[u8]) -> Result<u64, PositionError> {
    let bytes = data
        .get(AMOUNT_OFFSET..AMOUNT_OFFSET + 8)
        .ok_or(PositionError::BadTokenAccount(data.len()))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

pub fn decode_token_mint(data: &[u8]) -> Option<Pubkey> {
    let bytes = data.get(MINT_OFFSET..MINT_OFFSET + 32)?;
    Pubkey::try_from(bytes).ok()
}

pub fn decode_token_owner(data: &[u8]) -> Option<Pubkey> {
    let bytes = data.get(OWNER_OFFSET..OWNER_OFFSET + 32)?;
    Pubkey::try_from(bytes).ok()
}

pub fn encode_token_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Vec<u8> {
    let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
    data[MINT_OFFSET..MINT_OFFSET + 32].copy_from_slice(mint.as_ref());
    data[OWNER_OFFSET..OWNER_OFFSET + 32].copy_from_slice(owner.as_ref());
    data[AMOUNT_OFFSET..AMOUNT_OFFSET + 8].copy_from_slice(&amount.to_le_bytes());
    data
}

/// Latest confirmed amount. Clones share the cell; only the listener task and
/// explicit refreshes store into it.
#[derive(Debug, Clone, Default)]
pub struct BalanceCell(Arc<AtomicU64>);

impl BalanceCell {
    pub fn new(amount: u64) -> Self {
        Self(Arc::new(AtomicU64::new(amount)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn replace(&self, amount: u64) -> u64 {
        self.0.swap(amount, Ordering::AcqRel)
    }

    /// Spawn a task replacing the stored amount with `decode(account)` on every push.
    pub(crate) fn listen<F>(&self, label: String, mut stream: AccountStream, decode: F) -> JoinHandle<()>
    where
        F: Fn(&Account) -> Result<u64, PositionError> + Send + 'static,
    {
        let cell = self.clone();
        tokio::spawn(async move {
            while let Some(account) = stream.recv().await {
                match decode(&account) {
                    Ok(amount) => {
                        let previous = cell.replace(amount);
                        if previous != amount {
                            debug!(%label, previous, amount, "balance updated");
                        }
                    }
                    Err(e) => warn!(%label, error = %e, "undecodable balance notification"),
                }
            }
            debug!(%label, "balance subscription ended");
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionLimits {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

#[derive(Debug)]
pub struct Position {
    pub symbol: String,
    pub mint: Pubkey,
    pub decimals: u8,
    /// Digits shown when printing balances.
    pub precision: u32,
    token_account: RwLock<Option<Pubkey>>,
    balance: BalanceCell,
    limits: RwLock<PositionLimits>,
}

impl Position {
    pub fn new(symbol: impl Into<String>, mint: Pubkey, decimals: u8, precision: u32) -> Self {
        Self {
            symbol: symbol.into(),
            mint,
            decimals,
            precision,
            token_account: RwLock::new(None),
            balance: BalanceCell::default(),
            limits: RwLock::new(PositionLimits {
                min_amount: Decimal::ZERO,
                max_amount: Decimal::ZERO,
            }),
        }
    }

    pub fn with_token_account(self, address: Pubkey, balance: u64) -> Self {
        self.set_token_account(address);
        self.balance.replace(balance);
        self
    }

    pub fn token_account(&self) -> Option<Pubkey> {
        *self.token_account.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_token_account(&self, address: Pubkey) {
        *self.token_account.write().unwrap_or_else(PoisonError::into_inner) = Some(address);
    }

    pub(crate) fn clear_token_account(&self) {
        *self.token_account.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.balance.replace(0);
    }

    /// Native units.
    pub fn balance(&self) -> u64 {
        self.balance.get()
    }

    pub(crate) fn apply_account(&self, account: &Account) -> Result<u64, PositionError> {
        let amount = decode_token_amount(&account.data)?;
        self.balance.replace(amount);
        Ok(amount)
    }

    pub fn balance_number(&self) -> Result<Decimal, LotError> {
        lots_to_decimal(self.balance(), 1, self.decimals, None)
    }

    pub fn limits(&self) -> PositionLimits {
        *self.limits.read().unwrap_or_else(PoisonError::into_inner)
    }

    // recorded only. order submission does not consult them.
    pub fn set_limits(&self, min_amount: Decimal, max_amount: Decimal) {
        *self.limits.write().unwrap_or_else(PoisonError::into_inner) = PositionLimits {
            min_amount,
            max_amount,
        };
    }

    /// Start the balance subscription. The token account must already be known.
    pub async fn attach(
        &self,
        connection: &dyn ChainConnection,
    ) -> Result<JoinHandle<()>, PositionError> {
        let address = self
            .token_account()
            .ok_or_else(|| PositionError::NoTokenAccount(self.symbol.clone()))?;
        let stream = connection.on_account_change(&address).await?;
        Ok(self
            .balance
            .listen(self.symbol.clone(), stream, |account| decode_token_amount(&account.data)))
    }

    /// Canonical associated address plus its create instruction, if none is set yet.
    pub fn plan_account_creation(
        &self,
        token_program: &dyn TokenProgram,
        owner: &Pubkey,
        payer: &Pubkey,
    ) -> Option<(Pubkey, Instruction)> {
        if self.token_account().is_some() {
            return None;
        }
        let address = token_program.associated_address(owner, &self.mint);
        let ix = token_program.create_associated_account(payer, owner, &self.mint);
        Some((address, ix))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PositionError {
    #[error("No token account for {0}")]
    NoTokenAccount(String),

    #[error("Token account data too short: {0} bytes")]
    BadTokenAccount(usize),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
}
