//! In-memory cluster.
//!
//! Holds accounts in a map, executes [`SimInstruction`]s atomically per
//! transaction, charges a flat fee to the first signer and pushes every
//! changed account to its subscribers after commit. Tests can queue
//! rejections and slow confirmation down.

use async_trait::async_trait;
use solana_sdk::account::Account;
use solana_sdk::instruction::{Instruction, InstructionError};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::TransactionError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::exchange::{
    credit, execute, set_token_amount, SimExchange, SimInstruction, SimTokenProgram,
    SIM_TOKEN_PROGRAM_ID, TOKEN_ACCOUNT_RENT,
};
use crate::chain::{AccountStream, ChainConnection, ChainError};
use crate::market::MarketMeta;
use crate::position::{decode_token_amount, decode_token_owner, encode_token_account};
use crate::protocol::TokenProgram;

pub const TRANSACTION_FEE: u64 = 5_000;

/// One submitted transaction and how it ended.
#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub signature: Signature,
    pub signers: Vec<Pubkey>,
    pub instructions: Vec<SimInstruction>,
    pub error: Option<TransactionError>,
}

impl SentTransaction {
    pub fn is_confirmed(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
struct ChainState {
    accounts: HashMap<Pubkey, Account>,
    subscribers: HashMap<Pubkey, Vec<mpsc::UnboundedSender<Account>>>,
    transactions: Vec<SentTransaction>,
    rejections: VecDeque<TransactionError>,
    confirm_delay: Option<Duration>,
}

impl ChainState {
    // closed accounts are pushed as empty system accounts
    fn notify(&mut self, address: &Pubkey) {
        let account = self
            .accounts
            .get(address)
            .cloned()
            .unwrap_or_else(|| Account::new(0, 0, &solana_sdk::system_program::id()));
        if let Some(subscribers) = self.subscribers.get_mut(address) {
            subscribers.retain(|tx| tx.send(account.clone()).is_ok());
        }
    }

    fn commit(&mut self, next: HashMap<Pubkey, Account>) {
        let changed: Vec<Pubkey> = next
            .iter()
            .filter(|(key, account)| self.accounts.get(*key) != Some(*account))
            .map(|(key, _)| *key)
            .chain(self.accounts.keys().filter(|k| !next.contains_key(*k)).copied())
            .collect();
        self.accounts = next;
        for key in changed {
            self.notify(&key);
        }
    }

    fn execute(
        &self,
        signers: &[Pubkey],
        instructions: &[SimInstruction],
    ) -> Result<HashMap<Pubkey, Account>, TransactionError> {
        let fee_payer = signers.first().ok_or(TransactionError::SignatureFailure)?;
        let mut next = self.accounts.clone();
        let payer = next
            .get_mut(fee_payer)
            .ok_or(TransactionError::AccountNotFound)?;
        payer.lamports = payer
            .lamports
            .checked_sub(TRANSACTION_FEE)
            .ok_or(TransactionError::InsufficientFundsForFee)?;

        let signer_set: HashSet<Pubkey> = signers.iter().copied().collect();
        for (index, ix) in instructions.iter().enumerate() {
            execute(&mut next, &signer_set, ix)
                .map_err(|fault| TransactionError::InstructionError(index as u8, fault.into()))?;
        }
        Ok(next)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryChain {
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_account(&self, address: Pubkey, account: Account) {
        let mut state = self.lock();
        state.accounts.insert(address, account);
        state.notify(&address);
    }

    pub fn account(&self, address: &Pubkey) -> Option<Account> {
        self.lock().accounts.get(address).cloned()
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        self.account(address).map(|a| a.lamports).unwrap_or(0)
    }

    pub fn token_balance(&self, address: &Pubkey) -> Option<u64> {
        self.account(address)
            .and_then(|a| decode_token_amount(&a.data).ok())
    }

    /// Write a listed market's accounts.
    pub fn list_market(&self, meta: &MarketMeta) {
        for (address, account) in SimExchange.market_accounts(meta) {
            self.set_account(address, account);
        }
    }

    /// Create the associated token account of `owner` for `mint` holding `amount`.
    pub fn create_token_account(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) -> Pubkey {
        let address = SimTokenProgram.associated_address(owner, mint);
        self.set_account(
            address,
            Account {
                lamports: TOKEN_ACCOUNT_RENT,
                data: encode_token_account(mint, owner, amount),
                owner: SIM_TOKEN_PROGRAM_ID,
                executable: false,
                rent_epoch: 0,
            },
        );
        address
    }

    /// The next transaction fails with `error` without touching any account.
    pub fn reject_next(&self, error: TransactionError) {
        self.lock().rejections.push_back(error);
    }

    /// The next transaction fails with custom program error `code`.
    pub fn reject_next_with_code(&self, code: u32) {
        self.reject_next(TransactionError::InstructionError(0, InstructionError::Custom(code)));
    }

    /// Hold every confirmation for `delay`.
    pub fn set_confirm_delay(&self, delay: Option<Duration>) {
        self.lock().confirm_delay = delay;
    }

    pub fn transactions(&self) -> Vec<SentTransaction> {
        self.lock().transactions.clone()
    }

    pub fn confirmed_transactions(&self) -> Vec<SentTransaction> {
        self.transactions()
            .into_iter()
            .filter(SentTransaction::is_confirmed)
            .collect()
    }
}

#[async_trait]
impl ChainConnection for InMemoryChain {
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, ChainError> {
        Ok(self.account(address))
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, ChainError> {
        let state = self.lock();
        Ok(addresses
            .iter()
            .map(|a| state.accounts.get(a).cloned())
            .collect())
    }

    async fn get_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>, ChainError> {
        let state = self.lock();
        let mut found: Vec<(Pubkey, Account)> = state
            .accounts
            .iter()
            .filter(|(_, a)| a.owner == SIM_TOKEN_PROGRAM_ID)
            .filter(|(_, a)| decode_token_owner(&a.data) == Some(*owner))
            .map(|(k, a)| (*k, a.clone()))
            .collect();
        found.sort_by_key(|(k, _)| *k);
        Ok(found)
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>, ChainError> {
        let state = self.lock();
        let mut found: Vec<(Pubkey, Account)> = state
            .accounts
            .iter()
            .filter(|(_, a)| a.owner == *program_id)
            .map(|(k, a)| (*k, a.clone()))
            .collect();
        found.sort_by_key(|(k, _)| *k);
        Ok(found)
    }

    async fn on_account_change(&self, address: &Pubkey) -> Result<AccountStream, ChainError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.entry(*address).or_default().push(tx);
        Ok(rx)
    }

    async fn send_and_confirm(
        &self,
        instructions: &[Instruction],
        signers: &[&Keypair],
    ) -> Result<Signature, ChainError> {
        let delay = self.lock().confirm_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let signer_keys: Vec<Pubkey> = signers.iter().map(|k| k.pubkey()).collect();
        let mut decoded = Vec::with_capacity(instructions.len());
        for (index, ix) in instructions.iter().enumerate() {
            match SimInstruction::decode(ix) {
                Some(sim) => decoded.push(sim),
                None => {
                    return Err(ChainError::Rejected(TransactionError::InstructionError(
                        index as u8,
                        InstructionError::InvalidInstructionData,
                    )))
                }
            }
        }

        let signature = Signature::new_unique();
        let mut state = self.lock();
        let result = match state.rejections.pop_front() {
            Some(error) => Err(error),
            None => state.execute(&signer_keys, &decoded),
        };
        state.transactions.push(SentTransaction {
            signature,
            signers: signer_keys,
            instructions: decoded,
            error: result.as_ref().err().cloned(),
        });
        match result {
            Ok(next) => {
                state.commit(next);
                debug!(%signature, "sim transaction confirmed");
                Ok(signature)
            }
            Err(error) => Err(ChainError::Rejected(error)),
        }
    }

    async fn request_airdrop(&self, address: &Pubkey, amount: u64) -> Result<Signature, ChainError> {
        let mut state = self.lock();
        let is_token = state
            .accounts
            .get(address)
            .is_some_and(|a| a.owner == SIM_TOKEN_PROGRAM_ID);
        if is_token {
            let balance = state
                .accounts
                .get(address)
                .and_then(|a| decode_token_amount(&a.data).ok())
                .unwrap_or(0);
            set_token_amount(&mut state.accounts, address, balance.saturating_add(amount))
                .map_err(|fault| ChainError::Rpc(format!("airdrop to {address} failed: {fault:?}")))?;
        } else {
            credit(&mut state.accounts, address, amount);
        }
        state.notify(address);
        Ok(Signature::new_unique())
    }
}
