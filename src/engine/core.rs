// 8.0 engine/core.rs: the account engine. holds the chain connection, the
// protocol clients, both signers, the lifecycle state and the event log.

use super::config::EngineConfig;
use super::results::Rejection;
use crate::account::{Account, AccountState};
use crate::chain::{ChainConnection, ChainError};
use crate::config::AccountConfig;
use crate::events::{
    Event, EventId, EventLog, EventPayload, StateChangedEvent, TransactionFailedEvent,
    TransactionRejectedEvent,
};
use crate::position::BalanceCell;
use crate::protocol::{ProtocolRegistry, TokenProgram};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Chain-facing dependencies the engine talks through.
pub struct Collaborators {
    pub connection: Arc<dyn ChainConnection>,
    pub protocols: ProtocolRegistry,
    pub token_program: Arc<dyn TokenProgram>,
}

/// Owner of the token and open-orders accounts, and the fee payer.
#[derive(Clone)]
pub struct Signers {
    pub owner: Arc<Keypair>,
    pub payer: Arc<Keypair>,
}

impl Signers {
    pub fn new(owner: Keypair, payer: Keypair) -> Self {
        Self {
            owner: Arc::new(owner),
            payer: Arc::new(payer),
        }
    }

    /// One keypair owns the accounts and pays fees.
    pub fn single(keypair: Keypair) -> Self {
        let keypair = Arc::new(keypair);
        Self {
            owner: Arc::clone(&keypair),
            payer: keypair,
        }
    }
}

/** 8.1: main engine struct. one per account; shared behind an Arc */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) account_config: AccountConfig,
    pub(super) connection: Arc<dyn ChainConnection>,
    pub(super) protocols: ProtocolRegistry,
    pub(super) token_program: Arc<dyn TokenProgram>,
    pub(super) signers: Signers,
    pub(super) state: RwLock<AccountState>,
    pub(super) account: RwLock<Arc<Account>>,
    pub(super) payer_balance: BalanceCell,
    // market symbols with a submission that has not finished
    pub(super) in_flight: Arc<Mutex<HashSet<String>>>,
    pub(super) subscriptions: Mutex<Vec<JoinHandle<()>>>,
    pub(super) events: Mutex<EventLog>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("owner", &self.owner())
            .field("payer", &self.payer())
            .field("protocols", &self.protocols)
            .finish()
    }
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        account_config: AccountConfig,
        collaborators: Collaborators,
        signers: Signers,
    ) -> Arc<Self> {
        let events = EventLog::new(config.max_events);
        Arc::new(Self {
            config,
            account_config,
            connection: collaborators.connection,
            protocols: collaborators.protocols,
            token_program: collaborators.token_program,
            signers,
            state: RwLock::new(AccountState::Unloaded),
            account: RwLock::new(Arc::new(Account::new())),
            payer_balance: BalanceCell::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            subscriptions: Mutex::new(Vec::new()),
            events: Mutex::new(events),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn owner(&self) -> Pubkey {
        self.signers.owner.pubkey()
    }

    pub fn payer(&self) -> Pubkey {
        self.signers.payer.pubkey()
    }

    pub fn state(&self) -> AccountState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the loaded account. Empty while unloaded.
    pub fn account(&self) -> Arc<Account> {
        Arc::clone(&self.account.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Payer lamports, as of the last load, refresh or push.
    pub fn payer_balance(&self) -> u64 {
        self.payer_balance.get()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).all()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent(count)
    }

    pub(super) fn set_state(&self, to: AccountState) {
        let from = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, to)
        };
        if from != to {
            info!(%from, %to, "account state changed");
            self.emit_event(EventPayload::StateChanged(StateChangedEvent { from, to }));
        }
    }

    pub(super) fn set_account(&self, account: Account) {
        *self.account.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(account);
    }

    pub(super) fn track(&self, handles: impl IntoIterator<Item = JoinHandle<()>>) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    pub(super) fn stop_subscriptions(&self) -> usize {
        let handles: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    // payer first, then owner, then any fresh account keys. duplicates dropped.
    fn signer_list<'a>(&'a self, extra: &[&'a Keypair]) -> Vec<&'a Keypair> {
        let mut seen = HashSet::new();
        [self.signers.payer.as_ref(), self.signers.owner.as_ref()]
            .into_iter()
            .chain(extra.iter().copied())
            .filter(|kp| seen.insert(kp.pubkey()))
            .collect()
    }

    /// Send one transaction and wait for confirmation. Failures are recorded
    /// as events and returned; callers decide whether they are fatal.
    pub(super) async fn submit(
        &self,
        context: &str,
        instructions: &[Instruction],
        extra_signers: &[&Keypair],
    ) -> Result<Signature, ChainError> {
        let signers = self.signer_list(extra_signers);
        match self.connection.send_and_confirm(instructions, &signers).await {
            Ok(signature) => {
                info!(%context, %signature, instructions = instructions.len(), "transaction confirmed");
                Ok(signature)
            }
            Err(e) => {
                self.record_failure(context, &e);
                Err(e)
            }
        }
    }

    fn record_failure(&self, context: &str, error: &ChainError) {
        if error.is_rejection() {
            let rejection = Rejection::from(error);
            warn!(
                %context,
                code = ?rejection.code,
                dex_error = ?rejection.error,
                "transaction rejected"
            );
            self.emit_event(EventPayload::TransactionRejected(TransactionRejectedEvent {
                context: context.to_string(),
                code: rejection.code,
                error: rejection.error,
                message: rejection.message,
            }));
        } else {
            warn!(%context, error = %error, "transaction failed");
            self.emit_event(EventPayload::TransactionFailed(TransactionFailedEvent {
                context: context.to_string(),
                message: error.to_string(),
            }));
        }
    }

    pub(super) fn emit_event(&self, payload: EventPayload) -> EventId {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload)
    }
}
