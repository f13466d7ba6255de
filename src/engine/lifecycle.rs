// 8.3 engine/lifecycle.rs: account lifecycle.
// 8.3.1 Unloaded -load-> Loaded -listen-> Listening -close-> Unloaded.
// 8.3.2 teardown runs cancel, settle, close open orders, close empty token
// accounts. each step waits for the previous confirmation; a failed step
// stops teardown and leaves the state where it was.

use super::core::Engine;
use super::results::EngineError;
use crate::account::{Account, AccountState};
use crate::config::{MarketConfig, TokenConfig};
use crate::events::{
    AirdropEvent, EventPayload, LifecycleStep, LifecycleStepEvent, OpenOrdersCreatedEvent,
    TokenAccountCreatedEvent,
};
use crate::lots::number_to_native;
use crate::market::{
    load_markets, load_open_orders_for_owner, MarketMeta, MarketView, OpenOrdersRecord,
};
use crate::position::{decode_token_amount, decode_token_mint, Position, PositionError};
use crate::protocol::MarketProtocol;
use rust_decimal::Decimal;
use solana_sdk::account::Account as ChainAccount;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

impl Engine {
    /// Build positions and market views from config and fetch their state.
    pub async fn load(&self) -> Result<(), EngineError> {
        self.state().require_unloaded("load")?;
        let owner = self.owner();

        let token_accounts = self.connection.get_token_accounts_by_owner(&owner).await?;
        let mut account = Account::new();
        for token in &self.account_config.tokens {
            account.add_position(Arc::new(self.build_position(token, &token_accounts)));
        }
        self.build_markets(&mut account).await?;

        let markets = account.market_list();
        let statuses = load_markets(&markets, self.connection.as_ref()).await?;
        let open_orders =
            load_open_orders_for_owner(&markets, self.connection.as_ref(), owner).await?;
        let lamports = self
            .connection
            .get_account_info(&self.payer())
            .await?
            .map(|a| a.lamports)
            .unwrap_or(0);
        self.payer_balance.replace(lamports);

        info!(
            positions = account.positions.len(),
            markets = markets.len(),
            unlisted = account.unlisted.len(),
            missing = statuses.iter().filter(|s| !s.market).count(),
            open_orders,
            "account loaded"
        );
        self.set_account(account);
        self.set_state(AccountState::Loaded);
        Ok(())
    }

    // prefer the canonical associated account when the owner holds several
    fn build_position(&self, token: &TokenConfig, accounts: &[(Pubkey, ChainAccount)]) -> Position {
        let associated = self.token_program.associated_address(&self.owner(), &token.mint);
        let mut matching: Vec<&(Pubkey, ChainAccount)> = accounts
            .iter()
            .filter(|(_, a)| decode_token_mint(&a.data) == Some(token.mint))
            .collect();
        matching.sort_by_key(|(address, _)| *address != associated);

        let position = Position::new(&token.symbol, token.mint, token.decimals, token.precision);
        let position = match matching.first() {
            Some((address, data)) => {
                let balance = decode_token_amount(&data.data).unwrap_or_else(|e| {
                    warn!(symbol = %token.symbol, %address, error = %e, "undecodable token account");
                    0
                });
                position.with_token_account(*address, balance)
            }
            None => {
                debug!(symbol = %token.symbol, "no token account yet");
                position
            }
        };
        position.set_limits(token.min_amount, token.max_amount);
        position
    }

    // every market account in one round trip. a market not created yet is
    // left out of the view set and recorded as unlisted
    async fn build_markets(&self, account: &mut Account) -> Result<(), EngineError> {
        let configs = &self.account_config.markets;
        if configs.is_empty() {
            return Ok(());
        }
        let addresses: Vec<Pubkey> = configs.iter().map(|c| c.address).collect();
        let fetched = self.connection.get_multiple_accounts(&addresses).await?;
        for (i, config) in configs.iter().enumerate() {
            let protocol = self.protocols.get(&config.protocol)?;
            let Some(data) = fetched.get(i).and_then(|a| a.as_ref()) else {
                warn!(market = %config.symbol, address = %config.address, "market account not created yet");
                account.unlisted.insert(config.symbol.clone());
                continue;
            };
            let meta = protocol.decode_market(config.address, &data.data)?;
            let market = self.build_market(config, meta, protocol, account)?;
            account.add_market(Arc::new(market));
        }
        Ok(())
    }

    fn build_market(
        &self,
        config: &MarketConfig,
        meta: MarketMeta,
        protocol: Arc<dyn MarketProtocol>,
        account: &Account,
    ) -> Result<MarketView, EngineError> {
        let base = Arc::clone(account.position(&config.base)?);
        let quote = Arc::clone(account.position(&config.quote)?);
        for (position, found) in [(&base, meta.base_mint), (&quote, meta.quote_mint)] {
            if position.mint != found {
                return Err(EngineError::MintMismatch {
                    market: config.symbol.clone(),
                    symbol: position.symbol.clone(),
                    expected: position.mint,
                    found,
                });
            }
        }
        Ok(MarketView::new(config.symbol.clone(), meta, base, quote, protocol))
    }

    /// Subscribe to the payer, every token account, every book and every
    /// open-orders account. Pushes only replace cached state.
    pub async fn listen(&self) -> Result<(), EngineError> {
        self.state().require_idle("listen")?;
        let account = self.account();
        let mut handles = Vec::new();
        if let Err(e) = self.attach_all(&account, &mut handles).await {
            for handle in &handles {
                handle.abort();
            }
            return Err(e);
        }
        info!(subscriptions = handles.len(), "listening");
        self.track(handles);
        self.set_state(AccountState::Listening);
        Ok(())
    }

    async fn attach_all(
        &self,
        account: &Account,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<(), EngineError> {
        let connection = self.connection.as_ref();
        let stream = connection.on_account_change(&self.payer()).await?;
        handles.push(
            self.payer_balance
                .listen("payer".to_string(), stream, |a| Ok(a.lamports)),
        );
        for position in account.positions_with_accounts() {
            handles.push(position.attach(connection).await?);
        }
        for market in account.markets.values() {
            handles.extend(market.attach_books(connection).await?);
            handles.extend(market.attach_open_orders(connection).await?);
        }
        Ok(())
    }

    /// Create an open-orders account for every market that lacks one, in one
    /// transaction. Returns the new addresses.
    pub async fn create_open_orders(&self) -> Result<Vec<Pubkey>, EngineError> {
        self.state().require_idle("create open orders")?;
        let account = self.account();
        let mut created: Vec<(&Arc<MarketView>, Keypair)> = Vec::new();
        let mut instructions = Vec::new();
        for market in account.markets.values() {
            if market.open_orders_address().is_some() {
                continue;
            }
            let fresh = market
                .protocol()
                .create_open_orders(market.meta(), self.owner(), self.payer())?;
            instructions.extend(fresh.instructions);
            created.push((market, fresh.keypair));
        }
        if created.is_empty() {
            return Ok(Vec::new());
        }

        let keypairs: Vec<&Keypair> = created.iter().map(|(_, kp)| kp).collect();
        self.submit("create open orders", &instructions, &keypairs)
            .await?;
        Ok(created
            .iter()
            .map(|(market, keypair)| self.record_open_orders(market, keypair))
            .collect())
    }

    /// Create one market's open-orders account on demand. Subscribes to it
    /// right away when the account is listening.
    pub(super) async fn create_open_orders_for(
        &self,
        market: &Arc<MarketView>,
    ) -> Result<Pubkey, EngineError> {
        let fresh = market
            .protocol()
            .create_open_orders(market.meta(), self.owner(), self.payer())?;
        self.submit("create open orders", &fresh.instructions, &[&fresh.keypair])
            .await?;
        let address = self.record_open_orders(market, &fresh.keypair);
        if self.state().is_listening() {
            if let Some(handle) = market.attach_open_orders(self.connection.as_ref()).await? {
                self.track([handle]);
            }
        }
        Ok(address)
    }

    fn record_open_orders(&self, market: &MarketView, keypair: &Keypair) -> Pubkey {
        use solana_sdk::signer::Signer;

        let address = keypair.pubkey();
        market.set_open_orders(OpenOrdersRecord::empty(address, market.address(), self.owner()));
        info!(market = %market.symbol, %address, "open orders created");
        self.emit_event(EventPayload::OpenOrdersCreated(OpenOrdersCreatedEvent {
            symbol: market.symbol.clone(),
            address: address.to_string(),
        }));
        address
    }

    /// Create the associated token account of every position without one, in
    /// one transaction. Returns `(symbol, address)` for each.
    pub async fn create_token_accounts(&self) -> Result<Vec<(String, Pubkey)>, EngineError> {
        self.state().require_idle("create token accounts")?;
        let account = self.account();
        let mut planned = Vec::new();
        let mut instructions = Vec::new();
        for position in account.positions.values() {
            if let Some((address, ix)) = position.plan_account_creation(
                self.token_program.as_ref(),
                &self.owner(),
                &self.payer(),
            ) {
                instructions.push(ix);
                planned.push((position, address));
            }
        }
        if planned.is_empty() {
            return Ok(Vec::new());
        }

        self.submit("create token accounts", &instructions, &[])
            .await?;
        Ok(planned
            .into_iter()
            .map(|(position, address)| {
                position.set_token_account(address);
                info!(symbol = %position.symbol, %address, "token account created");
                self.emit_event(EventPayload::TokenAccountCreated(TokenAccountCreatedEvent {
                    symbol: position.symbol.clone(),
                    address: address.to_string(),
                }));
                (position.symbol.clone(), address)
            })
            .collect())
    }

    /// Full teardown. Requires a loaded account; ends unloaded. Fails while
    /// any market has a submission in flight, and holds every market for the
    /// duration so no order can land after the cancel step.
    pub async fn close_margin_account(&self) -> Result<(), EngineError> {
        self.state().require_loaded("close margin account")?;
        let _claimed = self.claim_all_markets()?;

        let canceled = self.cancel_all().await?;
        self.step_completed(LifecycleStep::CancelOrders, canceled);

        let settled = self.settle_funds().await?;
        self.step_completed(LifecycleStep::SettleFunds, settled);

        let closed = self.close_open_orders().await?;
        self.step_completed(LifecycleStep::CloseOpenOrders, closed);

        self.refresh_balances().await?;
        let closed = self.close_empty_token_accounts().await?;
        self.step_completed(LifecycleStep::CloseTokenAccounts, closed);

        let stopped = self.stop_subscriptions();
        debug!(stopped, "subscriptions stopped");
        self.set_account(Account::new());
        self.set_state(AccountState::Unloaded);
        Ok(())
    }

    fn step_completed(&self, step: LifecycleStep, instructions: usize) {
        info!(?step, instructions, "teardown step completed");
        self.emit_event(EventPayload::LifecycleStepCompleted(LifecycleStepEvent {
            step,
            instructions,
        }));
    }

    async fn close_empty_token_accounts(&self) -> Result<usize, EngineError> {
        let account = self.account();
        let empty: Vec<(&Arc<Position>, Pubkey)> = account
            .positions_with_accounts()
            .filter(|p| p.balance() == 0)
            .filter_map(|p| p.token_account().map(|a| (p, a)))
            .collect();
        if empty.is_empty() {
            return Ok(0);
        }
        let instructions: Vec<_> = empty
            .iter()
            .map(|(_, address)| {
                self.token_program
                    .close_account(address, &self.payer(), &self.owner())
            })
            .collect();
        self.submit("close token accounts", &instructions, &[])
            .await?;
        for (position, address) in &empty {
            debug!(symbol = %position.symbol, %address, "token account closed");
            position.clear_token_account();
        }
        Ok(instructions.len())
    }

    /// Request test tokens. The native symbol credits the payer; any other
    /// symbol credits that position's token account.
    pub async fn airdrop(&self, symbol: &str, amount: Decimal) -> Result<Signature, EngineError> {
        self.state().require_loaded("airdrop")?;
        let (address, native_amount) = if symbol == self.config.native_symbol {
            (self.payer(), number_to_native(amount, self.config.native_decimals)?)
        } else {
            let account = self.account();
            let position = account.position(symbol)?;
            let address = position
                .token_account()
                .ok_or_else(|| PositionError::NoTokenAccount(symbol.to_string()))?;
            (address, number_to_native(amount, position.decimals)?)
        };
        let signature = self
            .connection
            .request_airdrop(&address, native_amount)
            .await?;
        info!(%symbol, %address, native_amount, "airdrop requested");
        self.emit_event(EventPayload::Airdrop(AirdropEvent {
            symbol: symbol.to_string(),
            native_amount,
        }));
        Ok(signature)
    }

    /// Record trading limits for a token. Nothing enforces them.
    pub fn set_limits(&self, symbol: &str, min_amount: Decimal, max_amount: Decimal) -> Result<(), EngineError> {
        self.state().require_loaded("set limits")?;
        self.account().position(symbol)?.set_limits(min_amount, max_amount);
        Ok(())
    }

    /// Re-fetch the payer and every token account in one round trip.
    pub async fn refresh_balances(&self) -> Result<usize, EngineError> {
        let account = self.account();
        let positions: Vec<(&Arc<Position>, Pubkey)> = account
            .positions_with_accounts()
            .filter_map(|p| p.token_account().map(|a| (p, a)))
            .collect();
        let mut addresses: Vec<Pubkey> = positions.iter().map(|(_, a)| *a).collect();
        addresses.push(self.payer());

        let fetched = self.connection.get_multiple_accounts(&addresses).await?;
        for (i, (position, address)) in positions.iter().enumerate() {
            match fetched.get(i).and_then(|a| a.as_ref()) {
                Some(data) => {
                    position.apply_account(data)?;
                }
                None => {
                    warn!(symbol = %position.symbol, %address, "token account disappeared");
                    position.clear_token_account();
                }
            }
        }
        let lamports = fetched
            .get(positions.len())
            .and_then(|a| a.as_ref())
            .map(|a| a.lamports)
            .unwrap_or(0);
        self.payer_balance.replace(lamports);
        Ok(positions.len())
    }
}
