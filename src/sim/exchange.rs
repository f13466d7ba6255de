//! Simulated exchange and token programs.
//!
//! Account data is JSON. Instructions carry a JSON [`SimInstruction`] and are
//! executed by [`InMemoryChain`](super::InMemoryChain). Orders rest on the book
//! but never match: an immediate-or-cancel order is dropped at once with its
//! funds freed, and an order that would cross the same trader's resting order
//! is rejected as a self-trade.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use solana_sdk::account::Account;
use solana_sdk::instruction::{AccountMeta, Instruction, InstructionError};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error_code::DexErrorCode;
use crate::lots::MarketLots;
use crate::market::{MarketMeta, OpenOrdersRecord, PriceLevel};
use crate::position::{decode_token_amount, decode_token_mint, decode_token_owner, encode_token_account};
use crate::protocol::{
    CancelOrderParams, CloseOpenOrdersParams, CreatedOpenOrders, MarketProtocol, PlaceOrderParams,
    ProtocolError, SettleFundsParams, TokenProgram,
};
use crate::types::{serde_pubkey, OrderId, OrderType, Side};

pub const SIM_EXCHANGE_ID: Pubkey = Pubkey::new_from_array(*b"sim-exchange-program-id-00000000");
pub const SIM_TOKEN_PROGRAM_ID: Pubkey = Pubkey::new_from_array(*b"sim-token-program-id-00000000000");

pub const OPEN_ORDERS_RENT: u64 = 23_357_760;
pub const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;
pub const MARKET_RENT: u64 = 1_000_000;

// token program errors surfaced as custom codes
const TOKEN_ALREADY_IN_USE: u32 = 0;
const TOKEN_NON_NATIVE_HAS_BALANCE: u32 = 11;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimInstruction {
    CreateOpenOrders {
        #[serde(with = "serde_pubkey")]
        market: Pubkey,
        #[serde(with = "serde_pubkey")]
        open_orders: Pubkey,
        #[serde(with = "serde_pubkey")]
        owner: Pubkey,
        #[serde(with = "serde_pubkey")]
        payer: Pubkey,
    },
    PlaceOrder {
        #[serde(with = "serde_pubkey")]
        market: Pubkey,
        #[serde(with = "serde_pubkey")]
        open_orders: Pubkey,
        #[serde(with = "serde_pubkey")]
        owner: Pubkey,
        #[serde(with = "serde_pubkey")]
        wallet: Pubkey,
        side: Side,
        price_lots: u64,
        max_base_lots: u64,
        max_native_quote: u64,
        order_type: OrderType,
        client_id: u64,
    },
    CancelOrder {
        #[serde(with = "serde_pubkey")]
        market: Pubkey,
        #[serde(with = "serde_pubkey")]
        open_orders: Pubkey,
        #[serde(with = "serde_pubkey")]
        owner: Pubkey,
        side: Side,
        order_id: OrderId,
    },
    SettleFunds {
        #[serde(with = "serde_pubkey")]
        market: Pubkey,
        #[serde(with = "serde_pubkey")]
        open_orders: Pubkey,
        #[serde(with = "serde_pubkey")]
        owner: Pubkey,
        #[serde(with = "serde_pubkey")]
        base_wallet: Pubkey,
        #[serde(with = "serde_pubkey")]
        quote_wallet: Pubkey,
    },
    CloseOpenOrders {
        #[serde(with = "serde_pubkey")]
        open_orders: Pubkey,
        #[serde(with = "serde_pubkey")]
        owner: Pubkey,
        #[serde(with = "serde_pubkey")]
        destination: Pubkey,
    },
    CreateTokenAccount {
        #[serde(with = "serde_pubkey")]
        payer: Pubkey,
        #[serde(with = "serde_pubkey")]
        owner: Pubkey,
        #[serde(with = "serde_pubkey")]
        mint: Pubkey,
        #[serde(with = "serde_pubkey")]
        address: Pubkey,
    },
    CloseTokenAccount {
        #[serde(with = "serde_pubkey")]
        account: Pubkey,
        #[serde(with = "serde_pubkey")]
        destination: Pubkey,
        #[serde(with = "serde_pubkey")]
        owner: Pubkey,
    },
}

impl SimInstruction {
    pub fn decode(ix: &Instruction) -> Option<Self> {
        if ix.program_id != SIM_EXCHANGE_ID && ix.program_id != SIM_TOKEN_PROGRAM_ID {
            return None;
        }
        serde_json::from_slice(&ix.data).ok()
    }

    fn into_instruction(self, program_id: Pubkey, accounts: Vec<AccountMeta>) -> Instruction {
        let data = serde_json::to_vec(&self).unwrap_or_default();
        Instruction::new_with_bytes(program_id, &data, accounts)
    }
}

/// Market account contents: metadata plus the order sequence counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimMarketState {
    pub meta: MarketMeta,
    pub next_sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    pub order_id: OrderId,
    #[serde(with = "serde_pubkey")]
    pub open_orders: Pubkey,
    pub size_lots: u64,
}

/// One side of the book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimBook {
    pub side: Side,
    pub entries: Vec<BookEntry>,
}

impl SimBook {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            entries: Vec::new(),
        }
    }

    /// Levels aggregated by price, best first.
    pub fn levels(&self) -> Vec<PriceLevel> {
        let mut by_price: BTreeMap<u64, u64> = BTreeMap::new();
        for entry in &self.entries {
            *by_price.entry(entry.order_id.price_lots()).or_default() += entry.size_lots;
        }
        let levels = by_price
            .into_iter()
            .map(|(price_lots, size_lots)| PriceLevel {
                price_lots,
                size_lots,
            });
        match self.side {
            Side::Bid => levels.rev().collect(),
            Side::Ask => levels.collect(),
        }
    }

    fn crosses(&self, open_orders: &Pubkey, price_lots: u64) -> bool {
        self.entries.iter().any(|e| {
            e.open_orders == *open_orders
                && match self.side {
                    Side::Bid => e.order_id.price_lots() >= price_lots,
                    Side::Ask => e.order_id.price_lots() <= price_lots,
                }
        })
    }
}

fn decode_json<T: DeserializeOwned>(what: &'static str, data: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(data).map_err(|e| ProtocolError::Decode {
        what,
        reason: e.to_string(),
    })
}

/// Exchange client for the simulated order-book program.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimExchange;

impl SimExchange {
    pub const NAME: &'static str = "sim";

    pub fn new() -> Self {
        Self
    }

    /// Market metadata with fresh account addresses for the market, both
    /// book sides and the queues.
    pub fn new_market(&self, base_mint: Pubkey, quote_mint: Pubkey, lots: MarketLots) -> MarketMeta {
        MarketMeta {
            address: Pubkey::new_unique(),
            program_id: SIM_EXCHANGE_ID,
            base_mint,
            quote_mint,
            lots,
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            vault_signer: Pubkey::new_unique(),
            bids: Pubkey::new_unique(),
            asks: Pubkey::new_unique(),
            event_queue: Pubkey::new_unique(),
            request_queue: Pubkey::new_unique(),
        }
    }

    /// Accounts a freshly listed market consists of.
    pub fn market_accounts(&self, meta: &MarketMeta) -> Vec<(Pubkey, Account)> {
        let state = SimMarketState {
            meta: meta.clone(),
            next_sequence: 1,
        };
        vec![
            (meta.address, json_account(&state, SIM_EXCHANGE_ID, MARKET_RENT)),
            (meta.bids, json_account(&SimBook::new(Side::Bid), SIM_EXCHANGE_ID, MARKET_RENT)),
            (meta.asks, json_account(&SimBook::new(Side::Ask), SIM_EXCHANGE_ID, MARKET_RENT)),
            (meta.event_queue, json_account(&Vec::<u8>::new(), SIM_EXCHANGE_ID, MARKET_RENT)),
        ]
    }
}

pub(crate) fn json_account<T: Serialize>(value: &T, owner: Pubkey, lamports: u64) -> Account {
    Account {
        lamports,
        data: serde_json::to_vec(value).unwrap_or_default(),
        owner,
        executable: false,
        rent_epoch: 0,
    }
}

impl MarketProtocol for SimExchange {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn program_id(&self) -> Pubkey {
        SIM_EXCHANGE_ID
    }

    fn decode_market(&self, address: Pubkey, data: &[u8]) -> Result<MarketMeta, ProtocolError> {
        let state: SimMarketState = decode_json("market", data)?;
        if state.meta.address != address {
            return Err(ProtocolError::Decode {
                what: "market",
                reason: format!("account {address} holds market {}", state.meta.address),
            });
        }
        Ok(state.meta)
    }

    fn decode_order_book(&self, data: &[u8]) -> Result<Vec<PriceLevel>, ProtocolError> {
        let book: SimBook = decode_json("order book", data)?;
        Ok(book.levels())
    }

    fn decode_open_orders(
        &self,
        address: Pubkey,
        data: &[u8],
    ) -> Result<OpenOrdersRecord, ProtocolError> {
        let record: OpenOrdersRecord = decode_json("open orders", data)?;
        if record.address != address {
            return Err(ProtocolError::Decode {
                what: "open orders",
                reason: format!("account {address} holds record {}", record.address),
            });
        }
        Ok(record)
    }

    fn create_open_orders(
        &self,
        market: &MarketMeta,
        owner: Pubkey,
        payer: Pubkey,
    ) -> Result<CreatedOpenOrders, ProtocolError> {
        let keypair = Keypair::new();
        let open_orders = keypair.pubkey();
        let ix = SimInstruction::CreateOpenOrders {
            market: market.address,
            open_orders,
            owner,
            payer,
        }
        .into_instruction(
            SIM_EXCHANGE_ID,
            vec![
                AccountMeta::new(payer, true),
                AccountMeta::new(open_orders, true),
                AccountMeta::new_readonly(owner, true),
                AccountMeta::new_readonly(market.address, false),
            ],
        );
        Ok(CreatedOpenOrders {
            keypair,
            instructions: vec![ix],
        })
    }

    fn place_order(&self, params: &PlaceOrderParams<'_>) -> Instruction {
        let market = params.market;
        SimInstruction::PlaceOrder {
            market: market.address,
            open_orders: params.open_orders,
            owner: params.owner,
            wallet: params.payer_token_account,
            side: params.side,
            price_lots: params.price_lots,
            max_base_lots: params.max_base_lots,
            max_native_quote: params.max_native_quote,
            order_type: params.order_type,
            client_id: params.client_id,
        }
        .into_instruction(
            SIM_EXCHANGE_ID,
            vec![
                AccountMeta::new(market.address, false),
                AccountMeta::new(params.open_orders, false),
                AccountMeta::new(market.request_queue, false),
                AccountMeta::new(market.event_queue, false),
                AccountMeta::new(market.bids, false),
                AccountMeta::new(market.asks, false),
                AccountMeta::new(params.payer_token_account, false),
                AccountMeta::new_readonly(params.owner, true),
                AccountMeta::new(market.base_vault, false),
                AccountMeta::new(market.quote_vault, false),
            ],
        )
    }

    fn cancel_order(&self, params: &CancelOrderParams<'_>) -> Instruction {
        let market = params.market;
        SimInstruction::CancelOrder {
            market: market.address,
            open_orders: params.open_orders,
            owner: params.owner,
            side: params.side,
            order_id: params.order_id,
        }
        .into_instruction(
            SIM_EXCHANGE_ID,
            vec![
                AccountMeta::new(market.address, false),
                AccountMeta::new(market.bids, false),
                AccountMeta::new(market.asks, false),
                AccountMeta::new(params.open_orders, false),
                AccountMeta::new_readonly(params.owner, true),
                AccountMeta::new(market.event_queue, false),
            ],
        )
    }

    fn settle_funds(&self, params: &SettleFundsParams<'_>) -> Instruction {
        let market = params.market;
        SimInstruction::SettleFunds {
            market: market.address,
            open_orders: params.open_orders,
            owner: params.owner,
            base_wallet: params.base_wallet,
            quote_wallet: params.quote_wallet,
        }
        .into_instruction(
            SIM_EXCHANGE_ID,
            vec![
                AccountMeta::new(market.address, false),
                AccountMeta::new(params.open_orders, false),
                AccountMeta::new_readonly(params.owner, true),
                AccountMeta::new(market.base_vault, false),
                AccountMeta::new(market.quote_vault, false),
                AccountMeta::new(params.base_wallet, false),
                AccountMeta::new(params.quote_wallet, false),
                AccountMeta::new_readonly(market.vault_signer, false),
            ],
        )
    }

    fn close_open_orders(&self, params: &CloseOpenOrdersParams<'_>) -> Instruction {
        SimInstruction::CloseOpenOrders {
            open_orders: params.open_orders,
            owner: params.owner,
            destination: params.destination,
        }
        .into_instruction(
            SIM_EXCHANGE_ID,
            vec![
                AccountMeta::new(params.open_orders, false),
                AccountMeta::new_readonly(params.owner, true),
                AccountMeta::new(params.destination, false),
                AccountMeta::new_readonly(params.market.address, false),
            ],
        )
    }
}

/// Associated-token-account client for the simulated token program.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTokenProgram;

impl TokenProgram for SimTokenProgram {
    fn associated_address(&self, owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[owner.as_ref(), SIM_TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
            &SIM_TOKEN_PROGRAM_ID,
        )
        .0
    }

    fn create_associated_account(&self, payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
        let address = self.associated_address(owner, mint);
        SimInstruction::CreateTokenAccount {
            payer: *payer,
            owner: *owner,
            mint: *mint,
            address,
        }
        .into_instruction(
            SIM_TOKEN_PROGRAM_ID,
            vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new(address, false),
                AccountMeta::new_readonly(*owner, false),
                AccountMeta::new_readonly(*mint, false),
            ],
        )
    }

    fn close_account(&self, account: &Pubkey, destination: &Pubkey, owner: &Pubkey) -> Instruction {
        SimInstruction::CloseTokenAccount {
            account: *account,
            destination: *destination,
            owner: *owner,
        }
        .into_instruction(
            SIM_TOKEN_PROGRAM_ID,
            vec![
                AccountMeta::new(*account, false),
                AccountMeta::new(*destination, false),
                AccountMeta::new_readonly(*owner, true),
            ],
        )
    }
}

/// Why a simulated instruction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    Dex(DexErrorCode),
    Token(u32),
    MissingSignature,
    InvalidAccount,
    InsufficientLamports,
}

impl From<SimFault> for InstructionError {
    fn from(fault: SimFault) -> Self {
        match fault {
            SimFault::Dex(code) => InstructionError::Custom(code.code().map(u32::from).unwrap_or(u32::MAX)),
            SimFault::Token(code) => InstructionError::Custom(code),
            SimFault::MissingSignature => InstructionError::MissingRequiredSignature,
            SimFault::InvalidAccount => InstructionError::InvalidAccountData,
            SimFault::InsufficientLamports => InstructionError::InsufficientFunds,
        }
    }
}

type Store = HashMap<Pubkey, Account>;

fn require_signer(signers: &HashSet<Pubkey>, key: &Pubkey) -> Result<(), SimFault> {
    if signers.contains(key) {
        Ok(())
    } else {
        Err(SimFault::MissingSignature)
    }
}

fn load<T: DeserializeOwned>(store: &Store, key: &Pubkey) -> Result<T, SimFault> {
    let account = store.get(key).ok_or(SimFault::InvalidAccount)?;
    serde_json::from_slice(&account.data).map_err(|_| SimFault::InvalidAccount)
}

fn save<T: Serialize>(store: &mut Store, key: &Pubkey, value: &T) -> Result<(), SimFault> {
    let account = store.get_mut(key).ok_or(SimFault::InvalidAccount)?;
    account.data = serde_json::to_vec(value).map_err(|_| SimFault::InvalidAccount)?;
    Ok(())
}

fn debit(store: &mut Store, key: &Pubkey, lamports: u64) -> Result<(), SimFault> {
    let account = store.get_mut(key).ok_or(SimFault::InsufficientLamports)?;
    account.lamports = account
        .lamports
        .checked_sub(lamports)
        .ok_or(SimFault::InsufficientLamports)?;
    Ok(())
}

pub(crate) fn credit(store: &mut Store, key: &Pubkey, lamports: u64) {
    store
        .entry(*key)
        .or_insert_with(|| Account::new(0, 0, &solana_sdk::system_program::id()))
        .lamports += lamports;
}

// (mint, owner, amount) of a token account
fn token(store: &Store, key: &Pubkey) -> Result<(Pubkey, Pubkey, u64), SimFault> {
    let account = store.get(key).ok_or(SimFault::InvalidAccount)?;
    if account.owner != SIM_TOKEN_PROGRAM_ID {
        return Err(SimFault::InvalidAccount);
    }
    let mint = decode_token_mint(&account.data).ok_or(SimFault::InvalidAccount)?;
    let owner = decode_token_owner(&account.data).ok_or(SimFault::InvalidAccount)?;
    let amount = decode_token_amount(&account.data).map_err(|_| SimFault::InvalidAccount)?;
    Ok((mint, owner, amount))
}

pub(crate) fn set_token_amount(store: &mut Store, key: &Pubkey, amount: u64) -> Result<(), SimFault> {
    let (mint, owner, _) = token(store, key)?;
    let account = store.get_mut(key).ok_or(SimFault::InvalidAccount)?;
    account.data = encode_token_account(&mint, &owner, amount);
    Ok(())
}

fn owned_record(store: &Store, key: &Pubkey, owner: &Pubkey) -> Result<OpenOrdersRecord, SimFault> {
    let record: OpenOrdersRecord = load(store, key)?;
    if record.owner != *owner {
        return Err(SimFault::Dex(DexErrorCode::InvalidOpenOrdersAuthority));
    }
    Ok(record)
}

/// Execute one instruction against the account store.
pub(crate) fn execute(
    store: &mut Store,
    signers: &HashSet<Pubkey>,
    ix: &SimInstruction,
) -> Result<(), SimFault> {
    match ix {
        SimInstruction::CreateOpenOrders {
            market,
            open_orders,
            owner,
            payer,
        } => {
            require_signer(signers, payer)?;
            require_signer(signers, open_orders)?;
            require_signer(signers, owner)?;
            let _: SimMarketState = load(store, market)?;
            if store.contains_key(open_orders) {
                return Err(SimFault::Dex(DexErrorCode::AlreadyInitialized));
            }
            debit(store, payer, OPEN_ORDERS_RENT)?;
            let record = OpenOrdersRecord::empty(*open_orders, *market, *owner);
            store.insert(*open_orders, json_account(&record, SIM_EXCHANGE_ID, OPEN_ORDERS_RENT));
            Ok(())
        }

        SimInstruction::PlaceOrder {
            market,
            open_orders,
            owner,
            wallet,
            side,
            price_lots,
            max_base_lots,
            max_native_quote,
            order_type,
            client_id,
        } => {
            require_signer(signers, owner)?;
            let mut state: SimMarketState = load(store, market)?;
            let mut record = owned_record(store, open_orders, owner)?;
            if record.market != *market {
                return Err(SimFault::Dex(DexErrorCode::WrongOrdersAccount));
            }
            let lots = state.meta.lots;
            let (expected_mint, locked) = match side {
                Side::Bid => (
                    state.meta.quote_mint,
                    lots.native_quote(*price_lots, *max_base_lots).min(*max_native_quote as u128),
                ),
                Side::Ask => (state.meta.base_mint, lots.base_native(*max_base_lots)),
            };
            let locked = u64::try_from(locked).map_err(|_| SimFault::Dex(DexErrorCode::InsufficientFunds))?;
            let (mint, _, balance) = token(store, wallet)?;
            if mint != expected_mint {
                return Err(SimFault::Dex(DexErrorCode::WrongMint));
            }
            if balance < locked {
                return Err(SimFault::Dex(DexErrorCode::InsufficientFunds));
            }

            let book_key = match side {
                Side::Bid => state.meta.bids,
                Side::Ask => state.meta.asks,
            };
            let opposite_key = match side {
                Side::Bid => state.meta.asks,
                Side::Ask => state.meta.bids,
            };
            let opposite: SimBook = load(store, &opposite_key)?;
            if opposite.crosses(open_orders, *price_lots) {
                return Err(SimFault::Dex(DexErrorCode::WouldSelfTrade));
            }

            set_token_amount(store, wallet, balance - locked)?;
            match side {
                Side::Bid => record.quote_total += locked,
                Side::Ask => record.base_total += locked,
            }

            if *order_type == OrderType::ImmediateOrCancel {
                // nothing to match against in the simulator
                match side {
                    Side::Bid => record.quote_free += locked,
                    Side::Ask => record.base_free += locked,
                }
            } else {
                let order_id = OrderId::new(*price_lots, state.next_sequence);
                state.next_sequence += 1;
                record
                    .insert_order(*side, order_id, *client_id)
                    .ok_or(SimFault::Dex(DexErrorCode::TooManyOpenOrders))?;
                let mut book: SimBook = load(store, &book_key)?;
                book.entries.push(BookEntry {
                    order_id,
                    open_orders: *open_orders,
                    size_lots: *max_base_lots,
                });
                save(store, &book_key, &book)?;
                save(store, market, &state)?;
            }
            save(store, open_orders, &record)
        }

        SimInstruction::CancelOrder {
            market,
            open_orders,
            owner,
            side,
            order_id,
        } => {
            require_signer(signers, owner)?;
            let state: SimMarketState = load(store, market)?;
            let mut record = owned_record(store, open_orders, owner)?;
            if record.remove_order(*order_id).is_none() {
                return Err(SimFault::Dex(DexErrorCode::OrderNotFound));
            }
            let book_key = match side {
                Side::Bid => state.meta.bids,
                Side::Ask => state.meta.asks,
            };
            let mut book: SimBook = load(store, &book_key)?;
            let index = book
                .entries
                .iter()
                .position(|e| e.order_id == *order_id && e.open_orders == *open_orders)
                .ok_or(SimFault::Dex(DexErrorCode::OrderNotFound))?;
            let entry = book.entries.remove(index);
            let lots = state.meta.lots;
            match side {
                Side::Bid => {
                    record.quote_free +=
                        lots.native_quote(order_id.price_lots(), entry.size_lots) as u64
                }
                Side::Ask => record.base_free += lots.base_native(entry.size_lots) as u64,
            }
            save(store, &book_key, &book)?;
            save(store, open_orders, &record)
        }

        SimInstruction::SettleFunds {
            market,
            open_orders,
            owner,
            base_wallet,
            quote_wallet,
        } => {
            require_signer(signers, owner)?;
            let state: SimMarketState = load(store, market)?;
            let mut record = owned_record(store, open_orders, owner)?;
            let (base_mint, _, base_balance) = token(store, base_wallet)?;
            let (quote_mint, _, quote_balance) = token(store, quote_wallet)?;
            if base_mint != state.meta.base_mint || quote_mint != state.meta.quote_mint {
                return Err(SimFault::Dex(DexErrorCode::WrongMint));
            }
            set_token_amount(store, base_wallet, base_balance + record.base_free)?;
            set_token_amount(store, quote_wallet, quote_balance + record.quote_free)?;
            record.base_total -= record.base_free;
            record.quote_total -= record.quote_free;
            record.base_free = 0;
            record.quote_free = 0;
            save(store, open_orders, &record)
        }

        SimInstruction::CloseOpenOrders {
            open_orders,
            owner,
            destination,
        } => {
            require_signer(signers, owner)?;
            let record = owned_record(store, open_orders, owner)?;
            if !record.resting_orders().is_empty() || record.base_total > 0 || record.quote_total > 0 {
                return Err(SimFault::Dex(DexErrorCode::TooManyOpenOrders));
            }
            let lamports = store.remove(open_orders).map(|a| a.lamports).unwrap_or(0);
            credit(store, destination, lamports);
            Ok(())
        }

        SimInstruction::CreateTokenAccount {
            payer,
            owner,
            mint,
            address,
        } => {
            require_signer(signers, payer)?;
            if store.contains_key(address) {
                return Err(SimFault::Token(TOKEN_ALREADY_IN_USE));
            }
            debit(store, payer, TOKEN_ACCOUNT_RENT)?;
            store.insert(
                *address,
                Account {
                    lamports: TOKEN_ACCOUNT_RENT,
                    data: encode_token_account(mint, owner, 0),
                    owner: SIM_TOKEN_PROGRAM_ID,
                    executable: false,
                    rent_epoch: 0,
                },
            );
            Ok(())
        }

        SimInstruction::CloseTokenAccount {
            account,
            destination,
            owner,
        } => {
            require_signer(signers, owner)?;
            let (_, token_owner, amount) = token(store, account)?;
            if token_owner != *owner {
                return Err(SimFault::MissingSignature);
            }
            if amount > 0 {
                return Err(SimFault::Token(TOKEN_NON_NATIVE_HAS_BALANCE));
            }
            let lamports = store.remove(account).map(|a| a.lamports).unwrap_or(0);
            credit(store, destination, lamports);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_levels_best_first() {
        let oo = Pubkey::new_unique();
        let entry = |price, seq, size| BookEntry {
            order_id: OrderId::new(price, seq),
            open_orders: oo,
            size_lots: size,
        };
        let mut bids = SimBook::new(Side::Bid);
        bids.entries = vec![entry(100, 1, 5), entry(105, 2, 1), entry(100, 3, 2)];
        assert_eq!(
            bids.levels(),
            vec![
                PriceLevel { price_lots: 105, size_lots: 1 },
                PriceLevel { price_lots: 100, size_lots: 7 },
            ]
        );

        let mut asks = SimBook::new(Side::Ask);
        asks.entries = vec![entry(110, 4, 1), entry(108, 5, 3)];
        assert_eq!(asks.levels()[0].price_lots, 108);
    }

    #[test]
    fn instruction_data_decodes() {
        let meta = SimExchange.new_market(Pubkey::new_unique(), Pubkey::new_unique(), MarketLots::new(1, 1, 0, 0).unwrap());
        let created = SimExchange
            .create_open_orders(&meta, Pubkey::new_unique(), Pubkey::new_unique())
            .unwrap();
        match SimInstruction::decode(&created.instructions[0]) {
            Some(SimInstruction::CreateOpenOrders { open_orders, .. }) => {
                assert_eq!(open_orders, created.keypair.pubkey())
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn closing_funded_token_account_fails() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let address = Pubkey::new_unique();
        let mut store = Store::new();
        store.insert(
            address,
            Account {
                lamports: TOKEN_ACCOUNT_RENT,
                data: encode_token_account(&mint, &owner, 5),
                owner: SIM_TOKEN_PROGRAM_ID,
                executable: false,
                rent_epoch: 0,
            },
        );
        let signers = HashSet::from([owner]);
        let close = SimInstruction::CloseTokenAccount {
            account: address,
            destination: owner,
            owner,
        };
        assert_eq!(
            execute(&mut store, &signers, &close),
            Err(SimFault::Token(TOKEN_NON_NATIVE_HAS_BALANCE))
        );
        set_token_amount(&mut store, &address, 0).unwrap();
        assert_eq!(execute(&mut store, &signers, &close), Ok(()));
        assert_eq!(store[&owner].lamports, TOKEN_ACCOUNT_RENT);
    }
}
