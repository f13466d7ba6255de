//! Exchange protocol capabilities.
//!
//! Wire layouts and instruction encodings belong to the protocol client, not to
//! this crate. A market picks its [`MarketProtocol`] once, when its view is
//! built, and every place/cancel/settle/close goes through that handle. Token
//! account plumbing (associated addresses, create, close) sits behind
//! [`TokenProgram`].

use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use std::collections::HashMap;
use std::sync::Arc;

use crate::lots::LotError;
use crate::market::{MarketMeta, OpenOrdersRecord, PriceLevel};
use crate::types::{OrderId, OrderType, Side};

#[derive(Debug, Clone)]
pub struct PlaceOrderParams<'a> {
    pub market: &'a MarketMeta,
    pub open_orders: Pubkey,
    pub owner: Pubkey,
    /// Base wallet for asks, quote wallet for bids.
    pub payer_token_account: Pubkey,
    pub side: Side,
    pub price_lots: u64,
    pub max_base_lots: u64,
    pub max_native_quote: u64,
    pub order_type: OrderType,
    pub client_id: u64,
}

#[derive(Debug, Clone)]
pub struct CancelOrderParams<'a> {
    pub market: &'a MarketMeta,
    pub open_orders: Pubkey,
    pub owner: Pubkey,
    pub side: Side,
    pub order_id: OrderId,
}

#[derive(Debug, Clone)]
pub struct SettleFundsParams<'a> {
    pub market: &'a MarketMeta,
    pub open_orders: Pubkey,
    pub owner: Pubkey,
    pub base_wallet: Pubkey,
    pub quote_wallet: Pubkey,
}

#[derive(Debug, Clone)]
pub struct CloseOpenOrdersParams<'a> {
    pub market: &'a MarketMeta,
    pub open_orders: Pubkey,
    pub owner: Pubkey,
    pub destination: Pubkey,
}

/// Instructions creating a fresh open-orders account. `keypair` must co-sign.
#[derive(Debug)]
pub struct CreatedOpenOrders {
    pub keypair: Keypair,
    pub instructions: Vec<Instruction>,
}

pub trait MarketProtocol: Send + Sync {
    fn name(&self) -> &str;

    fn program_id(&self) -> Pubkey;

    fn decode_market(&self, address: Pubkey, data: &[u8]) -> Result<MarketMeta, ProtocolError>;

    /// Aggregated price levels, best first.
    fn decode_order_book(&self, data: &[u8]) -> Result<Vec<PriceLevel>, ProtocolError>;

    fn decode_open_orders(
        &self,
        address: Pubkey,
        data: &[u8],
    ) -> Result<OpenOrdersRecord, ProtocolError>;

    fn create_open_orders(
        &self,
        market: &MarketMeta,
        owner: Pubkey,
        payer: Pubkey,
    ) -> Result<CreatedOpenOrders, ProtocolError>;

    fn place_order(&self, params: &PlaceOrderParams<'_>) -> Instruction;

    fn cancel_order(&self, params: &CancelOrderParams<'_>) -> Instruction;

    fn settle_funds(&self, params: &SettleFundsParams<'_>) -> Instruction;

    fn close_open_orders(&self, params: &CloseOpenOrdersParams<'_>) -> Instruction;
}

pub trait TokenProgram: Send + Sync {
    fn associated_address(&self, owner: &Pubkey, mint: &Pubkey) -> Pubkey;

    fn create_associated_account(&self, payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction;

    fn close_account(&self, account: &Pubkey, destination: &Pubkey, owner: &Pubkey) -> Instruction;
}

/// Protocol variants by name, resolved when market views are built.
#[derive(Default, Clone)]
pub struct ProtocolRegistry {
    protocols: HashMap<String, Arc<dyn MarketProtocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, protocol: Arc<dyn MarketProtocol>) {
        self.protocols.insert(protocol.name().to_string(), protocol);
    }

    pub fn with(mut self, protocol: Arc<dyn MarketProtocol>) -> Self {
        self.register(protocol);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn MarketProtocol>, ProtocolError> {
        self.protocols
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownProtocol(name.to_string()))
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.protocols.keys()).finish()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("Lot error: {0}")]
    Lot(#[from] LotError),
}
