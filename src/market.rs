//! Per-market view.
//!
//! A [`MarketView`] holds the decoded state of one market: static metadata, the
//! most recent order-book snapshot for each side, and this trader's open-orders
//! record. It shares (does not own) the two positions it trades. Cached state
//! lives in `watch` channels and is replaced wholesale by loads, refreshes and
//! push notifications; the last writer wins.
//!
//! The open-orders snapshot is only as fresh as the last load, refresh or push.
//! Callers that must not act on a missed notification call
//! [`refresh_open_orders`] first.

use serde::{Deserialize, Serialize};
use solana_sdk::account::Account;
use solana_sdk::pubkey::Pubkey;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chain::{ChainConnection, ChainError};
use crate::lots::{LotError, MarketLots};
use crate::position::Position;
use crate::protocol::{MarketProtocol, ProtocolError};
use crate::types::{serde_pubkey, OrderId, Side};

pub const OPEN_ORDERS_SLOTS: usize = 128;

/// Static market metadata as decoded by the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketMeta {
    #[serde(with = "serde_pubkey")]
    pub address: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub program_id: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub base_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub quote_mint: Pubkey,
    pub lots: MarketLots,
    #[serde(with = "serde_pubkey")]
    pub base_vault: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub quote_vault: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub vault_signer: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub bids: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub asks: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub event_queue: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub request_queue: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price_lots: u64,
    pub size_lots: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestingOrder {
    pub slot: usize,
    pub order_id: OrderId,
    pub side: Side,
    pub client_id: u64,
}

impl RestingOrder {
    pub fn price_lots(&self) -> u64 {
        self.order_id.price_lots()
    }
}

/// Decoded open-orders account: free/total balances and 128 order slots.
/// A slot holding `OrderId::EMPTY` is free; bit `i` of `is_bid_bits` gives
/// the side of slot `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrdersRecord {
    #[serde(with = "serde_pubkey")]
    pub address: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub owner: Pubkey,
    pub base_free: u64,
    pub base_total: u64,
    pub quote_free: u64,
    pub quote_total: u64,
    pub free_slot_bits: u128,
    pub is_bid_bits: u128,
    pub orders: Vec<OrderId>,
    pub client_ids: Vec<u64>,
}

impl OpenOrdersRecord {
    pub fn empty(address: Pubkey, market: Pubkey, owner: Pubkey) -> Self {
        Self {
            address,
            market,
            owner,
            base_free: 0,
            base_total: 0,
            quote_free: 0,
            quote_total: 0,
            free_slot_bits: u128::MAX,
            is_bid_bits: 0,
            orders: vec![OrderId::EMPTY; OPEN_ORDERS_SLOTS],
            client_ids: vec![0; OPEN_ORDERS_SLOTS],
        }
    }

    pub fn slot_side(&self, slot: usize) -> Side {
        if slot < OPEN_ORDERS_SLOTS && self.is_bid_bits & (1u128 << slot) != 0 {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    pub fn resting_orders(&self) -> Vec<RestingOrder> {
        self.orders
            .iter()
            .enumerate()
            .filter(|(_, id)| !id.is_empty())
            .map(|(slot, id)| RestingOrder {
                slot,
                order_id: *id,
                side: self.slot_side(slot),
                client_id: self.client_ids.get(slot).copied().unwrap_or(0),
            })
            .collect()
    }

    /// True if some non-empty slot rests at `price_lots`.
    pub fn has_price_level(&self, price_lots: u64) -> bool {
        self.orders
            .iter()
            .any(|id| !id.is_empty() && id.price_lots() == price_lots)
    }

    pub fn has_unsettled(&self) -> bool {
        self.base_free > 0 || self.quote_free > 0
    }

    /// Put an order into the first free slot. `None` when all slots are taken.
    pub fn insert_order(&mut self, side: Side, order_id: OrderId, client_id: u64) -> Option<usize> {
        let slot = self.orders.iter().position(|id| id.is_empty())?;
        let bit = 1u128 << slot;
        self.orders[slot] = order_id;
        self.client_ids[slot] = client_id;
        self.free_slot_bits &= !bit;
        match side {
            Side::Bid => self.is_bid_bits |= bit,
            Side::Ask => self.is_bid_bits &= !bit,
        }
        Some(slot)
    }

    pub fn remove_order(&mut self, order_id: OrderId) -> Option<Side> {
        let slot = self.orders.iter().position(|id| *id == order_id && !id.is_empty())?;
        let side = self.slot_side(slot);
        let bit = 1u128 << slot;
        self.orders[slot] = OrderId::EMPTY;
        self.client_ids[slot] = 0;
        self.free_slot_bits |= bit;
        self.is_bid_bits &= !bit;
        Some(side)
    }
}

/// What a batched load found for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketLoadStatus {
    pub market: bool,
    pub bids: bool,
    pub asks: bool,
    pub event_queue: bool,
}

pub struct MarketView {
    pub symbol: String,
    meta: MarketMeta,
    pub base: Arc<Position>,
    pub quote: Arc<Position>,
    protocol: Arc<dyn MarketProtocol>,
    open_orders: Arc<watch::Sender<Option<OpenOrdersRecord>>>,
    bids: Arc<watch::Sender<Option<Vec<PriceLevel>>>>,
    asks: Arc<watch::Sender<Option<Vec<PriceLevel>>>>,
}

impl std::fmt::Debug for MarketView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketView")
            .field("symbol", &self.symbol)
            .field("address", &self.meta.address)
            .field("protocol", &self.protocol.name())
            .field("open_orders", &self.open_orders_address())
            .finish()
    }
}

impl MarketView {
    pub fn new(
        symbol: impl Into<String>,
        meta: MarketMeta,
        base: Arc<Position>,
        quote: Arc<Position>,
        protocol: Arc<dyn MarketProtocol>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            meta,
            base,
            quote,
            protocol,
            open_orders: Arc::new(watch::channel(None).0),
            bids: Arc::new(watch::channel(None).0),
            asks: Arc::new(watch::channel(None).0),
        }
    }

    pub fn meta(&self) -> &MarketMeta {
        &self.meta
    }

    pub fn lots(&self) -> &MarketLots {
        &self.meta.lots
    }

    pub fn address(&self) -> Pubkey {
        self.meta.address
    }

    pub fn protocol(&self) -> &Arc<dyn MarketProtocol> {
        &self.protocol
    }

    pub fn open_orders(&self) -> Option<OpenOrdersRecord> {
        self.open_orders.borrow().clone()
    }

    pub fn open_orders_address(&self) -> Option<Pubkey> {
        self.open_orders.borrow().as_ref().map(|oo| oo.address)
    }

    /// Latest-snapshot check used for price-level dedup.
    pub fn has_resting_price(&self, price_lots: u64) -> bool {
        self.open_orders
            .borrow()
            .as_ref()
            .map(|oo| oo.has_price_level(price_lots))
            .unwrap_or(false)
    }

    pub fn watch_open_orders(&self) -> watch::Receiver<Option<OpenOrdersRecord>> {
        self.open_orders.subscribe()
    }

    pub(crate) fn set_open_orders(&self, record: OpenOrdersRecord) {
        self.open_orders.send_replace(Some(record));
    }

    pub(crate) fn clear_open_orders(&self) {
        self.open_orders.send_replace(None);
    }

    pub fn bids(&self) -> Option<Vec<PriceLevel>> {
        self.bids.borrow().clone()
    }

    pub fn asks(&self) -> Option<Vec<PriceLevel>> {
        self.asks.borrow().clone()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.borrow().as_ref().and_then(|levels| levels.first().copied())
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.borrow().as_ref().and_then(|levels| levels.first().copied())
    }

    // market, bids, asks, event queue. decoded positionally.
    fn load_addresses(&self) -> [Pubkey; 4] {
        [
            self.meta.address,
            self.meta.bids,
            self.meta.asks,
            self.meta.event_queue,
        ]
    }

    fn apply_load(&self, accounts: &[Option<Account>]) -> MarketLoadStatus {
        let mut status = MarketLoadStatus::default();
        let get = |i: usize| accounts.get(i).and_then(|a| a.as_ref());

        status.market = get(0).is_some();
        if let Some(account) = get(1) {
            status.bids = self.apply_book(&self.bids, Side::Bid, &account.data);
        }
        if let Some(account) = get(2) {
            status.asks = self.apply_book(&self.asks, Side::Ask, &account.data);
        }
        status.event_queue = get(3).is_some();
        status
    }

    fn apply_book(
        &self,
        cell: &watch::Sender<Option<Vec<PriceLevel>>>,
        side: Side,
        data: &[u8],
    ) -> bool {
        match self.protocol.decode_order_book(data) {
            Ok(levels) => {
                cell.send_replace(Some(levels));
                true
            }
            Err(e) => {
                warn!(market = %self.symbol, %side, error = %e, "undecodable order book");
                false
            }
        }
    }

    fn apply_open_orders(&self, address: Pubkey, account: Option<&Account>) {
        match account {
            Some(account) => match self.protocol.decode_open_orders(address, &account.data) {
                Ok(record) => {
                    self.open_orders.send_replace(Some(record));
                }
                Err(e) => warn!(market = %self.symbol, %address, error = %e, "undecodable open orders"),
            },
            None => {
                warn!(market = %self.symbol, %address, "open orders account disappeared");
                self.open_orders.send_replace(None);
            }
        }
    }

    /// Fetch market, bids, asks and event queue in one call.
    pub async fn load(&self, connection: &dyn ChainConnection) -> Result<MarketLoadStatus, MarketError> {
        let accounts = connection.get_multiple_accounts(&self.load_addresses()).await?;
        Ok(self.apply_load(&accounts))
    }

    /// Subscribe to the open-orders account. `None` until one is known.
    pub async fn attach_open_orders(
        self: &Arc<Self>,
        connection: &dyn ChainConnection,
    ) -> Result<Option<JoinHandle<()>>, MarketError> {
        let Some(address) = self.open_orders_address() else {
            return Ok(None);
        };
        let mut stream = connection.on_account_change(&address).await?;
        let view = Arc::clone(self);
        Ok(Some(tokio::spawn(async move {
            while let Some(account) = stream.recv().await {
                // a push for an account we have since replaced or closed is stale
                if view.open_orders_address() != Some(address) {
                    break;
                }
                view.apply_open_orders(address, Some(&account));
            }
            debug!(market = %view.symbol, %address, "open orders subscription ended");
        })))
    }

    /// Subscribe to both book sides.
    pub async fn attach_books(
        self: &Arc<Self>,
        connection: &dyn ChainConnection,
    ) -> Result<Vec<JoinHandle<()>>, MarketError> {
        let mut handles = Vec::with_capacity(2);
        for side in [Side::Bid, Side::Ask] {
            let address = match side {
                Side::Bid => self.meta.bids,
                Side::Ask => self.meta.asks,
            };
            let mut stream = connection.on_account_change(&address).await?;
            let view = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                while let Some(account) = stream.recv().await {
                    let cell = match side {
                        Side::Bid => &view.bids,
                        Side::Ask => &view.asks,
                    };
                    view.apply_book(cell, side, &account.data);
                }
            }));
        }
        Ok(handles)
    }
}

/// Load every market in one `get_multiple_accounts` round trip. A missing
/// account (market not created yet) is reported in the status, not an error.
pub async fn load_markets(
    markets: &[Arc<MarketView>],
    connection: &dyn ChainConnection,
) -> Result<Vec<MarketLoadStatus>, MarketError> {
    let addresses: Vec<Pubkey> = markets.iter().flat_map(|m| m.load_addresses()).collect();
    if addresses.is_empty() {
        return Ok(Vec::new());
    }
    let accounts = connection.get_multiple_accounts(&addresses).await?;
    Ok(markets
        .iter()
        .enumerate()
        .map(|(i, market)| {
            let start = (i * 4).min(accounts.len());
            let end = (start + 4).min(accounts.len());
            let status = market.apply_load(&accounts[start..end]);
            if !status.market {
                warn!(market = %market.symbol, address = %market.address(), "market account missing");
            }
            status
        })
        .collect())
}

/// Re-fetch every known open-orders account in one round trip and apply the
/// results in request order. Returns how many markets were refreshed.
pub async fn refresh_open_orders(
    markets: &[Arc<MarketView>],
    connection: &dyn ChainConnection,
) -> Result<usize, MarketError> {
    let targets: Vec<(&Arc<MarketView>, Pubkey)> = markets
        .iter()
        .filter_map(|m| m.open_orders_address().map(|a| (m, a)))
        .collect();
    if targets.is_empty() {
        return Ok(0);
    }
    let addresses: Vec<Pubkey> = targets.iter().map(|(_, a)| *a).collect();
    let accounts = connection.get_multiple_accounts(&addresses).await?;
    for (i, (market, address)) in targets.iter().enumerate() {
        market.apply_open_orders(*address, accounts.get(i).and_then(|a| a.as_ref()));
    }
    Ok(targets.len())
}

/// Find this owner's open-orders accounts for every market, one program scan
/// per distinct exchange program. The first match per market wins.
pub async fn load_open_orders_for_owner(
    markets: &[Arc<MarketView>],
    connection: &dyn ChainConnection,
    owner: Pubkey,
) -> Result<usize, MarketError> {
    let mut by_program: BTreeMap<Pubkey, Vec<&Arc<MarketView>>> = BTreeMap::new();
    for market in markets {
        by_program.entry(market.meta.program_id).or_default().push(market);
    }

    let mut found = 0;
    for (program_id, group) in by_program {
        let accounts = connection.get_program_accounts(&program_id).await?;
        for market in group {
            let record = accounts.iter().find_map(|(address, account)| {
                market
                    .protocol
                    .decode_open_orders(*address, &account.data)
                    .ok()
                    .filter(|oo| oo.market == market.address() && oo.owner == owner)
            });
            if let Some(record) = record {
                debug!(market = %market.symbol, address = %record.address, "open orders found");
                market.set_open_orders(record);
                found += 1;
            }
        }
    }
    Ok(found)
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Lot error: {0}")]
    Lot(#[from] LotError),
}
