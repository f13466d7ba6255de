// 8.2 engine/orders.rs: desired orders to one batched place-order transaction.
// 8.2.1 each order is skipped or planned; planned orders are sent together.
// 8.2.2 at most one submission per market is in flight. a second call that
// names a busy market skips that market's orders instead of queueing them.

use super::core::Engine;
use super::results::{EngineError, Rejection, SendReport};
use crate::account::Account;
use crate::events::{EventPayload, OrderClippedEvent, OrderSkippedEvent, OrdersSubmittedEvent};
use crate::market::MarketView;
use crate::order::{plan_order, DesiredOrder, OrderDecision, PlannedOrder, SkipReason};
use crate::protocol::PlaceOrderParams;
use crate::types::Side;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running `send_orders` submission.
#[derive(Debug)]
pub struct SubmissionHandle {
    handle: JoinHandle<SendReport>,
}

impl SubmissionHandle {
    /// Wait for confirmation or rejection. An aborted task yields an empty report.
    pub async fn wait(self) -> SendReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "order submission task did not finish");
                SendReport::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

// holds the market symbols a submission or teardown claimed; releases them
// when dropped, including when the task is aborted
pub(super) struct FlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    symbols: HashSet<String>,
}

impl FlightGuard {
    fn claim<'a>(
        in_flight: &Arc<Mutex<HashSet<String>>>,
        wanted: impl Iterator<Item = &'a str>,
    ) -> Self {
        let mut busy = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let mut symbols = HashSet::new();
        for symbol in wanted {
            if !symbols.contains(symbol) && busy.insert(symbol.to_string()) {
                symbols.insert(symbol.to_string());
            }
        }
        Self {
            in_flight: Arc::clone(in_flight),
            symbols,
        }
    }

    // all or nothing: fails with the first symbol another caller holds
    fn claim_exclusive(
        in_flight: &Arc<Mutex<HashSet<String>>>,
        wanted: impl Iterator<Item = String>,
    ) -> Result<Self, String> {
        let mut busy = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let symbols: HashSet<String> = wanted.collect();
        if let Some(held) = symbols.iter().find(|s| busy.contains(s.as_str())) {
            return Err(held.clone());
        }
        busy.extend(symbols.iter().cloned());
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            symbols,
        })
    }

    fn holds(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut busy = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for symbol in &self.symbols {
            busy.remove(symbol);
        }
    }
}

// planned orders so far, for dedup and balance accounting inside one batch
#[derive(Default)]
struct Batch {
    orders: Vec<PlannedOrder>,
    instructions: Vec<Instruction>,
    committed: HashMap<Pubkey, u64>,
}

impl Batch {
    fn has_price(&self, symbol: &str, price_lots: u64) -> bool {
        self.orders
            .iter()
            .any(|o| o.symbol == symbol && o.price_lots == price_lots)
    }

    fn committed(&self, wallet: &Pubkey) -> u64 {
        self.committed.get(wallet).copied().unwrap_or(0)
    }
}

impl Engine {
    /// Start submitting `orders` and return immediately. Only a call made
    /// while unloaded is an error; everything after that lands in the report.
    pub fn send_orders(
        self: &Arc<Self>,
        orders: Vec<DesiredOrder>,
    ) -> Result<SubmissionHandle, EngineError> {
        self.state().require_loaded("send orders")?;
        let guard = FlightGuard::claim(&self.in_flight, orders.iter().map(|o| o.symbol.as_str()));
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.place_orders(orders, guard).await });
        Ok(SubmissionHandle { handle })
    }

    /// Claim every loaded market for teardown. New submissions for them skip
    /// as busy until the guard drops; one already in flight is an error.
    pub(super) fn claim_all_markets(&self) -> Result<FlightGuard, EngineError> {
        let symbols = self.account().markets.keys().cloned().collect::<Vec<_>>();
        FlightGuard::claim_exclusive(&self.in_flight, symbols.into_iter())
            .map_err(EngineError::SubmissionInFlight)
    }

    /// True while a submission for `symbol` has not finished.
    pub fn is_in_flight(&self, symbol: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(symbol)
    }

    async fn place_orders(&self, orders: Vec<DesiredOrder>, guard: FlightGuard) -> SendReport {
        let account = self.account();
        let mut report = SendReport::default();
        let mut batch = Batch::default();

        for order in orders {
            if let Err(reason) = self.plan(&account, &order, &guard, &mut batch).await {
                self.skip(&mut report, order, reason);
            }
        }

        if batch.orders.is_empty() {
            debug!(skipped = report.skipped.len(), "nothing to submit");
            return report;
        }

        match self.submit("place orders", &batch.instructions, &[]).await {
            Ok(signature) => {
                info!(orders = batch.orders.len(), %signature, "orders submitted");
                self.emit_event(EventPayload::OrdersSubmitted(OrdersSubmittedEvent {
                    orders: batch.orders.clone(),
                    signature: signature.to_string(),
                }));
                report.signature = Some(signature);
            }
            Err(e) => report.rejection = Some(Rejection::from(&e)),
        }
        report.submitted = batch.orders;
        drop(guard);
        report
    }

    async fn plan(
        &self,
        account: &Account,
        order: &DesiredOrder,
        guard: &FlightGuard,
        batch: &mut Batch,
    ) -> Result<(), SkipReason> {
        order.validate()?;
        let market = account
            .market(&order.symbol)
            .ok_or(SkipReason::UnknownMarket)?;
        if !guard.holds(&order.symbol) {
            return Err(SkipReason::MarketBusy);
        }

        let open_orders = match market.open_orders_address() {
            Some(address) => address,
            None => self.create_open_orders_for(market).await.map_err(|e| {
                warn!(market = %market.symbol, error = %e, "cannot create open orders");
                SkipReason::NoOpenOrders
            })?,
        };

        let paying = match order.side {
            Side::Bid => &market.quote,
            Side::Ask => &market.base,
        };
        let wallet = paying.token_account().ok_or(SkipReason::NoTokenAccount)?;
        let balance = paying.balance().saturating_sub(batch.committed(&wallet));

        let planned = match plan_order(order, market.lots(), balance, |price_lots| {
            market.has_resting_price(price_lots) || batch.has_price(&order.symbol, price_lots)
        }) {
            OrderDecision::Place(planned) => planned,
            OrderDecision::Skip(reason) => return Err(reason),
        };

        if planned.was_clipped() {
            info!(
                market = %market.symbol,
                side = %order.side,
                requested = planned.requested_base_lots,
                base_lots = planned.base_lots,
                balance,
                "order clipped to balance"
            );
            self.emit_event(EventPayload::OrderClipped(OrderClippedEvent {
                symbol: market.symbol.clone(),
                side: order.side,
                requested_base_lots: planned.requested_base_lots,
                base_lots: planned.base_lots,
                balance,
            }));
        }

        batch
            .instructions
            .push(self.place_instruction(market, open_orders, wallet, &planned));
        let spent = match order.side {
            Side::Bid => planned.native_quote,
            Side::Ask => market.lots().base_native(planned.base_lots) as u64,
        };
        *batch.committed.entry(wallet).or_default() += spent;
        batch.orders.push(planned);
        Ok(())
    }

    fn place_instruction(
        &self,
        market: &MarketView,
        open_orders: Pubkey,
        wallet: Pubkey,
        planned: &PlannedOrder,
    ) -> Instruction {
        market.protocol().place_order(&PlaceOrderParams {
            market: market.meta(),
            open_orders,
            owner: self.owner(),
            payer_token_account: wallet,
            side: planned.side,
            price_lots: planned.price_lots,
            max_base_lots: planned.base_lots,
            max_native_quote: planned.native_quote,
            order_type: planned.order_type,
            client_id: planned.client_id,
        })
    }

    fn skip(&self, report: &mut SendReport, order: DesiredOrder, reason: SkipReason) {
        info!(market = %order.symbol, side = %order.side, %reason, "order skipped");
        self.emit_event(EventPayload::OrderSkipped(OrderSkippedEvent {
            symbol: order.symbol.clone(),
            side: order.side,
            reason: reason.clone(),
        }));
        report.skipped.push((order, reason));
    }
}
