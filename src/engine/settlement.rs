// 8.4 engine/settlement.rs: cancel, settle and close open-orders accounts.
// each builds one instruction per order or market and sends them together.

use super::core::Engine;
use super::results::{CancelReport, EngineError, Rejection};
use crate::events::{EventPayload, OrderCancelRequestedEvent};
use crate::market::refresh_open_orders;
use crate::position::PositionError;
use crate::protocol::{CancelOrderParams, CloseOpenOrdersParams, SettleFundsParams};
use tracing::{info, warn};

impl Engine {
    /// Cancel every resting order on every market. Chain failures are logged
    /// and recorded in the report; only a call while unloaded is an error.
    pub async fn cancel_orders(&self) -> Result<CancelReport, EngineError> {
        self.state().require_loaded("cancel orders")?;
        let mut report = CancelReport::default();
        match self.cancel_all_with_signature().await {
            Ok((canceled, signature)) => {
                report.canceled = canceled;
                report.signature = signature;
            }
            Err(EngineError::Chain(e)) => report.rejection = Some(Rejection::from(&e)),
            Err(e) => {
                warn!(error = %e, "cancel orders failed");
                report.rejection = Some(Rejection {
                    code: None,
                    error: None,
                    message: e.to_string(),
                });
            }
        }
        Ok(report)
    }

    pub(super) async fn cancel_all(&self) -> Result<usize, EngineError> {
        Ok(self.cancel_all_with_signature().await?.0)
    }

    // refreshes first: a missed push must not leave an order behind
    async fn cancel_all_with_signature(
        &self,
    ) -> Result<(usize, Option<solana_sdk::signature::Signature>), EngineError> {
        let account = self.account();
        let markets = account.market_list();
        refresh_open_orders(&markets, self.connection.as_ref()).await?;

        let owner = self.owner();
        let mut instructions = Vec::new();
        for market in &markets {
            let Some(record) = market.open_orders() else {
                continue;
            };
            for order in record.resting_orders() {
                instructions.push(market.protocol().cancel_order(&CancelOrderParams {
                    market: market.meta(),
                    open_orders: record.address,
                    owner,
                    side: order.side,
                    order_id: order.order_id,
                }));
                self.emit_event(EventPayload::OrderCancelRequested(OrderCancelRequestedEvent {
                    symbol: market.symbol.clone(),
                    side: order.side,
                    order_id: order.order_id,
                }));
            }
        }
        if instructions.is_empty() {
            return Ok((0, None));
        }

        let signature = self.submit("cancel orders", &instructions, &[]).await?;
        info!(canceled = instructions.len(), %signature, "orders canceled");
        Ok((instructions.len(), Some(signature)))
    }

    /// Move free funds from every open-orders account back to the wallets.
    pub async fn settle_funds(&self) -> Result<usize, EngineError> {
        self.state().require_loaded("settle funds")?;
        let account = self.account();
        let owner = self.owner();
        let mut instructions = Vec::new();
        for market in account.markets.values() {
            let Some(open_orders) = market.open_orders_address() else {
                continue;
            };
            let base_wallet = market
                .base
                .token_account()
                .ok_or_else(|| PositionError::NoTokenAccount(market.base.symbol.clone()))?;
            let quote_wallet = market
                .quote
                .token_account()
                .ok_or_else(|| PositionError::NoTokenAccount(market.quote.symbol.clone()))?;
            instructions.push(market.protocol().settle_funds(&SettleFundsParams {
                market: market.meta(),
                open_orders,
                owner,
                base_wallet,
                quote_wallet,
            }));
        }
        if instructions.is_empty() {
            return Ok(0);
        }
        self.submit("settle funds", &instructions, &[]).await?;
        info!(markets = instructions.len(), "funds settled");
        Ok(instructions.len())
    }

    /// Close every open-orders account, returning rent to the payer.
    pub async fn close_open_orders(&self) -> Result<usize, EngineError> {
        self.state().require_loaded("close open orders")?;
        let account = self.account();
        let owner = self.owner();
        let destination = self.payer();
        let mut closing = Vec::new();
        let mut instructions = Vec::new();
        for market in account.markets.values() {
            let Some(open_orders) = market.open_orders_address() else {
                continue;
            };
            instructions.push(market.protocol().close_open_orders(&CloseOpenOrdersParams {
                market: market.meta(),
                open_orders,
                owner,
                destination,
            }));
            closing.push(market);
        }
        if instructions.is_empty() {
            return Ok(0);
        }
        self.submit("close open orders", &instructions, &[]).await?;
        for market in closing {
            market.clear_open_orders();
        }
        info!(markets = instructions.len(), "open orders closed");
        Ok(instructions.len())
    }
}
