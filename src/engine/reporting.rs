// 8.5 engine/reporting.rs: balance and open-order listings.

use super::core::Engine;
use super::results::{BalanceLine, EngineError, OpenOrderLine};
use crate::lots::native_to_number;
use crate::market::refresh_open_orders;
use tracing::info;

impl Engine {
    /// One line per position, plus the payer's native balance.
    pub fn print_balance(&self) -> Result<Vec<BalanceLine>, EngineError> {
        self.state().require_loaded("print balance")?;
        let account = self.account();
        let mut lines = Vec::with_capacity(account.positions.len() + 1);
        for position in account.positions.values() {
            let amount = position.balance_number()?.round_dp(position.precision);
            info!(
                symbol = %position.symbol,
                amount = %amount,
                account = ?position.token_account(),
                "balance"
            );
            lines.push(BalanceLine {
                symbol: position.symbol.clone(),
                token_account: position.token_account(),
                native: position.balance(),
                amount,
                limits: position.limits(),
            });
        }

        let lamports = self.payer_balance();
        let amount = native_to_number(lamports, self.config.native_decimals)?;
        info!(symbol = %self.config.native_symbol, %amount, "payer balance");
        lines.push(BalanceLine {
            symbol: format!("{} (payer)", self.config.native_symbol),
            token_account: None,
            native: lamports,
            amount,
            limits: Default::default(),
        });
        Ok(lines)
    }

    /// Every resting order, after a refresh so the listing is current.
    pub async fn print_open_orders(&self) -> Result<Vec<OpenOrderLine>, EngineError> {
        self.state().require_loaded("print open orders")?;
        let account = self.account();
        let markets = account.market_list();
        refresh_open_orders(&markets, self.connection.as_ref()).await?;

        let mut lines = Vec::new();
        for market in &markets {
            let Some(record) = market.open_orders() else {
                continue;
            };
            for order in record.resting_orders() {
                let price = market.lots().price_lots_to_number(order.price_lots())?;
                info!(
                    market = %market.symbol,
                    side = %order.side,
                    %price,
                    order_id = %order.order_id,
                    "open order"
                );
                lines.push(OpenOrderLine {
                    market: market.symbol.clone(),
                    side: order.side,
                    price_lots: order.price_lots(),
                    price,
                    order_id: order.order_id,
                    client_id: order.client_id,
                });
            }
        }
        Ok(lines)
    }
}
