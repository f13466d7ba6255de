//! Desired orders and the per-order decision.
//!
//! A strategy hands the engine [`DesiredOrder`]s in human units. Each one ends
//! in exactly one [`OrderDecision`]: skipped for a reason, or planned for
//! placement with its quantity converted to lots and clipped to the wallet
//! balance. Skips are expected steady-state outcomes, not errors.
//!
//! ```text
//! Proposed -> Skipped(reason)
//!          -> Clipped -> Skipped(PriceLevelResting | NothingAfterClip)
//!                     -> Planned -> Submitted -> Confirmed | Rejected(code)
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::lots::{LotError, MarketLots};
use crate::types::{OrderType, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredOrder {
    pub symbol: String,
    pub side: Side,
    /// Quote per base, human units.
    pub price: Decimal,
    /// Base amount, human units.
    pub size: Decimal,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub client_id: u64,
}

impl DesiredOrder {
    pub fn limit(symbol: impl Into<String>, side: Side, price: Decimal, size: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            size,
            order_type: OrderType::Limit,
            client_id: 0,
        }
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    pub fn with_client_id(mut self, client_id: u64) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn validate(&self) -> Result<(), SkipReason> {
        if self.price <= Decimal::ZERO {
            return Err(SkipReason::NonPositivePrice);
        }
        if self.size <= Decimal::ZERO {
            return Err(SkipReason::NonPositiveSize);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    NonPositivePrice,
    NonPositiveSize,
    UnknownMarket,
    /// Another submission for this market has not finished yet.
    MarketBusy,
    NoOpenOrders,
    NoTokenAccount,
    Conversion(String),
    PriceLevelResting { price_lots: u64 },
    NothingAfterClip,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NonPositivePrice => write!(f, "non-positive price"),
            SkipReason::NonPositiveSize => write!(f, "non-positive size"),
            SkipReason::UnknownMarket => write!(f, "unknown market"),
            SkipReason::MarketBusy => write!(f, "submission already in flight"),
            SkipReason::NoOpenOrders => write!(f, "no open orders account"),
            SkipReason::NoTokenAccount => write!(f, "no token account for payer side"),
            SkipReason::Conversion(e) => write!(f, "conversion failed: {e}"),
            SkipReason::PriceLevelResting { price_lots } => {
                write!(f, "already resting at {price_lots} lots")
            }
            SkipReason::NothingAfterClip => write!(f, "nothing left after clipping to balance"),
        }
    }
}

impl From<LotError> for SkipReason {
    fn from(e: LotError) -> Self {
        SkipReason::Conversion(e.to_string())
    }
}

/// Quantity after clipping to the paying side's wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clipped {
    pub base_lots: u64,
    /// Quote locked by the order; never above the quote balance for bids.
    pub native_quote: u64,
    pub clipped: bool,
}

// bids pay quote: price_lots * base_lots * quote_lot_size must fit the quote balance.
// asks pay base: base_lots * base_lot_size must fit the base balance.
// clipping floors to whole lots so the result never exceeds the balance.
pub fn clip_to_balance(
    lots: &MarketLots,
    side: Side,
    price_lots: u64,
    base_lots: u64,
    balance: u64,
) -> Clipped {
    match side {
        Side::Bid => {
            let cost = lots.native_quote(price_lots, base_lots);
            if cost <= balance as u128 {
                return Clipped {
                    base_lots,
                    native_quote: cost as u64,
                    clipped: false,
                };
            }
            let per_lot = price_lots as u128 * lots.quote_lot_size() as u128;
            let fitted = if per_lot == 0 { 0 } else { balance as u128 / per_lot };
            let fitted = fitted.min(base_lots as u128) as u64;
            Clipped {
                base_lots: fitted,
                native_quote: lots.native_quote(price_lots, fitted) as u64,
                clipped: true,
            }
        }
        Side::Ask => {
            let needed = lots.base_native(base_lots);
            let (base_lots, clipped) = if needed <= balance as u128 {
                (base_lots, false)
            } else {
                (balance / lots.base_lot_size(), true)
            };
            let quote = lots.native_quote(price_lots, base_lots).min(u64::MAX as u128) as u64;
            Clipped {
                base_lots,
                native_quote: quote,
                clipped,
            }
        }
    }
}

/// An order that survived every check, in exchange units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOrder {
    pub symbol: String,
    pub side: Side,
    pub price_lots: u64,
    pub requested_base_lots: u64,
    pub base_lots: u64,
    pub native_quote: u64,
    pub order_type: OrderType,
    pub client_id: u64,
}

impl PlannedOrder {
    pub fn was_clipped(&self) -> bool {
        self.base_lots < self.requested_base_lots
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderDecision {
    Place(PlannedOrder),
    Skip(SkipReason),
}

/// Convert, clip and dedup one validated order against a market snapshot.
/// `balance` is the paying side's native balance; `is_resting` answers whether
/// this trader already has an order at a price level.
pub fn plan_order(
    order: &DesiredOrder,
    lots: &MarketLots,
    balance: u64,
    is_resting: impl Fn(u64) -> bool,
) -> OrderDecision {
    if let Err(reason) = order.validate() {
        return OrderDecision::Skip(reason);
    }

    let (price_lots, requested) = match (
        lots.price_number_to_lots(order.price),
        lots.base_size_number_to_lots(order.size),
    ) {
        (Ok(p), Ok(s)) => (p, s),
        (Err(e), _) | (_, Err(e)) => return OrderDecision::Skip(e.into()),
    };

    let clipped = clip_to_balance(lots, order.side, price_lots, requested, balance);

    if is_resting(price_lots) {
        return OrderDecision::Skip(SkipReason::PriceLevelResting { price_lots });
    }

    if price_lots == 0 || clipped.base_lots == 0 {
        return OrderDecision::Skip(SkipReason::NothingAfterClip);
    }

    OrderDecision::Place(PlannedOrder {
        symbol: order.symbol.clone(),
        side: order.side,
        price_lots,
        requested_base_lots: requested,
        base_lots: clipped.base_lots,
        native_quote: clipped.native_quote,
        order_type: order.order_type,
        client_id: order.client_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn unit_lots() -> MarketLots {
        MarketLots::new(1, 1, 0, 0).unwrap()
    }

    fn sol_usdc() -> MarketLots {
        MarketLots::new(100_000_000, 100, 9, 6).unwrap()
    }

    #[test]
    fn rejects_non_positive_inputs() {
        let lots = unit_lots();
        let never = |_: u64| false;
        let zero_price = DesiredOrder::limit("X", Side::Bid, dec!(0), dec!(1));
        let neg_size = DesiredOrder::limit("X", Side::Bid, dec!(1), dec!(-1));
        assert_eq!(
            plan_order(&zero_price, &lots, 100, never),
            OrderDecision::Skip(SkipReason::NonPositivePrice)
        );
        assert_eq!(
            plan_order(&neg_size, &lots, 100, never),
            OrderDecision::Skip(SkipReason::NonPositiveSize)
        );
    }

    #[test]
    fn sell_clipped_to_base_balance() {
        // balance 250 native, asking to sell 300 lots of size 1
        let lots = unit_lots();
        let clipped = clip_to_balance(&lots, Side::Ask, 10, 300, 250);
        assert_eq!(clipped.base_lots, 250);
        assert!(clipped.clipped);

        let order = DesiredOrder::limit("X", Side::Ask, dec!(10), dec!(300));
        match plan_order(&order, &lots, 250, |_| false) {
            OrderDecision::Place(p) => {
                assert_eq!(p.base_lots, 250);
                assert_eq!(p.requested_base_lots, 300);
                assert!(p.was_clipped());
            }
            other => panic!("expected placement, got {other:?}"),
        }
    }

    #[test]
    fn sell_clip_floors_to_whole_lots() {
        let lots = MarketLots::new(100, 10, 6, 6).unwrap();
        let clipped = clip_to_balance(&lots, Side::Ask, 5000, 10, 250);
        assert_eq!(clipped.base_lots, 2);
        assert!(lots.base_native(clipped.base_lots) <= 250);
    }

    #[test]
    fn buy_clipped_to_quote_balance() {
        let lots = MarketLots::new(100, 10, 6, 6).unwrap();
        // 3 lots at 5000 cost 150_000 native quote
        let unclipped = clip_to_balance(&lots, Side::Bid, 5000, 3, 1_000_000);
        assert_eq!(unclipped.native_quote, 150_000);
        assert!(!unclipped.clipped);

        let clipped = clip_to_balance(&lots, Side::Bid, 5000, 3, 120_000);
        assert_eq!(clipped.base_lots, 2);
        assert_eq!(clipped.native_quote, 100_000);
        assert!(clipped.clipped);
    }

    #[test]
    fn empty_balance_skips() {
        let order = DesiredOrder::limit("SOL/USDC", Side::Bid, dec!(20), dec!(1));
        assert_eq!(
            plan_order(&order, &sol_usdc(), 0, |_| false),
            OrderDecision::Skip(SkipReason::NothingAfterClip)
        );
    }

    #[test]
    fn resting_price_level_is_skipped() {
        let order = DesiredOrder::limit("SOL/USDC", Side::Bid, dec!(20), dec!(1));
        let decision = plan_order(&order, &sol_usdc(), 100_000_000, |p| p == 20_000);
        assert_eq!(
            decision,
            OrderDecision::Skip(SkipReason::PriceLevelResting { price_lots: 20_000 })
        );
    }

    #[test]
    fn planned_order_carries_type_and_client_id() {
        let order = DesiredOrder::limit("SOL/USDC", Side::Bid, dec!(20), dec!(1.5))
            .with_order_type(OrderType::PostOnly)
            .with_client_id(42);
        match plan_order(&order, &sol_usdc(), 100_000_000, |_| false) {
            OrderDecision::Place(p) => {
                assert_eq!(p.price_lots, 20_000);
                assert_eq!(p.base_lots, 15);
                assert_eq!(p.native_quote, 30_000_000);
                assert_eq!(p.order_type, OrderType::PostOnly);
                assert_eq!(p.client_id, 42);
                assert!(!p.was_clipped());
            }
            other => panic!("expected placement, got {other:?}"),
        }
    }

    #[test]
    fn huge_bid_clips_without_overflow() {
        let lots = MarketLots::new(1, 1_000, 0, 0).unwrap();
        let huge: u64 = 10_000_000_000_000_000_000;
        let clipped = clip_to_balance(&lots, Side::Bid, huge, huge, 1_000);
        assert_eq!(clipped.base_lots, 0);
        assert_eq!(clipped.native_quote, 0);
        assert!(clipped.clipped);

        let ask = clip_to_balance(&lots, Side::Ask, huge, 5, 5);
        assert_eq!(ask.base_lots, 5);
        assert_eq!(ask.native_quote, u64::MAX);
    }

    #[test]
    fn huge_price_skips_after_clip() {
        let lots = MarketLots::new(1, 1_000, 0, 0).unwrap();
        let order = DesiredOrder::limit("X", Side::Bid, dec!(10000000000000000000000), dec!(1));
        assert_eq!(
            plan_order(&order, &lots, 1_000, |_| false),
            OrderDecision::Skip(SkipReason::NothingAfterClip)
        );
    }

    #[test]
    fn size_below_one_lot_skips() {
        let order = DesiredOrder::limit("SOL/USDC", Side::Ask, dec!(20), dec!(0.01));
        assert_eq!(
            plan_order(&order, &sol_usdc(), 10_000_000_000, |_| false),
            OrderDecision::Skip(SkipReason::NothingAfterClip)
        );
    }
}
