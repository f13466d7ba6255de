//! Lot arithmetic.
//!
//! The exchange quotes every price and size as an integer count of lots. Human
//! quantities are `lots * lot_size` scaled by the token's decimals. Conversions
//! towards human numbers are exact: the integer part comes from integer
//! division and the remainder is kept as a reduced ratio before it is rendered
//! as a `Decimal`, so large lot counts never pass through a lossy division.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

pub fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// `quotient + numerator / denominator`, remainder in lowest terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotRatio {
    pub quotient: u128,
    pub numerator: u128,
    pub denominator: u128,
}

impl LotRatio {
    pub fn is_integral(&self) -> bool {
        self.numerator == 0
    }

    pub fn to_decimal(&self) -> Result<Decimal, LotError> {
        let whole = Decimal::from_u128(self.quotient).ok_or(LotError::Overflow)?;
        if self.numerator == 0 {
            return Ok(whole);
        }
        let num = Decimal::from_u128(self.numerator).ok_or(LotError::Overflow)?;
        let den = Decimal::from_u128(self.denominator).ok_or(LotError::Overflow)?;
        let frac = num.checked_div(den).ok_or(LotError::Overflow)?;
        whole.checked_add(frac).ok_or(LotError::Overflow)
    }
}

// divide first, reduce the remainder by its gcd with the divisor afterwards
pub fn divide_exact(numerator: u128, divisor: u128) -> Result<LotRatio, LotError> {
    if divisor == 0 {
        return Err(LotError::ZeroLotSize);
    }
    let quotient = numerator / divisor;
    let remainder = numerator % divisor;
    let g = gcd(remainder, divisor);
    Ok(LotRatio {
        quotient,
        numerator: remainder / g,
        denominator: divisor / g,
    })
}

pub fn decimal_multiplier(decimals: u8) -> Result<u128, LotError> {
    10u128.checked_pow(decimals as u32).ok_or(LotError::Overflow)
}

/// Human units to native units, rounded to the nearest unit.
pub fn number_to_native(amount: Decimal, decimals: u8) -> Result<u64, LotError> {
    native_amount(amount, decimal_multiplier(decimals)?)
}

/// Native units to human units, exact.
pub fn native_to_number(amount: u64, decimals: u8) -> Result<Decimal, LotError> {
    divide_exact(amount as u128, decimal_multiplier(decimals)?)?.to_decimal()
}

/// Generic lots-to-human conversion.
///
/// Without `quote` this is a size: `lots * lot_size / 10^decimals`.
/// With `quote = (quote_lot_size, quote_decimals)` this is a price, where
/// `lot_size` is the base lot size and `decimals` the base decimals:
/// `lots * quote_lot_size * 10^base_decimals / (base_lot_size * 10^quote_decimals)`.
pub fn lots_to_decimal(
    lots: u64,
    lot_size: u64,
    decimals: u8,
    quote: Option<(u64, u8)>,
) -> Result<Decimal, LotError> {
    let ratio = match quote {
        None => {
            let n = (lots as u128)
                .checked_mul(lot_size as u128)
                .ok_or(LotError::Overflow)?;
            divide_exact(n, decimal_multiplier(decimals)?)?
        }
        Some((quote_lot_size, quote_decimals)) => {
            let n = (lots as u128)
                .checked_mul(quote_lot_size as u128)
                .and_then(|v| v.checked_mul(decimal_multiplier(decimals).ok()?))
                .ok_or(LotError::Overflow)?;
            let d = (lot_size as u128)
                .checked_mul(decimal_multiplier(quote_decimals)?)
                .ok_or(LotError::Overflow)?;
            divide_exact(n, d)?
        }
    };
    ratio.to_decimal()
}

/// Lot sizes and decimals of one market. Constructed only with non-zero lot sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketLots {
    base_lot_size: u64,
    quote_lot_size: u64,
    base_decimals: u8,
    quote_decimals: u8,
}

impl MarketLots {
    pub fn new(
        base_lot_size: u64,
        quote_lot_size: u64,
        base_decimals: u8,
        quote_decimals: u8,
    ) -> Result<Self, LotError> {
        if base_lot_size == 0 || quote_lot_size == 0 {
            return Err(LotError::ZeroLotSize);
        }
        decimal_multiplier(base_decimals)?;
        decimal_multiplier(quote_decimals)?;
        Ok(Self {
            base_lot_size,
            quote_lot_size,
            base_decimals,
            quote_decimals,
        })
    }

    pub fn base_lot_size(&self) -> u64 {
        self.base_lot_size
    }

    pub fn quote_lot_size(&self) -> u64 {
        self.quote_lot_size
    }

    pub fn base_decimals(&self) -> u8 {
        self.base_decimals
    }

    pub fn quote_decimals(&self) -> u8 {
        self.quote_decimals
    }

    fn base_multiplier(&self) -> u128 {
        10u128.pow(self.base_decimals as u32)
    }

    fn quote_multiplier(&self) -> u128 {
        10u128.pow(self.quote_decimals as u32)
    }

    // native quote per native base, before decimal scaling
    pub fn price_lots_to_native(&self, price_lots: u64) -> Result<LotRatio, LotError> {
        divide_exact(
            price_lots as u128 * self.quote_lot_size as u128,
            self.base_lot_size as u128,
        )
    }

    pub fn price_lots_to_ratio(&self, price_lots: u64) -> Result<LotRatio, LotError> {
        let n = (price_lots as u128 * self.quote_lot_size as u128)
            .checked_mul(self.base_multiplier())
            .ok_or(LotError::Overflow)?;
        let d = (self.base_lot_size as u128)
            .checked_mul(self.quote_multiplier())
            .ok_or(LotError::Overflow)?;
        divide_exact(n, d)
    }

    pub fn price_lots_to_number(&self, price_lots: u64) -> Result<Decimal, LotError> {
        self.price_lots_to_ratio(price_lots)?.to_decimal()
    }

    /// `round(price * 10^quote_decimals * base_lot_size / (10^base_decimals * quote_lot_size))`
    pub fn price_number_to_lots(&self, price: Decimal) -> Result<u64, LotError> {
        if price.is_sign_negative() {
            return Err(LotError::NegativeQuantity(price));
        }
        let scale = to_decimal(self.quote_multiplier())?
            .checked_mul(Decimal::from(self.base_lot_size))
            .ok_or(LotError::Overflow)?;
        let divisor = to_decimal(self.base_multiplier())?
            .checked_mul(Decimal::from(self.quote_lot_size))
            .ok_or(LotError::Overflow)?;
        let lots = price
            .checked_mul(scale)
            .and_then(|v| v.checked_div(divisor))
            .ok_or(LotError::Overflow)?;
        round_to_u64(lots)
    }

    pub fn base_size_lots_to_number(&self, size_lots: u64) -> Result<Decimal, LotError> {
        lots_to_decimal(size_lots, self.base_lot_size, self.base_decimals, None)
    }

    /// Native amount rounded to the nearest unit, then floored to whole lots.
    pub fn base_size_number_to_lots(&self, size: Decimal) -> Result<u64, LotError> {
        let native = native_amount(size, self.base_multiplier())?;
        Ok(native / self.base_lot_size)
    }

    pub fn quote_size_lots_to_number(&self, size_lots: u64) -> Result<Decimal, LotError> {
        lots_to_decimal(size_lots, self.quote_lot_size, self.quote_decimals, None)
    }

    pub fn quote_size_number_to_lots(&self, size: Decimal) -> Result<u64, LotError> {
        let native = native_amount(size, self.quote_multiplier())?;
        Ok(native / self.quote_lot_size)
    }

    pub fn base_native(&self, base_lots: u64) -> u128 {
        base_lots as u128 * self.base_lot_size as u128
    }

    // quote tokens an order locks up: price_lots * base_lots * quote_lot_size.
    // the third factor can leave u128; saturate so the cost still compares
    // above any balance
    pub fn native_quote(&self, price_lots: u64, base_lots: u64) -> u128 {
        (price_lots as u128 * base_lots as u128).saturating_mul(self.quote_lot_size as u128)
    }
}

fn to_decimal(v: u128) -> Result<Decimal, LotError> {
    Decimal::from_u128(v).ok_or(LotError::Overflow)
}

fn round_to_u64(v: Decimal) -> Result<u64, LotError> {
    v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .ok_or(LotError::Overflow)
}

fn native_amount(size: Decimal, multiplier: u128) -> Result<u64, LotError> {
    if size.is_sign_negative() {
        return Err(LotError::NegativeQuantity(size));
    }
    let scaled = size
        .checked_mul(to_decimal(multiplier)?)
        .ok_or(LotError::Overflow)?;
    round_to_u64(scaled)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LotError {
    #[error("Lot size is zero")]
    ZeroLotSize,

    #[error("Lot arithmetic overflow")]
    Overflow,

    #[error("Negative quantity: {0}")]
    NegativeQuantity(Decimal),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn gcd_basics() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(0, 7), 7);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(gcd(17, 5), 1);
    }

    #[test]
    fn divide_exact_reduces_remainder() {
        let r = divide_exact(14, 4).unwrap();
        assert_eq!(r.quotient, 3);
        assert_eq!(r.numerator, 1);
        assert_eq!(r.denominator, 2);
        assert_eq!(r.to_decimal().unwrap(), dec!(3.5));
    }

    #[test]
    fn native_amounts() {
        assert_eq!(number_to_native(dec!(1.5), 9).unwrap(), 1_500_000_000);
        assert_eq!(native_to_number(2_500_000, 6).unwrap(), dec!(2.5));
        assert!(number_to_native(dec!(-1), 6).is_err());
    }

    #[test]
    fn divide_exact_zero_divisor() {
        assert_eq!(divide_exact(1, 0), Err(LotError::ZeroLotSize));
    }

    #[test]
    fn price_scenario_from_lot_sizes() {
        // base lot 100, quote lot 10, both 6 decimals: 5000 lots = 5000 * 10 / 100
        let lots = MarketLots::new(100, 10, 6, 6).unwrap();
        let native = lots.price_lots_to_native(5000).unwrap();
        assert_eq!(native.quotient, 500);
        assert!(native.is_integral());
        assert_eq!(lots.price_lots_to_number(5000).unwrap(), dec!(500));
        assert_eq!(lots.price_number_to_lots(dec!(500)).unwrap(), 5000);
    }

    #[test]
    fn price_with_different_decimals() {
        // SOL/USDC style: base 9 decimals, quote 6
        let lots = MarketLots::new(100_000_000, 100, 9, 6).unwrap();
        // 1 lot = 100 * 1e9 / (1e8 * 1e6) = 0.001
        assert_eq!(lots.price_lots_to_number(1).unwrap(), dec!(0.001));
        assert_eq!(lots.price_number_to_lots(dec!(23.456)).unwrap(), 23456);
    }

    #[test]
    fn size_conversions() {
        let lots = MarketLots::new(100_000_000, 100, 9, 6).unwrap();
        assert_eq!(lots.base_size_lots_to_number(15).unwrap(), dec!(1.5));
        assert_eq!(lots.base_size_number_to_lots(dec!(1.55)).unwrap(), 15);
        assert_eq!(lots.quote_size_lots_to_number(3).unwrap(), dec!(0.0003));
        assert_eq!(lots.quote_size_number_to_lots(dec!(0.0003)).unwrap(), 3);
    }

    #[test]
    fn generic_lots_to_decimal_matches_market_helpers() {
        let lots = MarketLots::new(100, 10, 6, 6).unwrap();
        assert_eq!(
            lots_to_decimal(5000, 100, 6, Some((10, 6))).unwrap(),
            lots.price_lots_to_number(5000).unwrap()
        );
        assert_eq!(
            lots_to_decimal(3, 100, 6, None).unwrap(),
            lots.base_size_lots_to_number(3).unwrap()
        );
    }

    #[test]
    fn zero_lot_size_is_rejected() {
        assert_eq!(MarketLots::new(0, 10, 6, 6), Err(LotError::ZeroLotSize));
        assert_eq!(MarketLots::new(10, 0, 6, 6), Err(LotError::ZeroLotSize));
    }

    #[test]
    fn negative_inputs_are_rejected() {
        let lots = MarketLots::new(100, 10, 6, 6).unwrap();
        assert!(matches!(
            lots.price_number_to_lots(dec!(-1)),
            Err(LotError::NegativeQuantity(_))
        ));
        assert!(matches!(
            lots.base_size_number_to_lots(dec!(-0.5)),
            Err(LotError::NegativeQuantity(_))
        ));
    }

    #[test]
    fn native_quote_cost() {
        let lots = MarketLots::new(100, 10, 6, 6).unwrap();
        assert_eq!(lots.native_quote(5000, 3), 150_000);
        assert_eq!(lots.base_native(3), 300);
    }

    #[test]
    fn native_quote_saturates() {
        let lots = MarketLots::new(1, 1_000, 0, 0).unwrap();
        assert_eq!(lots.native_quote(u64::MAX, u64::MAX), u128::MAX);
        assert_eq!(lots.base_native(u64::MAX), u64::MAX as u128);
    }
}
