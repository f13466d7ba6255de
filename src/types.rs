// 1.0: the primitives. sides, order types, exchange order ids, timestamps.
// addresses are solana pubkeys everywhere, re-exported here so callers need one import.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use solana_sdk::pubkey::Pubkey;

/// Base58 string form for pubkeys in config files and encoded records.
pub mod serde_pubkey {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(d)?;
        Pubkey::from_str(&s).map_err(de::Error::custom)
    }
}

// Bid = buy base with quote. Ask = sell base for quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    pub fn is_bid(&self) -> bool {
        *self == Side::Bid
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "buy"),
            Side::Ask => write!(f, "sell"),
        }
    }
}

/// How a placed order behaves once it reaches the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Rests on the book until filled or canceled.
    #[default]
    Limit,
    /// Fill what crosses, drop the rest.
    ImmediateOrCancel,
    /// Rejected by the exchange if it would take liquidity.
    PostOnly,
}

// 1.1: exchange order id. the high 64 bits carry the limit price in lots,
// the low 64 bits a sequence number. zero marks an empty open-orders slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct OrderId(pub u128);

impl OrderId {
    pub const EMPTY: OrderId = OrderId(0);

    pub fn new(price_lots: u64, sequence: u64) -> Self {
        Self(((price_lots as u128) << 64) | sequence as u128)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn price_lots(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    pub fn sequence(&self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#034x}", self.0)
    }
}

// 1.2: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_carries_price_in_high_bits() {
        let id = OrderId::new(5000, 17);
        assert_eq!(id.price_lots(), 5000);
        assert_eq!(id.sequence(), 17);
        assert!(!id.is_empty());
        assert!(OrderId::EMPTY.is_empty());
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.opposite(), Side::Bid);
        assert!(Side::Bid.is_bid());
    }

    #[test]
    fn side_display() {
        assert_eq!(Side::Bid.to_string(), "buy");
        assert_eq!(Side::Ask.to_string(), "sell");
    }
}
