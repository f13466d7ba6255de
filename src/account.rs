//! Trading account aggregate and its lifecycle state.
//!
//! An account is one owner/payer pair, a position per configured token and a
//! market view per configured market. The lifecycle moves through
//! `Unloaded -> Loaded -> Listening` and back to `Unloaded` on teardown;
//! `Listening` implies `Loaded`. Every operation states which states it accepts
//! and a call from any other state is rejected before anything is sent.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::market::MarketView;
use crate::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    #[default]
    Unloaded,
    Loaded,
    Listening,
}

impl AccountState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, AccountState::Loaded | AccountState::Listening)
    }

    pub fn is_listening(&self) -> bool {
        *self == AccountState::Listening
    }

    pub fn require_unloaded(&self, operation: &'static str) -> Result<(), AccountError> {
        match self {
            AccountState::Unloaded => Ok(()),
            _ => Err(AccountError::InvalidState {
                operation,
                state: *self,
            }),
        }
    }

    pub fn require_loaded(&self, operation: &'static str) -> Result<(), AccountError> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(AccountError::InvalidState {
                operation,
                state: *self,
            })
        }
    }

    /// Loaded but not streaming: bulk account creation must not race a subscription callback.
    pub fn require_idle(&self, operation: &'static str) -> Result<(), AccountError> {
        match self {
            AccountState::Loaded => Ok(()),
            _ => Err(AccountError::InvalidState {
                operation,
                state: *self,
            }),
        }
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountState::Unloaded => write!(f, "unloaded"),
            AccountState::Loaded => write!(f, "loaded"),
            AccountState::Listening => write!(f, "listening"),
        }
    }
}

/// Positions and market views of a loaded account, keyed by symbol.
#[derive(Debug, Default)]
pub struct Account {
    pub positions: BTreeMap<String, Arc<Position>>,
    pub markets: BTreeMap<String, Arc<MarketView>>,
    /// Configured markets whose market account did not exist at load.
    pub unlisted: BTreeSet<String>,
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_position(&mut self, position: Arc<Position>) {
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn add_market(&mut self, market: Arc<MarketView>) {
        self.markets.insert(market.symbol.clone(), market);
    }

    pub fn position(&self, symbol: &str) -> Result<&Arc<Position>, AccountError> {
        self.positions
            .get(symbol)
            .ok_or_else(|| AccountError::UnknownSymbol(symbol.to_string()))
    }

    pub fn market(&self, symbol: &str) -> Option<&Arc<MarketView>> {
        self.markets.get(symbol)
    }

    pub fn market_list(&self) -> Vec<Arc<MarketView>> {
        self.markets.values().cloned().collect()
    }

    pub fn positions_with_accounts(&self) -> impl Iterator<Item = &Arc<Position>> {
        self.positions.values().filter(|p| p.token_account().is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: AccountState,
    },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
}
