//! In-memory cluster and exchange for tests and the demo binary.

mod chain;
mod exchange;

pub use chain::{InMemoryChain, SentTransaction, TRANSACTION_FEE};
pub use exchange::{
    BookEntry, SimBook, SimExchange, SimFault, SimInstruction, SimMarketState, SimTokenProgram,
    MARKET_RENT, OPEN_ORDERS_RENT, SIM_EXCHANGE_ID, SIM_TOKEN_PROGRAM_ID, TOKEN_ACCOUNT_RENT,
};
