// margin-core: margin account and order execution core for CLOB trading bots.
// balance-first architecture: an order never locks more than the wallet holds.
// chain access goes through one trait; the sim module runs it all in memory.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Side, OrderType, OrderId, Timestamp, Pubkey serde
//   2.x  error_code.rs: exchange error code table
//   3.x  lots.rs: exact lot <-> human unit conversion
//   4.x  position.rs: token position, SPL layout, push-updated balance
//   5.x  chain.rs: chain connection trait + errors
//   5.1  protocol.rs: exchange and token program clients, registry
//   6.x  market.rs: market view, book + open-orders snapshots, batched loads
//   7.x  config.rs: tokens, markets, keypair files
//   8.x  engine/: account engine: orders, lifecycle, settlement, reporting
//   9.x  order.rs: desired orders, clipping, dedup, per-order decision
//   10.x account.rs: account aggregate + lifecycle state
//   11.x events.rs: order and lifecycle events for audit
//   12.x sim/: in-memory cluster and exchange

// core modules
pub mod account;
pub mod engine;
pub mod events;
pub mod lots;
pub mod market;
pub mod order;
pub mod position;
pub mod types;

// chain integration
pub mod chain;
pub mod config;
pub mod error_code;
pub mod protocol;
pub mod sim;

// re exports for convenience
pub use account::*;
pub use chain::*;
pub use config::*;
pub use engine::*;
pub use error_code::*;
pub use events::*;
pub use lots::*;
pub use market::*;
pub use order::*;
pub use position::*;
pub use protocol::*;
pub use types::*;
