// 8.0: account engine. turns desired orders into batched transactions and runs
// the account lifecycle: load, listen, create accounts, cancel, settle, close.
// one logical controller per account; push callbacks only replace cached state.

mod config;
mod core;
mod lifecycle;
mod orders;
mod reporting;
mod results;
mod settlement;

pub use config::EngineConfig;
pub use core::{Collaborators, Engine, Signers};
pub use orders::SubmissionHandle;
pub use results::{
    BalanceLine, CancelReport, EngineError, OpenOrderLine, Rejection, SendReport,
};
