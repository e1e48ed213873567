// Deterministic application layer for an oracle and staking ledger.
// Consensus, transport and block production live outside this crate.

pub mod app;
pub mod config;
pub mod crypto;
pub mod error;
pub mod incentives;
pub mod ledger;
#[cfg(feature = "node")]
pub mod node;
pub mod oracle;
pub mod transition;
pub mod tx;
pub mod validation;

#[cfg(test)]
mod testutil;

pub use app::{Application, Clock, FixedClock, SystemClock};
pub use error::{Rejection, ResultCode};

// No wall clock in the apply path; block time is injected by the caller.
