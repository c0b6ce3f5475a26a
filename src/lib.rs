//! Proof of Elapsed Time block verification.
//!
//! [`verifier::BlockVerifier`] decides whether a block's wait certificate is
//! a legitimate claim to lead: the proposer must be registered, the
//! certificate must be signed by the proposer's enclave, chain to the fork's
//! previous certificate, and fit the statistics of recent waits.

pub mod account;
pub mod block;
pub mod certificate;
pub mod config;
pub mod enclave;
pub mod logging;
pub mod registry;
pub mod replay;
pub mod settings;
pub mod simulator;
pub mod state;
pub mod timer;
pub mod verifier;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use block::{Block, BlockCache, BlockId};
pub use config::{Config, Policy};
pub use state::{StateRoot, StateView, StateViewFactory};
pub use verifier::{BlockVerifier, Verdict};
