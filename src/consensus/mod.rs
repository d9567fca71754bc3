//! Randomized-delay consensus.
//!
//! Every node that sees the pending pool reach the threshold sleeps for a
//! random delay and then tries to mint. The first to finish wins; the others
//! notice the moved head and abort.

pub mod delay;
pub mod engine;

pub use delay::MintDelay;
pub use engine::{apply_transactions, ConsensusEngine, MintOutcome};
