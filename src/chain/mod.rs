//! The chain abstraction: head pointer, block index, append validation.

pub mod ledger;

pub use ledger::{AppendOutcome, BlockIndex, ChainError, Ledger};
