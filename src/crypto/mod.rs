//! Cryptographic primitives for ownership proofs.
//!
//! Provides the shared prime-order group parameters and the one-bit
//! Schnorr identification round used to prove asset ownership.

pub mod group;
pub mod schnorr;

pub use group::{CryptoGroup, GroupError, DEFAULT_GENERATOR, DEFAULT_PRIME};
pub use schnorr::{Challenge, Commitment, OwnershipKeyPair};
