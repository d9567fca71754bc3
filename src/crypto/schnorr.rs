//! Schnorr-style identification over [`CryptoGroup`].
//!
//! One round: the prover commits to `h = g^r`, the verifier flips a bit `b`,
//! the prover answers `s = r + b·x mod (p-1)` and the verifier checks
//! `g^s == h·y^b`. A cheating prover survives a round with probability 1/2.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::group::CryptoGroup;

/// Per-asset key material. The secret exponent never leaves the owning node.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnershipKeyPair {
    group: CryptoGroup,
    secret: u64,
    public: u64,
}

/// Prover-side commitment. `r` stays private to the prover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commitment {
    pub r: u64,
    pub h: u64,
}

/// A single-bit verifier challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Challenge {
    Zero,
    One,
}

impl Challenge {
    /// Draw a uniformly random challenge.
    pub fn random() -> Self {
        if rand::thread_rng().gen_bool(0.5) {
            Challenge::One
        } else {
            Challenge::Zero
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Challenge::Zero => 0,
            Challenge::One => 1,
        }
    }
}

impl From<Challenge> for u8 {
    fn from(challenge: Challenge) -> Self {
        challenge.as_u64() as u8
    }
}

impl TryFrom<u8> for Challenge {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Challenge::Zero),
            1 => Ok(Challenge::One),
            other => Err(format!("challenge must be 0 or 1, got {other}")),
        }
    }
}

impl OwnershipKeyPair {
    /// Generate a fresh keypair: `secret ∈ [0, p-1]`, `public = g^secret mod p`.
    pub fn generate(group: CryptoGroup) -> Self {
        let secret = rand::thread_rng().gen_range(0..group.p);
        Self::from_secret(group, secret)
    }

    /// Rebuild a keypair from a known secret.
    pub fn from_secret(group: CryptoGroup, secret: u64) -> Self {
        Self {
            group,
            secret,
            public: group.exp(secret),
        }
    }

    pub fn group(&self) -> CryptoGroup {
        self.group
    }

    pub fn public(&self) -> u64 {
        self.public
    }

    pub(crate) fn secret(&self) -> u64 {
        self.secret
    }

    /// Prover: pick `r ∈ [0, p-1]` and commit to `h = g^r mod p`.
    pub fn commit(&self) -> Commitment {
        commit(self.group)
    }

    /// Prover: answer a challenge for a previous commitment.
    pub fn respond(&self, commitment: &Commitment, challenge: Challenge) -> u64 {
        respond(self.group, commitment.r, challenge, self.secret)
    }
}

impl std::fmt::Debug for OwnershipKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipKeyPair")
            .field("group", &self.group)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Prover commitment step.
pub fn commit(group: CryptoGroup) -> Commitment {
    let r = rand::thread_rng().gen_range(0..group.p);
    Commitment { r, h: group.exp(r) }
}

/// Prover response step: `s = (r + b·secret) mod (p-1)`.
pub fn respond(group: CryptoGroup, r: u64, challenge: Challenge, secret: u64) -> u64 {
    let order = group.order() as u128;
    let s = (r as u128 + challenge.as_u64() as u128 * secret as u128) % order;
    s as u64
}

/// Verifier check: `g^s mod p == h·public^b mod p`.
pub fn verify(group: CryptoGroup, h: u64, s: u64, public: u64, challenge: Challenge) -> bool {
    let lhs = group.exp(s);
    let rhs = group.mul(h % group.p, group.pow(public, challenge.as_u64()));
    lhs == rhs
}
