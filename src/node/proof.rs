//! Ownership proof sessions.
//!
//! The seller (prover) runs one round of the identification protocol against
//! every other peer (verifiers) for each transfer:
//!
//! ```text
//! prover                         verifier
//!   proof_commit {tx, h, y, p, g} ──▶  draw b
//!   ◀── proof_challenge {tx, b}
//!   proof_response {tx, s, owner} ──▶  check g^s == h·y^b
//!   ◀── proof_result {tx, accepted}
//! ```
//!
//! The first verdict resolves the prover's wait. Each addressed verifier gets
//! exactly one response per commitment: answering both `b = 0` and `b = 1`
//! for the same `r` would reveal the secret. A session (and its keys) is
//! dropped once resolved and every addressed verifier has been answered.
//!
//! The coordinator only keeps session state and builds replies; the node
//! does all I/O.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::crypto::schnorr::verify;
use crate::crypto::{Challenge, Commitment, CryptoGroup, OwnershipKeyPair};
use crate::network::Message;
use crate::types::asset::id_matches_key;
use crate::types::{Asset, AssetRecord, Transaction, TransactionId};

/// Where a proof session stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofState {
    Idle,
    /// Prover broadcast its commitment
    HSent,
    /// Verifier answered with a challenge
    ChallengeSent,
    /// Prover answered at least one challenge
    ResponseSent,
    Resolved,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("Commitment uses group ({p}, {g}), expected ({}, {})", .expected.p, .expected.g)]
    GroupMismatch { p: u64, g: u64, expected: CryptoGroup },

    #[error("Property {property} is not bound to public key {public_key}")]
    KeyMismatch { property: String, public_key: u64 },

    #[error("Transaction {0} already has a proof session")]
    DuplicateSession(TransactionId),
}

/// Verifier's conclusion about a response.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub transaction: Transaction,
    pub accepted: bool,
    /// Seller's public record of the asset
    pub owner_details: AssetRecord,
}

impl Verdict {
    pub fn to_message(&self) -> Message {
        Message::ProofResult {
            transaction: self.transaction.id.clone(),
            accepted: self.accepted,
        }
    }
}

struct ProverSession {
    keys: OwnershipKeyPair,
    commitment: Commitment,
    record: AssetRecord,
    state: ProofState,
    resolver: Option<oneshot::Sender<bool>>,
    /// Peers the commitment went to
    addressed: HashSet<SocketAddr>,
    /// Addressed peers not answered yet
    unanswered: HashSet<SocketAddr>,
}

impl ProverSession {
    fn finished(&self) -> bool {
        self.state == ProofState::Resolved && self.unanswered.is_empty()
    }
}

struct VerifierSession {
    transaction: Transaction,
    prover: SocketAddr,
    h: u64,
    public_key: u64,
    challenge: Challenge,
    state: ProofState,
}

/// Per-transaction proof bookkeeping for both roles.
pub struct ProofCoordinator {
    /// Local group parameters
    group: CryptoGroup,

    /// Sessions where this node proves ownership
    provers: Mutex<HashMap<TransactionId, ProverSession>>,

    /// Sessions where this node verifies someone else
    verifiers: Mutex<HashMap<TransactionId, VerifierSession>>,
}

impl ProofCoordinator {
    pub fn new(group: CryptoGroup) -> Self {
        Self {
            group,
            provers: Mutex::new(HashMap::new()),
            verifiers: Mutex::new(HashMap::new()),
        }
    }

    pub fn group(&self) -> CryptoGroup {
        self.group
    }

    // ========================================================================
    // PROVER
    // ========================================================================

    /// Open a prover session for `tx` over `asset`, to be sent to
    /// `verifiers`.
    ///
    /// Returns the commitment to broadcast and the receiver completed by the
    /// first verdict.
    pub fn begin(
        &self,
        tx: &Transaction,
        asset: &Asset,
        verifiers: &[SocketAddr],
    ) -> Result<(Message, oneshot::Receiver<bool>), ProofError> {
        let mut provers = self.provers.lock();
        if provers.contains_key(&tx.id) {
            return Err(ProofError::DuplicateSession(tx.id.clone()));
        }

        let keys = asset.keys().clone();
        let commitment = keys.commit();
        let group = keys.group();
        let (resolver, receiver) = oneshot::channel();

        provers.insert(
            tx.id.clone(),
            ProverSession {
                keys,
                commitment,
                record: asset.record.clone(),
                state: ProofState::HSent,
                resolver: Some(resolver),
                addressed: verifiers.iter().copied().collect(),
                unanswered: verifiers.iter().copied().collect(),
            },
        );

        let message = Message::ProofCommit {
            transaction: tx.clone(),
            h: commitment.h,
            public_key: asset.public_key(),
            p: group.p,
            g: group.g,
        };
        Ok((message, receiver))
    }

    /// Answer a verifier's challenge.
    ///
    /// Only peers the commitment went to are answered, each at most once.
    pub fn on_challenge(&self, from: SocketAddr, tx_id: &str, b: Challenge) -> Option<Message> {
        let mut provers = self.provers.lock();
        let session = provers.get_mut(tx_id)?;
        if !session.unanswered.remove(&from) {
            return None;
        }

        let s = session.keys.respond(&session.commitment, b);
        let response = Message::ProofResponse {
            transaction: tx_id.to_string(),
            s,
            owner_details: session.record.clone(),
        };
        if session.state != ProofState::Resolved {
            session.state = ProofState::ResponseSent;
        }
        if session.finished() {
            provers.remove(tx_id);
        }
        Some(response)
    }

    /// Record a verdict from an addressed verifier. Returns it if this
    /// verdict resolved the proof; later verdicts, strangers and unknown
    /// transactions yield `None`.
    pub fn on_result(&self, from: SocketAddr, tx_id: &str, accepted: bool) -> Option<bool> {
        let mut provers = self.provers.lock();
        let session = provers.get_mut(tx_id)?;
        if !session.addressed.contains(&from) {
            return None;
        }
        let resolver = session.resolver.take()?;
        session.state = ProofState::Resolved;
        if session.finished() {
            provers.remove(tx_id);
        }
        // The waiter may have timed out already
        let _ = resolver.send(accepted);
        Some(accepted)
    }

    /// Drop a prover session and its keys.
    pub fn abandon(&self, tx_id: &str) {
        self.provers.lock().remove(tx_id);
    }

    /// Number of prover sessions still holding keys.
    pub fn open_sessions(&self) -> usize {
        self.provers.lock().len()
    }

    pub fn prover_state(&self, tx_id: &str) -> Option<ProofState> {
        self.provers.lock().get(tx_id).map(|session| session.state)
    }

    // ========================================================================
    // VERIFIER
    // ========================================================================

    /// Accept a commitment and draw the challenge to send back.
    pub fn on_commit(
        &self,
        prover: SocketAddr,
        transaction: Transaction,
        h: u64,
        public_key: u64,
        p: u64,
        g: u64,
    ) -> Result<Message, ProofError> {
        if p != self.group.p || g != self.group.g {
            return Err(ProofError::GroupMismatch {
                p,
                g,
                expected: self.group,
            });
        }
        if !id_matches_key(&transaction.property_id, public_key, None) {
            return Err(ProofError::KeyMismatch {
                property: transaction.property_id.clone(),
                public_key,
            });
        }

        let challenge = Challenge::random();
        let tx_id = transaction.id.clone();
        self.verifiers.lock().insert(
            tx_id.clone(),
            VerifierSession {
                transaction,
                prover,
                h,
                public_key,
                challenge,
                state: ProofState::ChallengeSent,
            },
        );

        Ok(Message::ProofChallenge {
            transaction: tx_id,
            b: challenge,
        })
    }

    /// Check a response against the stored commitment and challenge.
    ///
    /// Responses from anyone but the committing prover are ignored.
    pub fn on_response(
        &self,
        from: SocketAddr,
        tx_id: &str,
        s: u64,
        owner_details: AssetRecord,
    ) -> Option<Verdict> {
        let mut verifiers = self.verifiers.lock();
        if verifiers.get(tx_id)?.prover != from {
            return None;
        }
        let mut session = verifiers.remove(tx_id)?;
        session.state = ProofState::Resolved;

        let bound = id_matches_key(
            &session.transaction.property_id,
            session.public_key,
            Some(&owner_details.address),
        );
        let accepted =
            bound && verify(self.group, session.h, s, session.public_key, session.challenge);

        Some(Verdict {
            transaction: session.transaction,
            accepted,
            owner_details,
        })
    }

    pub fn verifier_state(&self, tx_id: &str) -> Option<ProofState> {
        self.verifiers.lock().get(tx_id).map(|session| session.state)
    }
}
