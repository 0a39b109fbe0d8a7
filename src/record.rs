//! Persisted proof records and the verification state machine.
//!
//! A [`ProofRecord`] is created once per successful generation and holds only
//! public material: canonical public inputs, the proof blob and the nullifier
//! commitment. Its [`VerificationState`] moves `Unverified → Verified` or
//! `Unverified → Rejected` exactly once; both targets are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::ClaimProofError;
use crate::nullifier::NullifierCommitment;
use crate::predicate::{PredicateKind, PublicInputs};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a persisted proof record.
    ProofId
);
string_id!(
    /// Identifier of an attestation in the external attestation store.
    AttestationId
);
string_id!(
    /// Handle for an in-flight or finished generation job.
    JobId
);

fn random_hex_128() -> String {
    let mut r = [0u8; 16];
    OsRng.fill_bytes(&mut r);
    hex::encode(r)
}

impl ProofId {
    /// Fresh random 128-bit identifier.
    pub fn random() -> Self {
        Self(random_hex_128())
    }
}

impl JobId {
    /// Fresh random 128-bit identifier.
    pub fn random() -> Self {
        Self(random_hex_128())
    }
}

// ------------------------------ State machine ------------------------------

/// Why a record was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    /// The backend's cryptographic check failed.
    InvalidProof,
    /// Valid proof, but the commitment was first accepted for another record.
    NullifierReplayed { first_accepted: ProofId },
}

impl RejectionReason {
    /// The error a caller sees for a record rejected for this reason.
    pub fn to_error(&self, proof_id: &ProofId) -> ClaimProofError {
        match self {
            RejectionReason::InvalidProof => ClaimProofError::ProofVerificationFailed(proof_id.clone()),
            RejectionReason::NullifierReplayed { first_accepted } => {
                ClaimProofError::NullifierReplayed {
                    proof_id: proof_id.clone(),
                    first_accepted: first_accepted.clone(),
                }
            }
        }
    }
}

/// Verification state of a proof record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    Verified {
        verified_at: DateTime<Utc>,
    },
    Rejected {
        reason: RejectionReason,
        rejected_at: DateTime<Utc>,
    },
}

impl VerificationState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationState::Unverified)
    }
}

// ------------------------------ Records ------------------------------

/// The persisted result of a successful generation. Never holds private inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub id: ProofId,
    pub attestation_id: AttestationId,
    /// Subject that generated the proof. Public metadata.
    #[serde(default)]
    pub owner_subject: String,
    pub circuit_type: PredicateKind,
    /// Canonical public inputs (set members in canonical order).
    pub public_inputs: PublicInputs,
    #[serde(with = "b64")]
    pub proof: Vec<u8>,
    pub nullifier_commitment: NullifierCommitment,
    pub state: VerificationState,
    pub created_at: DateTime<Utc>,
}

impl ProofRecord {
    pub fn new(
        attestation_id: AttestationId,
        owner_subject: impl Into<String>,
        public_inputs: PublicInputs,
        proof: Vec<u8>,
        nullifier_commitment: NullifierCommitment,
    ) -> Self {
        Self {
            id: ProofId::random(),
            attestation_id,
            owner_subject: owner_subject.into(),
            circuit_type: public_inputs.kind(),
            public_inputs,
            proof,
            nullifier_commitment,
            state: VerificationState::Unverified,
            created_at: Utc::now(),
        }
    }

    /// `true` only once verification succeeded.
    pub fn verified(&self) -> bool {
        matches!(self.state, VerificationState::Verified { .. })
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            VerificationState::Verified { verified_at } => Some(verified_at),
            _ => None,
        }
    }

    pub fn is_owned_by(&self, actor: &crate::attestation::Actor) -> bool {
        self.owner_subject == actor.subject
    }

    /// Same record with a new state (used by stores for transitions).
    pub fn with_state(&self, state: VerificationState) -> Self {
        Self { state, ..self.clone() }
    }
}

/// First acceptance of a nullifier commitment. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub nullifier_commitment: NullifierCommitment,
    pub first_accepted_proof_id: ProofId,
    pub accepted_at: DateTime<Utc>,
}

/// Result of the replay guard's atomic test-and-insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayInsert {
    Inserted,
    AlreadyPresent(ProofId),
}

/// Replay-protection counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub accepted_commitments: u64,
    pub oldest_accepted_at: Option<DateTime<Utc>>,
}

/// Successful verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub proof_id: ProofId,
    pub valid: bool,
    pub verified_at: DateTime<Utc>,
    /// `true` when answered from the record without re-running verification.
    pub cached: bool,
}

/// Base64 (standard alphabet) for proof blobs in JSON.
pub(crate) mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
