//! Error taxonomy for generation and verification.
//!
//! Every variant is a per-request outcome; none is fatal to the process.
//! Messages never carry private values: validation errors on private inputs
//! use generic shape/bounds wording, and verification errors only name public
//! identifiers.

use crate::attestation::AttestationStatus;
use crate::record::{AttestationId, JobId, ProofId};

/// Errors surfaced by the proof lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClaimProofError {
    /// Local validation failed; no backend call was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("attestation {0} not found")]
    AttestationNotFound(AttestationId),

    #[error("attestation {id} is not eligible for proving (status: {status})")]
    AttestationNotEligible {
        id: AttestationId,
        status: AttestationStatus,
    },

    #[error("actor is not authorized to prove claims about this attestation")]
    Unauthorized,

    /// Backend failure at proving time. No record was persisted; retrying
    /// with the same inputs is safe.
    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    /// The synchronous wait elapsed; the job keeps running and can be polled.
    #[error("proof generation is still pending (job {0})")]
    GenerationPending(JobId),

    #[error("generation job {0} not found")]
    JobNotFound(JobId),

    #[error("proof {0} not found")]
    ProofNotFound(ProofId),

    /// Terminal for the record: the cryptographic check failed.
    #[error("proof {0} failed cryptographic verification")]
    ProofVerificationFailed(ProofId),

    /// Terminal for the record: the proof is valid but its nullifier was
    /// already accepted for a different proof.
    #[error("proof {proof_id} reuses a nullifier already accepted for proof {first_accepted}")]
    NullifierReplayed {
        proof_id: ProofId,
        first_accepted: ProofId,
    },

    #[error("storage error: {0}")]
    Storage(String),

    /// Transient backend outage during verification; the record is untouched.
    #[error("proving backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl ClaimProofError {
    /// Stable machine-readable code (used in API error bodies).
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::AttestationNotFound(_) => "attestation_not_found",
            Self::AttestationNotEligible { .. } => "attestation_not_eligible",
            Self::Unauthorized => "unauthorized",
            Self::ProofGenerationFailed(_) => "proof_generation_failed",
            Self::GenerationPending(_) => "generation_pending",
            Self::JobNotFound(_) => "job_not_found",
            Self::ProofNotFound(_) => "proof_not_found",
            Self::ProofVerificationFailed(_) => "proof_verification_failed",
            Self::NullifierReplayed { .. } => "nullifier_replayed",
            Self::Storage(_) => "storage_error",
            Self::BackendUnavailable(_) => "backend_unavailable",
        }
    }

    /// Whether the error is a terminal verdict on a persisted record.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ProofVerificationFailed(_) | Self::NullifierReplayed { .. }
        )
    }

    /// Whether the same call may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProofGenerationFailed(_)
                | Self::GenerationPending(_)
                | Self::Storage(_)
                | Self::BackendUnavailable(_)
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Errors raised by persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,
    #[error("record {0} already exists")]
    Duplicate(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for ClaimProofError {
    fn from(e: StoreError) -> Self {
        ClaimProofError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_retryable_are_disjoint() {
        let id = ProofId::from("p1");
        let replay = ClaimProofError::NullifierReplayed {
            proof_id: id.clone(),
            first_accepted: ProofId::from("p0"),
        };
        assert!(replay.is_terminal());
        assert!(!replay.is_retryable());
        assert_eq!(replay.code(), "nullifier_replayed");

        let failed = ClaimProofError::ProofGenerationFailed("unsatisfied".into());
        assert!(failed.is_retryable());
        assert!(!failed.is_terminal());
    }

    #[test]
    fn replay_and_invalid_proof_are_distinct() {
        let id = ProofId::from("p1");
        let invalid = ClaimProofError::ProofVerificationFailed(id.clone());
        let replay = ClaimProofError::NullifierReplayed {
            proof_id: id,
            first_accepted: ProofId::from("p0"),
        };
        assert_ne!(invalid.code(), replay.code());
    }
}
