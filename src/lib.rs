//! Crate root: public surface, field aliases, and engine-wide invariants
//!
//! `claimproof` lets the holder of an attested private value (age, salary,
//! jurisdiction, ...) prove a public predicate about it (`value ≥ threshold`,
//! `value ∈ [min, max]`, `value ∈ allowedSet`) without disclosing the value,
//! and stops a proof from being replayed as evidence of a new event.
//!
//! ## Invariants
//!
//! - **Field.** Every witness assignment and public signal is an element of
//!   `ark_bn254::Fr` (`F` in this crate). Integer claims are range-checked to
//!   [`predicate::VALUE_BITS`] bits and rejected, never truncated.
//!
//! - **Private data stays on the generation stack.** Private inputs live in
//!   [`predicate::PredicateSpec`] and [`witness::Witness`], both zeroized on
//!   drop and redacted in `Debug`. Nothing private reaches a
//!   [`record::ProofRecord`], a log line or a response.
//!
//! - **Replay safety.** For any nullifier commitment exactly one proof id is
//!   ever accepted; the guarantee comes from the atomic
//!   [`store::ReplayGuard::test_and_insert`], not from request ordering.
//!
//! - **Hashing.** Nullifier commitments, set commitments and text-to-field
//!   mappings go through the BLAKE3 [`transcript::Transcript`] with explicit
//!   domain-separation labels.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use ark_ff::{BigInteger, PrimeField};

/// Error taxonomy shared by every component.
pub mod error;
/// Predicate kinds, claim values and the typed `PredicateSpec` union.
pub mod predicate;
/// Domain-separated BLAKE3 transcript (hash → field).
pub mod transcript;
/// Nullifier secret → public commitment derivation.
pub mod nullifier;
/// Witness assembly: validation, canonical set order, set commitments.
pub mod witness;
/// Proving-backend boundary: circuit selection and public-signal marshalling.
pub mod backend;
/// Development proving backend (constraint-checking, keyed-MAC proofs).
#[cfg(feature = "dev-backend")]
pub mod dev_backend;
/// Persisted proof records, verification state machine and identifiers.
pub mod record;
/// Attestation store boundary (external collaborator).
pub mod attestation;
/// Proof persistence and the replay guard.
pub mod store;
/// Upstash Redis (REST) persistence adapter.
pub mod kvs;
/// Bounded prover pool and generation job registry.
pub mod pool;
/// Proof lifecycle orchestrator.
pub mod engine;
/// Environment-driven engine configuration.
pub mod config;
/// Ergonomic builder and proof-file I/O.
pub mod api;

// ============================================================================
// Canonical aliases and root-level re-exports
// ============================================================================

/// Scalar field used across the crate (BN254).
pub type F = ark_bn254::Fr;

/// Byte length of a canonical field-element encoding.
pub const FE_BYTES: usize = 32;

pub use crate::attestation::{Actor, Attestation, AttestationStatus, AttestationStore};
pub use crate::backend::{BackendError, CircuitId, ProvingBackend};
pub use crate::config::EngineConfig;
pub use crate::engine::{GenerateRequest, ProofEngine};
pub use crate::error::ClaimProofError;
pub use crate::nullifier::{derive_nullifier_commitment, NullifierCommitment};
pub use crate::predicate::{ClaimValue, NullifierSecret, PredicateKind, PredicateSpec, PublicInputs};
pub use crate::record::{
    AttestationId, JobId, ProofId, ProofRecord, RejectionReason, VerificationOutcome,
    VerificationState,
};
pub use crate::store::{MemoryStore, ProofStore, ReplayGuard};
pub use crate::witness::{assemble_witness, Witness};

// ============================================================================
// Field encoding helpers
// ============================================================================

/// Canonical little-endian encoding of a field element.
pub fn fe_to_bytes(x: &F) -> [u8; FE_BYTES] {
    let mut out = [0u8; FE_BYTES];
    let le = x.into_bigint().to_bytes_le();
    let n = le.len().min(FE_BYTES);
    out[..n].copy_from_slice(&le[..n]);
    out
}

/// Decode a canonical encoding; non-canonical (≥ modulus) inputs are rejected.
pub fn fe_from_bytes(bytes: &[u8; FE_BYTES]) -> Option<F> {
    let x = F::from_le_bytes_mod_order(bytes);
    if fe_to_bytes(&x) == *bytes {
        Some(x)
    } else {
        None
    }
}

/// `0x`-prefixed hex of the canonical encoding.
pub fn fe_hex(x: &F) -> String {
    format!("0x{}", hex::encode(fe_to_bytes(x)))
}

/// Whether `x`, read as an integer, fits in `bits` bits.
pub fn fe_fits_bits(x: &F, bits: u32) -> bool {
    x.into_bigint().num_bits() <= bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_encoding_is_canonical() {
        let x = F::from(0xdead_beef_u64);
        let bytes = fe_to_bytes(&x);
        assert_eq!(fe_from_bytes(&bytes), Some(x));

        // The all-ones pattern exceeds the BN254 modulus.
        assert_eq!(fe_from_bytes(&[0xff; FE_BYTES]), None);
    }

    #[test]
    fn bit_width_check() {
        assert!(fe_fits_bits(&F::from(u64::MAX), 64));
        let over = F::from(u64::MAX) + F::from(1u64);
        assert!(!fe_fits_bits(&over, 64));
        assert!(fe_fits_bits(&F::from(0u64), 64));
    }
}
